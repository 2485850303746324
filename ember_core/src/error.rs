use std::fmt;

use crate::{
    runtime::{CellShape, RunStatus},
    value::Address,
};

#[derive(Debug, Clone)]
pub struct EmberError {
    pub message: String,
    pub error_type: EmberErrorType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmberErrorType {
    // Mutator errors
    StackUnderflow,
    InvalidOperands,
    InvalidInstruction,
    InternalConsistency,
    MissingReturnValue {
        native: String,
    },

    // Collector errors
    OutOfMemory,
    ScanningIncomplete,
    InvalidAddress {
        address: Address,
    },

    // Cell operation errors
    ShapeMismatch {
        expected: CellShape,
        found: CellShape,
    },
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    KeyNotFound {
        key: String,
    },
}

impl EmberErrorType {
    /// Closest run status for an error that escaped to the run boundary.
    pub fn status(&self) -> RunStatus {
        match self {
            EmberErrorType::StackUnderflow => RunStatus::StackUnderflow,
            EmberErrorType::InvalidOperands => RunStatus::InvalidOperands,
            EmberErrorType::InvalidInstruction => RunStatus::InvalidInstruction,
            _ => RunStatus::UnknownFailure,
        }
    }

    pub fn is_collector_error(&self) -> bool {
        matches!(
            self,
            EmberErrorType::OutOfMemory
                | EmberErrorType::ScanningIncomplete
                | EmberErrorType::InvalidAddress { .. }
        )
    }
}

impl EmberError {
    pub fn stack_underflow(operation: &str) -> Self {
        Self {
            message: format!("Stack underflow in '{}'", operation),
            error_type: EmberErrorType::StackUnderflow,
        }
    }

    pub fn invalid_operands(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: EmberErrorType::InvalidOperands,
        }
    }

    pub fn invalid_instruction(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: EmberErrorType::InvalidInstruction,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: EmberErrorType::InternalConsistency,
        }
    }

    pub fn missing_return_value(native: &str) -> Self {
        Self {
            message: format!("Native '{}' produced no return value", native),
            error_type: EmberErrorType::MissingReturnValue { native: native.to_string() },
        }
    }

    pub fn out_of_memory(live: usize, capacity: usize) -> Self {
        Self {
            message: format!("Heap exhausted: {} of {} cells live after collection", live, capacity),
            error_type: EmberErrorType::OutOfMemory,
        }
    }

    pub fn scanning_incomplete(scan_ptr: usize, frontier: usize) -> Self {
        Self {
            message: format!(
                "Flip requested while scan is at {} of {} cells",
                scan_ptr, frontier
            ),
            error_type: EmberErrorType::ScanningIncomplete,
        }
    }

    pub fn invalid_address(address: Address) -> Self {
        Self {
            message: format!("No cell at address {}", address),
            error_type: EmberErrorType::InvalidAddress { address },
        }
    }

    pub fn shape_mismatch(expected: CellShape, found: CellShape) -> Self {
        Self {
            message: format!("Expected a {} cell, found a {} cell", expected, found),
            error_type: EmberErrorType::ShapeMismatch { expected, found },
        }
    }

    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self {
            message: format!("Index {} out of range for length {}", index, len),
            error_type: EmberErrorType::IndexOutOfRange { index, len },
        }
    }

    pub fn key_not_found(key: &str) -> Self {
        Self {
            message: format!("Key '{}' not found", key),
            error_type: EmberErrorType::KeyNotFound { key: key.to_string() },
        }
    }

    pub fn status(&self) -> RunStatus {
        self.error_type.status()
    }
}

impl fmt::Display for EmberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            EmberErrorType::StackUnderflow => write!(f, "Stack underflow: {}", self.message),
            EmberErrorType::InvalidOperands => write!(f, "Invalid operands: {}", self.message),
            EmberErrorType::InvalidInstruction => write!(f, "Invalid instruction: {}", self.message),
            EmberErrorType::InternalConsistency => write!(f, "Internal error: {}", self.message),
            EmberErrorType::MissingReturnValue { native } => {
                write!(f, "Native '{}' must return a value", native)
            }
            EmberErrorType::OutOfMemory => write!(f, "Out of memory: {}", self.message),
            EmberErrorType::ScanningIncomplete => write!(f, "Scanning incomplete: {}", self.message),
            EmberErrorType::InvalidAddress { address } => write!(f, "Invalid address {}", address),
            EmberErrorType::ShapeMismatch { expected, found } => {
                write!(f, "Shape mismatch: expected {}, found {}", expected, found)
            }
            EmberErrorType::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range (length {})", index, len)
            }
            EmberErrorType::KeyNotFound { key } => write!(f, "Key '{}' not found", key),
        }
    }
}

impl std::error::Error for EmberError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutator_errors_keep_their_status() {
        assert_eq!(EmberError::stack_underflow("pop").status(), RunStatus::StackUnderflow);
        assert_eq!(EmberError::invalid_operands("x").status(), RunStatus::InvalidOperands);
        assert_eq!(EmberError::invalid_instruction("x").status(), RunStatus::InvalidInstruction);
    }

    #[test]
    fn everything_else_is_unknown_failure() {
        assert_eq!(EmberError::out_of_memory(4, 4).status(), RunStatus::UnknownFailure);
        assert_eq!(EmberError::internal("x").status(), RunStatus::UnknownFailure);
        assert_eq!(
            EmberError::shape_mismatch(CellShape::List, CellShape::Map).status(),
            RunStatus::UnknownFailure
        );
        assert!(EmberError::scanning_incomplete(1, 2).error_type.is_collector_error());
    }
}
