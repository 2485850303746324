use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::TaggedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    UnknownFailure,
    StackUnderflow,
    InvalidOperands,
    InvalidInstruction,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::UnknownFailure => "unknown failure",
            RunStatus::StackUnderflow => "stack underflow",
            RunStatus::InvalidOperands => "invalid operands",
            RunStatus::InvalidInstruction => "invalid instruction",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a whole run. Always carries a value, on failure the top of
/// the stack at the point things went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub value: TaggedValue,
}

impl RunResult {
    pub fn success(value: TaggedValue) -> Self {
        Self {
            status: RunStatus::Success,
            value,
        }
    }

    pub fn failure(status: RunStatus, value: TaggedValue) -> Self {
        Self { status, value }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.status)
    }
}
