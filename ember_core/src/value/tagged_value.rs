use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::value::Address;

/// The four primitive kinds a slot can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Number,
    String,
    Boolean,
    Pointer,
}

impl ValueKind {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ValueKind::Number),
            1 => Some(ValueKind::String),
            2 => Some(ValueKind::Boolean),
            3 => Some(ValueKind::Pointer),
            _ => None,
        }
    }

    /// Value used for declarations without an initializer.
    pub fn zero(self) -> TaggedValue {
        match self {
            ValueKind::Number => TaggedValue::Number(0.0),
            ValueKind::String => TaggedValue::Str(String::new()),
            ValueKind::Boolean => TaggedValue::Bool(false),
            ValueKind::Pointer => TaggedValue::Pointer(None),
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Boolean => "boolean",
            ValueKind::Pointer => "pointer",
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// A value as the mutator sees it. Primitives are copied by value; a pointer
/// only copies the address, so aliasing happens through the heap alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaggedValue {
    Number(f64),
    Str(String),
    Bool(bool),
    Pointer(Option<Address>),
}

impl Default for TaggedValue {
    fn default() -> Self {
        TaggedValue::Number(0.0)
    }
}

impl TaggedValue {
    // ------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------

    pub fn number(n: f64) -> Self {
        TaggedValue::Number(n)
    }

    pub fn string(s: impl Into<String>) -> Self {
        TaggedValue::Str(s.into())
    }

    pub fn boolean(b: bool) -> Self {
        TaggedValue::Bool(b)
    }

    pub fn pointer(address: Address) -> Self {
        TaggedValue::Pointer(Some(address))
    }

    pub fn null() -> Self {
        TaggedValue::Pointer(None)
    }

    // ------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------

    pub fn kind(&self) -> ValueKind {
        match self {
            TaggedValue::Number(_) => ValueKind::Number,
            TaggedValue::Str(_) => ValueKind::String,
            TaggedValue::Bool(_) => ValueKind::Boolean,
            TaggedValue::Pointer(_) => ValueKind::Pointer,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind().to_str()
    }

    /// Zero values are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            TaggedValue::Bool(b) => *b,
            TaggedValue::Number(n) => *n != 0.0,
            TaggedValue::Str(s) => !s.is_empty(),
            TaggedValue::Pointer(address) => address.is_some(),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, TaggedValue::Pointer(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TaggedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Address of a non-null pointer.
    pub fn as_address(&self) -> Option<Address> {
        match self {
            TaggedValue::Pointer(address) => *address,
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Display for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedValue::Number(n) => write!(f, "{}", format_number(*n)),
            TaggedValue::Str(s) => write!(f, "{}", s),
            TaggedValue::Bool(b) => write!(f, "{}", b),
            TaggedValue::Pointer(Some(address)) => write!(f, "<cell {}>", address),
            TaggedValue::Pointer(None) => write!(f, "null"),
        }
    }
}
