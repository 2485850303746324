use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Generation number of a semi-space. Every flip opens a fresh to-space with
/// the next generation, so an address always says which space issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpaceId(pub u32);

impl SpaceId {
    pub fn next(self) -> Self {
        SpaceId(self.0.wrapping_add(1))
    }
}

/// Heap address: an index into one semi-space. Never a native reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub index: usize,
    pub space: SpaceId,
}

impl Address {
    pub fn new(index: usize, space: SpaceId) -> Self {
        Self { index, space }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@g{}", self.index, self.space.0)
    }
}
