use serde::{Deserialize, Serialize};

pub const DEFAULT_HEAP_SIZE: usize = 4096;

/// Collector configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Total cells across both semi-spaces.
    pub heap_size: usize,
    /// Verify the to-space invariant at the end of every cycle and trace
    /// barrier hits.
    pub debug: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            debug: false,
        }
    }
}

impl GcConfig {
    pub fn with_heap_size(heap_size: usize) -> Self {
        Self {
            heap_size,
            ..Self::default()
        }
    }

    pub fn semispace_capacity(&self) -> usize {
        self.heap_size / 2
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub gc: GcConfig,
    /// Log every executed instruction at trace level.
    pub trace: bool,
}
