use serde::{Deserialize, Serialize};

/// Summary of one completed collection cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub live_cells: usize,
    pub cells_copied: usize,
    pub cells_scanned: usize,
    pub rescanned: usize,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Self::default()
        }
    }
}
