use std::sync::Arc;

use parking_lot::Mutex;

/// Lines written by the `print` native. Cloning shares the same buffer, so an
/// embedder can keep a handle and read output after the VM is done with it.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_line(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    /// Copy of everything written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Remove and return all pending lines.
    /// Returns them in write order
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
