use std::fmt;

use crate::{
    config::VmConfig,
    native_functions::NativeTable,
    output_manager::OutputSink,
    runtime::{CallFrame, Collector, Program, RunResult},
    value::TaggedValue,
};

/// Stack machine that runs one linked program on top of its own collector.
pub struct EmberVM {
    pub(crate) program: Program,
    pub(crate) gc: Collector,
    pub(crate) natives: NativeTable,
    pub(crate) stack: Vec<TaggedValue>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) output: OutputSink,
    pub(crate) trace: bool,
}

impl fmt::Debug for EmberVM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmberVM")
            .field("bytecode_len", &self.program.bytecode.len())
            .field("stack_depth", &self.stack.len())
            .field("frames", &self.frames.len())
            .field("natives", &self.natives.len())
            .field("gc", &self.gc)
            .finish()
    }
}

impl EmberVM {
    pub fn new(program: Program, gc: Collector) -> Self {
        Self {
            program,
            gc,
            natives: NativeTable::standard(),
            stack: Vec::new(),
            frames: Vec::new(),
            output: OutputSink::new(),
            trace: false,
        }
    }

    pub fn with_config(program: Program, config: &VmConfig) -> Self {
        let mut vm = Self::new(program, Collector::new(config.gc.clone()));
        vm.trace = config.trace;
        vm
    }

    pub fn with_natives(mut self, natives: NativeTable) -> Self {
        self.natives = natives;
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn gc(&self) -> &Collector {
        &self.gc
    }

    pub fn gc_mut(&mut self) -> &mut Collector {
        &mut self.gc
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn stack(&self) -> &[TaggedValue] {
        &self.stack
    }

    /// Run the program from the top. Errors never escape: they come back as
    /// a failed `RunResult` carrying the top of the stack.
    pub fn run(&mut self) -> RunResult {
        self.stack.clear();
        self.frames.clear();
        self.frames
            .push(CallFrame::new(0, 0, self.program.num_globals));

        match self.execute() {
            Ok(value) => RunResult::success(value),
            Err(err) => {
                let value = self.stack.last().cloned().unwrap_or_default();
                if err.error_type.is_collector_error() {
                    log::error!("run aborted by the collector: {} ({:?})", err, self.gc);
                } else {
                    log::warn!("run failed: {} (top of stack: {})", err, value);
                }
                RunResult::failure(err.status(), value)
            }
        }
    }
}
