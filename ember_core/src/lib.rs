pub mod collections;
pub mod compiler;
pub mod config;
pub mod error;
pub mod native_functions;
pub mod output_manager;
pub mod runtime;
pub mod telemetry;
pub mod value;

pub use compiler::BytecodeBuilder;
pub use config::{GcConfig, VmConfig};
pub use error::{EmberError, EmberErrorType};
pub use runtime::{disassemble, Collector, EmberVM, Opcode, Program, RunResult, RunStatus};
pub use value::{Address, TaggedValue};
