mod arithmetic;
mod disassembler;
mod ember_vm;
mod execution_context;
mod gc;
mod heap;
mod opcode;
mod run_result;

pub use arithmetic::*;
pub use disassembler::*;
pub use ember_vm::*;
pub use execution_context::*;
pub use gc::*;
pub use heap::*;
pub use opcode::*;
pub use run_result::*;
