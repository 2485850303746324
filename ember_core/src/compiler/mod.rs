mod bytecode_builder;

pub use bytecode_builder::*;
