use serde::{Deserialize, Serialize};

use crate::{error::EmberError, value::TaggedValue};

// Opcodes - each occupies one bytecode word, as does each operand
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Stack operations
    Const = 0x01,        // Push constant pool entry
    Pop = 0x02,          // Discard top of stack
    Drop = 0x03,         // Discard n values
    Zero = 0x04,         // Push zero value of a kind
    Dup = 0x05,          // Push copy of top of stack

    // Locals and globals
    Get = 0x10,          // Push copy of frame slot
    Set = 0x11,          // Pop into frame slot
    GetGlobal = 0x12,    // Push copy of absolute slot
    SetGlobal = 0x13,    // Pop into absolute slot
    IncLocal = 0x14,
    DecLocal = 0x15,
    IncGlobal = 0x16,
    DecGlobal = 0x17,

    // Arithmetic operations
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Pow = 0x25,
    Neg = 0x26,
    Inc = 0x27,
    Dec = 0x28,
    Not = 0x29,

    // Comparison operations
    Eq = 0x30,
    Ne = 0x31,
    Lt = 0x32,
    Le = 0x33,
    Gt = 0x34,
    Ge = 0x35,

    // Control flow, offsets are relative to the next instruction
    Jump = 0x40,
    JumpFalse = 0x41,    // Peek, jump if falsy
    JumpTrue = 0x42,     // Peek, jump if truthy
    JumpFalsePop = 0x43, // Pop, jump if falsy
    JumpTruePop = 0x44,  // Pop, jump if truthy

    // Function operations
    Call = 0x50,
    TailCall = 0x51,
    Return = 0x52,
    CallNative = 0x53,

    // Heap operations
    MakeList = 0x60,
    MakeSet = 0x61,
    MakeMap = 0x62,
    GetIndex = 0x63,
    SetIndex = 0x64,
}

impl Opcode {
    pub fn from_i32(word: i32) -> Result<Self, EmberError> {
        match word {
            0x01 => Ok(Opcode::Const),
            0x02 => Ok(Opcode::Pop),
            0x03 => Ok(Opcode::Drop),
            0x04 => Ok(Opcode::Zero),
            0x05 => Ok(Opcode::Dup),
            0x10 => Ok(Opcode::Get),
            0x11 => Ok(Opcode::Set),
            0x12 => Ok(Opcode::GetGlobal),
            0x13 => Ok(Opcode::SetGlobal),
            0x14 => Ok(Opcode::IncLocal),
            0x15 => Ok(Opcode::DecLocal),
            0x16 => Ok(Opcode::IncGlobal),
            0x17 => Ok(Opcode::DecGlobal),
            0x20 => Ok(Opcode::Add),
            0x21 => Ok(Opcode::Sub),
            0x22 => Ok(Opcode::Mul),
            0x23 => Ok(Opcode::Div),
            0x24 => Ok(Opcode::Mod),
            0x25 => Ok(Opcode::Pow),
            0x26 => Ok(Opcode::Neg),
            0x27 => Ok(Opcode::Inc),
            0x28 => Ok(Opcode::Dec),
            0x29 => Ok(Opcode::Not),
            0x30 => Ok(Opcode::Eq),
            0x31 => Ok(Opcode::Ne),
            0x32 => Ok(Opcode::Lt),
            0x33 => Ok(Opcode::Le),
            0x34 => Ok(Opcode::Gt),
            0x35 => Ok(Opcode::Ge),
            0x40 => Ok(Opcode::Jump),
            0x41 => Ok(Opcode::JumpFalse),
            0x42 => Ok(Opcode::JumpTrue),
            0x43 => Ok(Opcode::JumpFalsePop),
            0x44 => Ok(Opcode::JumpTruePop),
            0x50 => Ok(Opcode::Call),
            0x51 => Ok(Opcode::TailCall),
            0x52 => Ok(Opcode::Return),
            0x53 => Ok(Opcode::CallNative),
            0x60 => Ok(Opcode::MakeList),
            0x61 => Ok(Opcode::MakeSet),
            0x62 => Ok(Opcode::MakeMap),
            0x63 => Ok(Opcode::GetIndex),
            0x64 => Ok(Opcode::SetIndex),
            _ => Err(EmberError::invalid_instruction(format!(
                "Invalid opcode: 0x{:02x}",
                word
            ))),
        }
    }

    pub fn code(self) -> i32 {
        self as u8 as i32
    }

    /// Number of operand words that follow the opcode.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::Const
            | Opcode::Drop
            | Opcode::Zero
            | Opcode::Get
            | Opcode::Set
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::IncLocal
            | Opcode::DecLocal
            | Opcode::IncGlobal
            | Opcode::DecGlobal
            | Opcode::Call
            | Opcode::TailCall
            | Opcode::CallNative
            | Opcode::MakeList
            | Opcode::MakeSet
            | Opcode::MakeMap => 1,
            _ if self.is_jump() => 1,
            _ => 0,
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpFalse
                | Opcode::JumpTrue
                | Opcode::JumpFalsePop
                | Opcode::JumpTruePop
        )
    }
}

// Bytecode is a flat vector of opcode and operand words
pub type Bytecode = Vec<i32>;

/// Linked program handed over by the compiler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub constant_pool: Vec<TaggedValue>,
    pub bytecode: Bytecode,
    pub num_globals: usize,
}

impl Program {
    pub fn new(constant_pool: Vec<TaggedValue>, bytecode: Bytecode, num_globals: usize) -> Self {
        Self {
            constant_pool,
            bytecode,
            num_globals,
        }
    }
}

// Label patch for jump instructions
#[derive(Debug)]
pub struct LabelPatch {
    pub bytecode_offset: usize,
    pub label_id: u16,
}
