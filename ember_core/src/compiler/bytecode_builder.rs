use std::collections::HashMap;

use crate::{
    error::EmberError,
    runtime::{Bytecode, LabelPatch, Opcode, Program},
    value::{TaggedValue, ValueKind},
};

/// Assembles a linked `Program`: opcodes, operands, a deduplicated constant
/// pool and relative jumps resolved through labels.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    constants: Vec<TaggedValue>,
    bytecode: Bytecode,
    num_globals: usize,
    next_label: u16,
    label_positions: HashMap<u16, usize>,
    label_patches: Vec<LabelPatch>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(num_globals: usize) -> Self {
        Self {
            num_globals,
            ..Self::default()
        }
    }

    /// Offset the next emitted word will land at.
    pub fn position(&self) -> usize {
        self.bytecode.len()
    }

    // INSTRUCTION EMISSION

    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.bytecode.push(opcode.code());
        self
    }

    pub fn emit_with(&mut self, opcode: Opcode, operand: i32) -> &mut Self {
        self.bytecode.push(opcode.code());
        self.bytecode.push(operand);
        self
    }

    pub fn emit_zero(&mut self, kind: ValueKind) -> &mut Self {
        let code = match kind {
            ValueKind::Number => 0,
            ValueKind::String => 1,
            ValueKind::Boolean => 2,
            ValueKind::Pointer => 3,
        };
        self.emit_with(Opcode::Zero, code)
    }

    // CONSTANT POOL MANAGEMENT

    pub fn add_constant(&mut self, value: TaggedValue) -> usize {
        if let Some(index) = self.constants.iter().position(|existing| *existing == value) {
            return index;
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn emit_constant(&mut self, value: TaggedValue) -> &mut Self {
        let index = self.add_constant(value);
        self.emit_with(Opcode::Const, index as i32)
    }

    // LABEL MANAGEMENT

    pub fn alloc_label(&mut self) -> u16 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Emit a jump-family opcode whose offset is resolved once `label` is
    /// placed.
    pub fn emit_jump(&mut self, opcode: Opcode, label: u16) -> &mut Self {
        debug_assert!(opcode.is_jump());
        self.bytecode.push(opcode.code());
        let patch_offset = self.bytecode.len();
        match self.label_positions.get(&label) {
            Some(&target) => self.bytecode.push(Self::relative(patch_offset, target)),
            None => {
                self.label_patches.push(LabelPatch {
                    bytecode_offset: patch_offset,
                    label_id: label,
                });
                self.bytecode.push(0); // Placeholder
            }
        }
        self
    }

    pub fn emit_label(&mut self, label: u16) -> &mut Self {
        let current_pos = self.bytecode.len();
        self.label_positions.insert(label, current_pos);

        // Patch all jumps to this label
        for patch in &self.label_patches {
            if patch.label_id == label {
                self.bytecode[patch.bytecode_offset] =
                    Self::relative(patch.bytecode_offset, current_pos);
            }
        }

        // Remove processed patches
        self.label_patches.retain(|patch| patch.label_id != label);
        self
    }

    pub fn label_position(&self, label: u16) -> Option<usize> {
        self.label_positions.get(&label).copied()
    }

    /// Push the code offset of an already placed label and call it.
    pub fn emit_call(&mut self, label: u16, num_args: usize, tail: bool) -> Result<&mut Self, EmberError> {
        let target = self.label_position(label).ok_or_else(|| {
            EmberError::internal(format!("Call to label {} before it is placed", label))
        })?;
        self.emit_constant(TaggedValue::Number(target as f64));
        let opcode = if tail { Opcode::TailCall } else { Opcode::Call };
        Ok(self.emit_with(opcode, num_args as i32))
    }

    // Offsets count from the word after the operand
    fn relative(operand_offset: usize, target: usize) -> i32 {
        target as i32 - operand_offset as i32 - 1
    }

    pub fn build(self) -> Result<Program, EmberError> {
        if let Some(patch) = self.label_patches.first() {
            return Err(EmberError::internal(format!(
                "Jump at {} targets label {} which was never placed",
                patch.bytecode_offset, patch.label_id
            )));
        }
        Ok(Program::new(self.constants, self.bytecode, self.num_globals))
    }
}
