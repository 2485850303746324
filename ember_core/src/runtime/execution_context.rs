use crate::{
    collections::{OrderedMap, OrderedSet},
    error::EmberError,
    native_functions::NativeContext,
    runtime::{
        perform_arithmetic, perform_comparison, perform_unary, CellPayload, CellShape, EmberVM,
        Opcode,
    },
    value::{Address, TaggedValue, ValueKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub ip: usize,
    pub base_pointer: usize,
    pub num_locals: usize,
}

impl CallFrame {
    pub fn new(ip: usize, base_pointer: usize, num_locals: usize) -> Self {
        Self {
            ip,
            base_pointer,
            num_locals,
        }
    }
}

impl EmberVM {
    pub(crate) fn execute(&mut self) -> Result<TaggedValue, EmberError> {
        loop {
            let offset = self.current_frame()?.ip;
            let opcode = Opcode::from_i32(self.fetch()?)?;
            if self.trace {
                log::trace!("{:04} {:?} depth={}", offset, opcode, self.stack.len());
            }

            match opcode {
                Opcode::Const => {
                    let index = self.read_operand()?;
                    let value = self
                        .program
                        .constant_pool
                        .get(index)
                        .cloned()
                        .ok_or_else(|| {
                            EmberError::invalid_instruction(format!(
                                "Constant index {} out of bounds",
                                index
                            ))
                        })?;
                    self.stack.push(value);
                }

                Opcode::Pop => {
                    self.pop(opcode)?;
                }

                Opcode::Drop => {
                    let count = self.read_operand()?;
                    if count > self.stack.len() {
                        return Err(EmberError::stack_underflow("Drop"));
                    }
                    self.stack.truncate(self.stack.len() - count);
                }

                Opcode::Zero => {
                    let code = self.fetch()?;
                    let kind = ValueKind::from_i32(code).ok_or_else(|| {
                        EmberError::invalid_instruction(format!("Unknown value kind {}", code))
                    })?;
                    self.stack.push(kind.zero());
                }

                Opcode::Dup => {
                    let top = self.peek(opcode)?.clone();
                    self.stack.push(top);
                }

                Opcode::Get | Opcode::GetGlobal => {
                    let index = self.slot_index(opcode)?;
                    let value = self.slot_mut(index, opcode)?.clone();
                    self.stack.push(value);
                }

                Opcode::Set | Opcode::SetGlobal => {
                    let index = self.slot_index(opcode)?;
                    let value = self.pop(opcode)?;
                    *self.slot_mut(index, opcode)? = value;
                }

                Opcode::IncLocal | Opcode::DecLocal | Opcode::IncGlobal | Opcode::DecGlobal => {
                    let index = self.slot_index(opcode)?;
                    let slot = self.slot_mut(index, opcode)?;
                    *slot = perform_unary(opcode, slot.clone())?;
                }

                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Pow => {
                    let right = self.pop(opcode)?;
                    let left = self.pop(opcode)?;
                    self.stack.push(perform_arithmetic(opcode, left, right)?);
                }

                Opcode::Neg | Opcode::Inc | Opcode::Dec | Opcode::Not => {
                    let value = self.pop(opcode)?;
                    self.stack.push(perform_unary(opcode, value)?);
                }

                Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let right = self.pop(opcode)?;
                    let left = self.pop(opcode)?;
                    let right = self.resolve(right)?;
                    let left = self.resolve(left)?;
                    let result = perform_comparison(opcode, &left, &right)?;
                    self.stack.push(TaggedValue::Bool(result));
                }

                Opcode::Jump => {
                    let jump_offset = self.fetch()?;
                    self.jump(jump_offset)?;
                }

                Opcode::JumpFalse | Opcode::JumpTrue => {
                    let jump_offset = self.fetch()?;
                    let truthy = self.peek(opcode)?.is_truthy();
                    if truthy == (opcode == Opcode::JumpTrue) {
                        self.jump(jump_offset)?;
                    }
                }

                Opcode::JumpFalsePop | Opcode::JumpTruePop => {
                    let jump_offset = self.fetch()?;
                    let truthy = self.pop(opcode)?.is_truthy();
                    if truthy == (opcode == Opcode::JumpTruePop) {
                        self.jump(jump_offset)?;
                    }
                }

                Opcode::Call | Opcode::TailCall => {
                    let num_args = self.read_operand()?;
                    self.call(num_args, opcode == Opcode::TailCall)?;
                }

                Opcode::Return => {
                    if let Some(value) = self.return_from_frame()? {
                        return Ok(value);
                    }
                }

                Opcode::CallNative => {
                    let index = self.read_operand()?;
                    self.call_native(index)?;
                }

                Opcode::MakeList => {
                    let count = self.read_operand()?;
                    let items = self.take_items(count, opcode)?;
                    self.allocate(CellPayload::List(items))?;
                }

                Opcode::MakeSet => {
                    let count = self.read_operand()?;
                    let items = self.take_items(count, opcode)?;
                    self.allocate(CellPayload::Set(items.into_iter().collect::<OrderedSet>()))?;
                }

                Opcode::MakeMap => {
                    let count = self.read_operand()?;
                    let items = self.take_items(count.saturating_mul(2), opcode)?;
                    let mut map = OrderedMap::with_capacity(count);
                    let mut items = items.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        match key {
                            TaggedValue::Str(key) => {
                                map.insert(key, value);
                            }
                            other => {
                                return Err(EmberError::invalid_operands(format!(
                                    "Map keys must be strings, got {}",
                                    other.type_tag()
                                )))
                            }
                        }
                    }
                    self.allocate(CellPayload::Map(map))?;
                }

                Opcode::GetIndex => {
                    let key = self.pop(opcode)?;
                    let container = self.pop(opcode)?;
                    let value = self.get_index(container, key)?;
                    self.stack.push(value);
                }

                Opcode::SetIndex => {
                    let value = self.pop(opcode)?;
                    let key = self.pop(opcode)?;
                    let container = self.pop(opcode)?;
                    self.set_index(container, key, value)?;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    fn current_frame(&self) -> Result<&CallFrame, EmberError> {
        self.frames
            .last()
            .ok_or_else(|| EmberError::internal("No active call frame"))
    }

    fn fetch(&mut self) -> Result<i32, EmberError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| EmberError::internal("No active call frame"))?;
        let word = *self.program.bytecode.get(frame.ip).ok_or_else(|| {
            EmberError::invalid_instruction(format!(
                "Instruction pointer {} ran past the end of the bytecode",
                frame.ip
            ))
        })?;
        frame.ip += 1;
        Ok(word)
    }

    fn read_operand(&mut self) -> Result<usize, EmberError> {
        let word = self.fetch()?;
        usize::try_from(word).map_err(|_| {
            EmberError::invalid_instruction(format!("Negative operand {}", word))
        })
    }

    fn jump(&mut self, jump_offset: i32) -> Result<(), EmberError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| EmberError::internal("No active call frame"))?;
        let target = frame.ip as i64 + jump_offset as i64;
        frame.ip = usize::try_from(target).map_err(|_| {
            EmberError::invalid_instruction(format!("Jump target {} is before the program", target))
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stack access
    // ------------------------------------------------------------------

    fn pop(&mut self, opcode: Opcode) -> Result<TaggedValue, EmberError> {
        self.stack
            .pop()
            .ok_or_else(|| EmberError::stack_underflow(&format!("{:?}", opcode)))
    }

    fn peek(&self, opcode: Opcode) -> Result<&TaggedValue, EmberError> {
        self.stack
            .last()
            .ok_or_else(|| EmberError::stack_underflow(&format!("{:?}", opcode)))
    }

    /// Absolute stack index named by a slot operand.
    fn slot_index(&mut self, opcode: Opcode) -> Result<usize, EmberError> {
        let slot = self.read_operand()?;
        match opcode {
            Opcode::GetGlobal | Opcode::SetGlobal | Opcode::IncGlobal | Opcode::DecGlobal => Ok(slot),
            _ => Ok(self.current_frame()?.base_pointer + slot),
        }
    }

    fn slot_mut(&mut self, index: usize, opcode: Opcode) -> Result<&mut TaggedValue, EmberError> {
        let depth = self.stack.len();
        self.stack.get_mut(index).ok_or_else(|| {
            EmberError::stack_underflow(&format!("{:?} slot {} (depth {})", opcode, index, depth))
        })
    }

    fn take_items(&mut self, count: usize, opcode: Opcode) -> Result<Vec<TaggedValue>, EmberError> {
        if count > self.stack.len() {
            return Err(EmberError::stack_underflow(&format!("{:?}", opcode)));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Current address of a pointer value, anything else as is.
    fn resolve(&mut self, value: TaggedValue) -> Result<TaggedValue, EmberError> {
        match value {
            TaggedValue::Pointer(Some(address)) => Ok(TaggedValue::pointer(self.gc.read(address)?)),
            other => Ok(other),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call(&mut self, num_args: usize, tail: bool) -> Result<(), EmberError> {
        let destination = self.pop(if tail { Opcode::TailCall } else { Opcode::Call })?;
        let target = match destination {
            TaggedValue::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            other => {
                return Err(EmberError::invalid_operands(format!(
                    "Call destination must be a code offset, got {} {}",
                    other.type_tag(),
                    other
                )))
            }
        };
        if num_args > self.stack.len() {
            return Err(EmberError::stack_underflow("Call"));
        }
        let base_pointer = self.stack.len() - num_args;

        if !tail {
            self.frames
                .push(CallFrame::new(target, base_pointer, num_args));
            return Ok(());
        }

        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| EmberError::internal("No active call frame"))?;
        if base_pointer < frame.base_pointer {
            return Err(EmberError::stack_underflow("TailCall"));
        }
        let args = self.stack.split_off(base_pointer);
        self.stack.truncate(frame.base_pointer);
        self.stack.extend(args);
        frame.ip = target;
        frame.num_locals = num_args;
        Ok(())
    }

    /// Returns the final value once the outermost frame returns.
    fn return_from_frame(&mut self) -> Result<Option<TaggedValue>, EmberError> {
        let frame = *self.current_frame()?;
        let outermost = self.frames.len() == 1;

        let value = if self.stack.len() > frame.base_pointer {
            self.pop(Opcode::Return)?
        } else if outermost && self.stack.is_empty() {
            return Err(EmberError::internal(
                "Return from the outermost frame with an empty stack",
            ));
        } else {
            TaggedValue::default()
        };

        self.stack.truncate(frame.base_pointer);
        self.frames.pop();
        if outermost {
            return Ok(Some(value));
        }
        self.stack.push(value);
        Ok(None)
    }

    fn call_native(&mut self, index: usize) -> Result<(), EmberError> {
        let native = self.natives.get(index).cloned().ok_or_else(|| {
            EmberError::invalid_instruction(format!("No native function at index {}", index))
        })?;

        let needed = native.arity + usize::from(native.expects_receiver);
        if needed > self.stack.len() {
            return Err(EmberError::stack_underflow(native.name));
        }
        let args = self.stack.split_off(self.stack.len() - native.arity);
        let receiver = if native.expects_receiver {
            self.stack.pop()
        } else {
            None
        };

        let mut ctx = NativeContext {
            gc: &mut self.gc,
            stack: &mut self.stack,
            output: &self.output,
        };
        let result = (native.func)(receiver, args, &mut ctx)?;

        match result {
            Some(value) if native.has_return_value => self.stack.push(value),
            None if native.has_return_value => {
                return Err(EmberError::missing_return_value(native.name))
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Heap access
    // ------------------------------------------------------------------

    fn allocate(&mut self, payload: CellPayload) -> Result<(), EmberError> {
        let address = self.gc.alloc(payload, &mut self.stack)?;
        self.stack.push(TaggedValue::pointer(address));
        Ok(())
    }

    fn container_address(
        container: &TaggedValue,
        opcode: Opcode,
    ) -> Result<Address, EmberError> {
        container.as_address().ok_or_else(|| {
            EmberError::invalid_operands(format!(
                "{:?} expects a heap cell, got {} {}",
                opcode,
                container.type_tag(),
                container
            ))
        })
    }

    fn list_position(key: &TaggedValue, opcode: Opcode) -> Result<usize, EmberError> {
        match key {
            TaggedValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
            other => Err(EmberError::invalid_operands(format!(
                "{:?} on a list expects a non-negative integer index, got {}",
                opcode, other
            ))),
        }
    }

    fn map_key(key: &TaggedValue, opcode: Opcode) -> Result<&str, EmberError> {
        key.as_str().ok_or_else(|| {
            EmberError::invalid_operands(format!(
                "{:?} on a map expects a string key, got {}",
                opcode,
                key.type_tag()
            ))
        })
    }

    fn get_index(&mut self, container: TaggedValue, key: TaggedValue) -> Result<TaggedValue, EmberError> {
        let address = Self::container_address(&container, Opcode::GetIndex)?;
        match self.gc.shape(address)? {
            CellShape::List => {
                let position = Self::list_position(&key, Opcode::GetIndex)?;
                self.gc.load(address, position)
            }
            CellShape::Map => {
                let name = Self::map_key(&key, Opcode::GetIndex)?;
                self.gc
                    .get_field(address, name)?
                    .ok_or_else(|| EmberError::key_not_found(name))
            }
            CellShape::Set => Ok(TaggedValue::Bool(self.gc.has_member(address, key)?)),
        }
    }

    fn set_index(
        &mut self,
        container: TaggedValue,
        key: TaggedValue,
        value: TaggedValue,
    ) -> Result<(), EmberError> {
        let address = Self::container_address(&container, Opcode::SetIndex)?;
        match self.gc.shape(address)? {
            CellShape::List => {
                let position = Self::list_position(&key, Opcode::SetIndex)?;
                self.gc.write(address, position, value)?;
            }
            CellShape::Map => {
                let name = Self::map_key(&key, Opcode::SetIndex)?;
                self.gc.set(address, name, value)?;
            }
            CellShape::Set => {
                return Err(EmberError::shape_mismatch(CellShape::List, CellShape::Set));
            }
        }
        Ok(())
    }
}
