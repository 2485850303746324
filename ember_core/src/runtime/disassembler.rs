use std::fmt::Write;

use crate::runtime::{Opcode, Program};

// Bytecode disassembler for debugging
pub fn disassemble(program: &Program) -> String {
    let bytecode = &program.bytecode;
    let mut result = String::new();
    let mut pc = 0;

    while pc < bytecode.len() {
        let start_pc = pc;
        let opcode = match Opcode::from_i32(bytecode[pc]) {
            Ok(opcode) => opcode,
            Err(_) => {
                let _ = writeln!(result, "{:04}: INVALID 0x{:02x}", start_pc, bytecode[pc]);
                pc += 1;
                continue;
            }
        };
        pc += 1;
        let _ = write!(result, "{:04}: {:?}", start_pc, opcode);

        if opcode.operand_count() == 1 {
            match bytecode.get(pc) {
                Some(&operand) => {
                    pc += 1;
                    match opcode {
                        Opcode::Const => {
                            let shown = usize::try_from(operand)
                                .ok()
                                .and_then(|index| program.constant_pool.get(index));
                            match shown {
                                Some(value) => {
                                    let _ = write!(result, " {} ({:?})", operand, value);
                                }
                                None => {
                                    let _ = write!(result, " {} (out of bounds)", operand);
                                }
                            }
                        }
                        _ if opcode.is_jump() => {
                            let target = pc as i64 + operand as i64;
                            let _ = write!(result, " {:+} -> {:04}", operand, target);
                        }
                        _ => {
                            let _ = write!(result, " {}", operand);
                        }
                    }
                }
                None => {
                    result.push_str(" <truncated>");
                }
            }
        }

        result.push('\n');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TaggedValue;

    #[test]
    fn renders_operands_constants_and_targets() {
        let program = Program::new(
            vec![TaggedValue::number(5.0)],
            vec![
                Opcode::Const.code(), 0,
                Opcode::JumpFalse.code(), 1,
                Opcode::Neg.code(),
                Opcode::Return.code(),
                0x7f,
            ],
            0,
        );
        let text = disassemble(&program);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0000: Const 0 (Number(5.0))");
        assert_eq!(lines[1], "0002: JumpFalse +1 -> 0005");
        assert_eq!(lines[2], "0004: Neg");
        assert_eq!(lines[3], "0005: Return");
        assert_eq!(lines[4], "0006: INVALID 0x7f");
    }
}
