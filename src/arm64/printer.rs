//! AArch64 assembly text.
//!
//! Operations arrive in three-address form. Constant data is placed in `.text` right after
//! the function so literal loads stay within range.

use crate::arm64::registers::name;
use crate::assembler::operand::{Base, Condition, MachineOp, MemoryOperand, Opcode, Operand};
use crate::assembler::unit::ConstantEntry;
use crate::ast::Number;
use std::fmt::Write;

pub fn condition_code(condition: Condition, signed: bool) -> &'static str {
    match (condition, signed) {
        (Condition::Equal, _) => "eq",
        (Condition::NotEqual, _) => "ne",
        (Condition::Less, true) => "lt",
        (Condition::LessOrEqual, true) => "le",
        (Condition::Greater, true) => "gt",
        (Condition::GreaterOrEqual, true) => "ge",
        (Condition::Less, false) => "lo",
        (Condition::LessOrEqual, false) => "ls",
        (Condition::Greater, false) => "hi",
        (Condition::GreaterOrEqual, false) => "hs",
    }
}

fn memory(memory: &MemoryOperand) -> String {
    let base = match &memory.base {
        Some(Base::Register(register)) => name(*register),
        Some(Base::ConstantData(identifier)) => return identifier.clone(),
        Some(Base::Slot(key)) => format!("{key:?}"),
        None => "xzr".to_string(),
    };
    match (memory.index, memory.displacement) {
        (Some(index), _) if memory.scale > 1 => format!(
            "[{base}, {}, lsl #{}]",
            name(index),
            memory.scale.trailing_zeros()
        ),
        (Some(index), _) => format!("[{base}, {}]", name(index)),
        (None, 0) => format!("[{base}]"),
        (None, displacement) => format!("[{base}, #{displacement}]"),
    }
}

fn operand(operand: &Operand) -> String {
    match operand {
        Operand::Register(register) => name(*register),
        Operand::Immediate(value) => format!("#{value}"),
        Operand::Memory(m) => memory(m),
        Operand::Label(label) => label.clone(),
        Operand::Modifier(text) => text.clone(),
    }
}

fn list(operands: &[Operand]) -> String {
    operands.iter().map(operand).collect::<Vec<_>>().join(", ")
}

fn is_media(operand: Option<&Operand>) -> bool {
    matches!(operand, Some(Operand::Register(register)) if register.is_media())
}

/// `mov` for values a single move can build, `movz`/`movk` otherwise.
fn move_immediate(destination: &str, value: i64) -> Vec<String> {
    if (-65536..65536).contains(&value) {
        return vec![format!("mov {destination}, #{value}")];
    }
    let bits = value as u64;
    let mut lines = vec![format!("movz {destination}, #{}", bits & 0xffff)];
    for shift in [16, 32, 48] {
        let part = (bits >> shift) & 0xffff;
        if part != 0 {
            lines.push(format!("movk {destination}, #{part}, lsl #{shift}"));
        }
    }
    lines
}

fn print_move(operation: &MachineOp) -> Vec<String> {
    match operation.operands.as_slice() {
        [Operand::Register(d), Operand::Immediate(value)] => move_immediate(&name(*d), *value),
        [Operand::Register(d), Operand::Register(s)] if d.is_media() || s.is_media() => {
            vec![format!("fmov {}, {}", name(*d), name(*s))]
        }
        [Operand::Register(d), Operand::Register(s)] => vec![format!("mov {}, {}", name(*d), name(*s))],
        [Operand::Register(d), Operand::Memory(m)] => vec![format!("ldr {}, {}", name(*d), memory(m))],
        [Operand::Memory(m), Operand::Register(s)] => vec![format!("str {}, {}", name(*s), memory(m))],
        operands => vec![format!("mov {}", list(operands))],
    }
}

fn print_address(operation: &MachineOp) -> String {
    match operation.operands.as_slice() {
        [Operand::Register(d), Operand::Memory(m)] => {
            let d = name(*d);
            match (&m.base, m.index) {
                (Some(Base::ConstantData(identifier)), _) => format!("adr {d}, {identifier}"),
                (Some(Base::Register(base)), Some(index)) if m.scale > 1 => format!(
                    "add {d}, {}, {}, lsl #{}",
                    name(*base),
                    name(index),
                    m.scale.trailing_zeros()
                ),
                (Some(Base::Register(base)), Some(index)) => {
                    format!("add {d}, {}, {}", name(*base), name(index))
                }
                (Some(Base::Register(base)), None) => {
                    format!("add {d}, {}, #{}", name(*base), m.displacement)
                }
                _ => format!("add {d}, {}", memory(m)),
            }
        }
        operands => format!("add {}", list(operands)),
    }
}

/// Pre-decrementing save or post-incrementing restore of one or two registers.
fn print_pair(operation: &MachineOp, save: bool) -> String {
    let registers = list(&operation.operands);
    let pair = operation.operands.len() == 2;
    match (save, pair) {
        (true, true) => format!("stp {registers}, [sp, #-16]!"),
        (true, false) => format!("str {registers}, [sp, #-16]!"),
        (false, true) => format!("ldp {registers}, [sp], #16"),
        (false, false) => format!("ldr {registers}, [sp], #16"),
    }
}

/// Text of one operation; moves of wide immediates take several lines.
pub fn print_operation(operation: &MachineOp) -> Vec<String> {
    let media = is_media(operation.operand(0));
    let operands = list(&operation.operands);
    let line = match operation.opcode {
        Opcode::Label => format!("{}:", operation.target().unwrap_or_default()),
        Opcode::Move => return print_move(operation),
        Opcode::LoadAddress => print_address(operation),
        Opcode::Add if media => format!("fadd {operands}"),
        Opcode::Add => format!("add {operands}"),
        Opcode::Subtract if media => format!("fsub {operands}"),
        Opcode::Subtract => format!("sub {operands}"),
        Opcode::Multiply if media => format!("fmul {operands}"),
        Opcode::Multiply => format!("mul {operands}"),
        Opcode::ShiftLeft => format!("lsl {operands}"),
        Opcode::Compare if media => format!("fcmp {operands}"),
        Opcode::Compare => format!("cmp {operands}"),
        Opcode::Jump => format!("b {operands}"),
        Opcode::ConditionalJump { condition, signed } => {
            format!("b.{} {operands}", condition_code(condition, signed))
        }
        Opcode::Call => format!("bl {operands}"),
        Opcode::Return => "ret".to_string(),
        Opcode::ConvertToDecimal => format!("scvtf {operands}"),
        Opcode::SavePair => print_pair(operation, true),
        Opcode::RestorePair => print_pair(operation, false),
        Opcode::Push | Opcode::Pop | Opcode::Exchange => {
            format!("// {:?} {operands}", operation.opcode)
        }
    };
    vec![line]
}

/// Text of one function followed by its constant data.
pub fn print(symbol: &str, operations: &[MachineOp], constants: &[ConstantEntry]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, ".text");
    let _ = writeln!(text, ".global {symbol}");
    let _ = writeln!(text, ".balign 4");
    let _ = writeln!(text, "{symbol}:");
    for operation in operations {
        for line in print_operation(operation) {
            if operation.opcode == Opcode::Label {
                let _ = writeln!(text, "{line}");
            } else {
                let _ = writeln!(text, "    {line}");
            }
        }
    }

    if !constants.is_empty() {
        let _ = writeln!(text, ".balign 8");
        for constant in constants {
            let bits = match constant.value {
                Number::Integer(value) => value as u64,
                Number::Decimal(value) => value.to_bits(),
            };
            let _ = writeln!(text, "{}: {} {bits:#x}", constant.identifier, constant.size.allocator());
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm64::registers::{FRAME_POINTER, LINK_REGISTER, SP};
    use crate::core::config::Size;
    use crate::core::register_file::AsmReg;

    fn op(opcode: Opcode, operands: Vec<Operand>) -> MachineOp {
        MachineOp::new(opcode, operands, Size::Qword)
    }

    fn x(id: u8) -> Operand {
        Operand::Register(AsmReg::gp(id))
    }

    #[test]
    fn test_shifted_add() {
        let add = op(
            Opcode::Add,
            vec![x(0), x(1), x(1), Operand::Modifier("lsl #2".to_string())],
        );
        assert_eq!(print_operation(&add), vec!["add x0, x1, x1, lsl #2"]);
    }

    #[test]
    fn test_memory_and_pairs() {
        let slot = MemoryOperand::new(Base::Register(SP), 16);
        assert_eq!(
            print_operation(&op(Opcode::Move, vec![x(3), Operand::Memory(slot)])),
            vec!["ldr x3, [sp, #16]"]
        );

        let indexed = MemoryOperand::indexed(Base::Register(AsmReg::gp(1)), AsmReg::gp(2), 8, 0);
        assert_eq!(
            print_operation(&op(Opcode::Move, vec![Operand::Memory(indexed), x(0)])),
            vec!["str x0, [x1, x2, lsl #3]"]
        );

        let record = op(
            Opcode::SavePair,
            vec![Operand::Register(FRAME_POINTER), Operand::Register(LINK_REGISTER)],
        );
        assert_eq!(print_operation(&record), vec!["stp x29, x30, [sp, #-16]!"]);
    }

    #[test]
    fn test_wide_immediate() {
        let lines = print_operation(&op(Opcode::Move, vec![x(0), Operand::Immediate(0x1_0000_0001)]));
        assert_eq!(lines, vec!["movz x0, #1", "movk x0, #1, lsl #32"]);
    }

    #[test]
    fn test_unsigned_branch() {
        let jump = op(
            Opcode::ConditionalJump {
                condition: Condition::GreaterOrEqual,
                signed: false,
            },
            vec![Operand::Label("f_L2".to_string())],
        );
        assert_eq!(print_operation(&jump), vec!["b.hs f_L2"]);
    }
}
