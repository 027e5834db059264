//! Intel-syntax text of x86-64 operation streams.
//!
//! Memory operands carry a `qword ptr` prefix except in `lea`; constant data is addressed
//! RIP-relative and emitted into `.data` after the function.

use crate::assembler::operand::{Base, Condition, MachineOp, MemoryOperand, Opcode, Operand};
use crate::assembler::unit::ConstantEntry;
use crate::ast::Number;
use crate::x64::registers::name;
use std::fmt::Write;

fn memory(memory: &MemoryOperand) -> String {
    let mut parts = Vec::new();
    match &memory.base {
        Some(Base::Register(register)) => parts.push(name(*register)),
        Some(Base::ConstantData(identifier)) => parts.push(format!("rip + {identifier}")),
        Some(Base::Slot(key)) => parts.push(format!("{key:?}")),
        None => {}
    }
    if let Some(index) = memory.index {
        if memory.scale == 1 {
            parts.push(name(index));
        } else {
            parts.push(format!("{}*{}", name(index), memory.scale));
        }
    }

    let mut text = parts.join(" + ");
    match memory.displacement {
        0 if !text.is_empty() => {}
        displacement if text.is_empty() => text = displacement.to_string(),
        displacement if displacement < 0 => {
            let _ = write!(text, " - {}", displacement.unsigned_abs());
        }
        displacement => {
            let _ = write!(text, " + {displacement}");
        }
    }
    format!("[{text}]")
}

fn operand(operand: &Operand, prefixed: bool) -> String {
    match operand {
        Operand::Register(register) => name(*register),
        Operand::Immediate(value) => value.to_string(),
        Operand::Memory(m) if prefixed => format!("qword ptr {}", memory(m)),
        Operand::Memory(m) => memory(m),
        Operand::Label(label) => label.clone(),
        Operand::Modifier(text) => text.clone(),
    }
}

fn is_media(operand: Option<&Operand>) -> bool {
    matches!(operand, Some(Operand::Register(register)) if register.is_media())
}

pub fn jump_mnemonic(condition: Condition, signed: bool) -> &'static str {
    match (condition, signed) {
        (Condition::Equal, _) => "je",
        (Condition::NotEqual, _) => "jne",
        (Condition::Less, true) => "jl",
        (Condition::LessOrEqual, true) => "jle",
        (Condition::Greater, true) => "jg",
        (Condition::GreaterOrEqual, true) => "jge",
        (Condition::Less, false) => "jb",
        (Condition::LessOrEqual, false) => "jbe",
        (Condition::Greater, false) => "ja",
        (Condition::GreaterOrEqual, false) => "jae",
    }
}

/// Operands of a two-address form; `[d, d, s]` is accepted as `[d, s]`.
fn two_address(operation: &MachineOp) -> Vec<&Operand> {
    match operation.operands.as_slice() {
        [destination, first, second] if destination == first => vec![destination, second],
        operands => operands.iter().collect(),
    }
}

fn mnemonic(operation: &MachineOp) -> &'static str {
    let first = operation.operand(0);
    let second = operation.operand(1);
    match operation.opcode {
        Opcode::Move => match (is_media(first), is_media(second)) {
            (true, true) => "movsd",
            (true, false) | (false, true) => match (first, second) {
                (Some(Operand::Register(_)), Some(Operand::Register(_))) => "movq",
                _ => "movsd",
            },
            (false, false) => "mov",
        },
        Opcode::LoadAddress => "lea",
        Opcode::Add if is_media(first) => "addsd",
        Opcode::Add => "add",
        Opcode::Subtract if is_media(first) => "subsd",
        Opcode::Subtract => "sub",
        Opcode::Multiply if is_media(first) => "mulsd",
        Opcode::Multiply => "imul",
        Opcode::ShiftLeft => "shl",
        Opcode::Compare if is_media(first) => "ucomisd",
        Opcode::Compare => "cmp",
        Opcode::Jump => "jmp",
        Opcode::ConditionalJump { condition, signed } => jump_mnemonic(condition, signed),
        Opcode::Call => "call",
        Opcode::Return => "ret",
        Opcode::Push => "push",
        Opcode::Pop => "pop",
        Opcode::Exchange => "xchg",
        Opcode::ConvertToDecimal => "cvtsi2sd",
        Opcode::Label | Opcode::SavePair | Opcode::RestorePair => "",
    }
}

/// One line of text, without indentation.
pub fn print_operation(operation: &MachineOp) -> String {
    if operation.opcode == Opcode::Label {
        return format!("{}:", operation.target().unwrap_or_default());
    }

    let operands: Vec<&Operand> = match operation.opcode {
        Opcode::Add | Opcode::Subtract => two_address(operation),
        Opcode::Multiply if is_media(operation.operand(0)) => two_address(operation),
        _ => operation.operands.iter().collect(),
    };
    // lea takes the bare address
    let prefixed = operation.opcode != Opcode::LoadAddress;
    let operands: Vec<String> = operands.iter().map(|o| operand(o, prefixed)).collect();

    let mnemonic = mnemonic(operation);
    if operands.is_empty() {
        mnemonic.to_string()
    } else {
        format!("{mnemonic} {}", operands.join(", "))
    }
}

fn constant_bits(value: Number) -> u64 {
    match value {
        Number::Integer(value) => value as u64,
        Number::Decimal(value) => value.to_bits(),
    }
}

/// Text of one function followed by its constant data.
pub fn print(symbol: &str, operations: &[MachineOp], constants: &[ConstantEntry]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, ".section .text");
    let _ = writeln!(text, ".global {symbol}");
    let _ = writeln!(text, "{symbol}:");
    for operation in operations {
        if operation.opcode == Opcode::Label {
            let _ = writeln!(text, "{}", print_operation(operation));
        } else {
            let _ = writeln!(text, "    {}", print_operation(operation));
        }
    }

    if !constants.is_empty() {
        let _ = writeln!(text, ".section .data");
        for constant in constants {
            let _ = writeln!(
                text,
                "{}: {} {:#x}",
                constant.identifier,
                constant.size.allocator(),
                constant_bits(constant.value)
            );
        }
    }
    text
}
