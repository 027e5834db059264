//! Machine operations handed to the architecture emitters.
//!
//! The opcode is architecture neutral; the operands are concrete. Frame slots stay
//! symbolic ([`Base::Slot`]) until the translator has laid out the frame.

use crate::ast::Operator;
use crate::context::VariableId;
use crate::core::config::Size;
use crate::core::register_file::AsmReg;

/// Outcome tested by a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Condition {
    pub fn from_operator(operator: Operator) -> Option<Condition> {
        let condition = match operator {
            Operator::Equals => Condition::Equal,
            Operator::NotEquals => Condition::NotEqual,
            Operator::Less => Condition::Less,
            Operator::LessOrEqual => Condition::LessOrEqual,
            Operator::Greater => Condition::Greater,
            Operator::GreaterOrEqual => Condition::GreaterOrEqual,
            _ => return None,
        };
        Some(condition)
    }

    pub fn inverse(self) -> Condition {
        match self {
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::Less => Condition::GreaterOrEqual,
            Condition::GreaterOrEqual => Condition::Less,
            Condition::Greater => Condition::LessOrEqual,
            Condition::LessOrEqual => Condition::Greater,
        }
    }

    /// Evaluate the condition for an ordered pair.
    pub fn holds<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            Condition::Equal => left == right,
            Condition::NotEqual => left != right,
            Condition::Less => left < right,
            Condition::LessOrEqual => left <= right,
            Condition::Greater => left > right,
            Condition::GreaterOrEqual => left >= right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Register, memory or immediate transfer; the emitter picks load/store forms.
    Move,
    LoadAddress,
    Add,
    Subtract,
    Multiply,
    ShiftLeft,
    Compare,
    Jump,
    ConditionalJump { condition: Condition, signed: bool },
    Label,
    Call,
    Return,
    Push,
    Pop,
    Exchange,
    ConvertToDecimal,
    /// Pre-decrementing store of one or two registers (AArch64 `stp`).
    SavePair,
    /// Post-incrementing load of one or two registers (AArch64 `ldp`).
    RestorePair,
}

/// Symbolic frame slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Variable(VariableId),
    Temporary(u32),
    Inline(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Base {
    Register(AsmReg),
    Slot(SlotKey),
    /// PC-relative reference to a constant data entry.
    ConstantData(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryOperand {
    /// Absent for the scaled-index-only form `[index * scale + displacement]`.
    pub base: Option<Base>,
    pub index: Option<AsmReg>,
    pub scale: i64,
    pub displacement: i64,
}

impl MemoryOperand {
    pub fn new(base: Base, displacement: i64) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            displacement,
        }
    }

    pub fn indexed(base: Base, index: AsmReg, scale: i64, displacement: i64) -> Self {
        Self {
            base: Some(base),
            index: Some(index),
            scale,
            displacement,
        }
    }

    pub fn scaled(index: AsmReg, scale: i64) -> Self {
        Self {
            base: None,
            index: Some(index),
            scale,
            displacement: 0,
        }
    }

    pub fn registers(&self) -> Vec<AsmReg> {
        let mut registers = Vec::new();
        if let Some(Base::Register(base)) = &self.base {
            registers.push(*base);
        }
        registers.extend(self.index);
        registers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(AsmReg),
    Immediate(i64),
    Memory(MemoryOperand),
    Label(String),
    Modifier(String),
}

impl Operand {
    pub fn register(&self) -> Option<AsmReg> {
        match self {
            Operand::Register(register) => Some(*register),
            _ => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    /// Registers read or written through this operand, memory bases included.
    pub fn registers(&self) -> Vec<AsmReg> {
        match self {
            Operand::Register(register) => vec![*register],
            Operand::Memory(memory) => memory.registers(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineOp {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub size: Size,
}

impl MachineOp {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, size: Size) -> Self {
        Self {
            opcode,
            operands,
            size,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(Opcode::Label, vec![Operand::Label(name.into())], Size::Qword)
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    /// Label referenced by a jump, call or label definition.
    pub fn target(&self) -> Option<&str> {
        self.operands.iter().find_map(|operand| match operand {
            Operand::Label(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn registers(&self) -> Vec<AsmReg> {
        self.operands.iter().flat_map(Operand::registers).collect()
    }
}
