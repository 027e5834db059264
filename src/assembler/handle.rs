//! Value locations.
//!
//! A [`Handle`] says where a value lives at one point of the build phase. Handles
//! are plain values: a result moves by receiving a new handle, never by mutating
//! the one it has.

use crate::assembler::result::ResultId;
use crate::ast::Number;
use crate::context::VariableId;
use crate::core::config::Size;
use crate::core::register_file::AsmReg;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Handle {
    None,
    Constant(Number),
    Register(AsmReg),
    /// `[start + offset]`.
    Memory { start: ResultId, offset: i64 },
    /// `[start + offset * stride]`.
    ComplexMemory {
        start: ResultId,
        offset: ResultId,
        stride: i64,
    },
    /// `multiplicand * multiplier + addition + constant`, the shape `lea` computes.
    Expression {
        multiplicand: ResultId,
        multiplier: i64,
        addition: Option<ResultId>,
        constant: i64,
    },
    /// Operand decoration such as `lsl #3`.
    Modifier(String),
    /// Address of a stack allocation.
    Inline { identity: String, bytes: u32 },
    /// Frame slot of a variable.
    StackVariable(VariableId),
    /// Spill slot.
    TemporaryMemory { identity: u32, size: Size },
    ConstantData { value: Number, identifier: String },
}

impl Handle {
    /// Results this handle refers to.
    pub fn inner_results(&self) -> Vec<ResultId> {
        match self {
            Handle::Memory { start, .. } => vec![*start],
            Handle::ComplexMemory { start, offset, .. } => vec![*start, *offset],
            Handle::Expression {
                multiplicand,
                addition,
                ..
            } => {
                let mut results = vec![*multiplicand];
                results.extend(addition.iter().copied());
                results
            }
            _ => Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Handle::None)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Handle::Constant(_))
    }

    pub fn register(&self) -> Option<AsmReg> {
        match self {
            Handle::Register(register) => Some(*register),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<Number> {
        match self {
            Handle::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Stack slot owned by exactly one value.
    pub fn is_slot(&self) -> bool {
        matches!(self, Handle::StackVariable(_) | Handle::TemporaryMemory { .. })
    }

    /// Location whose content can change while the handle stays the same.
    pub fn is_indirect(&self) -> bool {
        matches!(self, Handle::Memory { .. } | Handle::ComplexMemory { .. })
    }

    /// A handle that can receive a value.
    pub fn is_location(&self) -> bool {
        matches!(self, Handle::Register(_)) || self.is_slot() || self.is_indirect()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::None => f.write_str("none"),
            Handle::Constant(value) => write!(f, "{value}"),
            Handle::Register(register) => write!(f, "r{}:{}", register.bank, register.id),
            Handle::Memory { start, offset } => write!(f, "[{start} + {offset}]"),
            Handle::ComplexMemory {
                start,
                offset,
                stride,
            } => write!(f, "[{start} + {offset} * {stride}]"),
            Handle::Expression {
                multiplicand,
                multiplier,
                addition,
                constant,
            } => {
                write!(f, "{multiplicand} * {multiplier}")?;
                if let Some(addition) = addition {
                    write!(f, " + {addition}")?;
                }
                write!(f, " + {constant}")
            }
            Handle::Modifier(text) => f.write_str(text),
            Handle::Inline { identity, bytes } => write!(f, "inline {identity} ({bytes} bytes)"),
            Handle::StackVariable(variable) => write!(f, "variable {}", variable.0),
            Handle::TemporaryMemory { identity, size } => write!(f, "temporary {identity} ({size})"),
            Handle::ConstantData { identifier, .. } => f.write_str(identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_results() {
        let address = Handle::ComplexMemory {
            start: ResultId(3),
            offset: ResultId(7),
            stride: 8,
        };
        assert_eq!(address.inner_results(), vec![ResultId(3), ResultId(7)]);
        assert!(address.is_indirect());

        let expression = Handle::Expression {
            multiplicand: ResultId(1),
            multiplier: 4,
            addition: None,
            constant: 0,
        };
        assert_eq!(expression.inner_results(), vec![ResultId(1)]);
        assert!(Handle::Constant(Number::Integer(4)).inner_results().is_empty());
    }

    #[test]
    fn test_location_classes() {
        assert!(Handle::StackVariable(VariableId(0)).is_slot());
        assert!(Handle::Register(AsmReg::gp(0)).is_location());
        assert!(!Handle::Inline {
            identity: "buffer".to_string(),
            bytes: 16
        }
        .is_location());
        assert!(!Handle::Constant(Number::Integer(1)).is_location());
    }
}
