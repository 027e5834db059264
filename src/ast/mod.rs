// This module defines the syntax tree consumed by the backend. The tree is an arena of nodes
// addressed by NodeId; parent, first/last child and next/previous sibling relationships are
// index fields, so tree surgery performed by the evaluator and the condition lowering
// (replace, replace-with-children, remove) is index rebinding rather than pointer surgery.
// NodeKind is a closed set of node variants covering literals, variable and member access,
// binary operators, calls, if/else-if/else chains, pre-tested and infinite loops, loop
// control, returns, stack allocations, the "compiles" meta-expression and the unresolved
// placeholders the resolver replaces. Control-flow nodes follow fixed child layouts described
// on each variant so builders can locate conditions, bodies and successors.

//! Syntax tree arena and node kinds.

mod construct;
mod tree;

pub use tree::{Position, SyntaxTree};

use crate::context::{ContextId, FunctionId, TypeId, VariableId};
use crate::core::config::Format;
use std::fmt;

/// Index of a node in a [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Literal number value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Decimal(f64),
}

impl Number {
    pub fn is_zero(&self) -> bool {
        match self {
            Number::Integer(value) => *value == 0,
            Number::Decimal(value) => *value == 0.0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Number::Integer(value) => *value,
            Number::Decimal(value) => *value as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Integer(value) => *value as f64,
            Number::Decimal(value) => *value,
        }
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, Number::Decimal(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(value) => write!(f, "{value}"),
            Number::Decimal(value) => write!(f, "{value}"),
        }
    }
}

/// Operator category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    Classic,
    Comparison,
    Logic,
    Assign,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Assign,
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

impl Operator {
    pub fn kind(self) -> OperatorType {
        match self {
            Operator::Add | Operator::Subtract | Operator::Multiply => OperatorType::Classic,
            Operator::Assign => OperatorType::Assign,
            Operator::Equals
            | Operator::NotEquals
            | Operator::Less
            | Operator::LessOrEqual
            | Operator::Greater
            | Operator::GreaterOrEqual => OperatorType::Comparison,
            Operator::And | Operator::Or => OperatorType::Logic,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.kind() == OperatorType::Comparison
    }

    pub fn is_logical(self) -> bool {
        self.kind() == OperatorType::Logic
    }

    /// Comparison with the opposite outcome.
    pub fn inverse(self) -> Option<Operator> {
        let inverse = match self {
            Operator::Equals => Operator::NotEquals,
            Operator::NotEquals => Operator::Equals,
            Operator::Less => Operator::GreaterOrEqual,
            Operator::GreaterOrEqual => Operator::Less,
            Operator::Greater => Operator::LessOrEqual,
            Operator::LessOrEqual => Operator::Greater,
            _ => return None,
        };
        Some(inverse)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Assign => "=",
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::And => "and",
            Operator::Or => "or",
        }
    }
}

/// Loop control keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Stop,
    Continue,
}

/// Node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Statement list owning a context.
    Scope(ContextId),
    Number { value: Number, format: Format },
    Variable(VariableId),
    /// Binary operator: `[left, right]`.
    Operator(Operator),
    Parenthesis,
    /// Member access: `[object, member variable]`.
    Link,
    /// Indexed access: `[object, index]`.
    Offset,
    /// Call with arguments as children.
    Call(FunctionId),
    /// `[condition scope, body scope]`; the context is the body's.
    If(ContextId),
    /// `[condition scope, body scope]`.
    ElseIf(ContextId),
    /// `[body scope]`.
    Else(ContextId),
    /// Forever: `[body]`. Pre-tested: `[initialization, condition scope, action, body]`.
    Loop { context: ContextId, forever: bool },
    LoopControl(LoopControl),
    /// Optional returned value as the only child.
    Return,
    StackAddress { identity: String, bytes: u32, type_id: TypeId },
    /// Identifier resolved to a type name.
    TypeReference(TypeId),
    /// Children are the probed expressions.
    Compiles,
    UnresolvedIdentifier(String),
    /// Arguments as children.
    UnresolvedFunction(String),
}

impl NodeKind {
    pub fn is_resolvable(&self) -> bool {
        matches!(
            self,
            NodeKind::UnresolvedIdentifier(_) | NodeKind::UnresolvedFunction(_)
        )
    }

    pub fn is_if_like(&self) -> bool {
        matches!(self, NodeKind::If(_) | NodeKind::ElseIf(_))
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, NodeKind::If(_) | NodeKind::ElseIf(_) | NodeKind::Else(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, NodeKind::Number { .. })
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match self {
            NodeKind::Operator(operator) => Some(*operator),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            NodeKind::Number { value, .. } => Some(*value),
            _ => None,
        }
    }
}
