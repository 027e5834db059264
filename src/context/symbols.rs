//! Symbols stored in the context tree.

use super::{ContextId, TypeId, VariableId};
use crate::core::config::Format;

/// What a type is at the machine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Integer or decimal of the given format.
    Number(Format),
    Bool,
    /// Raw address.
    Link,
    /// Declared by the program.
    User,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub name: String,
    pub kind: TypeKind,
    /// Context owning the members of the type.
    pub context: ContextId,
    /// Declared supertypes in declaration order.
    pub supertypes: Vec<TypeId>,
}

impl Type {
    pub fn is_primitive(&self) -> bool {
        !matches!(self.kind, TypeKind::User)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.kind, TypeKind::Number(_))
    }

    /// Machine format of values of this type.
    pub fn format(&self) -> Format {
        match self.kind {
            TypeKind::Number(format) => format,
            TypeKind::Bool => Format::U8,
            TypeKind::Link | TypeKind::User => Format::U64,
        }
    }

    /// One-character mangle code of a primitive type.
    pub fn primitive_code(&self) -> Option<char> {
        let code = match self.kind {
            TypeKind::Number(Format::I8) => 'a',
            TypeKind::Number(Format::U8) => 'h',
            TypeKind::Number(Format::I16) => 's',
            TypeKind::Number(Format::U16) => 't',
            TypeKind::Number(Format::I32) => 'i',
            TypeKind::Number(Format::U32) => 'j',
            TypeKind::Number(Format::I64) => 'x',
            TypeKind::Number(Format::U64) => 'y',
            TypeKind::Number(Format::Decimal) => 'd',
            TypeKind::Bool => 'b',
            TypeKind::Link => 'l',
            TypeKind::User => return None,
        };
        Some(code)
    }
}

/// Role of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableCategory {
    Local,
    Parameter,
    /// Member of a type; carries its byte offset.
    Member { offset: i64 },
    Global,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_id: Option<TypeId>,
    /// Declared type used by `update` while `type_id` is missing.
    pub type_hint: Option<TypeId>,
    pub category: VariableCategory,
    pub context: ContextId,
}

impl Variable {
    pub fn is_unresolved(&self) -> bool {
        self.type_id.is_none()
    }

    pub fn is_member(&self) -> bool {
        matches!(self.category, VariableCategory::Member { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Context holding the parameters and the body's top-level declarations.
    pub context: ContextId,
    /// Context the function was declared in.
    pub parent: ContextId,
    pub parameters: Vec<VariableId>,
    pub return_type: Option<TypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
}

/// Ids of the built-in types declared in the root context.
#[derive(Debug, Clone, Copy)]
pub struct Primitives {
    pub i8: TypeId,
    pub u8: TypeId,
    pub i16: TypeId,
    pub u16: TypeId,
    pub i32: TypeId,
    pub u32: TypeId,
    pub i64: TypeId,
    pub u64: TypeId,
    pub decimal: TypeId,
    pub bool: TypeId,
    pub link: TypeId,
}

impl Primitives {
    /// Built-in type of a number format.
    pub fn number(&self, format: Format) -> TypeId {
        match format {
            Format::I8 => self.i8,
            Format::U8 => self.u8,
            Format::I16 => self.i16,
            Format::U16 => self.u16,
            Format::I32 => self.i32,
            Format::U32 => self.u32,
            Format::I64 => self.i64,
            Format::U64 => self.u64,
            Format::Decimal => self.decimal,
        }
    }
}
