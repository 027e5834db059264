// This module implements symbol name mangling. A Mangle is the running encoding of one context
// chain: it starts with the language tag, every context appends its own part (types add a
// nested-name block, functions add the length-prefixed name, parameter list and optional
// return type) and children start from a clone of their parent's Mangle so the substitution
// table carries over. Repeated type references become back-references into the definition
// table instead of repeating the full encoding, and pointer levels of a known type are pushed
// as new definitions so that deeper references can reuse them too.

//! Mangled symbol names.

use super::{ContextTree, TypeId};
use std::fmt;

pub const LANGUAGE_TAG: &str = "_V";

const TYPE_COMMAND: char = 'N';
const END_COMMAND: char = 'E';
const POINTER_COMMAND: char = 'P';
const NO_PARAMETERS_COMMAND: char = 'v';
const RETURN_TYPE_COMMAND: &str = "_r";

/// Entry of the substitution table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangleDefinition {
    pub type_id: TypeId,
    pub index: usize,
    pub pointers: usize,
}

impl fmt::Display for MangleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "S_")
        } else {
            write!(f, "S{:X}_", self.index - 1)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mangle {
    value: String,
    definitions: Vec<MangleDefinition>,
}

impl Default for Mangle {
    fn default() -> Self {
        Self::new()
    }
}

impl Mangle {
    pub fn new() -> Self {
        Self {
            value: LANGUAGE_TAG.to_string(),
            definitions: Vec::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn definitions(&self) -> &[MangleDefinition] {
        &self.definitions
    }

    pub fn push_str(&mut self, text: &str) {
        self.value.push_str(text);
    }

    pub fn push(&mut self, character: char) {
        self.value.push(character);
    }

    /// `{len}{name}`
    pub fn push_name(&mut self, name: &str) {
        self.value.push_str(&name.len().to_string());
        self.value.push_str(name);
    }

    fn push_definitions(&mut self, last: MangleDefinition, delta: usize) {
        for i in 0..delta {
            let index = self.definitions.len();
            self.definitions.push(MangleDefinition {
                type_id: last.type_id,
                index,
                pointers: last.pointers + i + 1,
            });
            self.value.push(POINTER_COMMAND);
        }
        self.value.push_str(&last.to_string());
    }

    /// Append the full encoding of a type without consulting the table.
    fn write_type(&mut self, contexts: &ContextTree, type_id: TypeId) {
        let ty = contexts.ty(type_id);
        if let Some(code) = ty.primitive_code() {
            self.value.push(code);
            return;
        }

        self.value.push(TYPE_COMMAND);
        for outer in contexts.type_chain(type_id) {
            self.push_name(&contexts.ty(outer).name);
        }
        self.value.push(END_COMMAND);
    }

    /// Append a reference to `type_id` behind `pointers` pointer levels.
    pub fn add(&mut self, contexts: &ContextTree, type_id: TypeId, pointers: usize) {
        let primitive = contexts.ty(type_id).is_primitive();

        if pointers == 0 && primitive {
            self.write_type(contexts, type_id);
            return;
        }

        let found = self
            .definitions
            .iter()
            .rposition(|d| d.type_id == type_id && d.pointers <= pointers);

        let Some(i) = found else {
            for _ in 0..pointers {
                self.value.push(POINTER_COMMAND);
            }

            if !primitive {
                let index = self.definitions.len();
                self.definitions.push(MangleDefinition {
                    type_id,
                    index,
                    pointers: 0,
                });
            }

            self.write_type(contexts, type_id);

            for j in 0..pointers {
                let index = self.definitions.len();
                self.definitions.push(MangleDefinition {
                    type_id,
                    index,
                    pointers: j + 1,
                });
            }
            return;
        };

        let definition = self.definitions[i].clone();
        if pointers <= definition.pointers {
            self.value.push_str(&definition.to_string());
            return;
        }

        self.push_definitions(definition.clone(), pointers - definition.pointers);
    }

    /// Parameter list: non-primitive parameters are passed by reference.
    pub fn add_parameters(&mut self, contexts: &ContextTree, types: &[TypeId]) {
        if types.is_empty() {
            self.value.push(NO_PARAMETERS_COMMAND);
            return;
        }

        for &type_id in types {
            let pointers = if contexts.ty(type_id).is_primitive() { 0 } else { 1 };
            self.add(contexts, type_id, pointers);
        }
    }

    pub fn add_return_type(&mut self, contexts: &ContextTree, type_id: TypeId) {
        self.value.push_str(RETURN_TYPE_COMMAND);
        let pointers = if contexts.ty(type_id).is_primitive() { 0 } else { 1 };
        self.add(contexts, type_id, pointers);
    }
}

impl fmt::Display for Mangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextTree, GLOBAL};

    #[test]
    fn test_definition_indices() {
        let contexts = ContextTree::new();
        let type_id = contexts.primitives().i64;
        let names: Vec<String> = [0, 1, 2, 11, 17]
            .iter()
            .map(|&index| {
                MangleDefinition {
                    type_id,
                    index,
                    pointers: 0,
                }
                .to_string()
            })
            .collect();
        assert_eq!(names, vec!["S_", "S0_", "S1_", "SA_", "S10_"]);
    }

    #[test]
    fn test_repeated_user_type_uses_back_reference() {
        let mut contexts = ContextTree::new();
        let vector = contexts.declare_type(GLOBAL, "Vec").unwrap();

        let mut mangle = Mangle::new();
        mangle.push_name("dot");
        mangle.add_parameters(&contexts, &[vector, vector]);
        assert_eq!(mangle.value(), "_V3dotPN3VecES0_");
    }

    #[test]
    fn test_pointer_levels_are_pushed() {
        let mut contexts = ContextTree::new();
        let vector = contexts.declare_type(GLOBAL, "Vec").unwrap();

        let mut mangle = Mangle::new();
        mangle.add(&contexts, vector, 0);
        mangle.add(&contexts, vector, 2);
        // Two new pointer definitions, then a reference to the base entry
        assert_eq!(mangle.value(), "_VN3VecEPPS_");
        assert_eq!(mangle.definitions().len(), 3);

        mangle.add(&contexts, vector, 2);
        assert!(mangle.value().ends_with("S1_"));
    }

    #[test]
    fn test_primitives_are_inline() {
        let contexts = ContextTree::new();
        let p = *contexts.primitives();

        let mut mangle = Mangle::new();
        mangle.add_parameters(&contexts, &[p.i8, p.u8, p.i32, p.u64, p.decimal, p.bool, p.link]);
        assert_eq!(mangle.value(), "_Vahiydbl");
        assert!(mangle.definitions().is_empty());
    }
}
