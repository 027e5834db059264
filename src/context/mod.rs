// This module provides the hierarchical symbol table the lowering phases query. Contexts live
// in an arena (ContextTree) addressed by ContextId, and every context keeps its variables,
// function overload lists, types and labels in hashbrown maps keyed by name. Declarations fail
// only on a local duplicate of the same kind, so a child may shadow a parent binding. Lookups
// walk the parent chain and the nearest binding wins. Link, merge and destroy keep the parent
// field and the subcontext lists consistent. Symbols (Type, Function, Variable, Label) live in
// their own arenas so syntax tree nodes can refer to them by id. Mangled names are memoized
// per context and computed parent first, since a child extends the parent's encoding.

//! Hierarchical symbol table with name mangling.

pub mod mangle;
mod symbols;

pub use mangle::{Mangle, MangleDefinition};
pub use symbols::{Function, Label, Primitives, Type, TypeKind, Variable, VariableCategory};

use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// The root context.
pub const GLOBAL: ContextId = ContextId(0);

/// Size of every member slot inside a user type.
const MEMBER_SIZE: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Global,
    Type(TypeId),
    Function(FunctionId),
    Scope,
}

#[derive(Debug, Clone)]
pub struct Context {
    pub kind: ContextKind,
    pub identity: String,
    parent: Option<ContextId>,
    subcontexts: Vec<ContextId>,
    variables: HashMap<String, VariableId>,
    functions: HashMap<String, Vec<FunctionId>>,
    types: HashMap<String, TypeId>,
    labels: HashMap<String, LabelId>,
    children_created: u32,
    mangled: OnceLock<Mangle>,
}

impl Context {
    fn new(kind: ContextKind, identity: String, parent: Option<ContextId>) -> Self {
        Self {
            kind,
            identity,
            parent,
            subcontexts: Vec::new(),
            variables: HashMap::new(),
            functions: HashMap::new(),
            types: HashMap::new(),
            labels: HashMap::new(),
            children_created: 0,
            mangled: OnceLock::new(),
        }
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    pub fn subcontexts(&self) -> &[ContextId] {
        &self.subcontexts
    }

    /// Local variables ordered by declaration.
    pub fn variables(&self) -> Vec<VariableId> {
        let mut variables: Vec<VariableId> = self.variables.values().copied().collect();
        variables.sort();
        variables
    }

    pub fn types(&self) -> Vec<TypeId> {
        let mut types: Vec<TypeId> = self.types.values().copied().collect();
        types.sort();
        types
    }

    pub fn is_local_variable_declared(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn is_local_type_declared(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn is_local_function_declared(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn is_local_label_declared(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }
}

/// Arena of contexts and the symbols declared in them.
#[derive(Debug, Clone)]
pub struct ContextTree {
    contexts: Vec<Context>,
    types: Vec<Type>,
    functions: Vec<Function>,
    variables: Vec<Variable>,
    labels: Vec<Label>,
    primitives: Primitives,
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTree {
    /// Root context with the built-in types declared.
    pub fn new() -> Self {
        let placeholder = TypeId(0);
        let mut tree = Self {
            contexts: vec![Context::new(ContextKind::Global, "0".to_string(), None)],
            types: Vec::new(),
            functions: Vec::new(),
            variables: Vec::new(),
            labels: Vec::new(),
            primitives: Primitives {
                i8: placeholder,
                u8: placeholder,
                i16: placeholder,
                u16: placeholder,
                i32: placeholder,
                u32: placeholder,
                i64: placeholder,
                u64: placeholder,
                decimal: placeholder,
                bool: placeholder,
                link: placeholder,
            },
        };

        let number = |tree: &mut ContextTree, name: &str, format: Format| {
            tree.declare_primitive(name, TypeKind::Number(format))
        };
        let primitives = Primitives {
            i8: number(&mut tree, "i8", Format::I8),
            u8: number(&mut tree, "u8", Format::U8),
            i16: number(&mut tree, "i16", Format::I16),
            u16: number(&mut tree, "u16", Format::U16),
            i32: number(&mut tree, "i32", Format::I32),
            u32: number(&mut tree, "u32", Format::U32),
            i64: number(&mut tree, "i64", Format::I64),
            u64: number(&mut tree, "u64", Format::U64),
            decimal: number(&mut tree, "decimal", Format::Decimal),
            bool: tree.declare_primitive("bool", TypeKind::Bool),
            link: tree.declare_primitive("link", TypeKind::Link),
        };
        tree.primitives = primitives;
        tree
    }

    fn declare_primitive(&mut self, name: &str, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type {
            name: name.to_string(),
            kind,
            context: GLOBAL,
            supertypes: Vec::new(),
        });
        self.contexts[0].types.insert(name.to_string(), id);
        id
    }

    pub fn primitives(&self) -> &Primitives {
        &self.primitives
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id.0 as usize]
    }

    fn context_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id.0 as usize]
    }

    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn ty_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.0 as usize]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id.0 as usize]
    }

    pub fn label(&self, id: LabelId) -> &Label {
        &self.labels[id.0 as usize]
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Create a context under `parent`.
    pub fn create_context(&mut self, kind: ContextKind, parent: ContextId) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        let identity = {
            let parent_context = self.context_mut(parent);
            let index = parent_context.children_created;
            parent_context.children_created += 1;
            format!("{}.{}", parent_context.identity, index)
        };

        self.contexts.push(Context::new(kind, identity, None));
        self.link(id, parent);
        id
    }

    pub fn create_scope(&mut self, parent: ContextId) -> ContextId {
        self.create_context(ContextKind::Scope, parent)
    }

    /// Declare a user type with its own member context.
    pub fn declare_type(&mut self, context: ContextId, name: &str) -> CompileResult<TypeId> {
        if self.context(context).is_local_type_declared(name) {
            return Err(CompileError::Declaration {
                kind: "Type",
                name: name.to_string(),
            });
        }

        let id = TypeId(self.types.len() as u32);
        let members = self.create_context(ContextKind::Type(id), context);
        self.types.push(Type {
            name: name.to_string(),
            kind: TypeKind::User,
            context: members,
            supertypes: Vec::new(),
        });
        self.context_mut(context).types.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_supertype(&mut self, type_id: TypeId, supertype: TypeId) {
        let ty = self.ty_mut(type_id);
        if !ty.supertypes.contains(&supertype) {
            ty.supertypes.push(supertype);
        }
    }

    /// All supertypes, nearest first, in declaration order.
    pub fn all_supertypes(&self, type_id: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut pending: Vec<TypeId> = self.ty(type_id).supertypes.clone();
        let mut index = 0;
        while index < pending.len() {
            let supertype = pending[index];
            index += 1;
            if result.contains(&supertype) {
                continue;
            }
            result.push(supertype);
            pending.extend(self.ty(supertype).supertypes.iter().copied());
        }
        result
    }

    pub fn is_type_inheriting(&self, type_id: TypeId, supertype: TypeId) -> bool {
        self.all_supertypes(type_id).contains(&supertype)
    }

    /// Enclosing user types of `type_id`, outermost first, ending with the type itself.
    pub fn type_chain(&self, type_id: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut iterator = Some(self.ty(type_id).context);
        while let Some(context) = iterator {
            if let ContextKind::Type(owner) = self.context(context).kind {
                chain.push(owner);
            }
            iterator = self.context(context).parent;
        }
        chain.reverse();
        if chain.is_empty() {
            chain.push(type_id);
        }
        chain
    }

    pub fn declare_variable(
        &mut self,
        context: ContextId,
        name: &str,
        type_id: Option<TypeId>,
        category: VariableCategory,
    ) -> CompileResult<VariableId> {
        if self.context(context).is_local_variable_declared(name) {
            return Err(CompileError::Declaration {
                kind: "Variable",
                name: name.to_string(),
            });
        }

        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Variable {
            name: name.to_string(),
            type_id,
            type_hint: None,
            category,
            context,
        });
        self.context_mut(context).variables.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn declare_local(
        &mut self,
        context: ContextId,
        name: &str,
        type_id: Option<TypeId>,
    ) -> CompileResult<VariableId> {
        self.declare_variable(context, name, type_id, VariableCategory::Local)
    }

    /// Member variables are laid out in declaration order.
    pub fn declare_member(
        &mut self,
        type_id: TypeId,
        name: &str,
        member_type: Option<TypeId>,
    ) -> CompileResult<VariableId> {
        let context = self.ty(type_id).context;
        let offset = self.context(context).variables.len() as i64 * MEMBER_SIZE;
        self.declare_variable(context, name, member_type, VariableCategory::Member { offset })
    }

    /// Declare a function; a new parameter list on an existing name adds an overload.
    pub fn declare_function(
        &mut self,
        context: ContextId,
        name: &str,
        parameters: &[(&str, Option<TypeId>)],
        return_type: Option<TypeId>,
    ) -> CompileResult<FunctionId> {
        let parameter_types: Vec<Option<TypeId>> = parameters.iter().map(|(_, t)| *t).collect();

        if let Some(overloads) = self.context(context).functions.get(name) {
            let duplicate = overloads.iter().any(|&overload| {
                let existing: Vec<Option<TypeId>> = self
                    .function(overload)
                    .parameters
                    .iter()
                    .map(|&p| self.variable(p).type_id)
                    .collect();
                existing == parameter_types
            });

            if duplicate {
                return Err(CompileError::Declaration {
                    kind: "Function",
                    name: name.to_string(),
                });
            }
        }

        let id = FunctionId(self.functions.len() as u32);
        let function_context = self.create_context(ContextKind::Function(id), context);

        let mut parameter_ids = Vec::with_capacity(parameters.len());
        for (parameter, type_id) in parameters {
            parameter_ids.push(self.declare_variable(
                function_context,
                parameter,
                *type_id,
                VariableCategory::Parameter,
            )?);
        }

        self.functions.push(Function {
            name: name.to_string(),
            context: function_context,
            parent: context,
            parameters: parameter_ids,
            return_type,
        });
        self.context_mut(context)
            .functions
            .entry(name.to_string())
            .or_default()
            .push(id);
        Ok(id)
    }

    pub fn declare_label(&mut self, context: ContextId, name: &str) -> CompileResult<LabelId> {
        if self.context(context).is_local_label_declared(name) {
            return Err(CompileError::Declaration {
                kind: "Label",
                name: name.to_string(),
            });
        }

        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label {
            name: name.to_string(),
        });
        self.context_mut(context).labels.insert(name.to_string(), id);
        Ok(id)
    }

    fn lookup<T, F>(&self, context: ContextId, find: F) -> Option<T>
    where
        F: Fn(&Context) -> Option<T>,
    {
        let mut iterator = Some(context);
        while let Some(id) = iterator {
            let context = self.context(id);
            if let Some(found) = find(context) {
                return Some(found);
            }
            iterator = context.parent;
        }
        None
    }

    pub fn get_type(&self, context: ContextId, name: &str) -> Option<TypeId> {
        self.lookup(context, |c| c.types.get(name).copied())
    }

    /// Overloads of the nearest function list named `name`.
    pub fn get_function(&self, context: ContextId, name: &str) -> Option<&[FunctionId]> {
        let mut iterator = Some(context);
        while let Some(id) = iterator {
            let context = self.context(id);
            if let Some(overloads) = context.functions.get(name) {
                return Some(overloads.as_slice());
            }
            iterator = context.parent;
        }
        None
    }

    pub fn get_variable(&self, context: ContextId, name: &str) -> Option<VariableId> {
        self.lookup(context, |c| c.variables.get(name).copied())
    }

    pub fn get_label(&self, context: ContextId, name: &str) -> Option<LabelId> {
        self.lookup(context, |c| c.labels.get(name).copied())
    }

    /// True when `context` is `ancestor` or lies below it.
    pub fn is_inside(&self, context: ContextId, ancestor: ContextId) -> bool {
        let mut iterator = Some(context);
        while let Some(id) = iterator {
            if id == ancestor {
                return true;
            }
            iterator = self.context(id).parent;
        }
        false
    }

    fn invalidate_mangles(&mut self, context: ContextId) {
        let mut pending = vec![context];
        while let Some(id) = pending.pop() {
            let context = self.context_mut(id);
            context.mangled = OnceLock::new();
            pending.extend(context.subcontexts.iter().copied());
        }
    }

    /// Make `parent` the parent of `child`.
    pub fn link(&mut self, child: ContextId, parent: ContextId) {
        if let Some(previous) = self.context(child).parent {
            self.context_mut(previous).subcontexts.retain(|&c| c != child);
        }

        self.context_mut(child).parent = Some(parent);
        let subcontexts = &mut self.context_mut(parent).subcontexts;
        if !subcontexts.contains(&child) {
            subcontexts.push(child);
        }

        self.invalidate_mangles(child);
        self.update(child);
    }

    /// Move every binding of `other` into `this`; existing local bindings win.
    pub fn merge(&mut self, this: ContextId, other: ContextId) {
        let source = self.context(other).clone();

        for (name, type_id) in source.types {
            self.context_mut(this).types.entry(name).or_insert(type_id);
            let members = self.ty(type_id).context;
            if members != GLOBAL && self.context(members).parent == Some(other) {
                self.context_mut(members).parent = Some(this);
            }
        }

        for (name, overloads) in source.functions {
            for &function in &overloads {
                self.functions[function.0 as usize].parent = this;
            }
            self.context_mut(this).functions.entry(name).or_insert(overloads);
        }

        for (name, variable) in source.variables {
            self.context_mut(this).variables.entry(name).or_insert(variable);
            self.variable_mut(variable).context = this;
        }

        for (name, label) in source.labels {
            self.context_mut(this).labels.entry(name).or_insert(label);
        }

        for subcontext in source.subcontexts {
            self.context_mut(subcontext).parent = Some(this);
            let subcontexts = &mut self.context_mut(this).subcontexts;
            if !subcontexts.contains(&subcontext) {
                subcontexts.push(subcontext);
            }
        }
        self.context_mut(other).subcontexts.clear();

        self.invalidate_mangles(this);
        self.update(this);
        self.destroy(other);
    }

    /// Adopt declared type hints for variables whose type is still missing.
    pub fn update(&mut self, context: ContextId) {
        let mut pending = vec![context];
        while let Some(id) = pending.pop() {
            let variables: Vec<VariableId> = self.context(id).variables.values().copied().collect();
            for variable in variables {
                let variable = self.variable_mut(variable);
                if variable.type_id.is_none() && variable.type_hint.is_some() {
                    variable.type_id = variable.type_hint;
                }
            }
            pending.extend(self.context(id).subcontexts.iter().copied());
        }
    }

    /// Detach a context from its parent.
    pub fn destroy(&mut self, context: ContextId) {
        if let Some(parent) = self.context(context).parent {
            self.context_mut(parent).subcontexts.retain(|&c| c != context);
        }
        self.context_mut(context).parent = None;
        self.invalidate_mangles(context);
    }

    /// Mangle of a context, computed parent first and memoized.
    pub fn mangle(&self, context: ContextId) -> &Mangle {
        self.context(context).mangled.get_or_init(|| {
            let mut mangle = match self.context(context).parent {
                Some(parent) => self.mangle(parent).clone(),
                None => Mangle::new(),
            };
            self.append_mangle(context, &mut mangle);
            mangle
        })
    }

    fn append_mangle(&self, context: ContextId, mangle: &mut Mangle) {
        match self.context(context).kind {
            ContextKind::Global | ContextKind::Scope => {}
            ContextKind::Type(type_id) => {
                mangle.push('N');
                mangle.push_name(&self.ty(type_id).name);
                mangle.push('E');
            }
            ContextKind::Function(function_id) => {
                let function = self.function(function_id);
                mangle.push_name(&function.name);

                let parameter_types: Vec<TypeId> = function
                    .parameters
                    .iter()
                    .filter_map(|&p| self.variable(p).type_id)
                    .collect();
                mangle.add_parameters(self, &parameter_types);

                if let Some(return_type) = function.return_type {
                    mangle.add_return_type(self, return_type);
                }
            }
        }
    }

    pub fn get_fullname(&self, context: ContextId) -> String {
        self.mangle(context).value().to_string()
    }

    /// Symbol name of a function.
    pub fn function_fullname(&self, function: FunctionId) -> String {
        self.get_fullname(self.function(function).context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_variable_is_rejected() {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        contexts.declare_local(GLOBAL, "x", Some(i64)).unwrap();

        let error = contexts.declare_local(GLOBAL, "x", Some(i64)).unwrap_err();
        assert!(matches!(error, CompileError::Declaration { kind: "Variable", .. }));
    }

    #[test]
    fn test_shadowing_prefers_child_binding() {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let outer = contexts.declare_local(GLOBAL, "x", Some(i64)).unwrap();

        let child = contexts.create_scope(GLOBAL);
        let inner = contexts.declare_local(child, "x", Some(i64)).unwrap();

        assert_eq!(contexts.get_variable(child, "x"), Some(inner));
        assert_eq!(contexts.get_variable(GLOBAL, "x"), Some(outer));
        assert_eq!(contexts.get_variable(child, "y"), None);
    }

    #[test]
    fn test_overloads_and_duplicate_signatures() {
        let mut contexts = ContextTree::new();
        let p = *contexts.primitives();

        contexts.declare_function(GLOBAL, "f", &[("a", Some(p.i64))], None).unwrap();
        contexts.declare_function(GLOBAL, "f", &[("a", Some(p.decimal))], None).unwrap();
        assert_eq!(contexts.get_function(GLOBAL, "f").map(|o| o.len()), Some(2));

        let error = contexts
            .declare_function(GLOBAL, "f", &[("b", Some(p.i64))], None)
            .unwrap_err();
        assert!(matches!(error, CompileError::Declaration { kind: "Function", .. }));
    }

    #[test]
    fn test_merge_moves_bindings_and_reparents() {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let a = contexts.create_scope(GLOBAL);
        let b = contexts.create_scope(GLOBAL);
        let nested = contexts.create_scope(b);

        let kept = contexts.declare_local(a, "x", Some(i64)).unwrap();
        contexts.declare_local(b, "x", Some(i64)).unwrap();
        let moved = contexts.declare_local(b, "y", Some(i64)).unwrap();

        contexts.merge(a, b);

        assert_eq!(contexts.get_variable(a, "x"), Some(kept));
        assert_eq!(contexts.get_variable(a, "y"), Some(moved));
        assert_eq!(contexts.variable(moved).context, a);
        assert_eq!(contexts.context(nested).parent(), Some(a));
        assert!(contexts.context(a).subcontexts().contains(&nested));
        assert_eq!(contexts.context(b).parent(), None);
        assert!(!contexts.context(GLOBAL).subcontexts().contains(&b));
    }

    #[test]
    fn test_update_adopts_type_hint() {
        let mut contexts = ContextTree::new();
        let u8 = contexts.primitives().u8;
        let scope = contexts.create_scope(GLOBAL);
        let variable = contexts.declare_local(scope, "v", None).unwrap();
        contexts.variable_mut(variable).type_hint = Some(u8);

        contexts.update(GLOBAL);
        assert_eq!(contexts.variable(variable).type_id, Some(u8));
    }

    #[test]
    fn test_function_fullname() {
        let mut contexts = ContextTree::new();
        let p = *contexts.primitives();
        let vector = contexts.declare_type(GLOBAL, "Vec").unwrap();

        let add = contexts
            .declare_function(GLOBAL, "add", &[("a", Some(p.i64)), ("b", Some(p.i64))], Some(p.i64))
            .unwrap();
        let main = contexts.declare_function(GLOBAL, "main", &[], None).unwrap();
        let members = contexts.ty(vector).context;
        let length = contexts
            .declare_function(members, "length", &[("other", Some(vector))], Some(p.decimal))
            .unwrap();

        assert_eq!(contexts.function_fullname(add), "_V3addxx_rx");
        assert_eq!(contexts.function_fullname(main), "_V4mainv");
        assert_eq!(contexts.function_fullname(length), "_VN3VecE6lengthPN3VecE_rd");
        assert_eq!(contexts.function_fullname(length), contexts.function_fullname(length));
    }

    #[test]
    fn test_member_offsets() {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let point = contexts.declare_type(GLOBAL, "Point").unwrap();
        let x = contexts.declare_member(point, "x", Some(i64)).unwrap();
        let y = contexts.declare_member(point, "y", Some(i64)).unwrap();

        assert_eq!(contexts.variable(x).category, VariableCategory::Member { offset: 0 });
        assert_eq!(contexts.variable(y).category, VariableCategory::Member { offset: 8 });
    }
}
