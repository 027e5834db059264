//! Expression typing and type unification.
//!
//! `None` stands for the unknown type throughout.

use crate::ast::{NodeId, NodeKind, OperatorType, SyntaxTree};
use crate::context::{ContextTree, TypeId, TypeKind};
use crate::core::config::Format;

/// Rank of a numeric format in the widening order.
fn rank(format: Format) -> u32 {
    if format.is_decimal() {
        return u32::MAX;
    }
    // Doubling keeps every width apart; the signed format outranks the unsigned one
    format.bits() * 2 + u32::from(format.is_signed())
}

/// The type both `a` and `b` can be used as.
pub fn get_shared_type(
    contexts: &ContextTree,
    a: Option<TypeId>,
    b: Option<TypeId>,
) -> Option<TypeId> {
    let (a, b) = (a?, b?);
    if a == b {
        return Some(a);
    }

    let (x, y) = (contexts.ty(a), contexts.ty(b));
    match (x.kind, y.kind) {
        (TypeKind::Number(x), TypeKind::Number(y)) => {
            let primitives = contexts.primitives();
            if x.is_decimal() || y.is_decimal() {
                return Some(primitives.decimal);
            }
            Some(if rank(x) > rank(y) { a } else { b })
        }
        _ => {
            let supertypes = contexts.all_supertypes(b);
            x.supertypes.iter().copied().find(|t| supertypes.contains(t))
        }
    }
}

/// Fold [`get_shared_type`] over a list; an empty list is unknown.
pub fn get_shared_types(contexts: &ContextTree, types: &[Option<TypeId>]) -> Option<TypeId> {
    let (first, rest) = types.split_first()?;
    rest.iter()
        .try_fold(*first, |current, &next| current.map(|c| get_shared_type(contexts, Some(c), next)))
        .flatten()
}

/// Static type of an expression node.
pub fn get_type(tree: &SyntaxTree, contexts: &ContextTree, node: NodeId) -> Option<TypeId> {
    let primitives = contexts.primitives();
    match tree.kind(node) {
        NodeKind::Number { format, .. } => Some(primitives.number(*format)),
        NodeKind::Variable(variable) => contexts.variable(*variable).type_id,
        NodeKind::Operator(operator) => match operator.kind() {
            OperatorType::Classic => {
                let left = tree.first(node).and_then(|n| get_type(tree, contexts, n));
                let right = tree.last(node).and_then(|n| get_type(tree, contexts, n));
                get_shared_type(contexts, left, right)
            }
            OperatorType::Comparison | OperatorType::Logic => Some(primitives.bool),
            OperatorType::Assign => tree.first(node).and_then(|n| get_type(tree, contexts, n)),
        },
        NodeKind::Parenthesis | NodeKind::Link => {
            tree.last(node).and_then(|n| get_type(tree, contexts, n))
        }
        NodeKind::Offset => Some(primitives.i64),
        NodeKind::Call(function) => contexts.function(*function).return_type,
        NodeKind::StackAddress { type_id, .. } => Some(*type_id),
        NodeKind::TypeReference(type_id) => Some(*type_id),
        NodeKind::Compiles => Some(primitives.bool),
        _ => None,
    }
}

/// Machine format of an expression; unknown types fall back to the native format.
pub fn get_format(tree: &SyntaxTree, contexts: &ContextTree, node: NodeId) -> Format {
    match tree.kind(node) {
        NodeKind::Number { format, .. } => *format,
        _ => get_type(tree, contexts, node)
            .map(|t| contexts.ty(t).format())
            .unwrap_or(Format::I64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GLOBAL;
    use proptest::prelude::*;

    fn numeric(contexts: &ContextTree) -> Vec<TypeId> {
        let p = contexts.primitives();
        vec![p.i8, p.u8, p.i16, p.u16, p.i32, p.u32, p.i64, p.u64, p.decimal]
    }

    #[test]
    fn test_numbers_widen() {
        let contexts = ContextTree::new();
        let p = *contexts.primitives();
        assert_eq!(get_shared_type(&contexts, Some(p.i8), Some(p.i32)), Some(p.i32));
        assert_eq!(get_shared_type(&contexts, Some(p.u64), Some(p.i16)), Some(p.u64));
        assert_eq!(get_shared_type(&contexts, Some(p.i64), Some(p.u64)), Some(p.i64));
        assert_eq!(get_shared_type(&contexts, Some(p.u8), Some(p.decimal)), Some(p.decimal));
        assert_eq!(get_shared_type(&contexts, Some(p.bool), None), None);
    }

    #[test]
    fn test_user_types_share_first_common_supertype() {
        let mut contexts = ContextTree::new();
        let shape = contexts.declare_type(GLOBAL, "Shape").unwrap();
        let printable = contexts.declare_type(GLOBAL, "Printable").unwrap();
        let circle = contexts.declare_type(GLOBAL, "Circle").unwrap();
        let square = contexts.declare_type(GLOBAL, "Square").unwrap();
        let text = contexts.declare_type(GLOBAL, "Text").unwrap();

        contexts.add_supertype(circle, printable);
        contexts.add_supertype(circle, shape);
        contexts.add_supertype(square, shape);
        contexts.add_supertype(square, printable);

        assert_eq!(get_shared_type(&contexts, Some(circle), Some(square)), Some(printable));
        assert_eq!(get_shared_type(&contexts, Some(square), Some(circle)), Some(shape));
        assert_eq!(get_shared_type(&contexts, Some(circle), Some(text)), None);
    }

    #[test]
    fn test_shared_type_of_list() {
        let contexts = ContextTree::new();
        let p = *contexts.primitives();
        assert_eq!(get_shared_types(&contexts, &[]), None);
        assert_eq!(
            get_shared_types(&contexts, &[Some(p.i8), Some(p.u32), Some(p.i16)]),
            Some(p.u32)
        );
        assert_eq!(get_shared_types(&contexts, &[Some(p.i8), None, Some(p.i16)]), None);
    }

    proptest! {
        #[test]
        fn shared_type_is_commutative(a in 0usize..9, b in 0usize..9) {
            let contexts = ContextTree::new();
            let types = numeric(&contexts);
            let (a, b) = (Some(types[a]), Some(types[b]));
            prop_assert_eq!(get_shared_type(&contexts, a, b), get_shared_type(&contexts, b, a));
        }

        #[test]
        fn shared_type_is_associative(a in 0usize..9, b in 0usize..9, c in 0usize..9) {
            let contexts = ContextTree::new();
            let types = numeric(&contexts);
            let (a, b, c) = (Some(types[a]), Some(types[b]), Some(types[c]));
            let left = get_shared_type(&contexts, get_shared_type(&contexts, a, b), c);
            let right = get_shared_type(&contexts, a, get_shared_type(&contexts, b, c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn unknown_absorbs(a in 0usize..9) {
            let contexts = ContextTree::new();
            let a = Some(numeric(&contexts)[a]);
            prop_assert_eq!(get_shared_type(&contexts, a, None), None);
            prop_assert_eq!(get_shared_type(&contexts, None, a), None);
        }

        #[test]
        fn result_is_the_widest(a in 0usize..9, b in 0usize..9) {
            let contexts = ContextTree::new();
            let types = numeric(&contexts);
            let shared = get_shared_type(&contexts, Some(types[a]), Some(types[b])).unwrap();
            let bits = |t: TypeId| contexts.ty(t).format().bits();
            prop_assert!(bits(shared) >= bits(types[a]).max(bits(types[b])));
        }
    }
}
