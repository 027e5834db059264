//! Read/write queries over syntax subtrees used by the builders.

use crate::ast::{NodeId, NodeKind, Operator, SyntaxTree};
use crate::context::{ContextTree, VariableCategory, VariableId};

fn is_frame_variable(contexts: &ContextTree, variable: VariableId) -> bool {
    matches!(
        contexts.variable(variable).category,
        VariableCategory::Local | VariableCategory::Parameter
    )
}

/// Whether `node` names the member side of a link.
fn is_member_name(tree: &SyntaxTree, node: NodeId) -> bool {
    match tree.parent(node) {
        Some(parent) => *tree.kind(parent) == NodeKind::Link && tree.first(parent) != Some(node),
        None => false,
    }
}

fn subtree(tree: &SyntaxTree, node: NodeId) -> Vec<NodeId> {
    let mut nodes = vec![node];
    nodes.extend(tree.descendants(node));
    nodes
}

/// Locals and parameters referenced anywhere inside `node`, sorted.
pub fn variables_read(tree: &SyntaxTree, contexts: &ContextTree, node: NodeId) -> Vec<VariableId> {
    let mut variables: Vec<VariableId> = subtree(tree, node)
        .into_iter()
        .filter(|&n| !is_member_name(tree, n))
        .filter_map(|n| match tree.kind(n) {
            NodeKind::Variable(variable) if is_frame_variable(contexts, *variable) => Some(*variable),
            _ => None,
        })
        .collect();
    variables.sort();
    variables.dedup();
    variables
}

/// Locals and parameters that are the destination of an assignment inside `node`, sorted.
pub fn variables_assigned(tree: &SyntaxTree, contexts: &ContextTree, node: NodeId) -> Vec<VariableId> {
    let mut variables: Vec<VariableId> = subtree(tree, node)
        .into_iter()
        .filter(|&n| *tree.kind(n) == NodeKind::Operator(Operator::Assign))
        .filter_map(|n| match tree.first(n).map(|d| tree.kind(d)) {
            Some(NodeKind::Variable(variable)) if is_frame_variable(contexts, *variable) => {
                Some(*variable)
            }
            _ => None,
        })
        .collect();
    variables.sort();
    variables.dedup();
    variables
}

pub fn contains_call(tree: &SyntaxTree, node: NodeId) -> bool {
    subtree(tree, node)
        .into_iter()
        .any(|n| matches!(tree.kind(n), NodeKind::Call(_)))
}

fn reads(tree: &SyntaxTree, node: NodeId, variable: VariableId) -> bool {
    subtree(tree, node)
        .into_iter()
        .any(|n| *tree.kind(n) == NodeKind::Variable(variable) && !is_member_name(tree, n))
}

/// Whether `variable` can be read after `node` has run: by a statement following it or one
/// of its ancestors, or by an enclosing loop running again.
pub fn is_used_later(tree: &SyntaxTree, node: NodeId, variable: VariableId) -> bool {
    let mut current = node;
    loop {
        let mut sibling = tree.next(current);
        while let Some(next) = sibling {
            if reads(tree, next, variable) {
                return true;
            }
            sibling = tree.next(next);
        }

        let Some(parent) = tree.parent(current) else {
            return false;
        };
        if matches!(tree.kind(parent), NodeKind::Loop { .. }) && reads(tree, parent, variable) {
            return true;
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GLOBAL;

    #[test]
    fn test_reads_and_writes() {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let function = contexts
            .declare_function(GLOBAL, "f", &[("a", Some(i64))], Some(i64))
            .unwrap();
        let context = contexts.function(function).context;
        let a = contexts.function(function).parameters[0];
        let b = contexts.declare_local(context, "b", Some(i64)).unwrap();

        let mut tree = SyntaxTree::new();
        let read_a = tree.variable(a);
        let write_b = tree.variable(b);
        let assignment = tree.assign(write_b, read_a);
        let read_b = tree.variable(b);
        let result = tree.return_statement(Some(read_b));
        let root = tree.scope(context, &[assignment, result]);

        assert_eq!(variables_read(&tree, &contexts, assignment), vec![a, b]);
        assert_eq!(variables_assigned(&tree, &contexts, root), vec![b]);
        assert!(is_used_later(&tree, assignment, b));
        assert!(!is_used_later(&tree, assignment, a));
        assert!(!contains_call(&tree, root));
    }
}
