// This module groups the tree passes that run before lowering. The resolver replaces
// unresolved identifiers and calls with concrete nodes and infers missing variable types from
// assignments; the evaluator folds constants and removes branches that can never run; the type
// helpers compute expression types and unify them; and the diagnostics collect whatever could
// still not be resolved as structured values. Resolution problems never abort the pipeline by
// themselves: the driver decides what to do with the collected diagnostics.

//! Resolution and evaluation passes over the syntax tree.

pub mod diagnostics;
pub mod evaluator;
pub mod resolver;
pub mod types;

pub use diagnostics::{get_unresolved, Diagnostic, DiagnosticKind};
pub use evaluator::{evaluate, try_evaluate_operator};
pub use resolver::{resolve_tree, resolve_variables, Resolution};
pub use types::{get_shared_type, get_type};

use crate::ast::{NodeId, NodeKind, SyntaxTree};
use crate::context::ContextId;

/// Context a node belongs to: its own if it opens one, otherwise the nearest enclosing one.
pub fn context_of(tree: &SyntaxTree, node: NodeId) -> Option<ContextId> {
    std::iter::once(node)
        .chain(tree.ancestors(node))
        .find_map(|id| match tree.kind(id) {
            NodeKind::Scope(context)
            | NodeKind::If(context)
            | NodeKind::ElseIf(context)
            | NodeKind::Else(context)
            | NodeKind::Loop { context, .. } => Some(*context),
            _ => None,
        })
}
