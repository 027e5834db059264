//! Structured reports of constructs resolution could not settle.

use crate::ast::{NodeId, NodeKind, Position, SyntaxTree};
use crate::context::{ContextId, ContextTree};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    UnresolvedIdentifier,
    UnresolvedFunction,
    /// No overload accepts the argument types.
    NoMatchingOverload,
    /// A variable whose type could not be inferred.
    UnresolvedType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub position: Option<Position>,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, position: Option<Position>) -> Self {
        Self {
            message: message.into(),
            position,
            kind,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(position) => write!(f, "{}: {}", position, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Diagnostic for a resolvable node that is still present in the tree.
pub fn describe_unresolved(tree: &SyntaxTree, node: NodeId) -> Option<Diagnostic> {
    let position = tree.position(node);
    match tree.kind(node) {
        NodeKind::UnresolvedIdentifier(name) => Some(Diagnostic::new(
            DiagnosticKind::UnresolvedIdentifier,
            format!("Could not resolve identifier '{name}'"),
            position,
        )),
        NodeKind::UnresolvedFunction(name) => Some(Diagnostic::new(
            DiagnosticKind::UnresolvedFunction,
            format!("Could not resolve function '{name}'"),
            position,
        )),
        _ => None,
    }
}

/// Collect every unresolved node under `root` and every typeless variable under `context`.
pub fn get_unresolved(
    tree: &SyntaxTree,
    contexts: &ContextTree,
    root: NodeId,
    context: ContextId,
) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = tree
        .find_all(root, NodeKind::is_resolvable)
        .into_iter()
        .filter_map(|node| describe_unresolved(tree, node))
        .collect();

    let mut pending = vec![context];
    while let Some(id) = pending.pop() {
        for variable in contexts.context(id).variables() {
            let data = contexts.variable(variable);
            if data.is_unresolved() {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnresolvedType,
                    format!("Could not resolve the type of variable '{}'", data.name),
                    None,
                ));
            }
        }
        pending.extend(contexts.context(id).subcontexts().iter().copied());
    }

    diagnostics
}
