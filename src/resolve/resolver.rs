// This module implements the resolver, a single-pass walk over a syntax tree that replaces
// unresolved identifiers and unresolved calls with the concrete nodes they denote. Every
// resolvable node answers with a Resolution: either the kind it should become or a diagnostic
// explaining why it stays as it is. A node whose own resolution fails with an error is logged
// and left unresolved so the rest of the walk still runs; a later diagnostic pass reports
// whatever is left. Identifiers are tried as variables first, then as parameterless functions
// and finally as type names. Calls pick the overload whose parameters accept the argument
// types, preferring an exact match. The second half of the module infers the types of
// variables declared without one from the values assigned to them.

//! Identifier, call and variable type resolution.

use super::diagnostics::{describe_unresolved, Diagnostic, DiagnosticKind};
use super::types::{get_shared_types, get_type};
use super::context_of;
use crate::ast::{NodeId, NodeKind, Operator, SyntaxTree};
use crate::context::{ContextId, ContextTree, FunctionId, TypeId, VariableId};
use crate::core::error::{CompileError, CompileResult};
use log::{debug, trace, warn};

/// Outcome of resolving one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The node becomes this kind; its children stay.
    Resolved(NodeKind),
    Unresolved(Diagnostic),
}

/// True when an argument of type `argument` may be passed as `parameter`.
fn accepts(contexts: &ContextTree, parameter: Option<TypeId>, argument: TypeId) -> bool {
    let Some(parameter) = parameter else {
        return true;
    };
    parameter == argument
        || contexts.is_type_inheriting(argument, parameter)
        || (contexts.ty(parameter).is_number() && contexts.ty(argument).is_number())
}

fn parameter_types(contexts: &ContextTree, function: FunctionId) -> Vec<Option<TypeId>> {
    contexts
        .function(function)
        .parameters
        .iter()
        .map(|&p| contexts.variable(p).type_id)
        .collect()
}

/// Pick the overload of `name` callable with `arguments`.
fn select_overload(
    contexts: &ContextTree,
    context: ContextId,
    name: &str,
    arguments: &[TypeId],
) -> CompileResult<Option<FunctionId>> {
    let Some(overloads) = contexts.get_function(context, name) else {
        return Ok(None);
    };

    let candidates: Vec<FunctionId> = overloads
        .iter()
        .copied()
        .filter(|&overload| {
            let parameters = parameter_types(contexts, overload);
            parameters.len() == arguments.len()
                && parameters
                    .iter()
                    .zip(arguments)
                    .all(|(&p, &a)| accepts(contexts, p, a))
        })
        .collect();

    if candidates.len() <= 1 {
        return Ok(candidates.first().copied());
    }

    let exact: Vec<FunctionId> = candidates
        .iter()
        .copied()
        .filter(|&candidate| {
            parameter_types(contexts, candidate)
                .iter()
                .zip(arguments)
                .all(|(&p, &a)| p == Some(a))
        })
        .collect();

    match exact.as_slice() {
        [single] => Ok(Some(*single)),
        _ => Err(CompileError::internal(format!(
            "call to '{name}' is ambiguous between {} overloads",
            candidates.len()
        ))),
    }
}

fn resolve_identifier(
    contexts: &ContextTree,
    context: ContextId,
    name: &str,
) -> CompileResult<Option<NodeKind>> {
    if let Some(variable) = contexts.get_variable(context, name) {
        return Ok(Some(NodeKind::Variable(variable)));
    }

    if let Some(function) = select_overload(contexts, context, name, &[])? {
        return Ok(Some(NodeKind::Call(function)));
    }

    Ok(contexts.get_type(context, name).map(NodeKind::TypeReference))
}

/// Resolve a single node against the context it appears in.
pub fn resolve_node(
    tree: &SyntaxTree,
    contexts: &ContextTree,
    node: NodeId,
    context: ContextId,
) -> CompileResult<Resolution> {
    let resolved = match tree.kind(node) {
        NodeKind::UnresolvedIdentifier(name) => resolve_identifier(contexts, context, name)?,
        NodeKind::UnresolvedFunction(name) => {
            let arguments: Option<Vec<TypeId>> = tree
                .children(node)
                .into_iter()
                .map(|argument| get_type(tree, contexts, argument))
                .collect();

            let Some(arguments) = arguments else {
                let message = format!("Arguments of '{name}' have unresolved types");
                return Ok(Resolution::Unresolved(Diagnostic::new(
                    DiagnosticKind::UnresolvedFunction,
                    message,
                    tree.position(node),
                )));
            };

            if contexts.get_function(context, name).is_some() {
                match select_overload(contexts, context, name, &arguments)? {
                    Some(function) => Some(NodeKind::Call(function)),
                    None => {
                        let message = format!("No overload of '{name}' accepts the arguments");
                        return Ok(Resolution::Unresolved(Diagnostic::new(
                            DiagnosticKind::NoMatchingOverload,
                            message,
                            tree.position(node),
                        )));
                    }
                }
            } else {
                None
            }
        }
        other => {
            return Err(CompileError::internal(format!(
                "node {other:?} is not resolvable"
            )))
        }
    };

    match resolved {
        Some(kind) => Ok(Resolution::Resolved(kind)),
        None => describe_unresolved(tree, node)
            .map(Resolution::Unresolved)
            .ok_or_else(|| CompileError::internal("resolvable node without a diagnostic")),
    }
}

/// Resolve every resolvable node under `root`. Returns how many were replaced.
///
/// Children are visited before their parent so call arguments are typed first.
pub fn resolve_tree(tree: &mut SyntaxTree, contexts: &ContextTree, root: NodeId, context: ContextId) -> usize {
    let mut nodes = tree.find_all(root, NodeKind::is_resolvable);
    nodes.reverse();

    let mut resolved = 0;
    for node in nodes {
        let local = context_of(tree, node).unwrap_or(context);
        match resolve_node(tree, contexts, node, local) {
            Ok(Resolution::Resolved(kind)) => {
                trace!("resolved {:?} into {:?}", tree.kind(node), kind);
                tree.set_kind(node, kind);
                resolved += 1;
            }
            Ok(Resolution::Unresolved(diagnostic)) => {
                trace!("left unresolved: {diagnostic}");
            }
            Err(error) => {
                warn!("Resolution of {:?} failed: {}", tree.kind(node), error);
            }
        }
    }

    debug!("resolved {resolved} node(s)");
    resolved
}

/// True when `node` is the destination of a plain assignment or of one through a member link.
fn assigned_value(tree: &SyntaxTree, node: NodeId) -> Option<NodeId> {
    let parent = tree.parent(node)?;
    match tree.kind(parent) {
        NodeKind::Operator(Operator::Assign) if tree.first(parent) == Some(node) => tree.last(parent),
        NodeKind::Link if tree.last(parent) == Some(node) => {
            let assignment = tree.parent(parent)?;
            match tree.kind(assignment) {
                NodeKind::Operator(Operator::Assign) if tree.first(assignment) == Some(parent) => {
                    tree.last(assignment)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn infer_variable(
    tree: &SyntaxTree,
    contexts: &ContextTree,
    root: NodeId,
    variable: VariableId,
) -> Option<TypeId> {
    let types: Vec<Option<TypeId>> = tree
        .find_all(root, |kind| *kind == NodeKind::Variable(variable))
        .into_iter()
        .filter_map(|usage| assigned_value(tree, usage))
        .map(|value| get_type(tree, contexts, value))
        .filter(Option::is_some)
        .collect();

    get_shared_types(contexts, &types)
}

/// Infer missing variable types of `context` and its subcontexts from assignments under `root`.
pub fn resolve_variables(
    tree: &SyntaxTree,
    contexts: &mut ContextTree,
    root: NodeId,
    context: ContextId,
) -> usize {
    let mut resolved = 0;
    let mut pending = vec![context];

    while let Some(id) = pending.pop() {
        for variable in contexts.context(id).variables() {
            if !contexts.variable(variable).is_unresolved() {
                continue;
            }

            if let Some(type_id) = infer_variable(tree, contexts, root, variable) {
                trace!(
                    "variable '{}' has type '{}'",
                    contexts.variable(variable).name,
                    contexts.ty(type_id).name
                );
                contexts.variable_mut(variable).type_id = Some(type_id);
                resolved += 1;
            }
        }
        pending.extend(contexts.context(id).subcontexts().iter().copied());
    }

    resolved
}
