// This module implements the evaluator, the tree simplification that runs between resolution
// and lowering. It folds comparisons and logical operators over literal operands (including
// the rule that a stack allocation is never the null address), simplifies logical operators
// that have one literal side, removes the branches of conditional chains whose condition is a
// known literal, and replaces "compiles" probes with 0 or 1 depending on whether everything
// inside them resolved. The passes repeat until the tree stops changing, since one fold can
// expose another (a folded comparison may turn an if-statement's condition into a literal).

//! Constant folding and dead-branch elimination.

use super::context_of;
use crate::ast::{NodeId, NodeKind, Number, Operator, SyntaxTree};
use crate::context::ContextTree;
use crate::core::config::Format;
use log::{debug, trace};

/// Follow parentheses and single-assignment variables to the node that produces a value.
pub fn get_source(tree: &SyntaxTree, root: NodeId, node: NodeId) -> NodeId {
    let mut current = node;
    // Bounded by the tree size so self-referential assignments cannot loop
    for _ in 0..tree.len() {
        match tree.kind(current) {
            NodeKind::Parenthesis => match tree.last(current) {
                Some(inner) => current = inner,
                None => return current,
            },
            NodeKind::Variable(variable) => {
                let variable = *variable;
                let assignments: Vec<NodeId> = tree
                    .find_all(root, |kind| *kind == NodeKind::Operator(Operator::Assign))
                    .into_iter()
                    .filter(|&assignment| {
                        tree.first(assignment)
                            .is_some_and(|d| *tree.kind(d) == NodeKind::Variable(variable))
                    })
                    .collect();

                match assignments.as_slice() {
                    [single] => match tree.last(*single) {
                        Some(value) if value != current => current = value,
                        _ => return current,
                    },
                    _ => return current,
                }
            }
            _ => return current,
        }
    }
    current
}

fn is_zero(tree: &SyntaxTree, node: NodeId) -> bool {
    tree.kind(node).as_number().is_some_and(|n| n.is_zero())
}

fn is_stack_address(tree: &SyntaxTree, root: NodeId, node: NodeId) -> bool {
    matches!(tree.kind(get_source(tree, root, node)), NodeKind::StackAddress { .. })
}

fn compare(operator: Operator, left: Number, right: Number) -> Option<bool> {
    let result = if left.is_decimal() || right.is_decimal() {
        let (a, b) = (left.as_f64(), right.as_f64());
        match operator {
            Operator::Equals => a == b,
            Operator::NotEquals => a != b,
            Operator::Less => a < b,
            Operator::LessOrEqual => a <= b,
            Operator::Greater => a > b,
            Operator::GreaterOrEqual => a >= b,
            Operator::And => a != 0.0 && b != 0.0,
            Operator::Or => a != 0.0 || b != 0.0,
            _ => return None,
        }
    } else {
        let (a, b) = (left.as_i64(), right.as_i64());
        match operator {
            Operator::Equals => a == b,
            Operator::NotEquals => a != b,
            Operator::Less => a < b,
            Operator::LessOrEqual => a <= b,
            Operator::Greater => a > b,
            Operator::GreaterOrEqual => a >= b,
            Operator::And => a != 0 && b != 0,
            Operator::Or => a != 0 || b != 0,
            _ => return None,
        }
    };
    Some(result)
}

/// Outcome of a comparison or logical operator when it is known at compile time.
pub fn try_evaluate_operator(tree: &SyntaxTree, root: NodeId, node: NodeId) -> Option<bool> {
    let operator = tree.kind(node).as_operator()?;
    if !operator.is_comparison() && !operator.is_logical() {
        return None;
    }

    let left = tree.first(node)?;
    let right = tree.last(node)?;

    if matches!(operator, Operator::Equals | Operator::NotEquals)
        && ((is_zero(tree, left) && is_stack_address(tree, root, right))
            || (is_zero(tree, right) && is_stack_address(tree, root, left)))
    {
        return Some(operator == Operator::NotEquals);
    }

    let left = tree.kind(left).as_number()?;
    let right = tree.kind(right).as_number()?;
    compare(operator, left, right)
}

fn replace_with_number(tree: &mut SyntaxTree, node: NodeId, value: i64) {
    let position = tree.position(node);
    let number = tree.create_at(
        NodeKind::Number {
            value: Number::Integer(value),
            format: Format::I64,
        },
        position,
    );
    tree.replace(node, number);
}

fn fold_operators(tree: &mut SyntaxTree, root: NodeId) -> bool {
    let mut changed = false;
    // Innermost first so a fold can feed its parent
    let mut operators = tree.find_all(root, |kind| kind.as_operator().is_some());
    operators.reverse();

    for node in operators {
        if let Some(value) = try_evaluate_operator(tree, root, node) {
            trace!("folded {:?} into {}", tree.kind(node), value);
            replace_with_number(tree, node, i64::from(value));
            changed = true;
        }
    }
    changed
}

/// Simplify one logical operator with a literal side. Returns true on change.
fn simplify_logical(tree: &mut SyntaxTree, node: NodeId) -> bool {
    let Some(operator) = tree.kind(node).as_operator().filter(|o| o.is_logical()) else {
        return false;
    };
    let (Some(left), Some(right)) = (tree.first(node), tree.last(node)) else {
        return false;
    };

    let (literal, other) = match (tree.kind(left).as_number(), tree.kind(right).as_number()) {
        (Some(value), _) => (value, right),
        (None, Some(value)) => (value, left),
        (None, None) => return false,
    };

    match (operator, literal.is_zero()) {
        (Operator::And, true) => replace_with_number(tree, node, 0),
        (Operator::Or, false) => replace_with_number(tree, node, 1),
        _ => tree.replace(node, other),
    }
    true
}

fn simplify_logical_operators(tree: &mut SyntaxTree, root: NodeId) -> bool {
    let mut changed = false;
    let mut operators = tree.find_all(root, |kind| kind.as_operator().is_some_and(Operator::is_logical));
    operators.reverse();

    for node in operators {
        // An outer rewrite may have detached this operator already
        if tree.parent(node).is_none() {
            continue;
        }
        changed |= simplify_logical(tree, node);
    }
    changed
}

/// Splice the statements of `body` in place of `node`, merging its context into the enclosing one.
fn inline_body(tree: &mut SyntaxTree, contexts: &mut ContextTree, node: NodeId, body: NodeId) {
    let outer = tree.parent(node).and_then(|parent| context_of(tree, parent));
    if let (NodeKind::Scope(inner), Some(outer)) = (tree.kind(body), outer) {
        if *inner != outer {
            contexts.merge(outer, *inner);
        }
    }
    tree.replace_with_children(node, body);
}

/// Evaluate one branch with a literal condition. Returns true when the tree changed.
fn evaluate_conditional(tree: &mut SyntaxTree, contexts: &mut ContextTree, node: NodeId) -> bool {
    let Some(condition) = tree.condition(node) else {
        return false;
    };
    let Some(value) = tree.kind(condition).as_number() else {
        return false;
    };
    if !tree.condition_initialization(node).is_empty() {
        return false;
    }

    let predecessor = tree.predecessor(node);
    let successor = tree.successor(node);

    if !value.is_zero() {
        for successor in tree.successors(node) {
            tree.remove(successor);
        }

        let Some(body) = tree.body(node) else {
            return false;
        };

        if predecessor.is_none() {
            inline_body(tree, contexts, node, body);
        } else {
            let context = match tree.kind(node) {
                NodeKind::If(context) | NodeKind::ElseIf(context) => *context,
                _ => return false,
            };
            if let Some(condition_scope) = tree.condition_scope(node) {
                tree.remove(condition_scope);
            }
            tree.set_kind(node, NodeKind::Else(context));
        }
        return true;
    }

    match successor {
        Some(successor) if predecessor.is_none() => match tree.kind(successor).clone() {
            NodeKind::ElseIf(context) => {
                tree.set_kind(successor, NodeKind::If(context));
                tree.remove(node);
            }
            NodeKind::Else(_) => {
                let Some(body) = tree.body(successor) else {
                    return false;
                };
                tree.remove(successor);
                inline_body(tree, contexts, node, body);
            }
            _ => return false,
        },
        _ => tree.remove(node),
    }
    true
}

fn evaluate_conditionals(tree: &mut SyntaxTree, contexts: &mut ContextTree, root: NodeId) -> bool {
    let mut changed = false;
    'restart: loop {
        for node in tree.find_all(root, NodeKind::is_if_like) {
            if evaluate_conditional(tree, contexts, node) {
                changed = true;
                continue 'restart;
            }
        }
        return changed;
    }
}

fn evaluate_compiles(tree: &mut SyntaxTree, contexts: &ContextTree, root: NodeId) -> bool {
    let probes = tree.find_all(root, |kind| matches!(kind, NodeKind::Compiles));
    let changed = !probes.is_empty();

    for probe in probes {
        let problematic = tree.descendants(probe).into_iter().any(|node| match tree.kind(node) {
            kind if kind.is_resolvable() => true,
            NodeKind::Variable(variable) => contexts.variable(*variable).is_unresolved(),
            _ => false,
        });
        let value = if problematic { 0 } else { 1 };
        trace!("compiles probe evaluated to {value}");
        replace_with_number(tree, probe, value);
    }
    changed
}

/// Run every pass until the tree stops changing. Returns the number of rounds that changed it.
pub fn evaluate(tree: &mut SyntaxTree, contexts: &mut ContextTree, root: NodeId) -> usize {
    let mut rounds = 0;
    loop {
        let mut changed = fold_operators(tree, root);
        changed |= simplify_logical_operators(tree, root);
        changed |= evaluate_conditionals(tree, contexts, root);
        changed |= evaluate_compiles(tree, contexts, root);

        if !changed {
            break;
        }
        rounds += 1;
    }

    debug!("evaluation settled after {rounds} round(s)");
    rounds
}
