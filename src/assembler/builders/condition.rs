// This module lowers branch conditions into flat jump sequences. A condition is classified
// as a logical AND/OR (short-circuit: the left side jumps straight to the outcome it decides
// and falls through an interphase label into the right side), a comparison (a deferred
// compare followed by a conditional jump to success and a jump to failure), a parenthesis
// (unwrapped) or any other expression, which is rewritten in the tree as `expr != 0` first.
// The produced step list is cleaned by a peephole pass before it is appended: jumps to the
// immediately following label disappear, a conditional jump over an unconditional one is
// inverted, and labels nothing jumps to are dropped. Only then are the deferred compares
// expanded into real instructions, each inside its own merging scope so that whatever the
// operands required is reconciled before the jump reads the flags.

//! Condition lowering and the jump-pattern peephole.

use crate::assembler::builders;
use crate::assembler::instruction::{InstructionKind, Label};
use crate::assembler::operand::Condition;
use crate::assembler::unit::Unit;
use crate::ast::{NodeId, NodeKind, Operator};
use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};
use crate::resolve::types::get_format;
use log::trace;

/// One element of a lowered condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionStep {
    /// Deferred comparison of the operands of a comparison node.
    Compare { left: NodeId, right: NodeId },
    Jump {
        label: Label,
        condition: Option<(Condition, bool)>,
    },
    Label(Label),
}

impl ConditionStep {
    fn jump_target(&self) -> Option<Label> {
        match self {
            ConditionStep::Jump { label, .. } => Some(*label),
            _ => None,
        }
    }
}

/// Lower `node` so that control reaches `success` when it holds and `failure` otherwise.
pub fn lower(
    unit: &mut Unit<'_>,
    node: NodeId,
    success: Label,
    failure: Label,
    steps: &mut Vec<ConditionStep>,
) -> CompileResult<()> {
    let kind = unit.tree().kind(node).clone();
    match kind {
        NodeKind::Operator(operator) if operator.is_logical() => {
            let (left, right) = operands(unit, node)?;
            let interphase = unit.create_label();
            match operator {
                Operator::And => lower(unit, left, interphase, failure, steps)?,
                Operator::Or => lower(unit, left, success, interphase, steps)?,
                other => {
                    return Err(CompileError::internal(format!(
                        "unknown logical operator '{}'",
                        other.symbol()
                    )))
                }
            }
            steps.push(ConditionStep::Label(interphase));
            lower(unit, right, success, failure, steps)
        }
        NodeKind::Operator(operator) if operator.is_comparison() => {
            let (left, right) = operands(unit, node)?;
            let condition = Condition::from_operator(operator).ok_or_else(|| {
                CompileError::internal(format!("'{}' is not a comparison", operator.symbol()))
            })?;
            let signed = is_signed_comparison(unit, left, right);
            steps.push(ConditionStep::Compare { left, right });
            steps.push(ConditionStep::Jump {
                label: success,
                condition: Some((condition, signed)),
            });
            steps.push(ConditionStep::Jump {
                label: failure,
                condition: None,
            });
            Ok(())
        }
        NodeKind::Parenthesis => {
            let inner = unit
                .tree()
                .last(node)
                .ok_or_else(|| CompileError::internal("empty parenthesis as a condition"))?;
            lower(unit, inner, success, failure, steps)
        }
        _ => {
            let comparison = compare_with_zero(unit, node);
            lower(unit, comparison, success, failure, steps)
        }
    }
}

fn operands(unit: &Unit<'_>, node: NodeId) -> CompileResult<(NodeId, NodeId)> {
    let tree = unit.tree();
    match (tree.first(node), tree.last(node)) {
        (Some(left), Some(right)) if left != right => Ok((left, right)),
        _ => Err(CompileError::internal("operator without two operands")),
    }
}

/// Unsigned tests are used when either side is decimal or both sides are unsigned.
fn is_signed_comparison(unit: &Unit<'_>, left: NodeId, right: NodeId) -> bool {
    let left = get_format(unit.tree(), unit.contexts(), left);
    let right = get_format(unit.tree(), unit.contexts(), right);
    let unsigned = left.is_decimal()
        || right.is_decimal()
        || (left.is_unsigned() && right.is_unsigned());
    !unsigned
}

/// Replace `node` in the tree with `node != 0` and return the comparison.
fn compare_with_zero(unit: &mut Unit<'_>, node: NodeId) -> NodeId {
    let format = get_format(unit.tree(), unit.contexts(), node);
    let tree = &mut *unit.tree;
    let zero = if format.is_decimal() {
        tree.decimal(0.0)
    } else {
        tree.number_with_format(0, format)
    };
    let comparison = tree.create(NodeKind::Operator(Operator::NotEquals));
    tree.replace(node, comparison);
    tree.add_children(comparison, &[node, zero]);
    comparison
}

/// Clean up a lowered step list. The rules are applied until none of them changes the list.
pub fn peephole(steps: &mut Vec<ConditionStep>) {
    loop {
        let before = steps.len();
        peephole_pass(steps);
        if steps.len() == before {
            break;
        }
    }
}

fn peephole_pass(steps: &mut Vec<ConditionStep>) {
    // A jump to the label right after it
    let mut index = steps.len();
    while index > 1 {
        index -= 1;
        let redundant = matches!(
            (&steps[index - 1], &steps[index]),
            (ConditionStep::Jump { label, condition: None }, ConditionStep::Label(next)) if label == next
        );
        if redundant {
            trace!("peephole: dropping a jump to the next label");
            steps.remove(index - 1);
        }
    }

    // A conditional jump over an unconditional one
    let mut index = steps.len();
    while index > 2 {
        index -= 1;
        let rewrite = match (&steps[index - 2], &steps[index - 1], &steps[index]) {
            (
                ConditionStep::Jump {
                    label: skipped,
                    condition: Some((condition, signed)),
                },
                ConditionStep::Jump {
                    label: target,
                    condition: None,
                },
                ConditionStep::Label(next),
            ) if skipped == next && target != next => Some(ConditionStep::Jump {
                label: *target,
                condition: Some((condition.inverse(), *signed)),
            }),
            _ => None,
        };
        if let Some(inverted) = rewrite {
            trace!("peephole: inverting a conditional jump over a jump");
            steps[index - 2] = inverted;
            steps.remove(index - 1);
            index -= 1;
        }
    }

    let referenced: Vec<Label> = steps.iter().filter_map(ConditionStep::jump_target).collect();
    steps.retain(|step| match step {
        ConditionStep::Label(label) => referenced.contains(label),
        _ => true,
    });
}

/// Lower `node`, clean it up and append it. When `fallthrough` is set, the code following
/// the condition is the success path.
pub fn build(
    unit: &mut Unit<'_>,
    node: NodeId,
    success: Label,
    failure: Label,
    fallthrough: Option<Label>,
) -> CompileResult<()> {
    let mut steps = Vec::new();
    lower(unit, node, success, failure, &mut steps)?;
    if let Some(next) = fallthrough {
        steps.push(ConditionStep::Label(next));
    }
    peephole(&mut steps);

    for step in steps {
        match step {
            ConditionStep::Compare { left, right } => expand_compare(unit, left, right)?,
            ConditionStep::Jump { label, condition } => {
                unit.append(InstructionKind::Jump { label, condition }, Format::I64);
            }
            ConditionStep::Label(label) => unit.append_label(label),
        }
    }
    Ok(())
}

/// Expand a deferred comparison in place.
fn expand_compare(unit: &mut Unit<'_>, left: NodeId, right: NodeId) -> CompileResult<()> {
    let save = unit.append_marker(InstructionKind::SaveState);
    let state = unit.state();
    let actives = unit.actives();

    unit.scoped(actives, true, |unit| {
        let left = builders::value(unit, left)?;
        let right = builders::value(unit, right)?;
        unit.append(InstructionKind::Compare { left, right }, Format::I64);
        Ok(())
    })?;

    unit.set_state(state);
    unit.append_marker(InstructionKind::RestoreState { save });
    Ok(())
}
