// This module builds pre-tested and infinite loops and the break/continue statements inside
// them. A loop body is bracketed by SymmetryStart and SymmetryEnd: the start records where
// every active variable lives when an iteration begins, and every path that leaves the body
// (the back edge, a break, a continue) moves the values back there before jumping. After the
// back edge the build pass continues from the recorded state, so the append side resets
// each variable to the result it had at the start as well. A break or continue is wrapped in
// SaveState/RestoreState instead: the statements after it still see the body's state. A pre-tested loop tests its
// condition once before the body (the early exit) and again after the action (the back edge);
// the back edge is the only test that falls out of the loop.

//! Loop builders.

use crate::assembler::analysis;
use crate::assembler::builders::{self, condition};
use crate::assembler::instruction::{InstructionKind, Label, MergePair};
use crate::assembler::result::ResultId;
use crate::assembler::unit::{LoopRecord, Unit};
use crate::ast::{LoopControl, NodeId, NodeKind};
use crate::context::VariableId;
use crate::core::error::{CompileError, CompileResult};
use log::debug;

pub fn build(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    let NodeKind::Loop { forever, .. } = *unit.tree().kind(node) else {
        return Err(CompileError::internal("loop builder called on a non-loop"));
    };
    debug!(
        "building {} loop in {}",
        if forever { "an infinite" } else { "a pre-tested" },
        unit.symbol()
    );
    if forever {
        build_forever_loop(unit, node)
    } else {
        build_pretested_loop(unit, node)
    }
}

/// Cache and prepare the variables the loop touches.
fn prepare(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    if !unit.config().debug {
        let non_volatile = analysis::contains_call(unit.tree(), node);
        unit.cache(&[node], non_volatile);
    }
    unit.prepare_constants(&[node])
}

fn build_pretested_loop(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    let start = unit.create_label();
    let end = unit.create_label();

    if let Some(initialization) = unit.tree().loop_initialization(node) {
        builders::build(unit, initialization)?;
    }
    prepare(unit, node)?;

    build_condition_initialization(unit, node)?;
    let enter = unit.create_label();
    let test = loop_condition(unit, node)?;
    condition::build(unit, test, enter, end, Some(enter))?;

    let save = unit.append_marker(InstructionKind::SaveState);
    let actives = unit.actives();
    unit.scoped(actives.clone(), false, |unit| {
        unit.append_label(start);
        let symmetry = open_symmetry(unit, node, start, end, &actives);

        let body = unit
            .tree()
            .body(node)
            .ok_or_else(|| CompileError::internal("loop without a body"))?;
        builders::build(unit, body)?;
        if let Some(action) = unit.tree().loop_action(node) {
            builders::build(unit, action)?;
        }
        close_symmetry(unit, symmetry, &actives);

        build_condition_initialization(unit, node)?;
        let exit = unit.create_label();
        // The first lowering may have rewritten the condition in place
        let test = loop_condition(unit, node)?;
        condition::build(unit, test, start, exit, Some(exit))?;
        read_actives(unit, &actives);
        Ok(())
    })?;

    unit.append_label(end);
    unit.append_marker(InstructionKind::RestoreState { save });
    Ok(())
}

fn build_forever_loop(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    prepare(unit, node)?;
    let save = unit.append_marker(InstructionKind::SaveState);

    let start = unit.create_label();
    let exit = unit.create_label();
    unit.append_label(start);

    let body_label = unit.create_label();
    let actives = unit.actives();
    unit.scoped(actives.clone(), false, |unit| {
        unit.append_label(body_label);
        let symmetry = open_symmetry(unit, node, body_label, exit, &actives);

        let body = unit
            .tree()
            .body(node)
            .ok_or_else(|| CompileError::internal("loop without a body"))?;
        builders::build(unit, body)?;
        close_symmetry(unit, symmetry, &actives);
        Ok(())
    })?;

    unit.append_jump(body_label);
    unit.append_marker(InstructionKind::RestoreState { save });
    unit.append_label(exit);
    Ok(())
}

fn loop_condition(unit: &Unit<'_>, node: NodeId) -> CompileResult<NodeId> {
    unit.tree()
        .condition(node)
        .ok_or_else(|| CompileError::internal("pre-tested loop without a condition"))
}

fn build_condition_initialization(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    for statement in unit.tree().condition_initialization(node) {
        builders::build(unit, statement)?;
    }
    Ok(())
}

/// Append SymmetryStart and register the loop under `node`.
fn open_symmetry(
    unit: &mut Unit<'_>,
    node: NodeId,
    start: Label,
    exit: Label,
    actives: &[(VariableId, ResultId)],
) -> usize {
    let index = unit.append_marker(InstructionKind::SymmetryStart {
        loop_node: node,
        actives: actives.to_vec(),
    });
    unit.loops.insert(
        node,
        LoopRecord {
            start,
            exit,
            symmetry: Some((index, actives.to_vec())),
        },
    );
    index
}

/// Append SymmetryEnd against `start` and reset the bindings to the iteration-start results.
fn close_symmetry(unit: &mut Unit<'_>, start: usize, actives: &[(VariableId, ResultId)]) {
    let pairs = symmetry_pairs(unit, actives);
    unit.append_marker(InstructionKind::SymmetryEnd { start, pairs });
    for &(variable, outer) in actives {
        unit.bind(variable, outer);
    }
}

fn symmetry_pairs(unit: &Unit<'_>, actives: &[(VariableId, ResultId)]) -> Vec<MergePair> {
    actives
        .iter()
        .map(|&(variable, outer)| MergePair {
            variable,
            outer,
            inner: unit.bindings.get(&variable).copied().unwrap_or(outer),
        })
        .collect()
}

/// Keep the iteration-start results alive over the back edge.
fn read_actives(unit: &mut Unit<'_>, actives: &[(VariableId, ResultId)]) {
    for &(variable, value) in actives {
        unit.append_marker(InstructionKind::GetVariable { variable, value });
    }
}

/// Build a break or continue.
pub fn build_control_instruction(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    let NodeKind::LoopControl(control) = *unit.tree().kind(node) else {
        return Err(CompileError::internal("loop control builder called on another node"));
    };
    let target = unit
        .tree()
        .enclosing_loop(node)
        .ok_or_else(|| CompileError::internal(format!("{control:?} outside of a loop")))?;
    let record = unit
        .loops
        .get(&target)
        .cloned()
        .ok_or_else(|| CompileError::internal(format!("{control:?} in an unregistered loop")))?;
    let Some((start, actives)) = record.symmetry else {
        return Err(CompileError::internal(format!("{control:?} in a loop without a label")));
    };

    // Only the jump sees the reconciled state; the code after it resumes from the state before
    let pairs = symmetry_pairs(unit, &actives);
    let save = unit.append_marker(InstructionKind::SaveState);
    unit.append_marker(InstructionKind::SymmetryEnd { start, pairs });
    match control {
        LoopControl::Stop => unit.append_jump(record.exit),
        LoopControl::Continue => unit.append_jump(record.start),
    }
    unit.append_marker(InstructionKind::RestoreState { save });
    Ok(())
}
