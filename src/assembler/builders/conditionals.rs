//! if / else-if / else chains.
//!
//! Every branch starts from the state the chain started from and leaves its variables where
//! they were at the start, so the code after the end label sees one consistent state no
//! matter which branch ran.

use crate::assembler::builders::{self, condition};
use crate::assembler::instruction::{InstructionKind, Label};
use crate::assembler::result::ResultId;
use crate::assembler::unit::Unit;
use crate::ast::{NodeId, NodeKind};
use crate::core::error::{CompileError, CompileResult};
use log::debug;

pub fn start(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<Option<ResultId>> {
    let branches = unit.tree().branches(node);
    debug!("building a chain of {} branch(es) in {}", branches.len(), unit.symbol());

    unit.cache(&branches, false);
    unit.prepare_constants(&branches)?;
    unit.append_marker(InstructionKind::Branch {
        branches: branches.clone(),
    });

    let end = unit.create_label();
    build_branches(unit, &branches, end)?;
    unit.append_label(end);
    Ok(None)
}

/// Build the first branch of `branches` and then, recursively, the rest of the chain.
pub fn build_branches(unit: &mut Unit<'_>, branches: &[NodeId], end: Label) -> CompileResult<()> {
    let Some((&branch, rest)) = branches.split_first() else {
        return Ok(());
    };
    let kind = unit.tree().kind(branch).clone();
    if let Some(&successor) = rest.first() {
        let chained = matches!(unit.tree().kind(successor), NodeKind::ElseIf(_) | NodeKind::Else(_));
        if !chained || matches!(kind, NodeKind::Else(_)) {
            return Err(CompileError::internal(format!(
                "{:?} cannot follow {:?} in a conditional chain",
                unit.tree().kind(successor),
                kind
            )));
        }
    }

    let interphase = if rest.is_empty() {
        end
    } else {
        unit.create_label()
    };

    if kind.is_if_like() {
        for statement in unit.tree().condition_initialization(branch) {
            builders::build(unit, statement)?;
        }
        let test = unit
            .tree()
            .condition(branch)
            .ok_or_else(|| CompileError::internal("conditional without a condition"))?;
        let success = unit.create_label();
        condition::build(unit, test, success, interphase, Some(success))?;
    }

    let body = unit
        .tree()
        .body(branch)
        .ok_or_else(|| CompileError::internal("branch without a body"))?;
    let save = unit.append_marker(InstructionKind::SaveState);
    let state = unit.state();
    let actives = unit.actives();
    unit.scoped(actives.clone(), true, |unit| builders::build(unit, body).map(|_| ()))?;
    unit.set_state(state);
    unit.append_marker(InstructionKind::RestoreState { save });
    unit.read_used_later(branch, &actives);

    if rest.is_empty() {
        return Ok(());
    }
    unit.append_jump(end);
    unit.append_label(interphase);
    build_branches(unit, rest, end)
}
