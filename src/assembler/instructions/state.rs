//! Snapshots and reconciliation of value locations.
//!
//! Control flow makes the build pass see the same program point with different register
//! states. The rule kept here is simple: a region that can be entered or left in more than
//! one way puts every surviving variable back where it was when the region was entered.
//! EnterScope and SymmetryStart record those locations, MergeScope and SymmetryEnd move
//! the values back, and SaveState/RestoreState let the other arm of a branch start from
//! the state the first arm started from.

use crate::assembler::handle::Handle;
use crate::assembler::instruction::MergePair;
use crate::assembler::operand::{Opcode, Operand};
use crate::assembler::result::ResultId;
use crate::assembler::target::Target;
use crate::assembler::unit::{Entry, Unit};
use crate::context::VariableId;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::RegBitSet;
use log::trace;

impl Unit<'_> {
    pub(super) fn record_entry(&mut self, index: usize, actives: &[(VariableId, ResultId)]) {
        let entries = actives
            .iter()
            .map(|&(variable, result)| Entry {
                variable,
                result,
                handle: self.results.handle(result).clone(),
            })
            .collect();
        self.entries.insert(index, entries);
    }

    pub(super) fn build_restore(&mut self, save: usize) -> CompileResult<()> {
        let state = self
            .states
            .get(&save)
            .cloned()
            .ok_or_else(|| CompileError::internal(format!("no saved state at {save}")))?;
        self.restore_build_state(&state);
        Ok(())
    }

    pub(super) fn build_merge(&mut self, enter: usize, pairs: &[MergePair]) -> CompileResult<()> {
        self.reconcile(enter, pairs, true)
    }

    pub(super) fn build_symmetry_end(&mut self, start: usize, pairs: &[MergePair]) -> CompileResult<()> {
        self.reconcile(start, pairs, false)?;
        self.build_restore(start)
    }

    /// Move the inner value of every pair to where its outer value lived at `entry`.
    fn reconcile(&mut self, entry: usize, pairs: &[MergePair], surviving_only: bool) -> CompileResult<()> {
        let entries = self
            .entries
            .get(&entry)
            .cloned()
            .ok_or_else(|| CompileError::internal(format!("no recorded entry at {entry}")))?;

        let mut moves = Vec::new();
        let mut homes = Vec::new();
        for pair in pairs {
            if surviving_only && !self.results.is_valid(pair.outer, self.position + 1) {
                continue;
            }
            let Some(Entry { handle, .. }) = entries.iter().find(|e| e.result == pair.outer) else {
                continue;
            };
            if !matches!(handle, Handle::Register(_)) && !handle.is_slot() {
                continue;
            }

            if pair.inner == pair.outer && handle.is_slot() {
                self.results.set(pair.outer, handle.clone(), false);
                continue;
            }
            if *self.results.handle(pair.inner) != *handle {
                moves.push((handle.clone(), pair.inner));
            }
            homes.push((pair.outer, handle.clone()));
        }

        let replaced: Vec<ResultId> = homes.iter().map(|(outer, _)| *outer).collect();
        trace!("reconciling {} location(s) with entry {}", moves.len(), entry);
        self.parallel_move(moves, &replaced)?;

        for (outer, handle) in homes {
            if let Handle::Register(register) = handle {
                self.registers.assign_register(register, outer)?;
            }
            self.results.set(outer, handle, false);
        }
        Ok(())
    }

    /// Bring slot-resident variables into free registers. With `non_volatile`, values are
    /// also moved out of caller-saved registers. Nothing is ever evicted.
    pub(super) fn build_cache(
        &mut self,
        variables: &[(VariableId, ResultId)],
        non_volatile: bool,
    ) -> CompileResult<()> {
        let none = RegBitSet::new();
        for &(_, result) in variables {
            if !self.results.is_valid(result, self.position + 1) {
                continue;
            }

            let format = self.results.format(result);
            let bank = Target::bank(format);
            let handle = self.results.handle(result).clone();
            match handle {
                ref slot if slot.is_slot() => {
                    let free = if non_volatile {
                        self.registers.find_free_in_class(bank, false, &none)
                    } else {
                        self.registers.find_free(bank, &none)
                    };
                    let Some(register) = free else { continue };
                    self.transfer_to_register(register, slot, format)?;
                    self.assign_result(result, register)?;
                }
                Handle::Register(register)
                    if non_volatile
                        && self.registers.is_volatile(register)
                        && self.registers.get_assignment(register) == Some(result) =>
                {
                    let Some(destination) = self.registers.find_free_in_class(bank, false, &none)
                    else {
                        continue;
                    };
                    self.emit(
                        Opcode::Move,
                        vec![Operand::Register(destination), Operand::Register(register)],
                    );
                    self.registers.free_register(register)?;
                    self.assign_result(result, destination)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
