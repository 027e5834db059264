//! Scope handling of the append pass.
//!
//! A merging scope brackets its region with EnterScope and MergeScope so that every variable
//! active at entry is found in its entry location again on exit, whatever the region did.

use crate::assembler::analysis;
use crate::assembler::handle::Handle;
use crate::assembler::instruction::{InstructionKind, MergePair};
use crate::assembler::result::ResultId;
use crate::assembler::unit::{Scope, Unit};
use crate::ast::NodeId;
use crate::context::VariableId;
use crate::core::error::CompileResult;
use crate::resolve::context_of;
use log::trace;

impl Unit<'_> {
    /// Run `f` inside a new scope seeded with `actives`.
    pub fn scoped<T, F>(
        &mut self,
        actives: Vec<(VariableId, ResultId)>,
        merge: bool,
        f: F,
    ) -> CompileResult<T>
    where
        F: FnOnce(&mut Self) -> CompileResult<T>,
    {
        let enter = merge.then(|| {
            self.append_marker(InstructionKind::EnterScope {
                actives: actives.clone(),
            })
        });
        self.scopes.push(Scope {
            actives,
            merge,
            enter,
        });

        let value = f(self);
        let scope = self.scopes.pop();
        let value = value?;

        if let Some(Scope {
            actives,
            enter: Some(enter),
            ..
        }) = scope
        {
            let pairs = actives
                .iter()
                .map(|&(variable, outer)| MergePair {
                    variable,
                    outer,
                    inner: self.bindings.get(&variable).copied().unwrap_or(outer),
                })
                .collect();
            self.append_marker(InstructionKind::MergeScope { enter, pairs });
        }
        Ok(value)
    }

    /// Give every variable assigned inside `nodes` a result that can be moved into.
    /// Constants and stack addresses are duplicated into registers; variables assigned for the
    /// first time are bound to their frame slot when the value escapes the region.
    pub fn prepare_constants(&mut self, nodes: &[NodeId]) -> CompileResult<()> {
        let contexts = self.contexts;
        let mut assigned: Vec<VariableId> = nodes
            .iter()
            .flat_map(|&node| analysis::variables_assigned(self.tree, contexts, node))
            .collect();
        assigned.sort();
        assigned.dedup();

        let Some(&anchor) = nodes.last() else {
            return Ok(());
        };
        let regions: Vec<_> = nodes.iter().filter_map(|&n| context_of(self.tree, n)).collect();

        for variable in assigned {
            match self.bindings.get(&variable).copied() {
                Some(result) => {
                    let handle = self.results.handle(result).clone();
                    if matches!(handle, Handle::Constant(_) | Handle::Inline { .. }) {
                        let format = self.variable_format(variable);
                        let duplicate = self.append(InstructionKind::Duplicate { value: result }, format);
                        self.bind(variable, duplicate);
                        trace!("variable {} holds {}, duplicated", variable.0, handle);
                    }
                }
                None => {
                    let declared = contexts.variable(variable).context;
                    let outside = regions
                        .iter()
                        .all(|&region| !contexts.is_inside(declared, region));
                    if outside || analysis::is_used_later(self.tree, anchor, variable) {
                        self.create_unbound(variable);
                    }
                }
            }
        }
        Ok(())
    }

    /// Load the bound variables read inside `nodes` into registers ahead of the region.
    pub fn cache(&mut self, nodes: &[NodeId], non_volatile: bool) {
        let contexts = self.contexts;
        let mut variables: Vec<(VariableId, ResultId)> = nodes
            .iter()
            .flat_map(|&node| analysis::variables_read(self.tree, contexts, node))
            .filter_map(|variable| self.bindings.get(&variable).map(|&r| (variable, r)))
            .collect();
        variables.sort();
        variables.dedup();

        if !variables.is_empty() {
            self.append_marker(InstructionKind::CacheVariables {
                variables,
                non_volatile,
            });
        }
    }

    /// Append reads that keep the region's active variables alive past it.
    pub fn read_used_later(&mut self, node: NodeId, actives: &[(VariableId, ResultId)]) {
        for &(variable, value) in actives {
            if analysis::is_used_later(self.tree, node, variable) {
                self.append_marker(InstructionKind::GetVariable { variable, value });
            }
        }
    }
}
