// This module implements the value cells of a Unit. Every value the instruction stream
// produces or consumes is a Result stored in a ResultArena and addressed by ResultId. A
// result carries its current Handle, its Format, metadata (the variables it backs and the
// constant/complex tags), the instruction that produced it and a Lifetime measured in
// instruction indices. Results can be joined into systems: every member of a system has an
// edge to every other member, and each edge carries a sending flag, so a change written to
// one result reaches exactly the members its outgoing edges allow. Joining with DisableSend
// or DisableReceive makes the propagation asymmetric while membership stays symmetric.

//! Arena of results and their propagation edges.

use crate::assembler::handle::Handle;
use crate::context::VariableId;
use crate::core::config::Format;
use hashbrown::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultId(pub u32);

impl ResultId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Instruction-index interval during which a result is live. `-1` marks an unset bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub start: i64,
    pub end: i64,
}

impl Lifetime {
    pub fn new() -> Self {
        Self { start: -1, end: -1 }
    }

    pub fn is_active(&self) -> bool {
        self.start != -1
    }

    pub fn covers(&self, position: i64) -> bool {
        self.is_active() && self.start <= position && position <= self.end
    }

    /// Extend the interval so it contains `position`.
    pub fn include(&mut self, position: i64) {
        if self.start == -1 || position < self.start {
            self.start = position;
        }
        if self.end == -1 || position > self.end {
            self.end = position;
        }
    }

    pub fn union(&mut self, other: &Lifetime) {
        if other.is_active() {
            self.include(other.start);
            self.include(other.end);
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Variables whose value this result holds.
    pub variables: Vec<VariableId>,
    pub constant: bool,
    /// Set on results describing a computed memory address.
    pub complex: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub result: ResultId,
    /// Whether changes flow from the owner of the edge to `result`.
    pub sending: bool,
}

#[derive(Debug, Clone)]
pub struct ResultData {
    pub handle: Handle,
    pub format: Format,
    pub metadata: Metadata,
    pub lifetime: Lifetime,
    /// Index of the producing instruction.
    pub instruction: Option<usize>,
    pub connections: Vec<Connection>,
}

/// How a join limits propagation, seen from the child's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSettings {
    Default,
    /// Changes coming from the other system are filtered.
    DisableReceive,
    /// Changes leaving to the other system are filtered.
    DisableSend,
}

#[derive(Debug, Clone, Default)]
pub struct ResultArena {
    results: Vec<ResultData>,
}

impl ResultArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, handle: Handle, format: Format) -> ResultId {
        let id = ResultId(self.results.len() as u32);
        let constant = handle.is_constant();
        self.results.push(ResultData {
            handle,
            format,
            metadata: Metadata {
                constant,
                ..Metadata::default()
            },
            lifetime: Lifetime::new(),
            instruction: None,
            connections: Vec::new(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, id: ResultId) -> &ResultData {
        &self.results[id.index()]
    }

    fn get_mut(&mut self, id: ResultId) -> &mut ResultData {
        &mut self.results[id.index()]
    }

    pub fn handle(&self, id: ResultId) -> &Handle {
        &self.get(id).handle
    }

    pub fn format(&self, id: ResultId) -> Format {
        self.get(id).format
    }

    pub fn set_format(&mut self, id: ResultId, format: Format) {
        self.get_mut(id).format = format;
    }

    pub fn metadata(&self, id: ResultId) -> &Metadata {
        &self.get(id).metadata
    }

    pub fn lifetime(&self, id: ResultId) -> Lifetime {
        self.get(id).lifetime
    }

    pub fn instruction(&self, id: ResultId) -> Option<usize> {
        self.get(id).instruction
    }

    pub fn set_instruction(&mut self, id: ResultId, instruction: usize) {
        self.get_mut(id).instruction = Some(instruction);
    }

    pub fn connections(&self, id: ResultId) -> &[Connection] {
        &self.get(id).connections
    }

    /// Every member of the system `id` belongs to, `id` first.
    pub fn system(&self, id: ResultId) -> Vec<ResultId> {
        let mut members = vec![id];
        let mut seen = HashSet::new();
        seen.insert(id);

        let mut index = 0;
        while index < members.len() {
            for connection in &self.get(members[index]).connections {
                if seen.insert(connection.result) {
                    members.push(connection.result);
                }
            }
            index += 1;
        }
        members
    }

    fn receivers(&self, id: ResultId) -> Vec<ResultId> {
        self.get(id)
            .connections
            .iter()
            .filter(|c| c.sending)
            .map(|c| c.result)
            .collect()
    }

    /// Mark the result and everything its handle refers to as used at `position`.
    pub fn use_at(&mut self, id: ResultId, position: usize) {
        let position = position as i64;
        self.get_mut(id).lifetime.include(position);

        let inner = self.get(id).handle.inner_results();
        for result in inner {
            self.use_at(result, position as usize);
        }

        let lifetime = self.get(id).lifetime;
        for receiver in self.receivers(id) {
            self.get_mut(receiver).lifetime.union(&lifetime);
        }
    }

    /// Replace the handle of `id`. Without `force` the change reaches only the members
    /// the outgoing edges of `id` send to; with `force` it reaches the whole system.
    pub fn set(&mut self, id: ResultId, handle: Handle, force: bool) {
        let targets = if force {
            self.system(id)
        } else {
            let mut targets = vec![id];
            targets.extend(self.receivers(id));
            targets
        };

        for target in targets {
            self.get_mut(target).handle = handle.clone();
        }
    }

    pub fn set_metadata(&mut self, id: ResultId, metadata: Metadata, force: bool) {
        let targets = if force {
            self.system(id)
        } else {
            let mut targets = vec![id];
            targets.extend(self.receivers(id));
            targets
        };

        for target in targets {
            self.get_mut(target).metadata = metadata.clone();
        }
    }

    fn connect(&mut self, from: ResultId, to: ResultId, sending: bool) {
        let connections = &mut self.get_mut(from).connections;
        match connections.iter_mut().find(|c| c.result == to) {
            Some(connection) => connection.sending = sending,
            None => connections.push(Connection { result: to, sending }),
        }
    }

    /// Join the system of `child` with the system of `parent`. The parent's value and
    /// metadata are sent through the new edges, its lifetime and instruction are shared.
    pub fn join(&mut self, child: ResultId, parent: ResultId, settings: JoinSettings) {
        let children = self.system(child);
        let parents = self.system(parent);
        let send = settings != JoinSettings::DisableSend;
        let receive = settings != JoinSettings::DisableReceive;

        for &a in &children {
            for &b in &parents {
                if a == b {
                    continue;
                }
                self.connect(a, b, send);
                self.connect(b, a, receive);
            }
        }

        let handle = self.get(parent).handle.clone();
        let metadata = self.get(parent).metadata.clone();
        self.set(parent, handle, false);
        self.set_metadata(parent, metadata, false);

        let lifetime = self.get(parent).lifetime;
        let instruction = self.get(parent).instruction;
        for member in self.system(parent) {
            let data = self.get_mut(member);
            data.lifetime.union(&lifetime);
            if data.instruction.is_none() {
                data.instruction = instruction;
            }
        }
    }

    /// Same result, or `a` is connected to `b`.
    pub fn equals(&self, a: ResultId, b: ResultId) -> bool {
        a == b || self.get(b).connections.iter().any(|c| c.result == a)
    }

    pub fn is_valid(&self, id: ResultId, position: usize) -> bool {
        self.get(id).lifetime.covers(position as i64)
    }

    /// True when the result is not needed after `position`.
    pub fn is_expiring(&self, id: ResultId, position: usize) -> bool {
        !self.is_valid(id, position + 1)
    }

    /// Handles of every result, indexed by result.
    pub fn handles(&self) -> Vec<Handle> {
        self.results.iter().map(|r| r.handle.clone()).collect()
    }

    /// Reassign handles from a snapshot, skipping results for which `keep` holds.
    /// The snapshot covers every result that existed when it was taken. In the build pass
    /// that is every result, so values produced after the snapshot point are reset too.
    pub fn restore_handles<F>(&mut self, handles: &[Handle], keep: F)
    where
        F: Fn(ResultId) -> bool,
    {
        for (index, handle) in handles.iter().enumerate() {
            let id = ResultId(index as u32);
            if !keep(id) {
                self.results[index].handle = handle.clone();
            }
        }
    }
}
