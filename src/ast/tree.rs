//! Arena storage for syntax tree nodes.
//!
//! Every node keeps parent, first/last child and previous/next sibling indices.
//! Detached nodes stay in the arena; they are simply unreachable from the root.

use super::{NodeId, NodeKind};

/// Source position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    position: Option<Position>,
    parent: Option<NodeId>,
    first: Option<NodeId>,
    last: Option<NodeId>,
    previous: Option<NodeId>,
    next: Option<NodeId>,
}

/// Node arena.
#[derive(Debug, Clone, Default)]
pub struct SyntaxTree {
    nodes: Vec<NodeData>,
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node.
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        self.create_at(kind, None)
    }

    pub fn create_at(&mut self, kind: NodeKind, position: Option<Position>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            kind,
            position,
            parent: None,
            first: None,
            last: None,
            previous: None,
            next: None,
        });
        id
    }

    fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()]
    }

    fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.data(id).kind
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.data_mut(id).kind = kind;
    }

    pub fn position(&self, id: NodeId) -> Option<Position> {
        self.data(id).position
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).parent
    }

    pub fn first(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).first
    }

    pub fn last(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).last
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).next
    }

    pub fn previous(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).previous
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = Vec::new();
        let mut iterator = self.first(id);
        while let Some(child) = iterator {
            children.push(child);
            iterator = self.next(child);
        }
        children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        let mut iterator = self.first(id);
        let mut i = 0;
        while let Some(child) = iterator {
            if i == index {
                return Some(child);
            }
            i += 1;
            iterator = self.next(child);
        }
        None
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).len()
    }

    /// Unlink a node from its parent and siblings. Its own children stay attached to it.
    pub fn remove(&mut self, id: NodeId) {
        let (parent, previous, next) = {
            let data = self.data(id);
            (data.parent, data.previous, data.next)
        };

        match previous {
            Some(p) => self.data_mut(p).next = next,
            None => {
                if let Some(parent) = parent {
                    self.data_mut(parent).first = next;
                }
            }
        }

        match next {
            Some(n) => self.data_mut(n).previous = previous,
            None => {
                if let Some(parent) = parent {
                    self.data_mut(parent).last = previous;
                }
            }
        }

        let data = self.data_mut(id);
        data.parent = None;
        data.previous = None;
        data.next = None;
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.remove(child);
        let last = self.last(parent);

        {
            let data = self.data_mut(child);
            data.parent = Some(parent);
            data.previous = last;
            data.next = None;
        }

        match last {
            Some(last) => self.data_mut(last).next = Some(child),
            None => self.data_mut(parent).first = Some(child),
        }
        self.data_mut(parent).last = Some(child);
    }

    pub fn add_children(&mut self, parent: NodeId, children: &[NodeId]) {
        for &child in children {
            self.add_child(parent, child);
        }
    }

    /// Insert `node` as the previous sibling of `anchor`, detaching it first.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        if anchor == node {
            return;
        }
        self.remove(node);

        let parent = self.parent(anchor);
        let previous = self.previous(anchor);

        {
            let data = self.data_mut(node);
            data.parent = parent;
            data.previous = previous;
            data.next = Some(anchor);
        }
        self.data_mut(anchor).previous = Some(node);

        match previous {
            Some(previous) => self.data_mut(previous).next = Some(node),
            None => {
                if let Some(parent) = parent {
                    self.data_mut(parent).first = Some(node);
                }
            }
        }
    }

    /// Put `replacement` where `old` is; `old` becomes detached.
    pub fn replace(&mut self, old: NodeId, replacement: NodeId) {
        if old == replacement {
            return;
        }
        self.remove(replacement);
        self.insert_before(old, replacement);
        self.remove(old);
    }

    /// Put the children of `source` where `node` is; `node` becomes detached.
    pub fn replace_with_children(&mut self, node: NodeId, source: NodeId) {
        for child in self.children(source) {
            self.insert_before(node, child);
        }
        self.remove(node);
    }

    /// Copy a subtree into fresh, detached nodes.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let kind = self.kind(id).clone();
        let position = self.position(id);
        let clone = self.create_at(kind, position);

        for child in self.children(id) {
            let child_clone = self.deep_clone(child);
            self.add_child(clone, child_clone);
        }
        clone
    }

    /// Pre-order descendants, excluding `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            result.push(node);
            stack.extend(self.children(node).into_iter().rev());
        }
        result
    }

    pub fn find_all<F>(&self, root: NodeId, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&NodeKind) -> bool,
    {
        self.descendants(root)
            .into_iter()
            .filter(|&node| predicate(self.kind(node)))
            .collect()
    }

    pub fn find<F>(&self, root: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&NodeKind) -> bool,
    {
        self.descendants(root)
            .into_iter()
            .find(|&node| predicate(self.kind(node)))
    }

    /// Parent chain from the direct parent upwards.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut iterator = self.parent(id);
        while let Some(node) = iterator {
            result.push(node);
            iterator = self.parent(node);
        }
        result
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Next branch of an if / else-if chain.
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        if !self.kind(id).is_if_like() {
            return None;
        }
        let next = self.next(id)?;
        match self.kind(next) {
            NodeKind::ElseIf(_) | NodeKind::Else(_) => Some(next),
            _ => None,
        }
    }

    /// Previous branch of an else-if / else.
    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if !matches!(self.kind(id), NodeKind::ElseIf(_) | NodeKind::Else(_)) {
            return None;
        }
        let previous = self.previous(id)?;
        self.kind(previous).is_if_like().then_some(previous)
    }

    /// All branches after `id` in its chain.
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut iterator = self.successor(id);
        while let Some(node) = iterator {
            result.push(node);
            iterator = self.successor(node);
        }
        result
    }

    /// The chain starting at `id`, including `id`.
    pub fn branches(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = vec![id];
        result.extend(self.successors(id));
        result
    }

    /// Scope holding the condition and its initialization.
    pub fn condition_scope(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::If(_) | NodeKind::ElseIf(_) => self.child(id, 0),
            NodeKind::Loop { forever: false, .. } => self.child(id, 1),
            _ => None,
        }
    }

    /// The tested expression: last statement of the condition scope.
    pub fn condition(&self, id: NodeId) -> Option<NodeId> {
        self.condition_scope(id).and_then(|scope| self.last(scope))
    }

    /// Statements evaluated before the tested expression.
    pub fn condition_initialization(&self, id: NodeId) -> Vec<NodeId> {
        match self.condition_scope(id) {
            Some(scope) => {
                let mut statements = self.children(scope);
                statements.pop();
                statements
            }
            None => Vec::new(),
        }
    }

    pub fn body(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::If(_) | NodeKind::ElseIf(_) => self.child(id, 1),
            NodeKind::Else(_) => self.child(id, 0),
            NodeKind::Loop { forever: true, .. } => self.child(id, 0),
            NodeKind::Loop { forever: false, .. } => self.child(id, 3),
            _ => None,
        }
    }

    pub fn loop_initialization(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::Loop { forever: false, .. } => self.child(id, 0),
            _ => None,
        }
    }

    pub fn loop_action(&self, id: NodeId) -> Option<NodeId> {
        match self.kind(id) {
            NodeKind::Loop { forever: false, .. } => self.child(id, 2),
            _ => None,
        }
    }

    /// Innermost loop containing `id`.
    pub fn enclosing_loop(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|&node| matches!(self.kind(node), NodeKind::Loop { .. }))
    }
}
