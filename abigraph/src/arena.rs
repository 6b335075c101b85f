//! per-unit node storage and the foreign id index
//!
//! Nodes refer to each other by [`NodeIndex`], never by address, so a unit's
//! graph can hold cycles without any shared ownership.
use std::collections::HashMap;

use crate::descriptor::ForeignId;
use crate::node::{NodeIndex, TypeNode};

/// append-only node storage of one translation unit
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<TypeNode>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: TypeNode) -> NodeIndex {
        let index = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(node);
        index
    }

    pub fn get(&self, index: NodeIndex) -> Option<&TypeNode> {
        self.nodes.get(index.as_usize())
    }

    /// only used to fill in a registered shell
    pub(crate) fn get_mut(&mut self, index: NodeIndex) -> Option<&mut TypeNode> {
        self.nodes.get_mut(index.as_usize())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// index the next push will return
    pub fn next_index(&self) -> NodeIndex {
        NodeIndex(self.nodes.len() as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &TypeNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeIndex(i as u32), node))
    }

    /// drop every node appended at or after `mark`. rollback of an abandoned
    /// shell; nothing below `mark` can refer to those slots.
    pub(crate) fn truncate_to(&mut self, mark: NodeIndex) {
        log::trace!(
            "roll back arena from {} to {} nodes",
            self.nodes.len(),
            mark.0
        );
        self.nodes.truncate(mark.as_usize());
    }
}

impl std::ops::Index<NodeIndex> for NodeArena {
    type Output = TypeNode;

    fn index(&self, index: NodeIndex) -> &TypeNode {
        &self.nodes[index.as_usize()]
    }
}

/// foreign id -> node of the unit under construction
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    map: HashMap<ForeignId, NodeIndex>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ForeignId, index: NodeIndex) {
        self.map.insert(id, index);
    }

    pub fn get(&self, id: ForeignId) -> Option<NodeIndex> {
        self.map.get(&id).copied()
    }

    pub fn remove(&mut self, id: ForeignId) -> Option<NodeIndex> {
        self.map.remove(&id)
    }

    pub fn contains(&self, id: ForeignId) -> bool {
        self.map.contains_key(&id)
    }

    /// forget every id mapped to a slot at or after `mark`
    pub(crate) fn retain_below(&mut self, mark: NodeIndex) {
        self.map.retain(|_, index| *index < mark);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ForeignId, NodeIndex)> + '_ {
        self.map.iter().map(|(id, index)| (*id, *index))
    }
}
