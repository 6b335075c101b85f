use super::StructuralKey;
use crate::node::NodeId;
use std::collections::HashMap;

/// structural key -> canonical representatives carrying it
#[derive(Debug, Clone, Default)]
pub struct CanonicalTable {
    classes: HashMap<StructuralKey, Vec<NodeId>>,
    len: usize,
}

impl CanonicalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// representatives sharing `key`, oldest first
    pub fn candidates(&self, key: StructuralKey) -> &[NodeId] {
        self.classes.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// register a new representative
    pub fn insert(&mut self, key: StructuralKey, representative: NodeId) {
        log::trace!("new canonical class {} under key {:016x}", representative, key.0);
        self.classes.entry(key).or_default().push(representative);
        self.len += 1;
    }

    /// register `representative` unless it is already listed under `key`
    pub fn insert_if_absent(&mut self, key: StructuralKey, representative: NodeId) -> bool {
        if self.candidates(key).contains(&representative) {
            return false;
        }
        self.insert(key, representative);
        true
    }

    pub fn contains(&self, representative: NodeId) -> bool {
        self.classes.values().any(|reps| reps.contains(&representative))
    }

    /// number of representatives
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn representatives(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.classes.values().flatten().copied()
    }
}
