use super::{CanonicalTable, CanonicalizeOptions, StructuralKey};
use crate::error::{GraphError, Result};
use crate::node::NodeId;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// one `structurally_equal(left, right)` call in progress. unique on the stack,
/// so it also names the recursive marker other nodes may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComparisonFrame {
    pub left: NodeId,
    pub right: NodeId,
}

impl ComparisonFrame {
    pub fn new(left: NodeId, right: NodeId) -> Self {
        Self { left, right }
    }
}

impl std::fmt::Display for ComparisonFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} ~ {})", self.left, self.right)
    }
}

/// markers whose comparison had not finished when a node's equality was
/// established through them
pub type DependencySet = BTreeSet<ComparisonFrame>;

/// canonical reference of one node.
///
/// `Absent -> Tentative -> Confirmed` on success, `Tentative -> Absent` when a
/// marker the assignment relied on turns out unequal. `Confirmed` is final.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CanonicalSlot {
    #[default]
    Absent,
    Tentative {
        canonical: NodeId,
        key: StructuralKey,
        deps: DependencySet,
    },
    Confirmed(NodeId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalStats {
    pub comparisons: u64,
    pub cycles_closed: u64,
    pub shortcuts: u64,
    pub propagated: u64,
    pub confirmed: u64,
    pub cancelled: u64,
}

/// shared state of one corpus' canonicalization. Not thread safe; units of a
/// corpus are canonicalized one after the other.
#[derive(Debug, Default)]
pub struct CanonicalizationContext {
    options: CanonicalizeOptions,
    table: CanonicalTable,
    stack: Vec<ComparisonFrame>,
    on_stack: HashSet<ComparisonFrame>,
    slots: HashMap<NodeId, CanonicalSlot>,
    dependents: HashMap<ComparisonFrame, BTreeSet<NodeId>>,
    pending: BTreeSet<NodeId>,
    stats: CanonicalStats,
}

/// what a finished marker means for one of its dependents
enum Resolution {
    Skip,
    Cancel,
    Confirm(NodeId, StructuralKey),
    Wait,
}

impl CanonicalizationContext {
    pub fn new(options: CanonicalizeOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &CanonicalizeOptions {
        &self.options
    }

    pub fn table(&self) -> &CanonicalTable {
        &self.table
    }

    pub fn stats(&self) -> CanonicalStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CanonicalStats {
        &mut self.stats
    }

    pub fn slot(&self, node: NodeId) -> &CanonicalSlot {
        static ABSENT: CanonicalSlot = CanonicalSlot::Absent;
        self.slots.get(&node).unwrap_or(&ABSENT)
    }

    /// canonical of `node` if it is permanent
    pub fn confirmed(&self, node: NodeId) -> Option<NodeId> {
        match self.slots.get(&node) {
            Some(CanonicalSlot::Confirmed(canonical)) => Some(*canonical),
            _ => None,
        }
    }

    /// dependency set of a tentative node, empty otherwise
    pub fn dependencies(&self, node: NodeId) -> DependencySet {
        match self.slots.get(&node) {
            Some(CanonicalSlot::Tentative { deps, .. }) => deps.clone(),
            _ => DependencySet::new(),
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pending.iter().copied()
    }

    pub fn is_on_stack(&self, frame: &ComparisonFrame) -> bool {
        self.on_stack.contains(frame)
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn push(&mut self, frame: ComparisonFrame) {
        self.on_stack.insert(frame);
        self.stack.push(frame);
    }

    pub(crate) fn pop(&mut self, frame: ComparisonFrame) -> Result<()> {
        match self.stack.pop() {
            Some(top) if top == frame => {
                self.on_stack.remove(&frame);
                Ok(())
            }
            Some(top) => Err(GraphError::invariant(format!(
                "popped comparison {top} while finishing {frame}"
            ))),
            None => Err(GraphError::invariant(format!(
                "comparison stack empty while finishing {frame}"
            ))),
        }
    }

    /// share `canonical` with `node`, which was found equal to a node carrying
    /// it. with no dependencies the assignment is permanent at once.
    pub fn propagate(
        &mut self,
        node: NodeId,
        canonical: NodeId,
        key: StructuralKey,
        deps: &DependencySet,
    ) -> Result<()> {
        if let Some(marker) = deps.iter().find(|m| !self.on_stack.contains(m)) {
            return Err(GraphError::invariant(format!(
                "{node} depends on {marker}, which is not being compared"
            )));
        }

        match self.slots.get_mut(&node) {
            Some(CanonicalSlot::Confirmed(_)) => return Ok(()),
            Some(CanonicalSlot::Tentative {
                canonical: existing,
                key: existing_key,
                deps: existing_deps,
            }) => {
                if deps.is_empty() {
                    // now known equal without conditions
                    let (canonical, key) = (*existing, *existing_key);
                    self.clear(node);
                    return self.confirm(node, canonical, key);
                }
                existing_deps.extend(deps.iter().copied());
            }
            _ => {
                self.stats.propagated += 1;
                if deps.is_empty() {
                    return self.confirm(node, canonical, key);
                }
                log::trace!("tentative {} -> {} on {} markers", node, canonical, deps.len());
                self.slots.insert(
                    node,
                    CanonicalSlot::Tentative {
                        canonical,
                        key,
                        deps: deps.clone(),
                    },
                );
                self.pending.insert(node);
            }
        }

        for marker in deps {
            self.dependents.entry(*marker).or_default().insert(node);
        }
        Ok(())
    }

    /// make `canonical` the permanent representative of `node`
    pub fn confirm(&mut self, node: NodeId, canonical: NodeId, key: StructuralKey) -> Result<()> {
        match self.slots.get(&node) {
            Some(CanonicalSlot::Confirmed(existing)) if *existing == canonical => return Ok(()),
            Some(CanonicalSlot::Confirmed(existing)) => {
                return Err(GraphError::invariant(format!(
                    "{node} is confirmed as {existing}, cannot confirm as {canonical}"
                )));
            }
            Some(CanonicalSlot::Tentative { deps, .. }) if !deps.is_empty() => {
                return Err(GraphError::invariant(format!(
                    "{node} confirmed with {} unresolved dependencies",
                    deps.len()
                )));
            }
            _ => {}
        }

        self.pending.remove(&node);
        self.slots.insert(node, CanonicalSlot::Confirmed(canonical));
        self.table.insert_if_absent(key, canonical);
        self.stats.confirmed += 1;
        Ok(())
    }

    /// drop a tentative assignment; the node will be canonicalized from scratch
    pub fn cancel(&mut self, node: NodeId) {
        if matches!(self.slots.get(&node), Some(CanonicalSlot::Tentative { .. })) {
            log::trace!("cancel tentative canonical of {}", node);
            self.clear(node);
            self.stats.cancelled += 1;
        }
    }

    fn clear(&mut self, node: NodeId) {
        self.slots.remove(&node);
        self.pending.remove(&node);
    }

    /// the comparison named by `marker` finished. if it found the pair equal,
    /// its dependents trade the marker for `residual`, the markers the
    /// comparison itself still relies on, and are confirmed once nothing is
    /// left. otherwise every dependent is cancelled.
    pub fn resolve_marker(
        &mut self,
        marker: ComparisonFrame,
        equal: bool,
        residual: &DependencySet,
    ) -> Result<()> {
        let Some(dependents) = self.dependents.remove(&marker) else {
            return Ok(());
        };

        for node in dependents {
            let resolution = match self.slots.get_mut(&node) {
                Some(CanonicalSlot::Tentative {
                    canonical,
                    key,
                    deps,
                }) => {
                    if !deps.remove(&marker) {
                        // relies on this marker no longer
                        Resolution::Skip
                    } else if !equal {
                        Resolution::Cancel
                    } else {
                        deps.extend(residual.iter().copied());
                        if deps.is_empty() {
                            Resolution::Confirm(*canonical, *key)
                        } else {
                            Resolution::Wait
                        }
                    }
                }
                // cancelled or confirmed through another path since
                _ => Resolution::Skip,
            };

            match resolution {
                Resolution::Skip => {}
                Resolution::Cancel => self.cancel(node),
                Resolution::Confirm(canonical, key) => self.confirm(node, canonical, key)?,
                Resolution::Wait => {
                    for next in residual {
                        self.dependents.entry(*next).or_default().insert(node);
                    }
                }
            }
        }
        Ok(())
    }

    /// state between two top-level calls: nothing on the stack, nothing
    /// tentative, nobody waiting on a marker
    pub fn ensure_quiescent(&self) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(GraphError::invariant(format!(
                "{} comparisons still on the stack",
                self.stack.len()
            )));
        }
        if let Some(node) = self.pending.first() {
            return Err(GraphError::invariant(format!(
                "{node} still has a tentative canonical ({} pending)",
                self.pending.len()
            )));
        }
        if !self.dependents.is_empty() {
            return Err(GraphError::invariant(format!(
                "{} markers still have dependents",
                self.dependents.len()
            )));
        }
        Ok(())
    }
}
