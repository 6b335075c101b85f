use super::context::{CanonicalizationContext, ComparisonFrame, DependencySet};
use super::key::{Shape, structural_children, structural_key};
use crate::error::{GraphError, Result};
use crate::node::{NodeId, TypeNode};

/// read access to the nodes of every unit taking part in canonicalization
pub trait NodeLookup {
    fn lookup(&self, id: NodeId) -> Option<&TypeNode>;
}

/// result of comparing one pair. `deps` lists the frames still open whose
/// assumed equality the result relies on.
#[derive(Debug)]
struct Comparison {
    equal: bool,
    deps: DependencySet,
}

impl Comparison {
    fn equal() -> Self {
        Self {
            equal: true,
            deps: DependencySet::new(),
        }
    }

    fn unequal() -> Self {
        Self {
            equal: false,
            deps: DependencySet::new(),
        }
    }

    /// the pair is already being compared further up: assume equal
    fn assumed(frame: ComparisonFrame) -> Self {
        Self {
            equal: true,
            deps: DependencySet::from([frame]),
        }
    }
}

/// cycle-aware structural comparison and canonical assignment over the nodes
/// of `nodes`, with all state kept in `ctx`
pub struct Canonicalizer<'a, L: NodeLookup + ?Sized> {
    nodes: &'a L,
    ctx: &'a mut CanonicalizationContext,
    propagate: bool,
}

impl<'a, L: NodeLookup + ?Sized> Canonicalizer<'a, L> {
    pub fn new(nodes: &'a L, ctx: &'a mut CanonicalizationContext) -> Self {
        let propagate = ctx.options().propagate;
        Self {
            nodes,
            ctx,
            propagate,
        }
    }

    /// representative of `node`'s class, making `node` one if no existing
    /// representative is structurally equal to it
    pub fn canonicalize(&mut self, node: NodeId) -> Result<NodeId> {
        if let Some(canonical) = self.ctx.confirmed(node) {
            return Ok(canonical);
        }
        self.ctx.ensure_quiescent()?;

        let order = self.ctx.options().declaration_order;
        let key = structural_key(self.node(node)?, order)?;
        let candidates = self.ctx.table().candidates(key).to_vec();

        for candidate in candidates {
            let outcome = self.compare(node, candidate)?;
            if !outcome.equal {
                continue;
            }
            if !outcome.deps.is_empty() {
                return Err(GraphError::invariant(format!(
                    "top-level comparison of {node} left {} open markers",
                    outcome.deps.len()
                )));
            }

            let canonical = self.ctx.confirmed(candidate).unwrap_or(candidate);
            self.ctx.confirm(node, canonical, key)?;
            self.ctx.ensure_quiescent()?;
            log::trace!("{:>12} {} -> {}", "canonical", node, canonical);
            return Ok(canonical);
        }

        self.ctx.confirm(node, node, key)?;
        self.ctx.ensure_quiescent()?;
        log::trace!("{:>12} {} (new class)", "canonical", node);
        Ok(node)
    }

    /// cycle-aware equality of the subgraphs rooted at `left` and `right`.
    /// never propagates canonical identities.
    pub fn structurally_equal(&mut self, left: NodeId, right: NodeId) -> Result<bool> {
        self.ctx.ensure_quiescent()?;

        let propagate = std::mem::replace(&mut self.propagate, false);
        let outcome = self.compare(left, right);
        self.propagate = propagate;

        let outcome = outcome?;
        self.ctx.ensure_quiescent()?;
        Ok(outcome.equal)
    }

    fn node(&self, id: NodeId) -> Result<&'a TypeNode> {
        let nodes: &'a L = self.nodes;
        nodes
            .lookup(id)
            .ok_or_else(|| GraphError::invariant(format!("{id} does not name a node")))
    }

    /// recurses once per child pair with no depth limit; a path of distinct
    /// unconfirmed pairs is bounded only by the size of the graphs
    fn compare(&mut self, left: NodeId, right: NodeId) -> Result<Comparison> {
        if left == right {
            return Ok(Comparison::equal());
        }
        self.ctx.stats_mut().comparisons += 1;

        // both settled: same class or not, nothing to walk
        if let (Some(l), Some(r)) = (self.ctx.confirmed(left), self.ctx.confirmed(right)) {
            self.ctx.stats_mut().shortcuts += 1;
            return Ok(if l == r {
                Comparison::equal()
            } else {
                Comparison::unequal()
            });
        }

        let frame = ComparisonFrame::new(left, right);
        if self.ctx.is_on_stack(&frame) {
            self.ctx.stats_mut().cycles_closed += 1;
            return Ok(Comparison::assumed(frame));
        }

        let order = self.ctx.options().declaration_order;
        let (left_node, right_node) = (self.node(left)?, self.node(right)?);
        if Shape::of(left_node, order) != Shape::of(right_node, order) {
            return Ok(Comparison::unequal());
        }

        let pairs: Vec<(NodeId, NodeId)> = structural_children(left_node, order)
            .into_iter()
            .zip(structural_children(right_node, order))
            .map(|(l, r)| (left.sibling(l), right.sibling(r)))
            .collect();

        self.ctx.push(frame);
        let mut equal = true;
        let mut deps = DependencySet::new();
        for (l, r) in pairs {
            let outcome = self.compare(l, r)?;
            if !outcome.equal {
                equal = false;
                break;
            }
            deps.extend(outcome.deps);
        }
        self.ctx.pop(frame)?;
        deps.remove(&frame);

        if self.propagate {
            self.ctx.resolve_marker(frame, equal, &deps)?;
        }
        if !equal {
            return Ok(Comparison::unequal());
        }

        if self.propagate
            && let Some(canonical) = self.ctx.confirmed(right)
        {
            let key = structural_key(left_node, order)?;
            self.ctx.propagate(left, canonical, key, &deps)?;
        }

        Ok(Comparison { equal: true, deps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::canonical::{CanonicalSlot, CanonicalizeOptions};
    use crate::node::{Aggregate, BaseEncoding, Member, NodeIndex, UnitId};

    struct Units(Vec<NodeArena>);

    impl NodeLookup for Units {
        fn lookup(&self, id: NodeId) -> Option<&TypeNode> {
            self.0.get(id.unit.0 as usize)?.get(id.index)
        }
    }

    fn id(unit: u32, index: u32) -> NodeId {
        NodeId::new(UnitId(unit), NodeIndex(index))
    }

    /// [int, struct <name> { int value; struct <name> *next; }, pointer]
    fn list_unit(name: &str, payload_bits: u64) -> NodeArena {
        let mut arena = NodeArena::new();
        let payload = arena.push(TypeNode::Base {
            name: "int".to_string(),
            size_bits: payload_bits,
            align_bits: payload_bits,
            encoding: BaseEncoding::Signed,
        });
        let list = arena.push(TypeNode::Struct(Aggregate {
            name: name.to_string(),
            size_bits: 128,
            align_bits: 64,
            members: Vec::new(),
            ..Aggregate::default()
        }));
        let ptr = arena.push(TypeNode::Pointer {
            target: list,
            size_bits: 64,
            align_bits: 64,
        });
        if let Some(TypeNode::Struct(agg)) = arena.get_mut(list) {
            agg.members = vec![
                Member {
                    name: "value".to_string(),
                    type_ref: payload,
                    bit_offset: 0,
                    is_static: false,
                },
                Member {
                    name: "next".to_string(),
                    type_ref: ptr,
                    bit_offset: 64,
                    is_static: false,
                },
            ];
        }
        arena
    }

    fn canonicalize_all(units: &Units, ctx: &mut CanonicalizationContext) -> Vec<NodeId> {
        let mut canonicalizer = Canonicalizer::new(units, ctx);
        let mut result = Vec::new();
        for (unit, arena) in units.0.iter().enumerate() {
            for (index, _) in arena.iter() {
                let node = NodeId::new(UnitId(unit as u32), index);
                result.push(canonicalizer.canonicalize(node).unwrap());
            }
        }
        result
    }

    #[test]
    fn test_recursive_lists_unify_across_units() {
        let units = Units(vec![list_unit("list", 32), list_unit("list", 32)]);
        let mut ctx = CanonicalizationContext::new(CanonicalizeOptions::default());
        let canon = canonicalize_all(&units, &mut ctx);

        // second unit maps slot by slot onto the first
        assert_eq!(&canon[3..], &canon[..3]);
        assert_eq!(ctx.table().len(), 3);
        ctx.ensure_quiescent().unwrap();
    }

    #[test]
    fn test_propagation_confirms_sub_nodes() {
        let units = Units(vec![list_unit("list", 32), list_unit("list", 32)]);
        let mut ctx = CanonicalizationContext::new(CanonicalizeOptions::default());
        {
            let mut canonicalizer = Canonicalizer::new(&units, &mut ctx);
            for index in 0..3 {
                canonicalizer.canonicalize(id(0, index)).unwrap();
            }
            // only the struct of unit 1 is asked for
            assert_eq!(canonicalizer.canonicalize(id(1, 1)).unwrap(), id(0, 1));
        }

        // its pointer got the identity on the way through the cycle
        assert_eq!(ctx.slot(id(1, 2)), &CanonicalSlot::Confirmed(id(0, 2)));
        assert!(ctx.dependencies(id(1, 2)).is_empty());
        assert!(ctx.stats().propagated > 0);
    }

    #[test]
    fn test_failed_comparison_leaves_nothing_tentative() {
        let units = Units(vec![list_unit("list", 32), list_unit("list", 64)]);
        let mut ctx = CanonicalizationContext::new(CanonicalizeOptions::default());
        let canon = canonicalize_all(&units, &mut ctx);

        assert_ne!(canon[4], canon[1]);
        assert_ne!(canon[5], canon[2]);
        assert_eq!(ctx.pending().count(), 0);
        ctx.ensure_quiescent().unwrap();
    }

    #[test]
    fn test_structural_equality_is_symmetric_and_pure() {
        let units = Units(vec![list_unit("list", 32), list_unit("list", 32)]);
        let mut ctx = CanonicalizationContext::new(CanonicalizeOptions::default());
        let mut canonicalizer = Canonicalizer::new(&units, &mut ctx);

        assert!(canonicalizer.structurally_equal(id(0, 1), id(1, 1)).unwrap());
        assert!(canonicalizer.structurally_equal(id(1, 1), id(0, 1)).unwrap());
        assert!(canonicalizer.structurally_equal(id(0, 2), id(0, 2)).unwrap());
        assert!(!canonicalizer.structurally_equal(id(0, 0), id(1, 2)).unwrap());
        drop(canonicalizer);

        assert!(ctx.table().is_empty());
        assert_eq!(ctx.confirmed(id(1, 1)), None);
    }

    #[test]
    fn test_dangling_reference_is_invariant_violation() {
        let units = Units(vec![list_unit("list", 32)]);
        let mut ctx = CanonicalizationContext::default();
        let mut canonicalizer = Canonicalizer::new(&units, &mut ctx);

        let err = canonicalizer.canonicalize(id(3, 0)).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
