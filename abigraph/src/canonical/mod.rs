//! canonicalization: one representative node per class of structurally equal
//! types across a whole corpus
//!
//! - `key` hashes the index-free shape of a node into a [`StructuralKey`]
//! - `table` maps keys to the representatives that carry them
//! - `context` holds the comparison stack and the per-node canonical slots,
//!   including the tentative assignments made while propagating
//! - `compare` walks two subgraphs in lockstep and drives the transitions
mod compare;
mod context;
mod key;
mod table;

pub use compare::{Canonicalizer, NodeLookup};
pub use context::{
    CanonicalSlot, CanonicalStats, CanonicalizationContext, ComparisonFrame, DependencySet,
};
pub use key::{StructuralKey, structural_key};
pub use table::CanonicalTable;

use crate::node::{Aggregate, Enumerator, Member};
use serde::{Deserialize, Serialize};

/// whether member and enumerator order takes part in structural equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeclarationOrder {
    /// compare in declaration order
    #[default]
    Significant,
    /// compare struct/union members and enumerators sorted by name. function
    /// parameters always keep their order.
    Sorted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizeOptions {
    /// share canonical identities with sub-nodes met during a comparison
    pub propagate: bool,
    pub declaration_order: DeclarationOrder,
}

impl Default for CanonicalizeOptions {
    fn default() -> Self {
        Self {
            propagate: true,
            declaration_order: DeclarationOrder::Significant,
        }
    }
}

pub(crate) fn ordered_members(agg: &Aggregate, order: DeclarationOrder) -> Vec<&Member> {
    let mut members: Vec<&Member> = agg.members.iter().collect();
    if order == DeclarationOrder::Sorted {
        members.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.bit_offset.cmp(&b.bit_offset))
        });
    }
    members
}

pub(crate) fn ordered_enumerators(
    enumerators: &[Enumerator],
    order: DeclarationOrder,
) -> Vec<&Enumerator> {
    let mut sorted: Vec<&Enumerator> = enumerators.iter().collect();
    if order == DeclarationOrder::Sorted {
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then(a.value.cmp(&b.value)));
    }
    sorted
}
