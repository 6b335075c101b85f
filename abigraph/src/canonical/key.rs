use super::{DeclarationOrder, ordered_enumerators, ordered_members};
use crate::error::{GraphError, Result};
use crate::node::{BaseEncoding, NodeIndex, Qualifiers, TypeNode};
use serde::Serialize;
use std::hash::{Hash, Hasher};

/// hash of a node's shallow shape. structurally equal nodes always share a key;
/// distinct shapes almost never do, and the table tolerates it when they do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StructuralKey(pub u64);

/// everything about a node that is compared without recursing. holds no arena
/// index, so nodes from different units with the same shape serialize alike.
#[derive(Serialize, PartialEq, Eq, Debug)]
pub(crate) enum Shape<'n> {
    Base {
        name: &'n str,
        size_bits: u64,
        align_bits: u64,
        encoding: BaseEncoding,
    },
    Typedef {
        name: &'n str,
    },
    Pointer {
        size_bits: u64,
        align_bits: u64,
    },
    Qualified {
        qualifiers: Qualifiers,
    },
    Array {
        lower_bound: i64,
        upper_bound: i64,
        is_unbounded: bool,
        has_index_type: bool,
    },
    Function {
        arity: usize, // order matters (calling convention)
        is_variadic: bool,
        size_bits: u64,
        align_bits: u64,
    },
    Struct(AggregateShape<'n>),
    Union(AggregateShape<'n>),
    Enum {
        name: &'n str,
        enumerators: Vec<(&'n str, i64)>,
    },
}

#[derive(Serialize, PartialEq, Eq, Debug)]
pub(crate) struct AggregateShape<'n> {
    name: &'n str,
    size_bits: u64,
    align_bits: u64,
    is_anonymous: bool,
    is_declaration_only: bool,
    members: Vec<MemberShape<'n>>,
}

#[derive(Serialize, PartialEq, Eq, Debug)]
struct MemberShape<'n> {
    name: &'n str,
    bit_offset: u64,
    is_static: bool,
}

impl<'n> Shape<'n> {
    pub(crate) fn of(node: &'n TypeNode, order: DeclarationOrder) -> Self {
        match node {
            TypeNode::Base {
                name,
                size_bits,
                align_bits,
                encoding,
            } => Shape::Base {
                name: name.as_str(),
                size_bits: *size_bits,
                align_bits: *align_bits,
                encoding: *encoding,
            },
            TypeNode::Typedef { name, .. } => Shape::Typedef {
                name: name.as_str(),
            },
            TypeNode::Pointer {
                size_bits,
                align_bits,
                ..
            } => Shape::Pointer {
                size_bits: *size_bits,
                align_bits: *align_bits,
            },
            TypeNode::Qualified { qualifiers, .. } => Shape::Qualified {
                qualifiers: *qualifiers,
            },
            TypeNode::Array {
                index_type,
                lower_bound,
                upper_bound,
                is_unbounded,
                ..
            } => Shape::Array {
                lower_bound: *lower_bound,
                upper_bound: *upper_bound,
                is_unbounded: *is_unbounded,
                has_index_type: index_type.is_some(),
            },
            TypeNode::Function {
                parameters,
                is_variadic,
                size_bits,
                align_bits,
                ..
            } => Shape::Function {
                arity: parameters.len(),
                is_variadic: *is_variadic,
                size_bits: *size_bits,
                align_bits: *align_bits,
            },
            TypeNode::Struct(agg) => Shape::Struct(AggregateShape::of(agg, order)),
            TypeNode::Union(agg) => Shape::Union(AggregateShape::of(agg, order)),
            TypeNode::Enum {
                name, enumerators, ..
            } => Shape::Enum {
                name: name.as_str(),
                enumerators: ordered_enumerators(enumerators, order)
                    .into_iter()
                    .map(|e| (e.name.as_str(), e.value))
                    .collect(),
            },
        }
    }
}

impl<'n> AggregateShape<'n> {
    fn of(agg: &'n crate::node::Aggregate, order: DeclarationOrder) -> Self {
        Self {
            name: agg.name.as_str(),
            size_bits: agg.size_bits,
            align_bits: agg.align_bits,
            is_anonymous: agg.is_anonymous,
            is_declaration_only: agg.is_declaration_only,
            members: ordered_members(agg, order)
                .into_iter()
                .map(|m| MemberShape {
                    name: m.name.as_str(),
                    bit_offset: m.bit_offset,
                    is_static: m.is_static,
                })
                .collect(),
        }
    }
}

/// sub-nodes compared pairwise after the shapes matched, in the same order
/// the shape lists them
pub(crate) fn structural_children(node: &TypeNode, order: DeclarationOrder) -> Vec<NodeIndex> {
    match node {
        TypeNode::Struct(agg) | TypeNode::Union(agg) => ordered_members(agg, order)
            .into_iter()
            .map(|m| m.type_ref)
            .collect(),
        _ => node.references(),
    }
}

pub fn structural_key(node: &TypeNode, order: DeclarationOrder) -> Result<StructuralKey> {
    use bincode::Options;
    use std::collections::hash_map::DefaultHasher;

    let shape = Shape::of(node, order);

    let bytes = bincode::DefaultOptions::new()
        .with_fixint_encoding() // Ensure consistent integer encoding
        .serialize(&shape)
        .map_err(|err| GraphError::invariant(format!("shape serialization failed: {err}")))?;

    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(StructuralKey(hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Aggregate, Enumerator, Member};

    fn point(x_ref: u32, y_offset: u64) -> TypeNode {
        TypeNode::Struct(Aggregate {
            name: "point".to_string(),
            size_bits: 64,
            align_bits: 32,
            is_anonymous: false,
            is_declaration_only: false,
            members: vec![
                Member {
                    name: "x".to_string(),
                    type_ref: NodeIndex(x_ref),
                    bit_offset: 0,
                    is_static: false,
                },
                Member {
                    name: "y".to_string(),
                    type_ref: NodeIndex(x_ref),
                    bit_offset: y_offset,
                    is_static: false,
                },
            ],
        })
    }

    #[test]
    fn test_key_ignores_arena_indices() {
        let a = structural_key(&point(0, 32), DeclarationOrder::Significant).unwrap();
        let b = structural_key(&point(7, 32), DeclarationOrder::Significant).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_sees_member_offsets() {
        let a = structural_key(&point(0, 32), DeclarationOrder::Significant).unwrap();
        let b = structural_key(&point(0, 40), DeclarationOrder::Significant).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_enumerator_order_depends_on_policy() {
        let make = |first: (&str, i64), second: (&str, i64)| TypeNode::Enum {
            name: "E".to_string(),
            underlying: NodeIndex(0),
            enumerators: vec![
                Enumerator {
                    name: first.0.to_string(),
                    value: first.1,
                },
                Enumerator {
                    name: second.0.to_string(),
                    value: second.1,
                },
            ],
        };
        let ab = make(("A", 1), ("B", 2));
        let ba = make(("B", 2), ("A", 1));

        assert_ne!(
            structural_key(&ab, DeclarationOrder::Significant).unwrap(),
            structural_key(&ba, DeclarationOrder::Significant).unwrap()
        );
        assert_eq!(
            structural_key(&ab, DeclarationOrder::Sorted).unwrap(),
            structural_key(&ba, DeclarationOrder::Sorted).unwrap()
        );
    }

    #[test]
    fn test_struct_and_union_shapes_differ() {
        let TypeNode::Struct(agg) = point(0, 32) else {
            unreachable!()
        };
        let as_union = TypeNode::Union(agg.clone());
        let as_struct = TypeNode::Struct(agg);
        assert_ne!(
            Shape::of(&as_union, DeclarationOrder::Significant),
            Shape::of(&as_struct, DeclarationOrder::Significant)
        );
    }
}
