//! foreign type descriptors, the input side of the graph builder
//!
//! A descriptor is what a debug-information reader knows about one type entry:
//! its kind, a few leaf attributes and the ids of the entries it refers to.
//! Readers hand descriptors to the builder through [`TypeSource`].
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::node::{BaseEncoding, Qualifiers};

/// id of an entry in the foreign source, e.g. a unit-relative DWARF offset
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ForeignId(pub u64);

impl fmt::Display for ForeignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorKind {
    Base,
    Typedef,
    Pointer,
    Qualified,
    Array,
    Function,
    Struct,
    Union,
    Enum,
    /// an entry the reader does not know how to describe; carries the raw tag
    Unsupported(u16),
}

impl DescriptorKind {
    pub fn is_aggregate(self) -> bool {
        matches!(self, DescriptorKind::Struct | DescriptorKind::Union)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: Option<String>,
    pub type_id: ForeignId,
    pub bit_offset: u64,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratorDescriptor {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionDescriptor {
    /// `None` for functions returning void
    pub return_id: Option<ForeignId>,
    pub parameter_ids: Vec<ForeignId>,
    pub is_variadic: bool,
}

/// one array dimension
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubrangeDescriptor {
    pub index_type: Option<ForeignId>,
    pub lower_bound: i64,
    /// inclusive upper bound, `None` when the dimension is unbounded
    pub upper_bound: Option<i64>,
}

impl SubrangeDescriptor {
    pub fn with_count(count: u64) -> Self {
        Self {
            index_type: None,
            lower_bound: 0,
            upper_bound: count
                .checked_sub(1)
                .map(|last| i64::try_from(last).unwrap_or(i64::MAX)),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// everything known about one foreign type entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    id: ForeignId,
    kind: DescriptorKind,
    name: Option<String>,
    referenced: Option<ForeignId>,
    size_bits: Option<u64>,
    align_bits: Option<u64>,
    encoding: Option<BaseEncoding>,
    qualifiers: Qualifiers,
    members: Vec<MemberDescriptor>,
    enumerators: Vec<EnumeratorDescriptor>,
    function: Option<FunctionDescriptor>,
    subranges: Vec<SubrangeDescriptor>,
    declaration_only: bool,
    artificial: bool,
    defect: Option<String>,
}

impl TypeDescriptor {
    pub fn new(id: ForeignId, kind: DescriptorKind) -> Self {
        Self {
            id,
            kind,
            name: None,
            referenced: None,
            size_bits: None,
            align_bits: None,
            encoding: None,
            qualifiers: Qualifiers::default(),
            members: Vec::new(),
            enumerators: Vec::new(),
            function: None,
            subranges: Vec::new(),
            declaration_only: false,
            artificial: false,
            defect: None,
        }
    }

    pub fn base(id: u64, name: &str, size_bits: u64, encoding: BaseEncoding) -> Self {
        Self::new(ForeignId(id), DescriptorKind::Base)
            .with_name(name)
            .with_size_bits(size_bits)
            .with_align_bits(size_bits)
            .with_encoding(encoding)
    }

    pub fn typedef(id: u64, name: &str, underlying: u64) -> Self {
        Self::new(ForeignId(id), DescriptorKind::Typedef)
            .with_name(name)
            .with_referenced(ForeignId(underlying))
    }

    /// pointer to `target`, or `void*` when `target` is `None`
    pub fn pointer(id: u64, target: Option<u64>, size_bits: u64) -> Self {
        let mut desc = Self::new(ForeignId(id), DescriptorKind::Pointer)
            .with_size_bits(size_bits)
            .with_align_bits(size_bits);
        desc.referenced = target.map(ForeignId);
        desc
    }

    pub fn qualified(id: u64, underlying: Option<u64>, qualifiers: Qualifiers) -> Self {
        let mut desc = Self::new(ForeignId(id), DescriptorKind::Qualified);
        desc.referenced = underlying.map(ForeignId);
        desc.qualifiers = qualifiers;
        desc
    }

    pub fn array(id: u64, element: u64, subranges: Vec<SubrangeDescriptor>) -> Self {
        let mut desc =
            Self::new(ForeignId(id), DescriptorKind::Array).with_referenced(ForeignId(element));
        desc.subranges = subranges;
        desc
    }

    pub fn function(id: u64, return_id: Option<u64>, parameter_ids: &[u64], is_variadic: bool) -> Self {
        let mut desc = Self::new(ForeignId(id), DescriptorKind::Function);
        desc.function = Some(FunctionDescriptor {
            return_id: return_id.map(ForeignId),
            parameter_ids: parameter_ids.iter().copied().map(ForeignId).collect(),
            is_variadic,
        });
        desc
    }

    pub fn structure(id: u64, name: &str, size_bits: u64, align_bits: u64) -> Self {
        Self::new(ForeignId(id), DescriptorKind::Struct)
            .with_name(name)
            .with_size_bits(size_bits)
            .with_align_bits(align_bits)
    }

    pub fn union(id: u64, name: &str, size_bits: u64, align_bits: u64) -> Self {
        Self::new(ForeignId(id), DescriptorKind::Union)
            .with_name(name)
            .with_size_bits(size_bits)
            .with_align_bits(align_bits)
    }

    pub fn enumeration(id: u64, name: &str, underlying: Option<u64>, size_bits: u64) -> Self {
        let mut desc = Self::new(ForeignId(id), DescriptorKind::Enum)
            .with_name(name)
            .with_size_bits(size_bits)
            .with_align_bits(size_bits);
        desc.referenced = underlying.map(ForeignId);
        desc
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        self
    }

    pub fn with_referenced(mut self, id: ForeignId) -> Self {
        self.referenced = Some(id);
        self
    }

    pub fn with_size_bits(mut self, size_bits: u64) -> Self {
        self.size_bits = Some(size_bits);
        self
    }

    pub fn with_align_bits(mut self, align_bits: u64) -> Self {
        self.align_bits = Some(align_bits);
        self
    }

    pub fn with_encoding(mut self, encoding: BaseEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_qualifiers(mut self, qualifiers: Qualifiers) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    pub fn with_member(mut self, name: &str, type_id: u64, bit_offset: u64) -> Self {
        self.members.push(MemberDescriptor {
            name: (!name.is_empty()).then(|| name.to_string()),
            type_id: ForeignId(type_id),
            bit_offset,
            is_static: false,
        });
        self
    }

    pub fn with_static_member(mut self, name: &str, type_id: u64) -> Self {
        self.members.push(MemberDescriptor {
            name: Some(name.to_string()),
            type_id: ForeignId(type_id),
            bit_offset: 0,
            is_static: true,
        });
        self
    }

    pub fn with_member_descriptor(mut self, member: MemberDescriptor) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_enumerator(mut self, name: &str, value: i64) -> Self {
        self.enumerators.push(EnumeratorDescriptor {
            name: name.to_string(),
            value,
        });
        self
    }

    pub fn with_function(mut self, function: FunctionDescriptor) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_subrange(mut self, subrange: SubrangeDescriptor) -> Self {
        self.subranges.push(subrange);
        self
    }

    pub fn declaration_only(mut self) -> Self {
        self.declaration_only = true;
        self
    }

    pub fn artificial(mut self) -> Self {
        self.artificial = true;
        self
    }

    /// the reader found the entry unusable; the builder reports it as
    /// malformed instead of building it
    pub fn malformed(mut self, reason: impl Into<String>) -> Self {
        self.defect = Some(reason.into());
        self
    }

    pub fn id(&self) -> ForeignId {
        self.id
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// target of a pointer/qualifier/typedef, element of an array, underlying
    /// integer of an enum
    pub fn referenced_id(&self) -> Option<ForeignId> {
        self.referenced
    }

    pub fn size_bits(&self) -> Option<u64> {
        self.size_bits
    }

    pub fn align_bits(&self) -> Option<u64> {
        self.align_bits
    }

    pub fn encoding(&self) -> Option<BaseEncoding> {
        self.encoding
    }

    pub fn qualifiers(&self) -> Qualifiers {
        self.qualifiers
    }

    pub fn defect(&self) -> Option<&str> {
        self.defect.as_deref()
    }

    /// members in declaration order; restartable
    pub fn members(&self) -> impl Iterator<Item = &MemberDescriptor> + '_ {
        self.members.iter()
    }

    pub fn enumerators(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.enumerators.iter().map(|e| (e.name.as_str(), e.value))
    }

    pub fn function_info(&self) -> Option<&FunctionDescriptor> {
        self.function.as_ref()
    }

    pub fn subranges(&self) -> &[SubrangeDescriptor] {
        &self.subranges
    }

    pub fn is_declaration_only(&self) -> bool {
        self.declaration_only
    }

    pub fn is_artificial(&self) -> bool {
        self.artificial
    }
}

/// lookup seam between a foreign reader and the graph builder
pub trait TypeSource {
    fn descriptor(&self, id: ForeignId) -> Option<&TypeDescriptor>;
}

/// in-memory descriptor set, keeps insertion order
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    descriptors: HashMap<ForeignId, TypeDescriptor>,
    order: Vec<ForeignId>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert or replace the descriptor with the same id
    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        let id = descriptor.id();
        if self.descriptors.insert(id, descriptor).is_none() {
            self.order.push(id);
        } else {
            log::trace!("replaced descriptor {}", id);
        }
    }

    pub fn with(mut self, descriptor: TypeDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = ForeignId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl TypeSource for DescriptorTable {
    fn descriptor(&self, id: ForeignId) -> Option<&TypeDescriptor> {
        self.descriptors.get(&id)
    }
}

impl FromIterator<TypeDescriptor> for DescriptorTable {
    fn from_iter<I: IntoIterator<Item = TypeDescriptor>>(iter: I) -> Self {
        let mut table = DescriptorTable::new();
        for descriptor in iter {
            table.insert(descriptor);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_keeps_insertion_order() {
        let table: DescriptorTable = [
            TypeDescriptor::base(30, "int", 32, BaseEncoding::Signed),
            TypeDescriptor::pointer(10, Some(30), 64),
            TypeDescriptor::structure(20, "s", 64, 64).with_member("p", 10, 0),
        ]
        .into_iter()
        .collect();

        let ids: Vec<_> = table.ids().collect();
        assert_eq!(ids, vec![ForeignId(30), ForeignId(10), ForeignId(20)]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_replacing_descriptor_keeps_single_entry() {
        let mut table = DescriptorTable::new();
        table.insert(TypeDescriptor::base(1, "int", 32, BaseEncoding::Signed));
        table.insert(TypeDescriptor::base(1, "long", 64, BaseEncoding::Signed));

        assert_eq!(table.len(), 1);
        let desc = table.descriptor(ForeignId(1)).unwrap();
        assert_eq!(desc.name(), Some("long"));
    }

    #[test]
    fn test_members_are_restartable() {
        let desc = TypeDescriptor::structure(1, "pair", 64, 32)
            .with_member("a", 2, 0)
            .with_member("b", 2, 32);

        let first: Vec<_> = desc.members().map(|m| m.bit_offset).collect();
        let second: Vec<_> = desc.members().map(|m| m.bit_offset).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 32]);
    }

    #[test]
    fn test_static_member_has_no_offset() {
        let desc = TypeDescriptor::structure(1, "counter", 32, 32)
            .with_member("value", 2, 0)
            .with_static_member("instances", 2);

        assert!(desc.kind().is_aggregate());
        assert!(!DescriptorKind::Enum.is_aggregate());
        let statics: Vec<_> = desc.members().filter(|m| m.is_static).collect();
        assert_eq!(statics.len(), 1);
        assert_eq!(statics[0].name.as_deref(), Some("instances"));
        assert_eq!(statics[0].bit_offset, 0);
    }

    #[test]
    fn test_subrange_count() {
        assert_eq!(SubrangeDescriptor::with_count(4).upper_bound, Some(3));
        assert_eq!(SubrangeDescriptor::with_count(0).upper_bound, None);
    }
}
