//! type nodes stored in a unit's arena
use serde::{Deserialize, Serialize};
use std::fmt;

/// slot of a node inside its unit's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// position of a translation unit inside a corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnitId(pub u32);

/// corpus-wide handle of a node: which unit, which slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId {
    pub unit: UnitId,
    pub index: NodeIndex,
}

impl NodeId {
    pub fn new(unit: UnitId, index: NodeIndex) -> Self {
        Self { unit, index }
    }

    /// a node referenced from this one lives in the same unit
    pub fn sibling(self, index: NodeIndex) -> Self {
        Self {
            unit: self.unit,
            index,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}#{}", self.unit.0, self.index.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseEncoding {
    Void,
    Boolean,
    Signed,
    Unsigned,
    SignedChar,
    UnsignedChar,
    Float,
    /// raw encoding value the reader did not map
    Other(u8),
}

/// cv-flags of a qualified type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Qualifiers {
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_restrict: bool,
}

impl Qualifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn with_volatile(mut self) -> Self {
        self.is_volatile = true;
        self
    }

    pub fn with_restrict(mut self) -> Self {
        self.is_restrict = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        !(self.is_const || self.is_volatile || self.is_restrict)
    }

    pub fn union(self, other: Qualifiers) -> Self {
        Self {
            is_const: self.is_const || other.is_const,
            is_volatile: self.is_volatile || other.is_volatile,
            is_restrict: self.is_restrict || other.is_restrict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// empty for anonymous members
    pub name: String,
    pub type_ref: NodeIndex,
    pub bit_offset: u64,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    Base,
    Typedef,
    Pointer,
    Qualified,
    Array,
    Function,
    Struct,
    Union,
    Enum,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Base => "base",
            NodeKind::Typedef => "typedef",
            NodeKind::Pointer => "pointer",
            NodeKind::Qualified => "qualified",
            NodeKind::Array => "array",
            NodeKind::Function => "function",
            NodeKind::Struct => "struct",
            NodeKind::Union => "union",
            NodeKind::Enum => "enum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeNode {
    /// int, float, char, void, ...
    Base {
        name: String,
        size_bits: u64,
        align_bits: u64,
        encoding: BaseEncoding,
    },

    Typedef {
        name: String,
        underlying: NodeIndex,
    },

    Pointer {
        target: NodeIndex,
        size_bits: u64,
        align_bits: u64,
    },

    Qualified {
        underlying: NodeIndex,
        qualifiers: Qualifiers,
    },

    /// one dimension; multi-dimensional arrays nest, outermost first
    Array {
        element: NodeIndex,
        index_type: Option<NodeIndex>,
        lower_bound: i64,
        upper_bound: i64,
        is_unbounded: bool,
    },

    Function {
        return_type: NodeIndex,
        parameters: Vec<NodeIndex>, // order matters (calling convention)
        is_variadic: bool,
        size_bits: u64,
        align_bits: u64,
        is_artificial: bool,
    },

    Struct(Aggregate),
    Union(Aggregate),

    Enum {
        name: String,
        underlying: NodeIndex,
        enumerators: Vec<Enumerator>,
    },
}

/// shared payload of structs and unions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregate {
    pub name: String,
    pub size_bits: u64,
    pub align_bits: u64,
    pub is_anonymous: bool,
    /// forward declaration only, no layout known
    pub is_declaration_only: bool,
    pub members: Vec<Member>,
}

impl TypeNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            TypeNode::Base { .. } => NodeKind::Base,
            TypeNode::Typedef { .. } => NodeKind::Typedef,
            TypeNode::Pointer { .. } => NodeKind::Pointer,
            TypeNode::Qualified { .. } => NodeKind::Qualified,
            TypeNode::Array { .. } => NodeKind::Array,
            TypeNode::Function { .. } => NodeKind::Function,
            TypeNode::Struct(_) => NodeKind::Struct,
            TypeNode::Union(_) => NodeKind::Union,
            TypeNode::Enum { .. } => NodeKind::Enum,
        }
    }

    /// name of named kinds, `None` for anonymous or unnamed ones
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            TypeNode::Base { name, .. } => name,
            TypeNode::Typedef { name, .. } => name,
            TypeNode::Enum { name, .. } => name,
            TypeNode::Struct(agg) | TypeNode::Union(agg) => &agg.name,
            _ => return None,
        };
        (!name.is_empty()).then_some(name.as_str())
    }

    pub fn aggregate(&self) -> Option<&Aggregate> {
        match self {
            TypeNode::Struct(agg) | TypeNode::Union(agg) => Some(agg),
            _ => None,
        }
    }

    /// every outgoing type reference, in structural order
    pub fn references(&self) -> Vec<NodeIndex> {
        match self {
            TypeNode::Base { .. } => Vec::new(),
            TypeNode::Typedef { underlying, .. } => vec![*underlying],
            TypeNode::Pointer { target, .. } => vec![*target],
            TypeNode::Qualified { underlying, .. } => vec![*underlying],
            TypeNode::Array {
                element,
                index_type,
                ..
            } => std::iter::once(*element).chain(*index_type).collect(),
            TypeNode::Function {
                return_type,
                parameters,
                ..
            } => std::iter::once(*return_type)
                .chain(parameters.iter().copied())
                .collect(),
            TypeNode::Struct(agg) | TypeNode::Union(agg) => {
                agg.members.iter().map(|m| m.type_ref).collect()
            }
            TypeNode::Enum { underlying, .. } => vec![*underlying],
        }
    }
}
