//! abigraph - build type graphs from debug-info type descriptors and
//! canonicalize them across translation units
//!
//! - descriptors come in through the [`TypeSource`] trait; a DWARF adapter is
//!   included for binaries compiled with debug info (e.g. gcc -g ...)
//! - every unit gets its own arena of [`TypeNode`]s, cycles included
//! - structurally equal types of all units share one canonical representative
//! - unresolved or malformed entries are skipped and reported, not fatal

pub mod arena;
pub mod builder;
pub mod canonical;
pub mod corpus;
pub mod descriptor;
pub mod dwarf;
pub mod error;
pub mod node;
pub mod reader;

pub use arena::{IdMap, NodeArena};
pub use builder::{BuildOptions, Diagnostic, GraphBuilder, UnitGraph};
pub use canonical::{
    CanonicalSlot, CanonicalStats, CanonicalTable, CanonicalizationContext, CanonicalizeOptions,
    DeclarationOrder, StructuralKey,
};
pub use corpus::{CanonicalGraph, Corpus, CorpusOptions, CorpusStats, TranslationUnit};
pub use descriptor::{
    DescriptorKind, DescriptorTable, ForeignId, MemberDescriptor, SubrangeDescriptor,
    TypeDescriptor, TypeSource,
};
pub use dwarf::Analyzer;
pub use error::{GraphError, Result};
pub use node::{
    Aggregate, BaseEncoding, Enumerator, Member, NodeId, NodeIndex, NodeKind, Qualifiers,
    TypeNode, UnitId,
};
