use crate::arena::{IdMap, NodeArena};
use crate::descriptor::{DescriptorKind, ForeignId, TypeDescriptor, TypeSource};
use crate::error::{GraphError, Result};
use crate::node::{Aggregate, BaseEncoding, Enumerator, Member, NodeIndex, TypeNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// how often a non-aggregate id may be on the build path at once. a legal
/// cycle re-enters such an id once before reaching the aggregate shell that
/// stops it; a third entry means nothing will.
const MAX_REENTRY: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// abandon a whole struct/union when one of its members cannot be built,
    /// instead of dropping just that member
    pub strict_members: bool,
}

/// why something in a unit was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// the type itself could not be built
    SkippedType { id: ForeignId, reason: GraphError },
    /// the aggregate was built without this member
    DroppedMember {
        aggregate: ForeignId,
        member: String,
        reason: GraphError,
    },
}

impl Diagnostic {
    pub fn foreign_id(&self) -> ForeignId {
        match self {
            Diagnostic::SkippedType { id, .. } => *id,
            Diagnostic::DroppedMember { aggregate, .. } => *aggregate,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::SkippedType { id, reason } => write!(f, "skip type {id}: {reason}"),
            Diagnostic::DroppedMember {
                aggregate,
                member,
                reason,
            } => write!(f, "drop member `{member}` of {aggregate}: {reason}"),
        }
    }
}

/// raw graph of one translation unit, before canonicalization
#[derive(Debug, Clone, Default)]
pub struct UnitGraph {
    arena: NodeArena,
    id_map: IdMap,
    diagnostics: Vec<Diagnostic>,
}

impl UnitGraph {
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn id_map(&self) -> &IdMap {
        &self.id_map
    }

    pub fn node_for(&self, id: ForeignId) -> Option<NodeIndex> {
        self.id_map.get(id)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// depth-first translator from foreign descriptors to arena nodes
pub struct GraphBuilder<'s, S: TypeSource + ?Sized> {
    source: &'s S,
    options: BuildOptions,
    arena: NodeArena,
    id_map: IdMap,
    in_progress: HashMap<ForeignId, u32>,
    failed: HashMap<ForeignId, GraphError>,
    diagnostics: Vec<Diagnostic>,
    void_node: Option<NodeIndex>,
    int_nodes: HashMap<u64, NodeIndex>,
}

impl<'s, S: TypeSource + ?Sized> GraphBuilder<'s, S> {
    /// start a fresh unit: empty arena, empty id map
    pub fn new(source: &'s S, options: BuildOptions) -> Self {
        Self {
            source,
            options,
            arena: NodeArena::new(),
            id_map: IdMap::new(),
            in_progress: HashMap::new(),
            failed: HashMap::new(),
            diagnostics: Vec::new(),
            void_node: None,
            int_nodes: HashMap::new(),
        }
    }

    /// node for `id`, building it and everything it references on first use.
    /// recursion follows the reference chain with no depth limit.
    pub fn build(&mut self, id: ForeignId) -> Result<NodeIndex> {
        if let Some(index) = self.id_map.get(id) {
            log::trace!("type already built at {}", id);
            return Ok(index);
        }

        if let Some(err) = self.failed.get(&id) {
            return Err(err.clone());
        }

        let source = self.source;
        let Some(desc) = source.descriptor(id) else {
            let err = GraphError::unresolved(id, "no descriptor");
            self.record_failure(id, &err);
            return Err(err);
        };

        let depth = {
            let depth = self.in_progress.entry(id).or_insert(0);
            *depth += 1;
            *depth
        };
        let result = if depth > MAX_REENTRY && !desc.kind().is_aggregate() {
            Err(GraphError::malformed(
                id,
                "reference cycle without an aggregate to break it",
            ))
        } else {
            self.build_descriptor(desc)
        };

        if let Some(depth) = self.in_progress.get_mut(&id) {
            *depth -= 1;
            if *depth == 0 {
                self.in_progress.remove(&id);
            }
        }

        if let Err(err) = &result
            && err.is_recoverable()
        {
            self.record_failure(id, err);
        }
        result
    }

    /// build every id, keeping going past recoverable failures. returns how
    /// many of them produced a node.
    pub fn build_all(&mut self, ids: impl IntoIterator<Item = ForeignId>) -> Result<usize> {
        let mut built = 0;
        for id in ids {
            match self.build(id) {
                Ok(_) => built += 1,
                Err(err) if err.is_recoverable() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(built)
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn finish(self) -> UnitGraph {
        log::debug!(
            "{:>12} {} nodes, {} ids, {} diagnostics",
            "DONE",
            self.arena.len(),
            self.id_map.len(),
            self.diagnostics.len()
        );
        UnitGraph {
            arena: self.arena,
            id_map: self.id_map,
            diagnostics: self.diagnostics,
        }
    }

    fn record_failure(&mut self, id: ForeignId, err: &GraphError) {
        if self.failed.insert(id, err.clone()).is_none() {
            log::warn!("skip type {}: {}", id, err);
            self.diagnostics.push(Diagnostic::SkippedType {
                id,
                reason: err.clone(),
            });
        }
    }

    fn build_descriptor(&mut self, desc: &'s TypeDescriptor) -> Result<NodeIndex> {
        if let Some(defect) = desc.defect() {
            return Err(GraphError::malformed(desc.id(), defect));
        }
        match desc.kind() {
            DescriptorKind::Base => self.build_base(desc),
            DescriptorKind::Typedef => self.build_typedef(desc),
            DescriptorKind::Pointer => self.build_pointer(desc),
            DescriptorKind::Qualified => self.build_qualified(desc),
            DescriptorKind::Array => self.build_array(desc),
            DescriptorKind::Function => self.build_function(desc),
            DescriptorKind::Struct | DescriptorKind::Union => self.build_aggregate(desc),
            DescriptorKind::Enum => self.build_enum(desc),
            DescriptorKind::Unsupported(tag) => Err(GraphError::malformed(
                desc.id(),
                format!("unsupported type tag {:#x}", tag),
            )),
        }
    }

    /// build a referenced id on behalf of `owner`
    fn build_referenced(&mut self, owner: ForeignId, target: ForeignId) -> Result<NodeIndex> {
        self.build(target).map_err(|err| match err {
            GraphError::InvariantViolation(_) => err,
            _ => GraphError::unresolved(owner, format!("depends on unresolved {target}")),
        })
    }

    /// referenced id, or void when the descriptor has none
    fn referenced_or_void(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        match desc.referenced_id() {
            Some(target) => self.build_referenced(desc.id(), target),
            None => Ok(self.get_or_create_void_type()),
        }
    }

    /// finish a non-aggregate node. a recursive call may already have built
    /// the same id, in which case that node wins.
    fn register(&mut self, id: ForeignId, node: TypeNode) -> NodeIndex {
        if let Some(existing) = self.id_map.get(id) {
            log::trace!("{} built during recursion, reuse it", id);
            return existing;
        }
        let index = self.arena.push(node);
        self.id_map.insert(id, index);
        index
    }

    fn build_base(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let name = desc
            .name()
            .ok_or_else(|| GraphError::malformed(desc.id(), "base type without a name"))?;
        let size_bits = desc.size_bits().unwrap_or(0);
        let encoding = desc.encoding().unwrap_or(if name == "void" {
            BaseEncoding::Void
        } else {
            BaseEncoding::Other(0)
        });

        log::trace!("{:>12} {}: {} ({} bits)", "base", desc.id(), name, size_bits);

        Ok(self.register(
            desc.id(),
            TypeNode::Base {
                name: name.to_string(),
                size_bits,
                align_bits: desc.align_bits().unwrap_or(size_bits),
                encoding,
            },
        ))
    }

    fn build_typedef(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let name = desc
            .name()
            .ok_or_else(|| GraphError::malformed(desc.id(), "typedef without a name"))?;
        let underlying = self.referenced_or_void(desc)?;

        log::trace!("{:>12} {}: {}", "typedef", desc.id(), name);

        Ok(self.register(
            desc.id(),
            TypeNode::Typedef {
                name: name.to_string(),
                underlying,
            },
        ))
    }

    fn build_pointer(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let target = self.referenced_or_void(desc)?;
        let size_bits = desc.size_bits().unwrap_or(0);

        log::trace!("{:>12} {}", "pointer", desc.id());

        Ok(self.register(
            desc.id(),
            TypeNode::Pointer {
                target,
                size_bits,
                align_bits: desc.align_bits().unwrap_or(size_bits),
            },
        ))
    }

    fn build_qualified(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let qualifiers = desc.qualifiers();
        if qualifiers.is_empty() {
            return Err(GraphError::malformed(
                desc.id(),
                "qualified type with no qualifier set",
            ));
        }
        let underlying = self.referenced_or_void(desc)?;

        log::trace!("{:>12} {}: {:?}", "qualified", desc.id(), qualifiers);

        Ok(self.register(
            desc.id(),
            TypeNode::Qualified {
                underlying,
                qualifiers,
            },
        ))
    }

    fn build_array(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let element_id = desc
            .referenced_id()
            .ok_or_else(|| GraphError::malformed(desc.id(), "array without element type"))?;
        let element = self.build_referenced(desc.id(), element_id)?;

        let mut dimensions = Vec::new();
        for subrange in desc.subranges() {
            let index_type = match subrange.index_type {
                Some(index_id) => Some(self.build_referenced(desc.id(), index_id)?),
                None => None,
            };
            // unbounded dimensions store `lower - 1` so the count reads as zero
            let upper_bound = match subrange.upper_bound {
                Some(upper) => upper,
                None => subrange.lower_bound.checked_sub(1).ok_or_else(|| {
                    GraphError::malformed(desc.id(), "lower bound of unbounded dimension overflows")
                })?,
            };
            dimensions.push((
                index_type,
                subrange.lower_bound,
                upper_bound,
                subrange.upper_bound.is_none(),
            ));
        }
        if dimensions.is_empty() {
            // int[] -- one dimension, bounds unknown
            dimensions.push((None, 0, -1, true));
        }

        if let Some(existing) = self.id_map.get(desc.id()) {
            return Ok(existing);
        }

        // innermost dimension wraps the element, outermost gets the id
        let mut current = element;
        let outermost = dimensions.len() - 1;
        for (depth, (index_type, lower_bound, upper_bound, is_unbounded)) in
            dimensions.into_iter().rev().enumerate()
        {
            let node = TypeNode::Array {
                element: current,
                index_type,
                lower_bound,
                upper_bound,
                is_unbounded,
            };
            current = if depth == outermost {
                self.register(desc.id(), node)
            } else {
                self.arena.push(node)
            };
        }

        log::trace!("{:>12} {}", "array", desc.id());
        Ok(current)
    }

    fn build_function(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let info = desc
            .function_info()
            .ok_or_else(|| GraphError::malformed(desc.id(), "function type without signature"))?;

        let return_type = match info.return_id {
            Some(return_id) => self.build_referenced(desc.id(), return_id)?,
            None => self.get_or_create_void_type(),
        };

        let mut parameters = Vec::with_capacity(info.parameter_ids.len());
        for param_id in &info.parameter_ids {
            parameters.push(self.build_referenced(desc.id(), *param_id)?);
        }

        log::trace!(
            "{:>12} {}: {} params{}",
            "function",
            desc.id(),
            parameters.len(),
            if info.is_variadic { ", variadic" } else { "" }
        );

        let size_bits = desc.size_bits().unwrap_or(0);
        Ok(self.register(
            desc.id(),
            TypeNode::Function {
                return_type,
                parameters,
                is_variadic: info.is_variadic,
                size_bits,
                align_bits: desc.align_bits().unwrap_or(size_bits),
                is_artificial: desc.is_artificial(),
            },
        ))
    }

    fn build_enum(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let size_bits = desc.size_bits().unwrap_or(32);
        let underlying = match desc.referenced_id() {
            Some(target) => self.build_referenced(desc.id(), target)?,
            None => self.get_or_create_int_type(size_bits),
        };

        let enumerators: Vec<Enumerator> = desc
            .enumerators()
            .map(|(name, value)| Enumerator {
                name: name.to_string(),
                value,
            })
            .collect();

        log::debug!(
            "{:>12} {}: {} ({} enumerators)",
            "enum",
            desc.id(),
            desc.name().unwrap_or("<anonymous>"),
            enumerators.len()
        );

        Ok(self.register(
            desc.id(),
            TypeNode::Enum {
                name: desc.name().unwrap_or_default().to_string(),
                underlying,
                enumerators,
            },
        ))
    }

    /// structs and unions are registered as an empty shell first so that
    /// members referring back to the aggregate find it.
    fn build_aggregate(&mut self, desc: &TypeDescriptor) -> Result<NodeIndex> {
        let id = desc.id();
        let is_declaration_only = desc.is_declaration_only();
        let size_bits = match desc.size_bits() {
            Some(size) => size,
            None if is_declaration_only => 0,
            None => return Err(GraphError::malformed(id, "aggregate without a size")),
        };

        let shell = Aggregate {
            name: desc.name().unwrap_or_default().to_string(),
            size_bits,
            align_bits: desc.align_bits().unwrap_or(0),
            is_anonymous: desc.name().is_none(),
            is_declaration_only,
            members: Vec::new(),
        };

        log::debug!(
            "{:>12} {}: {} ({} bits{})",
            if desc.kind() == DescriptorKind::Union {
                "union"
            } else {
                "struct"
            },
            id,
            desc.name().unwrap_or("<anonymous>"),
            size_bits,
            if is_declaration_only { ", declaration" } else { "" }
        );

        let mark = self.arena.next_index();
        let index = self.arena.push(if desc.kind() == DescriptorKind::Union {
            TypeNode::Union(shell)
        } else {
            TypeNode::Struct(shell)
        });
        self.id_map.insert(id, index);

        let mut members = Vec::new();
        for member in desc.members() {
            let member_name = member.name.clone().unwrap_or_default();
            match self.build(member.type_id) {
                Ok(type_ref) => {
                    log::trace!(
                        "{:>12} {} @ bit {}",
                        "member",
                        if member_name.is_empty() {
                            "<anonymous>"
                        } else {
                            member_name.as_str()
                        },
                        member.bit_offset
                    );
                    members.push(Member {
                        name: member_name,
                        type_ref,
                        bit_offset: member.bit_offset,
                        is_static: member.is_static,
                    });
                }
                Err(err) if !err.is_recoverable() => return Err(err),
                Err(err) if self.options.strict_members => {
                    self.abandon_shell(id, mark);
                    return Err(GraphError::unresolved(
                        id,
                        format!(
                            "member `{}` depends on unresolved {}: {}",
                            member_name, member.type_id, err
                        ),
                    ));
                }
                Err(err) => {
                    log::warn!("drop member `{}` of {}: {}", member_name, id, err);
                    self.diagnostics.push(Diagnostic::DroppedMember {
                        aggregate: id,
                        member: member_name,
                        reason: err,
                    });
                }
            }
        }

        log::debug!("extracted {} members", members.len());

        match self.arena.get_mut(index) {
            Some(TypeNode::Struct(agg)) | Some(TypeNode::Union(agg)) => {
                agg.members = members;
                Ok(index)
            }
            _ => Err(GraphError::invariant(format!(
                "shell of {id} at slot {} is no longer an aggregate",
                index.0
            ))),
        }
    }

    /// forget a registered shell and everything built since it was allocated
    fn abandon_shell(&mut self, id: ForeignId, mark: NodeIndex) {
        log::debug!("abandon shell {} at slot {}", id, mark.0);
        self.id_map.remove(id);
        self.arena.truncate_to(mark);
        self.id_map.retain_below(mark);
        if self.void_node.is_some_and(|void| void >= mark) {
            self.void_node = None;
        }
        self.int_nodes.retain(|_, index| *index < mark);
    }

    fn get_or_create_void_type(&mut self) -> NodeIndex {
        if let Some(void) = self.void_node {
            return void;
        }

        let void = self.arena.push(TypeNode::Base {
            name: "void".to_string(),
            size_bits: 0,
            align_bits: 0,
            encoding: BaseEncoding::Void,
        });
        self.void_node = Some(void);
        void
    }

    /// backing integer for enums that do not name one
    fn get_or_create_int_type(&mut self, size_bits: u64) -> NodeIndex {
        if let Some(int) = self.int_nodes.get(&size_bits) {
            return *int;
        }

        let name = match size_bits {
            8 => "signed char",
            16 => "short int",
            64 => "long int",
            _ => "int",
        };
        let int = self.arena.push(TypeNode::Base {
            name: name.to_string(),
            size_bits,
            align_bits: size_bits,
            encoding: BaseEncoding::Signed,
        });
        self.int_nodes.insert(size_bits, int);
        int
    }
}
