//! a set of translation units sharing one canonicalization context
use crate::builder::{BuildOptions, Diagnostic, GraphBuilder, UnitGraph};
use crate::canonical::{
    CanonicalStats, Canonicalizer, CanonicalizationContext, CanonicalizeOptions, NodeLookup,
};
use crate::descriptor::{ForeignId, TypeSource};
use crate::error::{GraphError, Result};
use crate::node::{NodeId, NodeIndex, TypeNode, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// deepest pointer/array/qualifier chain `describe` follows
const MAX_DESCRIBE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorpusOptions {
    pub build: BuildOptions,
    pub canonicalize: CanonicalizeOptions,
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    id: UnitId,
    name: String,
    graph: UnitGraph,
}

impl TranslationUnit {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &UnitGraph {
        &self.graph
    }

    /// corpus-wide handle of the node built for `id`
    pub fn node_id(&self, id: ForeignId) -> Option<NodeId> {
        self.graph.node_for(id).map(|index| NodeId::new(self.id, index))
    }
}

impl NodeLookup for [TranslationUnit] {
    fn lookup(&self, id: NodeId) -> Option<&TypeNode> {
        self.get(id.unit.0 as usize)?.graph.arena().get(id.index)
    }
}

#[derive(Debug, Default)]
pub struct Corpus {
    options: CorpusOptions,
    units: Vec<TranslationUnit>,
    context: CanonicalizationContext,
}

impl Corpus {
    pub fn new(options: CorpusOptions) -> Self {
        Self {
            options,
            units: Vec::new(),
            context: CanonicalizationContext::new(options.canonicalize),
        }
    }

    pub fn options(&self) -> &CorpusOptions {
        &self.options
    }

    /// build the graph of one unit from `source`, starting at `roots`.
    /// recoverable failures end up as diagnostics on the unit.
    pub fn add_unit<S: TypeSource + ?Sized>(
        &mut self,
        name: impl Into<String>,
        source: &S,
        roots: impl IntoIterator<Item = ForeignId>,
    ) -> Result<UnitId> {
        let name = name.into();
        let id = UnitId(u32::try_from(self.units.len()).map_err(|_| {
            GraphError::invariant(format!("too many units to add `{name}`"))
        })?);

        log::debug!("{:>12} {}: {}", "unit", id.0, name);
        let mut builder = GraphBuilder::new(source, self.options.build);
        let built = builder.build_all(roots)?;
        let graph = builder.finish();

        log::info!(
            "unit `{}`: {} roots built, {} nodes, {} diagnostics",
            name,
            built,
            graph.arena().len(),
            graph.diagnostics().len()
        );

        self.units.push(TranslationUnit { id, name, graph });
        Ok(id)
    }

    /// canonicalize every node of `unit`, referenced nodes before their users
    /// where the graph allows it. returns the number of new representatives.
    pub fn canonicalize_unit(&mut self, unit: UnitId) -> Result<usize> {
        let order = {
            let unit = self.unit_or_err(unit)?;
            post_order(unit.graph.arena().len(), |index| {
                unit.graph
                    .arena()
                    .get(index)
                    .map(TypeNode::references)
                    .unwrap_or_default()
            })
        };

        let before = self.context.table().len();
        let mut canonicalizer = Canonicalizer::new(self.units.as_slice(), &mut self.context);
        for index in order {
            canonicalizer.canonicalize(NodeId::new(unit, index))?;
        }

        let added = self.context.table().len() - before;
        log::debug!(
            "{:>12} {}: {} new classes, {} total",
            "canonical",
            unit.0,
            added,
            self.context.table().len()
        );
        Ok(added)
    }

    /// canonicalize every unit in the order they were added
    pub fn canonicalize_all(&mut self) -> Result<()> {
        for index in 0..self.units.len() {
            let unit = self.units[index].id;
            self.canonicalize_unit(unit)?;
        }

        let stats = self.canonical_graph().stats();
        log::info!(
            "canonicalized {} nodes across {} units into {} classes",
            stats.nodes,
            stats.units,
            stats.representatives
        );
        Ok(())
    }

    /// canonical representative of `node`
    pub fn canonicalize(&mut self, node: NodeId) -> Result<NodeId> {
        self.node_or_err(node)?;
        Canonicalizer::new(self.units.as_slice(), &mut self.context).canonicalize(node)
    }

    /// cycle-aware structural equality. leaves canonical state untouched.
    pub fn structurally_equal(&mut self, left: NodeId, right: NodeId) -> Result<bool> {
        self.node_or_err(left)?;
        self.node_or_err(right)?;
        Canonicalizer::new(self.units.as_slice(), &mut self.context)
            .structurally_equal(left, right)
    }

    pub fn unit(&self, id: UnitId) -> Option<&TranslationUnit> {
        self.units.get(id.0 as usize)
    }

    pub fn units(&self) -> &[TranslationUnit] {
        &self.units
    }

    pub fn node(&self, id: NodeId) -> Option<&TypeNode> {
        self.units.lookup(id)
    }

    pub fn context(&self) -> &CanonicalizationContext {
        &self.context
    }

    /// C-like spelling of a node, e.g. `struct list*`, `const char`, `int[4]`
    pub fn describe(&self, id: NodeId) -> Option<String> {
        self.node(id)?;
        Some(self.describe_at(id, 0))
    }

    pub fn canonical_graph(&self) -> CanonicalGraph<'_> {
        CanonicalGraph { corpus: self }
    }

    fn unit_or_err(&self, id: UnitId) -> Result<&TranslationUnit> {
        self.unit(id)
            .ok_or_else(|| GraphError::invariant(format!("no unit {}", id.0)))
    }

    fn node_or_err(&self, id: NodeId) -> Result<&TypeNode> {
        self.node(id)
            .ok_or_else(|| GraphError::invariant(format!("{id} does not name a node")))
    }

    fn describe_at(&self, id: NodeId, depth: usize) -> String {
        let Some(node) = self.node(id) else {
            return "<missing>".to_string();
        };
        if depth > MAX_DESCRIBE_DEPTH {
            return "...".to_string();
        }
        let inner = |index: NodeIndex| self.describe_at(id.sibling(index), depth + 1);

        match node {
            TypeNode::Base { name, .. } | TypeNode::Typedef { name, .. } => name.clone(),
            TypeNode::Struct(agg) => tagged("struct", &agg.name),
            TypeNode::Union(agg) => tagged("union", &agg.name),
            TypeNode::Enum { name, .. } => tagged("enum", name),
            TypeNode::Pointer { target, .. } => match self.node(id.sibling(*target)) {
                Some(TypeNode::Function {
                    return_type,
                    parameters,
                    is_variadic,
                    ..
                }) => format!(
                    "{} (*)({})",
                    inner(*return_type),
                    params(parameters.iter().map(|p| inner(*p)), *is_variadic)
                ),
                _ => format!("{}*", inner(*target)),
            },
            TypeNode::Qualified {
                underlying,
                qualifiers,
            } => {
                let mut spelled = Vec::new();
                if qualifiers.is_const {
                    spelled.push("const");
                }
                if qualifiers.is_volatile {
                    spelled.push("volatile");
                }
                let base = inner(*underlying);
                // restrict binds to the pointer it follows
                let base = if qualifiers.is_restrict {
                    format!("{base} restrict")
                } else {
                    base
                };
                if spelled.is_empty() {
                    base
                } else {
                    format!("{} {}", spelled.join(" "), base)
                }
            }
            TypeNode::Array { .. } => {
                let mut dims = String::new();
                let mut current = node;
                let mut element = id;
                while let TypeNode::Array {
                    element: next,
                    lower_bound,
                    upper_bound,
                    is_unbounded,
                    ..
                } = current
                {
                    if *is_unbounded {
                        dims.push_str("[]");
                    } else {
                        match upper_bound
                            .checked_sub(*lower_bound)
                            .and_then(|last| last.checked_add(1))
                        {
                            Some(count) => dims.push_str(&format!("[{count}]")),
                            None => dims.push_str("[?]"),
                        }
                    }
                    element = element.sibling(*next);
                    match self.node(element) {
                        Some(next_node) => current = next_node,
                        None => break,
                    }
                }
                format!("{}{}", self.describe_at(element, depth + 1), dims)
            }
            TypeNode::Function {
                return_type,
                parameters,
                is_variadic,
                ..
            } => format!(
                "{} ({})",
                inner(*return_type),
                params(parameters.iter().map(|p| inner(*p)), *is_variadic)
            ),
        }
    }
}

fn tagged(keyword: &str, name: &str) -> String {
    if name.is_empty() {
        format!("{keyword} <anonymous>")
    } else {
        format!("{keyword} {name}")
    }
}

fn params(rendered: impl Iterator<Item = String>, is_variadic: bool) -> String {
    let mut list: Vec<String> = rendered.collect();
    if is_variadic {
        list.push("...".to_string());
    }
    if list.is_empty() {
        "void".to_string()
    } else {
        list.join(", ")
    }
}

/// iterative depth-first post-order over slots `0..len`
fn post_order(len: usize, references: impl Fn(NodeIndex) -> Vec<NodeIndex>) -> Vec<NodeIndex> {
    let mut visited = vec![false; len];
    let mut order = Vec::with_capacity(len);

    for root in 0..len {
        if visited[root] {
            continue;
        }
        let mut stack = vec![(NodeIndex(root as u32), false)];
        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                order.push(index);
                continue;
            }
            let slot = index.as_usize();
            if slot >= len || visited[slot] {
                continue;
            }
            visited[slot] = true;
            stack.push((index, true));
            for child in references(index).into_iter().rev() {
                if child.as_usize() < len && !visited[child.as_usize()] {
                    stack.push((child, false));
                }
            }
        }
    }
    order
}

/// read-only view of the corpus after canonicalization
#[derive(Debug, Clone, Copy)]
pub struct CanonicalGraph<'c> {
    corpus: &'c Corpus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub nodes: usize,
    pub representatives: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub units: usize,
    pub nodes: usize,
    pub representatives: usize,
    pub skipped_types: usize,
    pub dropped_members: usize,
    pub kinds: BTreeMap<String, KindStats>,
    pub canonicalization: CanonicalStats,
}

impl<'c> CanonicalGraph<'c> {
    pub fn node(&self, id: NodeId) -> Option<&'c TypeNode> {
        self.corpus.node(id)
    }

    /// confirmed canonical of `id`; a representative maps to itself
    pub fn canonical_of(&self, id: NodeId) -> Option<NodeId> {
        self.corpus.context.confirmed(id)
    }

    /// every representative, in unit then slot order
    pub fn representatives(&self) -> Vec<NodeId> {
        let mut reps: Vec<NodeId> = self.corpus.context.table().representatives().collect();
        reps.sort();
        reps
    }

    pub fn stats(&self) -> CorpusStats {
        let mut stats = CorpusStats {
            units: self.corpus.units.len(),
            canonicalization: self.corpus.context.stats(),
            ..CorpusStats::default()
        };

        for unit in &self.corpus.units {
            stats.nodes += unit.graph.arena().len();
            for diagnostic in unit.graph.diagnostics() {
                match diagnostic {
                    Diagnostic::SkippedType { .. } => stats.skipped_types += 1,
                    Diagnostic::DroppedMember { .. } => stats.dropped_members += 1,
                }
            }
            for (_, node) in unit.graph.arena().iter() {
                stats
                    .kinds
                    .entry(node.kind().as_str().to_string())
                    .or_default()
                    .nodes += 1;
            }
        }

        for rep in self.representatives() {
            stats.representatives += 1;
            if let Some(node) = self.node(rep) {
                stats
                    .kinds
                    .entry(node.kind().as_str().to_string())
                    .or_default()
                    .representatives += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorTable, TypeDescriptor};
    use crate::node::{BaseEncoding, Qualifiers};

    /// int, const char*, struct list { int v; struct list *next; }, int[2][3]
    fn unit_source() -> DescriptorTable {
        DescriptorTable::new()
            .with(TypeDescriptor::base(0x10, "int", 32, BaseEncoding::Signed))
            .with(TypeDescriptor::base(0x11, "char", 8, BaseEncoding::SignedChar))
            .with(TypeDescriptor::qualified(0x12, Some(0x11), Qualifiers::new().with_const()))
            .with(TypeDescriptor::pointer(0x13, Some(0x12), 64))
            .with(
                TypeDescriptor::structure(0x20, "list", 128, 64)
                    .with_member("v", 0x10, 0)
                    .with_member("next", 0x21, 64),
            )
            .with(TypeDescriptor::pointer(0x21, Some(0x20), 64))
            .with(
                TypeDescriptor::array(0x30, 0x10, Vec::new())
                    .with_subrange(crate::descriptor::SubrangeDescriptor::with_count(2))
                    .with_subrange(crate::descriptor::SubrangeDescriptor::with_count(3)),
            )
    }

    fn corpus_with_units(count: usize) -> Corpus {
        let source = unit_source();
        let mut corpus = Corpus::new(CorpusOptions::default());
        for n in 0..count {
            corpus
                .add_unit(format!("unit{n}"), &source, source.ids())
                .unwrap();
        }
        corpus
    }

    #[test]
    fn test_describe_renders_c_spelling() {
        let corpus = corpus_with_units(1);
        let unit = corpus.unit(UnitId(0)).unwrap();
        let describe = |id: u64| corpus.describe(unit.node_id(ForeignId(id)).unwrap()).unwrap();

        assert_eq!(describe(0x10), "int");
        assert_eq!(describe(0x12), "const char");
        assert_eq!(describe(0x13), "const char*");
        assert_eq!(describe(0x21), "struct list*");
        assert_eq!(describe(0x30), "int[2][3]");
    }

    #[test]
    fn test_identical_units_share_every_representative() {
        let mut corpus = corpus_with_units(2);
        corpus.canonicalize_all().unwrap();

        let first = corpus.unit(UnitId(0)).unwrap();
        let second = corpus.unit(UnitId(1)).unwrap();
        let graph = corpus.canonical_graph();
        for (id, index) in first.graph().id_map().iter() {
            let a = NodeId::new(first.id(), index);
            let b = second.node_id(id).unwrap();
            assert_eq!(graph.canonical_of(a), graph.canonical_of(b));
            assert!(graph.canonical_of(a).is_some());
        }

        let stats = graph.stats();
        assert_eq!(stats.units, 2);
        assert_eq!(stats.nodes, 2 * first.graph().arena().len());
        assert_eq!(stats.representatives, first.graph().arena().len());
        assert_eq!(stats.kinds["struct"].nodes, 2);
        assert_eq!(stats.kinds["struct"].representatives, 1);
    }

    #[test]
    fn test_canonicalize_unit_is_idempotent() {
        let mut corpus = corpus_with_units(1);
        assert!(corpus.canonicalize_unit(UnitId(0)).unwrap() > 0);
        let reps = corpus.canonical_graph().representatives();

        assert_eq!(corpus.canonicalize_unit(UnitId(0)).unwrap(), 0);
        assert_eq!(corpus.canonical_graph().representatives(), reps);
        for rep in reps {
            assert_eq!(corpus.canonical_graph().canonical_of(rep), Some(rep));
        }
    }

    #[test]
    fn test_unknown_handles_are_rejected() {
        let mut corpus = corpus_with_units(1);
        let bogus = NodeId::new(UnitId(4), NodeIndex(0));

        assert!(corpus.node(bogus).is_none());
        assert!(corpus.describe(bogus).is_none());
        assert!(matches!(
            corpus.canonicalize(bogus),
            Err(GraphError::InvariantViolation(_))
        ));
        assert!(corpus.canonicalize_unit(UnitId(9)).is_err());
    }

    #[test]
    fn test_post_order_visits_children_first() {
        // 0 -> 1 -> 2, 2 -> 0
        let edges = [vec![NodeIndex(1)], vec![NodeIndex(2)], vec![NodeIndex(0)]];
        let order = post_order(3, |index| edges[index.as_usize()].clone());
        assert_eq!(order, vec![NodeIndex(2), NodeIndex(1), NodeIndex(0)]);
    }
}
