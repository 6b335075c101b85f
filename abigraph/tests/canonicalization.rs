use abigraph::{
    BaseEncoding, CanonicalizeOptions, Corpus, CorpusOptions, DeclarationOrder, DescriptorTable,
    ForeignId, NodeId, TypeDescriptor, UnitId,
};

/// struct list { int value; struct list *next; }
fn list_unit(value_offset: u64) -> DescriptorTable {
    DescriptorTable::new()
        .with(
            TypeDescriptor::structure(0x100, "list", 128, 64)
                .with_member("value", 0x101, value_offset)
                .with_member("next", 0x102, 64),
        )
        .with(TypeDescriptor::base(0x101, "int", 32, BaseEncoding::Signed))
        .with(TypeDescriptor::pointer(0x102, Some(0x100), 64))
}

/// same layout as `list_unit`, under different ids and in another entry order
fn list_unit_renumbered() -> DescriptorTable {
    DescriptorTable::new()
        .with(TypeDescriptor::pointer(0x7, Some(0x9), 64))
        .with(TypeDescriptor::base(0x8, "int", 32, BaseEncoding::Signed))
        .with(
            TypeDescriptor::structure(0x9, "list", 128, 64)
                .with_member("value", 0x8, 0)
                .with_member("next", 0x7, 64),
        )
}

fn enum_unit(enumerators: &[(&str, i64)]) -> DescriptorTable {
    let mut desc = TypeDescriptor::enumeration(0x40, "E", None, 32);
    for (name, value) in enumerators {
        desc = desc.with_enumerator(name, *value);
    }
    DescriptorTable::new().with(desc)
}

fn corpus_of(options: CorpusOptions, units: &[DescriptorTable]) -> Corpus {
    let mut corpus = Corpus::new(options);
    for (n, source) in units.iter().enumerate() {
        corpus
            .add_unit(format!("unit{n}"), source, source.ids())
            .unwrap();
    }
    corpus.canonicalize_all().unwrap();
    corpus
}

fn node(corpus: &Corpus, unit: u32, id: u64) -> NodeId {
    corpus
        .unit(UnitId(unit))
        .and_then(|u| u.node_id(ForeignId(id)))
        .unwrap()
}

fn canonical(corpus: &Corpus, unit: u32, id: u64) -> NodeId {
    corpus
        .canonical_graph()
        .canonical_of(node(corpus, unit, id))
        .unwrap()
}

#[test]
fn test_cross_unit_structs_unify() {
    let corpus = corpus_of(
        CorpusOptions::default(),
        &[list_unit(0), list_unit_renumbered()],
    );

    assert_eq!(canonical(&corpus, 0, 0x100), canonical(&corpus, 1, 0x9));
    assert_eq!(canonical(&corpus, 0, 0x102), canonical(&corpus, 1, 0x7));
    assert_eq!(canonical(&corpus, 0, 0x101), canonical(&corpus, 1, 0x8));
    assert_eq!(corpus.canonical_graph().representatives().len(), 3);
    assert!(corpus.context().pending().next().is_none());
}

#[test]
fn test_bit_offset_difference_prevents_unification() {
    let corpus = corpus_of(CorpusOptions::default(), &[list_unit(0), list_unit(32)]);

    assert_ne!(canonical(&corpus, 0, 0x100), canonical(&corpus, 1, 0x100));
    // the pointers point at different structs, so they differ too
    assert_ne!(canonical(&corpus, 0, 0x102), canonical(&corpus, 1, 0x102));
    assert_eq!(canonical(&corpus, 0, 0x101), canonical(&corpus, 1, 0x101));
}

#[test]
fn test_isomorphic_self_referential_structs_share_representative() {
    // A: struct node { struct node *next; }, B: the same under other ids
    let source = DescriptorTable::new()
        .with(TypeDescriptor::structure(0x1, "node", 64, 64).with_member("next", 0x2, 0))
        .with(TypeDescriptor::pointer(0x2, Some(0x1), 64))
        .with(TypeDescriptor::structure(0x3, "node", 64, 64).with_member("next", 0x4, 0))
        .with(TypeDescriptor::pointer(0x4, Some(0x3), 64));
    let corpus = corpus_of(CorpusOptions::default(), &[source]);

    let (a, b) = (node(&corpus, 0, 0x1), node(&corpus, 0, 0x3));
    let graph = corpus.canonical_graph();
    assert_eq!(graph.canonical_of(a), graph.canonical_of(b));
    assert_eq!(graph.representatives().len(), 2);
    assert!(corpus.context().dependencies(a).is_empty());
    assert!(corpus.context().dependencies(b).is_empty());
    corpus.context().ensure_quiescent().unwrap();
}

#[test]
fn test_mutually_recursive_pairs_unify_across_units() {
    let pair = || {
        DescriptorTable::new()
            .with(TypeDescriptor::structure(0x20, "A", 64, 64).with_member("b", 0x23, 0))
            .with(TypeDescriptor::pointer(0x21, Some(0x20), 64))
            .with(TypeDescriptor::structure(0x22, "B", 64, 64).with_member("a", 0x21, 0))
            .with(TypeDescriptor::pointer(0x23, Some(0x22), 64))
    };
    let corpus = corpus_of(CorpusOptions::default(), &[pair(), pair(), pair()]);

    for id in [0x20, 0x21, 0x22, 0x23] {
        assert_eq!(canonical(&corpus, 0, id), canonical(&corpus, 1, id));
        assert_eq!(canonical(&corpus, 0, id), canonical(&corpus, 2, id));
    }
    assert_eq!(corpus.canonical_graph().representatives().len(), 4);
}

#[test]
fn test_enumerator_order_is_significant_by_default() {
    let units = [
        enum_unit(&[("A", 1), ("B", 2)]),
        enum_unit(&[("B", 2), ("A", 1)]),
    ];

    let ordered = corpus_of(CorpusOptions::default(), &units);
    assert_ne!(canonical(&ordered, 0, 0x40), canonical(&ordered, 1, 0x40));

    let sorted = corpus_of(
        CorpusOptions {
            canonicalize: CanonicalizeOptions {
                declaration_order: DeclarationOrder::Sorted,
                ..CanonicalizeOptions::default()
            },
            ..CorpusOptions::default()
        },
        &units,
    );
    assert_eq!(canonical(&sorted, 0, 0x40), canonical(&sorted, 1, 0x40));
}

#[test]
fn test_structural_equality_is_reflexive_and_symmetric() {
    let units = [list_unit(0), list_unit_renumbered(), list_unit(32)];
    let mut corpus = Corpus::new(CorpusOptions::default());
    for (n, source) in units.iter().enumerate() {
        corpus
            .add_unit(format!("unit{n}"), source, source.ids())
            .unwrap();
    }

    let structs = [
        node(&corpus, 0, 0x100),
        node(&corpus, 1, 0x9),
        node(&corpus, 2, 0x100),
    ];
    for a in structs {
        assert!(corpus.structurally_equal(a, a).unwrap());
        for b in structs {
            let forward = corpus.structurally_equal(a, b).unwrap();
            let backward = corpus.structurally_equal(b, a).unwrap();
            assert_eq!(forward, backward);
        }
    }
    assert!(corpus.structurally_equal(structs[0], structs[1]).unwrap());
    assert!(!corpus.structurally_equal(structs[0], structs[2]).unwrap());

    // pure: nothing was canonicalized on the way
    assert!(corpus.canonical_graph().representatives().is_empty());
}

#[test]
fn test_canonicalize_is_idempotent() {
    let mut corpus = corpus_of(
        CorpusOptions::default(),
        &[list_unit(0), list_unit_renumbered(), list_unit(32)],
    );

    let nodes: Vec<NodeId> = corpus
        .units()
        .iter()
        .flat_map(|unit| {
            unit.graph()
                .arena()
                .iter()
                .map(|(index, _)| NodeId::new(unit.id(), index))
                .collect::<Vec<_>>()
        })
        .collect();

    for n in nodes {
        let first = corpus.canonicalize(n).unwrap();
        assert_eq!(corpus.canonicalize(first).unwrap(), first);
        assert_eq!(corpus.canonical_graph().canonical_of(first), Some(first));
    }
}

#[test]
fn test_propagation_does_not_change_the_result() {
    let units = [
        list_unit(0),
        list_unit_renumbered(),
        list_unit(32),
        enum_unit(&[("A", 1)]),
    ];
    let with = corpus_of(CorpusOptions::default(), &units);
    let without = corpus_of(
        CorpusOptions {
            canonicalize: CanonicalizeOptions {
                propagate: false,
                ..CanonicalizeOptions::default()
            },
            ..CorpusOptions::default()
        },
        &units,
    );

    assert_eq!(
        with.canonical_graph().representatives(),
        without.canonical_graph().representatives()
    );
    for unit in with.units() {
        for (index, _) in unit.graph().arena().iter() {
            let n = NodeId::new(unit.id(), index);
            assert_eq!(
                with.canonical_graph().canonical_of(n),
                without.canonical_graph().canonical_of(n)
            );
        }
    }
    assert_eq!(without.canonical_graph().stats().canonicalization.propagated, 0);
}

#[test]
fn test_declaration_does_not_unify_with_definition() {
    let declared = DescriptorTable::new()
        .with(TypeDescriptor::new(ForeignId(0x5), abigraph::DescriptorKind::Struct)
            .with_name("opaque")
            .declaration_only());
    let defined = DescriptorTable::new()
        .with(TypeDescriptor::base(0x6, "int", 32, BaseEncoding::Signed))
        .with(TypeDescriptor::structure(0x5, "opaque", 32, 32).with_member("x", 0x6, 0));
    let corpus = corpus_of(CorpusOptions::default(), &[declared, defined]);

    assert_ne!(canonical(&corpus, 0, 0x5), canonical(&corpus, 1, 0x5));
}

/// struct s { struct s *next; <value> v; }, the cycle-closing member first
fn cursor_unit(value: TypeDescriptor) -> DescriptorTable {
    DescriptorTable::new()
        .with(
            TypeDescriptor::structure(0x1, "s", 128, 64)
                .with_member("next", 0x2, 0)
                .with_member("v", 0x3, 64),
        )
        .with(TypeDescriptor::pointer(0x2, Some(0x1), 64))
        .with(value)
}

#[test]
fn test_later_member_mismatch_cancels_tentative_pointer() {
    let units = [
        cursor_unit(TypeDescriptor::base(0x3, "int", 32, BaseEncoding::Signed)),
        cursor_unit(TypeDescriptor::base(0x3, "long", 64, BaseEncoding::Signed)),
    ];
    let mut corpus = Corpus::new(CorpusOptions::default());
    for (n, source) in units.iter().enumerate() {
        corpus
            .add_unit(format!("unit{n}"), source, source.ids())
            .unwrap();
    }
    corpus.canonicalize_unit(UnitId(0)).unwrap();

    // asking for the struct first: its pointer is matched against unit 0's
    // inside the cycle before `v` is reached and found to differ
    let s1 = node(&corpus, 1, 0x1);
    assert_eq!(corpus.canonicalize(s1).unwrap(), s1);
    assert!(corpus.context().stats().cancelled > 0);
    corpus.context().ensure_quiescent().unwrap();

    corpus.canonicalize_unit(UnitId(1)).unwrap();
    assert_ne!(canonical(&corpus, 0, 0x1), canonical(&corpus, 1, 0x1));
    assert_ne!(canonical(&corpus, 0, 0x2), canonical(&corpus, 1, 0x2));
    assert_ne!(canonical(&corpus, 0, 0x3), canonical(&corpus, 1, 0x3));
    assert_eq!(
        corpus.canonical_graph().stats().canonicalization.cancelled,
        corpus.context().stats().cancelled
    );
    corpus.context().ensure_quiescent().unwrap();
}
