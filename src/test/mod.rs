use crate::{
    observe, ChangeNode, Heap, InstId, ObserveConfig, ObserveHooks, RefGraph, RefKind, Schema, Value,
    ViolationKind,
};
use std::sync::Arc;

fn field(name: &str) -> Arc<str> {
    Arc::from(name)
}

fn ids<const N: usize>() -> [InstId; N] {
    std::array::from_fn(InstId)
}

fn tree_heap() -> Heap {
    let schema = Schema::parse(
        "
Node
  name: String
  children: [Node]
  @WeakRef friends: [Node]
",
    )
    .unwrap();

    Heap::new(Arc::new(schema))
}

fn node(heap: &mut Heap, name: &str, children: &[InstId]) -> InstId {
    heap.alloc(
        "Node",
        [
            ("name", Value::from(name)),
            ("children", Value::list(children.iter().copied())),
        ],
    )
    .unwrap()
}

#[test]
fn path_of_the_root_is_empty() {
    let [root] = ids();
    let graph = RefGraph::new();

    assert_eq!(graph.path_to(root, root, false), Some(vec![]));
}

#[test]
fn path_follows_single_parents() {
    let [root, a, b] = ids();
    let mut graph = RefGraph::new();
    graph.add(root, &field("children"), a, RefKind::Strong);
    graph.add(a, &field("children"), b, RefKind::Strong);

    assert_eq!(
        graph.path_to(b, root, false),
        Some(vec![
            ChangeNode::new(root, "children"),
            ChangeNode::new(a, "children")
        ])
    );
}

#[test]
fn detached_has_no_path() {
    let [root, a] = ids();
    let mut graph = RefGraph::new();
    graph.add(root, &field("children"), a, RefKind::Weak);

    assert_eq!(graph.path_to(a, root, false), None);
    assert_eq!(graph.path_to(a, root, true), None);
}

#[test]
fn ambiguous_paths_degrade_to_none() {
    let [root, a, b, c] = ids();
    let children = field("children");
    let mut graph = RefGraph::new();

    // two parents
    graph.add(root, &children, a, RefKind::Strong);
    graph.add(root, &children, b, RefKind::Strong);
    graph.add(a, &children, c, RefKind::Strong);
    graph.add(b, &children, c, RefKind::Strong);
    assert_eq!(graph.path_to(c, root, false), None);
    assert_eq!(
        graph.path_to(c, root, true),
        Some(vec![ChangeNode::new(root, "children"), ChangeNode::new(a, "children")])
    );

    // same parent, held twice
    graph.remove(b, &children, c, RefKind::Strong).unwrap();
    graph.add(a, &children, c, RefKind::Strong);
    assert_eq!(graph.single_parent(c), None);
    assert_eq!(graph.path_to(c, root, false), None);
    assert!(graph.path_to(c, root, true).is_some());

    // same parent, two fields
    graph.remove(a, &children, c, RefKind::Strong).unwrap();
    graph.add(a, &field("other"), c, RefKind::Strong);
    assert_eq!(graph.path_to(c, root, false), None);
}

#[test]
fn cycles_have_no_path() {
    let [root, a, b] = ids();
    let children = field("children");
    let mut graph = RefGraph::new();
    graph.add(a, &children, b, RefKind::Strong);
    graph.add(b, &children, a, RefKind::Strong);

    assert_eq!(graph.path_to(a, root, false), None);
    assert_eq!(graph.path_to(a, root, true), None);
}

#[test]
fn any_path_skips_detached_parents() {
    let [root, a, b, c] = ids();
    let children = field("children");
    let mut graph = RefGraph::new();
    // `a` is part of a detached cycle, `b` hangs off the root
    graph.add(c, &children, a, RefKind::Strong);
    graph.add(a, &children, c, RefKind::Strong);
    graph.add(a, &children, b, RefKind::Strong);
    graph.add(root, &children, b, RefKind::Strong);

    assert_eq!(graph.path_to(b, root, true), Some(vec![ChangeNode::new(root, "children")]));
}

#[test]
fn edge_multiplicity_is_counted() {
    let [root, a] = ids();
    let children = field("children");
    let mut graph = RefGraph::new();
    graph.add(root, &children, a, RefKind::Strong);
    graph.add(root, &children, a, RefKind::Strong);

    assert_eq!(graph.edge_count(RefKind::Strong), 2);
    assert_eq!(graph.edges(RefKind::Strong).next().map(|e| e.count), Some(2));

    graph.remove(root, "children", a, RefKind::Strong).unwrap();
    assert_eq!(graph.single_parent(a), Some((root, &children)));

    graph.remove(root, "children", a, RefKind::Strong).unwrap();
    assert!(!graph.has_parents(a, RefKind::Strong));
    assert!(graph.is_empty());
    assert!(graph.remove(root, "children", a, RefKind::Strong).is_err());
}

#[test]
fn refs_to_lists_each_parent_once() {
    let [root, a, b] = ids();
    let mut graph = RefGraph::new();
    graph.add(root, &field("children"), a, RefKind::Strong);
    graph.add(b, &field("friends"), a, RefKind::Weak);
    graph.add(root, &field("friends"), a, RefKind::Weak);

    assert_eq!(graph.refs_to(a, false), vec![root]);
    assert_eq!(graph.refs_to(a, true), vec![root, b]);
}

#[test]
fn to_be_deleted_follows_strong_children() {
    let mut heap = tree_heap();
    let leaf = node(&mut heap, "leaf", &[]);
    let mid = node(&mut heap, "mid", &[leaf]);
    let keep = node(&mut heap, "keep", &[]);
    let root = node(&mut heap, "root", &[mid, keep]);

    let mut model = observe(heap, root, ObserveConfig::default().quiet(true), ObserveHooks::new()).unwrap();
    // a weak edge does not keep `keep` alive, nor does it doom it
    model.push(leaf, "friends", keep).unwrap();
    model.splice(root, "children", 0, 1, vec![]).unwrap();

    assert_eq!(model.to_be_deleted_insts(), vec![mid, leaf]);
    assert!(model.is_tracked(mid));

    model.prune().unwrap();
    assert!(!model.is_tracked(mid));
    assert!(!model.is_tracked(leaf));
    assert!(model.is_tracked(keep));
    assert!(model.to_be_deleted_insts().is_empty());
    assert_eq!(model.metrics().disposed_instances, 2);
    assert_eq!(model.metrics().weak_edges, 0);
}

#[test]
fn moves_within_a_batch_are_not_violations() {
    let mut heap = tree_heap();
    let a = node(&mut heap, "a", &[]);
    let b = node(&mut heap, "b", &[]);
    let c = node(&mut heap, "c", &[]);
    let root = node(&mut heap, "root", &[a, b]);
    heap.set(a, "children", Value::list([c])).unwrap();

    let mut model = observe(heap, root, ObserveConfig::default().quiet(true), ObserveHooks::new()).unwrap();

    // held by both `a` and `b` for a moment
    model.push(b, "children", c).unwrap();
    assert_eq!(model.get_path_to_child(c), None);
    model.remove_item(a, "children", &Value::Inst(c)).unwrap();

    model.prune().unwrap();
    assert_eq!(
        model.get_path_to_child(c),
        Some(vec![ChangeNode::new(root, "children"), ChangeNode::new(b, "children")])
    );
}

#[test]
fn detached_cycles_are_reported() {
    let mut heap = tree_heap();
    let a = node(&mut heap, "a", &[]);
    let b = node(&mut heap, "b", &[]);
    let root = node(&mut heap, "root", &[a]);
    heap.set(a, "children", Value::list([b])).unwrap();

    let mut model = observe(heap, root, ObserveConfig::default().quiet(true), ObserveHooks::new()).unwrap();
    model.push(b, "children", a).unwrap();
    model.splice(root, "children", 0, 1, vec![]).unwrap();

    let err = model.prune().unwrap_err();
    let crate::Error::InvariantViolation { violations } = &err else {
        panic!("expected violations, got {err}");
    };
    assert!(violations
        .iter()
        .all(|v| v.kind == ViolationKind::Detached));
    assert!(violations.iter().any(|v| v.inst == a));
}
