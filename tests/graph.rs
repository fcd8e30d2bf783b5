use std::collections::BTreeSet;

use common::init_logger;
use verifiable_kcore::{Digest, Error, Graph};

mod common;

#[test]
fn test_edge_list() {
    init_logger();
    let text = "# comment\n1 2\n\n% another\n2 3\n3 1\n3 3\n1 2\n";
    let g = Graph::read_edge_list(text.as_bytes()).unwrap();
    assert_eq!(g.vertex_count(), 3);
    // Self loops and repeated edges are dropped.
    assert_eq!(g.edge_count(), 3);
    assert_eq!(
        Graph::read_edge_stream("4 5\n5 6\n".as_bytes()).unwrap(),
        vec![(4, 5), (5, 6)]
    );
    assert!(matches!(
        Graph::read_edge_list("1 2\n3\n".as_bytes()),
        Err(Error::Parse { line: 2, .. })
    ));
    assert!(matches!(
        Graph::read_edge_list("1 x\n".as_bytes()),
        Err(Error::Parse { line: 1, .. })
    ));
}

#[test]
fn test_mutations() {
    init_logger();
    let mut g = Graph::from_edges([(1, 2), (2, 3)]);
    assert!(!g.add_edge(2, 1));
    assert!(!g.add_edge(4, 4));
    assert!(!g.has_vertex(4));
    assert!(g.remove_edge(1, 2));
    assert!(!g.remove_edge(1, 2));
    // 1 lost its last neighbour and left the graph.
    assert!(!g.has_vertex(1));
    assert_eq!(g.degree(1), 0);
    assert_eq!(g.edges().collect::<Vec<_>>(), vec![(2, 3)]);

    assert!(g.add_vertex(7));
    assert!(!g.add_vertex(7));
    assert_eq!(g.remove_vertex(2), Some(BTreeSet::from([3])));
    // remove_vertex keeps isolated neighbours.
    assert!(g.has_vertex(3));
    assert_eq!(g.edge_count(), 0);
    assert_eq!(g.min_degree(), Some(0));
}

#[test]
fn test_serialization_and_digest() {
    init_logger();
    let g = Graph::from_edges([(5, 3), (5, 1), (5, 9), (1, 3)]);
    assert_eq!(g.serialize_adjacency(5), "5/1/3/9");
    assert_eq!(g.serialize_adjacency(9), "9/5");
    assert_eq!(g.vertex_digest(5).unwrap(), Digest::of(b"5/1/3/9"));
    assert!(matches!(g.vertex_digest(2), Err(Error::VertexNotFound(2))));
    assert_eq!(g.local_ids(), vec![1, 3, 5, 9]);

    let sub = g.induced_subgraph(&BTreeSet::from([1, 3, 5, 100]));
    assert_eq!(sub.vertex_count(), 3);
    assert_eq!(sub.edge_count(), 3);
    assert_eq!(sub.serialize_adjacency(5), "5/1/3");
    assert_eq!(g.component(9), BTreeSet::from([1, 3, 5, 9]));
    assert!(g.component(100).is_empty());
}

#[test]
fn test_largest_vertex_id() {
    init_logger();
    let text = format!("{} 3\n3 4\n", usize::MAX);
    let g = Graph::read_edge_list(text.as_bytes()).unwrap();
    assert_eq!(
        g.edges().collect::<Vec<_>>(),
        vec![(3, 4), (3, usize::MAX)]
    );
    assert_eq!(g.serialize_adjacency(usize::MAX), format!("{}/3", usize::MAX));
}
