use std::collections::{BTreeMap, BTreeSet};

use common::{guard, init_logger, random_graph};
use rand::prelude::*;
use verifiable_kcore::{
    digest::Hasher,
    mbp_tree::vo::{decode_vo, encode_vo, replay, vo_size},
    verify, Digest, Error, Graph, MbpConfig, MbpTree, ProofError, VertexId, VoEntry,
};

mod common;

fn digest_of(v: VertexId) -> Digest {
    Digest::of(format!("vertex {v}").as_bytes())
}

fn tree_of(fanout: usize, vs: impl IntoIterator<Item = VertexId>) -> MbpTree {
    MbpTree::from_entries(
        MbpConfig::new(fanout).unwrap(),
        vs.into_iter().map(|v| (v, digest_of(v))),
    )
    .unwrap()
}

fn graph_tree(g: &Graph, fanout: usize) -> MbpTree {
    MbpTree::from_entries(
        MbpConfig::new(fanout).unwrap(),
        g.vertices().map(|v| (v, g.vertex_digest(v).unwrap())),
    )
    .unwrap()
}

/// Node data for every vertex of `sub`, as the extractor serializes it.
fn serialize(g: &Graph, sub: &Graph) -> BTreeMap<VertexId, String> {
    sub.vertices()
        .map(|v| {
            (
                v,
                format!("{}|{}", sub.serialize_adjacency(v), g.serialize_adjacency(v)),
            )
        })
        .collect()
}

#[test]
fn test_config() {
    init_logger();
    assert_eq!(MbpConfig::default().max_capacity, 4);
    assert_eq!(MbpConfig::new(4).unwrap().min_capacity(), 2);
    assert_eq!(MbpConfig::new(7).unwrap().min_capacity(), 4);
    assert!(matches!(MbpConfig::new(2), Err(Error::InvalidConfig(_))));
    assert!(matches!(
        MbpTree::new(MbpConfig { max_capacity: 0 }),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_small_tree() {
    init_logger();
    let mut t = guard(tree_of(3, [5, 1, 9]));
    t.check().unwrap();
    assert_eq!(t.depth(), 1);
    assert_eq!(t.keys(), vec![1, 5, 9]);
    assert!(!t.is_stale());

    // A leaf over the fanout splits.
    t.set_digest(7, digest_of(7)).unwrap();
    assert!(t.is_stale());
    t.check().unwrap();
    assert_eq!(t.depth(), 2);
    assert_eq!(t.len(), 4);
    assert_eq!(t.get_digest(7).unwrap(), digest_of(7));
    assert!(matches!(t.get_digest(8), Err(Error::VertexNotFound(8))));

    // Replacing a digest keeps the shape.
    t.set_digest(7, digest_of(70)).unwrap();
    assert_eq!(t.len(), 4);
    assert_eq!(t.get_digest(7).unwrap(), digest_of(70));

    assert_eq!(t.remove(7).unwrap(), digest_of(70));
    assert!(matches!(t.remove(7), Err(Error::VertexNotFound(7))));
    t.check().unwrap();
    assert_eq!(t.keys(), vec![1, 5, 9]);
}

#[test]
fn test_root_digest_is_leaf_fold() {
    init_logger();
    let t = tree_of(4, [1, 2, 3]);
    let mut h = Hasher::new();
    for v in [1, 2, 3] {
        h.update(&digest_of(v));
    }
    assert_eq!(t.root_digest(), h.finalize());
}

#[test]
fn test_digest_compute() {
    init_logger();
    let mut t = guard(tree_of(4, 0..50));
    let before = t.root_digest();
    assert_eq!(t.digest_compute(), before);
    t.set_digest(100, digest_of(100)).unwrap();
    assert_ne!(t.digest_compute(), before);
    t.remove(100).unwrap();
    t.check().unwrap();
    assert_eq!(t.keys(), (0..50).collect::<Vec<_>>());
}

fn random_compare_with_btree(fanout: usize, q: usize, n: usize, seed: u64) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t = guard(MbpTree::new(MbpConfig::new(fanout).unwrap()).unwrap());
    let mut slow: BTreeMap<VertexId, Digest> = BTreeMap::new();
    for step in 1..=q {
        let v = rng.gen_range(0..n);
        if rng.gen_bool(0.45) {
            let res = t.remove(v);
            match slow.remove(&v) {
                Some(d) => assert_eq!(res.unwrap(), d),
                None => assert!(matches!(res, Err(Error::VertexNotFound(_)))),
            }
        } else {
            let d = digest_of(rng.gen());
            t.set_digest(v, d).unwrap();
            slow.insert(v, d);
        }
        if step % 25 == 0 {
            t.check().unwrap();
            assert_eq!(t.keys(), slow.keys().copied().collect::<Vec<_>>());
            assert_eq!(t.len(), slow.len());
        }
    }
    t.check().unwrap();
    for (&v, &d) in &slow {
        assert_eq!(t.get_digest(v).unwrap(), d);
    }
}

#[test]
fn test_cmp_fanout3() {
    random_compare_with_btree(3, 3000, 200, 10000);
}

#[test]
fn test_cmp_fanout4() {
    random_compare_with_btree(4, 3000, 300, 74828);
}

#[test]
fn test_cmp_fanout7() {
    random_compare_with_btree(7, 3000, 100, 4635);
}

#[test]
fn test_drain_to_empty() {
    init_logger();
    let mut t = guard(tree_of(3, 0..64));
    assert!(t.depth() >= 3);
    for v in (0..64).rev().step_by(2).chain((0..64).step_by(2)) {
        t.remove(v).unwrap();
        t.check().unwrap();
    }
    assert!(t.is_empty());
    assert_eq!(t.depth(), 1);
}

#[test]
fn test_vo_verifies() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(31337);
    let g = random_graph(&mut rng, 60, 150);
    for fanout in [3, 4, 8] {
        let t = graph_tree(&g, fanout);
        let picked: BTreeSet<VertexId> = g.vertices().filter(|v| v % 7 == 0).collect();
        let sub = g.induced_subgraph(&picked);
        let vo = t.construct_vo(&picked, &serialize(&g, &sub)).unwrap();

        let verified = verify(&vo, &t.root_digest()).unwrap();
        assert_eq!(verified.vertices(), picked);
        assert_eq!(verified.subgraph, sub);

        // Fewer vertices means more of the tree collapsed into digests.
        let one: BTreeSet<VertexId> = picked.iter().copied().take(1).collect();
        let small = g.induced_subgraph(&one);
        let small_vo = t.construct_vo(&one, &serialize(&g, &small)).unwrap();
        assert!(vo_size(&small_vo) < vo_size(&vo));
        verify(&small_vo, &t.root_digest()).unwrap();
    }
}

#[test]
fn test_vo_rejects_tampering() {
    init_logger();
    let g = Graph::from_edges([(1, 2), (2, 3), (3, 1), (3, 4), (4, 5)]);
    let t = graph_tree(&g, 3);
    let root = t.root_digest();
    let picked = BTreeSet::from([1, 2, 3]);
    let sub = g.induced_subgraph(&picked);
    let vo = t.construct_vo(&picked, &serialize(&g, &sub)).unwrap();
    verify(&vo, &root).unwrap();

    // Hiding the edge (3, 4) changes the leaf digest of 3.
    let forged: Vec<VoEntry> = vo
        .iter()
        .map(|e| match e {
            VoEntry::NodeData(s) if s.starts_with("3/") => {
                VoEntry::NodeData("3/1/2|3/1/2".to_owned())
            }
            e => e.clone(),
        })
        .collect();
    assert!(matches!(
        verify(&forged, &root),
        Err(ProofError::DigestMismatch { .. })
    ));

    // Dropping an answer edge while keeping the full adjacency is caught too.
    let forged: Vec<VoEntry> = vo
        .iter()
        .map(|e| match e {
            VoEntry::NodeData(s) if s.starts_with("1/") => {
                VoEntry::NodeData("1/2|1/2/3".to_owned())
            }
            e => e.clone(),
        })
        .collect();
    assert!(matches!(
        verify(&forged, &root),
        Err(ProofError::Inconsistent(_))
    ));

    // Any other root is rejected.
    assert!(matches!(
        verify(&vo, &Digest::of(b"another graph")),
        Err(ProofError::DigestMismatch { .. })
    ));
}

#[test]
fn test_vo_rejects_any_byte_flip() {
    init_logger();
    let g = Graph::from_edges([(1, 2), (2, 3), (3, 1), (3, 4), (4, 5), (5, 6), (6, 4)]);
    let t = graph_tree(&g, 3);
    let root = t.root_digest();
    let picked = BTreeSet::from([1, 2, 3]);
    let vo = t
        .construct_vo(&picked, &serialize(&g, &g.induced_subgraph(&picked)))
        .unwrap();
    let bytes = encode_vo(&vo).unwrap();
    verify(&decode_vo(&bytes).unwrap(), &root).unwrap();

    for i in 0..bytes.len() {
        for mask in [0x01, 0x02, 0x10, 0x20, 0x80, 0xff] {
            let mut bad = bytes.clone();
            bad[i] ^= mask;
            // Either the stream no longer parses or the proof is rejected.
            if let Ok(forged) = decode_vo(&bad) {
                assert!(
                    verify(&forged, &root).is_err(),
                    "byte {i} ^ {mask:#04x} accepted"
                );
            }
        }
    }
}

#[test]
fn test_vo_structure_errors() {
    init_logger();
    let g = Graph::from_edges([(1, 2), (2, 3), (3, 1)]);
    let t = graph_tree(&g, 4);
    let picked = BTreeSet::from([1, 2, 3]);
    let vo = t
        .construct_vo(&picked, &serialize(&g, &g.induced_subgraph(&picked)))
        .unwrap();
    assert_eq!(vo.first(), Some(&VoEntry::Special('[')));
    assert_eq!(vo.last(), Some(&VoEntry::Special(']')));

    let mut bad = vo.clone();
    bad.insert(1, VoEntry::Special('#'));
    assert!(matches!(replay(&bad), Err(Error::UnknownToken(_))));
    assert!(matches!(
        verify(&bad, &t.root_digest()),
        Err(ProofError::Malformed(Error::UnknownToken(_)))
    ));

    let mut bad = vo.clone();
    bad.pop();
    assert!(matches!(replay(&bad), Err(Error::MalformedVo(_))));

    let mut bad = vo.clone();
    bad.push(VoEntry::Special('['));
    assert!(matches!(replay(&bad), Err(Error::MalformedVo(_))));

    assert!(matches!(replay(&[]), Err(Error::MalformedVo(_))));
    assert!(matches!(
        replay(&[VoEntry::Digest(Digest::default())]),
        Err(Error::MalformedVo(_))
    ));

    let mut bad = vo.clone();
    bad.insert(1, VoEntry::NodeData("1/2|2/1".to_owned()));
    assert!(matches!(replay(&bad), Err(Error::MalformedVo(_))));

    assert!(matches!(
        replay(&[VoEntry::Special(']')]),
        Err(Error::MalformedVo(_))
    ));

    // Nesting is bounded, however deep the stream claims to go.
    let deep: Vec<VoEntry> = std::iter::repeat(VoEntry::Special('['))
        .take(1_000_000)
        .chain(std::iter::repeat(VoEntry::Special(']')).take(1_000_000))
        .collect();
    assert!(matches!(
        verify(&deep, &Digest::default()),
        Err(ProofError::Malformed(Error::MalformedVo(_)))
    ));
    let decoded = decode_vo(&encode_vo(&deep).unwrap()).unwrap();
    assert!(matches!(
        verify(&decoded, &Digest::default()),
        Err(ProofError::Malformed(_))
    ));

    // Unknown vertices cannot be proven.
    assert!(matches!(
        t.construct_vo(&BTreeSet::from([9]), &BTreeMap::new()),
        Err(Error::VertexNotFound(9))
    ));
}

#[test]
fn test_vo_wire_format() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(4815162342);
    let g = random_graph(&mut rng, 30, 70);
    let t = graph_tree(&g, 4);
    let picked: BTreeSet<VertexId> = g.vertices().take(5).collect();
    let vo = t
        .construct_vo(&picked, &serialize(&g, &g.induced_subgraph(&picked)))
        .unwrap();
    let bytes = encode_vo(&vo).unwrap();
    assert_eq!(bytes.len(), vo_size(&vo));
    assert_eq!(decode_vo(&bytes).unwrap(), vo);

    assert!(matches!(
        decode_vo(&bytes[..bytes.len() - 1]),
        Err(Error::MalformedVo(_))
    ));
    assert!(matches!(decode_vo(b"X"), Err(Error::UnknownToken(_))));
    assert!(matches!(
        encode_vo(&[VoEntry::Special('λ')]),
        Err(Error::UnknownToken(_))
    ));
}

#[test]
#[ignore]
fn test_stress() {
    init_logger();
    loop {
        let seed = thread_rng().gen();
        log::info!("seed = {seed}");
        let fanout = StdRng::seed_from_u64(seed).gen_range(3..10);
        random_compare_with_btree(fanout, 20000, 500, seed);
    }
}
