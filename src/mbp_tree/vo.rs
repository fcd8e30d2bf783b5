//! Verification objects: the proof stream produced by
//! [`MbpTree::construct_vo`](super::MbpTree::construct_vo) and its replay on
//! the client side.
//!
//! A VO is a flattened walk of the tree. Every visited node is wrapped in
//! `[` ... `]`; inside it each entry (leaf) or child (internal node) is either
//! expanded or replaced by its digest. Replaying the stream folds every bracket
//! group into one digest exactly as `digest_compute` does, so the outermost
//! group yields the root digest.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    digest::{Digest, Hasher, DIGEST_LEN},
    error::{Error, ProofError, Result},
    graph::{Graph, VertexId},
};

pub const OPEN: char = '[';
pub const CLOSE: char = ']';

const TAG_NODE_DATA: u8 = b'N';
const TAG_DIGEST: u8 = b'D';
const TAG_SPECIAL: u8 = b'S';

/// One token of a verification object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoEntry {
    /// `"<v>/<sub neighbours>|<v>/<full neighbours>"`.
    NodeData(String),
    Digest(Digest),
    /// [`OPEN`] or [`CLOSE`].
    Special(char),
}

/// Serializes a VO: one tag byte per token, then its payload.
pub fn encode_vo(vo: &[VoEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(vo_size(vo));
    for e in vo {
        match e {
            VoEntry::NodeData(s) => {
                let len = u32::try_from(s.len())
                    .map_err(|_| Error::MalformedVo(format!("node data of {} bytes", s.len())))?;
                out.push(TAG_NODE_DATA);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            VoEntry::Digest(d) => {
                out.push(TAG_DIGEST);
                out.extend_from_slice(d.as_bytes());
            }
            VoEntry::Special(c) => {
                if !c.is_ascii() {
                    return Err(Error::UnknownToken(c.to_string()));
                }
                out.push(TAG_SPECIAL);
                out.push(*c as u8);
            }
        }
    }
    Ok(out)
}

pub fn decode_vo(bytes: &[u8]) -> Result<Vec<VoEntry>> {
    let mut vo = vec![];
    let mut rest = bytes;
    while let Some((&tag, tail)) = rest.split_first() {
        let (entry, tail) = match tag {
            TAG_NODE_DATA => {
                let (len, tail) = take(tail, 4)?;
                let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
                let (s, tail) = take(tail, len)?;
                let s = std::str::from_utf8(s)
                    .map_err(|e| Error::MalformedVo(format!("node data is not utf-8: {e}")))?;
                (VoEntry::NodeData(s.to_owned()), tail)
            }
            TAG_DIGEST => {
                let (d, tail) = take(tail, DIGEST_LEN)?;
                let mut raw = [0; DIGEST_LEN];
                raw.copy_from_slice(d);
                (VoEntry::Digest(Digest(raw)), tail)
            }
            TAG_SPECIAL => {
                let (c, tail) = take(tail, 1)?;
                (VoEntry::Special(c[0] as char), tail)
            }
            other => return Err(Error::UnknownToken(format!("tag byte {other:#04x}"))),
        };
        vo.push(entry);
        rest = tail;
    }
    Ok(vo)
}

fn take(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if bytes.len() < n {
        return Err(Error::MalformedVo(format!(
            "truncated: needed {n} bytes, {} left",
            bytes.len()
        )));
    }
    Ok(bytes.split_at(n))
}

/// Encoded size in bytes.
pub fn vo_size(vo: &[VoEntry]) -> usize {
    vo.iter()
        .map(|e| match e {
            VoEntry::NodeData(s) => 1 + 4 + s.len(),
            VoEntry::Digest(_) => 1 + DIGEST_LEN,
            VoEntry::Special(_) => 2,
        })
        .sum()
}

/// Splits `"v/a/b"` into `v` and `{a, b}`.
fn parse_adjacency(s: &str) -> Result<(VertexId, BTreeSet<VertexId>)> {
    let mut ids = s.split('/').map(|t| {
        t.parse::<VertexId>()
            .map_err(|e| Error::MalformedVo(format!("bad vertex id {t:?}: {e}")))
    });
    let v = ids
        .next()
        .ok_or_else(|| Error::MalformedVo("empty adjacency".to_owned()))??;
    Ok((v, ids.collect::<Result<_>>()?))
}

/// What a VO claims, before it is checked against a trusted root.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Digest the stream folds into.
    pub root: Digest,
    /// Adjacency inside the answer, per answer vertex.
    pub subgraph: BTreeMap<VertexId, BTreeSet<VertexId>>,
    /// Full-graph adjacency, per answer vertex.
    pub full: BTreeMap<VertexId, BTreeSet<VertexId>>,
}

/// Deepest bracket nesting a replay accepts. A B+-tree with fanout >= 3 stays
/// far shallower than this for any vertex count that fits in memory.
pub const MAX_VO_DEPTH: usize = 64;

/// Replays a VO, rebuilding the root digest it commits to.
///
/// Only the full-graph half of each node data is hashed, as leaf digests are.
/// The answer half is not covered by the root; [`verify`] checks it against
/// the full half instead.
pub fn replay(vo: &[VoEntry]) -> Result<Replay> {
    let mut out = Replay::default();
    // One hasher per open group, innermost last.
    let mut groups: Vec<Hasher> = vec![];
    let mut root = None;
    for (pos, entry) in vo.iter().enumerate() {
        if root.is_some() {
            return Err(Error::MalformedVo(format!(
                "{} trailing tokens after the root group",
                vo.len() - pos
            )));
        }
        let unopened =
            || Error::MalformedVo(format!("expected '{OPEN}' at token {pos}, found {entry:?}"));
        match entry {
            VoEntry::Special(OPEN) => {
                if groups.len() == MAX_VO_DEPTH {
                    return Err(Error::MalformedVo(format!(
                        "groups nested deeper than {MAX_VO_DEPTH} at token {pos}"
                    )));
                }
                groups.push(Hasher::new());
            }
            VoEntry::Special(CLOSE) => {
                let d = groups.pop().ok_or_else(unopened)?.finalize();
                match groups.last_mut() {
                    Some(parent) => parent.update(&d),
                    None => root = Some(d),
                }
            }
            VoEntry::Special(c) => return Err(Error::UnknownToken(c.to_string())),
            VoEntry::Digest(d) => groups.last_mut().ok_or_else(unopened)?.update(d),
            VoEntry::NodeData(s) => {
                let h = groups.last_mut().ok_or_else(unopened)?;
                let (sub, full) = s
                    .split_once('|')
                    .ok_or_else(|| Error::MalformedVo(format!("node data without '|': {s:?}")))?;
                let (v, sub_adj) = parse_adjacency(sub)?;
                let (w, full_adj) = parse_adjacency(full)?;
                if v != w {
                    return Err(Error::MalformedVo(format!(
                        "node data names vertices {v} and {w}"
                    )));
                }
                if out.full.contains_key(&v) {
                    return Err(Error::MalformedVo(format!("vertex {v} appears twice")));
                }
                h.update(&Digest::of(full.as_bytes()));
                out.subgraph.insert(v, sub_adj);
                out.full.insert(v, full_adj);
            }
        }
    }
    out.root = match root {
        Some(root) => root,
        None if vo.is_empty() => return Err(Error::MalformedVo("empty stream".to_owned())),
        None => return Err(Error::MalformedVo("unterminated group".to_owned())),
    };
    Ok(out)
}

/// A subgraph proven to be part of the graph committed to by a trusted root.
#[derive(Debug, Clone)]
pub struct VerifiedAnswer {
    pub root: Digest,
    pub subgraph: Graph,
}

impl VerifiedAnswer {
    /// Is the answer a connected subgraph containing q with minimum degree >= k?
    pub fn is_community(&self, q: VertexId, k: usize) -> bool {
        self.subgraph.has_vertex(q)
            && self.subgraph.component(q).len() == self.subgraph.vertex_count()
            && self.subgraph.min_degree().is_some_and(|d| d >= k)
    }

    pub fn vertices(&self) -> BTreeSet<VertexId> {
        self.subgraph.vertices().collect()
    }
}

/// Replays `vo`, then checks it against `trusted_root` and checks that every
/// answer vertex keeps exactly its full-graph neighbours within the answer.
pub fn verify(vo: &[VoEntry], trusted_root: &Digest) -> Result<VerifiedAnswer, ProofError> {
    let replay = replay(vo)?;
    if replay.root != *trusted_root {
        log::warn!("verification object rejected: root digest mismatch");
        return Err(ProofError::DigestMismatch {
            expected: trusted_root.to_hex(),
            computed: replay.root.to_hex(),
        });
    }
    let answer: BTreeSet<VertexId> = replay.subgraph.keys().copied().collect();
    let mut subgraph = Graph::new();
    for (&v, sub) in &replay.subgraph {
        let expected: BTreeSet<VertexId> = replay.full[&v].intersection(&answer).copied().collect();
        if *sub != expected {
            return Err(ProofError::Inconsistent(format!(
                "vertex {v} claims answer neighbours {sub:?}, graph says {expected:?}"
            )));
        }
        subgraph.add_vertex(v);
        for &u in sub {
            subgraph.add_edge(v, u);
        }
    }
    Ok(VerifiedAnswer {
        root: replay.root,
        subgraph,
    })
}
