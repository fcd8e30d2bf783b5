use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Debug, Formatter},
    ops::Bound,
};

use debug_tree::{add_branch_to, AsTree, TreeBuilder};

use crate::{
    digest::{Digest, Hasher},
    error::{Error, Result},
    graph::VertexId,
};

pub mod vo;

use vo::VoEntry;

type Idx = usize;

/// Fanout of an [`MbpTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbpConfig {
    /// Most entries in a leaf, and most children of an internal node.
    pub max_capacity: usize,
}

impl Default for MbpConfig {
    fn default() -> Self {
        Self { max_capacity: 4 }
    }
}

impl MbpConfig {
    pub fn new(max_capacity: usize) -> Result<Self> {
        let config = Self { max_capacity };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_capacity < 3 {
            return Err(Error::InvalidConfig(format!(
                "B+-tree fanout must be at least 3, got {}",
                self.max_capacity
            )));
        }
        Ok(())
    }

    /// Fewest entries (or children) a non-root node may hold.
    pub fn min_capacity(&self) -> usize {
        self.max_capacity.div_ceil(2)
    }
}

#[derive(Debug, Clone)]
enum Body {
    Leaf(Vec<(VertexId, Digest)>),
    /// `keys[i]` is a lower bound of every key under `children[i + 1]`.
    Internal {
        keys: Vec<VertexId>,
        children: Vec<Idx>,
    },
}

impl Body {
    fn len(&self) -> usize {
        match self {
            Body::Leaf(entries) => entries.len(),
            Body::Internal { children, .. } => children.len(),
        }
    }

    /// Moves the last item of `self` to the front of `right`. Returns the new
    /// separator between the two.
    fn shift_right(&mut self, right: &mut Body, sep: VertexId) -> Result<VertexId> {
        match (self, right) {
            (Body::Leaf(le), Body::Leaf(re)) => {
                let e = le.pop().ok_or_else(|| shape("borrow from an empty leaf"))?;
                re.insert(0, e);
                Ok(e.0)
            }
            (
                Body::Internal {
                    keys: lk,
                    children: lc,
                },
                Body::Internal {
                    keys: rk,
                    children: rc,
                },
            ) => {
                let c = lc.pop().ok_or_else(|| shape("borrow from an empty node"))?;
                rc.insert(0, c);
                rk.insert(0, sep);
                lk.pop().ok_or_else(|| shape("internal node without keys"))
            }
            _ => Err(shape("siblings at different heights")),
        }
    }

    /// Moves the first item of `right` to the end of `self`. Returns the new
    /// separator between the two.
    fn shift_left(&mut self, right: &mut Body, sep: VertexId) -> Result<VertexId> {
        match (self, right) {
            (Body::Leaf(le), Body::Leaf(re)) => {
                if re.len() < 2 {
                    return Err(shape("borrow would empty a leaf"));
                }
                le.push(re.remove(0));
                Ok(re[0].0)
            }
            (
                Body::Internal {
                    keys: lk,
                    children: lc,
                },
                Body::Internal {
                    keys: rk,
                    children: rc,
                },
            ) => {
                if rc.len() < 2 || rk.is_empty() {
                    return Err(shape("borrow would empty a node"));
                }
                lc.push(rc.remove(0));
                lk.push(sep);
                Ok(rk.remove(0))
            }
            _ => Err(shape("siblings at different heights")),
        }
    }

    /// Appends all of `right` to `self`.
    fn absorb(&mut self, right: Body, sep: VertexId) -> Result<()> {
        match (self, right) {
            (Body::Leaf(le), Body::Leaf(re)) => le.extend(re),
            (
                Body::Internal {
                    keys: lk,
                    children: lc,
                },
                Body::Internal {
                    keys: rk,
                    children: rc,
                },
            ) => {
                lk.push(sep);
                lk.extend(rk);
                lc.extend(rc);
            }
            _ => return Err(shape("siblings at different heights")),
        }
        Ok(())
    }
}

fn shape(msg: &str) -> Error {
    Error::InvariantViolation(format!("mbp tree: {msg}"))
}

#[derive(Debug, Clone)]
struct Node {
    digest: Digest,
    body: Body,
}

impl Node {
    fn leaf(entries: Vec<(VertexId, Digest)>) -> Self {
        Self {
            digest: Digest::default(),
            body: Body::Leaf(entries),
        }
    }
}

/// B+-tree from vertex id to content digest, where every node also carries a
/// digest of its subtree. Node digests are refreshed in batch by
/// [`MbpTree::digest_compute`]; until then they are stale.
#[derive(Clone)]
pub struct MbpTree {
    nodes: Vec<Node>,
    free: Vec<Idx>,
    root: Idx,
    config: MbpConfig,
    len: usize,
    stale: bool,
}

impl Debug for MbpTree {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let builder = TreeBuilder::new();
        let _b = builder.add_branch(&format!(
            "MbpTree ({} entries, fanout {})",
            self.len, self.config.max_capacity
        ));
        self.tree_dbg(self.root, &builder);
        writeln!(f, "{}", builder.string())
    }
}

impl Default for MbpTree {
    fn default() -> Self {
        Self {
            nodes: vec![Node::leaf(vec![])],
            free: vec![],
            root: 0,
            config: MbpConfig::default(),
            len: 0,
            stale: true,
        }
    }
}

impl MbpTree {
    pub fn new(config: MbpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    /// Builds a tree holding `entries` and computes its digests.
    pub fn from_entries(
        config: MbpConfig,
        entries: impl IntoIterator<Item = (VertexId, Digest)>,
    ) -> Result<Self> {
        let mut t = Self::new(config)?;
        for (v, d) in entries {
            t.set_digest(v, d)?;
        }
        t.digest_compute();
        Ok(t)
    }

    fn tree_dbg<T: AsTree>(&self, u: Idx, tree: &T) {
        let nu = &self.nodes[u];
        match &nu.body {
            Body::Leaf(entries) => {
                add_branch_to!(*tree, "[{u}] leaf {:?} {entries:?}", nu.digest);
            }
            Body::Internal { keys, children } => {
                add_branch_to!(*tree, "[{u}] keys {keys:?} {:?}", nu.digest);
                for &c in children {
                    self.tree_dbg(c, tree);
                }
            }
        }
    }

    fn alloc(&mut self, node: Node) -> Idx {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, u: Idx) {
        self.nodes[u] = Node::leaf(vec![]);
        self.free.push(u);
    }

    fn take_body(&mut self, u: Idx) -> Body {
        std::mem::replace(&mut self.nodes[u].body, Body::Leaf(vec![]))
    }

    pub fn config(&self) -> MbpConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether leaf digests changed since the last [`MbpTree::digest_compute`].
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Number of levels, 1 for a lone leaf.
    pub fn depth(&self) -> usize {
        let mut d = 1;
        let mut u = self.root;
        while let Body::Internal { children, .. } = &self.nodes[u].body {
            u = children[0];
            d += 1;
        }
        d
    }

    pub fn root_digest(&self) -> Digest {
        self.nodes[self.root].digest
    }

    fn leaf_of(&self, v: VertexId) -> &[(VertexId, Digest)] {
        let mut u = self.root;
        loop {
            match &self.nodes[u].body {
                Body::Leaf(entries) => return entries,
                Body::Internal { keys, children } => {
                    u = children[keys.partition_point(|&k| k <= v)];
                }
            }
        }
    }

    pub fn get_digest(&self, v: VertexId) -> Result<Digest> {
        let entries = self.leaf_of(v);
        entries
            .binary_search_by_key(&v, |e| e.0)
            .map(|i| entries[i].1)
            .map_err(|_| Error::VertexNotFound(v))
    }

    pub fn contains(&self, v: VertexId) -> bool {
        self.get_digest(v).is_ok()
    }

    /// All keys, ascending.
    pub fn keys(&self) -> Vec<VertexId> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_keys(self.root, &mut out);
        out
    }

    fn collect_keys(&self, u: Idx, out: &mut Vec<VertexId>) {
        match &self.nodes[u].body {
            Body::Leaf(entries) => out.extend(entries.iter().map(|e| e.0)),
            Body::Internal { children, .. } => {
                for &c in children {
                    self.collect_keys(c, out);
                }
            }
        }
    }

    /// Inserts v or replaces its digest. Node digests become stale.
    pub fn set_digest(&mut self, v: VertexId, digest: Digest) -> Result<()> {
        self.stale = true;
        if let Some((sep, right)) = self.insert_rec(self.root, v, digest)? {
            log::trace!("mbp root split at {sep}");
            let old = self.root;
            self.root = self.alloc(Node {
                digest: Digest::default(),
                body: Body::Internal {
                    keys: vec![sep],
                    children: vec![old, right],
                },
            });
        }
        Ok(())
    }

    /// Returns the separator and new right sibling if u split.
    fn insert_rec(
        &mut self,
        u: Idx,
        v: VertexId,
        digest: Digest,
    ) -> Result<Option<(VertexId, Idx)>> {
        let max = self.config.max_capacity;
        let child = match &mut self.nodes[u].body {
            Body::Leaf(entries) => {
                match entries.binary_search_by_key(&v, |e| e.0) {
                    Ok(i) => entries[i].1 = digest,
                    Err(i) => {
                        entries.insert(i, (v, digest));
                        self.len += 1;
                    }
                }
                if entries.len() <= max {
                    return Ok(None);
                }
                let right = entries.split_off(entries.len() / 2);
                let sep = right[0].0;
                let r = self.alloc(Node::leaf(right));
                return Ok(Some((sep, r)));
            }
            Body::Internal { keys, children } => {
                let i = keys.partition_point(|&k| k <= v);
                (i, children[i])
            }
        };
        let (i, c) = child;
        let Some((sep, r)) = self.insert_rec(c, v, digest)? else {
            return Ok(None);
        };
        let Body::Internal { keys, children } = &mut self.nodes[u].body else {
            return Err(shape("node changed kind during insert"));
        };
        keys.insert(i, sep);
        children.insert(i + 1, r);
        if children.len() <= max {
            return Ok(None);
        }
        let mid = children.len() / 2;
        let right_children = children.split_off(mid);
        let mut right_keys = keys.split_off(mid - 1);
        let up = right_keys.remove(0);
        let r = self.alloc(Node {
            digest: Digest::default(),
            body: Body::Internal {
                keys: right_keys,
                children: right_children,
            },
        });
        Ok(Some((up, r)))
    }

    /// Removes v, returning its digest. Node digests become stale.
    pub fn remove(&mut self, v: VertexId) -> Result<Digest> {
        let d = self.remove_rec(self.root, v)?;
        self.stale = true;
        if let Body::Internal { children, .. } = &self.nodes[self.root].body {
            if children.len() == 1 {
                let old = self.root;
                self.root = children[0];
                self.release(old);
                log::trace!("mbp root shrunk, depth now {}", self.depth());
            }
        }
        Ok(d)
    }

    fn remove_rec(&mut self, u: Idx, v: VertexId) -> Result<Digest> {
        let (i, c) = match &mut self.nodes[u].body {
            Body::Leaf(entries) => {
                let i = entries
                    .binary_search_by_key(&v, |e| e.0)
                    .map_err(|_| Error::VertexNotFound(v))?;
                self.len -= 1;
                return Ok(entries.remove(i).1);
            }
            Body::Internal { keys, children } => {
                let i = keys.partition_point(|&k| k <= v);
                (i, children[i])
            }
        };
        let d = self.remove_rec(c, v)?;
        if self.nodes[c].body.len() < self.config.min_capacity() {
            self.rebalance(u, i)?;
        }
        Ok(d)
    }

    /// children[i] of u is one short: borrow from a sibling or merge with one.
    fn rebalance(&mut self, u: Idx, i: usize) -> Result<()> {
        let min = self.config.min_capacity();
        let (mut keys, mut children) = match self.take_body(u) {
            Body::Internal { keys, children } => (keys, children),
            leaf => {
                self.nodes[u].body = leaf;
                return Err(shape("rebalancing under a leaf"));
            }
        };
        let c = children[i];
        let left = i.checked_sub(1).map(|j| children[j]);
        let right = children.get(i + 1).copied();
        let len = |t: &Self, x: Option<Idx>| x.map_or(0, |x| t.nodes[x].body.len());

        let res = if let (Some(l), true) = (left, len(self, left) > min) {
            log::trace!("node {c} borrows from left sibling {l}");
            let mut lb = self.take_body(l);
            let mut cb = self.take_body(c);
            let res = lb.shift_right(&mut cb, keys[i - 1]).map(|sep| keys[i - 1] = sep);
            self.nodes[l].body = lb;
            self.nodes[c].body = cb;
            res
        } else if let (Some(r), true) = (right, len(self, right) > min) {
            log::trace!("node {c} borrows from right sibling {r}");
            let mut cb = self.take_body(c);
            let mut rb = self.take_body(r);
            let res = cb.shift_left(&mut rb, keys[i]).map(|sep| keys[i] = sep);
            self.nodes[c].body = cb;
            self.nodes[r].body = rb;
            res
        } else if let Some(l) = left {
            log::trace!("node {c} merges into left sibling {l}");
            let cb = self.take_body(c);
            let res = self.nodes[l].body.absorb(cb, keys[i - 1]);
            keys.remove(i - 1);
            children.remove(i);
            self.release(c);
            res
        } else if let Some(r) = right {
            log::trace!("right sibling {r} merges into node {c}");
            let rb = self.take_body(r);
            let res = self.nodes[c].body.absorb(rb, keys[i]);
            keys.remove(i);
            children.remove(i + 1);
            self.release(r);
            res
        } else {
            // Only child: u is the root and is shrunk by the caller.
            Ok(())
        };
        self.nodes[u].body = Body::Internal { keys, children };
        res
    }

    /// Recomputes every node digest bottom-up.
    pub fn digest_compute(&mut self) -> Digest {
        let d = self.compute(self.root);
        self.stale = false;
        log::debug!("mbp root digest {d} over {} entries", self.len);
        d
    }

    fn compute(&mut self, u: Idx) -> Digest {
        let mut h = Hasher::new();
        match &self.nodes[u].body {
            Body::Leaf(entries) => {
                for (_, d) in entries {
                    h.update(d);
                }
            }
            Body::Internal { children, .. } => {
                for c in children.clone() {
                    let d = self.compute(c);
                    h.update(&d);
                }
            }
        }
        let d = h.finalize();
        self.nodes[u].digest = d;
        d
    }

    /// Proof covering every vertex of `vids`. Subtrees without any of them are
    /// summarized by their digest. `serialized` supplies the node data text of
    /// each vertex in `vids`.
    pub fn construct_vo(
        &self,
        vids: &BTreeSet<VertexId>,
        serialized: &BTreeMap<VertexId, String>,
    ) -> Result<Vec<VoEntry>> {
        for &v in vids {
            if !self.contains(v) || !serialized.contains_key(&v) {
                return Err(Error::VertexNotFound(v));
            }
        }
        if self.stale {
            log::warn!("constructing a verification object over stale digests");
        }
        let mut vo = vec![];
        self.vo_rec(self.root, None, None, vids, serialized, &mut vo)?;
        log::debug!(
            "vo over {} vertices: {} tokens, {} bytes",
            vids.len(),
            vo.len(),
            vo::vo_size(&vo)
        );
        Ok(vo)
    }

    fn vo_rec(
        &self,
        u: Idx,
        lo: Option<VertexId>,
        hi: Option<VertexId>,
        vids: &BTreeSet<VertexId>,
        serialized: &BTreeMap<VertexId, String>,
        vo: &mut Vec<VoEntry>,
    ) -> Result<()> {
        vo.push(VoEntry::Special(vo::OPEN));
        match &self.nodes[u].body {
            Body::Leaf(entries) => {
                for (v, d) in entries {
                    match serialized.get(v) {
                        Some(s) if vids.contains(v) => vo.push(VoEntry::NodeData(s.clone())),
                        _ => vo.push(VoEntry::Digest(*d)),
                    }
                }
            }
            Body::Internal { keys, children } => {
                for (j, &c) in children.iter().enumerate() {
                    let clo = if j == 0 { lo } else { Some(keys[j - 1]) };
                    let chi = keys.get(j).copied().or(hi);
                    if overlaps(vids, clo, chi) {
                        self.vo_rec(c, clo, chi, vids, serialized, vo)?;
                    } else {
                        vo.push(VoEntry::Digest(self.nodes[c].digest));
                    }
                }
            }
        }
        vo.push(VoEntry::Special(vo::CLOSE));
        Ok(())
    }

    /// Structural validation: key order, separators, fill and uniform depth.
    pub fn check(&self) -> Result<()> {
        let mut count = 0;
        let mut leaf_depth = None;
        self.check_rec(self.root, None, None, 1, &mut leaf_depth, &mut count)?;
        if count != self.len {
            return Err(shape(&format!("{count} entries found, {} recorded", self.len)));
        }
        Ok(())
    }

    fn check_rec(
        &self,
        u: Idx,
        lo: Option<VertexId>,
        hi: Option<VertexId>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        count: &mut usize,
    ) -> Result<()> {
        let in_range = |k: VertexId| lo.map_or(true, |l| l <= k) && hi.map_or(true, |h| k < h);
        let body = &self.nodes[u].body;
        let len = body.len();
        if len > self.config.max_capacity {
            return Err(shape(&format!("node {u} overfull ({len})")));
        }
        if u != self.root && len < self.config.min_capacity() {
            return Err(shape(&format!("node {u} underfull ({len})")));
        }
        match body {
            Body::Leaf(entries) => {
                if *leaf_depth.get_or_insert(depth) != depth {
                    return Err(shape(&format!("leaf {u} at depth {depth}")));
                }
                if !entries.windows(2).all(|w| w[0].0 < w[1].0) {
                    return Err(shape(&format!("leaf {u} keys out of order")));
                }
                if !entries.iter().all(|e| in_range(e.0)) {
                    return Err(shape(&format!("leaf {u} key outside separators")));
                }
                *count += entries.len();
            }
            Body::Internal { keys, children } => {
                if u == self.root && children.len() < 2 {
                    return Err(shape("internal root with a single child"));
                }
                if keys.len() + 1 != children.len() {
                    return Err(shape(&format!("node {u} has mismatched keys")));
                }
                if !keys.windows(2).all(|w| w[0] < w[1]) || !keys.iter().all(|&k| in_range(k)) {
                    return Err(shape(&format!("node {u} separators out of order")));
                }
                for (j, &c) in children.iter().enumerate() {
                    let clo = if j == 0 { lo } else { Some(keys[j - 1]) };
                    let chi = keys.get(j).copied().or(hi);
                    self.check_rec(c, clo, chi, depth + 1, leaf_depth, count)?;
                }
            }
        }
        Ok(())
    }
}

/// Does `vids` have a key in `[lo, hi)`?
fn overlaps(vids: &BTreeSet<VertexId>, lo: Option<VertexId>, hi: Option<VertexId>) -> bool {
    if let (Some(l), Some(h)) = (lo, hi) {
        if l >= h {
            return false;
        }
    }
    let lo = lo.map_or(Bound::Unbounded, Bound::Included);
    let hi = hi.map_or(Bound::Unbounded, Bound::Excluded);
    vids.range((lo, hi)).next().is_some()
}
