use std::{
    collections::HashMap,
    fmt::{Debug, Display, Formatter},
};

use debug_tree::{add_branch_to, AsTree, TreeBuilder};
use derivative::Derivative;

use super::{check_position, OrderList};
use crate::{
    error::{Error, Result},
    graph::VertexId,
};

type Idx = usize;
const EMPTY: Idx = usize::MAX;

fn node_fmt(u: &Idx, f: &mut Formatter) -> std::fmt::Result {
    if *u == EMPTY {
        write!(f, "∅")
    } else {
        write!(f, "{u}")
    }
}
fn node2_fmt([u, v]: &[Idx; 2], f: &mut Formatter) -> std::fmt::Result {
    write!(f, "[")?;
    node_fmt(u, f)?;
    write!(f, ", ")?;
    node_fmt(v, f)?;
    write!(f, "]")
}

/// Used to pretty print an arena index, outputting ∅ if it is EMPTY.
struct PrettyIdx(Idx);

impl Display for PrettyIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        node_fmt(&self.0, f)
    }
}

use PrettyIdx as I;

#[derive(Derivative)]
#[derivative(Debug)]
struct Node {
    #[derivative(Debug(format_with = "node_fmt"))]
    parent: Idx,
    /// Left and right child
    #[derivative(Debug(format_with = "node2_fmt"))]
    child: [Idx; 2],
    vertex: VertexId,
    size: usize,
    height: usize,
}

impl Node {
    fn new(vertex: VertexId) -> Self {
        Self {
            parent: EMPTY,
            child: [EMPTY; 2],
            vertex,
            size: 1,
            height: 1,
        }
    }
}

/// Order-statistics AVL tree keyed by position. Nodes live in an arena; parent
/// links are plain indices used only to walk upwards.
pub struct RankTree {
    nodes: Vec<Node>,
    /// Arena slots released by `erase`.
    free: Vec<Idx>,
    root: Idx,
    index: HashMap<VertexId, Idx>,
}

impl Debug for RankTree {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let builder = TreeBuilder::new();
        let _b = builder.add_branch(&format!("RankTree ({} vertices)", self.len()));
        if self.root != EMPTY {
            self.tree_inorder_dbg(self.root, &builder);
        }
        writeln!(f, "{}", builder.string())
    }
}

impl Default for RankTree {
    fn default() -> Self {
        Self {
            nodes: vec![],
            free: vec![],
            root: EMPTY,
            index: HashMap::new(),
        }
    }
}

impl RankTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree_inorder_dbg<T: AsTree>(&self, u: Idx, tree: &T) {
        let nu = &self.nodes[u];
        if nu.child[0] != EMPTY {
            add_branch_to!(*tree, "left child of {u}");
            self.tree_inorder_dbg(nu.child[0], tree);
        }
        add_branch_to!(*tree, "[{u}] {nu:?}");
        if nu.child[1] != EMPTY {
            self.tree_inorder_dbg(nu.child[1], tree);
        }
    }

    fn n(&self, u: Idx) -> Option<&Node> {
        if u == EMPTY {
            None
        } else {
            Some(&self.nodes[u])
        }
    }
    fn size(&self, u: Idx) -> usize {
        self.n(u).map_or(0, |n| n.size)
    }
    fn height(&self, u: Idx) -> usize {
        self.n(u).map_or(0, |n| n.height)
    }
    fn parent(&self, u: Idx) -> Idx {
        self.n(u).map_or(EMPTY, |n| n.parent)
    }
    /// Left height minus right height.
    fn balance(&self, u: Idx) -> isize {
        let [l, r] = self.nodes[u].child;
        self.height(l) as isize - self.height(r) as isize
    }
    /// 0 if u is the left child of its parent, 1 if the right one.
    fn side(&self, u: Idx) -> usize {
        (self.nodes[self.nodes[u].parent].child[1] == u) as usize
    }
    // Call when children are changed.
    fn recalc(&mut self, u: Idx) {
        let [l, r] = self.nodes[u].child;
        self.nodes[u].size = self.size(l) + 1 + self.size(r);
        self.nodes[u].height = self.height(l).max(self.height(r)) + 1;
    }

    fn alloc(&mut self, vertex: VertexId) -> Idx {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Node::new(vertex);
                idx
            }
            None => {
                self.nodes.push(Node::new(vertex));
                self.nodes.len() - 1
            }
        };
        self.index.insert(vertex, idx);
        idx
    }

    /// Puts `new` where `old` hangs from `parent` (or at the root).
    fn replace_child(&mut self, parent: Idx, old: Idx, new: Idx) {
        if parent == EMPTY {
            self.root = new;
        } else {
            let side = (self.nodes[parent].child[1] == old) as usize;
            self.nodes[parent].child[side] = new;
        }
        if new != EMPTY {
            self.nodes[new].parent = parent;
        }
    }

    /// Rotates x above its parent.
    fn rotate_up(&mut self, x: Idx) {
        let p = self.nodes[x].parent;
        let g = self.nodes[p].parent;
        let side = self.side(x);
        log::trace!("rotate {x} above {p}");
        let inner = self.nodes[x].child[side ^ 1];
        self.nodes[p].child[side] = inner;
        if inner != EMPTY {
            self.nodes[inner].parent = p;
        }
        self.replace_child(g, p, x);
        self.nodes[x].child[side ^ 1] = p;
        self.nodes[p].parent = x;
        self.recalc(p);
        self.recalc(x);
    }

    /// Restores sizes, heights and AVL balance from u up to the root.
    fn fix_up(&mut self, mut u: Idx) {
        while u != EMPTY {
            self.recalc(u);
            let bf = self.balance(u);
            if bf.abs() > 1 {
                let heavy = (bf < 0) as usize;
                let c = self.nodes[u].child[heavy];
                let cb = self.balance(c);
                if (heavy == 0 && cb < 0) || (heavy == 1 && cb > 0) {
                    let gc = self.nodes[c].child[heavy ^ 1];
                    self.rotate_up(gc);
                    self.rotate_up(gc);
                    u = gc;
                } else {
                    self.rotate_up(c);
                    u = c;
                }
            }
            u = self.nodes[u].parent;
        }
    }

    fn leftmost(&self, mut u: Idx) -> Idx {
        while self.nodes[u].child[0] != EMPTY {
            u = self.nodes[u].child[0];
        }
        u
    }

    fn build_range(&mut self, vs: &[VertexId], parent: Idx) -> Idx {
        if vs.is_empty() {
            return EMPTY;
        }
        let mid = vs.len() / 2;
        let u = self.alloc(vs[mid]);
        self.nodes[u].parent = parent;
        let l = self.build_range(&vs[..mid], u);
        let r = self.build_range(&vs[mid + 1..], u);
        self.nodes[u].child = [l, r];
        self.recalc(u);
        u
    }

    fn node_of(&self, v: VertexId) -> Result<Idx> {
        self.index.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    fn violation(msg: String) -> Error {
        Error::InvariantViolation(format!("rank tree: {msg}"))
    }
}

impl OrderList for RankTree {
    fn insert_at(&mut self, rank: usize, v: VertexId) -> Result<()> {
        let len = self.len();
        if rank == 0 || rank > len + 1 {
            return Err(Error::InvalidRange {
                position: rank,
                len,
            });
        }
        if self.index.contains_key(&v) {
            return Err(Error::Duplicate(v));
        }
        let x = self.alloc(v);
        if self.root == EMPTY {
            self.root = x;
            return Ok(());
        }
        // Number of elements that must end up before x.
        let mut k = rank - 1;
        let mut u = self.root;
        loop {
            let szl = self.size(self.nodes[u].child[0]);
            let dir = if k <= szl {
                0
            } else {
                k -= szl + 1;
                1
            };
            let c = self.nodes[u].child[dir];
            if c == EMPTY {
                self.nodes[u].child[dir] = x;
                self.nodes[x].parent = u;
                break;
            }
            u = c;
        }
        log::trace!("insert {v} at rank {rank} under {u}");
        self.fix_up(u);
        Ok(())
    }

    fn erase(&mut self, v: VertexId) -> Result<()> {
        let u = self.node_of(v)?;
        self.index.remove(&v);
        let [l, r] = self.nodes[u].child;
        let p = self.nodes[u].parent;
        let fix_from = if l != EMPTY && r != EMPTY {
            // Splice the in-order successor into u's place.
            let s = self.leftmost(r);
            let from = if s != r {
                let sp = self.nodes[s].parent;
                let sr = self.nodes[s].child[1];
                self.replace_child(sp, s, sr);
                self.nodes[s].child[1] = r;
                self.nodes[r].parent = s;
                sp
            } else {
                s
            };
            self.nodes[s].child[0] = l;
            self.nodes[l].parent = s;
            self.replace_child(p, u, s);
            from
        } else {
            let c = if l != EMPTY { l } else { r };
            self.replace_child(p, u, c);
            p
        };
        log::trace!(
            "erase {v} (node {u}), rebalance from {}",
            I(fix_from)
        );
        self.nodes[u] = Node::new(v);
        self.free.push(u);
        self.fix_up(fix_from);
        Ok(())
    }

    fn rank(&self, v: VertexId) -> Result<usize> {
        let mut u = self.node_of(v)?;
        let mut ord = self.size(self.nodes[u].child[0]) + 1;
        while self.parent(u) != EMPTY {
            let p = self.nodes[u].parent;
            if self.nodes[p].child[1] == u {
                ord += self.size(self.nodes[p].child[0]) + 1;
            }
            u = p;
        }
        Ok(ord)
    }

    fn at(&self, rank: usize) -> Result<VertexId> {
        check_position(rank, self.len())?;
        let mut k = rank - 1;
        let mut u = self.root;
        while u != EMPTY {
            let [l, r] = self.nodes[u].child;
            let sl = self.size(l);
            if sl > k {
                u = l;
            } else if sl == k {
                return Ok(self.nodes[u].vertex);
            } else {
                k -= sl + 1;
                u = r;
            }
        }
        Err(Self::violation(format!("sizes do not account for rank {rank}")))
    }

    fn len(&self) -> usize {
        self.size(self.root)
    }

    fn contains(&self, v: VertexId) -> bool {
        self.index.contains_key(&v)
    }

    fn vertices(&self) -> Vec<VertexId> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack = vec![];
        let mut u = self.root;
        while u != EMPTY || !stack.is_empty() {
            while u != EMPTY {
                stack.push(u);
                u = self.nodes[u].child[0];
            }
            if let Some(top) = stack.pop() {
                out.push(self.nodes[top].vertex);
                u = self.nodes[top].child[1];
            }
        }
        out
    }

    fn from_ordered(vs: &[VertexId]) -> Result<Self> {
        let mut t = Self::new();
        t.nodes.reserve(vs.len());
        t.root = t.build_range(vs, EMPTY);
        if t.index.len() != vs.len() {
            // A repeated vertex would leave two nodes behind one index entry.
            let mut seen = std::collections::HashSet::new();
            let dup = vs.iter().copied().find(|v| !seen.insert(*v));
            return Err(Error::Duplicate(dup.unwrap_or_default()));
        }
        Ok(t)
    }

    fn check(&self) -> Result<()> {
        if self.parent(self.root) != EMPTY {
            return Err(Self::violation("root has a parent".to_owned()));
        }
        let mut visited = 0;
        let mut stack: Vec<Idx> = self.n(self.root).map(|_| self.root).into_iter().collect();
        while let Some(u) = stack.pop() {
            visited += 1;
            if visited > self.index.len() {
                return Err(Self::violation("cycle detected".to_owned()));
            }
            let nu = &self.nodes[u];
            if self.index.get(&nu.vertex) != Some(&u) {
                return Err(Self::violation(format!("vertex {} not indexed", nu.vertex)));
            }
            let [l, r] = nu.child;
            for c in [l, r] {
                if c != EMPTY {
                    if self.nodes[c].parent != u {
                        return Err(Self::violation(format!("bad parent link at {c}")));
                    }
                    stack.push(c);
                }
            }
            if nu.size != self.size(l) + 1 + self.size(r) {
                return Err(Self::violation(format!("stale size at {u}")));
            }
            if nu.height != self.height(l).max(self.height(r)) + 1 {
                return Err(Self::violation(format!("stale height at {u}")));
            }
            if self.balance(u).abs() > 1 {
                return Err(Self::violation(format!("unbalanced at {u}")));
            }
        }
        if visited != self.index.len() {
            return Err(Self::violation(format!(
                "{visited} reachable nodes but {} indexed",
                self.index.len()
            )));
        }
        Ok(())
    }
}
