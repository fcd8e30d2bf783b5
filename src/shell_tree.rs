use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Debug, Formatter},
    time::{Duration, Instant},
};

use debug_tree::{add_branch_to, AsTree, TreeBuilder};
use derivative::Derivative;

use crate::{
    error::{Error, Result},
    graph::{Graph, VertexId},
};

pub type NodeId = usize;

fn parent_fmt(p: &Option<NodeId>, f: &mut Formatter) -> std::fmt::Result {
    match p {
        Some(p) => write!(f, "{p}"),
        None => write!(f, "∅"),
    }
}

/// One connected component of the subgraph induced by core numbers >= `level`,
/// minus the parts already covered by its children. Holds exactly the
/// component's vertices whose core number is `level`.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ShellNode {
    level: usize,
    vertices: Vec<VertexId>,
    #[derivative(Debug(format_with = "parent_fmt"))]
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
}

impl ShellNode {
    fn new(level: usize) -> Self {
        Self {
            level,
            vertices: vec![],
            parent: None,
            children: BTreeSet::new(),
        }
    }
    pub fn level(&self) -> usize {
        self.level
    }
    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }
}

/// Result of [`ShellTree::query`]. `vertices` is `None` when the query vertex
/// is not in any k-core.
#[derive(Debug, Clone)]
pub struct ShellAnswer {
    pub vertices: Option<BTreeSet<VertexId>>,
    pub elapsed: Duration,
}

/// Forest of nested k-core components, built from a finished decomposition.
/// It is a snapshot: rebuild it after core numbers change.
#[derive(Default, Clone)]
pub struct ShellTree {
    nodes: Vec<ShellNode>,
    component: BTreeMap<VertexId, NodeId>,
}

impl Debug for ShellTree {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let builder = TreeBuilder::new();
        let _b = builder.add_branch(&format!("ShellTree ({} nodes)", self.nodes.len()));
        for r in self.roots() {
            self.tree_dbg(r, &builder);
        }
        writeln!(f, "{}", builder.string())
    }
}

struct Builder<'a> {
    graph: &'a Graph,
    cores: &'a BTreeMap<VertexId, usize>,
    nodes: Vec<ShellNode>,
    /// Union-find over nodes; a node is its own leader while it is topmost.
    leader: Vec<NodeId>,
    alive: Vec<bool>,
    component: BTreeMap<VertexId, NodeId>,
}

impl<'a> Builder<'a> {
    fn core(&self, v: VertexId) -> Result<usize> {
        self.cores.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    fn new_node(&mut self, level: usize) -> NodeId {
        self.nodes.push(ShellNode::new(level));
        self.leader.push(self.nodes.len() - 1);
        self.alive.push(true);
        self.nodes.len() - 1
    }

    fn add_vertex(&mut self, node: NodeId, v: VertexId) {
        self.nodes[node].vertices.push(v);
        self.component.insert(v, node);
    }

    fn find(&mut self, mut x: NodeId) -> NodeId {
        let mut root = x;
        while self.leader[root] != root {
            root = self.leader[root];
        }
        while self.leader[x] != root {
            let next = self.leader[x];
            self.leader[x] = root;
            x = next;
        }
        root
    }

    /// Components of the highest level, by DFS.
    fn top_level(&mut self, level: usize, vs: &[VertexId]) -> Result<()> {
        let graph = self.graph;
        for &s in vs {
            if self.component.contains_key(&s) {
                continue;
            }
            let node = self.new_node(level);
            self.add_vertex(node, s);
            let mut stack = vec![s];
            while let Some(v) = stack.pop() {
                for u in graph.neighbors(v) {
                    if self.core(u)? >= level && !self.component.contains_key(&u) {
                        self.add_vertex(node, u);
                        stack.push(u);
                    }
                }
            }
        }
        Ok(())
    }

    /// Joins v (core `level`) to the components its neighbours already
    /// belong to.
    fn attach(&mut self, level: usize, v: VertexId) -> Result<()> {
        let graph = self.graph;
        let mut tops = BTreeSet::new();
        for u in graph.neighbors(v) {
            if self.core(u)? < level {
                continue;
            }
            if let Some(&n) = self.component.get(&u) {
                tops.insert(self.find(n));
            }
        }
        let same: Vec<NodeId> = tops
            .iter()
            .copied()
            .filter(|&t| self.nodes[t].level == level)
            .collect();
        let largest = same
            .iter()
            .copied()
            .max_by_key(|&t| self.nodes[t].vertices.len());
        let target = match largest {
            Some(t) => {
                for &o in &same {
                    if o != t {
                        self.merge(t, o);
                    }
                }
                t
            }
            None => self.new_node(level),
        };
        for t in tops {
            if self.nodes[t].level != level {
                self.nodes[t].parent = Some(target);
                self.nodes[target].children.insert(t);
                self.leader[t] = target;
            }
        }
        self.add_vertex(target, v);
        Ok(())
    }

    /// Folds same-level node `o` into `t`.
    fn merge(&mut self, t: NodeId, o: NodeId) {
        log::trace!("merge shell node {o} into {t}");
        let vertices = std::mem::take(&mut self.nodes[o].vertices);
        for v in vertices {
            self.add_vertex(t, v);
        }
        let children = std::mem::take(&mut self.nodes[o].children);
        for c in children {
            self.nodes[c].parent = Some(t);
            self.nodes[t].children.insert(c);
        }
        self.leader[o] = t;
        self.alive[o] = false;
    }

    /// Drops merged nodes and renumbers the rest.
    fn finish(self) -> ShellTree {
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut next = 0;
        for (i, &a) in self.alive.iter().enumerate() {
            if a {
                remap[i] = next;
                next += 1;
            }
        }
        let nodes = self
            .nodes
            .into_iter()
            .zip(self.alive)
            .filter(|(_, a)| *a)
            .map(|(mut n, _)| {
                n.parent = n.parent.map(|p| remap[p]);
                n.children = n.children.iter().map(|&c| remap[c]).collect();
                n
            })
            .collect();
        let component = self
            .component
            .into_iter()
            .map(|(v, n)| (v, remap[n]))
            .collect();
        ShellTree { nodes, component }
    }
}

impl ShellTree {
    /// Builds the forest from `cores`, which must cover every vertex of `graph`.
    pub fn build(graph: &Graph, cores: &BTreeMap<VertexId, usize>) -> Result<Self> {
        let start = Instant::now();
        let mut by_level: BTreeMap<usize, Vec<VertexId>> = BTreeMap::new();
        for (&v, &c) in cores {
            by_level.entry(c).or_default().push(v);
        }
        let mut b = Builder {
            graph,
            cores,
            nodes: vec![],
            leader: vec![],
            alive: vec![],
            component: BTreeMap::new(),
        };
        let mut levels = by_level.into_iter().rev();
        if let Some((top, vs)) = levels.next() {
            b.top_level(top, &vs)?;
        }
        for (level, vs) in levels {
            for v in vs {
                b.attach(level, v)?;
            }
        }
        let tree = b.finish();
        log::debug!(
            "built shell tree with {} nodes over {} vertices in {:?}",
            tree.nodes.len(),
            tree.component.len(),
            start.elapsed()
        );
        Ok(tree)
    }

    /// The vertices of the connected k-core containing v, or `None` if
    /// `core_v < k`.
    pub fn query(&self, v: VertexId, core_v: usize, k: usize) -> Result<ShellAnswer> {
        let start = Instant::now();
        if core_v < k {
            return Ok(ShellAnswer {
                vertices: None,
                elapsed: start.elapsed(),
            });
        }
        let mut cur = self.component_of(v)?;
        while let Some(p) = self.nodes[cur].parent {
            if self.nodes[p].level < k {
                break;
            }
            cur = p;
        }
        let vertices = self.closure(cur);
        Ok(ShellAnswer {
            vertices: Some(vertices),
            elapsed: start.elapsed(),
        })
    }

    /// Every vertex in the subtree of `node`.
    pub fn closure(&self, node: NodeId) -> BTreeSet<VertexId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(u) = stack.pop() {
            out.extend(self.nodes[u].vertices.iter().copied());
            stack.extend(self.nodes[u].children.iter().copied());
        }
        out
    }

    pub fn component_of(&self, v: VertexId) -> Result<NodeId> {
        self.component.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    pub fn node(&self, id: NodeId) -> Option<&ShellNode> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|&u| self.nodes[u].parent.is_none())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct levels present in the forest, ascending.
    pub fn levels(&self) -> BTreeSet<usize> {
        self.nodes.iter().map(|n| n.level).collect()
    }

    fn tree_dbg<T: AsTree>(&self, u: NodeId, tree: &T) {
        let nu = &self.nodes[u];
        add_branch_to!(*tree, "[{u}] {nu:?}");
        for &c in &nu.children {
            self.tree_dbg(c, tree);
        }
    }
}
