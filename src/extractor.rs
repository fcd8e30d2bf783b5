use std::{
    collections::{BTreeMap, BTreeSet, HashSet, VecDeque},
    time::{Duration, Instant},
};

use crate::{
    core_maintainer::CoreMaintainer,
    digest::Digest,
    error::{Error, Result},
    graph::{Graph, VertexId},
    mbp_tree::{vo::VoEntry, MbpConfig, MbpTree},
    shell_tree::ShellTree,
};

/// How [`SemiIndexExtractor::query`] finds the answer subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Candidate expansion from the query vertex, peeling if that fails.
    #[default]
    Local,
    /// Ancestor lookup in the shell tree.
    Shell,
}

/// A candidate subgraph grown from the query vertex.
#[derive(Debug, Clone)]
pub struct Candidates {
    pub graph: Graph,
    /// Whether the candidate graph already has minimum degree >= k.
    pub found: bool,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// `None` when the query vertex is in no k-core.
    pub answer: Option<Graph>,
    /// Proof for `answer`; empty when there is no answer.
    pub vo: Vec<VoEntry>,
    pub extract_time: Duration,
    pub vo_time: Duration,
}

/// Answers k-core community queries over a dynamic graph and proves them
/// against the authenticated index.
#[derive(Debug, Default)]
pub struct SemiIndexExtractor {
    maintainer: CoreMaintainer,
    mbp_tree: Option<MbpTree>,
    shell_tree: Option<ShellTree>,
}

impl SemiIndexExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes every core number from scratch. The shell tree is built
    /// from core numbers, so it is dropped as well.
    pub fn decompose(&mut self, graph: &Graph) -> Result<()> {
        self.maintainer.decompose(graph)?;
        self.invalidate_shell_tree();
        Ok(())
    }

    pub fn maintainer(&self) -> &CoreMaintainer {
        &self.maintainer
    }

    pub fn core(&self, v: VertexId) -> Result<usize> {
        self.maintainer.core(v)
    }

    pub fn insert_core_update(
        &mut self,
        graph: &Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        self.maintainer.insert_edge(graph, src, dst)
    }

    pub fn remove_core_update(
        &mut self,
        graph: &Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        self.maintainer.remove_edge(graph, src, dst)
    }

    pub fn mbp_tree(&self) -> Result<&MbpTree> {
        self.mbp_tree.as_ref().ok_or(Error::IndexNotBuilt("MbpTree"))
    }

    fn mbp_tree_mut(&mut self) -> Result<&mut MbpTree> {
        self.mbp_tree.as_mut().ok_or(Error::IndexNotBuilt("MbpTree"))
    }

    pub fn shell_tree(&self) -> Result<&ShellTree> {
        self.shell_tree
            .as_ref()
            .ok_or(Error::IndexNotBuilt("ShellTree"))
    }

    /// Indexes the digest of every vertex of `graph` and computes the root.
    pub fn build_mbp_tree(&mut self, graph: &Graph, config: MbpConfig) -> Result<()> {
        let entries = graph
            .vertices()
            .map(|v| Ok((v, graph.vertex_digest(v)?)))
            .collect::<Result<Vec<_>>>()?;
        let tree = MbpTree::from_entries(config, entries)?;
        log::info!(
            "built mbp tree: {} vertices, depth {}, root {}",
            tree.len(),
            tree.depth(),
            tree.root_digest()
        );
        self.mbp_tree = Some(tree);
        Ok(())
    }

    /// Refreshes the leaf digests of both endpoints of an added edge.
    pub fn mbp_tree_add_update(&mut self, graph: &Graph, src: VertexId, dst: VertexId) -> Result<()> {
        let (ds, dd) = (graph.vertex_digest(src)?, graph.vertex_digest(dst)?);
        let tree = self.mbp_tree_mut()?;
        tree.set_digest(src, ds)?;
        tree.set_digest(dst, dd)
    }

    /// Refreshes the leaf digest of an endpoint that survived an edge removal.
    pub fn mbp_tree_delete_edge_update(&mut self, graph: &Graph, v: VertexId) -> Result<()> {
        let d = graph.vertex_digest(v)?;
        self.mbp_tree_mut()?.set_digest(v, d)
    }

    /// Drops a vertex that left the graph.
    pub fn mbp_tree_delete_vertex_update(&mut self, v: VertexId) -> Result<()> {
        self.mbp_tree_mut()?.remove(v).map(|_| ())
    }

    pub fn mbp_tree_digest_compute(&mut self) -> Result<Digest> {
        Ok(self.mbp_tree_mut()?.digest_compute())
    }

    pub fn root_digest(&self) -> Result<Digest> {
        Ok(self.mbp_tree()?.root_digest())
    }

    pub fn build_shell_tree(&mut self, graph: &Graph) -> Result<()> {
        self.shell_tree = Some(ShellTree::build(graph, self.maintainer.cores())?);
        Ok(())
    }

    /// Adds `(src, dst)` to `graph` and pushes it through core maintenance and
    /// the leaf digests of the index, if built. Node digests are left stale
    /// until [`Self::mbp_tree_digest_compute`]. The shell tree is dropped.
    pub fn apply_insert(
        &mut self,
        graph: &mut Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        if !graph.add_edge(src, dst) {
            log::trace!("edge ({src}, {dst}) ignored");
            return Ok(vec![]);
        }
        let promoted = self.insert_core_update(graph, src, dst)?;
        if self.mbp_tree.is_some() {
            self.mbp_tree_add_update(graph, src, dst)?;
        }
        self.invalidate_shell_tree();
        Ok(promoted)
    }

    /// Removes `(src, dst)` from `graph`, like [`Self::apply_insert`].
    /// Endpoints left isolated leave the graph and the index.
    pub fn apply_remove(
        &mut self,
        graph: &mut Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        if !graph.remove_edge(src, dst) {
            log::trace!("edge ({src}, {dst}) not present");
            return Ok(vec![]);
        }
        let demoted = self.remove_core_update(graph, src, dst)?;
        if self.mbp_tree.is_some() {
            for v in [src, dst] {
                if graph.has_vertex(v) {
                    self.mbp_tree_delete_edge_update(graph, v)?;
                } else {
                    self.mbp_tree_delete_vertex_update(v)?;
                }
            }
        }
        self.invalidate_shell_tree();
        Ok(demoted)
    }

    fn invalidate_shell_tree(&mut self) {
        if self.shell_tree.take().is_some() {
            log::debug!("graph changed, shell tree dropped");
        }
    }

    /// Breadth-first expansion from `q` over vertices with core number >= k.
    /// Stops as soon as the vertices admitted so far induce a subgraph of
    /// minimum degree >= k.
    pub fn candidate_generation(&self, graph: &Graph, q: VertexId, k: usize) -> Result<Candidates> {
        let mut cand = Graph::new();
        if self.core(q)? < k {
            return Ok(Candidates {
                graph: cand,
                found: false,
            });
        }
        let mut queue = VecDeque::from([q]);
        let mut in_queue = HashSet::from([q]);
        // Admitted vertices whose degree inside `cand` is still below k.
        let mut deficient = 0;
        while let Some(v) = queue.pop_front() {
            cand.add_vertex(v);
            for u in graph.neighbors(v) {
                if cand.has_vertex(u) {
                    cand.add_edge(v, u);
                    if cand.degree(u) == k {
                        deficient -= 1;
                    }
                } else if !in_queue.contains(&u) && self.core(u)? >= k {
                    queue.push_back(u);
                    in_queue.insert(u);
                }
            }
            if cand.degree(v) < k {
                deficient += 1;
            }
            if deficient == 0 {
                log::debug!(
                    "local answer for ({q}, {k}) after {} vertices",
                    cand.vertex_count()
                );
                return Ok(Candidates {
                    graph: cand,
                    found: true,
                });
            }
        }
        Ok(Candidates {
            graph: cand,
            found: false,
        })
    }

    /// Peels vertices of degree < k off `cand`. Fails if `q` would be peeled;
    /// otherwise returns the connected component of `q` among the survivors.
    pub fn global_extract(&self, cand: &Graph, q: VertexId, k: usize) -> Option<Graph> {
        let mut g = cand.clone();
        let mut index: BTreeSet<(usize, VertexId)> = g.vertices().map(|v| (g.degree(v), v)).collect();
        while let Some(&(d, v)) = index.first() {
            if d >= k {
                break;
            }
            if v == q {
                log::debug!("query vertex {q} peeled at k = {k}");
                return None;
            }
            index.remove(&(d, v));
            for u in g.remove_vertex(v).into_iter().flatten() {
                let du = g.degree(u);
                index.remove(&(du + 1, u));
                index.insert((du, u));
            }
        }
        if !g.has_vertex(q) {
            return None;
        }
        let component = g.component(q);
        Some(g.induced_subgraph(&component))
    }

    /// Local strategy: candidate expansion, then peeling if needed.
    pub fn kcore_extract(&self, graph: &Graph, q: VertexId, k: usize) -> Result<Option<Graph>> {
        let cand = self.candidate_generation(graph, q, k)?;
        if cand.found {
            return Ok(Some(cand.graph));
        }
        if cand.graph.is_empty() {
            return Ok(None);
        }
        Ok(self.global_extract(&cand.graph, q, k))
    }

    /// Shell strategy: the whole connected k-core of q.
    pub fn kcore_extract_by_shell(
        &self,
        graph: &Graph,
        q: VertexId,
        k: usize,
    ) -> Result<Option<Graph>> {
        let shell = self.shell_tree()?;
        let ans = shell.query(q, self.core(q)?, k)?;
        log::debug!("shell query ({q}, {k}) took {:?}", ans.elapsed);
        Ok(ans.vertices.map(|vs| graph.induced_subgraph(&vs)))
    }

    /// `"<v>/<answer neighbours>|<v>/<graph neighbours>"` for every vertex of
    /// the answer.
    pub fn serialize_graph_info(
        &self,
        graph: &Graph,
        subgraph: &Graph,
    ) -> Result<BTreeMap<VertexId, String>> {
        subgraph
            .vertices()
            .map(|v| {
                if !graph.has_vertex(v) {
                    return Err(Error::VertexNotFound(v));
                }
                Ok((
                    v,
                    format!(
                        "{}|{}",
                        subgraph.serialize_adjacency(v),
                        graph.serialize_adjacency(v)
                    ),
                ))
            })
            .collect()
    }

    pub fn construct_vo(&self, graph: &Graph, subgraph: &Graph) -> Result<Vec<VoEntry>> {
        let serialized = self.serialize_graph_info(graph, subgraph)?;
        let vids: BTreeSet<VertexId> = serialized.keys().copied().collect();
        self.mbp_tree()?.construct_vo(&vids, &serialized)
    }

    /// Extracts the community of q and builds its proof.
    pub fn query(
        &self,
        graph: &Graph,
        q: VertexId,
        k: usize,
        strategy: Strategy,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();
        let answer = match strategy {
            Strategy::Local => self.kcore_extract(graph, q, k)?,
            Strategy::Shell => self.kcore_extract_by_shell(graph, q, k)?,
        };
        let extract_time = start.elapsed();
        let start = Instant::now();
        let vo = match &answer {
            Some(sub) => self.construct_vo(graph, sub)?,
            None => vec![],
        };
        let vo_time = start.elapsed();
        log::info!(
            "query ({q}, {k}) via {strategy:?}: {} vertices, extract {extract_time:?}, vo {vo_time:?}",
            answer.as_ref().map_or(0, Graph::vertex_count)
        );
        Ok(QueryOutcome {
            answer,
            vo,
            extract_time,
            vo_time,
        })
    }
}
