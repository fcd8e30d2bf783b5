use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    io::BufRead,
    ops::Bound,
};

use crate::{
    digest::Digest,
    error::{Error, Result},
};

pub type VertexId = usize;

/// Undirected simple graph. Neighbours are kept sorted so every serialization
/// of a vertex is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    adj: BTreeMap<VertexId, BTreeSet<VertexId>>,
    edges: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (VertexId, VertexId)>) -> Self {
        let mut g = Self::new();
        for (u, v) in edges {
            g.add_edge(u, v);
        }
        g
    }

    /// Reads `u v` pairs, one per line. Blank lines and lines starting with `#`
    /// or `%` are skipped.
    pub fn read_edge_list(reader: impl BufRead) -> Result<Self> {
        Ok(Self::from_edges(Self::read_edge_stream(reader)?))
    }

    /// Same format as [`Graph::read_edge_list`], without building a graph.
    pub fn read_edge_stream(reader: impl BufRead) -> Result<Vec<(VertexId, VertexId)>> {
        let mut edges = vec![];
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            let mut it = line.split_whitespace().map(|t| {
                t.parse::<VertexId>().map_err(|e| Error::Parse {
                    line: i + 1,
                    reason: format!("{t:?}: {e}"),
                })
            });
            match (it.next(), it.next()) {
                (Some(u), Some(v)) => edges.push((u?, v?)),
                _ => {
                    return Err(Error::Parse {
                        line: i + 1,
                        reason: "expected two vertex ids".to_owned(),
                    })
                }
            }
        }
        Ok(edges)
    }

    /// Returns whether the vertex is new.
    pub fn add_vertex(&mut self, v: VertexId) -> bool {
        if self.adj.contains_key(&v) {
            return false;
        }
        self.adj.insert(v, BTreeSet::new());
        true
    }

    /// Add an edge between u and v. Returns whether it was added.
    pub fn add_edge(&mut self, u: VertexId, v: VertexId) -> bool {
        if u == v || self.has_edge(u, v) {
            return false;
        }
        self.adj.entry(u).or_default().insert(v);
        self.adj.entry(v).or_default().insert(u);
        self.edges += 1;
        true
    }

    /// Remove an edge between u and v. Returns whether it was removed.
    /// Endpoints left without neighbours are dropped from the graph.
    pub fn remove_edge(&mut self, u: VertexId, v: VertexId) -> bool {
        if !self.has_edge(u, v) {
            return false;
        }
        for (a, b) in [(u, v), (v, u)] {
            if let Some(n) = self.adj.get_mut(&a) {
                n.remove(&b);
                if n.is_empty() {
                    self.adj.remove(&a);
                }
            }
        }
        self.edges -= 1;
        true
    }

    /// Removes v and its incident edges, returning its former neighbours.
    /// Unlike [`Graph::remove_edge`], neighbours left isolated are kept.
    pub fn remove_vertex(&mut self, v: VertexId) -> Option<BTreeSet<VertexId>> {
        let neighbors = self.adj.remove(&v)?;
        for u in &neighbors {
            if let Some(n) = self.adj.get_mut(u) {
                n.remove(&v);
            }
        }
        self.edges -= neighbors.len();
        Some(neighbors)
    }

    pub fn has_vertex(&self, v: VertexId) -> bool {
        self.adj.contains_key(&v)
    }

    pub fn has_edge(&self, u: VertexId, v: VertexId) -> bool {
        self.adj.get(&u).is_some_and(|n| n.contains(&v))
    }

    /// 0 for absent vertices.
    pub fn degree(&self, v: VertexId) -> usize {
        self.adj.get(&v).map_or(0, BTreeSet::len)
    }

    /// Ascending neighbour ids. Empty for absent vertices.
    pub fn neighbors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.adj.get(&v).into_iter().flatten().copied()
    }

    pub fn vertex_count(&self) -> usize {
        self.adj.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adj.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.adj.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.adj
            .iter()
            .flat_map(|(&u, n)| {
                n.range((Bound::Excluded(u), Bound::Unbounded))
                    .map(move |&v| (u, v))
            })
    }

    /// Dense relabeling: position `i` holds the vertex with local id `i`.
    pub fn local_ids(&self) -> Vec<VertexId> {
        self.vertices().collect()
    }

    /// Subgraph induced by `vs`. Vertices of `vs` absent from the graph are ignored.
    pub fn induced_subgraph(&self, vs: &BTreeSet<VertexId>) -> Graph {
        let mut g = Graph::new();
        for &v in vs {
            if !self.has_vertex(v) {
                continue;
            }
            g.add_vertex(v);
            for u in self.neighbors(v).filter(|u| vs.contains(u) && v < *u) {
                g.add_edge(v, u);
            }
        }
        g
    }

    /// `"<v>/<n1>/<n2>/..."`, the text a vertex digest is computed over.
    pub fn serialize_adjacency(&self, v: VertexId) -> String {
        let mut s = v.to_string();
        for u in self.neighbors(v) {
            // Writing to a String cannot fail.
            let _ = write!(s, "/{u}");
        }
        s
    }

    pub fn vertex_digest(&self, v: VertexId) -> Result<Digest> {
        if !self.has_vertex(v) {
            return Err(Error::VertexNotFound(v));
        }
        Ok(Digest::of(self.serialize_adjacency(v).as_bytes()))
    }

    pub fn min_degree(&self) -> Option<usize> {
        self.adj.values().map(BTreeSet::len).min()
    }

    /// Vertices reachable from `v`, including `v`. Empty if `v` is absent.
    pub fn component(&self, v: VertexId) -> BTreeSet<VertexId> {
        let mut seen = BTreeSet::new();
        if !self.has_vertex(v) {
            return seen;
        }
        let mut stack = vec![v];
        seen.insert(v);
        while let Some(u) = stack.pop() {
            stack.extend(self.neighbors(u).filter(|&w| seen.insert(w)));
        }
        seen
    }
}
