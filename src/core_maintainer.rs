use std::{
    cmp::Reverse,
    collections::{hash_map::Entry, BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque},
};

use crate::{
    error::{decrement, Error, Result},
    graph::{Graph, VertexId},
    order::{rank_tree::RankTree, OrderList},
};

/// Core numbers of a dynamic graph, kept current under single edge updates.
///
/// Every vertex with core number k sits in the k-order `orders[k]`. Comparing
/// two vertices by `(core, rank)` gives a peeling order of the whole graph, and
/// the two counters certify it:
/// - `deg_plus[v]` is the number of neighbours that come after v in that order;
///   it never exceeds `core[v]`.
/// - `mcd[v]` is the number of neighbours with core number at least `core[v]`.
///
/// The maintainer never touches the graph. Callers mutate the graph first and
/// then push the edge through [`CoreMaintainer::insert_edge`] or
/// [`CoreMaintainer::remove_edge`].
#[derive(Debug, Default)]
pub struct CoreMaintainer<O: OrderList = RankTree> {
    cores: BTreeMap<VertexId, usize>,
    deg_plus: BTreeMap<VertexId, usize>,
    mcd: BTreeMap<VertexId, usize>,
    orders: Vec<O>,
}

/// State of one propagation scan over the K-order.
#[derive(Default)]
struct Scan {
    k: usize,
    heap: BinaryHeap<Reverse<(usize, VertexId)>>,
    in_heap: HashSet<VertexId>,
    /// Votes from candidates that precede the vertex.
    deg_star: HashMap<VertexId, usize>,
    /// Visit sequence number of every vertex popped so far.
    visited: HashMap<VertexId, usize>,
    in_vc: HashSet<VertexId>,
    /// Everything ever admitted to Vc, in visit order.
    candidates: Vec<VertexId>,
}

impl Scan {
    fn push(&mut self, rank: usize, v: VertexId) {
        if !self.visited.contains_key(&v) && self.in_heap.insert(v) {
            self.heap.push(Reverse((rank, v)));
        }
    }
    fn star(&self, v: VertexId) -> usize {
        self.deg_star.get(&v).copied().unwrap_or(0)
    }
    fn star_mut(&mut self, v: VertexId) -> Result<&mut usize> {
        self.deg_star
            .get_mut(&v)
            .ok_or_else(|| Error::InvariantViolation(format!("deg* of vertex {v} is zero")))
    }
    fn seq(&self, v: VertexId) -> Result<usize> {
        self.visited
            .get(&v)
            .copied()
            .ok_or_else(|| Error::InvariantViolation(format!("candidate {v} was never visited")))
    }
}

fn counter(map: &mut BTreeMap<VertexId, usize>, v: VertexId) -> Result<&mut usize> {
    map.get_mut(&v).ok_or(Error::VertexNotFound(v))
}

fn violation(msg: String) -> Error {
    Error::InvariantViolation(format!("core maintainer: {msg}"))
}

impl<O: OrderList> CoreMaintainer<O> {
    pub fn from_graph(graph: &Graph) -> Result<Self> {
        let mut m = Self::default();
        m.decompose(graph)?;
        Ok(m)
    }

    /// Batch decomposition by bucket peeling. Replaces all previous state.
    pub fn decompose(&mut self, graph: &Graph) -> Result<()> {
        let ids = graph.local_ids();
        let n = ids.len();
        let local: HashMap<VertexId, usize> = ids.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let adj: Vec<Vec<usize>> = ids
            .iter()
            .map(|&v| graph.neighbors(v).map(|u| local[&u]).collect())
            .collect();

        let mut deg: Vec<usize> = adj.iter().map(Vec::len).collect();
        let max_deg = deg.iter().copied().max().unwrap_or(0);
        // bin[d] is the first position of degree d in vert.
        let mut bin = vec![0; max_deg + 1];
        for &d in &deg {
            bin[d] += 1;
        }
        let mut start = 0;
        for b in bin.iter_mut() {
            let num = *b;
            *b = start;
            start += num;
        }
        let mut pos = vec![0; n];
        let mut vert = vec![0; n];
        for v in 0..n {
            pos[v] = bin[deg[v]];
            vert[pos[v]] = v;
            bin[deg[v]] += 1;
        }
        for d in (1..=max_deg).rev() {
            bin[d] = bin[d - 1];
        }
        bin[0] = 0;

        for i in 0..n {
            let v = vert[i];
            for &u in &adj[v] {
                if deg[u] > deg[v] {
                    let du = deg[u];
                    let pu = pos[u];
                    let pw = bin[du];
                    let w = vert[pw];
                    if u != w {
                        pos[u] = pw;
                        vert[pu] = w;
                        pos[w] = pu;
                        vert[pw] = u;
                    }
                    bin[du] += 1;
                    deg[u] -= 1;
                }
            }
        }

        // vert is now the peeling order and deg holds core numbers, which are
        // non-decreasing along it.
        let max_core = deg.iter().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<VertexId>> = vec![vec![]; max_core + 1];
        for &v in &vert {
            levels[deg[v]].push(ids[v]);
        }
        self.cores.clear();
        self.deg_plus.clear();
        self.mcd.clear();
        for v in 0..n {
            let c = deg[v];
            self.cores.insert(ids[v], c);
            self.deg_plus
                .insert(ids[v], adj[v].iter().filter(|&&u| pos[u] > pos[v]).count());
            self.mcd
                .insert(ids[v], adj[v].iter().filter(|&&u| deg[u] >= c).count());
        }
        self.orders = levels
            .iter()
            .map(|vs| O::from_ordered(vs))
            .collect::<Result<_>>()?;
        log::debug!(
            "decomposed {n} vertices, {} edges, max core {max_core}",
            graph.edge_count()
        );
        Ok(())
    }

    pub fn core(&self, v: VertexId) -> Result<usize> {
        self.cores.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    pub fn cores(&self) -> &BTreeMap<VertexId, usize> {
        &self.cores
    }

    pub fn contains(&self, v: VertexId) -> bool {
        self.cores.contains_key(&v)
    }

    pub fn vertex_count(&self) -> usize {
        self.cores.len()
    }

    pub fn max_core(&self) -> usize {
        self.cores.values().copied().max().unwrap_or(0)
    }

    /// The k-order. Levels above the largest core number ever seen don't exist.
    pub fn order(&self, k: usize) -> Result<&O> {
        self.orders.get(k).ok_or(Error::LevelNotFound(k))
    }

    pub fn has_order(&self, k: usize) -> bool {
        k < self.orders.len()
    }

    fn order_mut(&mut self, k: usize) -> Result<&mut O> {
        self.orders.get_mut(k).ok_or(Error::LevelNotFound(k))
    }

    pub fn deg_plus(&self, v: VertexId) -> Result<usize> {
        self.deg_plus.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    pub fn mcd(&self, v: VertexId) -> Result<usize> {
        self.mcd.get(&v).copied().ok_or(Error::VertexNotFound(v))
    }

    fn key(&self, v: VertexId) -> Result<(usize, usize)> {
        let k = self.core(v)?;
        Ok((k, self.order(k)?.rank(v)?))
    }

    /// Does u come before v in the global order (core number, then k-order)?
    pub fn precedes(&self, u: VertexId, v: VertexId) -> Result<bool> {
        Ok(self.key(u)? < self.key(v)?)
    }

    /// Registers an isolated vertex: core 0, last in the 0-order.
    pub fn add_vertex(&mut self, v: VertexId) -> Result<()> {
        if self.cores.contains_key(&v) {
            return Err(Error::Duplicate(v));
        }
        if self.orders.is_empty() {
            self.orders.push(O::default());
        }
        self.orders[0].insert_back(v)?;
        self.cores.insert(v, 0);
        self.deg_plus.insert(v, 0);
        self.mcd.insert(v, 0);
        Ok(())
    }

    /// Drops all bookkeeping of v. Its edges must have been pushed out already.
    pub fn remove_vertex(&mut self, v: VertexId) -> Result<()> {
        let k = self.cores.remove(&v).ok_or(Error::VertexNotFound(v))?;
        self.order_mut(k)?.erase(v)?;
        self.deg_plus.remove(&v);
        self.mcd.remove(&v);
        log::trace!("forgot vertex {v} (core {k})");
        Ok(())
    }

    /// Updates core numbers after `(src, dst)` was added to `graph`. Unknown
    /// endpoints are registered as isolated vertices first. Returns the
    /// vertices whose core number went up by one, in their new order.
    pub fn insert_edge(
        &mut self,
        graph: &Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        for v in [src, dst] {
            if !self.cores.contains_key(&v) {
                self.add_vertex(v)?;
            }
        }
        let (cs, cd) = (self.core(src)?, self.core(dst)?);
        if cs <= cd {
            *counter(&mut self.mcd, src)? += 1;
        }
        if cd <= cs {
            *counter(&mut self.mcd, dst)? += 1;
        }
        let k = cs.min(cd);
        let u = if self.precedes(src, dst)? { src } else { dst };
        let plus = counter(&mut self.deg_plus, u)?;
        *plus += 1;
        if *plus <= k {
            log::trace!("insert ({src}, {dst}): deg+ of {u} within {k}, no change");
            return Ok(vec![]);
        }
        let promoted = self.propagate(graph, u, k)?;
        self.promote(graph, &promoted, k)?;
        log::debug!(
            "insert ({src}, {dst}): {} vertices promoted to core {}",
            promoted.len(),
            k + 1
        );
        Ok(promoted)
    }

    /// Walks the K-order from u, visiting only vertices with votes, and
    /// returns the surviving candidates in visit order.
    fn propagate(&mut self, graph: &Graph, u: VertexId, k: usize) -> Result<Vec<VertexId>> {
        let mut scan = Scan {
            k,
            ..Default::default()
        };
        scan.push(self.order(k)?.rank(u)?, u);
        while let Some(Reverse((_, w))) = scan.heap.pop() {
            scan.in_heap.remove(&w);
            let seq = scan.visited.len();
            scan.visited.insert(w, seq);
            let star = scan.star(w);
            let plus = self.deg_plus(w)?;
            if star + plus > k {
                log::trace!("admit {w} (deg* {star}, deg+ {plus})");
                scan.in_vc.insert(w);
                scan.candidates.push(w);
                let level = self.order(k)?;
                let rw = level.rank(w)?;
                for x in graph.neighbors(w) {
                    if self.cores.get(&x) != Some(&k) {
                        continue;
                    }
                    let rx = level.rank(x)?;
                    if rx > rw {
                        *scan.deg_star.entry(x).or_default() += 1;
                        scan.push(rx, x);
                    }
                }
            } else if star == 0 {
                log::trace!("skip {w}");
            } else {
                log::trace!("exclude {w} (deg* {star}, deg+ {plus})");
                *counter(&mut self.deg_plus, w)? += star;
                scan.deg_star.remove(&w);
                self.remove_candidates(graph, &mut scan, w)?;
            }
        }
        let Scan {
            candidates, in_vc, ..
        } = scan;
        Ok(candidates.into_iter().filter(|v| in_vc.contains(v)).collect())
    }

    /// w stays at core K. Drops every candidate that loses its support as a
    /// consequence, placing each right after w (in drop order) so the K-order
    /// stays a peeling order.
    fn remove_candidates(&mut self, graph: &Graph, scan: &mut Scan, w: VertexId) -> Result<()> {
        let k = scan.k;
        let mut queue = VecDeque::new();
        let mut queued = HashSet::new();
        for x in graph.neighbors(w) {
            if scan.in_vc.contains(&x) {
                let plus = counter(&mut self.deg_plus, x)?;
                decrement(plus, "deg+", x)?;
                if *plus + scan.star(x) <= k && queued.insert(x) {
                    queue.push_back(x);
                }
            }
        }
        let mut anchor = w;
        while let Some(c) = queue.pop_front() {
            let star = scan.deg_star.remove(&c).unwrap_or(0);
            *counter(&mut self.deg_plus, c)? += star;
            scan.in_vc.remove(&c);
            let level = self.order_mut(k)?;
            level.erase(c)?;
            level.insert_after(anchor, c)?;
            log::trace!("drop candidate {c}, now after {anchor}");
            anchor = c;

            let rw = self.order(k)?.rank(w)?;
            let seq_c = scan.seq(c)?;
            for x in graph.neighbors(c) {
                if self.cores.get(&x) != Some(&k) {
                    continue;
                }
                if scan.in_vc.contains(&x) {
                    if seq_c < scan.seq(x)? {
                        decrement(scan.star_mut(x)?, "deg*", x)?;
                    } else {
                        decrement(counter(&mut self.deg_plus, x)?, "deg+", x)?;
                    }
                    if self.deg_plus(x)? + scan.star(x) <= k && queued.insert(x) {
                        queue.push_back(x);
                    }
                } else if !scan.visited.contains_key(&x) && self.order(k)?.rank(x)? > rw {
                    decrement(scan.star_mut(x)?, "deg*", x)?;
                }
            }
        }
        Ok(())
    }

    fn promote(&mut self, graph: &Graph, promoted: &[VertexId], k: usize) -> Result<()> {
        if promoted.is_empty() {
            return Ok(());
        }
        while self.orders.len() < k + 2 {
            self.orders.push(O::default());
        }
        for &w in promoted {
            self.orders[k].erase(w)?;
        }
        for &w in promoted.iter().rev() {
            self.orders[k + 1].insert_front(w)?;
            self.cores.insert(w, k + 1);
        }
        let set: HashSet<VertexId> = promoted.iter().copied().collect();
        for &w in promoted {
            let mut m = 0;
            for x in graph.neighbors(w) {
                let cx = self.core(x)?;
                if cx > k {
                    m += 1;
                }
                if cx == k + 1 && !set.contains(&x) {
                    *counter(&mut self.mcd, x)? += 1;
                }
            }
            self.mcd.insert(w, m);
        }
        Ok(())
    }

    /// Updates core numbers after `(src, dst)` was removed from `graph`.
    /// Endpoints that are no longer in the graph are forgotten. Returns the
    /// vertices whose core number went down by one, in demotion order.
    pub fn remove_edge(
        &mut self,
        graph: &Graph,
        src: VertexId,
        dst: VertexId,
    ) -> Result<Vec<VertexId>> {
        let (cs, cd) = (self.core(src)?, self.core(dst)?);
        let k = cs.min(cd);
        if k == 0 {
            return Err(violation(format!(
                "edge ({src}, {dst}) removed between core-0 vertices"
            )));
        }
        let earlier = if self.precedes(src, dst)? { src } else { dst };
        decrement(counter(&mut self.deg_plus, earlier)?, "deg+", earlier)?;
        if cs <= cd {
            decrement(counter(&mut self.mcd, src)?, "mcd", src)?;
        }
        if cd <= cs {
            decrement(counter(&mut self.mcd, dst)?, "mcd", dst)?;
        }

        let demoted = self.demote(graph, [src, dst], k)?;

        for v in [src, dst] {
            if !graph.has_vertex(v) && self.cores.contains_key(&v) {
                self.remove_vertex(v)?;
            }
        }
        log::debug!(
            "remove ({src}, {dst}): {} vertices demoted to core {}",
            demoted.len(),
            k - 1
        );
        Ok(demoted)
    }

    fn demote(&mut self, graph: &Graph, roots: [VertexId; 2], k: usize) -> Result<Vec<VertexId>> {
        // Current core degree: neighbours still at core >= k. Starts from mcd.
        let mut cd: HashMap<VertexId, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut queued = HashSet::new();
        for v in roots {
            if self.core(v)? == k && queued.insert(v) {
                queue.push_back(v);
            }
        }
        let mut demoted = vec![];
        let mut old_rank = HashMap::new();
        while let Some(w) = queue.pop_front() {
            queued.remove(&w);
            if self.cores.get(&w) != Some(&k) {
                continue;
            }
            let cw = match cd.entry(w) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => *e.insert(self.mcd(w)?),
            };
            if cw >= k {
                continue;
            }
            log::trace!("demote {w} (core degree {cw})");
            old_rank.insert(w, self.order(k)?.rank(w)?);
            self.cores.insert(w, k - 1);
            self.deg_plus.insert(w, cw);
            demoted.push(w);
            for z in graph.neighbors(w) {
                if self.cores.get(&z) != Some(&k) {
                    continue;
                }
                let cz = match cd.entry(z) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(self.mcd(z)?),
                };
                decrement(cz, "core degree", z)?;
                if *cz < k && queued.insert(z) {
                    queue.push_back(z);
                }
            }
        }

        // Survivors that preceded a demoted neighbour no longer have it after them.
        for &w in &demoted {
            let rw = old_rank[&w];
            for z in graph.neighbors(w) {
                if self.cores.get(&z) == Some(&k) && self.order(k)?.rank(z)? < rw {
                    decrement(counter(&mut self.deg_plus, z)?, "deg+", z)?;
                }
            }
        }
        for &w in &demoted {
            self.orders[k].erase(w)?;
            self.orders[k - 1].insert_back(w)?;
        }
        for &w in &demoted {
            let mut m = 0;
            for z in graph.neighbors(w) {
                let cz = self.core(z)?;
                if cz == k {
                    decrement(counter(&mut self.mcd, z)?, "mcd", z)?;
                }
                if cz + 1 >= k {
                    m += 1;
                }
            }
            self.mcd.insert(w, m);
        }
        Ok(demoted)
    }

    /// Recomputes every certificate from scratch and compares. Diagnostic only.
    pub fn check(&self, graph: &Graph) -> Result<()> {
        if self.cores.len() != graph.vertex_count() {
            return Err(violation(format!(
                "{} vertices tracked, graph has {}",
                self.cores.len(),
                graph.vertex_count()
            )));
        }
        let mut listed = 0;
        for (k, level) in self.orders.iter().enumerate() {
            level.check()?;
            for v in level.vertices() {
                if self.cores.get(&v) != Some(&k) {
                    return Err(violation(format!("vertex {v} misplaced in level {k}")));
                }
                listed += 1;
            }
        }
        if listed != self.cores.len() {
            return Err(violation(format!(
                "{listed} vertices in orders, {} tracked",
                self.cores.len()
            )));
        }
        for (&v, &c) in &self.cores {
            if !graph.has_vertex(v) {
                return Err(violation(format!("vertex {v} is not in the graph")));
            }
            let key = self.key(v)?;
            let (mut plus, mut mcd) = (0, 0);
            for u in graph.neighbors(v) {
                if self.core(u)? >= c {
                    mcd += 1;
                }
                if self.key(u)? > key {
                    plus += 1;
                }
            }
            if plus != self.deg_plus(v)? || plus > c {
                return Err(violation(format!(
                    "deg+ of {v} is {}, expected {plus} (core {c})",
                    self.deg_plus(v)?
                )));
            }
            if mcd != self.mcd(v)? {
                return Err(violation(format!(
                    "mcd of {v} is {}, expected {mcd}",
                    self.mcd(v)?
                )));
            }
        }
        Ok(())
    }
}
