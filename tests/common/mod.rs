use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{LazyLock, Mutex},
};

use flexi_logger::{Logger, LoggerHandle};
use rand::Rng;
use scopeguard::{OnUnwind, ScopeGuard};
use verifiable_kcore::{Graph, VertexId};

pub mod slow_order;

#[allow(dead_code)]
pub static LOGGER: LazyLock<Mutex<LoggerHandle>> = LazyLock::new(|| {
    Mutex::new(
        Logger::try_with_env_or_str("info")
            .unwrap()
            .write_mode(flexi_logger::WriteMode::SupportCapture)
            .log_to_stdout()
            .set_palette("196;208;3;7;8".to_owned())
            .format(|w, now, record| {
                let style = flexi_logger::style(record.level());
                write!(
                    w,
                    "{} {pref}[{}] {}{suf}",
                    now.format("%H:%M:%S"),
                    &record.level().as_str()[0..1],
                    record.args(),
                    pref = style.prefix(),
                    suf = style.suffix(),
                )
            })
            .start()
            .unwrap(),
    )
});

#[allow(dead_code)]
pub fn init_logger() {
    let _ = &*LOGGER;
}

/// Dumps the value through the logger if the test panics while holding it.
#[allow(dead_code)]
pub fn guard<T: std::fmt::Debug>(t: T) -> ScopeGuard<T, impl FnOnce(T), OnUnwind> {
    scopeguard::guard_on_unwind(t, |t| log::error!("Crash with {t:?}"))
}

/// Core numbers by repeated peeling, one k at a time.
#[allow(dead_code)]
pub fn slow_cores(g: &Graph) -> BTreeMap<VertexId, usize> {
    let mut cores: BTreeMap<VertexId, usize> = g.vertices().map(|v| (v, 0)).collect();
    let mut k = 1;
    loop {
        let alive = slow_kcore(g, k);
        if alive.is_empty() {
            return cores;
        }
        for v in alive {
            cores.insert(v, k);
        }
        k += 1;
    }
}

/// Vertex set of the (possibly disconnected) k-core.
#[allow(dead_code)]
pub fn slow_kcore(g: &Graph, k: usize) -> BTreeSet<VertexId> {
    let mut alive: BTreeSet<VertexId> = g.vertices().collect();
    loop {
        let dead: Vec<VertexId> = alive
            .iter()
            .copied()
            .filter(|&v| g.neighbors(v).filter(|u| alive.contains(u)).count() < k)
            .collect();
        if dead.is_empty() {
            return alive;
        }
        for v in dead {
            alive.remove(&v);
        }
    }
}

/// Connected component of v in the subgraph induced by core numbers >= k.
#[allow(dead_code)]
pub fn slow_community(
    g: &Graph,
    cores: &BTreeMap<VertexId, usize>,
    v: VertexId,
    k: usize,
) -> Option<BTreeSet<VertexId>> {
    if cores[&v] < k {
        return None;
    }
    let keep: BTreeSet<VertexId> = cores
        .iter()
        .filter(|(_, &c)| c >= k)
        .map(|(&u, _)| u)
        .collect();
    Some(g.induced_subgraph(&keep).component(v))
}

#[allow(dead_code)]
pub fn random_graph(rng: &mut impl Rng, n: usize, m: usize) -> Graph {
    let mut g = Graph::new();
    let m = m.min(n * (n - 1) / 2);
    while g.edge_count() < m {
        g.add_edge(rng.gen_range(0..n), rng.gen_range(0..n));
    }
    g
}

/// Random edge of g, or a random absent pair if `present` is false.
#[allow(dead_code)]
pub fn random_pair(rng: &mut impl Rng, g: &Graph, n: usize, present: bool) -> Option<(VertexId, VertexId)> {
    if present {
        let edges: Vec<_> = g.edges().collect();
        if edges.is_empty() {
            return None;
        }
        return Some(edges[rng.gen_range(0..edges.len())]);
    }
    for _ in 0..100 {
        let (u, v) = (rng.gen_range(0..n), rng.gen_range(0..n));
        if u != v && !g.has_edge(u, v) {
            return Some((u, v));
        }
    }
    None
}
