use std::{fs::File, io::BufReader, time::Instant};

use flexi_logger::{Logger, WriteMode};
use verifiable_kcore::{
    extractor::QueryOutcome, mbp_tree::vo::vo_size, verify, Error, Graph, MbpConfig, Result,
    SemiIndexExtractor, Strategy, VertexId,
};

const ADD_BATCH: usize = 10_000;
const DELETE_BATCH: usize = 5_000;

struct Options {
    graph: Option<String>,
    query: VertexId,
    k: usize,
    fanout: usize,
    adds: Option<String>,
    deletes: Option<String>,
}

fn usage() -> Error {
    Error::InvalidConfig(
        "usage: example [<edge file> <query vertex> <k> [<fanout> [<add stream> [<delete stream>]]]]"
            .to_owned(),
    )
}

fn parse_args() -> Result<Options> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Ok(Options {
            graph: None,
            query: 1,
            k: 2,
            fanout: MbpConfig::default().max_capacity,
            adds: None,
            deletes: None,
        });
    }
    if args.len() < 3 {
        return Err(usage());
    }
    let num = |s: &String| s.parse::<usize>().map_err(|_| usage());
    Ok(Options {
        graph: Some(args[0].clone()),
        query: num(&args[1])?,
        k: num(&args[2])?,
        fanout: match args.get(3) {
            Some(f) => num(f)?,
            None => MbpConfig::default().max_capacity,
        },
        adds: args.get(4).cloned(),
        deletes: args.get(5).cloned(),
    })
}

/// Two triangles sharing vertex 3, a 4-clique hanging off vertex 5 and a tail.
fn demo_graph() -> Graph {
    Graph::from_edges([
        (1, 2),
        (2, 3),
        (1, 3),
        (3, 4),
        (4, 5),
        (3, 5),
        (5, 6),
        (6, 7),
        (7, 8),
        (8, 6),
        (5, 7),
        (5, 8),
        (8, 9),
        (9, 10),
    ])
}

fn read_stream(path: &str) -> Result<Vec<(VertexId, VertexId)>> {
    Graph::read_edge_stream(BufReader::new(File::open(path)?))
}

fn run_query(
    extractor: &SemiIndexExtractor,
    graph: &Graph,
    q: VertexId,
    k: usize,
    strategy: Strategy,
) -> Result<()> {
    let QueryOutcome {
        answer,
        vo,
        extract_time,
        vo_time,
    } = extractor.query(graph, q, k, strategy)?;
    let Some(answer) = answer else {
        println!("[{strategy:?}] vertex {q} is in no {k}-core");
        return Ok(());
    };
    println!(
        "[{strategy:?}] community of {q} at k = {k}: {} vertices, {} edges (extract {extract_time:?}, vo {vo_time:?}, {} bytes)",
        answer.vertex_count(),
        answer.edge_count(),
        vo_size(&vo)
    );
    let root = extractor.root_digest()?;
    match verify(&vo, &root) {
        Ok(verified) => println!(
            "[{strategy:?}] proof verified against {root}; community: {}",
            verified.is_community(q, k)
        ),
        Err(e) => println!("[{strategy:?}] {e}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let _logger = Logger::try_with_env_or_str("info")
        .map_err(|e| Error::InvalidConfig(e.to_string()))?
        .write_mode(WriteMode::BufferAndFlush)
        .log_to_stdout()
        .start()
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

    let opts = parse_args()?;
    let config = MbpConfig::new(opts.fanout)?;
    let mut graph = match &opts.graph {
        Some(path) => Graph::read_edge_list(BufReader::new(File::open(path)?))?,
        None => {
            println!("No edge file given, using the demo graph");
            demo_graph()
        }
    };
    println!(
        "Graph: {} vertices, {} edges",
        graph.vertex_count(),
        graph.edge_count()
    );

    let mut extractor = SemiIndexExtractor::new();
    let start = Instant::now();
    extractor.decompose(&graph)?;
    println!(
        "Decomposed in {:?}, max core {}",
        start.elapsed(),
        extractor.maintainer().max_core()
    );
    extractor.build_mbp_tree(&graph, config)?;
    extractor.build_shell_tree(&graph)?;
    run_query(&extractor, &graph, opts.query, opts.k, Strategy::Local)?;
    run_query(&extractor, &graph, opts.query, opts.k, Strategy::Shell)?;

    if let Some(path) = &opts.adds {
        let edges = read_stream(path)?;
        for (round, batch) in edges.chunks(ADD_BATCH).enumerate() {
            let start = Instant::now();
            let mut promoted = 0;
            for &(u, v) in batch {
                promoted += extractor.apply_insert(&mut graph, u, v)?.len();
            }
            extractor.mbp_tree_digest_compute()?;
            println!(
                "Add round {round}: {} edges, {promoted} promotions, {:?}",
                batch.len(),
                start.elapsed()
            );
        }
        run_query(&extractor, &graph, opts.query, opts.k, Strategy::Local)?;
    }

    if let Some(path) = &opts.deletes {
        let edges = read_stream(path)?;
        for (round, batch) in edges.chunks(DELETE_BATCH).enumerate() {
            let start = Instant::now();
            let mut demoted = 0;
            for &(u, v) in batch {
                demoted += extractor.apply_remove(&mut graph, u, v)?.len();
            }
            extractor.mbp_tree_digest_compute()?;
            println!(
                "Delete round {round}: {} edges, {demoted} demotions, {:?}",
                batch.len(),
                start.elapsed()
            );
        }
        if graph.has_vertex(opts.query) {
            run_query(&extractor, &graph, opts.query, opts.k, Strategy::Local)?;
        } else {
            println!("Vertex {} left the graph", opts.query);
        }
    }

    if opts.graph.is_none() {
        // Close the tail into a triangle and watch vertex 9 join the 2-core.
        extractor.apply_insert(&mut graph, 8, 10)?;
        extractor.mbp_tree_digest_compute()?;
        extractor.build_shell_tree(&graph)?;
        run_query(&extractor, &graph, 9, 2, Strategy::Shell)?;
    }
    Ok(())
}
