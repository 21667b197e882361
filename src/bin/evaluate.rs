/// Evaluation CLI binary for BEIR-style retrieval benchmarks.
///
/// Loads a built index plus a query set and qrels, runs every query under one
/// algorithm hint (or all of them for a side-by-side comparison), prints the
/// reports and writes them as JSON. `--min-ndcg` turns the run into a CI gate.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mosaic::config::Config;
use mosaic::embedding::create_embedding_provider;
use mosaic::evaluation::dataset::{load_qrels, load_queries};
use mosaic::evaluation::report::{self, AlgorithmReport};
use mosaic::evaluation::runner::run_algorithm;
use mosaic::index::{storage, IndexHandle};
use mosaic::search::{AlgorithmHint, QueryOrchestrator};
use mosaic::selector::AlgorithmSelector;

#[derive(Parser)]
#[command(name = "mosaic-eval", about = "Retrieval quality evaluation for mosaic")]
struct Cli {
    /// Directory of a built index (see `mosaic build-index`)
    #[arg(long, default_value = "data/index")]
    index_dir: PathBuf,

    /// BEIR queries file (JSON Lines)
    #[arg(long)]
    queries: PathBuf,

    /// BEIR qrels file (TSV: query-id, corpus-id, score)
    #[arg(long)]
    qrels: PathBuf,

    /// Algorithm: "bm25", "dense", "fusion", "adaptive", or "all" for comparison
    #[arg(long, default_value = "all")]
    algorithm: String,

    /// Cutoff for nDCG@k and Recall@k
    #[arg(long, default_value_t = 10)]
    k: usize,

    /// Evaluate only the first N queries (sorted by id for reproducibility)
    #[arg(long)]
    limit: Option<usize>,

    /// Output directory for JSON reports
    #[arg(long, default_value = "data/eval/results")]
    output_dir: PathBuf,

    /// Minimum nDCG@k every evaluated algorithm must reach (CI threshold)
    #[arg(long)]
    min_ndcg: Option<f64>,
}

fn parse_algorithms(arg: &str) -> Result<Vec<AlgorithmHint>, anyhow::Error> {
    if arg == "all" {
        return Ok(AlgorithmHint::ALL.to_vec());
    }
    let hint = arg.parse::<AlgorithmHint>().map_err(|e| {
        anyhow::anyhow!("{}. Valid options: bm25, dense, fusion, adaptive, all", e)
    })?;
    Ok(vec![hint])
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // 1. Parse CLI args
    let cli = Cli::parse();
    let algorithms = parse_algorithms(&cli.algorithm)?;

    // 2. Initialize tracing (stdout, info level)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Config error, using defaults");
        Config::default()
    });

    // 3. Load queries and judgments
    let mut queries = load_queries(&cli.queries)?;
    let qrels = load_qrels(&cli.qrels)?;
    if let Some(n) = cli.limit {
        queries.sort_by(|a, b| a.id.cmp(&b.id));
        queries.truncate(n);
    }
    let embedded = queries.iter().filter(|q| q.embedding.is_some()).count();

    // 4. Load the index
    let index_dir = cli.index_dir.clone();
    let snapshot = tokio::task::spawn_blocking(move || storage::load(&index_dir)).await??;
    let stats = snapshot.stats();

    println!("=== mosaic Evaluation ===");
    println!("Index: {} ({} documents, dimension {})", cli.index_dir.display(), stats.document_count, stats.dimension);
    println!("Queries: {} ({} with precomputed embeddings)", queries.len(), embedded);
    println!("Judged queries: {}", queries.iter().filter(|q| qrels.contains_key(&q.id)).count());
    println!();

    // 5. Orchestrator with the configured provider and router model
    let provider = match create_embedding_provider(&config.embedding).await {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!(error = %e, "Embedding provider unavailable, dense retrieval relies on query embeddings");
            None
        }
    };
    let selector = AlgorithmSelector::from_model_path(config.selector.model_path.as_deref().map(Path::new));
    println!("Router model: {}", selector.model().name());
    let orchestrator = QueryOrchestrator::from_config(
        &config,
        Arc::new(IndexHandle::new(snapshot)),
        provider,
        selector,
    );

    std::fs::create_dir_all(&cli.output_dir)?;

    // 6. Run each algorithm
    let mut reports: Vec<AlgorithmReport> = Vec::new();
    for algorithm in &algorithms {
        println!("--- Running algorithm: {} ---", algorithm);
        let results = run_algorithm(&orchestrator, &queries, &qrels, *algorithm, cli.k, true).await;
        let report = report::generate_report(*algorithm, cli.k, &results);
        report::print_report(&report);
        println!();

        let timestamp = report.timestamp.format("%Y%m%d_%H%M%S");
        let report_path = cli.output_dir.join(format!("{}_{}.json", algorithm, timestamp));
        report::save_report(&report, &report_path)?;
        tracing::info!(path = %report_path.display(), "Report saved");

        let results_path = cli.output_dir.join(format!("{}_{}_queries.json", algorithm, timestamp));
        std::fs::write(&results_path, serde_json::to_string_pretty(&results)?)?;

        reports.push(report);
    }

    if reports.len() > 1 {
        report::print_comparison(&reports);
        println!();
    }

    // 7. CI threshold
    if let Some(min) = cli.min_ndcg {
        let failing: Vec<&AlgorithmReport> = reports.iter().filter(|r| r.ndcg_at_k < min).collect();
        if !failing.is_empty() {
            for r in &failing {
                eprintln!(
                    "FAIL: {} nDCG@{} {:.4} is below threshold {:.4}",
                    r.algorithm, r.k, r.ndcg_at_k, min
                );
            }
            std::process::exit(1);
        }
        println!("PASS: all algorithms reached nDCG@{} >= {:.4}", cli.k, min);
    }

    Ok(())
}
