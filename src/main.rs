use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use mosaic::config::Config;
use mosaic::corpus::{embed_missing, load_corpus, sample_documents};
use mosaic::embedding::{create_embedding_provider, EmbeddingProvider};
use mosaic::index::{storage, IndexHandle, IndexOptions, IndexSnapshot};
use mosaic::logging;
use mosaic::search::{AlgorithmHint, QueryOrchestrator, SearchRequest};
use mosaic::selector::AlgorithmSelector;
use mosaic::server::RetrievalService;
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "mosaic", version, about = "Multi-algorithm document retrieval server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Index directory (overrides index_dir from config)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a JSON Lines corpus. Documents without an
    /// embedding are embedded with the configured provider.
    BuildIndex {
        /// Corpus file: one {"id"|"_id", "title", "text", "embedding"?} object per line
        #[arg(long)]
        corpus: PathBuf,
        /// Only index the first N documents (applied after sampling)
        #[arg(long)]
        limit: Option<usize>,
        /// Index a random sample of N documents
        #[arg(long)]
        sample: Option<usize>,
        /// Seed for --sample
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Documents per embedding call
        #[arg(long, default_value_t = 64)]
        batch_size: usize,
        /// Name of the model that produced the embeddings (recorded in meta.json).
        /// Defaults to the provider's model when the build embeds documents.
        #[arg(long)]
        embedding_model: Option<String>,
    },
    /// Run one query against the index and print the response as JSON
    Search {
        query: String,
        /// bm25, dense, fusion, or adaptive
        #[arg(long, default_value = "adaptive")]
        algorithm: AlgorithmHint,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show statistics of the index on disk
    Stats,
}

/// Load the serving index. Failure is fatal: there is nothing to serve.
async fn load_index(dir: &Path) -> Result<IndexSnapshot> {
    let dir = dir.to_path_buf();
    let snapshot = tokio::task::spawn_blocking(move || storage::load(&dir))
        .await
        .context("index load task panicked")??;
    Ok(snapshot)
}

/// Create the embedding provider. Failure only disables on-the-fly query
/// embedding; dense retrieval still accepts precomputed query embeddings.
async fn embedding_provider(config: &Config) -> Option<Arc<dyn EmbeddingProvider>> {
    match create_embedding_provider(&config.embedding).await {
        Ok(Some(provider)) => {
            tracing::info!(
                provider = %config.embedding.provider,
                model = %provider.model_name(),
                dimension = provider.dimension(),
                "Embedding provider initialized"
            );
            Some(provider)
        }
        Ok(None) => {
            tracing::info!("No embedding provider: dense retrieval needs a precomputed query_embedding");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to initialize embedding provider, dense retrieval needs a precomputed query_embedding");
            None
        }
    }
}

async fn build_orchestrator(config: &Config, snapshot: IndexSnapshot) -> QueryOrchestrator {
    let provider = embedding_provider(config).await;
    if let Some(provider) = &provider {
        if snapshot.vector().dimension() != provider.dimension() {
            tracing::warn!(
                index_dimension = snapshot.vector().dimension(),
                provider_dimension = provider.dimension(),
                "Embedding provider dimension does not match the index; provider-embedded queries will fail dense retrieval"
            );
        }
    }
    let selector = AlgorithmSelector::from_model_path(config.selector.model_path.as_deref().map(Path::new));
    QueryOrchestrator::from_config(config, Arc::new(IndexHandle::new(snapshot)), provider, selector)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });
    if let Some(dir) = &cli.index_dir {
        config.index_dir = dir.display().to_string();
    }
    let index_dir = PathBuf::from(&config.index_dir);

    // 3. Initialize logging FIRST (before any other output)
    // CRITICAL: logging goes to stderr only, stdout is reserved for JSON-RPC
    logging::init_logging(&config);

    // 4. Handle subcommands
    match cli.command {
        Some(Commands::BuildIndex { corpus, limit, sample, seed, batch_size, embedding_model }) => {
            tracing::info!(corpus = %corpus.display(), limit = ?limit, sample = ?sample, "Building index");
            let read_limit = if sample.is_some() { None } else { limit };
            let mut docs = tokio::task::spawn_blocking(move || load_corpus(&corpus, read_limit))
                .await
                .context("corpus load task panicked")??;
            if let Some(n) = sample {
                let total = docs.len();
                docs = sample_documents(docs, n, seed);
                tracing::info!(selected = docs.len(), total, seed, "Sampled corpus");
            }
            if let Some(n) = limit {
                docs.truncate(n);
            }

            let mut embedding_model = embedding_model;
            let missing = docs.iter().filter(|d| !d.has_embedding()).count();
            if missing > 0 {
                let provider = create_embedding_provider(&config.embedding).await?.with_context(|| {
                    format!(
                        "{} documents have no embedding and embedding.provider is \"none\"",
                        missing
                    )
                })?;
                embed_missing(&mut docs, provider.as_ref(), batch_size).await?;
                embedding_model.get_or_insert_with(|| provider.model_name().to_string());
            }

            let options = IndexOptions {
                metric: config.dense.metric,
                embedding_model,
                index_kind: config.dense.index_kind,
                hnsw: config.dense.hnsw,
            };
            let out_dir = index_dir.clone();
            let meta = tokio::task::spawn_blocking(move || -> Result<_> {
                let snapshot = IndexSnapshot::build(docs, &options)?;
                Ok(storage::save(&out_dir, &snapshot)?)
            })
            .await
            .context("index build task panicked")??;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }

        Some(Commands::Search { query, algorithm, top_k }) => {
            let snapshot = load_index(&index_dir).await?;
            let orchestrator = build_orchestrator(&config, snapshot).await;
            let mut request = SearchRequest::new(query).with_algorithm(algorithm);
            request.top_k = top_k;
            let response = orchestrator.search(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Some(Commands::Stats) => {
            let snapshot = load_index(&index_dir).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot.stats())?);
        }

        None => {
            // Default: start the MCP server
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                index_dir = %index_dir.display(),
                "mosaic server starting"
            );

            // 5. Load the index (IndexUnavailable is fatal at startup)
            let snapshot = load_index(&index_dir).await?;

            // 6. Create the orchestrator: retrievers, router model, embedding provider
            let orchestrator = Arc::new(build_orchestrator(&config, snapshot).await);
            let service = RetrievalService::new(orchestrator, index_dir);

            // 7. Serve via stdio transport
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("mosaic server running, awaiting tool calls via stdio");

            // 8. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("mosaic server stopped");
        }
    }

    Ok(())
}
