use rmcp::{
    ServerHandler,
    tool,
    model::{
        ServerCapabilities, Implementation, ProtocolVersion, CallToolResult,
        RawResource, ListResourcesResult, ReadResourceResult, ResourceContents,
        ReadResourceRequestParams, AnnotateAble,
    },
    handler::server::wrapper::Parameters,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::MosaicError;
use crate::index::{storage, IndexStats};
use crate::search::{AlgorithmHint, QueryOrchestrator, SearchRequest};

const STATS_RESOURCE: &str = "mosaic://index-stats";

pub struct RetrievalService {
    orchestrator: Arc<QueryOrchestrator>,
    index_dir: PathBuf,
    start_time: Instant,
}

impl RetrievalService {
    pub fn new(orchestrator: Arc<QueryOrchestrator>, index_dir: PathBuf) -> Self {
        Self {
            orchestrator,
            index_dir,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn stats(&self) -> IndexStats {
        self.orchestrator.index().snapshot().stats()
    }
}

// Parameter structs

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchParams {
    /// Natural language search query (required)
    pub query: String,
    /// Retrieval path: "bm25", "dense", "fusion", or "adaptive" (default: adaptive)
    pub algorithm: Option<AlgorithmHint>,
    /// Maximum number of results to return (default from config, capped at search.max_top_k)
    pub top_k: Option<u32>,
    /// Precomputed query embedding. Required for dense retrieval when no embedding provider is configured.
    pub query_embedding: Option<Vec<f32>>,
}

// Helper: convert MosaicError to CallToolResult with isError: true
fn error_to_result(err: MosaicError) -> CallToolResult {
    match err {
        MosaicError::Validation { message, field } => {
            let mut obj = json!({
                "isError": true,
                "error": message,
            });
            if let Some(f) = field {
                obj["field"] = json!(f);
            }
            CallToolResult::structured_error(obj)
        }
        MosaicError::EmptyQuery => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": "Field 'query' is required and cannot be empty",
                "field": "query"
            }))
        }
        MosaicError::IndexUnavailable(msg) => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": format!("Index unavailable: {}", msg),
                "hint": "The previous index is still serving. Check index_dir and rebuild with `mosaic build-index`."
            }))
        }
        other => {
            CallToolResult::structured_error(json!({
                "isError": true,
                "error": other.to_string()
            }))
        }
    }
}

fn to_structured<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_value(value) {
        Ok(v) => CallToolResult::structured(v),
        Err(e) => error_to_result(MosaicError::Internal(e.to_string())),
    }
}

fn format_stats_text(stats: &IndexStats) -> String {
    format!(
        "Index generation {} built {}\nDocuments: {} | Vocabulary: {} terms | Avg length: {:.1} tokens\nVectors: {} dims ({}), model: {}",
        stats.generation,
        stats.built_at.to_rfc3339(),
        stats.document_count,
        stats.vocabulary_size,
        stats.average_document_length,
        stats.dimension,
        stats.metric,
        stats.embedding_model.as_deref().unwrap_or("unknown"),
    )
}

// Tool implementations

#[rmcp::tool_router]
impl RetrievalService {
    #[tool(description = "Search the document index. algorithm selects bm25, dense, fusion (RRF), or adaptive (learned router). Returns ranked documents with snippets and per-signal score breakdowns; partial=true means a retriever failed and results come from the survivor.")]
    async fn search(
        &self,
        Parameters(params): Parameters<SearchParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            tool = "search",
            request_id = ?context.id,
            algorithm = ?params.algorithm,
            top_k = ?params.top_k,
            has_embedding = params.query_embedding.is_some(),
            "Tool called"
        );

        let request = SearchRequest {
            query: params.query,
            algorithm: params.algorithm.unwrap_or_default(),
            top_k: params.top_k.map(|k| k as usize),
            query_embedding: params.query_embedding,
        };

        // notifications/cancelled only trips the request token; the handler future keeps running
        match self.orchestrator.search_with_cancellation(request, &context.ct).await {
            Ok(response) => Ok(to_structured(&response)),
            Err(e) => Ok(error_to_result(e)),
        }
    }

    #[tool(description = "Show statistics of the serving index: generation, document count, vocabulary size, embedding dimension and metric.")]
    async fn index_stats(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "index_stats", "Tool called");
        Ok(to_structured(&self.stats()))
    }

    #[tool(description = "Reload the index from disk and atomically swap it in. In-flight searches finish on the old index. On failure the current index keeps serving.")]
    async fn reload_index(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "reload_index", dir = %self.index_dir.display(), "Tool called");

        let dir = self.index_dir.clone();
        let loaded = tokio::task::spawn_blocking(move || storage::load(&dir))
            .await
            .map_err(|e| MosaicError::Internal(e.to_string()))
            .and_then(|result| result);

        match loaded {
            Ok(snapshot) => {
                let previous = self.orchestrator.index().generation();
                let generation = self.orchestrator.index().install(snapshot);
                let stats = self.stats();
                Ok(CallToolResult::structured(json!({
                    "reloaded": true,
                    "previous_generation": previous,
                    "generation": generation,
                    "document_count": stats.document_count,
                    "hint": "New searches use the reloaded index"
                })))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Index reload failed, keeping current index");
                Ok(error_to_result(e))
            }
        }
    }

    #[tool(description = "Check server health and status")]
    async fn health_check(
        &self,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = "health_check", "Tool called");

        let stats = self.stats();
        let response = json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.uptime_seconds(),
            "generation": stats.generation,
            "document_count": stats.document_count,
            "router_model": self.orchestrator.selector().model().name(),
        });

        Ok(CallToolResult::structured(response))
    }
}

// ServerHandler implementation
#[rmcp::tool_handler(router = Self::tool_router())]
impl ServerHandler for RetrievalService {
    fn get_info(&self) -> rmcp::model::InitializeResult {
        rmcp::model::InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "mosaic".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Multi-algorithm document retrieval: BM25, dense, RRF fusion, and adaptive routing".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Document retrieval server. Tools: search, index_stats, reload_index, health_check. Resources: mosaic://index-stats (serving index summary).".to_string()
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            meta: None,
            resources: vec![
                RawResource {
                    uri: STATS_RESOURCE.to_string(),
                    name: "index-stats".to_string(),
                    title: Some("Index Statistics".to_string()),
                    description: Some("Summary of the serving index snapshot".to_string()),
                    mime_type: Some("text/plain".to_string()),
                    size: None,
                    icons: None,
                    meta: None,
                }
                .no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        match request.uri.as_str() {
            STATS_RESOURCE => {
                let text = format_stats_text(&self.stats());
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            uri => Err(McpError::resource_not_found(
                format!("Resource not found: {}", uri),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_support::tony_stark_corpus;
    use crate::index::{IndexHandle, IndexOptions, IndexSnapshot};
    use crate::retrieval::{Candidate, RetrievalQuery, Retriever, RetrieverError, RetrieverKind};
    use crate::search::OrchestratorOptions;
    use crate::selector::AlgorithmSelector;
    use async_trait::async_trait;
    use rmcp::ServiceExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn service(dir: PathBuf) -> RetrievalService {
        let snapshot = IndexSnapshot::build(tony_stark_corpus(), &IndexOptions::default()).unwrap();
        let orchestrator = QueryOrchestrator::from_config(
            &crate::config::Config::default(),
            Arc::new(IndexHandle::new(snapshot)),
            None,
            AlgorithmSelector::null(),
        );
        RetrievalService::new(Arc::new(orchestrator), dir)
    }

    #[test]
    fn test_empty_query_error_names_field() {
        let result = error_to_result(MosaicError::EmptyQuery);
        let value = result.structured_content.unwrap();
        assert_eq!(value["field"], "query");
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn test_stats_text_mentions_generation() {
        let svc = service(PathBuf::from("unused"));
        let text = format_stats_text(&svc.stats());
        assert!(text.starts_with("Index generation 1"));
        assert!(text.contains("Documents: 3"));
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_serving_index() {
        let missing = std::env::temp_dir().join(format!("mosaic-reload-{}", uuid::Uuid::new_v4()));
        let svc = service(missing);
        let result = svc.reload_index().await.unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(svc.orchestrator.index().generation(), 1);
    }

    #[tokio::test]
    async fn test_reload_swaps_generation() {
        let dir = std::env::temp_dir().join(format!("mosaic-reload-{}", uuid::Uuid::new_v4()));
        let snapshot = IndexSnapshot::build(tony_stark_corpus(), &IndexOptions::default()).unwrap();
        storage::save(&dir, &snapshot).unwrap();

        let svc = service(dir.clone());
        let result = svc.reload_index().await.unwrap();
        let value = result.structured_content.unwrap();
        assert_eq!(value["generation"], 2);
        assert_eq!(value["previous_generation"], 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    /// Sleeps, then records that it ran to completion.
    struct Slow {
        kind: RetrieverKind,
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Retriever for Slow {
        fn kind(&self) -> RetrieverKind {
            self.kind
        }

        async fn retrieve(
            &self,
            _snapshot: Arc<IndexSnapshot>,
            _query: Arc<RetrievalQuery>,
            _k: usize,
        ) -> Result<Vec<Candidate>, RetrieverError> {
            tokio::time::sleep(Duration::from_millis(400)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cancelled_notification_stops_retrievers() {
        let completed = Arc::new(AtomicUsize::new(0));
        let snapshot = IndexSnapshot::build(tony_stark_corpus(), &IndexOptions::default()).unwrap();
        let retrievers: Vec<Arc<dyn Retriever>> = RetrieverKind::ALL
            .into_iter()
            .map(|kind| Arc::new(Slow { kind, completed: Arc::clone(&completed) }) as Arc<dyn Retriever>)
            .collect();
        let options = OrchestratorOptions {
            retriever_timeout: Duration::from_secs(5),
            ..OrchestratorOptions::default()
        };
        let orchestrator = QueryOrchestrator::new(
            Arc::new(IndexHandle::new(snapshot)),
            retrievers,
            AlgorithmSelector::null(),
            options,
        );
        let svc = RetrievalService::new(Arc::new(orchestrator), PathBuf::from("unused"));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let server_task = tokio::spawn(async move {
            if let Ok(running) = svc.serve((server_read, server_write)).await {
                let _ = running.waiting().await;
            }
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut lines = BufReader::new(client_read).lines();
        let messages = [
            json!({
                "jsonrpc": "2.0",
                "method": "initialize",
                "id": 1,
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "1.0"}
                }
            }),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ];
        client_write.write_all(format!("{}\n", messages[0]).as_bytes()).await.unwrap();
        let init = lines.next_line().await.unwrap().unwrap();
        assert!(init.contains("\"id\":1"));
        client_write.write_all(format!("{}\n", messages[1]).as_bytes()).await.unwrap();

        let call = json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 2,
            "params": {"name": "search", "arguments": {"query": "tony stark", "algorithm": "fusion"}}
        });
        client_write.write_all(format!("{}\n", call).as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cancel = json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": {"requestId": 2, "reason": "client gave up"}
        });
        client_write.write_all(format!("{}\n", cancel).as_bytes()).await.unwrap();
        client_write.flush().await.unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(
            completed.load(Ordering::SeqCst),
            0,
            "retrievers kept running after the client cancelled the search"
        );

        drop(client_write);
        drop(lines);
        server_task.abort();
    }
}
