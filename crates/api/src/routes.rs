use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use extract::PipelineReport;
use index::{BackfillReport, GraphStats, LoadResult, SimilarNode};
use query::{ConversationContext, GatewayAnswer};

use crate::metrics::MetricsSnapshot;
use crate::services::{ExtractionBusy, HealthReport, Services};

pub struct AppState {
    pub services: Services,
    pub sessions: DashMap<Uuid, Arc<Mutex<ConversationContext>>>,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            sessions: DashMap::new(),
        }
    }
}

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        if e.downcast_ref::<ExtractionBusy>().is_some() {
            tracing::warn!("Extraction request refused, a run is already active");
            return Self { status: StatusCode::CONFLICT, message: e.to_string() };
        }
        tracing::error!(error = %format!("{:#}", e), "Request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{:#}", e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Deserialize, Default)]
struct ExtractRequest {
    /// Input table relative to the data directory; the configured data file when absent.
    path: Option<String>,
    #[serde(default)]
    retry_failed: bool,
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: Option<Uuid>,
    question: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: Uuid,
    #[serde(flatten)]
    answer: GatewayAnswer,
}

#[derive(Deserialize)]
struct SimilarRequest {
    #[serde(default = "default_index")]
    index: String,
    phrase: String,
    #[serde(default = "default_k")]
    k: usize,
}

fn default_index() -> String {
    "company_name_index".to_string()
}

fn default_k() -> usize {
    5
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/extract", post(run_extraction))
        .route("/load", post(run_load))
        .route("/embed", post(run_backfill))
        .route("/chat", post(chat))
        .route("/chat/:id", get(get_transcript).delete(clear_session))
        .route("/similar", post(similar))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.services.health().await)
}

async fn run_extraction(
    State(state): State<Arc<AppState>>,
    req: Option<Json<ExtractRequest>>,
) -> Result<Json<PipelineReport>, AppError> {
    let Json(req) = req.unwrap_or_default();
    let data_dir = state.services.config().data_dir();
    let path = req.path.as_deref().map(|p| resolve_input(&data_dir, p)).transpose()?;

    let report = state.services.extract(path, req.retry_failed).await?;
    Ok(Json(report))
}

/// Joins a request-supplied input onto `data_dir`. Absolute paths and `..` are refused.
fn resolve_input(data_dir: &FsPath, requested: &str) -> Result<PathBuf, AppError> {
    let relative = FsPath::new(requested.trim());
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.as_os_str().is_empty() || !contained {
        return Err(AppError::bad_request(format!(
            "path must be relative to the data directory: {:?}",
            requested
        )));
    }
    Ok(data_dir.join(relative))
}

async fn run_load(State(state): State<Arc<AppState>>) -> Result<(StatusCode, Json<LoadResult>), AppError> {
    let result = state.services.load().await?;
    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(result)))
}

async fn run_backfill(State(state): State<Arc<AppState>>) -> Result<Json<BackfillReport>, AppError> {
    Ok(Json(state.services.embed().await?))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(AppError::bad_request("question is empty"));
    }

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    let session = match req.session_id {
        Some(id) => state
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found(format!("unknown session {}", id)))?,
        None => state.sessions.entry(session_id).or_default().clone(),
    };

    let mut conversation = session.lock().await;
    let answer = state.services.ask(question, &mut conversation).await?;

    Ok(Json(ChatResponse { session_id, answer }))
}

async fn get_transcript(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationContext>, AppError> {
    let session = state
        .sessions
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::not_found(format!("unknown session {}", id)))?;

    let conversation = session.lock().await;
    Ok(Json(conversation.clone()))
}

async fn clear_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    let (_, session) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| AppError::not_found(format!("unknown session {}", id)))?;

    session.lock().await.clear();
    Ok(StatusCode::NO_CONTENT)
}

async fn similar(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimilarRequest>,
) -> Result<Json<Vec<SimilarNode>>, AppError> {
    if req.phrase.trim().is_empty() {
        return Err(AppError::bad_request("phrase is empty"));
    }
    Ok(Json(state.services.similar(&req.index, &req.phrase, req.k).await?))
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<GraphStats>, AppError> {
    Ok(Json(state.services.stats().await?))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.services.metrics().snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::metrics::Metrics;
    use crate::services::{Collaborators, Stores};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use extract::StructuredExtractor;
    use index::{Embedder, GraphReader, MemoryGraphStore, Record, StoreResult};
    use query::TextGenerator;
    use serde_json::{Value, json};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    struct Echo(&'static str);

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[async_trait]
    impl StructuredExtractor for Echo {
        async fn extract(&self, _batch_text: &str) -> Result<Value> {
            Ok(serde_json::from_str(self.0)?)
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    /// Holds every extraction call open until released.
    #[derive(Default)]
    struct Gate {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StructuredExtractor for Gate {
        async fn extract(&self, _batch_text: &str) -> Result<Value> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(json!({"nodes": [], "relationships": []}))
        }
    }

    /// NetApp has one rated report; every other company is unknown.
    struct RatedCompanies;

    #[async_trait]
    impl GraphReader for RatedCompanies {
        async fn read(&self, cypher: &str) -> StoreResult<Vec<Record>> {
            if !cypher.contains("'NetApp'") {
                return Ok(Vec::new());
            }
            let row = json!({"c.name": "NetApp", "rat.name": "AA"});
            Ok(vec![row.as_object().cloned().unwrap_or_default()])
        }

        async fn vector_search(&self, _index: &str, _k: usize, _vector: &[f32]) -> StoreResult<Vec<SimilarNode>> {
            Ok(vec![SimilarNode { id: "Company_netapp".into(), name: Some("NetApp".into()), score: 0.9 }])
        }
    }

    const NETAPP_CYPHER: &str = "MATCH (c:Company) WHERE toLower(c.name) CONTAINS toLower('NetApp') MATCH (c)-[:HAS_REPORT]->(rep)-[:HAS_RATING]->(rat) RETURN c.name, rat.name";

    fn app_with(config: AppConfig, store: Arc<MemoryGraphStore>) -> Router {
        let extractor = Arc::new(Echo(r#"{"nodes": [], "relationships": []}"#));
        app_with_extractor(config, store, extractor)
    }

    fn app_with_extractor(
        config: AppConfig,
        store: Arc<MemoryGraphStore>,
        extractor: Arc<dyn StructuredExtractor>,
    ) -> Router {
        let collaborators = Collaborators {
            extractor,
            embedder: Arc::new(UnitEmbedder),
            query_llm: Arc::new(Echo(NETAPP_CYPHER)),
            answer_llm: Arc::new(Echo("NetApp의 환경 등급은 AA입니다.")),
        };
        let stores = Stores { writer: store, reader: Arc::new(RatedCompanies) };
        let services = Services::with_parts(config, Metrics::new(), collaborators, stores);
        build_router(Arc::new(AppState::new(services)))
    }

    fn app() -> Router {
        app_with(AppConfig::default(), Arc::new(MemoryGraphStore::new()))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_chat_session_lifecycle() {
        let app = app();

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"question": "NetApp의 환경 등급?"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["status"], "answered");
        assert_eq!(body["outcome"]["text"], "NetApp의 환경 등급은 AA입니다.");
        assert!(body["query"].as_str().unwrap().ends_with("LIMIT 50"));
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (_, body) = send(
            &app,
            "POST",
            "/chat",
            Some(json!({"session_id": session_id, "question": "NetApp의 환경 등급?"})),
        )
        .await;
        assert_eq!(body["session_id"], session_id.as_str());

        let (status, transcript) = send(&app, "GET", &format!("/chat/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(transcript["turns"].as_array().unwrap().len(), 4);
        assert_eq!(transcript["turns"][0]["role"], "user");

        let (status, _) = send(&app, "DELETE", &format!("/chat/{}", session_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/chat/{}", session_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_question_and_unknown_session() {
        let app = app();

        let (status, _) = send(&app, "POST", "/chat", Some(json!({"question": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = Uuid::new_v4();
        let (status, body) = send(
            &app,
            "POST",
            "/chat",
            Some(json!({"session_id": unknown, "question": "NetApp?"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("unknown session"));
    }

    #[tokio::test]
    async fn test_load_then_stats_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.output_dir = dir.path().to_path_buf();
        let graph = json!({
            "nodes": [
                {"id": "Company_acme", "label": "Company", "name": "Acme"},
                {"id": "Rating_a", "label": "Rating", "name": "A"}
            ],
            "relationships": [
                {"type": "HAS_RATING", "start_node_id": "Company_acme", "end_node_id": "Rating_a"},
                {"type": "HAS_REPORT", "start_node_id": "Company_acme", "end_node_id": "Report_missing"}
            ]
        });
        tokio::fs::write(config.consolidated_path(), graph.to_string()).await.unwrap();

        let store = Arc::new(MemoryGraphStore::new());
        let app = app_with(config, store.clone());

        let (status, result) = send(&app, "POST", "/load", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["status"], "SUCCESS");
        assert_eq!(result["node_count"], 2);
        assert_eq!(result["failed_relationships"], 1);

        let (_, stats) = send(&app, "GET", "/stats", None).await;
        assert_eq!(stats["node_count"], 2);
        assert_eq!(stats["relationship_count"], 1);

        let (_, metrics) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(metrics["nodes_loaded"], 2);
        assert_eq!(metrics["relationship_failures"], 1);
    }

    #[tokio::test]
    async fn test_offline_store_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.pipeline.output_dir = dir.path().to_path_buf();
        let graph = json!({"nodes": [{"id": "Company_acme", "label": "Company", "name": "Acme"}]});
        tokio::fs::write(config.consolidated_path(), graph.to_string()).await.unwrap();

        let store = Arc::new(MemoryGraphStore::new());
        store.set_offline(true);
        let app = app_with(config, store);

        let (status, result) = send(&app, "POST", "/load", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(result["status"], "FAILURE");

        let (_, health) = send(&app, "GET", "/health", None).await;
        assert!(health["graph_store"].as_str().unwrap().starts_with("error"));
    }

    #[tokio::test]
    async fn test_similar_and_missing_consolidated_file() {
        let app = app();

        let (status, hits) = send(&app, "POST", "/similar", Some(json!({"phrase": "Net App"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits[0]["id"], "Company_netapp");

        let (status, _) = send(&app, "POST", "/similar", Some(json!({"phrase": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn extraction_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.data_file = dir.join("esg_database.csv");
        config.pipeline.output_dir = dir.join("output");
        config.pipeline.failure_backoff_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_extract_writes_consolidated_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("esg.csv"), "Company,Rating\nAcme,A\n").await.unwrap();

        let config = extraction_config(dir.path());
        let consolidated = config.consolidated_path();
        let app = app_with(config, Arc::new(MemoryGraphStore::new()));

        let (status, report) = send(&app, "POST", "/extract", Some(json!({"path": "esg.csv"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["total_rows"], 1);
        assert_eq!(report["batches_extracted"], 1);
        assert!(consolidated.is_file());

        let (status, _) = send(&app, "POST", "/extract", Some(json!({"path": "missing.csv"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_extract_paths_stay_inside_the_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.csv");
        tokio::fs::write(&secret, "Company,Rating\nAcme,A\n").await.unwrap();

        let app = app_with(extraction_config(dir.path()), Arc::new(MemoryGraphStore::new()));

        let absolute = secret.to_string_lossy().to_string();
        for path in [absolute.as_str(), "../secret.csv", "sub/../../esg.csv", "  "] {
            let (status, body) = send(&app, "POST", "/extract", Some(json!({"path": path}))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
            assert!(body["error"].as_str().unwrap().contains("relative to the data directory"));
        }
        assert!(!dir.path().join("output").exists());
    }

    #[tokio::test]
    async fn test_concurrent_extraction_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("esg_database.csv"), "Company,Rating\nAcme,A\n").await.unwrap();

        let gate = Arc::new(Gate::default());
        let app = app_with_extractor(extraction_config(dir.path()), Arc::new(MemoryGraphStore::new()), gate.clone());

        let first = tokio::spawn({
            let app = app.clone();
            async move { send(&app, "POST", "/extract", Some(json!({}))).await }
        });
        gate.started.notified().await;

        let (status, body) = send(&app, "POST", "/extract", Some(json!({"retry_failed": true}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already in progress"));

        gate.release.notify_one();
        let (status, report) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["batches_extracted"], 1);

        // Lock released: the next request reaches ingestion and fails there instead.
        let (status, _) = send(&app, "POST", "/extract", Some(json!({"path": "missing.csv"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
