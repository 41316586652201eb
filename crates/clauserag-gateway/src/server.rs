//! HTTP server implementation using Axum.

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use clauserag_assistant::{Assistant, SessionManager};
use clauserag_core::config::{ClauseConfig, GatewayConfig, expand_path};
use clauserag_core::traits::provider::GenerateParams;
use clauserag_knowledge::{Ingestor, KnowledgeStore, RetrievalSettings, Retriever};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Store, retrieval, ingestion and (when a provider could be built) the assistant.
pub struct Backend {
    pub store: Arc<KnowledgeStore>,
    pub retriever: Arc<Retriever>,
    pub ingestor: Arc<Ingestor>,
    /// `None` when the chat provider failed to initialise.
    pub assistant: Option<Arc<Assistant>>,
}

impl Backend {
    /// Wire everything from configuration. Store and embedder failures are
    /// fatal; a provider failure only disables answering.
    pub fn from_config(config: &ClauseConfig) -> anyhow::Result<Self> {
        let db_path = expand_path(&config.knowledge.db_path);
        let store = Arc::new(KnowledgeStore::open(&db_path)?);
        let (docs, chunks) = store.stats();
        tracing::info!("📚 Knowledge base: {} documents, {} chunks ({})", docs, chunks, db_path.display());

        let embedder: Arc<dyn clauserag_core::traits::Embedder> =
            Arc::from(clauserag_providers::create_embedder(config)?);
        tracing::info!("🔢 Embedder: {} ({} dims)", embedder.name(), embedder.dimensions());

        let retriever = Arc::new(Retriever::new(
            store.clone(),
            embedder.clone(),
            RetrievalSettings::from(&config.knowledge),
        ));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            embedder,
            &config.knowledge,
            config.embedding.batch_size,
        )?);

        let params = GenerateParams {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        };
        let assistant = match clauserag_providers::create_provider(config) {
            Ok(provider) => {
                let a = Assistant::new(Arc::from(provider), retriever.clone(), params, config.assistant.clone())?;
                tracing::info!(
                    "✅ Assistant ready (provider={}, model={}, mode={})",
                    a.provider_name(),
                    a.model_name(),
                    a.default_mode()
                );
                Some(Arc::new(a))
            }
            Err(e) => {
                tracing::warn!("⚠️ Chat provider not available: {e}");
                None
            }
        };

        Ok(Self { store, retriever, ingestor, assistant })
    }
}

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub full_config: Arc<ClauseConfig>,
    pub config_path: PathBuf,
    pub start_time: std::time::Instant,
    pub pairing_code: Option<String>,
    pub store: Arc<KnowledgeStore>,
    pub retriever: Arc<Retriever>,
    pub ingestor: Arc<Ingestor>,
    pub assistant: Option<Arc<Assistant>>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: ClauseConfig, config_path: PathBuf, backend: Backend, pairing_code: Option<String>) -> Self {
        let sessions = SessionManager::with_limits(
            config.assistant.max_sessions,
            std::time::Duration::from_secs(config.assistant.session_idle_secs),
        );
        Self {
            gateway_config: config.gateway.clone(),
            full_config: Arc::new(config),
            config_path,
            start_time: std::time::Instant::now(),
            pairing_code,
            store: backend.store,
            retriever: backend.retriever,
            ingestor: backend.ingestor,
            assistant: backend.assistant,
            sessions: Arc::new(sessions),
        }
    }
}

/// Pairing code auth middleware: validates X-Pairing-Code header or ?code= query.
async fn require_pairing(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(expected) = &state.pairing_code else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Pairing-Code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        if query
            .split('&')
            .filter_map(|pair| pair.strip_prefix("code="))
            .any(|code| code == expected)
        {
            return next.run(req).await;
        }
    }

    (
        axum::http::StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing pairing code"})),
    )
        .into_response()
}

/// Verify pairing code endpoint (public).
async fn verify_pairing(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let code = body["code"].as_str().unwrap_or("");
    match &state.pairing_code {
        Some(expected) if code == expected => Json(serde_json::json!({"ok": true})),
        Some(_) => Json(serde_json::json!({"ok": false, "error": "Invalid pairing code"})),
        None => Json(serde_json::json!({"ok": true})),
    }
}

fn cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    // Example: CLAUSERAG_CORS_ORIGINS=https://claims.example.com,https://edu.example.com
    if let Ok(origins_str) = std::env::var("CLAUSERAG_CORS_ORIGINS") {
        let origins: Vec<_> = origins_str
            .split(',')
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    } else {
        cors.allow_origin(Any)
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let max_body = shared.gateway_config.max_body_bytes;

    // Protected routes: require valid pairing code when one is configured
    let protected = Router::new()
        .route("/api/v1/info", get(super::routes::system_info))
        .route("/api/v1/providers", get(super::routes::list_providers))
        // Conversational chat
        .route("/api/v1/chat", post(super::routes::chat_new))
        .route(
            "/api/v1/chat/{session}",
            post(super::routes::chat_send)
                .get(super::routes::chat_history)
                .delete(super::routes::chat_clear),
        )
        .route("/api/v1/sessions", get(super::routes::list_sessions))
        // Knowledge Base API
        .route(
            "/api/v1/knowledge/search",
            post(super::routes::knowledge_search),
        )
        .route(
            "/api/v1/knowledge/documents",
            get(super::routes::knowledge_list_docs).post(super::routes::knowledge_add_doc),
        )
        .route(
            "/api/v1/knowledge/documents/{id}",
            axum::routing::delete(super::routes::knowledge_remove_doc),
        )
        .route(
            "/api/v1/knowledge/ingest",
            post(super::routes::knowledge_ingest),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_pairing,
        ));

    // Public routes: no auth
    let public = Router::new()
        .route("/ask", post(super::routes::ask))
        .route("/health", get(super::routes::health_check))
        .route("/api/v1/verify-pairing", post(verify_pairing));

    protected
        .merge(public)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Pairing code from `CLAUSERAG_PAIRING_CODE` or `.pairing_code` next to the config.
/// With `require_pairing` set, a missing or blank code is an error.
pub fn load_pairing_code(config: &GatewayConfig, config_path: &std::path::Path) -> anyhow::Result<Option<String>> {
    resolve_pairing_code(config, config_path, std::env::var("CLAUSERAG_PAIRING_CODE").ok())
}

fn resolve_pairing_code(
    config: &GatewayConfig,
    config_path: &std::path::Path,
    from_env: Option<String>,
) -> anyhow::Result<Option<String>> {
    if !config.require_pairing {
        return Ok(None);
    }
    let code = from_env
        .or_else(|| {
            config_path
                .parent()
                .and_then(|d| std::fs::read_to_string(d.join(".pairing_code")).ok())
        })
        .map(|s| s.trim().to_string())
        .filter(|c| !c.is_empty());
    match code {
        Some(code) => Ok(Some(code)),
        None => anyhow::bail!(
            "require_pairing is set but no pairing code was found (set CLAUSERAG_PAIRING_CODE or write {})",
            config_path.with_file_name(".pairing_code").display()
        ),
    }
}

/// Start the HTTP server.
pub async fn start(config: ClauseConfig, config_path: PathBuf) -> anyhow::Result<()> {
    let pairing_code = load_pairing_code(&config.gateway, &config_path)?;
    if pairing_code.is_some() {
        tracing::info!("🔐 Pairing code required for /api/v1");
    }
    let backend = Backend::from_config(&config)?;
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = AppState::new(config, config_path, backend, pairing_code);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> GatewayConfig {
        GatewayConfig { require_pairing: true, ..GatewayConfig::default() }
    }

    fn config_in(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("clauserag-pairing-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("config.toml")
    }

    #[test]
    fn test_pairing_not_required() {
        let code = resolve_pairing_code(&GatewayConfig::default(), &config_in("off"), None).unwrap();
        assert!(code.is_none());
    }

    #[test]
    fn test_pairing_code_from_env_or_file() {
        let path = config_in("file");
        let code = resolve_pairing_code(&required(), &path, Some(" 424242 ".into())).unwrap();
        assert_eq!(code.as_deref(), Some("424242"));

        std::fs::write(path.with_file_name(".pairing_code"), "778899\n").unwrap();
        let code = resolve_pairing_code(&required(), &path, None).unwrap();
        assert_eq!(code.as_deref(), Some("778899"));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_required_pairing_without_code_fails_closed() {
        let path = config_in("missing");
        let err = resolve_pairing_code(&required(), &path, None).unwrap_err();
        assert!(err.to_string().contains("no pairing code"));

        std::fs::write(path.with_file_name(".pairing_code"), "   \n").unwrap();
        assert!(resolve_pairing_code(&required(), &path, None).is_err());
        assert!(resolve_pairing_code(&required(), &path, Some(String::new())).is_err());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
