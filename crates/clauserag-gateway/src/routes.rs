//! API route handlers for the gateway.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::Json;
use clauserag_assistant::ChatRequest;
use clauserag_core::config::expand_path;
use clauserag_core::error::ClauseError;
use clauserag_knowledge::SearchResult;
use std::sync::Arc;

use super::server::AppState;

fn error_json(e: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": e.to_string()}))
}

fn result_json(r: &SearchResult) -> serde_json::Value {
    let src = r.source_ref();
    serde_json::json!({
        "doc_name": r.doc_name,
        "source": src.source,
        "page": src.page,
        "content": r.content,
        "score": r.score,
        "chunk_idx": r.chunk_idx,
        "kind": r.kind,
    })
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "clauserag-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Single-shot textbook question (`{"query": ...}` → `{"answer", "sources"}`).
/// Errors use the `{"error": ...}` shape with 400/500 statuses.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"));
    let data: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) if is_json => v,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Request must be JSON"})),
            );
        }
    };

    let query = data["query"].as_str().unwrap_or("").trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Missing 'query' in request body"})),
        );
    }

    let Some(assistant) = state.assistant.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "Backend models not initialized."})),
        );
    };

    match assistant.ask(query).await {
        Ok(res) => {
            tracing::info!("Answered /ask with {} source(s)", res.sources.len());
            let sources: Vec<_> = res
                .sources
                .iter()
                .map(|s| serde_json::json!({"source": s.source, "page": s.page}))
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({"answer": res.answer, "sources": sources})),
            )
        }
        Err(e) => {
            tracing::error!("/ask failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "An internal error occurred."})),
            )
        }
    }
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    let cfg = &state.full_config;
    let (docs, chunks) = state.store.stats();
    Json(serde_json::json!({
        "name": "ClauseRAG",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": uptime.as_secs(),
        "provider": cfg.llm.provider,
        "model": cfg.llm.model,
        "embedding": cfg.embedding.provider,
        "mode": cfg.assistant.mode,
        "language": cfg.assistant.language,
        "assistant_ready": state.assistant.is_some(),
        "knowledge": {"documents": docs, "chunks": chunks},
        "sessions": state.sessions.len().await,
        "gateway": {
            "host": state.gateway_config.host,
            "port": state.gateway_config.port,
            "require_pairing": state.gateway_config.require_pairing,
        }
    }))
}

/// List supported LLM providers.
pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let active = &state.full_config.llm.provider;
    let providers: Vec<_> = clauserag_providers::available_providers()
        .into_iter()
        .map(|name| {
            let registry = clauserag_providers::provider_registry::get_provider_config(name);
            serde_json::json!({
                "name": name,
                "active": name == active.as_str(),
                "local": registry.map(|r| r.is_local()).unwrap_or(false),
                "models": registry
                    .map(|r| r.default_models.iter().map(|m| m.id).collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect();
    Json(serde_json::json!({"ok": true, "providers": providers, "active": active}))
}

async fn run_chat(state: &AppState, session_id: &str, request: ChatRequest) -> Json<serde_json::Value> {
    let Some(assistant) = state.assistant.as_ref() else {
        return error_json("Backend models not initialized.");
    };
    let conversation = state.sessions.get_or_create(session_id).await;
    let mut conv = conversation.lock().await;
    match assistant.chat(&mut conv, request).await {
        Ok(res) => Json(serde_json::json!({
            "ok": true,
            "session_id": session_id,
            "answer": res.answer,
            "sources": res.sources,
            "decision": res.decision,
            "not_found_hint": res.not_found_hint,
            "expanded_query": res.expanded_query,
            "mode": res.mode,
            "stats": conv.stats(),
        })),
        Err(e) => {
            let mut body = error_json(&e).0;
            body["session_id"] = serde_json::json!(session_id);
            Json(body)
        }
    }
}

/// Start a new session and answer its first question.
pub async fn chat_new(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Json<serde_json::Value> {
    let (id, _) = state.sessions.create().await;
    run_chat(&state, &id, request).await
}

/// Continue (or open) a named session.
pub async fn chat_send(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Json<serde_json::Value> {
    run_chat(&state, &session, request).await
}

/// Turns and statistics of a session.
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> Json<serde_json::Value> {
    match state.sessions.get(&session).await {
        Some(conv) => {
            let conv = conv.lock().await;
            Json(serde_json::json!({
                "ok": true,
                "session_id": session,
                "messages": conv.turns,
                "stats": conv.stats(),
            }))
        }
        None => error_json(format!("Session not found: {session}")),
    }
}

/// Clear a session's history.
pub async fn chat_clear(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
) -> Json<serde_json::Value> {
    if state.sessions.clear(&session).await {
        Json(serde_json::json!({"ok": true, "session_id": session}))
    } else {
        error_json(format!("Session not found: {session}"))
    }
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.sessions.list().await;
    Json(serde_json::json!({"ok": true, "count": sessions.len(), "sessions": sessions}))
}

/// Search the knowledge base. `mode`: `pipeline` (default), `hybrid`,
/// `semantic` or `fulltext`.
pub async fn knowledge_search(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let query = body["query"].as_str().unwrap_or("").trim();
    if query.is_empty() {
        return error_json("Missing 'query'");
    }
    let limit = body["limit"]
        .as_u64()
        .map(|l| l as usize)
        .unwrap_or(state.retriever.settings().top_k);
    let mode = body["mode"].as_str().unwrap_or("pipeline");

    let outcome = match mode {
        "pipeline" => state.retriever.retrieve(query).await.map(|r| r.results),
        "hybrid" => state.retriever.search(query, limit).await,
        "semantic" => state.retriever.semantic(query, limit).await,
        "fulltext" => state.retriever.full_text(query, limit),
        other => Err(ClauseError::InvalidInput(format!("Unknown search mode '{other}'"))),
    };
    match outcome {
        Ok(results) => {
            let items: Vec<_> = results.iter().map(result_json).collect();
            Json(serde_json::json!({"ok": true, "mode": mode, "results": items, "count": items.len()}))
        }
        Err(e) => error_json(e),
    }
}

/// List all knowledge documents.
pub async fn knowledge_list_docs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.list_documents() {
        Ok(docs) => {
            let (total_docs, total_chunks) = state.store.stats();
            Json(serde_json::json!({
                "ok": true, "documents": docs,
                "total_docs": total_docs, "total_chunks": total_chunks
            }))
        }
        Err(e) => error_json(e),
    }
}

/// Add a text document to the knowledge base.
pub async fn knowledge_add_doc(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let name = body["name"].as_str().unwrap_or("unnamed.txt");
    let content = body["content"].as_str().unwrap_or("");
    let source = body["source"].as_str().unwrap_or(name);

    match state.ingestor.ingest_text(name, source, content).await {
        Ok(report) if report.skipped > 0 => error_json(format!("Document already ingested: {name}")),
        Ok(report) => Json(serde_json::json!({"ok": true, "chunks": report.chunks})),
        Err(e) => error_json(e),
    }
}

/// Remove a document from the knowledge base.
pub async fn knowledge_remove_doc(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Json<serde_json::Value> {
    match state.store.remove_document(id) {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => error_json(e),
    }
}

/// (Re)ingest a directory. Body: `{"data_dir"?: string, "rebuild"?: bool}`.
pub async fn knowledge_ingest(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let dir = body["data_dir"]
        .as_str()
        .map(expand_path)
        .unwrap_or_else(|| expand_path(&state.full_config.knowledge.data_dir));
    let rebuild = body["rebuild"].as_bool().unwrap_or(false);
    tracing::info!("Ingest requested for {} (rebuild={rebuild})", dir.display());

    match state.ingestor.ingest_directory(&dir, rebuild).await {
        Ok(report) => Json(serde_json::json!({"ok": true, "report": report})),
        Err(e) => error_json(e),
    }
}
