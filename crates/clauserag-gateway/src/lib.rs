//! # ClauseRAG Gateway
//! HTTP API: the single-shot `/ask` endpoint plus `/api/v1/*` chat,
//! session and knowledge management routes.

pub mod routes;
pub mod server;

pub use server::{AppState, Backend, build_router, start};
