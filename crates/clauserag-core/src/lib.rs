//! # ClauseRAG Core
//!
//! Shared vocabulary for every ClauseRAG crate: configuration, the error type,
//! chat/retrieval types and the `Provider` / `Embedder` seams that keep the
//! hosted LLM and embedding services swappable.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ClauseConfig;
pub use error::{ClauseError, Result};
