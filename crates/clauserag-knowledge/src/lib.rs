//! # ClauseRAG Knowledge Base
//!
//! Document ingestion and retrieval for grounded answers.
//!
//! ## Design
//! - **SQLite** for documents, chunk embeddings and an FTS5 index
//! - **Recursive chunking** on paragraph, line, word and character boundaries
//! - **Hybrid search**: L2 distance over embeddings plus keyword overlap
//! - **Query expansion** with a synonym table when the first pass is weak
//!
//! ## How it works
//! ```text
//! User: "Is knee surgery covered?"
//!   ↓
//! Retriever.retrieve(query)
//!   ↓ hybrid search (top 5), expanded query if best score > 1.0
//! Chunks scoring < 1.2 (or the best 3)
//!   ↓
//! "Source 1 (policy.pdf, Page 4): ..." context block + source list
//! ```

pub mod chunker;
pub mod ingest;
pub mod loader;
pub mod query;
pub mod retriever;
pub mod search;
pub mod store;

pub use ingest::{IngestReport, Ingestor};
pub use retriever::{Retrieval, RetrievalSettings, Retriever};
pub use search::SearchResult;
pub use store::KnowledgeStore;
