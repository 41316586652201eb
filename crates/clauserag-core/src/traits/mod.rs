//! Service seams: chat completion and text embedding.

pub mod embedder;
pub mod provider;

pub use embedder::Embedder;
pub use provider::{GenerateParams, Provider};
