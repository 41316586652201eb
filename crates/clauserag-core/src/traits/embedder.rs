//! Text embedding trait.

use async_trait::async_trait;

use crate::error::{ClauseError, Result};

/// Turns text into fixed-size vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Vector length produced by `embed`.
    fn dimensions(&self) -> usize;

    /// Embed a batch. The output has one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ClauseError::Embedding(format!("{} returned no vector", self.name())))
    }
}
