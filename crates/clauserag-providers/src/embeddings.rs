//! Embedding backends.
//!
//! - `OpenAiCompatibleEmbedder` calls a hosted or local `/embeddings` endpoint.
//! - `HashingEmbedder` needs no network: signed feature hashing over words and
//!   character trigrams, L2-normalised. Good enough for lexical-semantic recall
//!   on small corpora, and fully deterministic.

use async_trait::async_trait;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::Embedder;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::openai_compatible::{resolve_api_key, resolve_base_url};
use crate::provider_registry::{AuthStyle, ProviderConfig};

pub struct OpenAiCompatibleEmbedder {
    name: String,
    model: String,
    api_key: String,
    url: String,
    auth_style: AuthStyle,
    dimensions: usize,
    client: reqwest::Client,
}

impl OpenAiCompatibleEmbedder {
    pub fn from_registry(
        registry: &ProviderConfig,
        model: &str,
        api_keys: &[&str],
        endpoint: &str,
        dimensions: usize,
    ) -> Result<Self> {
        let path = registry.embeddings_path.ok_or_else(|| {
            ClauseError::Config(format!("provider '{}' does not serve embeddings", registry.name))
        })?;
        Ok(Self {
            name: registry.name.to_string(),
            model: model.to_string(),
            api_key: resolve_api_key(registry, api_keys),
            url: format!("{}{}", resolve_base_url(registry, endpoint), path),
            auth_style: registry.auth_style,
            dimensions,
            client: reqwest::Client::new(),
        })
    }
}

/// Extract vectors from an OpenAI embeddings body, ordered by `index`.
pub fn parse_embeddings_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| ClauseError::Embedding("No data in embeddings response".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let idx = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
            let vector = item["embedding"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_default();
            (idx, vector)
        })
        .collect();
    indexed.sort_by_key(|(idx, _)| *idx);

    if indexed.len() != expected {
        return Err(ClauseError::Embedding(format!(
            "expected {} vectors, got {}",
            expected,
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(ClauseError::ApiKeyMissing(self.name.clone()));
        }

        let mut req = self
            .client
            .post(&self.url)
            .json(&json!({ "model": self.model, "input": texts }));
        if self.auth_style == AuthStyle::Bearer && !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req.send().await.map_err(|e| {
            ClauseError::Http(format!("{} embeddings failed ({}): {}", self.name, self.url, e))
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClauseError::Embedding(format!(
                "{} embeddings error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ClauseError::Http(e.to_string()))?;
        parse_embeddings_response(&json, texts.len())
    }
}

/// Offline embedder based on signed feature hashing.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, &format!("w:{word}"), 1.0);
            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                self.add_feature(&mut vector, &format!("t:{tri}"), 0.5);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_is_deterministic_and_normalised() {
        let e = HashingEmbedder::new(128);
        let a = e.embed_one("Maternity benefits after waiting period");
        let b = e.embed_one("Maternity benefits after waiting period");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hashing_similarity_orders_related_text() {
        let e = HashingEmbedder::new(384);
        let q = e.embed_one("knee surgery coverage");
        let related = e.embed_one("Surgery of the knee is covered after 24 months");
        let unrelated = e.embed_one("Photosynthesis converts light into chemical energy");
        assert!(cosine(&q, &related) > cosine(&q, &unrelated));
    }

    #[test]
    fn test_hashing_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_one("   ").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn test_embed_query_default_method() {
        let e = HashingEmbedder::new(32);
        let v = e.embed_query("policy").await.unwrap();
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let body = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_embeddings_response(&body, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_embeddings_count_mismatch() {
        let body = json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(matches!(
            parse_embeddings_response(&body, 3),
            Err(ClauseError::Embedding(_))
        ));
    }

    #[test]
    fn test_provider_without_embeddings_rejected() {
        let registry = crate::provider_registry::get_provider_config("groq").unwrap();
        let result = OpenAiCompatibleEmbedder::from_registry(registry, "m", &[], "", 8);
        assert!(matches!(result, Err(ClauseError::Config(_))));
    }
}
