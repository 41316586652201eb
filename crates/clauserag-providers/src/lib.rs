//! # ClauseRAG Providers
//!
//! LLM and embedding clients.
//!
//! Every chat backend (OpenAI, Gemini, Groq, DeepSeek, Ollama, llama.cpp, …)
//! speaks the OpenAI wire format and is handled by `OpenAiCompatibleProvider`.
//! Embeddings come either from an `/embeddings` endpoint or from the local
//! `HashingEmbedder`.

pub mod embeddings;
pub mod failover;
pub mod openai_compatible;
pub mod provider_registry;

pub use embeddings::{HashingEmbedder, OpenAiCompatibleEmbedder};
pub use failover::FailoverProvider;
pub use openai_compatible::OpenAiCompatibleProvider;

use clauserag_core::config::ClauseConfig;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::{Embedder, Provider};

/// Build one provider by name. `custom:<url>`, or `custom` with an
/// endpoint, targets an arbitrary OpenAI-compatible server.
fn build_provider(name: &str, api_keys: &[&str], endpoint: &str) -> Result<Box<dyn Provider>> {
    let key = api_keys.iter().find(|k| !k.is_empty()).copied().unwrap_or("");
    if name.starts_with("custom:") {
        return Ok(Box::new(openai_compatible::OpenAiCompatibleProvider::custom(name, key)));
    }
    if name == "custom" {
        if endpoint.is_empty() {
            return Err(ClauseError::Config(
                "provider \"custom\" needs an endpoint (or use \"custom:https://host/v1\")".into(),
            ));
        }
        return Ok(Box::new(openai_compatible::OpenAiCompatibleProvider::custom(endpoint, key)));
    }
    let registry = provider_registry::get_provider_config(name)
        .ok_or_else(|| ClauseError::ProviderNotFound(name.into()))?;
    Ok(Box::new(openai_compatible::OpenAiCompatibleProvider::from_registry(
        registry, api_keys, endpoint,
    )))
}

/// Create the chat provider from configuration.
///
/// API key resolution: `llm.api_key` > top-level `api_key` > provider env vars.
/// When `llm.fallbacks` is non-empty the result is a `FailoverProvider`.
pub fn create_provider(config: &ClauseConfig) -> Result<Box<dyn Provider>> {
    let llm = &config.llm;
    let primary = build_provider(
        &llm.provider,
        &[llm.api_key.as_str(), config.api_key.as_str()],
        &llm.endpoint,
    )?;

    if llm.fallbacks.is_empty() {
        return Ok(primary);
    }

    let mut chain = vec![(primary, None)];
    for fb in &llm.fallbacks {
        let provider = build_provider(&fb.provider, &[fb.api_key.as_str()], &fb.endpoint)?;
        chain.push((provider, Some(fb.model.clone())));
    }
    tracing::info!("LLM failover chain: {} provider(s)", chain.len());
    Ok(Box::new(failover::FailoverProvider::new(chain)?))
}

/// Create the embedder from configuration (`hashing` = local).
pub fn create_embedder(config: &ClauseConfig) -> Result<Box<dyn Embedder>> {
    let emb = &config.embedding;
    match emb.provider.as_str() {
        "hashing" | "local" => Ok(Box::new(embeddings::HashingEmbedder::new(emb.dimensions))),
        name => {
            let registry = provider_registry::get_provider_config(name)
                .ok_or_else(|| ClauseError::ProviderNotFound(name.into()))?;
            Ok(Box::new(embeddings::OpenAiCompatibleEmbedder::from_registry(
                registry,
                &emb.model,
                &[emb.api_key.as_str(), config.api_key.as_str()],
                &emb.endpoint,
                emb.dimensions,
            )?))
        }
    }
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}
