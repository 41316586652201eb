//! Unified OpenAI-compatible provider.
//!
//! A single struct that handles chat completions for ALL OpenAI-compatible APIs.
//! Different providers are distinguished only by endpoint URL, auth style, and API key.
//! Messages carrying images are sent as multi-part content (`text` + `image_url`).

use async_trait::async_trait;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::provider::{GenerateParams, Provider};
use clauserag_core::types::{Message, ModelInfo, ProviderResponse, Usage};
use serde_json::{Value, json};

use crate::provider_registry::{AuthStyle, ProviderConfig};

/// Appended to the text of a message whose image had to be dropped.
const IMAGE_DROPPED_NOTE: &str = "[The user also shared an image, but this model cannot view images]";

/// A unified provider that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleProvider {
    /// Provider name (e.g., "openai", "gemini", "ollama").
    name: String,
    /// API key for authentication.
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    /// Path for chat completions (e.g., "/chat/completions").
    chat_path: String,
    /// Path for listing models (e.g., "/models").
    models_path: String,
    /// Authentication style.
    auth_style: AuthStyle,
    /// Default models to return from `list_models`.
    default_models: Vec<ModelInfo>,
    /// HTTP client.
    client: reqwest::Client,
}

/// Resolve an API key: first non-empty explicit candidate, then registry env vars.
pub fn resolve_api_key(registry: &ProviderConfig, explicit: &[&str]) -> String {
    explicit
        .iter()
        .find(|k| !k.is_empty())
        .map(|k| k.to_string())
        .unwrap_or_else(|| {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
                .unwrap_or_default()
        })
}

/// Resolve a base URL: explicit endpoint > env override > registry default.
pub fn resolve_base_url(registry: &ProviderConfig, endpoint: &str) -> String {
    if !endpoint.is_empty() {
        return endpoint.trim_end_matches('/').to_string();
    }
    registry
        .base_url_env
        .and_then(|env_key| {
            let val = std::env::var(env_key).ok()?;
            // OLLAMA_HOST / LLAMACPP_HOST are usually given without /v1
            if val.ends_with("/v1") {
                Some(val)
            } else {
                Some(format!("{}/v1", val.trim_end_matches('/')))
            }
        })
        .unwrap_or_else(|| registry.base_url.to_string())
}

impl OpenAiCompatibleProvider {
    /// Create from a known provider config.
    ///
    /// `api_keys` are tried in order before the registry's env vars;
    /// `endpoint` overrides the base URL when non-empty.
    pub fn from_registry(registry: &ProviderConfig, api_keys: &[&str], endpoint: &str) -> Self {
        let default_models = registry
            .default_models
            .iter()
            .map(|m| m.to_model_info(registry.name))
            .collect();

        Self {
            name: registry.name.to_string(),
            api_key: resolve_api_key(registry, api_keys),
            base_url: resolve_base_url(registry, endpoint),
            chat_path: registry.chat_path.to_string(),
            models_path: registry.models_path.to_string(),
            auth_style: registry.auth_style,
            default_models,
            client: reqwest::Client::new(),
        }
    }

    /// Create for a custom endpoint (e.g., "custom:https://my-server.com/v1").
    pub fn custom(endpoint: &str, api_key: &str) -> Self {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();

        let api_key = if !api_key.is_empty() {
            api_key.to_string()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };

        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            models_path: "/models".to_string(),
            auth_style,
            default_models: vec![],
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the auth header for the request.
    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    async fn post_chat(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        self.apply_auth(req).send().await.map_err(|e| {
            ClauseError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })
    }
}

/// Encode one message in OpenAI wire format.
pub fn message_to_json(msg: &Message) -> Value {
    if msg.images.is_empty() {
        return json!({ "role": msg.role, "content": msg.content });
    }
    let mut parts = vec![json!({ "type": "text", "text": msg.content })];
    parts.extend(
        msg.images
            .iter()
            .map(|img| json!({ "type": "image_url", "image_url": { "url": img.data_url() } })),
    );
    json!({ "role": msg.role, "content": parts })
}

/// Encode messages with every image replaced by a text note.
fn messages_without_images(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|m| {
                if m.images.is_empty() {
                    message_to_json(m)
                } else {
                    json!({ "role": m.role, "content": format!("{}\n{}", m.content, IMAGE_DROPPED_NOTE) })
                }
            })
            .collect(),
    )
}

/// True when an HTTP 400 body says the model rejected image input.
fn rejects_images(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("image")
        && (lower.contains("not support")
            || lower.contains("unsupported")
            || lower.contains("does not accept")
            || lower.contains("invalid content type"))
}

/// Parse a standard OpenAI chat completion body.
pub fn parse_chat_response(json: &Value) -> Result<ProviderResponse> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| ClauseError::Provider("No choices in response".into()))?;

    let content = choice["message"]["content"].as_str().map(String::from);

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ProviderResponse {
        content,
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(ClauseError::ApiKeyMissing(self.name.clone()));
        }

        let mut body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": messages.iter().map(message_to_json).collect::<Vec<_>>(),
        });
        let has_images = messages.iter().any(|m| !m.images.is_empty());

        let url = format!("{}{}", self.base_url, self.chat_path);
        let resp = self.post_chat(&url, &body).await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();

            // Text-only models reject image parts; retry once without them.
            if status.as_u16() == 400 && has_images && rejects_images(&text) {
                tracing::warn!(
                    "Model '{}' rejected image input, retrying text-only",
                    params.model
                );
                body["messages"] = messages_without_images(messages);
                let retry = self.post_chat(&url, &body).await?;
                if !retry.status().is_success() {
                    let rs = retry.status();
                    let rt = retry.text().await.unwrap_or_default();
                    return Err(ClauseError::Provider(format!(
                        "{} API error {} (retry without images): {}",
                        self.name, rs, rt
                    )));
                }
                let json: Value = retry
                    .json()
                    .await
                    .map_err(|e| ClauseError::Http(e.to_string()))?;
                return parse_chat_response(&json);
            }

            return Err(ClauseError::Provider(format!(
                "{} API error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ClauseError::Http(e.to_string()))?;
        let response = parse_chat_response(&json)?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                "{} usage: prompt={} completion={}",
                self.name,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}{}", self.base_url, self.models_path);
        let req = self.apply_auth(self.client.get(&url));

        match req.send().await {
            Ok(r) if r.status().is_success() => {
                let json: Value = r.json().await.unwrap_or_default();
                let models: Vec<ModelInfo> = json["data"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|m| {
                                Some(ModelInfo {
                                    id: m["id"].as_str()?.to_string(),
                                    name: m["id"].as_str()?.to_string(),
                                    provider: self.name.clone(),
                                    context_length: 4096,
                                    max_output_tokens: Some(4096),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if models.is_empty() {
                    Ok(self.default_models.clone())
                } else {
                    Ok(models)
                }
            }
            _ => Ok(self.default_models.clone()),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        if self.auth_style != AuthStyle::None {
            // Cloud providers: a key is all we can check without spending tokens
            return Ok(!self.api_key.is_empty());
        }

        let url = format!("{}{}", self.base_url, self.models_path);
        let resp = self.client.get(&url).send().await;
        Ok(resp.is_ok())
    }
}
