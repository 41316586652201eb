//! Provider failover: automatic fallback when the primary provider fails.
//!
//! Lightweight chain: try primary → fallback₁ → fallback₂.
//! A provider that failed `max_failures` times in a row is skipped until its
//! cool-down expires.

use async_trait::async_trait;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::provider::{GenerateParams, Provider};
use clauserag_core::types::{Message, ModelInfo, ProviderResponse};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-provider health tracking.
struct ProviderSlot {
    provider: Box<dyn Provider>,
    /// Model to request from this provider (fallbacks may use a different one).
    model: Option<String>,
    /// Consecutive failure count.
    failures: AtomicU32,
    /// Timestamp of last failure (unix secs, 0 = never failed).
    last_failure: AtomicU64,
    max_failures: u32,
    cooldown_secs: u64,
}

impl ProviderSlot {
    fn new(provider: Box<dyn Provider>, model: Option<String>) -> Self {
        Self {
            provider,
            model,
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            max_failures: 3,
            cooldown_secs: 60,
        }
    }

    fn is_healthy_at(&self, now: u64) -> bool {
        if self.failures.load(Ordering::Relaxed) < self.max_failures {
            return true;
        }
        now.saturating_sub(self.last_failure.load(Ordering::Relaxed)) > self.cooldown_secs
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy_at(now_secs())
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(now_secs(), Ordering::Relaxed);
    }
}

/// Failover provider: tries providers in order, skipping unhealthy ones.
pub struct FailoverProvider {
    slots: Vec<ProviderSlot>,
}

impl FailoverProvider {
    /// Create a failover chain. The first entry is primary; a `Some(model)`
    /// overrides the requested model for that entry.
    pub fn new(providers: Vec<(Box<dyn Provider>, Option<String>)>) -> Result<Self> {
        if providers.is_empty() {
            return Err(ClauseError::Config("failover chain needs at least one provider".into()));
        }
        Ok(Self {
            slots: providers
                .into_iter()
                .map(|(p, model)| ProviderSlot::new(p, model))
                .collect(),
        })
    }

    /// Number of providers in the chain.
    pub fn chain_len(&self) -> usize {
        self.slots.len()
    }

    /// Health status of all providers: (name, healthy, consecutive failures).
    pub fn health_status(&self) -> Vec<(&str, bool, u32)> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.provider.name(),
                    s.is_healthy(),
                    s.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[async_trait]
impl Provider for FailoverProvider {
    fn name(&self) -> &str {
        self.slots
            .first()
            .map(|s| s.provider.name())
            .unwrap_or("failover")
    }

    async fn chat(&self, messages: &[Message], params: &GenerateParams) -> Result<ProviderResponse> {
        let mut last_error = None;

        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.is_healthy() {
                tracing::debug!(
                    "Skipping unhealthy provider: {} ({} failures)",
                    slot.provider.name(),
                    slot.failures.load(Ordering::Relaxed)
                );
                continue;
            }

            let slot_params = match &slot.model {
                Some(model) => GenerateParams { model: model.clone(), ..params.clone() },
                None => params.clone(),
            };

            match slot.provider.chat(messages, &slot_params).await {
                Ok(response) => {
                    if idx > 0 {
                        tracing::info!(
                            "Failover: {} → {} (success)",
                            self.slots[0].provider.name(),
                            slot.provider.name()
                        );
                    }
                    slot.record_success();
                    return Ok(response);
                }
                Err(e) => {
                    slot.record_failure();
                    tracing::warn!(
                        "Provider {} failed (attempt {}): {}",
                        slot.provider.name(),
                        slot.failures.load(Ordering::Relaxed),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClauseError::Provider("All providers unhealthy".into())))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut all = Vec::new();
        for slot in &self.slots {
            if !slot.is_healthy() {
                continue;
            }
            if let Ok(models) = slot.provider.list_models().await {
                all.extend(models);
            }
        }
        Ok(all)
    }

    async fn health_check(&self) -> Result<bool> {
        for slot in &self.slots {
            if slot.is_healthy() && matches!(slot.provider.health_check().await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
