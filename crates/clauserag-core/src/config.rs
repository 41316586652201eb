//! ClauseRAG configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ClauseError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseConfig {
    /// Global API key, used when `[llm].api_key` is empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for ClauseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            knowledge: KnowledgeConfig::default(),
            assistant: AssistantConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ClauseConfig {
    /// Load config from `CLAUSERAG_CONFIG` or the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_path(None);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClauseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ClauseError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClauseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Explicit path > `CLAUSERAG_CONFIG` > `~/.clauserag/config.toml`.
    pub fn resolve_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return expand_path(p);
        }
        std::env::var("CLAUSERAG_CONFIG")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ClauseRAG home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clauserag")
    }

    /// Reject settings the retrieval pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let k = &self.knowledge;
        if k.chunk_size == 0 {
            return Err(ClauseError::Config("knowledge.chunk_size must be > 0".into()));
        }
        if k.chunk_overlap >= k.chunk_size {
            return Err(ClauseError::Config(format!(
                "knowledge.chunk_overlap ({}) must be smaller than chunk_size ({})",
                k.chunk_overlap, k.chunk_size
            )));
        }
        if k.top_k == 0 {
            return Err(ClauseError::Config("knowledge.top_k must be > 0".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ClauseError::Config("embedding.dimensions must be > 0".into()));
        }
        if !matches!(self.assistant.mode.as_str(), "policy" | "education") {
            return Err(ClauseError::Config(format!(
                "assistant.mode must be 'policy' or 'education', got '{}'",
                self.assistant.mode
            )));
        }
        if self.assistant.context_keep_chars > self.assistant.context_char_limit {
            return Err(ClauseError::Config(
                "assistant.context_keep_chars must not exceed context_char_limit".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn bool_true() -> bool { true }

/// Chat model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the registry base URL.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Providers tried in order when the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfig>,
}

fn default_llm_provider() -> String { "gemini".into() }
fn default_llm_model() -> String { "gemini-2.5-flash".into() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 2048 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            fallbacks: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `hashing` (local, offline) or any registry provider name.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String { "hashing".into() }
fn default_embedding_model() -> String { "all-MiniLM-L6-v2".into() }
fn default_dimensions() -> usize { 384 }
fn default_batch_size() -> usize { 32 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: String::new(),
            endpoint: String::new(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
        }
    }
}

/// Document store and retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_expansion_k")]
    pub expansion_k: usize,
    /// Best score above which the expanded query is also searched.
    #[serde(default = "default_expansion_trigger")]
    pub expansion_trigger: f32,
    /// Results scoring at or above this are dropped.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// How many results to keep when none pass the threshold.
    #[serde(default = "default_fallback_count")]
    pub fallback_count: usize,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_synonyms")]
    pub synonyms: BTreeMap<String, Vec<String>>,
}

fn default_data_dir() -> String { "~/.clauserag/data".into() }
fn default_db_path() -> String { "~/.clauserag/knowledge.db".into() }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 100 }
fn default_top_k() -> usize { 5 }
fn default_expansion_k() -> usize { 3 }
fn default_expansion_trigger() -> f32 { 1.0 }
fn default_similarity_threshold() -> f32 { 1.2 }
fn default_fallback_count() -> usize { 3 }
fn default_extensions() -> Vec<String> {
    vec!["pdf", "txt", "md"].into_iter().map(String::from).collect()
}

/// Query expansion table shipped with the textbook assistant.
pub fn default_synonyms() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("chapters", &["topics", "sections", "units"]),
        ("physics", &["physical science", "mechanics", "motion"]),
        ("energy", &["power", "force", "work"]),
        ("conservation", &["preservation", "constant"]),
        ("law", &["principle", "rule", "theorem"]),
        ("motion", &["movement", "kinematics"]),
        ("electricity", &["electric", "electrical", "current"]),
        ("magnetism", &["magnetic", "magnet"]),
        ("light", &["optics", "optical", "rays"]),
        ("waves", &["wave", "vibration", "oscillation"]),
    ];
    table
        .iter()
        .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
        .collect()
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            expansion_k: default_expansion_k(),
            expansion_trigger: default_expansion_trigger(),
            similarity_threshold: default_similarity_threshold(),
            fallback_count: default_fallback_count(),
            extensions: default_extensions(),
            synonyms: default_synonyms(),
        }
    }
}

/// Answering behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// `policy` or `education`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default = "default_context_char_limit")]
    pub context_char_limit: usize,
    #[serde(default = "default_context_keep_chars")]
    pub context_keep_chars: usize,
    /// Default response language code.
    #[serde(default = "default_language")]
    pub language: String,
    /// Attach a parsed decision object to policy answers.
    #[serde(default = "bool_true")]
    pub structured_decisions: bool,
    /// Chat sessions idle longer than this are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_mode() -> String { "policy".into() }
fn default_history_messages() -> usize { 6 }
fn default_context_char_limit() -> usize { 2000 }
fn default_context_keep_chars() -> usize { 1000 }
fn default_language() -> String { "en".into() }
fn default_session_idle_secs() -> u64 { 3600 }
fn default_max_sessions() -> usize { 1000 }

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            history_messages: default_history_messages(),
            context_char_limit: default_context_char_limit(),
            context_keep_chars: default_context_keep_chars(),
            language: default_language(),
            structured_decisions: true,
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub require_pairing: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 { 5000 }
fn default_host() -> String { "127.0.0.1".into() }
fn default_max_body_bytes() -> usize { 10 * 1024 * 1024 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            require_pairing: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClauseConfig::default();
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert!((config.llm.temperature - 0.3).abs() < 0.01);
        assert_eq!(config.knowledge.chunk_size, 1000);
        assert_eq!(config.knowledge.chunk_overlap, 100);
        assert_eq!(config.gateway.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [llm]
            provider = "ollama"
            model = "llama3.2"

            [assistant]
            mode = "education"
            language = "hi"

            [knowledge]
            top_k = 8
        "#;

        let config: ClauseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.assistant.mode, "education");
        assert_eq!(config.assistant.language, "hi");
        assert_eq!(config.knowledge.top_k, 8);
        assert_eq!(config.knowledge.expansion_k, 3);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: ClauseConfig = toml::from_str("").unwrap();
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.embedding.dimensions, 384);
        assert!((config.knowledge.similarity_threshold - 1.2).abs() < f32::EPSILON);
        assert_eq!(config.knowledge.synonyms.len(), 10);
        assert_eq!(config.assistant.session_idle_secs, 3600);
        assert_eq!(config.assistant.max_sessions, 1000);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut config = ClauseConfig::default();
        config.knowledge.chunk_overlap = config.knowledge.chunk_size;
        assert!(matches!(config.validate(), Err(ClauseError::Config(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("clauserag-config-test-{}", std::process::id()))
            .join("config.toml");
        let mut config = ClauseConfig::default();
        config.llm.model = "gpt-4o-mini".into();
        config.save_to(&path).unwrap();
        let loaded = ClauseConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.model, "gpt-4o-mini");
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = ClauseConfig::home_dir();
        assert!(home.to_string_lossy().contains("clauserag"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let p = ClauseConfig::resolve_path(Some("/tmp/custom.toml"));
        assert_eq!(p, PathBuf::from("/tmp/custom.toml"));
    }
}
