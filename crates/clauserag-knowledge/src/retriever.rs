//! Retrieval pipeline: hybrid search, conditional query expansion,
//! threshold filtering, context and source assembly.

use clauserag_core::config::KnowledgeConfig;
use clauserag_core::error::Result;
use clauserag_core::traits::Embedder;
use clauserag_core::types::SourceRef;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::query::preprocess_query;
use crate::search::{MatchKind, SearchResult, dedupe_and_rank, hybrid_search, semantic_search};
use crate::store::KnowledgeStore;

/// Tunables lifted from `[knowledge]`.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub expansion_k: usize,
    pub expansion_trigger: f32,
    pub similarity_threshold: f32,
    pub fallback_count: usize,
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl From<&KnowledgeConfig> for RetrievalSettings {
    fn from(cfg: &KnowledgeConfig) -> Self {
        Self {
            top_k: cfg.top_k,
            expansion_k: cfg.expansion_k,
            expansion_trigger: cfg.expansion_trigger,
            similarity_threshold: cfg.similarity_threshold,
            fallback_count: cfg.fallback_count,
            synonyms: cfg.synonyms.clone(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from(&KnowledgeConfig::default())
    }
}

/// Outcome of one retrieval.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub results: Vec<SearchResult>,
    /// Prompt-ready context block.
    pub context: String,
    pub sources: Vec<SourceRef>,
    /// Whether the synonym-expanded query was searched too.
    pub expanded: bool,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// `"Source {i} ({source}, Page {page}):\n{content}"` blocks separated by blank lines.
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let src = r.source_ref();
            format!("Source {} ({}, Page {}):\n{}", i + 1, src.source, src.page_label(), r.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Basename + page per result, first occurrence wins.
pub fn collect_sources(results: &[SearchResult]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for r in results {
        let src = r.source_ref();
        if !sources.contains(&src) {
            sources.push(src);
        }
    }
    sources
}

pub struct Retriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Self {
        Self { store, embedder, settings }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Hybrid search for `k` results. When the query cannot be embedded the
    /// keyword half still runs.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let chunks = self.store.all_chunks()?;
        if chunks.is_empty() {
            return Ok(vec![]);
        }
        let query_vec = match self.embedder.embed_query(query).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Query embedding failed, using keyword search only: {e}");
                None
            }
        };
        Ok(hybrid_search(&chunks, query_vec.as_deref(), query, k))
    }

    /// Pure vector search, as used by the single-shot `/ask` path.
    pub async fn semantic(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let chunks = self.store.all_chunks()?;
        if chunks.is_empty() {
            return Ok(vec![]);
        }
        let query_vec = self.embedder.embed_query(query).await?;
        Ok(semantic_search(&chunks, &query_vec, k))
    }

    /// BM25 search over the FTS5 index.
    pub fn full_text(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        Ok(self
            .store
            .fts_search(query, k)?
            .iter()
            .map(|(chunk, score)| SearchResult::from_chunk(chunk, *score, MatchKind::FullText))
            .collect())
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let s = &self.settings;
        let mut results = self.search(query, s.top_k).await?;
        if results.is_empty() {
            tracing::debug!("No chunks matched '{query}'");
            return Ok(Retrieval::default());
        }

        let mut expanded = false;
        if results[0].score > s.expansion_trigger {
            let processed = preprocess_query(query, &s.synonyms);
            if !processed.expanded.is_empty() {
                let extra = self.search(&processed.expanded, s.expansion_k).await?;
                tracing::debug!(
                    "Best score {:.3} > {:.3}, expanded query added {} result(s)",
                    results[0].score,
                    s.expansion_trigger,
                    extra.len()
                );
                results.extend(extra);
                results = dedupe_and_rank(results, s.top_k);
                expanded = true;
            }
        }

        let relevant: Vec<SearchResult> = results
            .iter()
            .filter(|r| r.score < s.similarity_threshold)
            .cloned()
            .collect();
        let results = if relevant.is_empty() {
            results.into_iter().take(s.fallback_count).collect()
        } else {
            relevant
        };

        Ok(Retrieval {
            context: format_context(&results),
            sources: collect_sources(&results),
            results,
            expanded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewChunk;
    use async_trait::async_trait;
    use clauserag_core::error::ClauseError;
    use clauserag_providers::HashingEmbedder;

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn name(&self) -> &str {
            "broken"
        }
        fn dimensions(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(ClauseError::Embedding("service unavailable".into()))
        }
    }

    async fn seeded() -> Arc<KnowledgeStore> {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let hashing = HashingEmbedder::new(64);
        let texts = [
            (Some(3), "Knee surgery is covered after a waiting period of 24 months."),
            (Some(7), "Cosmetic procedures are excluded from coverage."),
            (None, "Energy is conserved in an isolated system."),
        ];
        let contents: Vec<String> = texts.iter().map(|(_, t)| t.to_string()).collect();
        let vectors = hashing.embed(&contents).await.unwrap();
        let chunks: Vec<NewChunk> = texts
            .iter()
            .zip(vectors)
            .map(|((page, t), v)| NewChunk { page: *page, content: t.to_string(), embedding: v })
            .collect();
        store
            .insert_document("policy.pdf", "/data/policies/policy.pdf", "abc", 7, &chunks)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_retrieval() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let r = Retriever::new(store, Arc::new(HashingEmbedder::new(64)), RetrievalSettings::default());
        let out = r.retrieve("anything").await.unwrap();
        assert!(out.is_empty());
        assert!(out.context.is_empty());
        assert!(out.sources.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_builds_context_and_sources() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = seeded().await;
        let r = Retriever::new(store, embedder, RetrievalSettings::default());
        let out = r.retrieve("Is knee surgery covered?").await.unwrap();
        assert!(!out.is_empty());
        assert!(out.context.starts_with("Source 1 (policy.pdf, Page "));
        assert!(out.context.contains("Knee surgery"));
        assert!(out.sources.iter().all(|s| s.source == "policy.pdf"));
        // sources are unique
        let mut dedup = out.sources.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), out.sources.len());
    }

    #[tokio::test]
    async fn test_threshold_fallback_keeps_top_results() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = seeded().await;
        let settings = RetrievalSettings {
            similarity_threshold: -1.0,
            fallback_count: 2,
            ..RetrievalSettings::default()
        };
        let r = Retriever::new(store, embedder, settings);
        let out = r.retrieve("coverage").await.unwrap();
        assert_eq!(out.results.len(), 2);
    }

    #[tokio::test]
    async fn test_expansion_runs_when_best_score_is_weak() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = seeded().await;
        let settings = RetrievalSettings { expansion_trigger: -1.0, ..RetrievalSettings::default() };
        let r = Retriever::new(store, embedder, settings);
        let out = r.retrieve("energy").await.unwrap();
        assert!(out.expanded);
        assert!(out.results.len() <= 5);
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_keywords() {
        let broken: Arc<dyn Embedder> = Arc::new(BrokenEmbedder);
        let store = seeded().await;
        let r = Retriever::new(store, broken, RetrievalSettings::default());
        let out = r.retrieve("cosmetic procedures").await.unwrap();
        assert!(out.results.iter().all(|h| h.kind == MatchKind::Keyword));
        assert!(out.context.contains("Cosmetic"));
    }

    #[tokio::test]
    async fn test_full_text_search() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store = seeded().await;
        let r = Retriever::new(store, embedder, RetrievalSettings::default());
        let hits = r.full_text("waiting period", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page, Some(3));
        assert_eq!(hits[0].kind, MatchKind::FullText);
    }

    #[test]
    fn test_format_context_page_label() {
        let chunk = crate::store::StoredChunk {
            id: 1,
            doc_id: 1,
            doc_name: "notes.txt".into(),
            source: "/data/notes.txt".into(),
            chunk_idx: 0,
            page: None,
            content: "Newton's first law.".into(),
            embedding: vec![],
        };
        let results = vec![SearchResult::from_chunk(&chunk, 0.5, MatchKind::Semantic)];
        assert_eq!(format_context(&results), "Source 1 (notes.txt, Page N/A):\nNewton's first law.");
    }
}
