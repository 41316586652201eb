//! Ingestion: load → chunk → embed → store.

use clauserag_core::config::KnowledgeConfig;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::Embedder;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunker::Chunker;
use crate::loader::{self, LoadedDocument};
use crate::store::{KnowledgeStore, NewChunk, NewDocument};

/// Totals from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    /// Documents whose checksum was already stored.
    pub skipped: usize,
    pub pages: usize,
    pub chunks: usize,
}

pub struct Ingestor {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    extensions: Vec<String>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        config: &KnowledgeConfig,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap)?,
            extensions: config.extensions.clone(),
            batch_size: batch_size.max(1),
        })
    }

    /// Ingest every supported file under `dir`. With `rebuild` the store is
    /// replaced by the directory's contents, but only once every document has
    /// been loaded and embedded; any failure leaves the store as it was.
    pub async fn ingest_directory(&self, dir: &Path, rebuild: bool) -> Result<IngestReport> {
        let dir_owned: PathBuf = dir.to_path_buf();
        let extensions = self.extensions.clone();
        let docs = tokio::task::spawn_blocking(move || loader::load_directory(&dir_owned, &extensions))
            .await
            .map_err(|e| ClauseError::Ingest(format!("Loader task failed: {e}")))??;
        tracing::info!("Loaded {} document(s) from {}", docs.len(), dir.display());

        let mut report = IngestReport::default();
        if rebuild {
            let mut seen = HashSet::new();
            let mut prepared = Vec::with_capacity(docs.len());
            for doc in &docs {
                if !seen.insert(doc.checksum.as_str()) {
                    tracing::info!("Skipping {} (duplicate content)", doc.name);
                    report.skipped += 1;
                    continue;
                }
                let new_doc = self.prepare(doc).await?;
                report.documents += 1;
                report.pages += doc.pages.len();
                report.chunks += new_doc.chunks.len();
                prepared.push(new_doc);
            }
            tracing::info!("Replacing knowledge store contents ({} document(s))", prepared.len());
            self.store.replace_all(&prepared)?;
        } else {
            for doc in &docs {
                match self.ingest_document(doc).await? {
                    Some((pages, chunks)) => {
                        report.documents += 1;
                        report.pages += pages;
                        report.chunks += chunks;
                    }
                    None => report.skipped += 1,
                }
            }
        }
        tracing::info!(
            "Ingestion done: {} document(s), {} page(s), {} chunk(s), {} skipped",
            report.documents,
            report.pages,
            report.chunks,
            report.skipped
        );
        Ok(report)
    }

    /// Store one uploaded text document.
    pub async fn ingest_text(&self, name: &str, source: &str, content: &str) -> Result<IngestReport> {
        if content.trim().is_empty() {
            return Err(ClauseError::InvalidInput("Document content is empty".into()));
        }
        let mut doc = LoadedDocument::from_text(name, content);
        doc.path = PathBuf::from(source);
        Ok(match self.ingest_document(&doc).await? {
            Some((pages, chunks)) => IngestReport { documents: 1, skipped: 0, pages, chunks },
            None => IngestReport { skipped: 1, ..IngestReport::default() },
        })
    }

    /// Chunk, embed and store a loaded document. `None` when its checksum
    /// is already present. Returns `(pages, chunks)` otherwise.
    pub async fn ingest_document(&self, doc: &LoadedDocument) -> Result<Option<(usize, usize)>> {
        if self.store.has_checksum(&doc.checksum)? {
            tracing::info!("Skipping {} (already ingested)", doc.name);
            return Ok(None);
        }

        let new_doc = self.prepare(doc).await?;
        self.store.insert_document(
            &new_doc.name,
            &new_doc.source,
            &new_doc.checksum,
            new_doc.pages,
            &new_doc.chunks,
        )?;
        tracing::debug!("Stored {} with {} chunk(s)", doc.name, new_doc.chunks.len());
        Ok(Some((doc.pages.len(), new_doc.chunks.len())))
    }

    /// Chunk and embed a document without touching the store.
    async fn prepare(&self, doc: &LoadedDocument) -> Result<NewDocument> {
        let mut pieces: Vec<(Option<u32>, String)> = Vec::new();
        for page in &doc.pages {
            for chunk in self.chunker.split(&page.text) {
                pieces.push((page.page, chunk));
            }
        }
        if pieces.is_empty() {
            tracing::warn!("{} has no extractable text", doc.name);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(ClauseError::Embedding(format!(
                    "{} returned {} vectors for {} texts",
                    self.embedder.name(),
                    vectors.len(),
                    texts.len()
                )));
            }
            chunks.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|((page, content), embedding)| NewChunk { page: *page, content: content.clone(), embedding }),
            );
        }

        Ok(NewDocument {
            name: doc.name.clone(),
            source: doc.path.display().to_string(),
            checksum: doc.checksum.clone(),
            pages: doc.pages.iter().filter_map(|p| p.page).max().unwrap_or(1),
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clauserag_providers::HashingEmbedder;

    fn ingestor(chunk_size: usize, overlap: usize) -> Ingestor {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let cfg = KnowledgeConfig {
            chunk_size,
            chunk_overlap: overlap,
            ..KnowledgeConfig::default()
        };
        Ingestor::new(store, Arc::new(HashingEmbedder::new(32)), &cfg, 2).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_text_and_skip_duplicate() {
        let ing = ingestor(40, 5);
        let body = "Section 1. Hospitalisation is covered.\n\nSection 2. Dental care is excluded.\n\nSection 3. Claims within 30 days.";
        let first = ing.ingest_text("policy.txt", "uploads/policy.txt", body).await.unwrap();
        assert_eq!(first.documents, 1);
        assert_eq!(first.pages, 1);
        assert!(first.chunks >= 3);

        let second = ing.ingest_text("copy.txt", "uploads/copy.txt", body).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.documents, 0);

        let (docs, chunks) = ing.store.stats();
        assert_eq!(docs, 1);
        assert_eq!(chunks, first.chunks);
    }

    #[tokio::test]
    async fn test_ingest_text_rejects_empty() {
        let ing = ingestor(100, 10);
        let err = ing.ingest_text("blank.txt", "blank.txt", "   ").await.unwrap_err();
        assert!(matches!(err, ClauseError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_ingest_directory_rebuild() {
        let dir = std::env::temp_dir().join(format!("clauserag-ingest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), "Room rent is capped at one percent of the sum insured.").unwrap();
        std::fs::write(dir.join("b.md"), "Ambulance charges up to 2000 are payable.").unwrap();

        let ing = ingestor(200, 20);
        let report = ing.ingest_directory(&dir, true).await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.skipped, 0);

        // append run: everything already present
        let again = ing.ingest_directory(&dir, false).await.unwrap();
        assert_eq!(again.skipped, 2);

        // rebuild run: store cleared, everything ingested again
        let rebuilt = ing.ingest_directory(&dir, true).await.unwrap();
        assert_eq!(rebuilt.documents, 2);
        assert_eq!(ing.store.stats().0, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    struct BrokenEmbedder;

    #[async_trait::async_trait]
    impl Embedder for BrokenEmbedder {
        fn name(&self) -> &str {
            "broken"
        }
        fn dimensions(&self) -> usize {
            32
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(ClauseError::Embedding("service unavailable".into()))
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("clauserag-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_existing_documents() {
        let ing = ingestor(200, 20);
        ing.ingest_text("policy.txt", "policy.txt", "Cataract surgery is covered after one year.")
            .await
            .unwrap();

        let empty = temp_dir("empty-rebuild");
        let err = ing.ingest_directory(&empty, true).await.unwrap_err();
        assert!(err.to_string().contains("No documents found"));
        assert_eq!(ing.store.stats(), (1, 1));
        std::fs::remove_dir_all(&empty).ok();
    }

    #[tokio::test]
    async fn test_rebuild_with_failing_embedder_keeps_store() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let good = Ingestor::new(store.clone(), Arc::new(HashingEmbedder::new(32)), &KnowledgeConfig::default(), 4)
            .unwrap();
        good.ingest_text("old.txt", "old.txt", "Maternity cover starts after nine months.")
            .await
            .unwrap();

        let dir = temp_dir("broken-rebuild");
        std::fs::write(dir.join("new.txt"), "Ambulance charges up to 2000 are payable.").unwrap();
        let broken = Ingestor::new(store.clone(), Arc::new(BrokenEmbedder), &KnowledgeConfig::default(), 4).unwrap();
        assert!(broken.ingest_directory(&dir, true).await.is_err());
        assert_eq!(store.stats().0, 1);
        assert_eq!(store.list_documents().unwrap()[0].name, "old.txt");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_rebuild_skips_duplicate_content() {
        let dir = temp_dir("dup-rebuild");
        std::fs::write(dir.join("a.txt"), "Day-care procedures are covered.").unwrap();
        std::fs::write(dir.join("copy.txt"), "Day-care procedures are covered.").unwrap();
        let ing = ingestor(200, 20);
        let report = ing.ingest_directory(&dir, true).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(ing.store.stats().0, 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
