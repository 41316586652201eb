//! Semantic, keyword and hybrid ranking over stored chunks.
//!
//! Every score is a distance: lower is better. Semantic scores are L2
//! distances between unit vectors (0..=2); keyword scores are
//! `1 / (overlap + 1)` where `overlap` is the number of shared words.

use clauserag_core::types::SourceRef;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::store::StoredChunk;

/// Number of leading characters used to detect duplicate chunks.
const DEDUP_PREFIX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Semantic,
    Keyword,
    FullText,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub doc_name: String,
    pub source: String,
    pub page: Option<u32>,
    pub chunk_idx: usize,
    pub content: String,
    pub score: f32,
    pub kind: MatchKind,
}

impl SearchResult {
    pub fn from_chunk(chunk: &StoredChunk, score: f32, kind: MatchKind) -> Self {
        Self {
            chunk_id: chunk.id,
            doc_name: chunk.doc_name.clone(),
            source: chunk.source.clone(),
            page: chunk.page,
            chunk_idx: chunk.chunk_idx,
            content: chunk.content.clone(),
            score,
            kind,
        }
    }

    /// Citation form: file basename + page.
    pub fn source_ref(&self) -> SourceRef {
        let base = Path::new(&self.source)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source.clone());
        SourceRef { source: base, page: self.page }
    }

    fn dedup_key(&self) -> String {
        self.content.chars().take(DEDUP_PREFIX_CHARS).collect()
    }
}

/// Euclidean distance; vectors of different length never match.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Nearest `k` chunks by L2 distance to `query_vec`.
pub fn semantic_search(chunks: &[StoredChunk], query_vec: &[f32], k: usize) -> Vec<SearchResult> {
    let mut scored: Vec<SearchResult> = chunks
        .iter()
        .map(|c| SearchResult::from_chunk(c, l2_distance(&c.embedding, query_vec), MatchKind::Semantic))
        .collect();
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));
    scored.truncate(k);
    scored
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(String::from).collect()
}

/// Every chunk sharing at least one lowercase whitespace-delimited word with the query.
pub fn keyword_matches(chunks: &[StoredChunk], query: &str) -> Vec<SearchResult> {
    let query_words = word_set(query);
    if query_words.is_empty() {
        return vec![];
    }
    chunks
        .iter()
        .filter_map(|c| {
            let overlap = word_set(&c.content).intersection(&query_words).count();
            (overlap > 0).then(|| {
                SearchResult::from_chunk(c, 1.0 / (overlap as f32 + 1.0), MatchKind::Keyword)
            })
        })
        .collect()
}

/// Drop later duplicates (same leading content), sort ascending, keep `k`.
/// The sort is stable, so ties keep their input order.
pub fn dedupe_and_rank(results: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut unique: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .collect();
    unique.sort_by(|a, b| a.score.total_cmp(&b.score));
    unique.truncate(k);
    unique
}

/// Semantic results followed by keyword matches, deduplicated and ranked.
/// Without a query vector only the keyword half runs.
pub fn hybrid_search(
    chunks: &[StoredChunk],
    query_vec: Option<&[f32]>,
    query: &str,
    k: usize,
) -> Vec<SearchResult> {
    let mut all = match query_vec {
        Some(v) => semantic_search(chunks, v, k),
        None => vec![],
    };
    all.extend(keyword_matches(chunks, query));
    dedupe_and_rank(all, k)
}
