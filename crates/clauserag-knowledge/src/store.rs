//! SQLite knowledge store: documents, chunk embeddings and an FTS5 index.

use clauserag_core::error::{ClauseError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

fn kb_err(e: rusqlite::Error) -> ClauseError {
    ClauseError::Knowledge(e.to_string())
}

/// A chunk ready to be stored.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub page: Option<u32>,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A document with its embedded chunks, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub source: String,
    pub checksum: String,
    pub pages: u32,
    pub chunks: Vec<NewChunk>,
}

fn insert_in(
    tx: &rusqlite::Transaction<'_>,
    name: &str,
    source: &str,
    checksum: &str,
    pages: u32,
    chunks: &[NewChunk],
) -> Result<i64> {
    tx.execute(
        "INSERT INTO documents (name, source, checksum, pages, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![name, source, checksum, pages, chrono::Utc::now().to_rfc3339()],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            ClauseError::Knowledge(format!("Document already ingested: {name}"))
        }
        other => kb_err(other),
    })?;
    let doc_id = tx.last_insert_rowid();

    for (idx, chunk) in chunks.iter().enumerate() {
        tx.execute(
            "INSERT INTO chunks (doc_id, chunk_idx, page, content, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc_id, idx as i64, chunk.page, chunk.content, encode_embedding(&chunk.embedding)],
        )
        .map_err(kb_err)?;
        let chunk_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO chunks_fts (rowid, content) VALUES (?1, ?2)",
            params![chunk_id, chunk.content],
        )
        .map_err(kb_err)?;
    }
    Ok(doc_id)
}

/// A chunk read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: i64,
    pub doc_id: i64,
    pub doc_name: String,
    pub source: String,
    pub chunk_idx: usize,
    pub page: Option<u32>,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Document listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub pages: u32,
    pub chunks: usize,
    pub created_at: String,
}

pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl KnowledgeStore {
    /// Open (or create) a store at `path`. `":memory:"` opens a private in-memory DB.
    pub fn open(path: &Path) -> Result<Self> {
        if path != Path::new(":memory:") {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path).map_err(kb_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(kb_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                source TEXT NOT NULL,
                checksum TEXT NOT NULL UNIQUE,
                pages INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_idx INTEGER NOT NULL,
                page INTEGER,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
             CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content,
                tokenize='unicode61'
             );",
        )
        .map_err(kb_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ClauseError::Knowledge(format!("store lock poisoned: {e}")))
    }

    /// Whether a document with this content checksum is already stored.
    pub fn has_checksum(&self, checksum: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM documents WHERE checksum = ?1",
                params![checksum],
                |r| r.get(0),
            )
            .optional()
            .map_err(kb_err)?;
        Ok(found.is_some())
    }

    /// Insert a document and its chunks atomically. Returns the document id.
    pub fn insert_document(
        &self,
        name: &str,
        source: &str,
        checksum: &str,
        pages: u32,
        chunks: &[NewChunk],
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(kb_err)?;
        let doc_id = insert_in(&tx, name, source, checksum, pages, chunks)?;
        tx.commit().map_err(kb_err)?;
        Ok(doc_id)
    }

    /// Replace the whole store with `docs` in one transaction. On error the
    /// previous contents are untouched.
    pub fn replace_all(&self, docs: &[NewDocument]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(kb_err)?;
        tx.execute_batch("DELETE FROM chunks_fts; DELETE FROM chunks; DELETE FROM documents;")
            .map_err(kb_err)?;
        for doc in docs {
            insert_in(&tx, &doc.name, &doc.source, &doc.checksum, doc.pages, &doc.chunks)?;
        }
        tx.commit().map_err(kb_err)
    }

    /// Remove a document, its chunks and their index entries.
    pub fn remove_document(&self, id: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(kb_err)?;
        tx.execute(
            "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE doc_id = ?1)",
            params![id],
        )
        .map_err(kb_err)?;
        tx.execute("DELETE FROM chunks WHERE doc_id = ?1", params![id])
            .map_err(kb_err)?;
        let removed = tx
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(kb_err)?;
        if removed == 0 {
            return Err(ClauseError::Knowledge(format!("Document {id} not found")));
        }
        tx.commit().map_err(kb_err)?;
        Ok(())
    }

    /// Drop everything.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "DELETE FROM chunks_fts; DELETE FROM chunks; DELETE FROM documents;",
        )
        .map_err(kb_err)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT d.id, d.name, d.source, d.pages, d.created_at,
                        (SELECT COUNT(*) FROM chunks c WHERE c.doc_id = d.id)
                 FROM documents d ORDER BY d.id",
            )
            .map_err(kb_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DocumentInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    source: row.get(2)?,
                    pages: row.get(3)?,
                    created_at: row.get(4)?,
                    chunks: row.get::<_, i64>(5)? as usize,
                })
            })
            .map_err(kb_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(kb_err)
    }

    /// (documents, chunks). Zeros when the store cannot be read.
    pub fn stats(&self) -> (usize, usize) {
        let Ok(conn) = self.lock() else {
            return (0, 0);
        };
        let count = |sql: &str| {
            conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                .unwrap_or(0) as usize
        };
        (
            count("SELECT COUNT(*) FROM documents"),
            count("SELECT COUNT(*) FROM chunks"),
        )
    }

    /// Every chunk with its embedding, in insertion order.
    pub fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.doc_id, d.name, d.source, c.chunk_idx, c.page, c.content, c.embedding
                 FROM chunks c JOIN documents d ON d.id = c.doc_id
                 ORDER BY c.id",
            )
            .map_err(kb_err)?;
        let rows = stmt.query_map([], row_to_chunk).map_err(kb_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(kb_err)
    }

    /// BM25 full-text search. Terms are OR-ed; lower score is better.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(StoredChunk, f32)>> {
        let terms: Vec<String> = query
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let match_expr = terms.join(" OR ");

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.doc_id, d.name, d.source, c.chunk_idx, c.page, c.content, c.embedding,
                        bm25(chunks_fts) AS score
                 FROM chunks_fts f
                 JOIN chunks c ON c.id = f.rowid
                 JOIN documents d ON d.id = c.doc_id
                 WHERE chunks_fts MATCH ?1
                 ORDER BY score
                 LIMIT ?2",
            )
            .map_err(kb_err)?;
        let rows = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok((row_to_chunk(row)?, row.get::<_, f64>(8)? as f32))
            })
            .map_err(kb_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(kb_err)
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredChunk> {
    Ok(StoredChunk {
        id: row.get(0)?,
        doc_id: row.get(1)?,
        doc_name: row.get(2)?,
        source: row.get(3)?,
        chunk_idx: row.get::<_, i64>(4)? as usize,
        page: row.get(5)?,
        content: row.get(6)?,
        embedding: decode_embedding(&row.get::<_, Vec<u8>>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, page: Option<u32>) -> NewChunk {
        NewChunk { page, content: text.into(), embedding: vec![0.5, -0.25] }
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.125];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn test_insert_list_and_stats() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let id = store
            .insert_document(
                "policy.pdf",
                "data/policy.pdf",
                "abc",
                2,
                &[chunk("Room rent capped at 1%", Some(1)), chunk("Waiting period 24 months", Some(2))],
            )
            .unwrap();
        assert_eq!(store.stats(), (1, 2));

        let docs = store.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].chunks, 2);
        assert_eq!(docs[0].pages, 2);

        let chunks = store.all_chunks().unwrap();
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(chunks[1].chunk_idx, 1);
        assert_eq!(chunks[0].embedding, vec![0.5, -0.25]);
        assert_eq!(chunks[0].doc_name, "policy.pdf");
    }

    #[test]
    fn test_duplicate_checksum_rejected() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store.insert_document("a.txt", "a.txt", "same", 1, &[chunk("x", None)]).unwrap();
        assert!(store.has_checksum("same").unwrap());
        let err = store
            .insert_document("b.txt", "b.txt", "same", 1, &[chunk("y", None)])
            .unwrap_err();
        assert!(err.to_string().contains("already ingested"));
        assert_eq!(store.stats(), (1, 1));
    }

    #[test]
    fn test_remove_document_cleans_index() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let id = store
            .insert_document("a.txt", "a.txt", "c1", 1, &[chunk("maternity cover clause", None)])
            .unwrap();
        assert_eq!(store.fts_search("maternity", 5).unwrap().len(), 1);
        store.remove_document(id).unwrap();
        assert_eq!(store.stats(), (0, 0));
        assert!(store.fts_search("maternity", 5).unwrap().is_empty());
        assert!(store.remove_document(id).is_err());
    }

    #[test]
    fn test_fts_search_ranks_matches() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store
            .insert_document(
                "a.txt",
                "a.txt",
                "c1",
                1,
                &[
                    chunk("Knee surgery is covered after two years", None),
                    chunk("Dental treatment is excluded", None),
                ],
            )
            .unwrap();
        let hits = store.fts_search("knee surgery?", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].0.content.starts_with("Knee"));
        assert!(store.fts_search("  ?! ", 5).unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store.insert_document("a.txt", "a.txt", "c1", 1, &[chunk("x", None)]).unwrap();
        store.clear().unwrap();
        assert_eq!(store.stats(), (0, 0));
        assert!(!store.has_checksum("c1").unwrap());
    }

    fn new_doc(name: &str, checksum: &str, text: &str) -> NewDocument {
        NewDocument {
            name: name.into(),
            source: name.into(),
            checksum: checksum.into(),
            pages: 1,
            chunks: vec![chunk(text, None)],
        }
    }

    #[test]
    fn test_replace_all_swaps_contents() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store.insert_document("old.txt", "old.txt", "c0", 1, &[chunk("old clause", None)]).unwrap();
        store
            .replace_all(&[new_doc("a.txt", "c1", "ambulance cover"), new_doc("b.txt", "c2", "icu charges")])
            .unwrap();
        assert_eq!(store.stats(), (2, 2));
        assert!(!store.has_checksum("c0").unwrap());
        assert!(store.fts_search("old", 5).unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_rolls_back_on_error() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        store.insert_document("old.txt", "old.txt", "c0", 1, &[chunk("old clause", None)]).unwrap();
        let err = store
            .replace_all(&[new_doc("a.txt", "dup", "x"), new_doc("b.txt", "dup", "y")])
            .unwrap_err();
        assert!(err.to_string().contains("already ingested"));
        assert_eq!(store.stats(), (1, 1));
        assert!(store.has_checksum("c0").unwrap());
    }
}
