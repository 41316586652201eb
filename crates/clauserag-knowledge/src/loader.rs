//! Document loading from the data directory.

use clauserag_core::error::{ClauseError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Text of one page. `page` is 1-based for PDFs and `None` for plain text.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

/// A loaded source file.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    /// File name shown in source citations.
    pub name: String,
    pub checksum: String,
    pub pages: Vec<PageText>,
}

impl LoadedDocument {
    /// Build a single-page document from in-memory text (API uploads).
    pub fn from_text(name: &str, text: &str) -> Self {
        Self {
            path: PathBuf::from(name),
            name: name.to_string(),
            checksum: checksum(text.as_bytes()),
            pages: vec![PageText { page: None, text: text.to_string() }],
        }
    }
}

/// Hex SHA-256 of the raw file contents.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Load one file. PDFs are split per page; other files are one page.
pub fn load_file(path: &Path) -> Result<LoadedDocument> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));

    let pages = if is_pdf {
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| ClauseError::Ingest(format!("PDF parse failed for {}: {e}", path.display())))?;
        pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText { page: Some(i as u32 + 1), text })
            .collect()
    } else {
        vec![PageText { page: None, text: String::from_utf8_lossy(&bytes).into_owned() }]
    };

    Ok(LoadedDocument { path: path.to_path_buf(), name, checksum: checksum(&bytes), pages })
}

/// Load every matching file under `dir` (recursive, sorted by path).
/// Unreadable files are logged and skipped.
pub fn load_directory(dir: &Path, extensions: &[String]) -> Result<Vec<LoadedDocument>> {
    if !dir.is_dir() {
        return Err(ClauseError::Ingest(format!(
            "Data directory not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), extensions))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        match load_file(&path) {
            Ok(doc) => {
                tracing::debug!("Loaded {} ({} page(s))", doc.name, doc.pages.len());
                docs.push(doc);
            }
            Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
        }
    }

    if docs.is_empty() {
        return Err(ClauseError::Ingest(format!(
            "No documents found in '{}' (extensions: {})",
            dir.display(),
            extensions.join(", ")
        )));
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("clauserag-loader-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_directory_filters_and_recurses() {
        let dir = temp_dir("filter");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("a.txt"), "Clause 1: cover starts on day one.").unwrap();
        std::fs::write(dir.join("nested/b.md"), "# Exclusions\nCosmetic surgery.").unwrap();
        std::fs::write(dir.join("ignored.csv"), "x,y").unwrap();

        let exts = vec!["txt".to_string(), "md".to_string()];
        let docs = load_directory(&dir, &exts).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
        assert_eq!(docs[0].pages[0].page, None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = temp_dir("empty");
        let err = load_directory(&dir, &["pdf".to_string()]).unwrap_err();
        assert!(err.to_string().contains("No documents found"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory() {
        let err = load_directory(Path::new("/no/such/clauserag/dir"), &["txt".into()]).unwrap_err();
        assert!(matches!(err, ClauseError::Ingest(_)));
    }

    #[test]
    fn test_checksum_stable() {
        let a = LoadedDocument::from_text("x.txt", "same");
        let b = LoadedDocument::from_text("y.txt", "same");
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert!(has_extension(Path::new("POLICY.PDF"), &["pdf".to_string()]));
        assert!(!has_extension(Path::new("notes"), &["txt".to_string()]));
    }
}
