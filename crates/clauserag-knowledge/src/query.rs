//! Query preprocessing and synonym expansion.

use std::collections::BTreeMap;

/// The user's query as typed plus a synonym-expanded variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedQuery {
    pub original: String,
    pub expanded: String,
}

/// Lowercase, split on whitespace, and append the synonyms of every table key
/// that contains the term or is contained in it.
pub fn preprocess_query(query: &str, synonyms: &BTreeMap<String, Vec<String>>) -> ProcessedQuery {
    let lowered = query.trim().to_lowercase();
    let mut expanded: Vec<&str> = Vec::new();
    for term in lowered.split_whitespace() {
        expanded.push(term);
        for (key, values) in synonyms {
            if key.contains(term) || term.contains(key.as_str()) {
                expanded.extend(values.iter().map(String::as_str));
            }
        }
    }
    ProcessedQuery { original: query.to_string(), expanded: expanded.join(" ") }
}
