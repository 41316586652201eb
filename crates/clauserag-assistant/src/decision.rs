//! Structured decision extraction from policy answers.
//!
//! The model is asked to finish with a fenced JSON object. When it does not,
//! the decision is recovered heuristically from the prose.

use clauserag_core::types::SourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
    Conditional,
    Undetermined,
}

impl Decision {
    fn from_word(word: &str) -> Option<Self> {
        let w = word.trim().to_lowercase();
        if w.starts_with("approve") || w == "covered" || w == "accepted" {
            Some(Decision::Approved)
        } else if w.starts_with("reject") || w.starts_with("denied") || w == "not covered" {
            Some(Decision::Rejected)
        } else if w.starts_with("conditional") || w == "partial" || w == "partially approved" {
            Some(Decision::Conditional)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseReference {
    pub source: String,
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub excerpt: String,
}

impl From<&SourceRef> for ClauseReference {
    fn from(s: &SourceRef) -> Self {
        Self { source: s.source.clone(), page: s.page, excerpt: String::new() }
    }
}

/// Decision, payout amount, explanation, and supporting clauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub amount: Option<f64>,
    pub explanation: String,
    pub clause_references: Vec<ClauseReference>,
}

/// Parse the decision out of a policy answer. Clause references fall back
/// to `sources` when the answer names none.
pub fn extract_decision(answer: &str, sources: &[SourceRef]) -> PolicyDecision {
    let mut decision = json_candidate(answer)
        .and_then(|(start, obj)| from_json(&obj, answer[..start].trim()))
        .unwrap_or_else(|| heuristic(answer));
    if decision.clause_references.is_empty() {
        decision.clause_references = sources.iter().map(ClauseReference::from).collect();
    }
    decision
}

/// Last ```json fenced block, or else the last balanced `{...}` object.
/// Returns the byte offset where the candidate starts.
fn json_candidate(answer: &str) -> Option<(usize, Value)> {
    if let Some(fence) = answer.rfind("```json") {
        let body_start = fence + "```json".len();
        let body_end = answer[body_start..]
            .find("```")
            .map(|i| body_start + i)
            .unwrap_or(answer.len());
        if let Ok(v) = serde_json::from_str::<Value>(answer[body_start..body_end].trim()) {
            if v.is_object() {
                return Some((fence, v));
            }
        }
    }
    last_balanced_object(answer)
}

fn last_balanced_object(text: &str) -> Option<(usize, Value)> {
    let mut found = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Ok(v) = serde_json::from_str::<Value>(&text[start..=i]) {
                        if v.is_object() {
                            found = Some((start, v));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    found
}

fn from_json(obj: &Value, preceding_text: &str) -> Option<PolicyDecision> {
    let decision = Decision::from_word(obj.get("decision")?.as_str()?).unwrap_or(Decision::Undetermined);
    let amount = match obj.get("amount") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number(s),
        _ => None,
    };
    let explanation = obj
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| preceding_text.to_string());
    let clause_references = obj
        .get("clause_references")
        .and_then(Value::as_array)
        .map(|refs| refs.iter().filter_map(clause_from_json).collect())
        .unwrap_or_default();
    Some(PolicyDecision { decision, amount, explanation, clause_references })
}

fn clause_from_json(v: &Value) -> Option<ClauseReference> {
    let source = v.get("source")?.as_str()?.to_string();
    let page = match v.get("page") {
        Some(Value::Number(n)) => n.as_u64().map(|p| p as u32),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let excerpt = v.get("excerpt").and_then(Value::as_str).unwrap_or_default().to_string();
    Some(ClauseReference { source, page, excerpt })
}

const DECISION_WORDS: &[(&str, Decision)] = &[
    ("approved", Decision::Approved),
    ("rejected", Decision::Rejected),
    ("denied", Decision::Rejected),
    ("conditional", Decision::Conditional),
];

/// Phrases that read as a rejection on their own.
const REJECTION_PHRASES: &[&str] = &["not covered", "not payable", "not admissible", "not eligible"];

const NEGATIONS: &[&str] = &[
    "not", "cannot", "can't", "never", "no", "isn't", "wasn't", "won't", "hasn't", "shouldn't", "neither", "nor",
];
const NEGATING_PREFIXES: &[&str] = &["un", "dis", "non"];

const CURRENCY_MARKERS: &[&str] = &["₹", "$", "€", "£", "Rs.", "Rs", "INR", "USD"];

enum Hit {
    Plain(Decision),
    Negated(Decision),
}

/// How a keyword at `pos` reads: `None` when it is part of an unrelated word.
fn classify(lower: &str, pos: usize, decision: Decision) -> Option<Hit> {
    let before = &lower[..pos];
    let attached: String = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic() || *c == '-')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !attached.is_empty() {
        let prefix = attached.trim_end_matches('-');
        return NEGATING_PREFIXES.contains(&prefix).then_some(Hit::Negated(decision));
    }

    // negation words earlier in the same clause, at most three words back
    let clause = before
        .rsplit(['.', '!', '?', ';', ':', ','])
        .next()
        .unwrap_or(before);
    let negated = clause
        .split_whitespace()
        .rev()
        .take(3)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .any(|w| NEGATIONS.contains(&w));
    Some(if negated { Hit::Negated(decision) } else { Hit::Plain(decision) })
}

/// Earliest affirmative decision keyword. When every keyword is negated, a
/// negated approval reads as a rejection and anything else is undetermined.
fn keyword_decision(answer: &str) -> Decision {
    let lower = answer.to_lowercase();
    let mut plain: Option<(usize, Decision)> = None;
    let mut negated: Option<(usize, Decision)> = None;
    for phrase in REJECTION_PHRASES {
        if let Some(pos) = lower.find(phrase) {
            keep_earliest(&mut plain, pos, Decision::Rejected);
        }
    }
    for (word, d) in DECISION_WORDS {
        for (pos, _) in lower.match_indices(word) {
            match classify(&lower, pos, *d) {
                Some(Hit::Plain(d)) => keep_earliest(&mut plain, pos, d),
                Some(Hit::Negated(d)) => {
                    let flipped = if d == Decision::Approved { Decision::Rejected } else { Decision::Undetermined };
                    keep_earliest(&mut negated, pos, flipped);
                }
                None => {}
            }
        }
    }
    plain
        .or(negated)
        .map(|(_, d)| d)
        .unwrap_or(Decision::Undetermined)
}

fn keep_earliest(slot: &mut Option<(usize, Decision)>, pos: usize, d: Decision) {
    if slot.is_none_or(|(p, _)| pos < p) {
        *slot = Some((pos, d));
    }
}

fn heuristic(answer: &str) -> PolicyDecision {
    PolicyDecision {
        decision: keyword_decision(answer),
        amount: find_amount(answer),
        explanation: answer.trim().to_string(),
        clause_references: vec![],
    }
}

/// First number that directly follows a currency marker.
fn find_amount(text: &str) -> Option<f64> {
    let mut best: Option<(usize, f64)> = None;
    for marker in CURRENCY_MARKERS {
        for (pos, _) in text.match_indices(marker) {
            let rest = text[pos + marker.len()..].trim_start();
            let digits: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
                .collect();
            if let Some(value) = parse_number(&digits) {
                if best.is_none_or(|(p, _)| pos < p) {
                    best = Some((pos, value));
                }
                break;
            }
        }
    }
    best.map(|(_, v)| v)
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let cleaned = cleaned.trim_end_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<SourceRef> {
        vec![SourceRef { source: "policy.pdf".into(), page: Some(12) }]
    }

    #[test]
    fn test_fenced_json_block() {
        let answer = "The claim is covered under section 3.\n\n```json\n{\"decision\": \"approved\", \"amount\": 50000, \"explanation\": \"Knee surgery is covered after 90 days.\", \"clause_references\": [{\"source\": \"policy.pdf\", \"page\": 4, \"excerpt\": \"Section 3.1\"}]}\n```";
        let d = extract_decision(answer, &sources());
        assert_eq!(d.decision, Decision::Approved);
        assert_eq!(d.amount, Some(50000.0));
        assert_eq!(d.explanation, "Knee surgery is covered after 90 days.");
        assert_eq!(d.clause_references.len(), 1);
        assert_eq!(d.clause_references[0].page, Some(4));
        assert_eq!(d.clause_references[0].excerpt, "Section 3.1");
    }

    #[test]
    fn test_bare_object_with_string_amount_and_default_refs() {
        let answer = "Analysis done. {\"decision\": \"Rejected\", \"amount\": \"₹1,20,000\"}";
        let d = extract_decision(answer, &sources());
        assert_eq!(d.decision, Decision::Rejected);
        assert_eq!(d.amount, Some(120000.0));
        assert_eq!(d.explanation, "Analysis done.");
        assert_eq!(d.clause_references, vec![ClauseReference { source: "policy.pdf".into(), page: Some(12), excerpt: String::new() }]);
    }

    #[test]
    fn test_heuristic_fallback() {
        let answer = "Decision: Conditional. The procedure is approved only after the waiting period. Payout up to Rs. 75,000.50 applies.";
        let d = extract_decision(answer, &[]);
        assert_eq!(d.decision, Decision::Conditional);
        assert_eq!(d.amount, Some(75000.5));
        assert_eq!(d.explanation, answer);
        assert!(d.clause_references.is_empty());
    }

    #[test]
    fn test_undetermined_without_keywords() {
        let d = extract_decision("The context does not mention dental care.", &sources());
        assert_eq!(d.decision, Decision::Undetermined);
        assert_eq!(d.amount, None);
        assert_eq!(d.clause_references.len(), 1);
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scanner() {
        let answer = r#"{"decision": "approved", "explanation": "see clause {4}"}"#;
        let d = extract_decision(answer, &[]);
        assert_eq!(d.decision, Decision::Approved);
        assert_eq!(d.explanation, "see clause {4}");
    }

    #[test]
    fn test_serialized_shape() {
        let d = extract_decision("Claim rejected.", &sources());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decision"], "rejected");
        assert!(json["amount"].is_null());
        assert_eq!(json["clause_references"][0]["source"], "policy.pdf");
        assert!(json["clause_references"][0].get("excerpt").is_none());
    }

    #[test]
    fn test_negated_approval_reads_as_rejection() {
        let d = extract_decision("The claim cannot be approved because the waiting period is not met.", &[]);
        assert_eq!(d.decision, Decision::Rejected);
        let d = extract_decision("This expense is disapproved by the insurer.", &[]);
        assert_eq!(d.decision, Decision::Rejected);
    }

    #[test]
    fn test_negated_rejection_is_undetermined() {
        let d = extract_decision("The request was not rejected yet; more documents are needed.", &[]);
        assert_eq!(d.decision, Decision::Undetermined);
    }

    #[test]
    fn test_affirmative_keyword_beats_negated_one() {
        let d = extract_decision("The claim is not rejected, it is approved for Rs 40,000.", &[]);
        assert_eq!(d.decision, Decision::Approved);
        assert_eq!(d.amount, Some(40000.0));
        let d = extract_decision("Unconditional cover does not apply here, so the payout is conditional.", &[]);
        assert_eq!(d.decision, Decision::Conditional);
    }

    #[test]
    fn test_rejection_phrases() {
        let d = extract_decision("Cosmetic surgery is not covered under clause 7.2.", &[]);
        assert_eq!(d.decision, Decision::Rejected);
    }
}
