//! Prompt templates for the education and policy assistants.

use clauserag_core::error::{ClauseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which assistant persona answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Textbook tutor.
    Education,
    /// Insurance / contract clause analyst.
    Policy,
}

impl Mode {
    /// Speaker label for the user's turns in the conversation history.
    pub fn user_label(self) -> &'static str {
        match self {
            Mode::Education => "Student",
            Mode::Policy => "User",
        }
    }
}

impl FromStr for Mode {
    type Err = ClauseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "education" | "edu" => Ok(Mode::Education),
            "policy" => Ok(Mode::Policy),
            other => Err(ClauseError::InvalidInput(format!(
                "Unknown mode '{other}' (expected 'policy' or 'education')"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Education => "education",
            Mode::Policy => "policy",
        })
    }
}

/// Supported response languages: (code, English name).
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("hi", "Hindi"),
    ("bn", "Bengali"),
    ("te", "Telugu"),
    ("mr", "Marathi"),
    ("ta", "Tamil"),
    ("ur", "Urdu"),
    ("gu", "Gujarati"),
    ("kn", "Kannada"),
    ("ml", "Malayalam"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("zh", "Chinese"),
    ("ar", "Arabic"),
];

pub fn language_name(code: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code.trim()))
        .map(|(_, name)| *name)
}

/// `"Respond in {name}."` for non-English codes, `None` for English.
pub fn language_instruction(code: &str) -> Result<Option<String>> {
    match language_name(code) {
        Some("English") => Ok(None),
        Some(name) => Ok(Some(format!("Respond in {name}."))),
        None => Err(ClauseError::InvalidInput(format!("Unsupported language code '{code}'"))),
    }
}

/// Everything a conversational prompt is assembled from.
#[derive(Debug, Clone, Default)]
pub struct PromptInput<'a> {
    pub history: &'a str,
    pub context: &'a str,
    pub question: &'a str,
    pub has_image: bool,
    pub language: Option<&'a str>,
}

/// Single-shot textbook prompt that forbids answering beyond the context.
pub fn strict_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an expert educational assistant. Your task is to answer the user's question based *only* on the provided context from their textbook.
If the information to answer the question is not in the context, you must state \"I cannot find the answer in the provided text.\"
Do not add any information that is not present in the context.

Context:
{context}

Question:
{question}

Answer:
"
    )
}

const DECISION_JSON_INSTRUCTION: &str = "After your analysis, end your response with a fenced ```json block containing exactly one object:
{\"decision\": \"approved\" | \"rejected\" | \"conditional\", \"amount\": number or null, \"explanation\": string, \"clause_references\": [{\"source\": string, \"page\": number or null, \"excerpt\": string}]}";

fn education_prompt(input: &PromptInput<'_>) -> String {
    if input.has_image {
        format!(
            "You are an expert educational assistant helping students with NCERT textbooks. The student has provided both text and an image.

Previous conversation:
{history}

Student's text question: {question}
Student has also uploaded an image that may contain: diagrams, equations, text from textbooks, or other educational content.

Please:
1. Analyze the image if it contains relevant educational content
2. Answer the student's question using both the image context and the textbook context provided
3. Be conversational and helpful
4. If the image shows a problem or diagram, help explain it step by step

Context from textbook(s):
{context}

Your Response:
",
            history = input.history,
            question = input.question,
            context = input.context,
        )
    } else {
        format!(
            "You are an expert educational assistant helping students with NCERT textbooks. You are having a conversation with a student and should respond in a helpful, conversational manner.

Previous conversation:
{history}

Context from textbook(s):
{context}

Student's Question: {question}

Your Response:
",
            history = input.history,
            question = input.question,
            context = input.context,
        )
    }
}

fn policy_prompt(input: &PromptInput<'_>, structured: bool) -> String {
    let tail = if structured { format!("{DECISION_JSON_INSTRUCTION}\n\n") } else { String::new() };
    if input.has_image {
        format!(
            "You are an expert legal and policy analysis assistant specializing in insurance policies, contracts, and compliance documents. The user has provided both text and an image.

Previous conversation:
{history}

User's query: {question}
User has also uploaded an image that may contain: policy clauses, contract terms, claim forms, legal documents, or other relevant content.

Please:
1. Analyze the image if it contains relevant policy clauses, terms, or legal content
2. Extract key entities from the query (e.g., age, condition, policy duration, location, procedure type)
3. Map the query to applicable clauses in the provided context
4. Evaluate conditions and eligibility based on the policy logic
5. Provide a clear decision with supporting explanation grounded in specific clauses
6. If applicable, calculate any payout amounts or benefits

Context from policy document(s):
{context}

{tail}Your Response (provide structured analysis with decision, reasoning, and clause references):
",
            history = input.history,
            question = input.question,
            context = input.context,
        )
    } else {
        format!(
            "You are an expert legal and policy analysis assistant specializing in insurance policies, contracts, HR policies, and compliance documents. You help users interpret complex policy language and make informed decisions based on natural language queries.

Previous conversation:
{history}

Context from policy document(s):
{context}

User's Query: {question}

Please:
1. Parse the query to extract key metadata (age, condition, policy details, dates, etc.)
2. Identify and retrieve relevant clauses from the provided context
3. Evaluate the conditions and apply policy logic
4. Provide a clear decision (approved/rejected/conditional) with reasoning
5. Reference specific clauses that support your conclusion
6. Calculate any amounts or benefits if applicable
7. Ensure your response is traceable and explainable for audit purposes

{tail}Your Response:
",
            history = input.history,
            question = input.question,
            context = input.context,
        )
    }
}

/// Build the conversational prompt for `mode`. `structured` appends the
/// decision JSON request to policy prompts.
pub fn build_prompt(mode: Mode, input: &PromptInput<'_>, structured: bool) -> Result<String> {
    let mut prompt = match mode {
        Mode::Education => education_prompt(input),
        Mode::Policy => policy_prompt(input, structured),
    };
    if let Some(code) = input.language {
        if let Some(instruction) = language_instruction(code)? {
            prompt.push('\n');
            prompt.push_str(&instruction);
            prompt.push('\n');
        }
    }
    Ok(prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(has_image: bool, language: Option<&'a str>) -> PromptInput<'a> {
        PromptInput {
            history: "User: hello\nAssistant: hi",
            context: "Source 1 (policy.pdf, Page 2):\nKnee surgery is covered.",
            question: "46M, knee surgery in Pune, 3-month policy",
            has_image,
            language,
        }
    }

    #[test]
    fn test_mode_parse_and_labels() {
        assert_eq!("Policy".parse::<Mode>().unwrap(), Mode::Policy);
        assert_eq!("education".parse::<Mode>().unwrap(), Mode::Education);
        assert!("legal".parse::<Mode>().is_err());
        assert_eq!(Mode::Education.user_label(), "Student");
        assert_eq!(Mode::Policy.user_label(), "User");
        assert_eq!(Mode::Policy.to_string(), "policy");
    }

    #[test]
    fn test_strict_prompt_contains_refusal_sentence() {
        let p = strict_prompt("ctx", "What is inertia?");
        assert!(p.contains("I cannot find the answer in the provided text."));
        assert!(p.contains("Context:\nctx"));
        assert!(p.contains("Question:\nWhat is inertia?"));
    }

    #[test]
    fn test_policy_prompt_has_steps_and_json_request() {
        let p = build_prompt(Mode::Policy, &input(false, None), true).unwrap();
        assert!(p.contains("7. Ensure your response is traceable"));
        assert!(p.contains("User's Query: 46M, knee surgery"));
        assert!(p.contains("```json"));
        assert!(p.contains("Previous conversation:\nUser: hello"));

        let plain = build_prompt(Mode::Policy, &input(false, None), false).unwrap();
        assert!(!plain.contains("```json"));
    }

    #[test]
    fn test_image_variants() {
        let p = build_prompt(Mode::Policy, &input(true, None), false).unwrap();
        assert!(p.contains("User has also uploaded an image"));
        let e = build_prompt(Mode::Education, &input(true, None), false).unwrap();
        assert!(e.contains("Student has also uploaded an image"));
        assert!(e.contains("Student's text question:"));
    }

    #[test]
    fn test_language_instruction() {
        let p = build_prompt(Mode::Education, &input(false, Some("hi")), false).unwrap();
        assert!(p.trim_end().ends_with("Respond in Hindi."));
        let en = build_prompt(Mode::Education, &input(false, Some("en")), false).unwrap();
        assert!(!en.contains("Respond in"));
        let err = build_prompt(Mode::Education, &input(false, Some("xx")), false).unwrap_err();
        assert!(matches!(err, ClauseError::InvalidInput(_)));
    }

    #[test]
    fn test_language_table() {
        assert_eq!(LANGUAGES.len(), 15);
        assert_eq!(language_name("ZH"), Some("Chinese"));
        assert_eq!(language_name("pt"), None);
    }
}
