//! # ClauseRAG Assistant
//! Turns retrieved clauses into grounded answers.
//!
//! ## Features:
//! - **Two personas**: policy clause analyst and textbook tutor
//! - **Conversation memory**: recent turns are replayed into the prompt
//! - **Images**: PNG/JPEG attachments forwarded to vision-capable models
//! - **Languages**: answers in any of 15 supported languages
//! - **Structured decisions**: approved / rejected / conditional with amount and clauses

pub mod decision;
pub mod image;
pub mod prompt;
pub mod session;

use clauserag_core::config::AssistantConfig;
use clauserag_core::error::{ClauseError, Result};
use clauserag_core::traits::Provider;
use clauserag_core::traits::provider::GenerateParams;
use clauserag_core::types::{ImageAttachment, Message, SourceRef};
use clauserag_knowledge::Retriever;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use decision::{Decision, PolicyDecision};
pub use prompt::Mode;
pub use session::{Conversation, SessionManager};

/// Neighbours fetched for the single-shot `/ask` endpoint.
const ASK_TOP_K: usize = 3;

/// Input for one chat turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: String,
    /// Base64 PNG/JPEG, optionally as a data URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<PolicyDecision>,
    /// The answer admits the documents do not cover the question.
    pub not_found_hint: bool,
    /// The synonym-expanded query contributed to retrieval.
    pub expanded_query: bool,
    pub mode: Mode,
}

/// Single-shot answer for the legacy endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub fn is_not_found(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    lower.contains("cannot find") || lower.contains("no relevant information")
}

/// Retrieval + prompting + generation.
pub struct Assistant {
    provider: Arc<dyn Provider>,
    retriever: Arc<Retriever>,
    params: GenerateParams,
    config: AssistantConfig,
    default_mode: Mode,
}

impl Assistant {
    pub fn new(
        provider: Arc<dyn Provider>,
        retriever: Arc<Retriever>,
        params: GenerateParams,
        config: AssistantConfig,
    ) -> Result<Self> {
        let default_mode: Mode = config.mode.parse()?;
        prompt::language_instruction(&config.language)?;
        Ok(Self { provider, retriever, params, config, default_mode })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model_name(&self) -> &str {
        &self.params.model
    }

    pub fn default_mode(&self) -> Mode {
        self.default_mode
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    async fn generate(&self, prompt: String, image: Option<ImageAttachment>) -> Result<String> {
        let mut message = Message::user(prompt);
        if let Some(img) = image {
            message = message.with_image(img);
        }
        let response = self.provider.chat(&[message], &self.params).await?;
        Ok(response.content.unwrap_or_default().trim().to_string())
    }

    /// Strict textbook answer from the three nearest chunks.
    pub async fn ask(&self, query: &str) -> Result<AskResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClauseError::InvalidInput("Missing 'query' in request body".into()));
        }
        tracing::info!("Received query: {query}");
        let results = self.retriever.semantic(query, ASK_TOP_K).await?;
        let context = results
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let answer = self.generate(prompt::strict_prompt(&context, query), None).await?;
        let sources = clauserag_knowledge::retriever::collect_sources(&results);
        tracing::debug!("Answer with {} source(s)", sources.len());
        Ok(AskResponse { answer, sources })
    }

    /// One conversational turn. Both the question and the answer (or the
    /// error notice) are recorded in `conversation`.
    pub async fn chat(&self, conversation: &mut Conversation, request: ChatRequest) -> Result<ChatResponse> {
        let typed = request.query.trim();
        if typed.is_empty() && request.image.is_none() {
            return Err(ClauseError::InvalidInput("Query or image is required".into()));
        }
        let attachment = request.image.as_deref().map(image::decode_image).transpose()?;
        let language = request.language.as_deref().unwrap_or(&self.config.language);
        prompt::language_instruction(language)?;
        let mode = request.mode.unwrap_or(self.default_mode);

        let query = if typed.is_empty() { image::IMAGE_ONLY_QUERY } else { typed };
        conversation.push_user(if typed.is_empty() { "Please analyze this image" } else { typed }, attachment.is_some());

        match self.answer_turn(conversation, query, attachment, language, mode).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!("Chat turn failed: {e}");
                conversation.push_assistant(
                    &format!("I'm sorry, I encountered an error while processing your question: {e}"),
                    vec![],
                );
                Err(e)
            }
        }
    }

    async fn answer_turn(
        &self,
        conversation: &mut Conversation,
        query: &str,
        image: Option<ImageAttachment>,
        language: &str,
        mode: Mode,
    ) -> Result<ChatResponse> {
        let retrieval = self.retriever.retrieve(query).await?;
        let history = conversation.history(self.config.history_messages, mode.user_label());
        let input = prompt::PromptInput {
            history: &history,
            context: &retrieval.context,
            question: query,
            has_image: image.is_some(),
            language: Some(language),
        };
        let structured = mode == Mode::Policy && self.config.structured_decisions;
        let full_prompt = prompt::build_prompt(mode, &input, structured)?;
        let answer = self.generate(full_prompt, image).await?;

        conversation.push_assistant(&answer, retrieval.sources.clone());
        conversation.record_exchange(
            mode.user_label(),
            query,
            &answer,
            self.config.context_char_limit,
            self.config.context_keep_chars,
        );

        let decision = structured.then(|| decision::extract_decision(&answer, &retrieval.sources));
        Ok(ChatResponse {
            not_found_hint: is_not_found(&answer),
            sources: retrieval.sources,
            expanded_query: retrieval.expanded,
            answer,
            decision,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clauserag_core::types::{ModelInfo, ProviderResponse};
    use clauserag_knowledge::store::NewChunk;
    use clauserag_knowledge::{KnowledgeStore, RetrievalSettings};
    use clauserag_providers::HashingEmbedder;
    use std::sync::Mutex;

    /// Replies with a fixed answer and records every prompt it receives.
    struct ScriptedProvider {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<Message>>,
    }

    impl ScriptedProvider {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.into()), prompts: Mutex::new(vec![]) })
        }
        fn failing(msg: &str) -> Arc<Self> {
            Arc::new(Self { reply: Err(msg.into()), prompts: Mutex::new(vec![]) })
        }
        fn last_prompt(&self) -> Message {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn chat(&self, messages: &[Message], _params: &GenerateParams) -> Result<ProviderResponse> {
            self.prompts.lock().unwrap().extend(messages.iter().cloned());
            match &self.reply {
                Ok(text) => Ok(ProviderResponse { content: Some(text.clone()), ..Default::default() }),
                Err(e) => Err(ClauseError::Provider(e.clone())),
            }
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    async fn retriever() -> Arc<Retriever> {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let embedder = Arc::new(HashingEmbedder::new(64));
        let texts = [
            "Section 4.1: Knee surgery is covered after a waiting period of 90 days.",
            "Section 7.2: Cosmetic surgery is excluded.",
        ];
        let chunks: Vec<NewChunk> = texts
            .iter()
            .map(|t| NewChunk { page: Some(4), content: t.to_string(), embedding: embedder.embed_one(t) })
            .collect();
        store.insert_document("policy.pdf", "/docs/policy.pdf", "c1", 9, &chunks).unwrap();
        Arc::new(Retriever::new(store, embedder, RetrievalSettings::default()))
    }

    async fn assistant(provider: Arc<ScriptedProvider>, mode: &str) -> Assistant {
        let config = AssistantConfig { mode: mode.into(), ..AssistantConfig::default() };
        Assistant::new(provider, retriever().await, GenerateParams::default(), config).unwrap()
    }

    #[tokio::test]
    async fn test_ask_uses_strict_prompt() {
        let provider = ScriptedProvider::ok("Knee surgery is covered after 90 days.");
        let a = assistant(provider.clone(), "education").await;
        let res = a.ask("Is knee surgery covered?").await.unwrap();
        assert_eq!(res.answer, "Knee surgery is covered after 90 days.");
        assert_eq!(res.sources, vec![SourceRef { source: "policy.pdf".into(), page: Some(4) }]);
        let prompt = provider.last_prompt();
        assert!(prompt.content.contains("I cannot find the answer in the provided text."));
        assert!(prompt.content.contains("Section 4.1"));
    }

    #[tokio::test]
    async fn test_ask_rejects_empty_query() {
        let a = assistant(ScriptedProvider::ok("x"), "education").await;
        assert!(matches!(a.ask("  ").await, Err(ClauseError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_policy_chat_records_turns_and_decision() {
        let reply = "The claim is approved.\n```json\n{\"decision\":\"approved\",\"amount\":null,\"explanation\":\"Waiting period served.\",\"clause_references\":[]}\n```";
        let provider = ScriptedProvider::ok(reply);
        let a = assistant(provider.clone(), "policy").await;
        let mut conv = Conversation::new("t");

        let req = ChatRequest { query: "46M, knee surgery, 6-month policy".into(), ..Default::default() };
        let res = a.chat(&mut conv, req).await.unwrap();
        assert_eq!(res.mode, Mode::Policy);
        let decision = res.decision.unwrap();
        assert_eq!(decision.decision, Decision::Approved);
        assert_eq!(decision.clause_references.len(), res.sources.len());
        assert!(!res.not_found_hint);
        assert_eq!(conv.stats().messages, 2);
        assert!(conv.context.contains("User: 46M, knee surgery"));

        let follow = ChatRequest { query: "What about cosmetic surgery?".into(), ..Default::default() };
        a.chat(&mut conv, follow).await.unwrap();
        let prompt = provider.last_prompt();
        assert!(prompt.content.contains("Previous conversation:\nUser: 46M, knee surgery"));
        assert!(prompt.content.contains("```json"));
    }

    #[tokio::test]
    async fn test_education_chat_has_no_decision_and_flags_not_found() {
        let provider = ScriptedProvider::ok("I cannot find the answer in the provided text.");
        let a = assistant(provider, "policy").await;
        let mut conv = Conversation::new("t");
        let req = ChatRequest {
            query: "What is refraction?".into(),
            mode: Some(Mode::Education),
            language: Some("hi".into()),
            ..Default::default()
        };
        let res = a.chat(&mut conv, req).await.unwrap();
        assert!(res.decision.is_none());
        assert!(res.not_found_hint);
    }

    #[tokio::test]
    async fn test_language_instruction_reaches_prompt() {
        let provider = ScriptedProvider::ok("ठीक है");
        let a = assistant(provider.clone(), "education").await;
        let mut conv = Conversation::new("t");
        let req = ChatRequest { query: "energy".into(), language: Some("hi".into()), ..Default::default() };
        a.chat(&mut conv, req).await.unwrap();
        assert!(provider.last_prompt().content.contains("Respond in Hindi."));
    }

    #[tokio::test]
    async fn test_image_only_request() {
        let provider = ScriptedProvider::ok("A free-body diagram.");
        let a = assistant(provider.clone(), "education").await;
        let mut conv = Conversation::new("t");
        let png = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0];
        let req = ChatRequest {
            image: Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png)),
            ..Default::default()
        };
        a.chat(&mut conv, req).await.unwrap();
        let sent = provider.last_prompt();
        assert_eq!(sent.images.len(), 1);
        assert!(sent.content.contains(image::IMAGE_ONLY_QUERY));
        assert!(conv.turns[0].has_image);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let a = assistant(ScriptedProvider::ok("x"), "policy").await;
        let mut conv = Conversation::new("t");
        let empty = a.chat(&mut conv, ChatRequest::default()).await;
        assert!(matches!(empty, Err(ClauseError::InvalidInput(_))));
        let bad_lang = ChatRequest { query: "q".into(), language: Some("xx".into()), ..Default::default() };
        assert!(matches!(a.chat(&mut conv, bad_lang).await, Err(ClauseError::InvalidInput(_))));
        assert_eq!(conv.stats().messages, 0);
    }

    #[tokio::test]
    async fn test_provider_failure_records_apology() {
        let a = assistant(ScriptedProvider::failing("quota exceeded"), "policy").await;
        let mut conv = Conversation::new("t");
        let req = ChatRequest { query: "Is dental covered?".into(), ..Default::default() };
        assert!(a.chat(&mut conv, req).await.is_err());
        assert_eq!(conv.turns.len(), 2);
        assert!(conv.turns[1]
            .content
            .starts_with("I'm sorry, I encountered an error while processing your question:"));
        assert!(conv.turns[1].content.contains("quota exceeded"));
    }
}
