//! Conversation state and the session registry.

use clauserag_core::types::{Role, SourceRef};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// One chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub has_image: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub messages: usize,
    pub questions: usize,
}

/// A single user's chat history.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<Turn>,
    /// Rolling plain-text transcript, bounded by `record_exchange`.
    pub context: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
            context: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn push_user(&mut self, content: &str, has_image: bool) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.to_string(),
            has_image,
            sources: vec![],
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn push_assistant(&mut self, content: &str, sources: Vec<SourceRef>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.to_string(),
            has_image: false,
            sources,
            timestamp: chrono::Utc::now(),
        });
    }

    /// History block for the prompt. The window covers the last `window`
    /// turns counting the current (last) one, which itself is left out.
    pub fn history(&self, window: usize, user_label: &str) -> String {
        if self.turns.len() <= 1 || window <= 1 {
            return String::new();
        }
        let start = self.turns.len().saturating_sub(window);
        let recent = &self.turns[start..self.turns.len() - 1];
        recent
            .iter()
            .map(|t| {
                let speaker = match t.role {
                    Role::User => user_label,
                    _ => "Assistant",
                };
                if t.has_image {
                    format!("{speaker}: {} [{user_label} also shared an image]", t.content)
                } else {
                    format!("{speaker}: {}", t.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append a question/answer pair to the rolling transcript. When the
    /// transcript is already longer than `limit` chars only its last `keep`
    /// chars survive.
    pub fn record_exchange(&mut self, user_label: &str, question: &str, answer: &str, limit: usize, keep: usize) {
        let entry = format!("{user_label}: {question}\nAssistant: {answer}");
        let len = self.context.chars().count();
        if len > limit {
            let tail: String = self.context.chars().skip(len - keep.min(len)).collect();
            self.context = format!("{tail}\n{entry}");
        } else {
            self.context.push('\n');
            self.context.push_str(&entry);
        }
    }

    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            messages: self.turns.len(),
            questions: self.turns.iter().filter(|t| t.role == Role::User).count(),
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.context.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub messages: usize,
    pub questions: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

struct Slot {
    conv: Arc<Mutex<Conversation>>,
    last_used: Instant,
    /// Recency order for the size cap.
    tick: u64,
}

#[derive(Default)]
struct Slots {
    map: HashMap<String, Slot>,
    tick: u64,
}

impl Slots {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// In-memory session registry keyed by session id. Sessions idle for longer
/// than `idle_ttl` are dropped, and the least recently used one is evicted
/// when `max_sessions` is reached.
pub struct SessionManager {
    sessions: RwLock<Slots>,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_limits(1000, Duration::from_secs(3600))
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(Slots::default()),
            max_sessions: max_sessions.max(1),
            idle_ttl,
        }
    }

    /// Drop idle sessions, then make room for one more.
    fn evict(&self, slots: &mut Slots, now: Instant) {
        let before = slots.map.len();
        slots
            .map
            .retain(|_, s| now.duration_since(s.last_used) < self.idle_ttl);
        while slots.map.len() >= self.max_sessions {
            let Some(oldest) = slots
                .map
                .iter()
                .min_by_key(|(_, s)| s.tick)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            slots.map.remove(&oldest);
        }
        let evicted = before - slots.map.len();
        if evicted > 0 {
            tracing::debug!("Evicted {evicted} session(s)");
        }
    }

    fn insert(&self, slots: &mut Slots, id: &str, now: Instant) -> Arc<Mutex<Conversation>> {
        self.evict(slots, now);
        let conv = Arc::new(Mutex::new(Conversation::new(id)));
        let tick = slots.next_tick();
        slots
            .map
            .insert(id.to_string(), Slot { conv: conv.clone(), last_used: now, tick });
        conv
    }

    /// Live session by id, marking it as used.
    fn touch(&self, slots: &mut Slots, id: &str, now: Instant) -> Option<Arc<Mutex<Conversation>>> {
        let tick = slots.next_tick();
        let expired = match slots.map.get_mut(id) {
            Some(slot) if now.duration_since(slot.last_used) < self.idle_ttl => {
                slot.last_used = now;
                slot.tick = tick;
                return Some(slot.conv.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            slots.map.remove(id);
        }
        None
    }

    /// Start a session with a fresh uuid.
    pub async fn create(&self) -> (String, Arc<Mutex<Conversation>>) {
        let id = uuid::Uuid::new_v4().to_string();
        let conv = self.insert(&mut *self.sessions.write().await, &id, Instant::now());
        tracing::debug!("Session {id} created");
        (id, conv)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.touch(&mut *self.sessions.write().await, id, Instant::now())
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Conversation>> {
        let mut slots = self.sessions.write().await;
        let now = Instant::now();
        match self.touch(&mut slots, id, now) {
            Some(conv) => conv,
            None => self.insert(&mut slots, id, now),
        }
    }

    /// Clear a session's history. `false` when it does not exist.
    pub async fn clear(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(conv) => {
                conv.lock().await.clear();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.map.remove(id).is_some()
    }

    /// Summaries of live sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let convs: Vec<Arc<Mutex<Conversation>>> = {
            let mut slots = self.sessions.write().await;
            let now = Instant::now();
            slots
                .map
                .retain(|_, s| now.duration_since(s.last_used) < self.idle_ttl);
            slots.map.values().map(|s| s.conv.clone()).collect()
        };
        let mut out = Vec::with_capacity(convs.len());
        for conv in convs {
            let c = conv.lock().await;
            let stats = c.stats();
            out.push(SessionSummary {
                id: c.id.clone(),
                messages: stats.messages,
                questions: stats.questions,
                created_at: c.created_at,
            });
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.map.len()
    }
}
