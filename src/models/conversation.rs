use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

/// Last id handed out, kept strictly increasing so two conversations
/// created within the same millisecond never share an id.
static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// A full conversation record. Serialized with camelCase keys so the
/// storage record, the export file, and the import file share one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Conversation {
    pub fn new(index: usize, model: Option<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            id: next_id(),
            title: Self::default_title(index),
            messages: Vec::new(),
            model,
            created_at: Utc::now(),
            temperature,
            max_tokens,
        }
    }

    pub fn default_title(index: usize) -> String {
        format!("New conversation {index}")
    }

    /// Whether the title still looks auto-generated. Auto-titling from the
    /// first user message only applies while this holds; a manual rename
    /// permanently opts the conversation out.
    pub fn has_default_title(&self) -> bool {
        self.title
            .strip_prefix("New conversation ")
            .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    }

    pub fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }
}

/// Creation-time-derived id: the current millisecond timestamp, bumped
/// past the previous id when the clock has not advanced.
pub fn next_id() -> String {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1).to_string()
}
