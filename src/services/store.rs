use anyhow::Result;

use crate::models::{Conversation, ContentPart, Message, MessageContent, Role};

use super::storage::PersistenceStore;

/// Title used when the first user message carries no text at all.
pub const IMAGE_TITLE_PLACEHOLDER: &str = "[Image attachment]";

const TITLE_TRUNCATE_AT: usize = 37;

/// In-memory set of conversations, newest first. Single source of truth
/// during a session; callers sync it to the persistence store after every
/// mutation.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Conversation>) -> Self {
        Self {
            conversations: records,
        }
    }

    pub fn all(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Create a conversation and return its id.
    pub fn create(&mut self, model: Option<String>, temperature: f32, max_tokens: u32) -> String {
        let conv = Conversation::new(self.conversations.len() + 1, model, temperature, max_tokens);
        let id = conv.id.clone();
        self.conversations.insert(0, conv);
        id
    }

    /// Insert an existing record (e.g. an import) as the newest entry.
    pub fn insert_front(&mut self, conversation: Conversation) {
        self.conversations.insert(0, conversation);
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let index = self.conversations.iter().position(|c| c.id == id)?;
        Some(self.conversations.remove(index))
    }

    pub fn rename(&mut self, id: &str, title: &str) -> bool {
        match self.get_mut(id) {
            Some(conv) if !title.trim().is_empty() => {
                conv.title = title.trim().to_string();
                true
            }
            _ => false,
        }
    }

    /// Append a message to the end of a conversation. Never reorders.
    pub fn append_message(&mut self, id: &str, message: Message) -> bool {
        match self.get_mut(id) {
            Some(conv) => {
                conv.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Overwrite the content of the trailing assistant message. This is the
    /// only mutation the streaming session performs, and the trailing
    /// message is the only one it may touch.
    pub fn set_trailing_assistant_text(&mut self, id: &str, text: &str) -> bool {
        match self.get_mut(id).and_then(|c| c.last_message_mut()) {
            Some(msg) if msg.role == Role::Assistant => {
                msg.content = MessageContent::Plain(text.to_string());
                true
            }
            _ => false,
        }
    }

    /// Derive the title from the first user message, but only while the
    /// title still looks auto-generated. Returns whether the title changed.
    pub fn auto_title(&mut self, id: &str) -> bool {
        let Some(conv) = self.get_mut(id) else {
            return false;
        };
        if conv.messages.is_empty() || !conv.has_default_title() {
            return false;
        }

        let Some(first_user) = conv.messages.iter().find(|m| m.role == Role::User) else {
            return false;
        };

        let text = match &first_user.content {
            MessageContent::Plain(text) => text.trim().to_string(),
            MessageContent::Parts(parts) => parts
                .iter()
                .find_map(|p| match p {
                    ContentPart::Text { text } => Some(text.trim().to_string()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .unwrap_or_else(|| IMAGE_TITLE_PLACEHOLDER.to_string()),
        };
        if text.is_empty() {
            return false;
        }

        conv.title = truncate_title(&text);
        true
    }

    /// Write every record to the persistence store.
    pub async fn sync(&self, storage: &dyn PersistenceStore) -> Result<()> {
        storage.replace_all(&self.conversations).await
    }
}

/// First line of the text, cut on a char boundary with a trailing ellipsis
/// when too long for a sidebar title.
pub fn truncate_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() > TITLE_TRUNCATE_AT {
        let cut: String = first_line.chars().take(TITLE_TRUNCATE_AT).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}
