use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::conversation::next_id;
use crate::models::{Conversation, Message};

/// The export file: the persisted record plus an `exportedAt` stamp.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRecord<'a> {
    id: &'a str,
    title: &'a str,
    model: &'a Option<String>,
    created_at: &'a DateTime<Utc>,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    exported_at: DateTime<Utc>,
}

/// Fallbacks for fields an import file may omit.
pub struct ImportDefaults {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub fn export_json(conversation: &Conversation) -> Result<String> {
    let record = ExportRecord {
        id: &conversation.id,
        title: &conversation.title,
        model: &conversation.model,
        created_at: &conversation.created_at,
        messages: &conversation.messages,
        temperature: conversation.temperature,
        max_tokens: conversation.max_tokens,
        exported_at: Utc::now(),
    };
    serde_json::to_string_pretty(&record).context("Failed to encode conversation")
}

/// `conversation-<slugified title>-<millis>.json`.
pub fn export_filename(conversation: &Conversation) -> String {
    let slug: String = conversation
        .title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!(
        "conversation-{}-{}.json",
        slug,
        Utc::now().timestamp_millis()
    )
}

/// Build a conversation from an import file. The file must carry a
/// `messages` array; everything else falls back to the caller's defaults.
/// A fresh id is always minted, even when the imported id collides with an
/// existing conversation.
pub fn import_conversation(
    json: &str,
    defaults: &ImportDefaults,
    index: usize,
) -> Result<Conversation> {
    let value: Value = serde_json::from_str(json).context("Not valid JSON")?;

    let Some(messages) = value.get("messages").filter(|m| m.is_array()) else {
        bail!("Missing messages array");
    };
    let messages: Vec<Message> =
        serde_json::from_value(messages.clone()).context("Malformed messages")?;

    let title = value
        .get("title")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .unwrap_or_else(|| format!("Imported {index}"));

    let model = value
        .get("model")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .or_else(|| defaults.model.clone());

    let created_at = value
        .get("createdAt")
        .and_then(|c| c.as_str())
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|c| c.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let temperature = value
        .get("temperature")
        .and_then(|t| t.as_f64())
        .map(|t| t as f32)
        .unwrap_or(defaults.temperature);

    let max_tokens = value
        .get("maxTokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as u32)
        .unwrap_or(defaults.max_tokens);

    Ok(Conversation {
        id: next_id(),
        title,
        messages,
        model,
        created_at,
        temperature,
        max_tokens,
    })
}
