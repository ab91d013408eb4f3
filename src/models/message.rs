use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

/// One entry of a multi-part message body, following the OpenAI vision
/// wire shape: `{"type": "text", ...}` or `{"type": "image_url", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

/// Message body: either a bare string or an ordered list of parts.
/// Servers accept both shapes, so both serialize transparently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Plain(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The first textual fragment of the body, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Plain(text) => Some(text),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Plain(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: i64,
}

impl Message {
    pub fn user(content: MessageContent) -> Self {
        Self {
            role: Role::User,
            content,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The empty assistant message appended on send and filled in while
    /// streaming.
    pub fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Plain(String::new()),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_content_serializes_as_string() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Plain("hi".to_string()),
            timestamp: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn part_list_round_trips() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "look".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageRef {
                    url: "data:image/png;base64,AAAA".to_string(),
                },
            },
        ]);
        let json = serde_json::to_string(&content).unwrap();
        assert!(json.contains("\"type\":\"image_url\""));
        let back: MessageContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn text_accessor_skips_images() {
        let content = MessageContent::Parts(vec![ContentPart::ImageUrl {
            image_url: ImageRef {
                url: "http://example.com/a.png".to_string(),
            },
        }]);
        assert_eq!(content.text(), None);
    }
}
