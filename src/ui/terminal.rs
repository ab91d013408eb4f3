use std::io::Write;
use std::sync::Mutex;

use crate::models::{ContentPart, Message, MessageContent, Role};

use super::markdown::format_markdown;
use super::{NotificationSink, RenderSink, ToastLevel};

/// Stdout-backed render and notification sink. Streaming updates print
/// only the newly arrived suffix so the reply grows in place.
#[derive(Default)]
pub struct TerminalUi {
    printed_len: Mutex<usize>,
}

impl TerminalUi {
    pub fn new() -> Self {
        Self::default()
    }

    fn content_preview(content: &MessageContent) -> String {
        match content {
            MessageContent::Plain(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ImageUrl { .. } => "[image]".to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl RenderSink for TerminalUi {
    fn render_all(&self, messages: &[Message]) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout);
        for msg in messages {
            let label = match msg.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            let body = Self::content_preview(&msg.content);
            let body = match msg.role {
                Role::Assistant => format_markdown(&body),
                Role::User => body,
            };
            let _ = writeln!(stdout, "[{label}]\n{body}\n");
        }
        let _ = stdout.flush();
        *self.printed_len.lock().unwrap() = 0;
    }

    fn update_streaming(&self, text: &str) {
        let mut printed = self.printed_len.lock().unwrap();
        if text.len() < *printed {
            *printed = 0;
        }
        let suffix = &text[*printed..];
        if !suffix.is_empty() {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{suffix}");
            let _ = stdout.flush();
            *printed = text.len();
        }
    }

    fn scroll_to_bottom(&self) {
        // A terminal is always scrolled to the bottom.
    }
}

impl NotificationSink for TerminalUi {
    fn notify(&self, level: ToastLevel, message: &str) {
        let icon = match level {
            ToastLevel::Success => "✅",
            ToastLevel::Error => "❌",
            ToastLevel::Warning => "⚠️",
            ToastLevel::Info => "ℹ️",
        };
        eprintln!("{icon} {message}");
    }
}
