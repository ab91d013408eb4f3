pub mod markdown;
pub mod terminal;

pub use terminal::TerminalUi;

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Error,
    Warning,
    Info,
}

/// Ephemeral user-facing status messages.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: ToastLevel, message: &str);
}

/// Visual surface for a conversation. The core calls this; it never knows
/// what the surface is, so it can be driven headlessly in tests.
pub trait RenderSink: Send + Sync {
    /// Redraw the whole message list. Expensive passes like code-block
    /// formatting happen only here, never during streaming.
    fn render_all(&self, messages: &[Message]);

    /// Update only the trailing assistant message's visible content.
    fn update_streaming(&self, text: &str);

    fn scroll_to_bottom(&self);
}
