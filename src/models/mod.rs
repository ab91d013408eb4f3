pub mod conversation;
pub mod message;

pub use conversation::Conversation;
pub use message::{ContentPart, ImageRef, Message, MessageContent, Role};
