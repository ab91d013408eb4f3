pub mod client;
pub mod connection;
pub mod sse;
pub mod types;

pub use client::ApiClient;
pub use connection::{ConnectionError, ConnectionMonitor};
pub use types::{ApiError, ChatCompletionRequest, ModelInfo, StreamEvent, WireMessage};
