/// Default endpoint of a locally hosted OpenAI-compatible server
/// (LM Studio's default port).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:1234/v1";

/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "BANTER_BASE_URL";
