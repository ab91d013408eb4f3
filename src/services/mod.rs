pub mod engine;
pub mod settings;
pub mod storage;
pub mod store;
pub mod transfer;

pub use engine::{GenerationParams, SessionOutcome, StreamingEngine};
pub use settings::{Settings, SettingsService};
pub use storage::{PersistenceStore, SqliteStore};
pub use store::ConversationStore;
