use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ConnectionError, ConnectionMonitor, ModelInfo};
use crate::models::{ContentPart, ImageRef, Message, MessageContent};
use crate::services::transfer::{self, ImportDefaults};
use crate::services::{
    ConversationStore, GenerationParams, PersistenceStore, Settings, SettingsService,
    StreamingEngine,
};
use crate::ui::{NotificationSink, RenderSink, ToastLevel};

/// Process-wide mutable state, held explicitly instead of as globals.
#[derive(Debug, Default)]
pub struct AppState {
    pub current_model: Option<String>,
    pub current_conversation_id: Option<String>,
    pub busy: bool,
    pub autoscroll: bool,
}

/// An image attached to an outgoing message, encoded into a data URI on
/// send.
pub struct ImageInput {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Command handlers over the core components. A thin input adapter (the
/// terminal loop) translates user input into these calls; nothing here
/// depends on an input event.
pub struct App {
    state: AppState,
    settings: Settings,
    store: ConversationStore,
    storage: Arc<dyn PersistenceStore>,
    engine: StreamingEngine,
    monitor: ConnectionMonitor,
    render: Arc<dyn RenderSink>,
    notify: Arc<dyn NotificationSink>,
    cancel: Option<CancellationToken>,
}

impl App {
    pub async fn new(
        client: ApiClient,
        storage: Arc<dyn PersistenceStore>,
        render: Arc<dyn RenderSink>,
        notify: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let settings = SettingsService::load(storage.as_ref()).await;
        let records = storage.load_all().await.unwrap_or_else(|e| {
            tracing::error!("failed to load conversations: {:#}", e);
            notify.notify(ToastLevel::Error, "Could not load saved conversations");
            Vec::new()
        });
        // Stored order is not guaranteed; newest first, like creation.
        let mut records = records;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let store = ConversationStore::from_records(records);

        let mut app = Self {
            state: AppState {
                autoscroll: true,
                ..Default::default()
            },
            settings: settings.clone(),
            store,
            storage,
            engine: StreamingEngine::new(client.clone()),
            monitor: ConnectionMonitor::new(client),
            render,
            notify,
            cancel: None,
        };

        if let Some(id) = settings.active_conversation_id {
            if app.store.get(&id).is_some() {
                app.activate(&id);
            }
        }

        Ok(app)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn conversations(&self) -> &[crate::models::Conversation] {
        self.store.all()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn set_autoscroll(&mut self, enabled: bool) {
        self.state.autoscroll = enabled;
    }

    // --- Connectivity ---

    pub async fn check_connection(&mut self) -> bool {
        match self.monitor.check().await {
            Ok(()) => true,
            Err(ConnectionError::Timeout) => {
                self.notify
                    .notify(ToastLevel::Warning, "Timed out connecting to the server.");
                false
            }
            Err(ConnectionError::Unreachable(reason)) => {
                tracing::warn!("server unreachable: {}", reason);
                self.notify
                    .notify(ToastLevel::Warning, "Could not connect to the server.");
                false
            }
        }
    }

    pub async fn load_models(&mut self) -> Vec<ModelInfo> {
        if !self.monitor.is_connected() {
            self.notify
                .notify(ToastLevel::Warning, "Not connected to the server!");
            return Vec::new();
        }
        match self.engine.client().list_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::error!("failed to load models: {}", e);
                self.notify.notify(ToastLevel::Error, "Error loading models");
                Vec::new()
            }
        }
    }

    pub fn select_model(&mut self, model_id: &str) {
        self.state.current_model = Some(model_id.to_string());
        if let Some(id) = self.state.current_conversation_id.clone() {
            if let Some(conv) = self.store.get_mut(&id) {
                conv.model = Some(model_id.to_string());
            }
        }
        self.notify
            .notify(ToastLevel::Success, &format!("Model selected: {model_id}"));
    }

    // --- Conversation lifecycle ---

    pub async fn new_conversation(&mut self) -> Option<String> {
        let Some(model) = self.state.current_model.clone() else {
            self.notify.notify(ToastLevel::Error, "Select a model first!");
            return None;
        };
        if !self.monitor.is_connected() {
            self.notify
                .notify(ToastLevel::Warning, "Not connected to the server!");
            return None;
        }

        let id = self.store.create(
            Some(model),
            self.settings.temperature,
            self.settings.max_tokens,
        );
        self.sync_store().await;
        self.activate(&id);
        self.save_settings().await;
        self.notify
            .notify(ToastLevel::Success, "New conversation created!");
        Some(id)
    }

    pub async fn open_conversation(&mut self, id: &str) -> bool {
        if self.store.get(id).is_none() {
            return false;
        }
        self.activate(id);
        self.save_settings().await;
        true
    }

    fn activate(&mut self, id: &str) {
        let Some(conv) = self.store.get(id) else {
            return;
        };
        self.state.current_conversation_id = Some(id.to_string());
        self.state.current_model = conv.model.clone();
        self.settings.active_conversation_id = Some(id.to_string());
        self.render.render_all(&conv.messages);
    }

    pub async fn rename_conversation(&mut self, id: &str, title: &str) {
        if self.store.rename(id, title) {
            self.sync_store().await;
        }
    }

    pub async fn delete_conversation(&mut self, id: &str) {
        let Some(removed) = self.store.remove(id) else {
            return;
        };
        self.sync_store().await;

        if self.state.current_conversation_id.as_deref() == Some(id) {
            self.state.current_conversation_id = None;
            self.state.current_model = None;
            self.settings.active_conversation_id = None;
            self.save_settings().await;
            self.render.render_all(&[]);
        }

        self.notify.notify(
            ToastLevel::Success,
            &format!("Conversation \"{}\" deleted!", removed.title),
        );
    }

    // --- Sending ---

    /// Full send flow: append the user message, persist and render, append
    /// the placeholder, and run one streaming session to a terminal state.
    /// A no-op while busy, disconnected, or without a model/conversation.
    pub async fn send_message(&mut self, text: &str, image: Option<ImageInput>) {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return;
        }
        if self.state.busy || !self.monitor.is_connected() {
            return;
        }
        let (Some(model), Some(conv_id)) = (
            self.state.current_model.clone(),
            self.state.current_conversation_id.clone(),
        ) else {
            return;
        };

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        if let Some(image) = image {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageRef {
                    url: format!(
                        "data:{};base64,{}",
                        image.mime_type,
                        BASE64.encode(&image.data)
                    ),
                },
            });
        }

        self.store
            .append_message(&conv_id, Message::user(MessageContent::Parts(parts)));
        self.store.auto_title(&conv_id);
        self.sync_store().await;
        self.render_conversation(&conv_id);

        self.store
            .append_message(&conv_id, Message::assistant_placeholder());
        self.render_conversation(&conv_id);

        self.state.busy = true;
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let params = GenerationParams {
            conversation_id: conv_id,
            model,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let outcome = self
            .engine
            .run(
                &mut self.store,
                self.storage.as_ref(),
                self.render.as_ref(),
                self.notify.as_ref(),
                params,
                self.state.autoscroll,
                cancel,
            )
            .await;
        tracing::debug!(?outcome, "generation finished");

        self.state.busy = false;
        self.cancel = None;
    }

    /// Cancel the in-flight generation, if any. The session finalizes with
    /// whatever text has arrived so far.
    pub fn stop_generation(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    // --- Import / export / copy ---

    pub async fn export_conversation(&self, dir: &Path) -> Option<PathBuf> {
        let Some(conv) = self
            .state
            .current_conversation_id
            .as_deref()
            .and_then(|id| self.store.get(id))
        else {
            self.notify
                .notify(ToastLevel::Error, "No active conversation to export!");
            return None;
        };

        let result = transfer::export_json(conv).and_then(|json| {
            let path = dir.join(transfer::export_filename(conv));
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path)
        });

        match result {
            Ok(path) => {
                self.notify
                    .notify(ToastLevel::Success, "Conversation exported!");
                Some(path)
            }
            Err(e) => {
                tracing::error!("export failed: {:#}", e);
                self.notify
                    .notify(ToastLevel::Error, "Error exporting conversation");
                None
            }
        }
    }

    pub async fn import_conversation(&mut self, json: &str) -> Option<String> {
        let defaults = ImportDefaults {
            model: self.state.current_model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        match transfer::import_conversation(json, &defaults, self.store.len() + 1) {
            Ok(conv) => {
                let id = conv.id.clone();
                self.store.insert_front(conv);
                self.sync_store().await;
                self.activate(&id);
                self.save_settings().await;
                self.notify
                    .notify(ToastLevel::Success, "Conversation imported!");
                Some(id)
            }
            Err(e) => {
                tracing::error!("import failed: {:#}", e);
                self.notify.notify(
                    ToastLevel::Error,
                    "Could not import the file. Check the format.",
                );
                None
            }
        }
    }

    /// Text of the active conversation's nth message, for the frontend's
    /// clipboard.
    pub fn copy_message(&self, index: usize) -> Option<String> {
        let conv = self
            .state
            .current_conversation_id
            .as_deref()
            .and_then(|id| self.store.get(id))?;
        let msg = conv.messages.get(index)?;
        msg.content.text().map(|t| t.to_string())
    }

    // --- Settings ---

    pub async fn set_sampling(&mut self, temperature: f32, max_tokens: u32) {
        self.settings.temperature = temperature;
        self.settings.max_tokens = max_tokens;
        self.save_settings().await;
        self.notify.notify(ToastLevel::Success, "Settings saved!");
    }

    // --- Internals ---

    async fn sync_store(&self) {
        if let Err(e) = self.store.sync(self.storage.as_ref()).await {
            tracing::error!("failed to persist conversations: {:#}", e);
            self.notify
                .notify(ToastLevel::Warning, "Could not save conversations");
        }
    }

    async fn save_settings(&self) {
        if let Err(e) = SettingsService::save(self.storage.as_ref(), &self.settings).await {
            tracing::error!("failed to save settings: {:#}", e);
        }
    }

    fn render_conversation(&self, id: &str) {
        if let Some(conv) = self.store.get(id) {
            self.render.render_all(&conv.messages);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_busy(&mut self, busy: bool) {
        self.state.busy = busy;
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &ConversationStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::Role;
    use crate::services::SqliteStore;

    #[derive(Default)]
    struct NullRender;

    impl RenderSink for NullRender {
        fn render_all(&self, _messages: &[Message]) {}
        fn update_streaming(&self, _text: &str) {}
        fn scroll_to_bottom(&self) {}
    }

    #[derive(Default)]
    struct RecordingNotify {
        toasts: Mutex<Vec<(ToastLevel, String)>>,
    }

    impl NotificationSink for RecordingNotify {
        fn notify(&self, level: ToastLevel, message: &str) {
            self.toasts.lock().unwrap().push((level, message.to_string()));
        }
    }

    async fn test_app() -> (App, Arc<RecordingNotify>) {
        let client = ApiClient::new("http://127.0.0.1:1/v1").unwrap();
        let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
        let notify = Arc::new(RecordingNotify::default());
        let app = App::new(client, storage, Arc::new(NullRender), notify.clone())
            .await
            .unwrap();
        (app, notify)
    }

    #[tokio::test]
    async fn send_while_busy_is_a_no_op() {
        let (mut app, _notify) = test_app().await;
        let mut store = ConversationStore::new();
        let id = store.create(Some("m1".to_string()), 0.7, 2048);
        app.store = store;
        app.state.current_model = Some("m1".to_string());
        app.state.current_conversation_id = Some(id.clone());
        app.force_busy(true);

        app.send_message("hello", None).await;

        // No user message, no duplicate placeholder.
        assert!(app.store().get(&id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_no_op() {
        let (mut app, _notify) = test_app().await;
        let mut store = ConversationStore::new();
        let id = store.create(Some("m1".to_string()), 0.7, 2048);
        app.store = store;
        app.state.current_model = Some("m1".to_string());
        app.state.current_conversation_id = Some(id.clone());

        app.send_message("hello", None).await;
        assert!(app.store().get(&id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn new_conversation_requires_a_model() {
        let (mut app, notify) = test_app().await;
        assert!(app.new_conversation().await.is_none());
        let toasts = notify.toasts.lock().unwrap();
        assert!(toasts
            .iter()
            .any(|(level, msg)| *level == ToastLevel::Error && msg.contains("model")));
    }

    #[tokio::test]
    async fn import_rejection_creates_no_conversation() {
        let (mut app, notify) = test_app().await;
        let before = app.conversations().len();

        assert!(app.import_conversation("{\"title\":\"x\"}").await.is_none());

        assert_eq!(app.conversations().len(), before);
        let toasts = notify.toasts.lock().unwrap();
        assert!(toasts.iter().any(|(level, _)| *level == ToastLevel::Error));
    }

    #[tokio::test]
    async fn import_creates_and_activates_a_fresh_conversation() {
        let (mut app, _notify) = test_app().await;
        let json = "{\"title\":\"Imported chat\",\"model\":\"m2\",\"messages\":[{\"role\":\"user\",\"content\":\"hi\",\"timestamp\":1}]}";

        let id = app.import_conversation(json).await.unwrap();

        assert_eq!(app.state().current_conversation_id.as_deref(), Some(&*id));
        let conv = app.store().get(&id).unwrap();
        assert_eq!(conv.title, "Imported chat");
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_clears_state() {
        let (mut app, _notify) = test_app().await;
        let json = "{\"messages\":[]}";
        let id = app.import_conversation(json).await.unwrap();
        assert!(app.state().current_conversation_id.is_some());

        app.delete_conversation(&id).await;

        assert!(app.state().current_conversation_id.is_none());
        assert!(app.state().current_model.is_none());
        assert!(app.conversations().is_empty());
    }

    #[tokio::test]
    async fn copy_message_returns_text() {
        let (mut app, _notify) = test_app().await;
        let json = "{\"messages\":[{\"role\":\"user\",\"content\":\"copy me\",\"timestamp\":1}]}";
        app.import_conversation(json).await.unwrap();

        assert_eq!(app.copy_message(0).as_deref(), Some("copy me"));
        assert!(app.copy_message(5).is_none());
    }
}
