use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ChatCompletionRequest, StreamEvent, WireMessage};
use crate::ui::{NotificationSink, RenderSink, ToastLevel};

use super::storage::PersistenceStore;
use super::store::ConversationStore;

/// What a failed generation leaves behind in the conversation, so the
/// failure is part of the history rather than just a toast.
pub const ERROR_MARKER: &str = "❌ An error occurred while generating the response.";

/// Visual updates are applied at most once per frame; token accumulation
/// itself is never throttled.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const CHANNEL_CAPACITY: usize = 64;

pub struct GenerationParams {
    pub conversation_id: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Terminal success state, carrying the full accumulated text.
    Completed(String),
    /// Terminal failure state; the trailing message holds the error marker.
    Failed(String),
}

/// One outstanding completion request. Exists only for the duration of the
/// session and owns its accumulator, so a misused second session can never
/// merge text into this one.
struct Session {
    conversation_id: String,
    accumulated: String,
    active: bool,
}

enum Terminal {
    Completed,
    Stopped,
    Failed(String),
}

/// Owns the lifecycle of one streaming completion: issue the request, read
/// frames, accumulate text, keep the store and render sink in step, and
/// always land in a terminal state.
pub struct StreamingEngine {
    client: ApiClient,
    frame_interval: Duration,
}

impl StreamingEngine {
    pub fn new(client: ApiClient) -> Self {
        Self::with_frame_interval(client, FRAME_INTERVAL)
    }

    pub fn with_frame_interval(client: ApiClient, frame_interval: Duration) -> Self {
        Self {
            client,
            frame_interval,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Run one session to a terminal state. The caller must already have
    /// appended the user message and the empty assistant placeholder, and
    /// must hold the busy flag until this returns.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        store: &mut ConversationStore,
        storage: &dyn PersistenceStore,
        render: &dyn RenderSink,
        notify: &dyn NotificationSink,
        params: GenerationParams,
        autoscroll: bool,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let (tx, rx) = mpsc::channel::<StreamEvent>(CHANNEL_CAPACITY);

        match build_request(store, &params) {
            Some(request) => {
                let client = self.client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.stream_chat(request, tx.clone()).await {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    }
                });
            }
            None => {
                let _ = tx
                    .send(StreamEvent::Error(format!(
                        "unknown conversation: {}",
                        params.conversation_id
                    )))
                    .await;
            }
        }

        self.drive(
            rx,
            store,
            storage,
            render,
            notify,
            params.conversation_id,
            autoscroll,
            cancel,
        )
        .await
    }

    /// Consume stream events until a terminal state. Split from [`run`] so
    /// the whole pipeline can be driven headlessly from a channel.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn drive(
        &self,
        mut rx: mpsc::Receiver<StreamEvent>,
        store: &mut ConversationStore,
        storage: &dyn PersistenceStore,
        render: &dyn RenderSink,
        notify: &dyn NotificationSink,
        conversation_id: String,
        autoscroll: bool,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let mut session = Session {
            conversation_id,
            accumulated: String::new(),
            active: true,
        };
        let mut dirty = false;

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let terminal = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Keep whatever arrived before the stop request.
                    if session.accumulated.is_empty() {
                        break Terminal::Failed("generation stopped".to_string());
                    }
                    break Terminal::Stopped;
                }
                _ = ticker.tick() => {
                    if dirty {
                        render.update_streaming(&session.accumulated);
                        if autoscroll {
                            render.scroll_to_bottom();
                        }
                        dirty = false;
                    }
                }
                event = rx.recv() => match event {
                    Some(StreamEvent::Token(token)) => {
                        session.accumulated.push_str(&token);
                        store.set_trailing_assistant_text(
                            &session.conversation_id,
                            &session.accumulated,
                        );
                        dirty = true;
                    }
                    Some(StreamEvent::Done) | None => break Terminal::Completed,
                    Some(StreamEvent::Error(error)) => break Terminal::Failed(error),
                },
            }
        };
        debug_assert!(session.active);
        session.active = false;

        match terminal {
            Terminal::Completed | Terminal::Stopped => {
                store.set_trailing_assistant_text(&session.conversation_id, &session.accumulated);
                self.persist(store, storage, notify).await;
                self.render_full(store, render, &session.conversation_id);
                match terminal {
                    Terminal::Stopped => notify.notify(ToastLevel::Info, "Generation stopped"),
                    _ => notify.notify(ToastLevel::Success, "Response received!"),
                }
                SessionOutcome::Completed(session.accumulated)
            }
            Terminal::Failed(error) => {
                tracing::error!("streaming session failed: {}", error);
                store.set_trailing_assistant_text(&session.conversation_id, ERROR_MARKER);
                self.persist(store, storage, notify).await;
                self.render_full(store, render, &session.conversation_id);
                notify.notify(ToastLevel::Error, "Failed to process the message");
                SessionOutcome::Failed(error)
            }
        }
    }

    /// A storage failure is surfaced but never blocks in-memory state.
    async fn persist(
        &self,
        store: &ConversationStore,
        storage: &dyn PersistenceStore,
        notify: &dyn NotificationSink,
    ) {
        if let Err(e) = store.sync(storage).await {
            tracing::error!("failed to persist conversations: {:#}", e);
            notify.notify(ToastLevel::Warning, "Could not save conversations");
        }
    }

    fn render_full(&self, store: &ConversationStore, render: &dyn RenderSink, id: &str) {
        if let Some(conv) = store.get(id) {
            render.render_all(&conv.messages);
        }
    }
}

/// The request carries the conversation's history excluding the trailing
/// placeholder the caller just appended.
fn build_request(
    store: &ConversationStore,
    params: &GenerationParams,
) -> Option<ChatCompletionRequest> {
    let conv = store.get(&params.conversation_id)?;
    let history = conv
        .messages
        .split_last()
        .map(|(_, rest)| rest)
        .unwrap_or(&[]);

    Some(ChatCompletionRequest {
        model: params.model.clone(),
        messages: history
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect(),
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        stream: true,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::api::sse::parse_sse_stream;
    use crate::models::{Conversation, Message, MessageContent};

    #[derive(Default)]
    struct RecordingRender {
        streaming_updates: Mutex<Vec<String>>,
        full_renders: Mutex<usize>,
        scrolls: Mutex<usize>,
    }

    impl RenderSink for RecordingRender {
        fn render_all(&self, _messages: &[Message]) {
            *self.full_renders.lock().unwrap() += 1;
        }

        fn update_streaming(&self, text: &str) {
            self.streaming_updates.lock().unwrap().push(text.to_string());
        }

        fn scroll_to_bottom(&self) {
            *self.scrolls.lock().unwrap() += 1;
        }
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

    /// Counts whole-record writes so tests can assert on exactly-once
    /// persistence.
    #[derive(Default)]
    struct RecordingStorage {
        writes: Mutex<Vec<Vec<Conversation>>>,
        fail: bool,
    }

    #[async_trait]
    impl PersistenceStore for RecordingStorage {
        async fn load_all(&self) -> Result<Vec<Conversation>> {
            Ok(self.writes.lock().unwrap().last().cloned().unwrap_or_default())
        }

        async fn replace_all(&self, conversations: &[Conversation]) -> Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.writes.lock().unwrap().push(conversations.to_vec());
            Ok(())
        }

        async fn get_setting(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn set_setting(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    fn engine() -> StreamingEngine {
        let client = ApiClient::new("http://127.0.0.1:1/v1").unwrap();
        StreamingEngine::with_frame_interval(client, Duration::from_millis(1))
    }

    fn store_with_exchange(text: &str) -> (ConversationStore, String) {
        let mut store = ConversationStore::new();
        let id = store.create(Some("m1".to_string()), 0.7, 2048);
        store.append_message(&id, Message::user(MessageContent::Plain(text.to_string())));
        store.append_message(&id, Message::assistant_placeholder());
        (store, id)
    }

    fn params(id: &str) -> GenerationParams {
        GenerationParams {
            conversation_id: id.to_string(),
            model: "m1".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    async fn drive_events(
        store: &mut ConversationStore,
        storage: &RecordingStorage,
        render: &RecordingRender,
        notify: &RecordingNotify,
        id: &str,
        events: Vec<StreamEvent>,
    ) -> SessionOutcome {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        engine()
            .drive(
                rx,
                store,
                storage,
                render,
                notify,
                id.to_string(),
                true,
                CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn scenario_text_exchange_reaches_success_exactly_once() {
        let (mut store, id) = store_with_exchange("2+2?");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        // Feed the wire frames through the real parser, as a server would.
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let body: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n\
                            data: [DONE]\n";
        let stream = futures::stream::iter(vec![Ok::<_, std::convert::Infallible>(
            bytes::Bytes::copy_from_slice(body),
        )]);
        parse_sse_stream(stream, tx).await;

        let outcome = engine()
            .drive(
                rx,
                &mut store,
                &storage,
                &render,
                &notify,
                id.clone(),
                true,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, SessionOutcome::Completed("4".to_string()));
        let conv = store.get(&id).unwrap();
        assert_eq!(conv.messages.last().unwrap().content.text(), Some("4"));

        // Exactly one persistence write, carrying the final text.
        let writes = storage.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let persisted = &writes[0][0];
        assert_eq!(persisted.messages.last().unwrap().content.text(), Some("4"));

        let toasts = notify.toasts.lock().unwrap();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].0, ToastLevel::Success);
        assert_eq!(*render.full_renders.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn tokens_accumulate_in_arrival_order() {
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let outcome = drive_events(
            &mut store,
            &storage,
            &render,
            &notify,
            &id,
            vec![
                StreamEvent::Token("a".to_string()),
                StreamEvent::Token("b".to_string()),
                StreamEvent::Token("c".to_string()),
                StreamEvent::Done,
            ],
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Completed("abc".to_string()));
        // Coalesced paints never show stale text: every update is a prefix
        // of the next.
        let updates = render.streaming_updates.lock().unwrap();
        for pair in updates.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn error_replaces_placeholder_with_marker() {
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let outcome = drive_events(
            &mut store,
            &storage,
            &render,
            &notify,
            &id,
            vec![
                StreamEvent::Token("par".to_string()),
                StreamEvent::Error("connection reset".to_string()),
            ],
        )
        .await;

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        let conv = store.get(&id).unwrap();
        assert_eq!(
            conv.messages.last().unwrap().content.text(),
            Some(ERROR_MARKER)
        );
        assert_eq!(storage.writes.lock().unwrap().len(), 1);

        let toasts = notify.toasts.lock().unwrap();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].0, ToastLevel::Error);
    }

    #[tokio::test]
    async fn closed_channel_finalizes_with_accumulated_text() {
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let outcome = drive_events(
            &mut store,
            &storage,
            &render,
            &notify,
            &id,
            vec![StreamEvent::Token("tail".to_string())],
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Completed("tail".to_string()));
        let conv = store.get(&id).unwrap();
        assert_eq!(conv.messages.last().unwrap().content.text(), Some("tail"));
    }

    #[tokio::test]
    async fn cancellation_before_any_token_fails_the_session() {
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let (_tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine()
            .drive(
                rx,
                &mut store,
                &storage,
                &render,
                &notify,
                id.clone(),
                false,
                cancel,
            )
            .await;

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        let conv = store.get(&id).unwrap();
        assert_eq!(
            conv.messages.last().unwrap().content.text(),
            Some(ERROR_MARKER)
        );
    }

    #[tokio::test]
    async fn persistence_failure_is_surfaced_but_not_fatal() {
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage {
            fail: true,
            ..Default::default()
        };
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let outcome = drive_events(
            &mut store,
            &storage,
            &render,
            &notify,
            &id,
            vec![StreamEvent::Token("ok".to_string()), StreamEvent::Done],
        )
        .await;

        // In-memory state keeps the text even though the write failed.
        assert_eq!(outcome, SessionOutcome::Completed("ok".to_string()));
        let toasts = notify.toasts.lock().unwrap();
        assert!(toasts
            .iter()
            .any(|(level, _)| *level == ToastLevel::Warning));
        assert!(toasts
            .iter()
            .any(|(level, _)| *level == ToastLevel::Success));
    }

    #[tokio::test]
    async fn connectivity_failure_reaches_terminal_failure() {
        // Nothing listens on port 1, so the request itself fails and the
        // placeholder must still end up holding the error marker.
        let (mut store, id) = store_with_exchange("hi");
        let storage = RecordingStorage::default();
        let render = RecordingRender::default();
        let notify = RecordingNotify::default();

        let outcome = engine()
            .run(
                &mut store,
                &storage,
                &render,
                &notify,
                params(&id),
                false,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        let conv = store.get(&id).unwrap();
        assert_eq!(
            conv.messages.last().unwrap().content.text(),
            Some(ERROR_MARKER)
        );
    }
}
