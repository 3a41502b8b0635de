//! The conversation session owned by the hosting application.
//!
//! All mutation of the message list happens on the caller's control flow:
//! network tasks only report [`StreamUpdate`]s through a channel, and the host
//! applies them with [`Session::next_update`], [`Session::process_pending`] or
//! [`Session::run_until_idle`]. Every turn is tagged with the session epoch;
//! [`Session::clear`] and [`Session::load_history`] advance it so updates from
//! superseded streams are dropped.

use std::error::Error as StdError;
use std::fmt;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::constants::{
    DEFAULT_CYCLE_SIZE, DEFAULT_MODELS, DEFAULT_TEMPERATURE, EVENT_CHANNEL_CAPACITY,
};
use crate::core::dispatcher::{
    ModelRotation, RequestDispatcher, StreamMessage, StreamParams, StreamUpdate, UpdateSender,
};
use crate::core::history::{HistoryStore, HistoryWriter};
use crate::core::message::{Message, Part, Role};
use crate::core::voice::{VoiceBridge, VoiceParams};

/// Fully resolved settings injected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub models: Vec<String>,
    /// Model used when rotation is disabled.
    pub model_index: usize,
    pub rotate_models: bool,
    pub cycle_size: u32,
    pub temperature: f32,
    pub safety_enabled: bool,
    pub use_history: bool,
    /// History used when nothing is persisted and after `clear()`.
    pub initial_history: Vec<Message>,
    pub api_key: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            model_index: 0,
            rotate_models: true,
            cycle_size: DEFAULT_CYCLE_SIZE,
            temperature: DEFAULT_TEMPERATURE,
            safety_enabled: true,
            use_history: true,
            initial_history: Vec::new(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended { index: usize },
    DeltaReceived { index: usize, part: Part },
    TurnCompleted { index: usize },
    HistoryCleared,
    /// A send was refused because no API key is configured.
    CredentialMissing,
}

/// Indices of the messages a send appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnHandle {
    pub epoch: u64,
    /// `None` for voice turns, which append only the reply placeholder.
    pub user_index: Option<usize>,
    pub reply_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    MissingCredential,
    EmptyMessage,
    VoiceUnavailable,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::MissingCredential => write!(f, "No API key is configured"),
            SendError::EmptyMessage => write!(f, "Message is empty"),
            SendError::VoiceUnavailable => write!(f, "Voice input is not enabled"),
        }
    }
}

impl StdError for SendError {}

pub struct Session {
    messages: Vec<Message>,
    rotation: ModelRotation,
    selected_model: usize,
    request_count: u64,
    temperature: f32,
    safety_enabled: bool,
    use_history: bool,
    initial_history: Vec<Message>,
    api_key: Option<String>,
    epoch: u64,
    cancel_token: CancellationToken,
    in_flight: usize,
    dispatcher: RequestDispatcher,
    store: Option<HistoryStore>,
    writer: Option<HistoryWriter>,
    voice: Option<VoiceBridge>,
    updates_tx: mpsc::UnboundedSender<StreamUpdate>,
    updates_rx: mpsc::UnboundedReceiver<StreamUpdate>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Build a session and, when history is enabled, load it from `store`.
    pub fn new(
        options: SessionOptions,
        dispatcher: RequestDispatcher,
        store: Option<HistoryStore>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let api_key = options
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let mut session = Self {
            messages: Vec::new(),
            rotation: ModelRotation {
                models: options.models,
                cycle_size: options.cycle_size,
                enabled: options.rotate_models,
            },
            selected_model: options.model_index,
            request_count: 0,
            temperature: options.temperature,
            safety_enabled: options.safety_enabled,
            use_history: options.use_history,
            initial_history: options.initial_history,
            api_key,
            epoch: 0,
            cancel_token: CancellationToken::new(),
            in_flight: 0,
            dispatcher,
            store,
            writer: None,
            voice: None,
            updates_tx,
            updates_rx,
            events,
        };

        if session.use_history {
            session.load_history();
        } else {
            session.messages = session.initial_history.clone();
        }
        session
    }

    pub fn with_voice(mut self, voice: VoiceBridge) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replace the message list with the persisted history.
    ///
    /// An absent or unreadable store falls back to the initial history.
    /// Enables history for the rest of the session.
    pub fn load_history(&mut self) {
        self.supersede_streams();
        self.use_history = true;

        let loaded = match &self.store {
            Some(store) => match store.load() {
                Ok(history) => history,
                Err(err) => {
                    warn!("{err}; starting from the initial history");
                    None
                }
            },
            None => None,
        };
        self.messages = match loaded {
            Some(history) => {
                info!(messages = history.len(), "Restored conversation history");
                history
            }
            None => self.initial_history.clone(),
        };
    }

    /// Append the user message and a reply placeholder, then stream the reply
    /// in the background. Returns before any network I/O happens.
    pub fn send(&mut self, text: &str) -> Result<TurnHandle, SendError> {
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let api_key = self.require_credential()?;

        let user_index = self.append(Message::user(text));
        let model = self.next_model();
        let request = self.dispatcher.prepare_request(
            &model,
            &api_key,
            &self.messages,
            self.temperature,
            self.safety_enabled,
        );
        let reply_index = self.append(Message::placeholder());
        let sender = self.sender_for(reply_index);

        debug!(model = %model, epoch = self.epoch, reply_index, "Dispatching turn");
        match request {
            Ok(request) => self.dispatcher.spawn_stream(StreamParams {
                request,
                sender,
                cancel_token: self.cancel_token.clone(),
            }),
            Err(err) => sender.fail(err.to_string()),
        }

        Ok(TurnHandle {
            epoch: self.epoch,
            user_index: Some(user_index),
            reply_index,
        })
    }

    /// Record a clip and stream an audio reply into a new placeholder.
    pub fn send_voice(&mut self) -> Result<TurnHandle, SendError> {
        let Some(voice) = self.voice.clone() else {
            return Err(SendError::VoiceUnavailable);
        };
        let api_key = self.require_credential()?;

        let model = self.next_model();
        let reply_index = self.append(Message::placeholder());
        debug!(model = %model, epoch = self.epoch, reply_index, "Dispatching voice turn");
        voice.spawn_turn(VoiceParams {
            url: self.dispatcher.stream_url(&model),
            api_key,
            temperature: self.temperature,
            safety_enabled: self.safety_enabled,
            sender: self.sender_for(reply_index),
            cancel_token: self.cancel_token.clone(),
        });

        Ok(TurnHandle {
            epoch: self.epoch,
            user_index: None,
            reply_index,
        })
    }

    /// Reset to the initial history and stop every in-flight stream.
    pub fn clear(&mut self) {
        self.supersede_streams();
        self.messages = self.initial_history.clone();
        self.save_history();
        self.emit(SessionEvent::HistoryCleared);
    }

    /// Wait for one stream update and apply it.
    ///
    /// Never resolves while nothing is in flight; check [`Session::is_idle`]
    /// first or use [`Session::run_until_idle`].
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        let update = self.updates_rx.recv().await?;
        self.apply_update(update.clone());
        Some(update)
    }

    /// Wait for queued history writes to reach the disk.
    pub async fn flush_history(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    /// Apply every update that has already arrived. Returns how many were read.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(update) = self.updates_rx.try_recv() {
            self.apply_update(update);
            processed += 1;
        }
        processed
    }

    /// Apply updates until every current-epoch turn is done.
    pub async fn run_until_idle(&mut self) {
        while self.in_flight > 0 {
            if self.next_update().await.is_none() {
                break;
            }
        }
    }

    fn apply_update(&mut self, update: StreamUpdate) {
        if update.epoch != self.epoch {
            debug!(
                stale_epoch = update.epoch,
                epoch = self.epoch,
                "Dropping update from superseded stream"
            );
            return;
        }
        let index = update.message_index;
        let Some(message) = self.messages.get_mut(index) else {
            warn!(index, "Update for unknown message");
            return;
        };
        if message.done {
            debug!(index, "Dropping update for finished message");
            return;
        }

        match update.message {
            StreamMessage::Opened => message.thinking = false,
            StreamMessage::Delta(part) => {
                message.push_part(part.clone());
                self.emit(SessionEvent::DeltaReceived { index, part });
            }
            StreamMessage::Error(text) => {
                let text = if message.has_text() {
                    format!("\n\n{text}")
                } else {
                    text
                };
                let part = Part::Text(text);
                message.push_part(part.clone());
                self.emit(SessionEvent::DeltaReceived { index, part });
            }
            StreamMessage::End => {
                message.mark_done();
                self.in_flight = self.in_flight.saturating_sub(1);
                self.save_history();
                self.emit(SessionEvent::TurnCompleted { index });
            }
        }
    }

    fn require_credential(&self) -> Result<String, SendError> {
        match &self.api_key {
            Some(key) => Ok(key.clone()),
            None => {
                warn!("Send refused: no API key configured");
                self.emit(SessionEvent::CredentialMissing);
                Err(SendError::MissingCredential)
            }
        }
    }

    /// Model for the request about to be issued. Only rotated requests are
    /// counted, so turning rotation on starts from the first model.
    fn next_model(&mut self) -> String {
        let index = self.model_index();
        if self.rotation.enabled {
            self.request_count += 1;
        }
        self.rotation.model(index).unwrap_or_default().to_string()
    }

    fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        let index = self.messages.len() - 1;
        self.emit(SessionEvent::MessageAppended { index });
        index
    }

    fn sender_for(&mut self, message_index: usize) -> UpdateSender {
        self.in_flight += 1;
        UpdateSender::new(self.updates_tx.clone(), self.epoch, message_index)
    }

    fn supersede_streams(&mut self) {
        self.epoch += 1;
        self.cancel_token.cancel();
        self.cancel_token = CancellationToken::new();
        self.in_flight = 0;
    }

    /// Inside a runtime the write is queued on a [`HistoryWriter`]; without
    /// one it happens inline.
    fn save_history(&mut self) {
        if !self.use_history {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        if self.writer.is_none() && tokio::runtime::Handle::try_current().is_ok() {
            self.writer = Some(HistoryWriter::spawn(store.clone()));
        }
        match &self.writer {
            Some(writer) => writer.save(self.messages.clone()),
            None => {
                if let Err(err) = store.save(&self.messages) {
                    warn!("{err}");
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True when no current-epoch turn is waiting for its reply.
    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// `(role, text)` for every message.
    pub fn transcript(&self) -> Vec<(Role, String)> {
        self.messages
            .iter()
            .map(|message| (message.role, message.text()))
            .collect()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Index of the model the next request will use.
    pub fn model_index(&self) -> usize {
        self.rotation.model_index(self.request_count, self.selected_model)
    }

    pub fn model_name(&self) -> Option<&str> {
        self.rotation.model(self.model_index())
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = temperature;
    }

    pub fn safety_enabled(&self) -> bool {
        self.safety_enabled
    }

    pub fn set_safety_enabled(&mut self, enabled: bool) {
        self.safety_enabled = enabled;
    }

    pub fn use_history(&self) -> bool {
        self.use_history
    }

    /// Enabling history reloads it from the store.
    pub fn set_use_history(&mut self, enabled: bool) {
        if enabled && !self.use_history {
            self.load_history();
        }
        self.use_history = enabled;
    }

    pub fn rotate_models(&self) -> bool {
        self.rotation.enabled
    }

    pub fn set_rotate_models(&mut self, enabled: bool) {
        self.rotation.enabled = enabled;
    }

    /// Pin the model used when rotation is off. Returns false for an unknown index.
    pub fn select_model(&mut self, index: usize) -> bool {
        if index >= self.rotation.models.len() {
            return false;
        }
        self.selected_model = index;
        true
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn set_credential(&mut self, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        self.api_key = (!key.is_empty()).then_some(key);
    }
}
