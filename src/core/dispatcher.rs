//! Turns session state into outbound requests and pumps response streams
//! back to the session as [`StreamUpdate`]s.
//!
//! Every spawned stream owns its own [`StreamParser`] and reports through an
//! unbounded channel tagged with the session epoch and the index of its
//! placeholder message. The session applies updates from its own control
//! flow, so the message list is never touched from a network task.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{permissive_safety_settings, GenerateRequest, GenerationConfig};
use crate::core::message::{Message, Part};
use crate::core::stream_parser::{LineBuffer, ParseEvent, StreamParser};
use crate::core::transport::{HttpRequest, Transport, TransportError};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::model_method_url;

pub const STREAM_METHOD: &str = "streamGenerateContent";

/// Result of reading one response stream, as seen by the session.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    /// The response started; content may follow.
    Opened,
    Delta(Part),
    /// A failure to surface as visible text. `End` always follows.
    Error(String),
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamUpdate {
    pub epoch: u64,
    pub message_index: usize,
    pub message: StreamMessage,
}

/// Sender bound to one placeholder message.
#[derive(Clone)]
pub struct UpdateSender {
    tx: mpsc::UnboundedSender<StreamUpdate>,
    epoch: u64,
    message_index: usize,
}

impl UpdateSender {
    pub fn new(tx: mpsc::UnboundedSender<StreamUpdate>, epoch: u64, message_index: usize) -> Self {
        Self {
            tx,
            epoch,
            message_index,
        }
    }

    pub fn send(&self, message: StreamMessage) {
        let _ = self.tx.send(StreamUpdate {
            epoch: self.epoch,
            message_index: self.message_index,
            message,
        });
    }

    /// Report a failure and close the turn.
    pub fn fail(&self, text: String) {
        self.send(StreamMessage::Error(text));
        self.send(StreamMessage::End);
    }
}

/// Model selection policy.
///
/// With rotation enabled every `cycle_size` consecutive requests share one
/// model before advancing to the next, wrapping over the model list.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRotation {
    pub models: Vec<String>,
    pub cycle_size: u32,
    pub enabled: bool,
}

impl ModelRotation {
    pub fn model_index(&self, request_count: u64, selected: usize) -> usize {
        let count = self.models.len();
        if count == 0 {
            return 0;
        }
        if !self.enabled {
            return selected.min(count - 1);
        }
        let cycle = u64::from(self.cycle_size.max(1));
        ((request_count / cycle) % count as u64) as usize
    }

    pub fn model(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }
}

/// Serialize history into the request body.
///
/// Messages with nothing sendable (pending placeholders, scratch-file audio)
/// are skipped. The permissive safety list is attached only when safety
/// filtering is disabled.
pub fn build_generate_request(
    history: &[Message],
    temperature: f32,
    safety_enabled: bool,
) -> GenerateRequest {
    GenerateRequest {
        contents: history.iter().filter_map(Message::to_content).collect(),
        safety_settings: (!safety_enabled).then(permissive_safety_settings),
        generation_config: GenerationConfig::text(temperature),
    }
}

pub struct StreamParams {
    pub request: HttpRequest,
    pub sender: UpdateSender,
    pub cancel_token: CancellationToken,
}

#[derive(Clone)]
pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl RequestDispatcher {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn stream_url(&self, model: &str) -> String {
        model_method_url(&self.base_url, model, STREAM_METHOD)
    }

    pub fn prepare_request(
        &self,
        model: &str,
        api_key: &str,
        history: &[Message],
        temperature: f32,
        safety_enabled: bool,
    ) -> Result<HttpRequest, TransportError> {
        let body = build_generate_request(history, temperature, safety_enabled);
        let request = HttpRequest::json(self.stream_url(model), &body)?;
        Ok(add_auth_headers(request, api_key))
    }

    /// Start reading one response stream in the background.
    pub fn spawn_stream(&self, params: StreamParams) {
        let transport = self.transport();
        tokio::spawn(async move {
            let StreamParams {
                request,
                sender,
                cancel_token,
            } = params;

            tokio::select! {
                _ = run_text_stream(transport, request, &sender) => {}
                _ = cancel_token.cancelled() => {
                    debug!("Stream cancelled by session reset");
                }
            }
        });
    }
}

async fn run_text_stream(transport: Arc<dyn Transport>, request: HttpRequest, sender: &UpdateSender) {
    let mut stream = match transport.post_stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            sender.fail(describe_transport_error(&err));
            return;
        }
    };

    let mut lines = LineBuffer::new();
    let mut parser = StreamParser::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for line in lines.push(&bytes) {
                    forward_events(sender, parser.feed_line(&line));
                }
                if parser.is_closed() {
                    break;
                }
            }
            Err(err) => {
                sender.fail(describe_transport_error(&err));
                return;
            }
        }
    }

    if let Some(line) = lines.finish() {
        forward_events(sender, parser.feed_line(&line));
    }
    forward_events(sender, parser.finish());
    sender.send(StreamMessage::End);
}

fn forward_events(sender: &UpdateSender, events: Vec<ParseEvent>) {
    for event in events {
        match event {
            ParseEvent::Opened => sender.send(StreamMessage::Opened),
            ParseEvent::Delta(part) => sender.send(StreamMessage::Delta(part)),
            ParseEvent::Rejected(text) => sender.send(StreamMessage::Delta(Part::Text(text))),
            ParseEvent::Malformed(text) => sender.send(StreamMessage::Error(text)),
            ParseEvent::Closed => {}
        }
    }
}

pub fn describe_transport_error(err: &TransportError) -> String {
    match err {
        TransportError::Status { status, body } => format_api_error(*status, body),
        other => other.to_string(),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .pointer("/0/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Readable text for a non-success HTTP response.
pub fn format_api_error(status: u16, error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return format!("API Error ({status}): <empty response>");
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            return format!("API Error ({status}): {summary}");
        }
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return format!("API Error ({status}):\n```json\n{pretty_json}\n```");
        }
    }

    format!("API Error ({status}):\n```\n{trimmed}\n```")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::utils::test_utils::{ScriptedResponse, ScriptedTransport};

    fn rotation(models: usize, cycle_size: u32, enabled: bool) -> ModelRotation {
        ModelRotation {
            models: (0..models).map(|i| format!("model-{i}")).collect(),
            cycle_size,
            enabled,
        }
    }

    #[test]
    fn rotation_advances_every_cycle() {
        let rotation = rotation(2, 3, true);
        let indices: Vec<usize> = (0..7).map(|count| rotation.model_index(count, 0)).collect();
        assert_eq!(indices, vec![0, 0, 0, 1, 1, 1, 0]);
    }

    #[test]
    fn rotation_visits_every_model_before_wrapping() {
        let rotation = rotation(3, 2, true);
        let indices: Vec<usize> = (0..8).map(|count| rotation.model_index(count, 0)).collect();
        assert_eq!(indices, vec![0, 0, 1, 1, 2, 2, 0, 0]);
    }

    #[test]
    fn disabled_rotation_keeps_selection() {
        let rotation = rotation(2, 3, false);
        assert_eq!(rotation.model_index(0, 1), 1);
        assert_eq!(rotation.model_index(10, 1), 1);
        assert_eq!(rotation.model_index(10, 7), 1);
        let empty = ModelRotation {
            models: Vec::new(),
            cycle_size: 3,
            enabled: true,
        };
        assert_eq!(empty.model_index(4, 0), 0);
    }

    #[test]
    fn safety_list_only_when_disabled() {
        let history = vec![Message::user("hi")];
        assert!(build_generate_request(&history, 0.9, true)
            .safety_settings
            .is_none());
        let relaxed = build_generate_request(&history, 0.9, false);
        assert!(relaxed.safety_settings.is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn pending_placeholders_are_not_serialized() {
        let history = vec![
            Message::user("one"),
            Message::model("two"),
            Message::user("three"),
            Message::placeholder(),
        ];
        let request = build_generate_request(&history, 0.2, true);
        let roles: Vec<&str> = request.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(request.generation_config.temperature, 0.2);
    }

    #[test]
    fn prepare_request_targets_the_model_endpoint() {
        let dispatcher = RequestDispatcher::new(
            Arc::new(ScriptedTransport::default()),
            "https://example.test/v1beta/",
        );
        let request = dispatcher
            .prepare_request("gemini-pro", "k", &[Message::user("hi")], 0.5, true)
            .expect("request");
        assert_eq!(
            request.url,
            "https://example.test/v1beta/models/gemini-pro:streamGenerateContent"
        );
        assert_eq!(request.header("x-goog-api-key"), Some("k"));
        let body: serde_json::Value = serde_json::from_slice(&request.body).expect("json");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
    }

    #[test]
    fn format_api_error_uses_summary() {
        let raw = r#"{"error":{"code":400,"message":"API key not   valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(format_api_error(400, raw), "API Error (400): API key not valid.");
        assert_eq!(format_api_error(502, "  "), "API Error (502): <empty response>");
        assert_eq!(
            format_api_error(500, "upstream failure"),
            "API Error (500):\n```\nupstream failure\n```"
        );
    }

    async fn collect(response: ScriptedResponse) -> Vec<StreamMessage> {
        let transport = Arc::new(ScriptedTransport::new(vec![response]));
        let dispatcher = RequestDispatcher::new(transport, "https://example.test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = dispatcher
            .prepare_request("m", "k", &[Message::user("hi")], 1.0, true)
            .expect("request");
        dispatcher.spawn_stream(StreamParams {
            request,
            sender: UpdateSender::new(tx, 4, 9),
            cancel_token: CancellationToken::new(),
        });

        let mut messages = Vec::new();
        while let Some(update) = rx.recv().await {
            assert_eq!((update.epoch, update.message_index), (4, 9));
            let end = update.message == StreamMessage::End;
            messages.push(update.message);
            if end {
                break;
            }
        }
        messages
    }

    #[tokio::test]
    async fn stream_task_emits_deltas_then_end() {
        let messages = collect(ScriptedResponse::lines(&[
            "[{",
            r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}}]}"#,
            ",\r",
            r#"{"candidates":[{"content":{"parts":[{"text":" there"}]}}}]}"#,
            "]",
        ]))
        .await;
        assert_eq!(
            messages,
            vec![
                StreamMessage::Opened,
                StreamMessage::Delta(Part::text("Hi")),
                StreamMessage::Delta(Part::text(" there")),
                StreamMessage::End,
            ]
        );
    }

    #[tokio::test]
    async fn rejected_requests_become_a_single_error() {
        let messages = collect(ScriptedResponse::Reject(TransportError::Status {
            status: 403,
            body: r#"{"error":{"message":"Permission denied"}}"#.into(),
        }))
        .await;
        assert_eq!(
            messages,
            vec![
                StreamMessage::Error("API Error (403): Permission denied".into()),
                StreamMessage::End,
            ]
        );
    }

    #[tokio::test]
    async fn read_failures_end_the_turn() {
        let messages = collect(ScriptedResponse::Chunks(vec![
            Ok(b"[{\n\"candidates\": [\n".to_vec()),
            Err(TransportError::Read("reset by peer".into())),
        ]))
        .await;
        assert_eq!(messages.first(), Some(&StreamMessage::Opened));
        assert!(matches!(
            messages.get(1),
            Some(StreamMessage::Error(text)) if text.contains("reset by peer")
        ));
        assert_eq!(messages.last(), Some(&StreamMessage::End));
    }

    #[test]
    fn roles_round_trip_through_content() {
        let content = Message::model("x").to_content().expect("content");
        assert_eq!(Role::try_from(content.role.as_str()), Ok(Role::Model));
    }
}
