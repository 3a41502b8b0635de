use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;

use crate::core::transport::{ChunkStream, HttpRequest, Transport, TransportError};

/// One canned answer for [`ScriptedTransport`].
pub enum ScriptedResponse {
    Chunks(Vec<Result<Vec<u8>, TransportError>>),
    /// Fail before any body arrives.
    Reject(TransportError),
    /// Chunks fed by the test while the stream is open.
    Live(mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>),
}

impl ScriptedResponse {
    /// One chunk per line, newline-terminated.
    pub fn lines(lines: &[&str]) -> Self {
        ScriptedResponse::Chunks(
            lines
                .iter()
                .map(|line| Ok(format!("{line}\n").into_bytes()))
                .collect(),
        )
    }

    pub fn body(bytes: &[u8]) -> Self {
        ScriptedResponse::Chunks(vec![Ok(bytes.to_vec())])
    }

    pub fn live() -> (Self, mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ScriptedResponse::Live(rx), tx)
    }
}

/// In-memory [`Transport`] that replays scripted responses in order and
/// records every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_stream(&self, request: HttpRequest) -> Result<ChunkStream, TransportError> {
        self.requests.lock().expect("requests lock").push(request);
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(ScriptedResponse::Chunks(chunks)) => Ok(Box::pin(stream::iter(chunks))),
            Some(ScriptedResponse::Reject(err)) => Err(err),
            Some(ScriptedResponse::Live(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            None => Err(TransportError::Connect("no scripted response".into())),
        }
    }
}

/// Lines of a well-formed two-object reply reading "Hi there".
pub const HI_THERE_LINES: [&str; 5] = [
    "[{",
    r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}]}}}]}"#,
    ",\r",
    r#"{"candidates":[{"content":{"parts":[{"text":" there"}]}}}]}"#,
    "]",
];
