//! Durable conversation history.
//!
//! One JSON file per provider holding `[{"role": .., "parts": [{"text": ..}]}]`.
//! Only textual parts are written; transient turn state never reaches disk.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::config::data::path_display;
use crate::core::message::{Message, Part, Role};

#[derive(Debug)]
pub enum HistoryError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Encode(serde_json::Error),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::Read { path, source } => {
                write!(f, "Failed to read history at {}: {}", path_display(path), source)
            }
            HistoryError::Parse { path, source } => {
                write!(f, "Failed to parse history at {}: {}", path_display(path), source)
            }
            HistoryError::Write { path, source } => {
                write!(f, "Failed to write history at {}: {}", path_display(path), source)
            }
            HistoryError::Encode(source) => write!(f, "Failed to encode history: {source}"),
        }
    }
}

impl StdError for HistoryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            HistoryError::Read { source, .. } | HistoryError::Write { source, .. } => Some(source),
            HistoryError::Parse { source, .. } => Some(source),
            HistoryError::Encode(source) => Some(source),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct StoredMessage {
    role: Role,
    parts: Vec<StoredPart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct StoredPart {
    text: String,
}

impl StoredMessage {
    /// Every message is kept so the `(role, text)` sequence survives a reload;
    /// one without text is written with a single empty part.
    fn from_message(message: &Message) -> Self {
        let mut parts: Vec<StoredPart> = message
            .parts
            .iter()
            .filter_map(Part::as_text)
            .filter(|text| !text.is_empty())
            .map(|text| StoredPart {
                text: text.to_string(),
            })
            .collect();
        if parts.is_empty() {
            parts.push(StoredPart {
                text: String::new(),
            });
        }
        Self {
            role: message.role,
            parts,
        }
    }

    fn into_message(self) -> Message {
        Message::resolved(
            self.role,
            self.parts
                .into_iter()
                .filter(|part| !part.text.is_empty())
                .map(|part| Part::Text(part.text))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no history has been written yet.
    pub fn load(&self) -> Result<Option<Vec<Message>>, HistoryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| HistoryError::Read {
            path: self.path.clone(),
            source,
        })?;
        let stored: Vec<StoredMessage> =
            serde_json::from_str(&contents).map_err(|source| HistoryError::Parse {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %path_display(&self.path), messages = stored.len(), "Loaded history");
        Ok(Some(
            stored.into_iter().map(StoredMessage::into_message).collect(),
        ))
    }

    /// Write the textual form of `messages`.
    pub fn save(&self, messages: &[Message]) -> Result<(), HistoryError> {
        let stored: Vec<StoredMessage> = messages.iter().map(StoredMessage::from_message).collect();
        let contents = serde_json::to_string_pretty(&stored).map_err(HistoryError::Encode)?;

        let write_err = |source| HistoryError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = self.path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;
        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        debug!(path = %path_display(&self.path), messages = stored.len(), "Saved history");
        Ok(())
    }
}

enum WriteJob {
    Save(Vec<Message>),
    Flush(oneshot::Sender<()>),
}

/// Saves history off the async runtime, one write at a time and in the order
/// they were requested.
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl HistoryWriter {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: HistoryStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    WriteJob::Save(messages) => {
                        let store = store.clone();
                        match tokio::task::spawn_blocking(move || store.save(&messages)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => warn!("{err}"),
                            Err(err) => warn!("History write task failed: {err}"),
                        }
                    }
                    WriteJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue a snapshot for writing.
    pub fn save(&self, messages: Vec<Message>) {
        if self.tx.send(WriteJob::Save(messages)).is_err() {
            warn!("History writer has stopped; dropping save");
        }
    }

    /// Wait until every save queued before this call has hit the disk.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriteJob::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
