use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::api::{Content, WirePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_model(self) -> bool {
        self == Role::Model
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            // Older history files written by OpenAI-style clients use "assistant".
            "model" | "assistant" => Ok(Role::Model),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One content fragment of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Base64 payload carried inline in the request/response body.
    InlineData { mime_type: String, data: String },
    /// Audio that lives in a scratch file on disk (voice turns).
    AudioFile { mime_type: String, path: PathBuf },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text(content.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Wire form of this part; scratch-file audio never leaves the machine.
    pub fn to_wire(&self) -> Option<WirePart> {
        match self {
            Part::Text(text) => Some(WirePart::text(text.clone())),
            Part::InlineData { mime_type, data } => {
                Some(WirePart::inline(mime_type.clone(), data.clone()))
            }
            Part::AudioFile { .. } => None,
        }
    }
}

/// A single conversational turn.
///
/// `thinking` stays true until the first delta (or the stream-open sentinel)
/// arrives; `done` flips once the turn is fully resolved and never reverts.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub thinking: bool,
    pub done: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::resolved(Role::User, vec![Part::text(content)])
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self::resolved(Role::Model, vec![Part::text(content)])
    }

    pub fn resolved(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            thinking: false,
            done: true,
        }
    }

    /// Assistant message appended before any content has arrived.
    pub fn placeholder() -> Self {
        Self {
            role: Role::Model,
            parts: Vec::new(),
            thinking: true,
            done: false,
        }
    }

    /// Concatenation of every textual part.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|part| part.as_text().is_some_and(|text| !text.is_empty()))
    }

    pub fn push_part(&mut self, part: Part) {
        self.thinking = false;
        self.parts.push(part);
    }

    pub fn mark_done(&mut self) {
        self.thinking = false;
        self.done = true;
    }

    /// Request form of the message, or `None` when nothing in it can be sent.
    pub fn to_content(&self) -> Option<Content> {
        let parts: Vec<WirePart> = self.parts.iter().filter_map(Part::to_wire).collect();
        if parts.is_empty() {
            return None;
        }
        Some(Content {
            role: self.role.as_str().to_string(),
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_starts_thinking_and_pending() {
        let message = Message::placeholder();
        assert!(message.thinking);
        assert!(!message.done);
        assert!(message.parts.is_empty());
        assert_eq!(message.role, Role::Model);
    }

    #[test]
    fn pushing_a_part_clears_thinking() {
        let mut message = Message::placeholder();
        message.push_part(Part::text("Hi"));
        message.push_part(Part::text(" there"));
        assert!(!message.thinking);
        assert!(!message.done);
        assert_eq!(message.text(), "Hi there");
    }

    #[test]
    fn text_skips_non_textual_parts() {
        let message = Message::resolved(
            Role::Model,
            vec![
                Part::text("a"),
                Part::InlineData {
                    mime_type: "image/png".into(),
                    data: "AAAA".into(),
                },
                Part::text("b"),
            ],
        );
        assert_eq!(message.text(), "ab");
    }

    #[test]
    fn audio_files_are_not_sent() {
        let message = Message::resolved(
            Role::User,
            vec![Part::AudioFile {
                mime_type: "audio/wav".into(),
                path: PathBuf::from("/tmp/in.wav"),
            }],
        );
        assert!(message.to_content().is_none());
    }

    #[test]
    fn roles_accept_assistant_alias() {
        assert_eq!(Role::try_from("assistant"), Ok(Role::Model));
        assert!(Role::try_from("system").is_err());
    }
}
