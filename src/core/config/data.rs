use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::message::Role;

/// One entry of the conversation a fresh session starts from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct VoiceConfig {
    pub enabled: Option<bool>,
    /// Recording length in seconds
    pub duration_secs: Option<u64>,
    pub input_mime_type: Option<String>,
    pub response_mime_type: Option<String>,
    /// Recorder invocation; `{output}` and `{duration}` are substituted
    pub record_command: Option<String>,
    /// Player invocation; `{input}` is substituted
    pub play_command: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Provider id, used to name the history and key files
    pub provider: Option<String>,
    pub base_url: Option<String>,
    /// Models to rotate through, in order
    #[serde(default)]
    pub models: Vec<String>,
    /// Model used when rotation is off
    pub model_index: Option<usize>,
    pub rotate_models: Option<bool>,
    /// Requests sent to one model before rotating to the next
    pub cycle_size: Option<u32>,
    pub temperature: Option<f32>,
    /// Keep the provider's safety filtering (default on)
    pub safety: Option<bool>,
    pub use_history: Option<bool>,
    /// HTTP(S) proxy URL
    pub proxy: Option<String>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub initial_prompt: Vec<PromptMessage>,
    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/streamchat/config.toml` → `~/.config/streamchat/config.toml`
/// - Windows paths are shown unchanged
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
