use std::path::PathBuf;
use std::time::Duration;

use crate::core::config::data::Config;
use crate::core::constants::{
    DEFAULT_BASE_URL, DEFAULT_CYCLE_SIZE, DEFAULT_MODELS, DEFAULT_PLAY_COMMAND, DEFAULT_PROVIDER,
    DEFAULT_RECORD_COMMAND, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TEMPERATURE,
    DEFAULT_VOICE_DURATION_SECS, DEFAULT_VOICE_INPUT_MIME_TYPE, DEFAULT_VOICE_RESPONSE_MIME_TYPE,
};
use crate::core::message::{Message, Part};
use crate::core::session::SessionOptions;
use crate::core::voice::VoiceSettings;

/// Keys accepted by `set` / `unset`.
pub const SETTABLE_KEYS: [&str; 12] = [
    "provider",
    "base-url",
    "models",
    "model-index",
    "rotate-models",
    "cycle-size",
    "temperature",
    "safety",
    "use-history",
    "proxy",
    "request-timeout",
    "voice",
];

impl Config {
    pub fn provider(&self) -> &str {
        non_blank(self.provider.as_deref()).unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn base_url(&self) -> &str {
        non_blank(self.base_url.as_deref()).unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn models(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        if configured.is_empty() {
            DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            configured
        }
    }

    pub fn model_index(&self) -> usize {
        let count = self.models().len();
        self.model_index.unwrap_or(0).min(count.saturating_sub(1))
    }

    pub fn rotate_models(&self) -> bool {
        self.rotate_models.unwrap_or(true)
    }

    pub fn cycle_size(&self) -> u32 {
        self.cycle_size.unwrap_or(DEFAULT_CYCLE_SIZE).max(1)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_TEMPERATURE)
            .clamp(0.0, 2.0)
    }

    pub fn safety_enabled(&self) -> bool {
        self.safety.unwrap_or(true)
    }

    pub fn use_history(&self) -> bool {
        self.use_history.unwrap_or(true)
    }

    pub fn proxy(&self) -> Option<&str> {
        non_blank(self.proxy.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
                .max(1),
        )
    }

    pub fn initial_history(&self) -> Vec<Message> {
        self.initial_prompt
            .iter()
            .filter(|entry| !entry.text.trim().is_empty())
            .map(|entry| Message::resolved(entry.role, vec![Part::text(entry.text.clone())]))
            .collect()
    }

    pub fn session_options(&self, api_key: Option<String>) -> SessionOptions {
        SessionOptions {
            models: self.models(),
            model_index: self.model_index(),
            rotate_models: self.rotate_models(),
            cycle_size: self.cycle_size(),
            temperature: self.temperature(),
            safety_enabled: self.safety_enabled(),
            use_history: self.use_history(),
            initial_history: self.initial_history(),
            api_key,
        }
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice.enabled.unwrap_or(false)
    }

    pub fn record_command(&self) -> &str {
        non_blank(self.voice.record_command.as_deref()).unwrap_or(DEFAULT_RECORD_COMMAND)
    }

    pub fn play_command(&self) -> &str {
        non_blank(self.voice.play_command.as_deref()).unwrap_or(DEFAULT_PLAY_COMMAND)
    }

    pub fn voice_settings(&self, scratch_dir: PathBuf) -> VoiceSettings {
        VoiceSettings {
            duration: Duration::from_secs(
                self.voice
                    .duration_secs
                    .unwrap_or(DEFAULT_VOICE_DURATION_SECS)
                    .max(1),
            ),
            input_mime_type: non_blank(self.voice.input_mime_type.as_deref())
                .unwrap_or(DEFAULT_VOICE_INPUT_MIME_TYPE)
                .to_string(),
            response_mime_type: non_blank(self.voice.response_mime_type.as_deref())
                .unwrap_or(DEFAULT_VOICE_RESPONSE_MIME_TYPE)
                .to_string(),
            scratch_dir,
        }
    }

    /// Apply `key = value` from the command line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        match key {
            "provider" => self.provider = Some(value.to_string()),
            "base-url" => self.base_url = Some(value.to_string()),
            "models" => {
                self.models = value
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "model-index" => self.model_index = Some(parse_number(key, value)?),
            "rotate-models" => self.rotate_models = Some(parse_switch(key, value)?),
            "cycle-size" => self.cycle_size = Some(parse_number(key, value)?),
            "temperature" => {
                let temperature: f32 = parse_number(key, value)?;
                if !(0.0..=2.0).contains(&temperature) {
                    return Err(format!("temperature must be between 0 and 2, got {value}"));
                }
                self.temperature = Some(temperature);
            }
            "safety" => self.safety = Some(parse_switch(key, value)?),
            "use-history" => self.use_history = Some(parse_switch(key, value)?),
            "proxy" => self.proxy = Some(value.to_string()),
            "request-timeout" => self.request_timeout_secs = Some(parse_number(key, value)?),
            "voice" => self.voice.enabled = Some(parse_switch(key, value)?),
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), String> {
        match key {
            "provider" => self.provider = None,
            "base-url" => self.base_url = None,
            "models" => self.models.clear(),
            "model-index" => self.model_index = None,
            "rotate-models" => self.rotate_models = None,
            "cycle-size" => self.cycle_size = None,
            "temperature" => self.temperature = None,
            "safety" => self.safety = None,
            "use-history" => self.use_history = None,
            "proxy" => self.proxy = None,
            "request-timeout" => self.request_timeout_secs = None,
            "voice" => self.voice.enabled = None,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_switch(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(format!("{key} expects on or off, got '{value}'")),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{key} expects a number, got '{value}'"))
}

fn unknown_key(key: &str) -> String {
    format!(
        "Unknown config key: {key} (expected one of: {})",
        SETTABLE_KEYS.join(", ")
    )
}
