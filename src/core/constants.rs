//! Shared constants used across the application

pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODELS: [&str; 2] = ["gemini-2.0-flash", "gemini-1.5-flash"];

/// Consecutive requests that share one rotated model.
pub const DEFAULT_CYCLE_SIZE: u32 = 3;
pub const DEFAULT_TEMPERATURE: f32 = 0.9;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_VOICE_DURATION_SECS: u64 = 5;
pub const DEFAULT_VOICE_INPUT_MIME_TYPE: &str = "audio/wav";
pub const DEFAULT_VOICE_RESPONSE_MIME_TYPE: &str = "audio/mpeg";
pub const DEFAULT_RECORD_COMMAND: &str = "arecord -q -f cd -t wav -d {duration} {output}";
pub const DEFAULT_PLAY_COMMAND: &str = "mpg123 -q {input}";

/// Capacity of the session event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
