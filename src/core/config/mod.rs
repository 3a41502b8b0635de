pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;

pub use data::{Config, PromptMessage, VoiceConfig};
pub use io::{AppDirs, ConfigError};
