//! Wires configuration, credentials and transports into a [`Session`].

use std::error::Error;
use std::sync::Arc;

use tracing::debug;

use crate::core::config::{AppDirs, Config};
use crate::core::credentials::CredentialStore;
use crate::core::dispatcher::RequestDispatcher;
use crate::core::history::HistoryStore;
use crate::core::session::Session;
use crate::core::transport::{ReqwestTransport, Transport};
use crate::core::voice::{CommandAudioBackend, VoiceBridge};

/// Command-line flags that shadow config values for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOverrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub no_history: bool,
}

impl SessionOverrides {
    /// Apply to an in-memory copy; the file on disk is left alone.
    pub fn apply(&self, config: &mut Config) {
        if let Some(model) = self.model.as_deref().map(str::trim) {
            if !model.is_empty() {
                config.models = vec![model.to_string()];
                config.model_index = None;
                config.rotate_models = Some(false);
            }
        }
        if let Some(temperature) = self.temperature {
            config.temperature = Some(temperature);
        }
        if self.no_history {
            config.use_history = Some(false);
        }
    }
}

pub fn build_session(overrides: &SessionOverrides) -> Result<Session, Box<dyn Error>> {
    let mut config = Config::load()?;
    overrides.apply(&mut config);
    let dirs = AppDirs::discover()?;

    let api_key = CredentialStore::new(dirs.credential_path(config.provider())).resolve()?;
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(
        config.proxy(),
        config.request_timeout(),
    )?);
    let dispatcher = RequestDispatcher::new(transport.clone(), config.base_url());
    let store = HistoryStore::new(dirs.history_path(config.provider()));
    debug!(
        provider = config.provider(),
        history = %store.path().display(),
        "Building session"
    );

    let session = Session::new(config.session_options(api_key), dispatcher, Some(store));
    if !config.voice_enabled() {
        return Ok(session);
    }

    let backend = Arc::new(CommandAudioBackend::new(
        config.record_command(),
        config.play_command(),
    ));
    let settings = config.voice_settings(dirs.voice_scratch_dir());
    Ok(session.with_voice(VoiceBridge::new(transport, backend, settings)))
}
