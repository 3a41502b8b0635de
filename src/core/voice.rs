//! Voice turns: record a clip, send it inline, play back the audio reply.
//!
//! The reply body is opaque binary. It is accumulated whole and written to a
//! scratch file; there is no line framing on this path.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{permissive_safety_settings, Content, GenerateRequest, GenerationConfig, WirePart};
use crate::core::config::data::path_display;
use crate::core::dispatcher::{describe_transport_error, StreamMessage, UpdateSender};
use crate::core::message::{Part, Role};
use crate::core::transport::{HttpRequest, Transport, TransportError};
use crate::utils::auth::add_auth_headers;

pub const INPUT_FILE_STEM: &str = "voice_input";
pub const OUTPUT_FILE_STEM: &str = "response_audio";

#[derive(Debug)]
pub enum VoiceError {
    /// The recorder or player could not be started or exited unsuccessfully.
    Command { program: String, detail: String },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Transport(TransportError),
    EmptyRecording,
    EmptyResponse,
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Command { program, detail } => write!(f, "{program}: {detail}"),
            VoiceError::Io { path, source } => {
                write!(f, "Audio file error at {}: {}", path_display(path), source)
            }
            VoiceError::Transport(err) => write!(f, "{}", describe_transport_error(err)),
            VoiceError::EmptyRecording => write!(f, "Recording produced no audio"),
            VoiceError::EmptyResponse => write!(f, "The voice reply contained no audio"),
        }
    }
}

impl StdError for VoiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            VoiceError::Io { source, .. } => Some(source),
            VoiceError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for VoiceError {
    fn from(err: TransportError) -> Self {
        VoiceError::Transport(err)
    }
}

/// Microphone capture and speaker playback.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn record(&self, output: &Path, duration: Duration) -> Result<(), VoiceError>;
    async fn play(&self, input: &Path) -> Result<(), VoiceError>;
}

/// [`AudioBackend`] that shells out to external recorder and player programs.
///
/// Templates are split on whitespace; `{output}`, `{duration}` and `{input}`
/// are substituted per argument.
#[derive(Debug, Clone)]
pub struct CommandAudioBackend {
    record_command: String,
    play_command: String,
}

impl CommandAudioBackend {
    pub fn new(record_command: impl Into<String>, play_command: impl Into<String>) -> Self {
        Self {
            record_command: record_command.into(),
            play_command: play_command.into(),
        }
    }

    async fn run(template: &str, substitutions: &[(&str, String)]) -> Result<(), VoiceError> {
        let argv = expand_template(template, substitutions);
        let Some((program, args)) = argv.split_first() else {
            return Err(VoiceError::Command {
                program: String::new(),
                detail: "empty command".to_string(),
            });
        };

        debug!(program = %program, ?args, "Running audio command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| VoiceError::Command {
                program: program.clone(),
                detail: err.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                format!("exited with {}: {stderr}", output.status)
            };
            return Err(VoiceError::Command {
                program: program.clone(),
                detail,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for CommandAudioBackend {
    async fn record(&self, output: &Path, duration: Duration) -> Result<(), VoiceError> {
        Self::run(
            &self.record_command,
            &[
                ("{output}", output.display().to_string()),
                ("{duration}", duration.as_secs().max(1).to_string()),
            ],
        )
        .await
    }

    async fn play(&self, input: &Path) -> Result<(), VoiceError> {
        Self::run(&self.play_command, &[("{input}", input.display().to_string())]).await
    }
}

fn expand_template(template: &str, substitutions: &[(&str, String)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.to_string(), |acc, (placeholder, value)| {
                    acc.replace(placeholder, value)
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub duration: Duration,
    pub input_mime_type: String,
    pub response_mime_type: String,
    pub scratch_dir: PathBuf,
}

impl VoiceSettings {
    pub fn input_path(&self) -> PathBuf {
        self.scratch_dir
            .join(format!("{INPUT_FILE_STEM}.{}", extension_for(&self.input_mime_type)))
    }

    pub fn output_path(&self) -> PathBuf {
        self.scratch_dir
            .join(format!("{OUTPUT_FILE_STEM}.{}", extension_for(&self.response_mime_type)))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        _ => "bin",
    }
}

/// Per-turn inputs supplied by the session.
pub struct VoiceParams {
    pub url: String,
    pub api_key: String,
    pub temperature: f32,
    pub safety_enabled: bool,
    pub sender: UpdateSender,
    pub cancel_token: CancellationToken,
}

#[derive(Clone)]
pub struct VoiceBridge {
    transport: Arc<dyn Transport>,
    backend: Arc<dyn AudioBackend>,
    settings: VoiceSettings,
}

impl VoiceBridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        backend: Arc<dyn AudioBackend>,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            transport,
            backend,
            settings,
        }
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    /// Run one voice turn in the background.
    pub fn spawn_turn(&self, params: VoiceParams) {
        let bridge = self.clone();
        tokio::spawn(async move {
            let cancel_token = params.cancel_token.clone();
            tokio::select! {
                _ = bridge.run_turn(params) => {}
                _ = cancel_token.cancelled() => {
                    debug!("Voice turn cancelled by session reset");
                }
            }
        });
    }

    async fn run_turn(&self, params: VoiceParams) {
        let sender = params.sender.clone();
        let output = match self.exchange(&params).await {
            Ok(path) => path,
            Err(err) => {
                sender.fail(err.to_string());
                return;
            }
        };

        sender.send(StreamMessage::Delta(Part::AudioFile {
            mime_type: self.settings.response_mime_type.clone(),
            path: output.clone(),
        }));
        match self.backend.play(&output).await {
            Ok(()) => sender.send(StreamMessage::End),
            Err(err) => sender.fail(format!("Playback failed: {err}")),
        }
    }

    /// Record, send, and store the reply. Returns the reply file path.
    async fn exchange(&self, params: &VoiceParams) -> Result<PathBuf, VoiceError> {
        let input = self.settings.input_path();
        create_scratch_dir(&self.settings.scratch_dir).await?;
        self.backend.record(&input, self.settings.duration).await?;

        let audio = tokio::fs::read(&input).await.map_err(|source| VoiceError::Io {
            path: input.clone(),
            source,
        })?;
        if audio.is_empty() {
            return Err(VoiceError::EmptyRecording);
        }
        debug!(bytes = audio.len(), "Recorded voice clip");

        let request = self.build_request(params, &audio)?;
        let mut stream = self.transport.post_stream(request).await?;
        params.sender.send(StreamMessage::Opened);

        let mut reply = Vec::new();
        while let Some(chunk) = stream.next().await {
            reply.extend_from_slice(&chunk?);
        }
        if reply.is_empty() {
            return Err(VoiceError::EmptyResponse);
        }

        let output = self.settings.output_path();
        tokio::fs::write(&output, &reply)
            .await
            .map_err(|source| VoiceError::Io {
                path: output.clone(),
                source,
            })?;
        info!(path = %path_display(&output), bytes = reply.len(), "Stored voice reply");
        Ok(output)
    }

    fn build_request(&self, params: &VoiceParams, audio: &[u8]) -> Result<HttpRequest, VoiceError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
        let body = GenerateRequest {
            contents: vec![Content {
                role: Role::User.as_str().to_string(),
                parts: vec![WirePart::inline(&self.settings.input_mime_type, encoded)],
            }],
            safety_settings: (!params.safety_enabled).then(permissive_safety_settings),
            generation_config: GenerationConfig {
                temperature: params.temperature,
                response_mime_type: Some(self.settings.response_mime_type.clone()),
            },
        };
        let request = HttpRequest::json(params.url.clone(), &body)?;
        Ok(add_auth_headers(request, &params.api_key))
    }
}

async fn create_scratch_dir(dir: &Path) -> Result<(), VoiceError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| VoiceError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::StreamUpdate;
    use crate::utils::test_utils::{ScriptedResponse, ScriptedTransport};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeBackend {
        clip: Vec<u8>,
        played: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        async fn record(&self, output: &Path, _duration: Duration) -> Result<(), VoiceError> {
            tokio::fs::write(output, &self.clip)
                .await
                .map_err(|source| VoiceError::Io {
                    path: output.to_path_buf(),
                    source,
                })
        }

        async fn play(&self, input: &Path) -> Result<(), VoiceError> {
            self.played.lock().expect("played lock").push(input.to_path_buf());
            Ok(())
        }
    }

    fn settings(dir: &TempDir) -> VoiceSettings {
        VoiceSettings {
            duration: Duration::from_secs(5),
            input_mime_type: "audio/wav".into(),
            response_mime_type: "audio/mpeg".into(),
            scratch_dir: dir.path().join("voice"),
        }
    }

    async fn run(bridge: &VoiceBridge, safety_enabled: bool) -> Vec<StreamMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamUpdate>();
        bridge.spawn_turn(VoiceParams {
            url: "https://example.test/models/m:streamGenerateContent".into(),
            api_key: "k".into(),
            temperature: 0.7,
            safety_enabled,
            sender: UpdateSender::new(tx, 0, 1),
            cancel_token: CancellationToken::new(),
        });
        let mut messages = Vec::new();
        while let Some(update) = rx.recv().await {
            let end = update.message == StreamMessage::End;
            messages.push(update.message);
            if end {
                break;
            }
        }
        messages
    }

    #[tokio::test]
    async fn reply_bytes_are_accumulated_and_played() {
        let dir = TempDir::new().expect("temp dir");
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedResponse::Chunks(vec![
            Ok(b"ID3".to_vec()),
            Ok(b"\n\x00\xff".to_vec()),
            Ok(b"tail".to_vec()),
        ])]));
        let backend = Arc::new(FakeBackend {
            clip: b"RIFFwave".to_vec(),
            ..Default::default()
        });
        let bridge = VoiceBridge::new(transport.clone(), backend.clone(), settings(&dir));

        let messages = run(&bridge, false).await;
        let output = bridge.settings().output_path();
        assert_eq!(
            messages,
            vec![
                StreamMessage::Opened,
                StreamMessage::Delta(Part::AudioFile {
                    mime_type: "audio/mpeg".into(),
                    path: output.clone(),
                }),
                StreamMessage::End,
            ]
        );
        assert_eq!(
            std::fs::read(&output).expect("reply file"),
            b"ID3\n\x00\xfftail".to_vec()
        );
        assert_eq!(*backend.played.lock().expect("played lock"), vec![output]);

        let requests = transport.requests();
        let body: serde_json::Value =
            serde_json::from_slice(&requests[0].body).expect("request json");
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"RIFFwave");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], encoded.as_str());
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "audio/wav");
        assert_eq!(body["generationConfig"]["responseMimeType"], "audio/mpeg");
        assert!(body["safetySettings"].is_array());
        assert_eq!(requests[0].header("x-goog-api-key"), Some("k"));
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_text() {
        let dir = TempDir::new().expect("temp dir");
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedResponse::Reject(
            TransportError::Connect("dns failure".into()),
        )]));
        let backend = Arc::new(FakeBackend {
            clip: b"RIFF".to_vec(),
            ..Default::default()
        });
        let bridge = VoiceBridge::new(transport, backend.clone(), settings(&dir));

        let messages = run(&bridge, true).await;
        assert!(matches!(
            messages.first(),
            Some(StreamMessage::Error(text)) if text.contains("dns failure")
        ));
        assert_eq!(messages.last(), Some(&StreamMessage::End));
        assert!(backend.played.lock().expect("played lock").is_empty());
    }

    #[tokio::test]
    async fn empty_recording_is_not_sent() {
        let dir = TempDir::new().expect("temp dir");
        let transport = Arc::new(ScriptedTransport::default());
        let bridge = VoiceBridge::new(
            transport.clone(),
            Arc::new(FakeBackend::default()),
            settings(&dir),
        );

        let messages = run(&bridge, true).await;
        assert_eq!(
            messages,
            vec![
                StreamMessage::Error("Recording produced no audio".into()),
                StreamMessage::End,
            ]
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn templates_substitute_per_argument() {
        let argv = expand_template(
            "arecord -q -d {duration} {output}",
            &[
                ("{output}", "/tmp/in.wav".to_string()),
                ("{duration}", "5".to_string()),
            ],
        );
        assert_eq!(argv, vec!["arecord", "-q", "-d", "5", "/tmp/in.wav"]);
    }

    #[test]
    fn scratch_files_follow_mime_types() {
        let dir = TempDir::new().expect("temp dir");
        let settings = settings(&dir);
        assert!(settings.input_path().ends_with("voice_input.wav"));
        assert!(settings.output_path().ends_with("response_audio.mp3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_commands_report_status() {
        let backend = CommandAudioBackend::new("false {output}", "true {input}");
        let err = backend
            .record(Path::new("/tmp/unused.wav"), Duration::from_secs(1))
            .await
            .expect_err("false exits non-zero");
        assert!(matches!(err, VoiceError::Command { ref program, .. } if program == "false"));
        backend
            .play(Path::new("/tmp/unused.mp3"))
            .await
            .expect("true succeeds");
    }
}
