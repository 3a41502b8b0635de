//! One-shot "say" and "voice" commands

use std::error::Error;
use std::io::{self, Write};

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::core::config::data::path_display;
use crate::core::credentials::API_KEY_ENV;
use crate::core::dispatcher::StreamMessage;
use crate::core::message::Part;
use crate::core::session::{SendError, Session, SessionEvent, TurnHandle};

/// How a streamed reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Completed,
    Failed,
}

pub async fn run_say(mut session: Session, prompt: String) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        eprintln!("Usage: streamchat say <prompt>");
        std::process::exit(1);
    }

    let mut events = session.subscribe();
    let handle = match session.send(&prompt) {
        Ok(handle) => handle,
        Err(err) => exit_on_send_error(err),
    };
    let outcome = print_reply(&mut session, &mut events, handle).await?;
    session.flush_history().await;
    if outcome == ReplyOutcome::Failed {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run_voice(mut session: Session) -> Result<(), Box<dyn Error>> {
    let mut events = session.subscribe();
    let handle = match session.send_voice() {
        Ok(handle) => handle,
        Err(err) => exit_on_send_error(err),
    };
    eprintln!("🎙️  Recording...");
    let outcome = print_reply(&mut session, &mut events, handle).await?;
    session.flush_history().await;
    if outcome == ReplyOutcome::Failed {
        std::process::exit(1);
    }
    Ok(())
}

pub(crate) fn exit_on_send_error(err: SendError) -> ! {
    eprintln!("❌ {err}");
    match err {
        SendError::MissingCredential => {
            eprintln!();
            eprintln!("💡 Quick fixes:");
            eprintln!("  • streamchat set-key");
            eprintln!("  • export {API_KEY_ENV}=...");
        }
        SendError::VoiceUnavailable => {
            eprintln!("💡 Enable it with: streamchat set voice on");
        }
        SendError::EmptyMessage => {}
    }
    std::process::exit(1);
}

/// Apply updates until the reply is done, echoing its parts to stdout.
pub(crate) async fn print_reply(
    session: &mut Session,
    events: &mut broadcast::Receiver<SessionEvent>,
    handle: TurnHandle,
) -> io::Result<ReplyOutcome> {
    let mut stdout = io::stdout();
    let mut outcome = ReplyOutcome::Completed;

    while !reply_done(session, handle) {
        let Some(update) = session.next_update().await else {
            break;
        };
        if update.epoch == handle.epoch
            && update.message_index == handle.reply_index
            && matches!(update.message, StreamMessage::Error(_))
        {
            outcome = ReplyOutcome::Failed;
        }

        loop {
            match events.try_recv() {
                Ok(SessionEvent::DeltaReceived { index, part }) if index == handle.reply_index => {
                    write_part(&mut stdout, &part)?;
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        stdout.flush()?;
    }

    writeln!(stdout)?;
    Ok(outcome)
}

fn reply_done(session: &Session, handle: TurnHandle) -> bool {
    session.epoch() != handle.epoch
        || session
            .message(handle.reply_index)
            .is_none_or(|message| message.done)
}

fn write_part(out: &mut impl Write, part: &Part) -> io::Result<()> {
    match part {
        Part::Text(text) => write!(out, "{text}"),
        Part::AudioFile { path, .. } => write!(out, "🔊 {}", path_display(path)),
        Part::InlineData { mime_type, .. } => write!(out, "[{mime_type} attachment]"),
    }
}
