//! Line-oriented interactive chat

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::say::print_reply;
use crate::core::session::{SendError, Session};

/// What one line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Message(String),
    Clear,
    Voice,
    Quit,
    Empty,
    Unknown(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ChatInput::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return ChatInput::Message(line.trim_end().to_string());
        };
        match command.trim() {
            "clear" => ChatInput::Clear,
            "voice" => ChatInput::Voice,
            "quit" | "exit" | "q" => ChatInput::Quit,
            other => ChatInput::Unknown(other.to_string()),
        }
    }
}

pub async fn run_chat(mut session: Session) -> Result<(), Box<dyn Error>> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Some(model) = session.model_name() {
        eprintln!(
            "Chatting with {model} ({} message(s) in history). /quit to leave.",
            session.len()
        );
    }

    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let turn = match ChatInput::parse(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Clear => {
                session.clear();
                println!("Conversation reset.");
                continue;
            }
            ChatInput::Unknown(command) => {
                eprintln!("Unknown command: /{command}");
                continue;
            }
            ChatInput::Voice => {
                let turn = session.send_voice();
                if turn.is_ok() {
                    eprintln!("🎙️  Recording...");
                }
                turn
            }
            ChatInput::Message(text) => session.send(&text),
        };

        match turn {
            Ok(handle) => {
                print_reply(&mut session, &mut events, handle).await?;
            }
            Err(err @ SendError::MissingCredential) => {
                eprintln!("❌ {err}. Run `streamchat set-key` first.");
                break;
            }
            Err(err) => eprintln!("❌ {err}"),
        }
    }
    session.flush_history().await;
    Ok(())
}
