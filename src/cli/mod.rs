//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod say;
pub mod setup;

use std::error::Error;
use std::io::{self, BufRead};

use clap::{Parser, Subcommand};

use crate::cli::chat::run_chat;
use crate::cli::say::{run_say, run_voice};
use crate::cli::setup::{build_session, SessionOverrides};
use crate::core::config::data::path_display;
use crate::core::config::defaults::SETTABLE_KEYS;
use crate::core::config::{AppDirs, Config};
use crate::core::credentials::{CredentialStore, API_KEY_ENV};
use crate::core::history::HistoryStore;
use crate::utils::logging;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_SHA"),
    "\ndescribe: ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_DATE"),
    "\nrustc: ",
    env!("VERGEN_RUSTC_SEMVER"),
    " (",
    env!("VERGEN_RUSTC_HOST_TRIPLE"),
    ")"
);

#[derive(Parser)]
#[command(name = "streamchat")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Stream replies from a generative-text endpoint in your terminal")]
#[command(
    long_about = "streamchat keeps a running conversation with a streaming generative-text \
endpoint, persists it between runs, and can send short voice clips.\n\n\
Authentication:\n\
  Use 'streamchat set-key' to store an API key for the configured provider.\n\n\
Environment Variables:\n\
  STREAMCHAT_API_KEY   API key (takes precedence over the stored key)\n\
  STREAMCHAT_CONFIG    Path to an alternative config.toml\n\
  STREAMCHAT_LOG       Log filter, e.g. 'debug' or 'streamchat=trace'\n\n\
Chat commands:\n\
  /clear            Start over from the initial prompt\n\
  /voice            Record a clip and play the spoken reply\n\
  /quit             Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use this model for every request (disables rotation)
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Sampling temperature between 0 and 2
    #[arg(short = 't', long, global = true, value_name = "TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Neither load nor save conversation history
    #[arg(long, global = true)]
    pub no_history: bool,

    /// Log debug output to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

impl Args {
    fn overrides(&self) -> SessionOverrides {
        SessionOverrides {
            model: self.model.clone(),
            temperature: self.temperature,
            no_history: self.no_history,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send a single prompt and print the streamed reply
    Say {
        /// Prompt text (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Record a voice clip and play the spoken reply
    Voice,
    /// Print the saved conversation
    History,
    /// Reset the saved conversation to the initial prompt
    Clear,
    /// Store the API key for the configured provider (reads stdin when omitted)
    SetKey { key: Option<String> },
    /// Print the resolved configuration
    Config,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let overrides = args.overrides();

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let session = build_session(&overrides)?;
            run_chat(session).await
        }
        Commands::Say { prompt } => {
            let session = build_session(&overrides)?;
            run_say(session, prompt.join(" ")).await
        }
        Commands::Voice => {
            let session = build_session(&overrides)?;
            run_voice(session).await
        }
        Commands::History => print_history(),
        Commands::Clear => {
            let mut session = build_session(&SessionOverrides {
                no_history: false,
                ..overrides
            })?;
            session.clear();
            session.flush_history().await;
            println!("✅ Conversation reset ({} message(s))", session.len());
            Ok(())
        }
        Commands::SetKey { key } => set_key(key),
        Commands::Config => {
            Config::load()?.print_all();
            Ok(())
        }
        Commands::Set { key, value } => {
            let mut config = Config::load()?;
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            let value = value.join(" ");
            if let Err(message) = config.set_value(&key, &value) {
                eprintln!("❌ {message}");
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Set {key} to: {value}");
            Ok(())
        }
        Commands::Unset { key } => {
            let mut config = Config::load()?;
            if let Err(message) = config.unset_value(&key) {
                eprintln!("❌ {message}");
                eprintln!("Keys: {}", SETTABLE_KEYS.join(", "));
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
    }
}

fn print_history() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let dirs = AppDirs::discover()?;
    let store = HistoryStore::new(dirs.history_path(config.provider()));

    match store.load()? {
        Some(messages) if !messages.is_empty() => {
            for message in messages {
                println!("{}: {}", message.role.as_str(), message.text());
            }
        }
        _ => println!("No saved conversation at {}", path_display(store.path())),
    }
    Ok(())
}

fn set_key(key: Option<String>) -> Result<(), Box<dyn Error>> {
    let key = match key {
        Some(key) => key,
        None => {
            eprintln!("Paste the API key and press Enter:");
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line
        }
    };

    let config = Config::load()?;
    let dirs = AppDirs::discover()?;
    let store = CredentialStore::new(dirs.credential_path(config.provider()));
    store.save(&key)?;
    println!(
        "✅ Stored API key for {} at {}",
        config.provider(),
        path_display(store.path())
    );
    if std::env::var_os(API_KEY_ENV).is_some() {
        eprintln!("⚠️  {API_KEY_ENV} is set and takes precedence over the stored key");
    }
    Ok(())
}
