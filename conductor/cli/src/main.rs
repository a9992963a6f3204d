//! Chat Conductor - Terminal Chat Client
//!
//! A line-oriented surface over the conductor core: every typed line becomes
//! an intent, every conductor notification is printed as it arrives.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config file, then environment)
//! chat-conductor
//!
//! # Point at another service
//! chat-conductor --api-url https://tutor.example.com/api/v1 --token "$TOKEN"
//!
//! # Keep nothing on disk
//! chat-conductor --ephemeral
//!
//! # Verbose logging (to stderr)
//! RUST_LOG=chat_conductor_core=debug chat-conductor
//! ```
//!
//! Ctrl-C stops the current answer; pressed while idle it exits.

mod commands;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use chat_conductor_core::{
    load_config_from_path, ChatPersistence, ChatStatus, Conductor, ConfigOverrides,
    JsonFilePersistence, MemoryPersistence, SseBackend,
};

use commands::{parse_line, resolve_conversation, Command, HELP};

/// Chat Conductor - streaming chat in your terminal
#[derive(Parser, Debug)]
#[command(name = "chat-conductor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CHAT_CONDUCTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// AI service base URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Bearer token for the AI service
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Chat mode
    #[arg(short = 'm', long, value_name = "MODE")]
    mode: Option<String>,

    /// Start with retrieval augmentation enabled
    #[arg(long)]
    rag: bool,

    /// Chat history file
    #[arg(long, value_name = "FILE")]
    storage: Option<PathBuf>,

    /// Keep conversations in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHAT_CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "chat_conductor={level},chat_conductor_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn overrides_from(args: &Args) -> ConfigOverrides {
    let mut overrides = ConfigOverrides::new();
    if let Some(url) = &args.api_url {
        overrides = overrides.with_api_base_url(url.clone());
    }
    if let Some(token) = &args.token {
        overrides = overrides.with_auth_token(token.clone());
    }
    if let Some(mode) = &args.mode {
        overrides = overrides.with_mode(mode.clone());
    }
    if args.rag {
        overrides = overrides.with_retrieval_augmented(true);
    }
    if let Some(path) = &args.storage {
        overrides = overrides.with_storage_path(path.clone());
    }
    overrides
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    overrides_from(&args).apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(api_base_url = %config.api_base_url, source = ?config.source(), "Configuration loaded");

    let persistence: Arc<dyn ChatPersistence> = match (&config.storage_path, args.ephemeral) {
        (Some(path), false) => {
            info!(path = ?path, "Chat history file");
            Arc::new(JsonFilePersistence::new(path.clone()))
        }
        _ => Arc::new(MemoryPersistence::new()),
    };

    let backend = SseBackend::from_config(&config).context("Failed to create chat backend")?;
    let (surface_tx, mut surface_rx) = mpsc::unbounded_channel();
    let mut conductor = Conductor::new(backend, &config)
        .with_persistence(persistence)
        .with_surface(surface_tx);

    if let Err(e) = conductor.restore() {
        warn!(error = %e, "Could not restore chat history, starting fresh");
    }

    println!("chat-conductor {} (type /help)", env!("CARGO_PKG_VERSION"));
    render::print_active(&conductor);
    render::prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut topic: Option<String> = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run_command(&mut conductor, &mut topic, command),
                    Err(e) => println!("{e}"),
                }
                if !conductor.has_pending_streams() {
                    render::prompt();
                }
            }

            Some(msg) = surface_rx.recv() => {
                if render::message(&msg) {
                    render::prompt();
                }
            }

            _ = conductor.next_event(), if conductor.has_pending_streams() => {}

            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                if conductor.status() == ChatStatus::Streaming {
                    conductor.stop_intent();
                    println!();
                    render::prompt();
                } else {
                    break;
                }
            }
        }
    }

    conductor.stop_intent();
    println!();
    info!("Goodbye");
    Ok(())
}

fn run_command<B>(conductor: &mut Conductor<B>, topic: &mut Option<String>, command: Command)
where
    B: chat_conductor_core::ChatBackend + 'static,
{
    match command {
        Command::Send(prompt) => {
            conductor.send_intent(prompt);
        }
        Command::Retry => {
            if conductor.retry_intent().is_none() {
                println!("Nothing to retry");
            }
        }
        Command::Stop => conductor.stop_intent(),
        Command::New => {
            conductor.new_conversation_intent();
            println!("Started a new conversation");
        }
        Command::List => render::print_conversations(conductor),
        Command::Select(arg) => {
            let id = resolve_conversation(conductor.conversations(), &arg);
            if conductor.select_conversation_intent(&id) {
                render::print_active(conductor);
            } else {
                println!("No conversation '{arg}'");
            }
        }
        Command::Delete(arg) => {
            let id = resolve_conversation(conductor.conversations(), &arg);
            if conductor.delete_conversation_intent(&id) {
                println!("Deleted");
            } else {
                println!("No conversation '{arg}'");
            }
        }
        Command::Clear => {
            conductor.clear_history_intent();
            println!("History cleared");
        }
        Command::Mode(mode) => {
            conductor.set_mode_intent(mode);
            println!("Mode: {}", conductor.store().effective_mode());
        }
        Command::Rag(enabled) => {
            conductor.set_retrieval_intent(enabled);
            println!("Mode: {}", conductor.store().effective_mode());
        }
        Command::Guide(prompt) => {
            conductor.guided_send_intent(prompt, topic.clone());
        }
        Command::Topic(name) => {
            println!("Guided topic: {name}");
            *topic = Some(name);
        }
        Command::Progress => render::print_guided(conductor.guided_session()),
        Command::EndGuide => {
            conductor.clear_guided_session_intent();
            *topic = None;
            println!("Guided session ended");
        }
        Command::Tasks => render::print_tasks(conductor.scheduler()),
        Command::Help => println!("{HELP}"),
        Command::Empty | Command::Quit => {}
    }
    let _ = std::io::stdout().flush();
}
