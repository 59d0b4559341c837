#![allow(clippy::print_stdout)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use chat_archive::audio::analyze_ogg_opus;
use chat_archive::config::AppConfig;
use chat_archive::logging::{init_logging, OperationTimer};
use chat_archive::{ListChatsOptions, ListMessagesOptions, SearchOptions, Store};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Messages database (overrides configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List chats, most recent activity first
    Chats {
        /// Filter by name or identifier substring
        #[arg(short, long)]
        query: Option<String>,

        /// Only list group chats
        #[arg(long)]
        groups: bool,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// List messages, newest first
    Messages {
        /// Chat identifier
        #[arg(short, long)]
        chat: Option<String>,

        /// Only messages at or after this RFC 3339 time
        #[arg(long)]
        after: Option<String>,

        /// Only messages at or before this RFC 3339 time
        #[arg(long)]
        before: Option<String>,

        /// last_hour, today, yesterday, last_3_days, this_week, last_week, this_month
        #[arg(long)]
        timeframe: Option<String>,

        /// text, image, video, audio, document or sticker
        #[arg(long = "type")]
        media_type: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Full-text search over message content
    Search {
        /// FTS5 match expression
        query: String,

        #[arg(short, long)]
        chat: Option<String>,

        /// Sender phone or identifier
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        after: Option<String>,

        #[arg(long)]
        before: Option<String>,

        #[arg(long)]
        timeframe: Option<String>,

        #[arg(long = "type")]
        media_type: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Export the full history of one chat as JSON
    Export {
        /// Chat identifier
        jid: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Chat and message counts
    Stats,
    /// Duration and waveform of an Ogg/Opus voice note
    VoiceInfo {
        /// Ogg/Opus file
        file: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let mut config = AppConfig::load()?;

    // Initialize logging; the guard flushes the file appender on exit
    let _guard = init_logging(&config.logging)?;

    info!("Starting chat-archive");

    // Parse command line arguments
    let cli = Cli::parse();
    if let Some(db) = &cli.db {
        config.store.path = db.to_string_lossy().into_owned();
    }

    match cli.command {
        Commands::VoiceInfo { file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            print_json(&analyze_ogg_opus(&data)?)
        }
        command => {
            // Configuration and capability errors surface verbatim
            let store = Store::open_with(&config.store)?;
            debug!(path = %config.store.path, "Store ready");
            run_query(&store, command)
        }
    }
}

fn run_query(store: &Store, command: Commands) -> Result<()> {
    match command {
        Commands::Chats { query, groups, limit } => {
            let chats = store.list_chats(&ListChatsOptions {
                query,
                only_groups: groups,
                limit: Some(limit),
            })?;
            print_json(&chats)?;
        }
        Commands::Messages {
            chat,
            after,
            before,
            timeframe,
            media_type,
            limit,
        } => {
            let messages = store.list_messages(&ListMessagesOptions {
                chat_jid: chat,
                after,
                before,
                timeframe,
                media_type,
                limit: Some(limit),
            })?;
            print_json(&messages)?;
        }
        Commands::Search {
            query,
            chat,
            from,
            after,
            before,
            timeframe,
            media_type,
            limit,
        } => {
            let timer = OperationTimer::new("search");
            let messages = store.search_messages(&SearchOptions {
                query,
                chat_jid: chat,
                from,
                after,
                before,
                timeframe,
                media_type,
                limit: Some(limit),
            })?;
            timer.finish();
            info!(count = messages.len(), "Search finished");
            print_json(&messages)?;
        }
        Commands::Export { jid, output } => {
            let export = store.export_chat(&jid)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&export)?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(jid = %jid, count = export.message_count, path = %path.display(), "Exported chat");
                    print_json(&serde_json::json!({
                        "jid": export.jid,
                        "message_count": export.message_count,
                        "output": path,
                    }))?;
                }
                None => print_json(&export)?,
            }
        }
        Commands::Stats => print_json(&store.stats()?)?,
        Commands::VoiceInfo { file } => anyhow::bail!("{} is not a store query", file.display()),
    }

    Ok(())
}
