//! ClipKeep - clipboard history engine
//!
//! Small command-line harness around the engine: add text captures,
//! list the visible window, search, pin and clear. The real consumer
//! is a UI driving [`clipkeep::HistoryEngine`] directly.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use clipkeep::item::{ContentKind, ContentRecord};
use clipkeep::{Capture, Config, HistoryEngine};

#[derive(Parser)]
#[command(name = "clipkeep", version, about = "Clipboard history engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a text capture to history
    Add {
        /// The text to record
        text: String,
    },
    /// List the visible history window
    List {
        /// Emit items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search history titles
    Search {
        /// Query string
        query: String,

        /// Emit matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Toggle the pin on an item
    Pin {
        /// Item id
        id: Uuid,
    },
    /// Delete one item
    Delete {
        /// Item id
        id: Uuid,
    },
    /// Clear unpinned history (or everything with --all)
    Clear {
        /// Also delete pinned items
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipkeep={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ClipKeep v{}", env!("CARGO_PKG_VERSION"));

    let config = match cli.config {
        Some(path) => Config::load_from_path(&path)?,
        None => Config::load()?,
    };
    let engine = HistoryEngine::open(config).await?;
    engine.load().await;

    match cli.command {
        Command::Add { text } => {
            let id = engine
                .add(Capture::new(vec![ContentRecord::inline(
                    ContentKind::PlainText,
                    text,
                )]))
                .await;
            println!("{id}");
        }
        Command::List { json } => {
            let items = engine.visible_items().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in items {
                    let pin = item.pin.map(|p| format!("[{p}] ")).unwrap_or_default();
                    println!("{}  {}x  {}{}", item.id, item.copies, pin, item.title);
                }
            }
        }
        Command::Search { query, json } => {
            let hits = engine.search(&query).await;
            let mut items = Vec::new();
            for hit in &hits {
                if let Some(item) = engine.item(hit.id).await {
                    items.push(item);
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in items {
                    println!("{}  {}", item.id, item.title);
                }
            }
        }
        Command::Pin { id } => match engine.toggle_pin(id).await {
            Some(pin) => println!("pinned as '{pin}'"),
            None => println!("pin cleared"),
        },
        Command::Delete { id } => {
            engine.delete_item(id).await;
        }
        Command::Clear { all } => {
            if all {
                engine.clear_all().await;
            } else {
                engine.clear().await;
            }
        }
    }

    engine.flush().await;
    Ok(())
}
