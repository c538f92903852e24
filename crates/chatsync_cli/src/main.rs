//! chatsync CLI
//!
//! Developer tools for the chatsync backend.
//!
//! # Commands
//!
//! - `cursor` - Encode and decode dirty-sync cursors
//! - `history-cursor` - Encode history cursors
//! - `simulate` - Play a conversation against an in-process server

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::SimulateOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// chatsync developer tools.
#[derive(Parser)]
#[command(name = "chatsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode or decode a dirty-sync cursor
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Encode a history cursor
    HistoryCursor {
        #[command(subcommand)]
        action: HistoryCursorAction,
    },

    /// Play a conversation against an in-process server and drain its feed
    Simulate {
        /// Number of conversation members
        #[arg(long, default_value = "3")]
        members: usize,

        /// Number of messages to post
        #[arg(long, default_value = "100")]
        messages: usize,

        /// Page size used while draining
        #[arg(long, default_value = "20")]
        page_size: usize,

        /// Delete every n-th message
        #[arg(long)]
        delete_every: Option<usize>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Build a cursor token
    Encode {
        /// Version of the last row seen
        #[arg(long)]
        version: u64,

        /// Id of the last row seen
        #[arg(long)]
        entity_id: Uuid,

        /// Oldest message the client holds
        #[arg(long)]
        oldest_message_id: Option<Uuid>,
    },

    /// Print the fields of a cursor token
    Decode {
        /// The token
        token: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum HistoryCursorAction {
    /// Build a history cursor token
    Encode {
        /// Oldest message already loaded
        #[arg(long)]
        message_id: Uuid,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Cursor { action } => match action {
            CursorAction::Encode {
                version,
                entity_id,
                oldest_message_id,
            } => commands::cursor::encode(version, entity_id, oldest_message_id)?,
            CursorAction::Decode { token, format } => commands::cursor::decode(&token, &format)?,
        },
        Commands::HistoryCursor { action } => match action {
            HistoryCursorAction::Encode { message_id } => {
                commands::cursor::encode_history(message_id)?
            }
        },
        Commands::Simulate {
            members,
            messages,
            page_size,
            delete_every,
        } => commands::simulate::run(SimulateOptions {
            members,
            messages,
            page_size,
            delete_every,
        })?,
        Commands::Version => {
            println!("chatsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
