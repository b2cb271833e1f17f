use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use clipstack::daemon::{self, Daemon};
use clipstack::entry::format_time_ago;
use clipstack::{ClipboardEntry, Command, Config, HistoryStore};
use log::info;
use tokio::signal;

#[derive(Parser)]
#[command(name = "clipstack")]
#[command(version)]
#[command(about = "clipboard history with pinning and quick paste")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the clipboard and serve control commands
    Daemon,
    /// Print saved history, pinned entries first
    List {
        /// Only show entries whose text contains this (case-insensitive)
        #[arg(short, long)]
        query: Option<String>,
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Put an entry back on the clipboard
    Copy {
        /// Entry id or a prefix of at least 8 characters
        id: String,
        /// Also paste into the focused application
        #[arg(long)]
        paste: bool,
    },
    /// Pin an entry so it is never evicted
    Pin { id: String },
    /// Unpin an entry
    Unpin { id: String },
    /// Delete an entry
    Remove { id: String },
    /// Delete every unpinned entry
    Clear,
    /// Show or hide the history popover
    Toggle,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    let command = match cli.command {
        Commands::Daemon => return run_daemon(&config).await,
        Commands::List { query, limit } => {
            print_history(&config, query.as_deref(), limit);
            return Ok(());
        }
        Commands::Copy { id, paste } => Command::Copy { id, paste },
        Commands::Pin { id } => Command::Pin(id),
        Commands::Unpin { id } => Command::Unpin(id),
        Commands::Remove { id } => Command::Remove(id),
        Commands::Clear => Command::Clear,
        Commands::Toggle => Command::Toggle,
    };

    daemon::send_command(&config.socket_path(), &command)
        .await
        .context("Is the clipstack daemon running?")
}

async fn run_daemon(config: &Config) -> Result<()> {
    let mut daemon = Daemon::new(config)?;

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                log::error!("Daemon error: {:#}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    daemon.shutdown()
}

fn print_history(config: &Config, query: Option<&str>, limit: Option<usize>) {
    let items = HistoryStore::new(config.history_path()).load();
    let now = Utc::now();

    let (pinned, recent): (Vec<&ClipboardEntry>, Vec<&ClipboardEntry>) = items
        .iter()
        .filter(|entry| query.is_none_or(|q| entry.matches(q)))
        .partition(|entry| entry.pinned);

    for entry in pinned
        .into_iter()
        .chain(recent)
        .take(limit.unwrap_or(usize::MAX))
    {
        let id = entry.id.simple().to_string();
        println!(
            "{} {} {:>8}  {}",
            &id[..8],
            if entry.pinned { "*" } else { " " },
            format_time_ago(entry.date_added, now),
            entry.preview(80)
        );
    }
}
