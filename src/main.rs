//! # askbot CLI
//!
//! ## Usage
//!
//! ```bash
//! askbot --config ./config/askbot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askbot init` | Create the SQLite database and run schema migrations |
//! | `askbot status` | Show corpus and audit log counts |
//! | `askbot ask "<query>"` | Answer one question through the guarded pipeline |
//! | `askbot serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! askbot init --config ./config/askbot.toml
//! askbot ask "Where is my polling place?" --k 3
//! RUST_LOG=askbot=debug askbot serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use askbot::{ask, config, logging, migrate, server, status};

/// askbot: guarded retrieval-augmented answers over a pre-embedded corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askbot.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "askbot", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file plus the `chunks` and
    /// `chat_history` tables. Safe to run repeatedly.
    Init,

    /// Show corpus counts, embedding coverage, and audit log size.
    Status,

    /// Answer a single question.
    Ask {
        /// The question.
        query: String,

        /// Number of chunks to retrieve (1-20). Defaults to `[retrieval].default_k`.
        #[arg(long)]
        k: Option<i64>,

        /// User id for rate limiting and the audit log.
        #[arg(long)]
        user: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Ask { query, k, user } => {
            ask::run_ask(&cfg, &query, k, user).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
