//! # Multimodal Index CLI (`mmi`)
//!
//! The `mmi` binary ingests PDF, DOCX, text, image and audio files into one
//! vector collection and searches it by text or by image.
//!
//! ## Usage
//!
//! ```bash
//! mmi --config ./config/mmi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mmi init` | Create the SQLite database and schema |
//! | `mmi ingest <path>` | Ingest a file or directory tree |
//! | `mmi search "<text>"` | Search by text (`--image <file>` to search by image) |
//! | `mmi get <id>` | Show one indexed unit |
//! | `mmi delete <id>` | Delete one indexed unit |
//! | `mmi count` | Number of indexed units |
//! | `mmi serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! mmi ingest ./docs --json
//! mmi search "quarterly revenue" -k 5 --filter type=text --filter page>=2
//! mmi search --image ./query.jpg --filter type=image
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use multimodal_index::commands::{self, SearchArgs};
use multimodal_index::config::{self, Config};
use multimodal_index::context::AppContext;
use multimodal_index::server;

const DEFAULT_CONFIG: &str = "./config/mmi.toml";

/// Multimodal Index: ingest documents, images and audio into one vector
/// space and search across all of them.
#[derive(Parser)]
#[command(name = "mmi", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mmi.toml`; when that default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or a directory tree.
    ///
    /// Files with no parser are skipped; files that fail to parse are
    /// reported and the run continues. Press Ctrl-C to stop after the
    /// current file.
    Ingest {
        path: PathBuf,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search by text or by image.
    Search {
        /// Query text.
        #[arg(required_unless_present = "image", conflicts_with = "image")]
        query: Option<String>,

        /// Query image file.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Number of results (defaults to `[retrieval].default_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Metadata filter such as `type=image`, `source_file=report.pdf` or
        /// `page>=2`. Repeat to combine.
        #[arg(long = "filter")]
        filters: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show one indexed unit by id.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete one indexed unit by id.
    Delete { id: String },

    /// Print the number of indexed units.
    Count,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancels `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    init_tracing(&cfg.logging.level);

    // Everything except `init` works on an opened context.
    let open_ctx = || AppContext::open(&cfg);
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Ingest { path, json } => {
            let ctx = open_ctx().await?;
            cancel_on_ctrl_c(cancel.clone());
            commands::run_ingest(&ctx, &path, json, &cancel).await?;
        }
        Commands::Search {
            query,
            image,
            k,
            filters,
            json,
        } => {
            commands::run_search(
                &open_ctx().await?,
                SearchArgs {
                    text: query.as_deref(),
                    image: image.as_deref(),
                    k,
                    filters: &filters,
                    json,
                },
            )
            .await?;
        }
        Commands::Get { id, json } => {
            commands::run_get(&open_ctx().await?, &id, json).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&open_ctx().await?, &id).await?;
        }
        Commands::Count => {
            commands::run_count(&open_ctx().await?).await?;
        }
        Commands::Serve => {
            let ctx = open_ctx().await?;
            cancel_on_ctrl_c(cancel.clone());
            server::run_server(Arc::new(ctx), cancel).await?;
        }
    }

    Ok(())
}
