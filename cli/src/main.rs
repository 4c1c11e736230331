mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;

use crate::commands::{cmd_add, cmd_delete, cmd_list, cmd_totals, cmd_watch};
use crate::config::Config;
use crate::remote::{HttpAuth, RemoteStore};
use morsel_core::models::EntryDraft;
use morsel_core::service::MorselService;
use morsel_core::session;

#[derive(Parser)]
#[command(
    name = "morsel",
    version,
    about = "A synced macro-logging CLI",
    long_about = "\nmorsel — log what you eat, see it everywhere.\n\nEntries live in a per-user collection on the store backend; every\ncommand reads through a live subscription, never a local cache."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a food entry to the log
    ///
    /// All six fields are required by the form contract; a missing flag counts
    /// as an empty field.
    Add {
        /// Food name
        #[arg(default_value = "")]
        name: String,
        /// Calories (kcal)
        #[arg(long, default_value = "")]
        calories: String,
        /// Protein (g)
        #[arg(long, default_value = "")]
        protein: String,
        /// Fat (g)
        #[arg(long, default_value = "")]
        fat: String,
        /// Carbs (g)
        #[arg(long, default_value = "")]
        carbs: String,
        /// Fiber (g)
        #[arg(long, default_value = "")]
        fiber: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry by id
    Delete {
        /// Entry id to delete
        entry_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entries, newest first, with running totals
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the running totals
    Totals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow the live log, reprinting on every change
    Watch,
    /// Start the document-store backend
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
        /// Keep data in memory only (for development/testing)
        #[arg(long)]
        ephemeral: bool,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("morsel=info,morsel_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            no_auth,
            ephemeral,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, _new) = config.load_or_create_api_key()?;
                Some(key)
            };
            server::start_server(&config, port, &bind, api_key, ephemeral).await
        }
        Commands::Add {
            name,
            calories,
            protein,
            fat,
            carbs,
            fiber,
            json,
        } => {
            let service = connect(&config);
            let draft = EntryDraft {
                name,
                calories,
                protein,
                fat,
                carbs,
                fiber,
            };
            cmd_add(&service, &draft, json)
        }
        Commands::Delete { entry_id, json } => {
            let service = connect(&config);
            cmd_delete(&service, &entry_id, json)
        }
        Commands::List { json } => {
            let mut service = connect(&config);
            cmd_list(&mut service, json).await
        }
        Commands::Totals { json } => {
            let mut service = connect(&config);
            cmd_totals(&mut service, json).await
        }
        Commands::Watch => {
            let mut service = connect(&config);
            cmd_watch(&mut service).await
        }
    }
}

/// Resolve the session against the configured backend and wire the service.
fn connect(config: &Config) -> MorselService {
    let auth = HttpAuth::new(config);
    let session = session::bootstrap(&auth, config.auth_token.as_deref());
    let store = Arc::new(RemoteStore::new(config));
    MorselService::new(store, session)
}
