// vaultchat CLI — entry point
// Logging goes to stderr through env_logger (RUST_LOG, default `warn`) so the
// streamed reply on stdout stays clean.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vaultchat::engine::settings::CONFIG_ENV;
use vaultchat::{EngineError, Settings};

#[derive(Parser)]
#[command(
    name = "vaultchat",
    about = "Chat with vault characters from the terminal",
    version,
    after_help = "Settings default to <config dir>/vaultchat/settings.toml."
)]
pub struct Cli {
    /// Path to settings.toml
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Vault root (overrides `vault_root` in settings)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and stream the reply
    Chat {
        /// Character folder under `characters/`
        character: String,
        /// Message text
        message: String,
        /// Provider id for this turn
        #[arg(long)]
        provider: Option<String>,
        /// Model for this turn
        #[arg(long)]
        model: Option<String>,
        /// Do not write the exchange to dialogue.json
        #[arg(long)]
        no_save: bool,
    },

    /// List models a provider offers
    Models {
        /// Provider id (default: resolved text provider)
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Search a character's memories
    Recall {
        character: String,
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Preview which lorebook entries a message would activate
    Lore {
        character: String,
        message: String,
        /// Include saved dialogue in the scan window
        #[arg(long)]
        with_history: bool,
    },

    /// Validate settings and show model resolution
    Check,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();
}

fn report(err: &EngineError) {
    eprintln!("error: {}", err);
    if let EngineError::Provider(p) = err {
        eprintln!("hint: {}", p.user_hint());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = match Settings::load(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not load {}", path.display());
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("[cli] Settings from {}", path.display());

    match commands::run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            eprintln!("\n(cancelled)");
            ExitCode::from(130)
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}
