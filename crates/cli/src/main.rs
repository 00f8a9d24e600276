//! Salon CLI - drive the salon client against a live backend.
//!
//! # Usage
//!
//! ```bash
//! # Log in (password from SALON_PASSWORD or --password)
//! salon login -e owner@salon.example
//!
//! # Show the restored session
//! salon whoami
//!
//! # Show the selected shop, refetching if stale
//! salon shop show
//!
//! # Select a shop
//! salon shop select 42
//!
//! # Log out
//! salon logout
//! ```
//!
//! # Environment Variables
//!
//! Client settings are read by `ClientConfig::from_env` (`SALON_API_BASE_URL`
//! and friends). The CLI adds:
//!
//! - `SALON_PASSWORD` - Password for `login`
//! - `SENTRY_DSN` - Enables Sentry error reporting when set
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use salon_core::ShopId;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "salon")]
#[command(author, version, about = "Salon booking client CLI")]
struct Cli {
    /// Sentry DSN for error reporting
    #[arg(long, env = "SENTRY_DSN", global = true, hide_env_values = true)]
    sentry_dsn: Option<String>,

    /// Sentry environment name
    #[arg(long, env = "SENTRY_ENVIRONMENT", global = true)]
    sentry_environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "SALON_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and clear the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Inspect or change the selected shop
    Shop {
        #[command(subcommand)]
        action: ShopAction,
    },
}

#[derive(Subcommand)]
enum ShopAction {
    /// Show the selected shop
    Show {
        /// Fetch from the backend even if the cached shop is fresh
        #[arg(long, conflicts_with = "allow_stale")]
        refresh: bool,

        /// Accept a stale cached shop without refetching
        #[arg(long)]
        allow_stale: bool,
    },
    /// Select a shop by ID
    Select {
        /// Shop ID
        shop_id: ShopId,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = telemetry::init_sentry(
        cli.sentry_dsn.as_deref(),
        cli.sentry_environment.clone(),
    );
    telemetry::init_tracing();

    if let Err(e) = run(cli.command).await {
        tracing::error!("Command failed: {e}");
        if e.requires_login() {
            tracing::info!("Run `salon login` to start a new session.");
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<(), commands::CliError> {
    let client = commands::connect().await?;

    match command {
        Commands::Login { email, password } => {
            commands::session::login(&client, &email, password).await?;
        }
        Commands::Logout => commands::session::logout(&client).await,
        Commands::Whoami => commands::session::whoami(&client)?,
        Commands::Shop { action } => match action {
            ShopAction::Show {
                refresh,
                allow_stale,
            } => commands::shop::show(&client, refresh, allow_stale).await?,
            ShopAction::Select { shop_id } => commands::shop::select(&client, shop_id).await?,
        },
    }
    Ok(())
}
