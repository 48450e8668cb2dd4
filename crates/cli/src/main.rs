//! Cartkeeper CLI - database migrations and one-shot maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Apply schema migrations
//! ck-cli migrate
//!
//! # Expire carts idle for more than CART_EXPIRY_DAYS (or --days)
//! ck-cli sweep --days 30
//!
//! # Delete audit entries older than CART_AUDIT_RETENTION_DAYS (or --days)
//! ck-cli purge-logs --days 90
//! ```
//!
//! All commands read `CARTKEEPER_DATABASE_URL` (falling back to `DATABASE_URL`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ck-cli")]
#[command(author, version, about = "Cartkeeper CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Expire idle open carts
    Sweep {
        /// Idle days before a cart expires (default: `CART_EXPIRY_DAYS`)
        #[arg(short, long)]
        days: Option<i64>,
    },
    /// Delete old audit entries
    PurgeLogs {
        /// Retention window in days (default: `CART_AUDIT_RETENTION_DAYS`)
        #[arg(short, long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Sweep { days } => commands::maintenance::sweep(days).await,
        Commands::PurgeLogs { days } => commands::maintenance::purge_logs(days).await,
    }
}
