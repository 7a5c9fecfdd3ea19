use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Caller, TransactionStatus};
use crate::services::sweep_once;
use crate::startup::build_orchestrator;
use crate::utils::sanitize::mask_password;

#[derive(Parser)]
#[command(name = "paygate-core")]
#[command(about = "Paygate Core - payment transaction orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Force a transaction into a final status
    ForceStatus {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,

        /// success, failed or expired
        #[arg(value_name = "STATUS")]
        status: TransactionStatus,

        /// Reason recorded in the audit log
        #[arg(short, long)]
        notes: String,

        /// Admin id recorded as the actor
        #[arg(long, default_value_t = 0)]
        actor: i64,
    },

    /// Expire stale pending transactions once
    Sweep,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_force_status(
    config: &Config,
    pool: PgPool,
    tx_id: Uuid,
    status: TransactionStatus,
    notes: &str,
    actor: i64,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, pool);
    let view = orchestrator
        .admin_override(&Caller::admin(actor), tx_id, status, notes)
        .await?;

    tracing::info!("Transaction {} forced to {}", tx_id, view.status);
    println!("✓ Transaction {} ({}) is now {}", tx_id, view.order_ref, view.status);
    Ok(())
}

pub async fn handle_tx_sweep(config: &Config, pool: PgPool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, pool);
    let expired = sweep_once(&orchestrator).await?;

    println!("✓ Expired {} stale transaction(s)", expired);
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    use sqlx::migrate::Migrator;
    use std::path::Path;

    let pool = crate::db::create_pool(config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;

    tracing::info!("Running database migrations...");
    migrator.run(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Gateway URL: {}", config.gateway.base_url);
    println!("  Merchant ID: {}", config.gateway.merchant_id);
    println!("  Signature Algorithms: {}", config.gateway.algorithms);
    println!(
        "  Gateway Secret: {}",
        if config.gateway.api_key.expose_secret().is_empty() { "missing" } else { "set" }
    );
    println!("  Transaction Expiry: {} min", config.transaction_expiry_minutes);
    println!("  Proof Directory: {}", config.proof_dir.display());
    println!("  Sweep Interval: {}s", config.sweep_interval_secs);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}
