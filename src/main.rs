use clap::Parser;
use paygate_core::cli::{Cli, Commands, DbCommands, TxCommands};
use paygate_core::config::{Config, LogFormat};
use paygate_core::services::run_expiry_sweeper;
use paygate_core::{cli, create_app, db, startup, AppState};
use secrecy::{ExposeSecret, SecretString};
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Tx(TxCommands::ForceStatus { tx_id, status, notes, actor }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_tx_force_status(&config, pool, tx_id, status, &notes, actor).await
        }
        Commands::Tx(TxCommands::Sweep) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_tx_sweep(&config, pool).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &pool).await?;
    if !report.is_valid() {
        report.print();
        anyhow::bail!("Startup validation failed");
    }

    let orchestrator = startup::build_orchestrator(&config, pool.clone());
    tracing::info!(
        "Gateway client initialized with URL: {} (merchant {})",
        config.gateway.base_url,
        config.gateway.merchant_id
    );

    tokio::spawn(run_expiry_sweeper(
        orchestrator.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    ));

    let app_state = AppState {
        db: pool,
        orchestrator,
        admin_api_key: Arc::new(SecretString::new(
            config.admin_api_key.expose_secret().clone(),
        )),
    };
    let app = create_app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
