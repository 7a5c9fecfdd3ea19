use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::{PostgresCatalogReader, PostgresRegistrationRepository, PostgresTransactionStore};
use crate::config::Config;
use crate::gateway::{GatewayClient, SignatureCodec};
use crate::proof::QrProofGenerator;
use crate::services::{OrchestratorSettings, TransactionOrchestrator};

/// Wires the Postgres adapters, gateway client and proof generator together.
pub fn build_orchestrator(config: &Config, pool: PgPool) -> Arc<TransactionOrchestrator> {
    let codec = Arc::new(SignatureCodec::new(
        config.gateway.merchant_id.clone(),
        SecretString::new(config.gateway.api_key.expose_secret().clone()),
        config.gateway.algorithms,
    ));
    let gateway = GatewayClient::new(&config.gateway, codec.clone(), config.transaction_expiry_minutes);

    Arc::new(TransactionOrchestrator::new(
        Arc::new(PostgresTransactionStore::new(pool.clone())),
        Arc::new(PostgresRegistrationRepository::new(pool.clone())),
        Arc::new(PostgresCatalogReader::new(pool)),
        Arc::new(gateway),
        Arc::new(QrProofGenerator::new(&config.proof_dir)),
        codec,
        OrchestratorSettings::new(config.transaction_expiry_minutes, config.gateway.timeout_secs),
    ))
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub proof_storage: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.proof_storage
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Proof Storage:         {}", status(self.proof_storage));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        proof_storage: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_proof_dir(&config.proof_dir).await {
        report.proof_storage = false;
        report.errors.push(format!("Proof storage: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.gateway.timeout_secs == 0 {
        anyhow::bail!("GATEWAY_TIMEOUT_SECS must be greater than 0");
    }
    if config.database_max_connections == 0 {
        anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    // Check if migrations are up to date
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_proof_dir(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("cannot create {}", root.display()))?;

    let probe = root.join(".write-probe");
    tokio::fs::write(&probe, b"ok")
        .await
        .with_context(|| format!("{} is not writable", root.display()))?;
    tokio::fs::remove_file(&probe).await.ok();

    Ok(())
}
