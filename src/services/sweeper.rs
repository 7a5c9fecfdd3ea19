use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use super::orchestrator::TransactionOrchestrator;
use crate::domain::PaymentError;

pub const SWEEP_BATCH_SIZE: i64 = 100;

/// Runs the expiry sweeper loop. Expiry is already applied lazily on every
/// read; the sweeper only persists it so stale rows stop looking pending.
pub async fn run_expiry_sweeper(orchestrator: Arc<TransactionOrchestrator>, interval: Duration) {
    info!("Expiry sweeper started");

    loop {
        if let Err(e) = sweep_once(&orchestrator).await {
            error!("Expiry sweep error: {}", e);
        }

        sleep(interval).await;
    }
}

/// Expires stale pending transactions in batches until none are left.
pub async fn sweep_once(orchestrator: &TransactionOrchestrator) -> Result<u64, PaymentError> {
    let mut total = 0;
    loop {
        let expired = orchestrator.sweep_expired(SWEEP_BATCH_SIZE).await?;
        total += expired;
        if expired < SWEEP_BATCH_SIZE as u64 {
            break;
        }
    }

    if total > 0 {
        info!("Expired {} stale pending transaction(s)", total);
    } else {
        debug!("No stale pending transactions");
    }
    Ok(total)
}
