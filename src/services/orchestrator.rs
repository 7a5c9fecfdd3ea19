//! Payment transaction orchestration.
//!
//! Drives a transaction through `pending -> success | failed | expired`.
//! Every state change goes through the [`TransactionStore`], so a callback, a
//! status reconciliation and an administrative override all share one cascade
//! into the registration.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    format_gateway_amount, Caller, ItemRef, PayerProfile, PaymentError, Transaction,
    TransactionStatus, DEFAULT_EXPIRY_MINUTES,
};
use crate::gateway::{GatewayCallback, SignatureCodec};
use crate::ports::{
    CascadeOutcome, CatalogReader, NewTransaction, PaymentGateway, ProofArtifactGenerator,
    ProofPayload, RegistrationRepository, RepositoryError, Reservation, StatusUpdate,
    TransactionStore, RESULT_FAILED, RESULT_PENDING, RESULT_SUCCESS,
};
use crate::utils::sanitize::sanitize_json;
use crate::validation::{
    sanitize_string, validate_item_id, validate_method_code, validate_notes, validate_order_ref,
    validate_positive_amount, validate_signature_format,
};

pub const GATEWAY_ACTOR: &str = "gateway";
pub const RECONCILIATION_ACTOR: &str = "reconciliation";

/// Margin on top of the gateway timeout before a claim counts as abandoned.
const CLAIM_MARGIN_SECS: i64 = 15;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Lifetime of a pending transaction.
    pub expiry: Duration,
    /// Age after which another caller may take over an unacknowledged claim.
    pub claim_ttl: Duration,
    pub claim_poll_interval: std::time::Duration,
    /// How long a concurrent create waits for the claimant before giving up.
    pub claim_wait: std::time::Duration,
}

impl OrchestratorSettings {
    pub fn new(expiry_minutes: i64, gateway_timeout_secs: u64) -> Self {
        let claim_ttl = Duration::seconds(gateway_timeout_secs as i64 + CLAIM_MARGIN_SECS);
        Self {
            expiry: Duration::minutes(expiry_minutes),
            claim_ttl,
            claim_poll_interval: std::time::Duration::from_millis(100),
            claim_wait: claim_ttl.to_std().unwrap_or(std::time::Duration::from_secs(45)),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_MINUTES, 30)
    }
}

/// What a payer needs to complete a payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentView {
    pub transaction_id: Uuid,
    pub order_ref: String,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub va_number: Option<String>,
    pub qr_payload: Option<String>,
    pub amount: String,
    pub method_code: String,
    pub expires_at: DateTime<Utc>,
}

impl PaymentView {
    fn of(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            order_ref: tx.order_ref.clone(),
            gateway_reference: tx.gateway_reference.clone(),
            payment_url: tx.payment_url.clone(),
            va_number: tx.va_number.clone(),
            qr_payload: tx.qr_payload.clone(),
            amount: tx.gateway_amount(),
            method_code: tx.method_code.clone(),
            expires_at: tx.expires_at,
        }
    }
}

/// Current state of a transaction, with lazy expiry applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub transaction_id: Uuid,
    pub order_ref: String,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub amount: String,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub proof_path: Option<String>,
}

impl StatusView {
    fn of(tx: &Transaction, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: tx.id,
            order_ref: tx.order_ref.clone(),
            status: tx.effective_status(now),
            gateway_reference: tx.gateway_reference.clone(),
            amount: tx.gateway_amount(),
            expires_at: tx.expires_at,
            paid_at: tx.paid_at,
            proof_path: tx.proof_path.clone(),
        }
    }
}

/// Receipt of a settled payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub transaction_id: Uuid,
    pub order_ref: String,
    pub gateway_reference: Option<String>,
    pub item: ItemRef,
    pub amount: String,
    pub method_code: String,
    pub paid_at: Option<DateTime<Utc>>,
    /// `None` while the proof artifact is not yet available.
    pub proof_path: Option<String>,
}

impl Receipt {
    fn of(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            order_ref: tx.order_ref.clone(),
            gateway_reference: tx.gateway_reference.clone(),
            item: tx.item,
            amount: tx.gateway_amount(),
            method_code: tx.method_code.clone(),
            paid_at: tx.paid_at,
            proof_path: tx.proof_path.clone(),
        }
    }
}

/// Interprets a status query result code; `None` leaves the transaction pending.
pub fn reconciled_status(result_code: &str) -> Option<TransactionStatus> {
    match result_code.trim() {
        RESULT_SUCCESS => Some(TransactionStatus::Success),
        RESULT_FAILED => Some(TransactionStatus::Failed),
        RESULT_PENDING => None,
        other => {
            debug!(result_code = %other, "Unrecognised gateway status code, leaving pending");
            None
        }
    }
}

fn claim_of(tx: &Transaction) -> Result<DateTime<Utc>, PaymentError> {
    tx.gateway_claimed_at.ok_or_else(|| {
        PaymentError::Store(RepositoryError::Corrupt(format!(
            "transaction {} reserved without a gateway claim",
            tx.id
        )))
    })
}

pub struct TransactionOrchestrator {
    store: Arc<dyn TransactionStore>,
    registrations: Arc<dyn RegistrationRepository>,
    catalog: Arc<dyn CatalogReader>,
    gateway: Arc<dyn PaymentGateway>,
    proofs: Arc<dyn ProofArtifactGenerator>,
    codec: Arc<SignatureCodec>,
    settings: OrchestratorSettings,
}

impl TransactionOrchestrator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registrations: Arc<dyn RegistrationRepository>,
        catalog: Arc<dyn CatalogReader>,
        gateway: Arc<dyn PaymentGateway>,
        proofs: Arc<dyn ProofArtifactGenerator>,
        codec: Arc<SignatureCodec>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registrations,
            catalog,
            gateway,
            proofs,
            codec,
            settings,
        }
    }

    /// Creates, or reuses, the payment transaction for the caller's registration.
    ///
    /// Concurrent calls for one registration send a single gateway request and
    /// all receive the same view. A gateway failure leaves the transaction
    /// pending, so the caller may simply retry.
    pub async fn create(
        &self,
        caller: &Caller,
        item: ItemRef,
        method_code: &str,
    ) -> Result<PaymentView, PaymentError> {
        validate_item_id(item.id)?;
        validate_method_code(method_code)?;

        let purchasable = self
            .catalog
            .get_item(item)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("{}", item)))?;
        validate_positive_amount(&purchasable.fee)?;

        let method = self
            .catalog
            .get_payment_method(method_code)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment method {}", method_code)))?;
        if !method.active {
            return Err(PaymentError::Validation(format!(
                "method_code: payment method {} is not active",
                method.code
            )));
        }

        let registration = self
            .registrations
            .get_by_payer_and_item(caller.payer_id, item)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("registration of payer {} for {}", caller.payer_id, item))
            })?;
        if registration.status.is_settled() {
            return Err(PaymentError::AlreadyPaid(format!(
                "registration {}",
                registration.id
            )));
        }

        let payer = self
            .catalog
            .get_payer(caller.payer_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payer {}", caller.payer_id)))?;

        let request = NewTransaction {
            registration_id: registration.id,
            amount: purchasable.fee,
            method_code: method.code,
            expiry: self.settings.expiry,
            claim_ttl: self.settings.claim_ttl,
        };

        let deadline = Instant::now() + self.settings.claim_wait;
        let mut waited = false;
        loop {
            match self.store.create_or_reuse(request.clone()).await? {
                Reservation::Ready(tx) => return Ok(PaymentView::of(&tx)),
                Reservation::Claimed(tx) if waited => {
                    // The claimant gave up without an acknowledgement.
                    self.release(&tx).await;
                    return Err(PaymentError::GatewayUnavailable(
                        "payment request for this registration did not complete".to_string(),
                    ));
                }
                Reservation::Claimed(tx) => {
                    return self.request_payment(tx, &payer, &purchasable.label).await;
                }
                Reservation::InFlight(tx) => {
                    if Instant::now() >= deadline {
                        return Err(PaymentError::GatewayUnavailable(format!(
                            "payment request for {} is still in progress",
                            tx.order_ref
                        )));
                    }
                    debug!(order_ref = %tx.order_ref, "Waiting for in-flight gateway request");
                    waited = true;
                    tokio::time::sleep(self.settings.claim_poll_interval).await;
                }
            }
        }
    }

    async fn request_payment(
        &self,
        tx: Transaction,
        payer: &PayerProfile,
        item_label: &str,
    ) -> Result<PaymentView, PaymentError> {
        let claimed_at = claim_of(&tx)?;
        match self.gateway.request_payment(&tx, payer, item_label).await {
            Ok(ack) => match self.store.record_gateway_ack(tx.id, claimed_at, &ack).await? {
                Some(tx) => {
                    info!(
                        order_ref = %tx.order_ref,
                        gateway_reference = %ack.reference,
                        "Payment requested"
                    );
                    Ok(PaymentView::of(&tx))
                }
                None => {
                    warn!(
                        order_ref = %tx.order_ref,
                        gateway_reference = %ack.reference,
                        "Gateway acknowledgement arrived after the claim was lost"
                    );
                    let current = self
                        .store
                        .find_by_id(tx.id)
                        .await?
                        .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", tx.id)))?;
                    if current.status == TransactionStatus::Pending
                        && current.gateway_reference.is_some()
                    {
                        return Ok(PaymentView::of(&current));
                    }
                    Err(PaymentError::GatewayUnavailable(format!(
                        "payment request for {} was superseded",
                        current.order_ref
                    )))
                }
            },
            Err(e) => {
                warn!(order_ref = %tx.order_ref, error = %e, "Gateway payment request failed");
                self.release(&tx).await;
                Err(e.into())
            }
        }
    }

    async fn release(&self, tx: &Transaction) {
        let Some(claimed_at) = tx.gateway_claimed_at else {
            return;
        };
        if let Err(e) = self.store.release_claim(tx.id, claimed_at).await {
            error!(transaction_id = %tx.id, error = %e, "Failed to release gateway claim");
        }
    }

    /// Verifies and applies an asynchronous gateway callback.
    ///
    /// A callback for an already settled transaction is acknowledged without
    /// any change (`changed == false`).
    pub async fn handle_callback(
        &self,
        callback: &GatewayCallback,
    ) -> Result<CascadeOutcome, PaymentError> {
        validate_signature_format(&callback.signature)?;
        validate_order_ref(&callback.merchant_order_id)?;

        let merchant_matches = callback
            .merchant_code
            .as_deref()
            .map_or(true, |code| code == self.codec.merchant_id());
        if !merchant_matches
            || !self.codec.verify_callback(
                &callback.amount,
                &callback.merchant_order_id,
                &callback.datetime,
                &callback.signature,
            )
        {
            warn!(
                target: "security",
                order_ref = %callback.merchant_order_id,
                "Rejected gateway callback with invalid signature"
            );
            return Err(PaymentError::SignatureInvalid);
        }

        let tx = self
            .store
            .find_by_order_ref(&callback.merchant_order_id)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("transaction {}", callback.merchant_order_id))
            })?;

        let amount = BigDecimal::from_str(callback.amount.trim()).map_err(|_| {
            PaymentError::Validation("amount: not a decimal number".to_string())
        })?;
        if amount != tx.amount {
            warn!(
                target: "security",
                order_ref = %tx.order_ref,
                expected = %format_gateway_amount(&tx.amount),
                received = %callback.amount,
                "Callback amount does not match transaction"
            );
            return Err(PaymentError::Validation(
                "amount: does not match the transaction amount".to_string(),
            ));
        }

        let status = callback.resulting_status();
        let mut outcome = self
            .store
            .apply_callback(
                &tx.order_ref,
                StatusUpdate {
                    status,
                    gateway_reference: callback.reference.clone(),
                    raw_payload: sanitize_json(&callback.to_payload()),
                    actor: GATEWAY_ACTOR.to_string(),
                },
            )
            .await?;

        if outcome.changed {
            info!(order_ref = %tx.order_ref, status = %outcome.transaction.status, "Callback applied");
        } else {
            debug!(order_ref = %tx.order_ref, "Duplicate callback ignored");
        }

        outcome.transaction = self.ensure_proof(outcome.transaction).await;
        Ok(outcome)
    }

    /// Returns the transaction's status, asking the gateway first while it is pending.
    ///
    /// Gateway trouble is not an error here; the stored view is returned instead.
    pub async fn check_status(
        &self,
        caller: &Caller,
        order_ref: &str,
    ) -> Result<StatusView, PaymentError> {
        validate_order_ref(order_ref)?;

        let mut tx = self
            .store
            .find_by_order_ref(order_ref)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", order_ref)))?;
        if !caller.can_access(&tx) {
            return Err(PaymentError::Forbidden(format!(
                "transaction {} belongs to another payer",
                order_ref
            )));
        }

        if tx.status == TransactionStatus::Pending {
            match self.gateway.query_status(order_ref).await {
                Ok(report) => {
                    if let Some(status) = reconciled_status(&report.result_code) {
                        let outcome = self
                            .store
                            .apply_callback(
                                order_ref,
                                StatusUpdate {
                                    status,
                                    gateway_reference: report.reference,
                                    raw_payload: report.raw,
                                    actor: RECONCILIATION_ACTOR.to_string(),
                                },
                            )
                            .await?;
                        if outcome.changed {
                            info!(%order_ref, %status, "Transaction reconciled with gateway");
                        }
                        tx = outcome.transaction;
                    }
                }
                Err(e) => {
                    warn!(%order_ref, error = %e, "Status query failed; returning stored state");
                }
            }
        }

        let tx = self.ensure_proof(tx).await;
        Ok(StatusView::of(&tx, Utc::now()))
    }

    /// Forces a status without a gateway signature. Admin only; notes are mandatory.
    pub async fn admin_override(
        &self,
        caller: &Caller,
        transaction_id: Uuid,
        status: TransactionStatus,
        notes: &str,
    ) -> Result<StatusView, PaymentError> {
        if !caller.is_admin() {
            return Err(PaymentError::Forbidden(
                "status overrides require an administrator".to_string(),
            ));
        }
        validate_notes(notes)?;
        if status == TransactionStatus::Pending {
            return Err(PaymentError::Validation(
                "status: a transaction cannot be forced back to pending".to_string(),
            ));
        }

        let outcome = self
            .store
            .force_status(
                transaction_id,
                status,
                &caller.actor_label(),
                &sanitize_string(notes),
            )
            .await?;

        if outcome.changed {
            info!(
                %transaction_id,
                %status,
                actor = %caller.actor_label(),
                "Transaction status overridden"
            );
        }

        let tx = self.ensure_proof(outcome.transaction).await;
        Ok(StatusView::of(&tx, Utc::now()))
    }

    /// Receipt for a successful transaction; anything else reads as not found.
    pub async fn get_payment_detail(
        &self,
        caller: &Caller,
        transaction_id: Uuid,
    ) -> Result<Receipt, PaymentError> {
        let tx = self
            .store
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", transaction_id)))?;
        if !caller.can_access(&tx) {
            return Err(PaymentError::Forbidden(format!(
                "transaction {} belongs to another payer",
                transaction_id
            )));
        }
        if tx.status != TransactionStatus::Success {
            return Err(PaymentError::NotFound(format!(
                "no completed payment {}",
                transaction_id
            )));
        }

        let tx = self.ensure_proof(tx).await;
        Ok(Receipt::of(&tx))
    }

    /// Persists `expired` for stale pending transactions.
    pub async fn sweep_expired(&self, limit: i64) -> Result<u64, PaymentError> {
        self.store.expire_stale(Utc::now(), limit).await
    }

    /// Generates the proof artifact of a paid transaction if it has none yet.
    /// Failures leave the proof unavailable and never touch the payment itself.
    async fn ensure_proof(&self, mut tx: Transaction) -> Transaction {
        if tx.proof_path.is_some() {
            return tx;
        }
        let Some(payload) = ProofPayload::for_transaction(&tx) else {
            return tx;
        };

        match self.proofs.generate(tx.id, &payload).await {
            Ok(path) => match self.store.set_proof_path(tx.id, &path).await {
                Ok(()) => tx.proof_path = Some(path),
                Err(e) => error!(transaction_id = %tx.id, error = %e, "Failed to record proof path"),
            },
            Err(e) => warn!(transaction_id = %tx.id, error = %e, "Proof not yet available"),
        }
        tx
    }
}
