//! Transaction domain entity.
//! Framework-agnostic representation of one attempt to pay for one registration.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::registration::{ItemRef, Registration, RegistrationStatus};
use super::PaymentError;

pub const ORDER_REF_PREFIX: &str = "TRX";

/// Default lifetime of a pending transaction.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only `pending` may move, and only to a terminal status.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == TransactionStatus::Pending && next.is_terminal()
    }

    /// Registration status that must be written together with this status.
    pub fn registration_cascade(&self) -> Option<RegistrationStatus> {
        match self {
            TransactionStatus::Success => Some(RegistrationStatus::Paid),
            TransactionStatus::Failed => Some(RegistrationStatus::Cancelled),
            TransactionStatus::Pending | TransactionStatus::Expired => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(PaymentError::Validation(format!(
                "status: unknown transaction status '{}'",
                other
            ))),
        }
    }
}

/// Domain entity representing a payment transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_ref: String,
    pub registration_id: i64,
    pub payer_id: i64,
    pub item: ItemRef,
    pub amount: BigDecimal,
    pub method_code: String,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub va_number: Option<String>,
    pub qr_payload: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub callback_payload: Option<serde_json::Value>,
    pub proof_path: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Set while one caller owns the outbound gateway request.
    pub gateway_claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A fresh pending transaction, already claimed by its creator.
    pub fn new(
        registration: &Registration,
        amount: BigDecimal,
        method_code: String,
        expiry: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_ref: mint_order_ref(registration.payer_id, registration.item, now),
            registration_id: registration.id,
            payer_id: registration.payer_id,
            item: registration.item,
            amount,
            method_code,
            status: TransactionStatus::Pending,
            gateway_reference: None,
            payment_url: None,
            va_number: None,
            qr_payload: None,
            expires_at: now + expiry,
            callback_payload: None,
            proof_path: None,
            paid_at: None,
            gateway_claimed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Status as seen by a reader at `now`; stale pending rows read as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> TransactionStatus {
        if self.status == TransactionStatus::Pending && self.is_expired_at(now) {
            TransactionStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_reusable_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == TransactionStatus::Pending
    }

    pub fn is_acknowledged(&self) -> bool {
        self.gateway_reference.is_some()
    }

    pub fn claim_is_live(&self, now: DateTime<Utc>, claim_ttl: Duration) -> bool {
        self.gateway_claimed_at
            .map(|claimed| now - claimed < claim_ttl)
            .unwrap_or(false)
    }

    pub fn gateway_amount(&self) -> String {
        format_gateway_amount(&self.amount)
    }

    /// Applies a forward transition in place. Callers check `can_transition_to` first.
    pub fn transition_to(&mut self, next: TransactionStatus, now: DateTime<Utc>) {
        self.status = next;
        self.updated_at = now;
        self.gateway_claimed_at = None;
        if next == TransactionStatus::Success {
            self.paid_at = Some(now);
        }
    }
}

/// Order reference shared with the gateway: `TRX-{payer}-{kind}{item}-{unix millis}`.
pub fn mint_order_ref(payer_id: i64, item: ItemRef, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}{}-{}",
        ORDER_REF_PREFIX,
        payer_id,
        item.kind.code(),
        item.id,
        now.timestamp_millis()
    )
}

/// Renders an amount exactly as the gateway signs it.
///
/// Integral values carry no decimals (`150000.00` becomes `150000`); fractional
/// values drop trailing zeros (`150.50` becomes `150.5`).
pub fn format_gateway_amount(amount: &BigDecimal) -> String {
    let integral = amount.with_scale(0);
    if &integral == amount {
        integral.to_string()
    } else {
        amount.normalized().to_string()
    }
}

/// What a create request should do given the registration's current state.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationPlan {
    /// Registration is settled; nothing may be created.
    AlreadyPaid(String),
    /// Reuse the live transaction; it already carries a gateway acknowledgement.
    Ready(Transaction),
    /// Reuse the live transaction; another caller is requesting payment right now.
    InFlight(Transaction),
    /// Reuse the live transaction and take over its gateway request.
    Reclaim(Transaction),
    /// Persist the stale transaction as expired, then mint a new one.
    Supersede(Transaction),
    /// No usable transaction; mint a new one.
    Mint,
}

impl ReservationPlan {
    pub fn decide(
        registration: &Registration,
        current: Option<&Transaction>,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> Self {
        if let Some(current) = current {
            match current.status {
                TransactionStatus::Success => {
                    return ReservationPlan::AlreadyPaid(current.order_ref.clone())
                }
                TransactionStatus::Pending if current.is_reusable_at(now) => {
                    return if current.is_acknowledged() {
                        ReservationPlan::Ready(current.clone())
                    } else if current.claim_is_live(now, claim_ttl) {
                        ReservationPlan::InFlight(current.clone())
                    } else {
                        ReservationPlan::Reclaim(current.clone())
                    };
                }
                TransactionStatus::Pending => {
                    if registration.status.is_settled() {
                        return ReservationPlan::AlreadyPaid(format!("registration {}", registration.id));
                    }
                    return ReservationPlan::Supersede(current.clone());
                }
                TransactionStatus::Failed | TransactionStatus::Expired => {}
            }
        }

        if registration.status.is_settled() {
            return ReservationPlan::AlreadyPaid(format!("registration {}", registration.id));
        }

        ReservationPlan::Mint
    }
}
