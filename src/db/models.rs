//! Row types for SQLx and their conversion into domain entities.

use chrono::{DateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    ItemKind, ItemRef, PayerProfile, PaymentMethod, Registration, RegistrationStatus,
    Transaction, TransactionStatus,
};
use crate::ports::{RepositoryError, RepositoryResult};

fn corrupt(table: &str, id: impl std::fmt::Display, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Corrupt(format!("{} {}: {}", table, id, detail))
}

#[derive(Debug, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub order_ref: String,
    pub registration_id: i64,
    pub payer_id: i64,
    pub item_kind: String,
    pub item_id: i64,
    pub amount: BigDecimal,
    pub method_code: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub va_number: Option<String>,
    pub qr_payload: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub callback_payload: Option<serde_json::Value>,
    pub proof_path: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRow {
    pub fn into_domain(self) -> RepositoryResult<Transaction> {
        let kind: ItemKind = self
            .item_kind
            .parse()
            .map_err(|e| corrupt("transaction", self.id, e))?;
        let status: TransactionStatus = self
            .status
            .parse()
            .map_err(|e| corrupt("transaction", self.id, e))?;

        Ok(Transaction {
            id: self.id,
            order_ref: self.order_ref,
            registration_id: self.registration_id,
            payer_id: self.payer_id,
            item: ItemRef::new(kind, self.item_id),
            amount: self.amount,
            method_code: self.method_code,
            status,
            gateway_reference: self.gateway_reference,
            payment_url: self.payment_url,
            va_number: self.va_number,
            qr_payload: self.qr_payload,
            expires_at: self.expires_at,
            callback_payload: self.callback_payload,
            proof_path: self.proof_path,
            paid_at: self.paid_at,
            gateway_claimed_at: self.gateway_claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct RegistrationRow {
    pub id: i64,
    pub payer_id: i64,
    pub item_kind: String,
    pub item_id: i64,
    pub status: String,
    pub transaction_id: Option<Uuid>,
}

impl RegistrationRow {
    pub fn into_domain(self) -> RepositoryResult<Registration> {
        let kind: ItemKind = self
            .item_kind
            .parse()
            .map_err(|e| corrupt("registration", self.id, e))?;
        let status: RegistrationStatus = self
            .status
            .parse()
            .map_err(|e| corrupt("registration", self.id, e))?;

        Ok(Registration {
            id: self.id,
            payer_id: self.payer_id,
            item: ItemRef::new(kind, self.item_id),
            status,
            transaction_id: self.transaction_id,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub title: String,
    pub fee: BigDecimal,
}

#[derive(Debug, FromRow)]
pub struct PaymentMethodRow {
    pub code: String,
    pub name: String,
    pub active: bool,
}

impl From<PaymentMethodRow> for PaymentMethod {
    fn from(row: PaymentMethodRow) -> Self {
        PaymentMethod {
            code: row.code,
            name: row.name,
            active: row.active,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ProfileRow {
    pub id: i64,
    pub name: String,
    pub email: String,
}

impl From<ProfileRow> for PayerProfile {
    fn from(row: ProfileRow) -> Self {
        PayerProfile {
            id: row.id,
            name: row.name,
            email: row.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(status: &str, kind: &str) -> TransactionRow {
        let now = Utc::now();
        TransactionRow {
            id: Uuid::new_v4(),
            order_ref: "TRX-42-X7-1".to_string(),
            registration_id: 1,
            payer_id: 42,
            item_kind: kind.to_string(),
            item_id: 7,
            amount: BigDecimal::from_str("150000.00").unwrap(),
            method_code: "VC".to_string(),
            status: status.to_string(),
            gateway_reference: None,
            payment_url: None,
            va_number: None,
            qr_payload: None,
            expires_at: now,
            callback_payload: None,
            proof_path: None,
            paid_at: None,
            gateway_claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn transaction_row_maps_to_domain() {
        let tx = row("pending", "exam").into_domain().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.item, ItemRef::new(ItemKind::Exam, 7));
        assert_eq!(tx.gateway_amount(), "150000");
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let result = row("completed", "exam").into_domain();
        assert!(matches!(result, Err(RepositoryError::Corrupt(_))));
    }

    #[test]
    fn registration_row_maps_to_domain() {
        let reg = RegistrationRow {
            id: 3,
            payer_id: 42,
            item_kind: "event".to_string(),
            item_id: 9,
            status: "paid".to_string(),
            transaction_id: None,
        }
        .into_domain()
        .unwrap();
        assert_eq!(reg.status, RegistrationStatus::Paid);
        assert_eq!(reg.item.kind, ItemKind::Event);
    }
}
