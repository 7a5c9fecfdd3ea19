use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::db::models::{
    ItemRow, PaymentMethodRow, ProfileRow, RegistrationRow, TransactionRow,
};
use crate::domain::{ItemKind, RegistrationStatus, Transaction, TransactionStatus};
use crate::ports::GatewayAck;

// --- Transaction Queries ---

pub async fn insert_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    tx: &Transaction,
) -> Result<TransactionRow> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        INSERT INTO transactions (
            id, order_ref, registration_id, payer_id, item_kind, item_id, amount,
            method_code, status, expires_at, gateway_claimed_at, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(tx.id)
    .bind(&tx.order_ref)
    .bind(tx.registration_id)
    .bind(tx.payer_id)
    .bind(tx.item.kind.as_str())
    .bind(tx.item.id)
    .bind(&tx.amount)
    .bind(&tx.method_code)
    .bind(tx.status.as_str())
    .bind(tx.expires_at)
    .bind(tx.gateway_claimed_at)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .fetch_one(&mut **executor)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_transaction_by_order_ref(
    pool: &PgPool,
    order_ref: &str,
) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE order_ref = $1")
        .bind(order_ref)
        .fetch_optional(pool)
        .await
}

pub async fn lock_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **executor)
        .await
}

pub async fn lock_transaction_by_order_ref(
    executor: &mut SqlxTransaction<'_, Postgres>,
    order_ref: &str,
) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        "SELECT * FROM transactions WHERE order_ref = $1 FOR UPDATE",
    )
    .bind(order_ref)
    .fetch_optional(&mut **executor)
    .await
}

/// The registration's pending transaction if it has one, otherwise its latest.
pub async fn lock_current_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    registration_id: i64,
) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT * FROM transactions
        WHERE registration_id = $1
        ORDER BY (status = 'pending') DESC, created_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(registration_id)
    .fetch_optional(&mut **executor)
    .await
}

pub async fn claim_transaction(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<TransactionRow> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        UPDATE transactions
        SET gateway_claimed_at = $2, updated_at = $2
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(now)
    .fetch_one(&mut **executor)
    .await
}

/// Clears the claim taken at `claimed_at`, if it is still held.
pub async fn release_claim(pool: &PgPool, id: Uuid, claimed_at: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET gateway_claimed_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'pending' AND gateway_claimed_at = $2
        "#,
    )
    .bind(id)
    .bind(claimed_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Stores the acknowledgement if the claim taken at `claimed_at` is still held.
pub async fn record_gateway_ack(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    claimed_at: DateTime<Utc>,
    ack: &GatewayAck,
    now: DateTime<Utc>,
) -> Result<Option<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        UPDATE transactions
        SET gateway_reference = $2,
            payment_url = $3,
            va_number = $4,
            qr_payload = $5,
            gateway_claimed_at = NULL,
            updated_at = $6
        WHERE id = $1 AND status = 'pending' AND gateway_claimed_at = $7
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&ack.reference)
    .bind(&ack.payment_url)
    .bind(&ack.va_number)
    .bind(&ack.qr_payload)
    .bind(now)
    .bind(claimed_at)
    .fetch_optional(&mut **executor)
    .await
}

/// Moves a transaction to `status`. Sets `paid_at` on success and clears any claim.
pub async fn update_transaction_status(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: Uuid,
    status: TransactionStatus,
    gateway_reference: Option<&str>,
    callback_payload: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<TransactionRow> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        UPDATE transactions
        SET status = $2,
            gateway_reference = COALESCE($3, gateway_reference),
            callback_payload = COALESCE($4, callback_payload),
            paid_at = CASE WHEN $2 = 'success' THEN $5 ELSE paid_at END,
            gateway_claimed_at = NULL,
            updated_at = $5
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(gateway_reference)
    .bind(callback_payload)
    .bind(now)
    .fetch_one(&mut **executor)
    .await
}

pub async fn set_proof_path(pool: &PgPool, id: Uuid, path: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE transactions SET proof_path = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(path)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Stale pending rows not currently locked by another worker.
pub async fn lock_stale_pending(
    executor: &mut SqlxTransaction<'_, Postgres>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TransactionRow>> {
    sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT * FROM transactions
        WHERE status = 'pending' AND expires_at <= $1
        ORDER BY expires_at ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(&mut **executor)
    .await
}

// --- Registration Queries ---

pub async fn get_registration_by_payer_and_item<'e, E: PgExecutor<'e>>(
    executor: E,
    payer_id: i64,
    kind: ItemKind,
    item_id: i64,
) -> Result<Option<RegistrationRow>> {
    sqlx::query_as::<_, RegistrationRow>(
        r#"
        SELECT id, payer_id, item_kind, item_id, status, transaction_id
        FROM registrations
        WHERE payer_id = $1 AND item_kind = $2 AND item_id = $3
        "#,
    )
    .bind(payer_id)
    .bind(kind.as_str())
    .bind(item_id)
    .fetch_optional(executor)
    .await
}

pub async fn lock_registration(
    executor: &mut SqlxTransaction<'_, Postgres>,
    id: i64,
) -> Result<Option<RegistrationRow>> {
    sqlx::query_as::<_, RegistrationRow>(
        r#"
        SELECT id, payer_id, item_kind, item_id, status, transaction_id
        FROM registrations
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **executor)
    .await
}

/// Sets a registration's status. Returns 0 only when the row does not exist.
pub async fn set_registration_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: RegistrationStatus,
) -> Result<u64> {
    // A settled seat is never downgraded by a late failure.
    let new_status = if status == RegistrationStatus::Cancelled {
        "CASE WHEN status IN ('paid', 'attended') THEN status ELSE $2 END"
    } else {
        "$2"
    };
    let sql = format!(
        "UPDATE registrations SET status = {}, updated_at = NOW() WHERE id = $1",
        new_status
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(status.as_str())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn link_registration_transaction<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    transaction_id: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE registrations SET transaction_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(transaction_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

// --- Catalog Queries ---

pub async fn get_item(pool: &PgPool, kind: ItemKind, id: i64) -> Result<Option<ItemRow>> {
    let sql = match kind {
        ItemKind::Exam => "SELECT id, title, fee FROM exams WHERE id = $1",
        ItemKind::Event => "SELECT id, title, fee FROM events WHERE id = $1",
    };
    sqlx::query_as::<_, ItemRow>(sql)
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_payment_method(pool: &PgPool, code: &str) -> Result<Option<PaymentMethodRow>> {
    sqlx::query_as::<_, PaymentMethodRow>(
        "SELECT code, name, active FROM payment_methods WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

pub async fn get_profile(pool: &PgPool, id: i64) -> Result<Option<ProfileRow>> {
    sqlx::query_as::<_, ProfileRow>("SELECT id, name, email FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}
