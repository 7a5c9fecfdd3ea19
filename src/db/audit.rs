use serde_json::Value;
use sqlx::{Postgres, Result, Transaction as SqlxTransaction};
use uuid::Uuid;

pub const ENTITY_TRANSACTION: &str = "transaction";

pub const ACTION_CREATED: &str = "created";
pub const ACTION_STATUS_CHANGED: &str = "status_changed";
pub const ACTION_FIELD_UPDATED: &str = "field_updated";

/// Append-only audit trail, written inside the caller's database transaction.
pub struct AuditLog;

impl AuditLog {
    pub async fn log_creation(
        executor: &mut SqlxTransaction<'_, Postgres>,
        entity_id: Uuid,
        entity_type: &str,
        new_val: Value,
        actor: &str,
    ) -> Result<()> {
        Self::insert(executor, entity_id, entity_type, ACTION_CREATED, None, Some(new_val), actor)
            .await
    }

    pub async fn log_status_change(
        executor: &mut SqlxTransaction<'_, Postgres>,
        entity_id: Uuid,
        entity_type: &str,
        old_val: Value,
        new_val: Value,
        actor: &str,
    ) -> Result<()> {
        Self::insert(
            executor,
            entity_id,
            entity_type,
            ACTION_STATUS_CHANGED,
            Some(old_val),
            Some(new_val),
            actor,
        )
        .await
    }

    pub async fn log_field_update(
        executor: &mut SqlxTransaction<'_, Postgres>,
        entity_id: Uuid,
        entity_type: &str,
        field: &str,
        old_val: Value,
        new_val: Value,
        actor: &str,
    ) -> Result<()> {
        Self::insert(
            executor,
            entity_id,
            entity_type,
            ACTION_FIELD_UPDATED,
            Some(keyed(field, old_val)),
            Some(keyed(field, new_val)),
            actor,
        )
        .await
    }

    async fn insert(
        executor: &mut SqlxTransaction<'_, Postgres>,
        entity_id: Uuid,
        entity_type: &str,
        action: &str,
        old_val: Option<Value>,
        new_val: Option<Value>,
        actor: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (entity_id, entity_type, action, old_val, new_val, actor)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entity_id)
        .bind(entity_type)
        .bind(action)
        .bind(old_val)
        .bind(new_val)
        .bind(actor)
        .execute(&mut **executor)
        .await?;

        Ok(())
    }
}

fn keyed(field: &str, value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), value);
    Value::Object(map)
}
