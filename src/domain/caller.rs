use serde::{Deserialize, Serialize};
use std::fmt;

use super::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    Member,
    Admin,
}

impl fmt::Display for CallerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerRole::Member => f.write_str("member"),
            CallerRole::Admin => f.write_str("admin"),
        }
    }
}

/// Authenticated identity of whoever is calling into the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub payer_id: i64,
    pub role: CallerRole,
}

impl Caller {
    pub fn member(payer_id: i64) -> Self {
        Self {
            payer_id,
            role: CallerRole::Member,
        }
    }

    pub fn admin(payer_id: i64) -> Self {
        Self {
            payer_id,
            role: CallerRole::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == CallerRole::Admin
    }

    pub fn can_access(&self, tx: &Transaction) -> bool {
        self.is_admin() || tx.payer_id == self.payer_id
    }

    /// Label written to the audit trail.
    pub fn actor_label(&self) -> String {
        format!("{}:{}", self.role, self.payer_id)
    }
}
