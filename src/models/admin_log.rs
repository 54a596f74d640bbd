use serde::Serialize;
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AdminAction {
    Broadcast,
    AdjustBalance,
    ClearBalance,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Broadcast => "broadcast",
            AdminAction::AdjustBalance => "adjust_balance",
            AdminAction::ClearBalance => "clear_balance",
        }
    }
}

/// Append-only audit record of an administrator action.
#[derive(Clone, Debug, Serialize)]
pub struct AdminLogEntry {
    pub admin_id: i64,
    pub action: String,
    pub target_id: Option<i64>,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub created_at: i64,
}

impl FromRow<'_, AnyRow> for AdminLogEntry {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(AdminLogEntry {
            admin_id: row.try_get("admin_id")?,
            action: row.try_get("action")?,
            target_id: row.try_get("target_id")?,
            amount: row.try_get("amount")?,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
