use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};

/// One recorded (inviter, invitee) relationship. A referred user is linked
/// to at most one referrer, so the edge is keyed by `referred_id`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferralEdge {
    pub referred_id: i64,
    pub referrer_id: i64,
    pub created_at: i64,
}

impl FromRow<'_, AnyRow> for ReferralEdge {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(ReferralEdge {
            referred_id: row.try_get("referred_id")?,
            referrer_id: row.try_get("referrer_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
