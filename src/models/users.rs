use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub subscribed: bool,
    pub balance: i64,
    /// Unix timestamp, set once on first registration.
    pub created_at: i64,
}

// Flags are stored as BIGINT 0/1 so the same queries run on both
// Postgres and SQLite through the Any driver.
impl FromRow<'_, AnyRow> for User {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            subscribed: row.try_get::<i64, _>("subscribed")? != 0,
            balance: row.try_get("balance")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub referrer_id: Option<i64>,
}

#[derive(Clone, Copy, Debug)]
pub struct RegisterOutcome {
    /// True when this call inserted the user row.
    pub created: bool,
    /// True when this call recorded a referral edge and credited the referrer.
    pub referral_credited: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReferralInfo {
    pub invited_count: i64,
    pub referrer_id: Option<i64>,
    /// Referrals still needed to reach the configured threshold, never negative.
    pub needed_count: i64,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct LedgerStats {
    pub users: i64,
    pub subscribed: i64,
    pub balance_total: i64,
    pub referral_total: i64,
}
