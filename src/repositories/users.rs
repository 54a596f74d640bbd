use sqlx::AnyPool;

use crate::models::referrals::ReferralEdge;
use crate::models::users::{LedgerStats, NewUser, ReferralInfo, RegisterOutcome, User};

const PAGE_SIZE: i64 = 1000;

#[derive(Clone)]
pub struct UserRepository {
    conn: AnyPool,
}

impl UserRepository {
    pub fn new(conn: AnyPool) -> Self {
        Self { conn }
    }

    /// Registers a user and, when applicable, the referral edge that brought
    /// them here. Safe to call again for a known user: the second call only
    /// refreshes display fields, never balance or `created_at`.
    ///
    /// The insert, the edge, and the referrer credit commit as one
    /// transaction, so concurrent duplicate events cannot double-count.
    pub async fn register(&self, new_user: &NewUser) -> Result<RegisterOutcome, anyhow::Error> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.conn.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO users (user_id, username, first_name, last_name, subscribed, balance, created_at)
             VALUES ($1, $2, $3, $4, 0, 0, $5)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(new_user.user_id)
        .bind(&new_user.username)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let created = inserted.rows_affected() == 1;
        if !created {
            sqlx::query(
                "UPDATE users SET username = $2, first_name = $3, last_name = $4 WHERE user_id = $1",
            )
            .bind(new_user.user_id)
            .bind(&new_user.username)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .execute(&mut *tx)
            .await?;
        }

        let mut referral_credited = false;
        if let Some(referrer_id) = new_user.referrer_id {
            if referrer_id != new_user.user_id {
                let referrer_known: Option<i64> =
                    sqlx::query_scalar("SELECT user_id FROM users WHERE user_id = $1")
                        .bind(referrer_id)
                        .fetch_optional(&mut *tx)
                        .await?;

                if referrer_known.is_some() {
                    // Keyed by referred_id: a user is linked to at most one
                    // referrer, and a replayed event changes nothing.
                    let edge = sqlx::query(
                        "INSERT INTO referrals (referred_id, referrer_id, created_at)
                         VALUES ($1, $2, $3)
                         ON CONFLICT (referred_id) DO NOTHING",
                    )
                    .bind(new_user.user_id)
                    .bind(referrer_id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;

                    if edge.rows_affected() == 1 {
                        sqlx::query("UPDATE users SET balance = balance + 1 WHERE user_id = $1")
                            .bind(referrer_id)
                            .execute(&mut *tx)
                            .await?;
                        referral_credited = true;
                    }
                }
            }
        }

        tx.commit().await?;

        Ok(RegisterOutcome {
            created,
            referral_credited,
        })
    }

    /// Upserts the subscription flag: a user we have never seen gets a row
    /// with defaults rather than a silent miss.
    pub async fn set_subscribed(&self, user_id: i64, verified: bool) -> Result<(), anyhow::Error> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO users (user_id, subscribed, balance, created_at)
             VALUES ($1, $2, 0, $3)
             ON CONFLICT (user_id) DO UPDATE SET subscribed = excluded.subscribed",
        )
        .bind(user_id)
        .bind(if verified { 1i64 } else { 0i64 })
        .bind(now)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT user_id, username, first_name, last_name, subscribed, balance, created_at
             FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    pub async fn referral_info(
        &self,
        user_id: i64,
        threshold: i64,
    ) -> Result<ReferralInfo, anyhow::Error> {
        let invited_count: i64 = sqlx::query_scalar(
            "SELECT CAST(COUNT(*) AS BIGINT) FROM referrals WHERE referrer_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.conn)
        .await?;

        let edge = sqlx::query_as::<_, ReferralEdge>(
            "SELECT referred_id, referrer_id, created_at FROM referrals WHERE referred_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(ReferralInfo {
            invited_count,
            referrer_id: edge.map(|e| e.referrer_id),
            needed_count: (threshold - invited_count).max(0),
        })
    }

    /// Adds `delta` (possibly negative) to the balance, clamping at zero.
    /// Returns false when no such user exists.
    pub async fn adjust_balance(&self, user_id: i64, delta: i64) -> Result<bool, anyhow::Error> {
        let updated = sqlx::query(
            "UPDATE users
             SET balance = CASE WHEN balance + $2 < 0 THEN 0 ELSE balance + $2 END
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(delta)
        .execute(&self.conn)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    /// Atomically zeroes the balance and returns the prior value, or `None`
    /// when no such user exists. Uses a compare-and-swap update so two
    /// concurrent calls cannot both claim the same amount.
    pub async fn clear_balance(&self, user_id: i64) -> Result<Option<i64>, anyhow::Error> {
        loop {
            let balance: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM users WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(&self.conn)
                    .await?;

            let Some(balance) = balance else {
                return Ok(None);
            };
            if balance == 0 {
                return Ok(Some(0));
            }

            let updated =
                sqlx::query("UPDATE users SET balance = 0 WHERE user_id = $1 AND balance = $2")
                    .bind(user_id)
                    .bind(balance)
                    .execute(&self.conn)
                    .await?;

            if updated.rows_affected() == 1 {
                return Ok(Some(balance));
            }
            // Lost the race, re-read and try again.
        }
    }

    /// Snapshot of all known user ids, keyset-paged internally.
    pub async fn list_user_ids(&self) -> Result<Vec<i64>, anyhow::Error> {
        self.list_user_ids_paged(PAGE_SIZE).await
    }

    async fn list_user_ids_paged(&self, page_size: i64) -> Result<Vec<i64>, anyhow::Error> {
        let mut ids = Vec::new();
        let mut cursor = i64::MIN;

        loop {
            let page: Vec<i64> = sqlx::query_scalar(
                "SELECT user_id FROM users WHERE user_id > $1 ORDER BY user_id LIMIT $2",
            )
            .bind(cursor)
            .bind(page_size)
            .fetch_all(&self.conn)
            .await?;

            let full = page.len() as i64 == page_size;
            if let Some(last) = page.last() {
                cursor = *last;
            }
            ids.extend(page);
            if !full {
                return Ok(ids);
            }
        }
    }

    pub async fn stats(&self) -> Result<LedgerStats, anyhow::Error> {
        let users: i64 = sqlx::query_scalar("SELECT CAST(COUNT(*) AS BIGINT) FROM users")
            .fetch_one(&self.conn)
            .await?;

        let subscribed: i64 = sqlx::query_scalar(
            "SELECT CAST(COUNT(*) AS BIGINT) FROM users WHERE subscribed = 1",
        )
        .fetch_one(&self.conn)
        .await?;

        let balance_total: i64 =
            sqlx::query_scalar("SELECT CAST(COALESCE(SUM(balance), 0) AS BIGINT) FROM users")
                .fetch_one(&self.conn)
                .await?;

        let referral_total: i64 =
            sqlx::query_scalar("SELECT CAST(COUNT(*) AS BIGINT) FROM referrals")
                .fetch_one(&self.conn)
                .await?;

        Ok(LedgerStats {
            users,
            subscribed,
            balance_total,
            referral_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::memory_pool;

    async fn repo() -> UserRepository {
        UserRepository::new(memory_pool().await)
    }

    fn new_user(user_id: i64, referrer_id: Option<i64>) -> NewUser {
        NewUser {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: Some("Test".to_string()),
            last_name: None,
            referrer_id,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let repo = repo().await;

        let first = repo.register(&new_user(1, None)).await.unwrap();
        assert!(first.created);

        repo.adjust_balance(1, 5).await.unwrap();
        let before = repo.get_user(1).await.unwrap().unwrap();

        let mut refreshed = new_user(1, None);
        refreshed.username = Some("renamed".to_string());
        let second = repo.register(&refreshed).await.unwrap();
        assert!(!second.created);
        assert!(!second.referral_credited);

        let after = repo.get_user(1).await.unwrap().unwrap();
        assert_eq!(after.balance, 5);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.username.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn self_referral_creates_nothing() {
        let repo = repo().await;

        let outcome = repo.register(&new_user(1, Some(1))).await.unwrap();
        assert!(outcome.created);
        assert!(!outcome.referral_credited);

        let info = repo.referral_info(1, 30).await.unwrap();
        assert_eq!(info.invited_count, 0);
        assert_eq!(info.referrer_id, None);
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn duplicate_edge_credits_once() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        let first = repo.register(&new_user(2, Some(1))).await.unwrap();
        assert!(first.referral_credited);

        // Replayed event for the same referred user.
        let second = repo.register(&new_user(2, Some(1))).await.unwrap();
        assert!(!second.referral_credited);

        let info = repo.referral_info(1, 30).await.unwrap();
        assert_eq!(info.invited_count, 1);
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 1);
    }

    #[tokio::test]
    async fn referred_user_keeps_first_referrer() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        repo.register(&new_user(2, None)).await.unwrap();
        repo.register(&new_user(3, Some(1))).await.unwrap();

        let outcome = repo.register(&new_user(3, Some(2))).await.unwrap();
        assert!(!outcome.referral_credited);

        let info = repo.referral_info(3, 30).await.unwrap();
        assert_eq!(info.referrer_id, Some(1));
        assert_eq!(repo.referral_info(2, 30).await.unwrap().invited_count, 0);
    }

    #[tokio::test]
    async fn unknown_referrer_is_ignored() {
        let repo = repo().await;

        let outcome = repo.register(&new_user(2, Some(77))).await.unwrap();
        assert!(outcome.created);
        assert!(!outcome.referral_credited);
        assert_eq!(repo.stats().await.unwrap().referral_total, 0);
    }

    #[tokio::test]
    async fn referral_scenario() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        repo.register(&new_user(2, Some(1))).await.unwrap();

        let info = repo.referral_info(1, 30).await.unwrap();
        assert_eq!(info.invited_count, 1);
        assert_eq!(info.needed_count, 29);
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 1);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.referral_total, 1);
        assert_eq!(stats.balance_total, 1);
    }

    #[tokio::test]
    async fn adjust_balance_clamps_at_zero() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        assert!(repo.adjust_balance(1, 5).await.unwrap());
        assert!(repo.adjust_balance(1, -10).await.unwrap());
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 0);

        assert!(repo.adjust_balance(1, 3).await.unwrap());
        assert!(repo.adjust_balance(1, -2).await.unwrap());
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 1);

        assert!(!repo.adjust_balance(404, 1).await.unwrap());
    }

    #[tokio::test]
    async fn clear_balance_returns_prior_value() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        repo.adjust_balance(1, 7).await.unwrap();

        assert_eq!(repo.clear_balance(1).await.unwrap(), Some(7));
        assert_eq!(repo.get_user(1).await.unwrap().unwrap().balance, 0);
        assert_eq!(repo.clear_balance(1).await.unwrap(), Some(0));
        assert_eq!(repo.clear_balance(404).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_subscribed_upserts_missing_user() {
        let repo = repo().await;

        repo.set_subscribed(99, true).await.unwrap();
        let user = repo.get_user(99).await.unwrap().unwrap();
        assert!(user.subscribed);
        assert_eq!(user.balance, 0);

        repo.set_subscribed(99, false).await.unwrap();
        assert!(!repo.get_user(99).await.unwrap().unwrap().subscribed);
    }

    #[tokio::test]
    async fn subscribed_count_tracks_flag() {
        let repo = repo().await;

        repo.register(&new_user(1, None)).await.unwrap();
        repo.register(&new_user(2, None)).await.unwrap();
        repo.set_subscribed(1, true).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.users, 2);
        assert_eq!(stats.subscribed, 1);
    }

    #[tokio::test]
    async fn list_user_ids_crosses_page_boundaries() {
        let repo = repo().await;

        for id in 1..=5 {
            repo.register(&new_user(id, None)).await.unwrap();
        }

        let ids = repo.list_user_ids_paged(2).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
