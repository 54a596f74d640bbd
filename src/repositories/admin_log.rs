use sqlx::AnyPool;

use crate::models::admin_log::{AdminAction, AdminLogEntry};

#[derive(Clone)]
pub struct AdminLogRepository {
    conn: AnyPool,
}

impl AdminLogRepository {
    pub fn new(conn: AnyPool) -> Self {
        Self { conn }
    }

    pub async fn record(
        &self,
        admin_id: i64,
        action: AdminAction,
        target_id: Option<i64>,
        amount: Option<i64>,
        reason: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT INTO admin_log (admin_id, action, target_id, amount, reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(admin_id)
        .bind(action.as_str())
        .bind(target_id)
        .bind(amount)
        .bind(reason)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AdminLogEntry>, anyhow::Error> {
        let entries = sqlx::query_as::<_, AdminLogEntry>(
            "SELECT admin_id, action, target_id, amount, reason, created_at
             FROM admin_log ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::memory_pool;

    #[tokio::test]
    async fn records_and_lists_entries() {
        let repo = AdminLogRepository::new(memory_pool().await);

        repo.record(7, AdminAction::AdjustBalance, Some(42), Some(-5), Some("refund"))
            .await
            .unwrap();
        repo.record(7, AdminAction::Broadcast, None, Some(120), None)
            .await
            .unwrap();

        let entries = repo.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| {
            e.action == "adjust_balance" && e.target_id == Some(42) && e.amount == Some(-5)
        }));
        assert!(entries
            .iter()
            .any(|e| e.action == "broadcast" && e.amount == Some(120)));
    }
}
