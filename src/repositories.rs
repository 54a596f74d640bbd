use sqlx::AnyPool;

pub mod admin_log;
pub mod users;

// Schema kept to the portable subset so the same statements run on both
// Postgres and SQLite. Flags and timestamps are plain BIGINT columns.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        user_id BIGINT PRIMARY KEY,
        username TEXT,
        first_name TEXT,
        last_name TEXT,
        subscribed BIGINT NOT NULL DEFAULT 0,
        balance BIGINT NOT NULL DEFAULT 0,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS referrals (
        referred_id BIGINT PRIMARY KEY,
        referrer_id BIGINT NOT NULL,
        created_at BIGINT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals (referrer_id)",
    "CREATE TABLE IF NOT EXISTS admin_log (
        admin_id BIGINT NOT NULL,
        action TEXT NOT NULL,
        target_id BIGINT,
        amount BIGINT,
        reason TEXT,
        created_at BIGINT NOT NULL
    )",
];

pub async fn init_schema(pool: &AnyPool) -> Result<(), anyhow::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::any::AnyPoolOptions;
    use sqlx::AnyPool;
    use std::sync::Once;

    static DRIVERS: Once = Once::new();

    /// In-memory SQLite through the same `AnyPool` code path production uses.
    /// One connection, so the shared in-memory database stays alive.
    pub async fn memory_pool() -> AnyPool {
        DRIVERS.call_once(sqlx::any::install_default_drivers);

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        super::init_schema(&pool).await.unwrap();
        pool
    }
}
