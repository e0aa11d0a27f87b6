use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phoenix_types::PhoenixResult;
use sqlx::PgPool;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn revoke(&self, jti: &str, user_id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> PhoenixResult<()>;
    async fn is_revoked(&self, jti: &str) -> PhoenixResult<bool>;

    /// Rows whose `expires_at` has already passed; safe to forget since the
    /// JWT itself is unverifiable past expiry regardless of blacklist state.
    async fn purge_expired(&self, now: DateTime<Utc>) -> PhoenixResult<u64>;
}

pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn revoke(&self, jti: &str, user_id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> PhoenixResult<()> {
        sqlx::query(
            "INSERT INTO token_blacklist (jti, user_id, expires_at, revoked_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> PhoenixResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT jti FROM token_blacklist WHERE jti = $1")
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> PhoenixResult<u64> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
