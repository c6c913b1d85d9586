//! Command repository for database operations.
//!
//! Every status mutation carries its transition guard in the WHERE clause,
//! so replayed queue deliveries cannot move a row backwards: `sent` is only
//! reachable from `pending`, `acknowledged` only from `sent`, and `failed`
//! from either non-terminal state.

use sqlx::PgPool;

use crate::entities::CommandEntity;
use crate::metrics::QueryTimer;

/// Repository for command-related database operations.
#[derive(Clone)]
pub struct CommandRepository {
    pool: PgPool,
}

impl CommandRepository {
    /// Creates a new CommandRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending command row.
    pub async fn create(
        &self,
        id: &str,
        device_id: i64,
        kind: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<CommandEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_command");
        let result = sqlx::query_as::<_, CommandEntity>(
            r#"
            INSERT INTO commands (id, device_id, kind, payload, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING id, device_id, kind, payload, status, created_at,
                      sent_at, ack_at, failed_at, response, error
            "#,
        )
        .bind(id)
        .bind(device_id)
        .bind(kind)
        .bind(payload)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Get a command by id.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<CommandEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_command_by_id");
        let result = sqlx::query_as::<_, CommandEntity>(
            r#"
            SELECT id, device_id, kind, payload, status, created_at,
                   sent_at, ack_at, failed_at, response, error
            FROM commands
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// `pending -> sent`. Returns false when the row was missing or not
    /// pending (e.g. a replayed delivery after the ack already landed).
    pub async fn mark_sent(&self, id: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_command_sent");
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'sent', sent_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected() > 0)
    }

    /// `sent -> acknowledged`, recording the device's reply.
    pub async fn mark_acknowledged(
        &self,
        id: &str,
        response: &str,
    ) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_command_acknowledged");
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'acknowledged', ack_at = NOW(), response = $2
            WHERE id = $1 AND status = 'sent'
            "#,
        )
        .bind(id)
        .bind(response)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected() > 0)
    }

    /// `pending|sent -> failed` with a reason.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("mark_command_failed");
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'failed', failed_at = NOW(), error = $2
            WHERE id = $1 AND status IN ('pending', 'sent')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected() > 0)
    }

    /// Fail commands with no terminal outcome after `older_than_mins`:
    /// rows stuck in `pending` (delivery never settled) and rows stuck in
    /// `sent` (device never replied). Returns the number of rows expired.
    pub async fn expire_stale(&self, older_than_mins: i64) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("expire_stale_commands");
        let result = sqlx::query(
            r#"
            UPDATE commands
            SET status = 'failed', failed_at = NOW(), error = 'expired'
            WHERE (status = 'pending'
                   AND created_at < NOW() - make_interval(mins => $1))
               OR (status = 'sent'
                   AND sent_at < NOW() - make_interval(mins => $1))
            "#,
        )
        .bind(older_than_mins as i32)
        .execute(&self.pool)
        .await?;
        timer.record();
        Ok(result.rows_affected())
    }
}
