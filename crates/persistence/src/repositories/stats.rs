//! Aggregate statistics queries.

use domain::models::SystemStats;
use sqlx::PgPool;

use crate::metrics::QueryTimer;

/// Repository for system-wide statistics.
#[derive(Clone)]
pub struct StatsRepository {
    pool: PgPool,
}

impl StatsRepository {
    /// Creates a new StatsRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Snapshot counts across devices, locations, alerts and commands in
    /// one round trip.
    pub async fn system_stats(&self) -> Result<SystemStats, sqlx::Error> {
        let timer = QueryTimer::new("get_system_stats");
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM devices),
                (SELECT COUNT(*) FROM devices WHERE online = true),
                (SELECT COUNT(*) FROM locations WHERE recorded_at > NOW() - INTERVAL '24 hours'),
                (SELECT COUNT(*) FROM alerts WHERE resolved = false),
                (SELECT COUNT(*) FROM commands WHERE status = 'pending')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        timer.record();
        Ok(SystemStats {
            devices_total: row.0,
            devices_online: row.1,
            locations_24h: row.2,
            alerts_open: row.3,
            commands_pending: row.4,
        })
    }
}
