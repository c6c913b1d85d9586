//! Alert repository for database operations.

use domain::models::NewAlert;
use sqlx::PgPool;

use crate::entities::AlertEntity;
use crate::metrics::QueryTimer;

/// Repository for alert-related database operations.
#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    /// Creates a new AlertRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an alert record. New alerts start unresolved; the geography
    /// point is NULL when the alarm frame carried no position.
    pub async fn insert(&self, input: NewAlert) -> Result<AlertEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_alert");
        let result = sqlx::query_as::<_, AlertEntity>(
            r#"
            INSERT INTO alerts (
                device_id, kind, message, latitude, longitude,
                triggered_at, raw, resolved, geom
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, false,
                    ST_SetSRID(ST_MakePoint($5, $4), 4326)::geography)
            RETURNING id, device_id, kind, message, latitude, longitude,
                      triggered_at, raw, resolved, created_at
            "#,
        )
        .bind(input.device_id)
        .bind(input.kind.as_str())
        .bind(&input.message)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.triggered_at)
        .bind(&input.raw)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }
}
