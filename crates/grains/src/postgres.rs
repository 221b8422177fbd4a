use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LogicalTimestamp, RoutingKey};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::StoreError;
use crate::metadata::GrainMetadata;
use crate::store::{GrainStore, MetadataStore, ProjectionStore};

/// PostgreSQL-backed grain store.
///
/// Metadata lives in `grain_metadata`, state in `grain_state`. A commit
/// writes both in one transaction and compare-and-sets the watermark.
#[derive(Clone)]
pub struct PostgresGrainStore {
    pool: PgPool,
}

impl PostgresGrainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the grain tables if they do not exist.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!(
            "../../../migrations/001_create_grain_tables.sql"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_metadata(row: PgRow) -> Result<GrainMetadata, StoreError> {
        let events_applied: i64 = row.try_get("events_applied")?;
        Ok(GrainMetadata {
            last_occurred_at: LogicalTimestamp::new(row.try_get("last_occurred_at")?),
            events_applied: u64::try_from(events_applied).unwrap_or_default(),
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

fn events_applied(metadata: &GrainMetadata) -> i64 {
    i64::try_from(metadata.events_applied).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetadataStore for PostgresGrainStore {
    async fn get_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<GrainMetadata>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT last_occurred_at, events_applied, updated_at
            FROM grain_metadata
            WHERE projection = $1 AND routing_key = $2
            "#,
        )
        .bind(projection)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_metadata).transpose()
    }

    async fn put_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO grain_metadata (projection, routing_key, last_occurred_at, events_applied, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (projection, routing_key)
            DO UPDATE SET last_occurred_at = EXCLUDED.last_occurred_at,
                          events_applied = EXCLUDED.events_applied,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(projection)
        .bind(key.as_str())
        .bind(metadata.last_occurred_at.as_i64())
        .bind(events_applied(metadata))
        .bind(metadata.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MetadataStore(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for PostgresGrainStore {
    async fn get_state(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let state = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT state FROM grain_state WHERE projection = $1 AND routing_key = $2",
        )
        .bind(projection)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn put_state(
        &self,
        projection: &str,
        key: &RoutingKey,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO grain_state (projection, routing_key, state, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (projection, routing_key)
            DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(projection)
        .bind(key.as_str())
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::ProjectionStore(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl GrainStore for PostgresGrainStore {
    async fn commit(
        &self,
        projection: &str,
        key: &RoutingKey,
        expected: Option<LogicalTimestamp>,
        state: &serde_json::Value,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-set on the watermark. A missing row is claimed by
        // insert; the primary key turns a racing insert into a conflict.
        let claimed = match expected {
            None => sqlx::query(
                r#"
                INSERT INTO grain_metadata (projection, routing_key, last_occurred_at, events_applied, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (projection, routing_key) DO NOTHING
                "#,
            )
            .bind(projection)
            .bind(key.as_str())
            .bind(metadata.last_occurred_at.as_i64())
            .bind(events_applied(metadata))
            .bind(metadata.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::MetadataStore(e.to_string()))?,
            Some(previous) => sqlx::query(
                r#"
                UPDATE grain_metadata
                SET last_occurred_at = $3, events_applied = $4, updated_at = $5
                WHERE projection = $1 AND routing_key = $2 AND last_occurred_at = $6
                "#,
            )
            .bind(projection)
            .bind(key.as_str())
            .bind(metadata.last_occurred_at.as_i64())
            .bind(events_applied(metadata))
            .bind(metadata.updated_at)
            .bind(previous.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::MetadataStore(e.to_string()))?,
        };

        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            let actual = self
                .get_metadata(projection, key)
                .await?
                .map(|m| m.last_occurred_at);
            return Err(StoreError::Conflict {
                projection: projection.to_string(),
                routing_key: key.clone(),
                expected,
                actual,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO grain_state (projection, routing_key, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (projection, routing_key)
            DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(projection)
        .bind(key.as_str())
        .bind(state)
        .bind(metadata.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::ProjectionStore(e.to_string()))?;

        tx.commit().await?;
        Ok(())
    }
}
