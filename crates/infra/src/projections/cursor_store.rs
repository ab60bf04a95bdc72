//! Projection cursor/offset persistence.
//!
//! Cursors record the last processed sequence number per
//! `(tenant, aggregate, projection)` so projections stay idempotent under
//! at-least-once delivery, resume after a crash, and can be rebuilt by
//! clearing their offsets and replaying.

use std::sync::Arc;

use campusledger_core::{AggregateId, TenantId};
use sqlx::{PgPool, Row};

/// Projection cursor store for persisting offsets.
pub trait ProjectionCursorStore: Send + Sync {
    /// Last processed sequence number for a (tenant, aggregate, projection) stream.
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    /// Advance the cursor to a new sequence number.
    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    /// Clear all cursors for a tenant + projection (for rebuilds).
    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str);
}

/// No-op cursor store; projections fall back to their internal in-memory
/// cursors, which vanish on restart along with the read models themselves.
pub struct InMemoryCursorStore;

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        _tenant_id: TenantId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
    ) -> Option<u64> {
        None
    }

    fn update_cursor(
        &self,
        _tenant_id: TenantId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
        _sequence_number: u64,
    ) {
    }

    fn clear_cursors(&self, _tenant_id: TenantId, _projection_name: &str) {}
}

/// Postgres-backed projection cursor store.
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl ProjectionCursorStore for PostgresCursorStore {
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let aggregate_id_uuid = aggregate_id.as_uuid();
        let projection_name = projection_name.to_string();

        crate::blocking::run(&handle, async {
            match sqlx::query(
                r#"
                SELECT last_sequence_number
                FROM projection_offsets
                WHERE tenant_id = $1 AND aggregate_id = $2 AND projection_name = $3
                "#,
            )
            .bind(tenant_id_uuid)
            .bind(aggregate_id_uuid)
            .bind(&projection_name)
            .fetch_optional(&*pool)
            .await
            {
                Ok(Some(row)) => row
                    .try_get::<i64, _>("last_sequence_number")
                    .ok()
                    .map(|seq| seq as u64),
                Ok(None) => None,
                Err(_) => None,
            }
        })
    }

    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let aggregate_id_uuid = aggregate_id.as_uuid();
        let projection_name = projection_name.to_string();

        crate::blocking::run(&handle, async {
            let _ = sqlx::query(
                r#"
                INSERT INTO projection_offsets (
                    tenant_id,
                    aggregate_id,
                    projection_name,
                    last_sequence_number
                )
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, aggregate_id, projection_name)
                DO UPDATE SET
                    last_sequence_number = EXCLUDED.last_sequence_number,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant_id_uuid)
            .bind(aggregate_id_uuid)
            .bind(&projection_name)
            .bind(sequence_number as i64)
            .execute(&*pool)
            .await;
        });
    }

    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let tenant_id_uuid = tenant_id.as_uuid();
        let projection_name = projection_name.to_string();

        crate::blocking::run(&handle, async {
            let _ = sqlx::query(
                r#"
                DELETE FROM projection_offsets
                WHERE tenant_id = $1 AND projection_name = $2
                "#,
            )
            .bind(tenant_id_uuid)
            .bind(&projection_name)
            .execute(&*pool)
            .await;
        });
    }
}
