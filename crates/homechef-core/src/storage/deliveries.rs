//! Repository for delivery records.
//!
//! Provides the claim, attempt, and terminal transitions the engine relies
//! on. Claims use `FOR UPDATE SKIP LOCKED` so concurrent schedulers never
//! receive the same row; every transition is guarded by the expected status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        AttemptOutcome, AttemptResolution, Claim, Delivery, DeliveryFilter, DeliveryId,
        EndpointId, Page,
    },
};

const DELIVERY_COLUMNS: &str = "id, endpoint_id, event_id, event_type, payload, attempt_count, \
                                status, response_status, response_body, last_error, created_at, \
                                first_attempted_at, last_attempted_at, next_retry_at, \
                                lease_expires_at, failed_at, succeeded_at";

/// Repository for delivery database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new delivery.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (
                id, endpoint_id, event_id, event_type, payload, attempt_count, status,
                created_at, next_retry_at, lease_expires_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.endpoint_id)
        .bind(delivery.event_id)
        .bind(delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.attempt_count)
        .bind(delivery.status)
        .bind(delivery.created_at)
        .bind(delivery.next_retry_at)
        .bind(delivery.lease_expires_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a delivery by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, delivery_id: DeliveryId) -> Result<Option<Delivery>> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1");

        Ok(sqlx::query_as::<_, Delivery>(&sql)
            .bind(delivery_id)
            .fetch_optional(&*self.pool)
            .await?)
    }

    /// Queries deliveries, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find(&self, filter: &DeliveryFilter, page: Page) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM webhook_deliveries
            WHERE ($1::text IS NULL
                   OR endpoint_id IN (SELECT id FROM webhook_endpoints WHERE owner_id = $1))
              AND ($2::uuid IS NULL OR endpoint_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR event_type = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at < $6)
            ORDER BY created_at DESC, id
            LIMIT $7 OFFSET $8
            "#
        );

        let deliveries = sqlx::query_as::<_, Delivery>(&sql)
            .bind(filter.owner_id.as_ref())
            .bind(filter.endpoint_id)
            .bind(filter.status)
            .bind(filter.event_type)
            .bind(filter.since)
            .bind(filter.until)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&*self.pool)
            .await?;

        Ok(deliveries)
    }

    /// Claims due deliveries for dispatch.
    ///
    /// Due rows are pending ones whose `next_retry_at` has passed and
    /// delivering ones whose lease has lapsed. Rows locked by a concurrent
    /// claimant are skipped, so two ticks never share a delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM webhook_deliveries
            WHERE (status = 'pending' AND next_retry_at <= $1)
               OR (status = 'delivering' AND lease_expires_at <= $1)
            ORDER BY COALESCE(next_retry_at, lease_expires_at) ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'delivering', next_retry_at = NULL, lease_expires_at = $2
            WHERE id = ANY($1)
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        let deliveries = sqlx::query_as::<_, Delivery>(&sql)
            .bind(&ids)
            .bind(lease_until)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deliveries)
    }

    /// Starts the next attempt of a non-terminal delivery whose lease still
    /// matches `claim`.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn begin_attempt(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let sql = format!(
            r#"
            UPDATE webhook_deliveries
            SET attempt_count = attempt_count + 1,
                status = 'delivering',
                first_attempted_at = COALESCE(first_attempted_at, $3),
                last_attempted_at = $3,
                next_retry_at = NULL,
                lease_expires_at = $4
            WHERE id = $1 AND lease_expires_at = $2 AND status IN ('pending', 'delivering')
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        Ok(sqlx::query_as::<_, Delivery>(&sql)
            .bind(claim.delivery_id)
            .bind(claim.lease)
            .bind(now)
            .bind(lease_until)
            .fetch_optional(&*self.pool)
            .await?)
    }

    /// Records an attempt outcome if the attempt is still current.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn record_attempt(
        &self,
        delivery_id: DeliveryId,
        outcome: &AttemptOutcome,
    ) -> Result<Option<Delivery>> {
        let (next_retry_at, succeeded_at, failed_at) = match outcome.resolution {
            AttemptResolution::Succeeded => (None, Some(outcome.completed_at), None),
            AttemptResolution::RetryAt(at) => (Some(at), None, None),
            AttemptResolution::Failed => (None, None, Some(outcome.completed_at)),
        };

        let sql = format!(
            r#"
            UPDATE webhook_deliveries
            SET status = $3,
                response_status = $4,
                response_body = $5,
                last_error = $6,
                next_retry_at = $7,
                succeeded_at = $8,
                failed_at = $9,
                lease_expires_at = NULL
            WHERE id = $1 AND attempt_count = $2 AND status = 'delivering'
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        Ok(sqlx::query_as::<_, Delivery>(&sql)
            .bind(delivery_id)
            .bind(outcome.attempt)
            .bind(outcome.status())
            .bind(outcome.response_status)
            .bind(&outcome.response_body)
            .bind(&outcome.error)
            .bind(next_retry_at)
            .bind(succeeded_at)
            .bind(failed_at)
            .fetch_optional(&*self.pool)
            .await?)
    }

    /// Fails a non-terminal delivery without an attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        delivery_id: DeliveryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = Self::fail_where(&*self.pool, "id = $1", delivery_id.0, reason, now).await?;
        Ok(result > 0)
    }

    /// Fails every pending delivery for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn fail_pending_for_endpoint(
        &self,
        endpoint_id: EndpointId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let predicate = "endpoint_id = $1 AND status = 'pending'";
        Self::fail_where(&*self.pool, predicate, endpoint_id.0, reason, now).await
    }

    async fn fail_where<'e, E>(
        executor: E,
        predicate: &str,
        key: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', failed_at = $2, last_error = $3,
                next_retry_at = NULL, lease_expires_at = NULL
            WHERE {predicate} AND status IN ('pending', 'delivering')
            "#
        );

        let result =
            sqlx::query(&sql).bind(key).bind(now).bind(reason).execute(executor).await?;

        Ok(result.rows_affected())
    }

    /// Moves a failed delivery back to pending.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn requeue_failed(
        &self,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let sql = format!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'pending', next_retry_at = $2, failed_at = NULL,
                lease_expires_at = NULL
            WHERE id = $1 AND status = 'failed'
            RETURNING {DELIVERY_COLUMNS}
            "#
        );

        Ok(sqlx::query_as::<_, Delivery>(&sql)
            .bind(delivery_id)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await?)
    }

    /// Changes the due time of a pending delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn reschedule(
        &self,
        delivery_id: DeliveryId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET next_retry_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(delivery_id)
        .bind(next_retry_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns claimed deliveries to pending. Claims whose lease has been
    /// replaced are left alone.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn release(&self, claims: &[Claim], next_retry_at: DateTime<Utc>) -> Result<u64> {
        if claims.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = claims.iter().map(|claim| claim.delivery_id.0).collect();
        let leases: Vec<DateTime<Utc>> = claims.iter().map(|claim| claim.lease).collect();

        let result = sqlx::query(
            r#"
            UPDATE webhook_deliveries AS d
            SET status = 'pending', next_retry_at = $3, lease_expires_at = NULL
            FROM UNNEST($1::uuid[], $2::timestamptz[]) AS c(id, lease)
            WHERE d.id = c.id
              AND d.lease_expires_at = c.lease
              AND d.status IN ('pending', 'delivering')
            "#,
        )
        .bind(&ids)
        .bind(&leases)
        .bind(next_retry_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes terminal deliveries created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_deliveries
            WHERE created_at < $1 AND status IN ('succeeded', 'failed')
            "#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

