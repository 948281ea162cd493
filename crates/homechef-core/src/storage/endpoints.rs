//! Repository for endpoint database operations.
//!
//! Manages webhook endpoint configuration: target URL, subscribed event
//! types, secret, pause flag, concurrency cap, and custom headers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{Endpoint, EndpointFilter, EndpointId, EndpointPatch, EventType, OwnerId},
};

const ENDPOINT_COLUMNS: &str = "id, owner_id, url, description, events, secret, is_active, \
                                max_concurrency, custom_headers, created_at, updated_at";

/// Repository for endpoint database operations.
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

    /// Creates a new endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, endpoint: &Endpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (
                id, owner_id, url, description, events, secret, is_active,
                max_concurrency, custom_headers, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            "#,
        )
        .bind(endpoint.id)
        .bind(&endpoint.owner_id)
        .bind(&endpoint.url)
        .bind(&endpoint.description)
        .bind(&endpoint.events)
        .bind(&endpoint.secret)
        .bind(endpoint.is_active)
        .bind(endpoint.max_concurrency)
        .bind(&endpoint.custom_headers)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds an endpoint by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, endpoint_id: EndpointId) -> Result<Option<Endpoint>> {
        self.find_by_id_impl(&*self.pool, endpoint_id, false).await
    }

    async fn find_by_id_impl<'e, E>(
        &self,
        executor: E,
        endpoint_id: EndpointId,
        for_update: bool,
    ) -> Result<Option<Endpoint>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lock = if for_update { "FOR UPDATE" } else { "" };
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1 {lock}");

        let endpoint = sqlx::query_as::<_, Endpoint>(&sql)
            .bind(endpoint_id)
            .fetch_optional(executor)
            .await?;

        Ok(endpoint)
    }

    /// Finds an owner's endpoints, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_owner(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<Endpoint>> {
        let sql = format!(
            r#"
            SELECT {ENDPOINT_COLUMNS}
            FROM webhook_endpoints
            WHERE owner_id = $1
              AND ($2::boolean IS NULL OR is_active = $2)
              AND ($3::text IS NULL OR $3 = ANY(events))
            ORDER BY created_at DESC
            "#
        );

        let endpoints = sqlx::query_as::<_, Endpoint>(&sql)
            .bind(owner)
            .bind(filter.is_active)
            .bind(filter.event_type)
            .fetch_all(&*self.pool)
            .await?;

        Ok(endpoints)
    }

    /// Returns every endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_all(&self) -> Result<Vec<Endpoint>> {
        let sql = format!("SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints ORDER BY created_at");

        Ok(sqlx::query_as::<_, Endpoint>(&sql).fetch_all(&*self.pool).await?)
    }

    /// Returns active endpoints subscribed to `event_type`.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_subscribers(&self, event_type: EventType) -> Result<Vec<Endpoint>> {
        let sql = format!(
            r#"
            SELECT {ENDPOINT_COLUMNS}
            FROM webhook_endpoints
            WHERE is_active AND events @> ARRAY[$1]::text[]
            ORDER BY created_at
            "#
        );

        Ok(sqlx::query_as::<_, Endpoint>(&sql).bind(event_type).fetch_all(&*self.pool).await?)
    }

    /// Applies a patch under a row lock and returns the updated endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn update(
        &self,
        endpoint_id: EndpointId,
        patch: &EndpointPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Endpoint>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut endpoint) = self.find_by_id_impl(&mut *tx, endpoint_id, true).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        patch.apply(&mut endpoint, now);
        self.write_in_tx(&mut tx, &endpoint).await?;
        tx.commit().await?;

        Ok(Some(endpoint))
    }

    async fn write_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        endpoint: &Endpoint,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET url = $2, description = $3, events = $4, is_active = $5,
                max_concurrency = $6, custom_headers = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(endpoint.id)
        .bind(&endpoint.url)
        .bind(&endpoint.description)
        .bind(&endpoint.events)
        .bind(endpoint.is_active)
        .bind(endpoint.max_concurrency)
        .bind(&endpoint.custom_headers)
        .bind(endpoint.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Deletes an endpoint. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, endpoint_id: EndpointId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = $1")
            .bind(endpoint_id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
