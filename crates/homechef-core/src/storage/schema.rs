//! Table and index definitions.
//!
//! Idempotent DDL run at startup. Deliveries reference endpoints by id
//! without a foreign key so terminal records outlive deleted endpoints.

use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "webhook_endpoints",
        r#"
        CREATE TABLE IF NOT EXISTS webhook_endpoints (
            id UUID PRIMARY KEY,
            owner_id TEXT NOT NULL,
            url TEXT NOT NULL,
            description TEXT,
            events TEXT[] NOT NULL,
            secret TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            max_concurrency INTEGER CHECK (max_concurrency IS NULL OR max_concurrency > 0),
            custom_headers JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            CHECK (cardinality(events) > 0)
        )
        "#,
    ),
    (
        "webhook_endpoints owner index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_owner
        ON webhook_endpoints(owner_id, created_at DESC)
        "#,
    ),
    (
        "webhook_endpoints events index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_events
        ON webhook_endpoints USING GIN (events)
        WHERE is_active
        "#,
    ),
    (
        "webhook_deliveries",
        r#"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id UUID PRIMARY KEY,
            endpoint_id UUID NOT NULL,
            event_id UUID NOT NULL,
            event_type TEXT NOT NULL,
            payload BYTEA NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'delivering', 'succeeded', 'failed')),
            response_status INTEGER,
            response_body TEXT,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            first_attempted_at TIMESTAMPTZ,
            last_attempted_at TIMESTAMPTZ,
            next_retry_at TIMESTAMPTZ,
            lease_expires_at TIMESTAMPTZ,
            failed_at TIMESTAMPTZ,
            succeeded_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "webhook_deliveries claim index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_status_next_retry
        ON webhook_deliveries(status, next_retry_at)
        "#,
    ),
    (
        "webhook_deliveries lease index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_lease
        ON webhook_deliveries(lease_expires_at)
        WHERE status = 'delivering'
        "#,
    ),
    (
        "webhook_deliveries endpoint index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_endpoint
        ON webhook_deliveries(endpoint_id)
        "#,
    ),
    (
        "webhook_deliveries created_at index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_created_at
        ON webhook_deliveries(created_at DESC)
        "#,
    ),
    (
        "webhook_deliveries event_type index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_event_type
        ON webhook_deliveries(event_type)
        "#,
    ),
];

/// Creates tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns `CoreError::Database` on the first failing statement.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for (name, statement) in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
        debug!(object = name, "schema object ensured");
    }

    Ok(())
}
