//! Isolated PostgreSQL databases for store tests.
//!
//! Each `TestDatabase` creates a uniquely named database on the server named
//! by `DATABASE_URL`, applies the schema, and drops it again on `cleanup`.
//! When `DATABASE_URL` is not set, `from_env` returns `None` and the caller
//! skips its PostgreSQL cases.

use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use homechef_core::Storage;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use uuid::Uuid;

/// A throwaway database with the HomeChef schema applied.
pub struct TestDatabase {
    pool: PgPool,
    admin: PgConnectOptions,
    name: String,
}

impl TestDatabase {
    /// Creates an isolated database on the server in `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or the schema fails.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return Ok(None);
        };
        Self::create(&url).await.map(Some)
    }

    async fn create(url: &str) -> Result<Self> {
        let base = PgConnectOptions::from_str(url).context("invalid DATABASE_URL")?;
        let admin = base.clone().database("postgres");
        let name = format!("homechef_test_{}", Uuid::new_v4().simple());

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(admin.clone())
            .await
            .context("Failed to connect to PostgreSQL admin database")?;
        sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&admin_pool)
            .await
            .context("Failed to create test database")?;
        admin_pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(base.database(&name))
            .await
            .context("Failed to connect to PostgreSQL test database")?;

        Storage::new(pool.clone()).migrate().await.context("Failed to apply schema")?;

        Ok(Self { pool, admin, name })
    }

    /// Store over the test database.
    pub fn storage(&self) -> Storage {
        Storage::new(self.pool.clone())
    }

    /// Closes connections and drops the database.
    ///
    /// # Errors
    ///
    /// Returns error if the drop fails.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        let admin_pool = PgPool::connect_with(self.admin).await?;
        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name))
            .execute(&admin_pool)
            .await
            .context("Failed to drop test database")?;
        admin_pool.close().await;
        Ok(())
    }
}
