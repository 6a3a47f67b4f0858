//! Explicit database provisioning for tests.
//!
//! The database URL is never taken from `PGSTRING` or `DATABASE_URL`; tests
//! must pass one via `from_url()` or opt in through `TEST_DATABASE_URL`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use keel_core::error::{KeelError, Result};

/// Explicit database access for tests.
pub struct TestDatabase {
    pool: PgPool,
    url: String,
}

impl TestDatabase {
    /// Connect to database at the given URL.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(KeelError::Sql)?;

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Connect using the TEST_DATABASE_URL environment variable.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("TEST_DATABASE_URL").map_err(|_| {
            KeelError::Database(
                "TEST_DATABASE_URL not set. Set it explicitly for database tests.".to_string(),
            )
        })?;
        Self::from_url(&url).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Creates a dedicated database for a single test.
    ///
    /// Migrations change schema, so tests sharing a database would see each
    /// other's tables and ledger rows.
    pub async fn isolated(&self, test_name: &str) -> Result<IsolatedTestDb> {
        let db_name = format!(
            "keel_test_{}_{}",
            sanitize_db_name(test_name),
            uuid::Uuid::new_v4().simple()
        );

        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&self.pool)
            .await
            .map_err(KeelError::Sql)?;

        let test_url = replace_db_name(&self.url, &db_name);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&test_url)
            .await
            .map_err(KeelError::Sql)?;

        Ok(IsolatedTestDb {
            pool,
            url: test_url,
            db_name,
            base_url: self.url.clone(),
        })
    }
}

/// A test database that exists for the lifetime of a single test.
pub struct IsolatedTestDb {
    pool: PgPool,
    url: String,
    db_name: String,
    base_url: String,
}

impl IsolatedTestDb {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection URL of the isolated database.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Run raw SQL to set up or inspect test state.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(KeelError::Sql)?;
        Ok(())
    }

    /// Drop the test database.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .map_err(KeelError::Sql)?;

        let _ = sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1",
        )
        .bind(&self.db_name)
        .execute(&pool)
        .await;

        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.db_name))
            .execute(&pool)
            .await
            .map_err(KeelError::Sql)?;

        Ok(())
    }
}

fn sanitize_db_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(32)
        .collect()
}

/// Replace the database name in a connection URL.
fn replace_db_name(url: &str, new_db: &str) -> String {
    if let Some(idx) = url.rfind('/') {
        let base = &url[..=idx];
        if let Some(query_idx) = url[idx + 1..].find('?') {
            let query = &url[idx + 1 + query_idx..];
            format!("{}{}{}", base, new_db, query)
        } else {
            format!("{}{}", base, new_db)
        }
    } else {
        format!("{}/{}", url, new_db)
    }
}
