use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use keel_core::config::LedgerTable;
use keel_core::error::{KeelError, Result};
use keel_core::migration::{LedgerEntry, SortOrder};

use super::{LedgerFuture, LedgerStore, LedgerTransaction};
use crate::migrations::sql::split_sql_statements;

/// SQLSTATE codes meaning the ledger table (or its schema) is not there yet.
const UNDEFINED_TABLE: &str = "42P01";
const INVALID_SCHEMA_NAME: &str = "3F000";

/// Ledger stored in a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    table: LedgerTable,
}

impl PgLedger {
    pub fn new(pool: PgPool, table: LedgerTable) -> Self {
        Self { pool, table }
    }

    pub fn table(&self) -> &LedgerTable {
        &self.table
    }

    /// Create the ledger table (and its schema) if missing.
    ///
    /// Without this, the first migration of a target is expected to create it.
    pub async fn ensure_table(&self) -> Result<()> {
        if let Some(schema) = self.table.schema() {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    KeelError::Database(format!("Failed to create schema {}: {}", schema, e))
                })?;
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                target TEXT NOT NULL,
                id BIGINT NOT NULL,
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (target, id)
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            KeelError::Database(format!(
                "Failed to create migrations table {}: {}",
                self.table, e
            ))
        })?;

        debug!("Ledger table {} is present", self.table);
        Ok(())
    }

    async fn fetch(&self, target: &str, order: SortOrder) -> Result<Vec<LedgerEntry>> {
        // Casts accept ledgers bootstrapped with INTEGER ids or plain TIMESTAMP columns.
        let sql = format!(
            "SELECT id::BIGINT, name, created_at::TIMESTAMPTZ FROM {} WHERE target = $1 ORDER BY id {}",
            self.table,
            order.as_sql()
        );

        let rows: Vec<(i64, String, DateTime<Utc>)> = match sqlx::query_as(&sql)
            .bind(target)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_relation(&e) => {
                info!(
                    "Migrations table {} does not exist for target '{}'. Assuming no migrations have been applied.",
                    self.table, target
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(KeelError::Database(format!(
                    "Failed to get applied migrations for target '{}': {}",
                    target, e
                )))
            }
        };

        Ok(rows
            .into_iter()
            .map(|(id, name, created_at)| LedgerEntry {
                target: target.to_string(),
                id,
                name,
                created_at,
            })
            .collect())
    }
}

impl LedgerStore for PgLedger {
    fn fetch_applied<'a>(
        &'a self,
        target: &'a str,
        order: SortOrder,
    ) -> LedgerFuture<'a, Vec<LedgerEntry>> {
        Box::pin(self.fetch(target, order))
    }

    fn begin(&self) -> LedgerFuture<'_, Box<dyn LedgerTransaction>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| KeelError::Database(format!("Failed to start transaction: {}", e)))?;

            Ok(Box::new(PgLedgerTransaction {
                tx,
                table: self.table.clone(),
            }) as Box<dyn LedgerTransaction>)
        })
    }
}

struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
    table: LedgerTable,
}

impl LedgerTransaction for PgLedgerTransaction {
    fn execute_script<'a>(&'a mut self, sql: &'a str) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            let statements = split_sql_statements(sql);
            let total = statements.len();

            for (index, statement) in statements.iter().enumerate() {
                sqlx::query(statement)
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| {
                        KeelError::Database(format!(
                            "Statement {} of {} failed: {}",
                            index + 1,
                            total,
                            e
                        ))
                    })?;
            }

            Ok(())
        })
    }

    fn record_applied<'a>(
        &'a mut self,
        target: &'a str,
        id: i64,
        name: &'a str,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!(
                "INSERT INTO {} (target, id, name, created_at) VALUES ($1, $2, $3, CURRENT_TIMESTAMP)",
                self.table
            );
            sqlx::query(&sql)
                .bind(target)
                .bind(id)
                .bind(name)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| KeelError::Database(format!("Failed to record migration: {}", e)))?;
            Ok(())
        })
    }

    fn remove_applied<'a>(&'a mut self, target: &'a str, id: i64) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            let sql = format!("DELETE FROM {} WHERE target = $1 AND id = $2", self.table);
            sqlx::query(&sql)
                .bind(target)
                .bind(id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| {
                    KeelError::Database(format!("Failed to remove migration record: {}", e))
                })?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> LedgerFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| KeelError::Database(format!("Failed to commit: {}", e)))
        })
    }

    fn rollback(self: Box<Self>) -> LedgerFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .rollback()
                .await
                .map_err(|e| KeelError::Database(format!("Failed to roll back: {}", e)))
        })
    }
}

fn is_missing_relation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(UNDEFINED_TABLE) | Some(INVALID_SCHEMA_NAME)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDatabase;

    /// Isolated database from TEST_DATABASE_URL; tests are skipped when unset.
    async fn isolated(name: &str) -> Option<crate::testing::IsolatedTestDb> {
        let db = TestDatabase::from_env().await.ok()?;
        Some(db.isolated(name).await.expect("create isolated database"))
    }

    fn ledger(pool: &PgPool) -> PgLedger {
        PgLedger::new(pool.clone(), LedgerTable::parse("keel_test.migrations").unwrap())
    }

    #[tokio::test]
    async fn test_missing_ledger_reads_empty() {
        let Some(db) = isolated("missing_ledger").await else {
            return;
        };

        let applied = ledger(db.pool())
            .fetch_applied("default", SortOrder::Ascending)
            .await
            .unwrap();
        assert!(applied.is_empty());

        db.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_remove_are_transactional() {
        let Some(db) = isolated("record_remove").await else {
            return;
        };
        let ledger = ledger(db.pool());
        ledger.ensure_table().await.unwrap();

        let mut tx = ledger.begin().await.unwrap();
        tx.execute_script("CREATE TABLE widgets (id INT); INSERT INTO widgets VALUES (1);")
            .await
            .unwrap();
        tx.record_applied("default", 1, "widgets").await.unwrap();
        tx.rollback().await.unwrap();
        assert!(ledger
            .fetch_applied("default", SortOrder::Ascending)
            .await
            .unwrap()
            .is_empty());

        let mut tx = ledger.begin().await.unwrap();
        tx.record_applied("default", 1, "widgets").await.unwrap();
        tx.record_applied("default", 2, "gadgets").await.unwrap();
        tx.record_applied("other", 1, "elsewhere").await.unwrap();
        tx.commit().await.unwrap();

        let desc = ledger
            .fetch_applied("default", SortOrder::Descending)
            .await
            .unwrap();
        let ids: Vec<i64> = desc.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let mut tx = ledger.begin().await.unwrap();
        tx.remove_applied("default", 2).await.unwrap();
        tx.commit().await.unwrap();

        let asc = ledger
            .fetch_applied("default", SortOrder::Ascending)
            .await
            .unwrap();
        assert_eq!(asc.len(), 1);
        assert_eq!(asc[0].name, "widgets");
        assert_eq!(
            ledger
                .fetch_applied("other", SortOrder::Ascending)
                .await
                .unwrap()
                .len(),
            1
        );

        db.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_script_reports_statement() {
        let Some(db) = isolated("failed_script").await else {
            return;
        };
        let ledger = ledger(db.pool());

        let mut tx = ledger.begin().await.unwrap();
        let err = tx
            .execute_script("SELECT 1; SELECT * FROM no_such_table;")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Statement 2 of 2"));
        tx.rollback().await.unwrap();

        db.cleanup().await.unwrap();
    }
}
