//! Query execution boundary
//!
//! Generated SQL runs inside a read-only transaction with a statement
//! timeout, and the transaction is always rolled back.

use crate::db::result::{CellValue, ResultSet};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, PgPool, Row};
use std::time::{Duration, Instant};
use tracing::info;

/// Executes SQL text and returns rows plus column names.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ResultSet>;
}

pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgExecutor {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

fn exec_err(context: &str) -> impl Fn(sqlx::Error) -> AssistantError + '_ {
    move |e| AssistantError::Execution(format!("{}: {}", context, e))
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(exec_err("Failed to open transaction"))?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(exec_err("Failed to start read-only transaction"))?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(exec_err("Failed to set statement timeout"))?;

        // Bare SQL text without arguments goes over the simple-query protocol,
        // so every value arrives as text
        let rows = Executor::fetch_all(&mut *tx, sql)
            .await
            .map_err(exec_err("Query execution failed"))?;

        tx.rollback().await.map_err(exec_err("Failed to roll back"))?;

        let result = rows_to_result_set(&rows)?;
        info!(
            "Query returned {} rows in {}ms",
            result.row_count(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }
}

fn rows_to_result_set(rows: &[PgRow]) -> Result<ResultSet> {
    let Some(first) = rows.first() else {
        return Ok(ResultSet::empty());
    };

    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(row.len());
        for idx in 0..row.len() {
            let raw: Option<String> = row
                .try_get_unchecked(idx)
                .map_err(exec_err("Failed to read result value"))?;
            cells.push(CellValue::from_text(raw));
        }
        values.push(cells);
    }

    ResultSet::new(columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_execute_future_is_send() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let executor = PgExecutor::new(pool, Duration::from_secs(5));
        let query: Box<dyn QueryExecutor> = Box::new(executor);

        // Never polled; only the type is checked
        let future = query.execute("SELECT 1");
        assert_send(&future);
    }

    #[test]
    fn test_empty_rows_give_empty_result() {
        let result = rows_to_result_set(&[]).unwrap();
        assert!(result.is_empty());
        assert!(result.columns().is_empty());
    }
}
