//! PostgreSQL catalog source
//!
//! Reads table and column metadata from `information_schema`, foreign keys
//! from `pg_catalog`, and distinct column values from the tables themselves. Nothing here
//! writes to the database.

use crate::db::quote_ident;
use crate::error::{AssistantError, Result};
use crate::schema::{CatalogSource, ColumnRow, RelationshipRow};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

const COLUMNS_SQL: &str = r#"
    SELECT
        c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type
    FROM information_schema.columns c
    INNER JOIN information_schema.tables t
        ON t.table_schema = c.table_schema
        AND t.table_name = c.table_name
    WHERE t.table_type = 'BASE TABLE'
        AND c.table_schema = $1
    ORDER BY c.table_name, c.ordinal_position
"#;

// Read from pg_catalog: information_schema hides constraints on tables the
// login does not own. Columns of composite keys are paired by position.
const RELATIONSHIPS_SQL: &str = r#"
    SELECT
        src.relname::text AS table_name,
        src_att.attname::text AS column_name,
        ref.relname::text AS referenced_table,
        ref_att.attname::text AS referenced_column
    FROM pg_catalog.pg_constraint con
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(src_attnum, ref_attnum, ord)
    INNER JOIN pg_catalog.pg_class src ON src.oid = con.conrelid
    INNER JOIN pg_catalog.pg_namespace ns ON ns.oid = src.relnamespace
    INNER JOIN pg_catalog.pg_class ref ON ref.oid = con.confrelid
    INNER JOIN pg_catalog.pg_attribute src_att
        ON src_att.attrelid = con.conrelid
        AND src_att.attnum = k.src_attnum
    INNER JOIN pg_catalog.pg_attribute ref_att
        ON ref_att.attrelid = con.confrelid
        AND ref_att.attnum = k.ref_attnum
    WHERE con.contype = 'f'
        AND ns.nspname = $1
    ORDER BY src.relname, con.conname, k.ord
"#;

pub struct PgCatalog {
    pool: PgPool,
    schema: String,
}

impl PgCatalog {
    pub fn with_schema(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn distinct_values_sql(&self, table: &str, column: &str, limit: usize) -> String {
        let column = quote_ident(column);
        format!(
            "SELECT DISTINCT CAST({col} AS TEXT) AS value FROM {schema}.{table} WHERE {col} IS NOT NULL LIMIT {limit}",
            col = column,
            schema = quote_ident(&self.schema),
            table = quote_ident(table),
            limit = limit,
        )
    }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn fetch_columns(&self) -> Result<Vec<ColumnRow>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(COLUMNS_SQL)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(table, column, data_type)| ColumnRow {
                table,
                column,
                data_type,
            })
            .collect())
    }

    async fn fetch_relationships(&self) -> Result<Vec<RelationshipRow>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(RELATIONSHIPS_SQL)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(table, column, referenced_table, referenced_column)| RelationshipRow {
                table,
                column,
                referenced_table,
                referenced_column,
            })
            .collect())
    }

    async fn fetch_distinct_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>> {
        let sql = self.distinct_values_sql(table, column, limit);
        debug!("Fetching distinct values: {}", sql);

        sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AssistantError::Execution(format!("Failed to read values of {}.{}: {}", table, column, e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn test_distinct_values_sql_quotes_identifiers() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let catalog = PgCatalog::with_schema(pool, "sales");
        assert_eq!(
            catalog.distinct_values_sql("Customers", "Name", 100),
            "SELECT DISTINCT CAST(\"Name\" AS TEXT) AS value FROM \"sales\".\"Customers\" WHERE \"Name\" IS NOT NULL LIMIT 100"
        );
    }

    #[test]
    fn test_relationships_pair_composite_keys_by_position() {
        let sql = RELATIONSHIPS_SQL.to_lowercase();
        assert!(sql.contains("from pg_catalog.pg_constraint"));
        assert!(sql.contains("contype = 'f'"));
        assert!(sql.contains("unnest(con.conkey, con.confkey) with ordinality"));
        assert!(sql.contains("src_att.attnum = k.src_attnum"));
        assert!(sql.contains("ref_att.attnum = k.ref_attnum"));
        assert!(!sql.contains("constraint_column_usage"));
    }
}
