//! Schema catalog
//!
//! Introspects tables, columns and foreign keys once per session and keeps the
//! resulting [`SchemaGraph`] until an explicit refresh. A schema is loaded
//! completely or not at all.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// `(table, column, data_type)` row from the catalog views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

/// `(table, column, referenced_table, referenced_column)` row from the
/// catalog views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRow {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Read-only access to database metadata and column contents.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every column of every user table, ordered by table then ordinal.
    async fn fetch_columns(&self) -> Result<Vec<ColumnRow>>;

    /// Every foreign-key column pair.
    async fn fetch_relationships(&self) -> Result<Vec<RelationshipRow>>;

    /// Distinct non-null values of one column rendered as text.
    async fn fetch_distinct_values(&self, table: &str, column: &str, limit: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Columns in ordinal order; names are unique within a table.
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.data_type.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} = {}.{}",
            self.table, self.column, self.referenced_table, self.referenced_column
        )
    }
}

/// In-memory model of tables, columns and foreign-key relationships.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaGraph {
    pub tables: BTreeMap<String, TableInfo>,
    pub relationships: Vec<Relationship>,
}

impl SchemaGraph {
    /// Assemble a graph from raw catalog rows. Duplicate columns and duplicate
    /// relationship tuples are dropped, keeping first-seen order.
    pub fn from_rows(columns: Vec<ColumnRow>, relationships: Vec<RelationshipRow>) -> Self {
        let mut graph = SchemaGraph::default();

        for row in columns {
            let table = graph.tables.entry(row.table).or_default();
            if table.column_type(&row.column).is_none() {
                table.columns.push(ColumnInfo {
                    name: row.column,
                    data_type: row.data_type,
                });
            }
        }

        for row in relationships {
            graph.add_relationship(Relationship {
                table: row.table,
                column: row.column,
                referenced_table: row.referenced_table,
                referenced_column: row.referenced_column,
            });
        }

        graph
    }

    /// Add a relationship unless the same tuple is already present.
    pub fn add_relationship(&mut self, relationship: Relationship) -> bool {
        if self.relationships.contains(&relationship) {
            return false;
        }
        self.relationships.push(relationship);
        true
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    /// Every `(table, column)` pair in table then ordinal order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tables.iter().flat_map(|(table, info)| {
            info.columns
                .iter()
                .map(move |c| (table.as_str(), c.name.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Pretty-printed JSON rendering embedded in generation prompts.
    pub fn to_prompt_json(&self) -> Result<String> {
        let tables: serde_json::Map<String, serde_json::Value> = self
            .tables
            .iter()
            .map(|(name, info)| {
                let columns: serde_json::Map<String, serde_json::Value> = info
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), serde_json::Value::String(c.data_type.clone())))
                    .collect();
                (name.clone(), serde_json::json!({ "columns": columns }))
            })
            .collect();

        let value = serde_json::json!({
            "tables": tables,
            "relationships": self.relationships,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Loads and caches the [`SchemaGraph`] for one session.
pub struct SchemaCatalog {
    source: Arc<dyn CatalogSource>,
    cached: RwLock<Option<Arc<SchemaGraph>>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    /// Introspect the database. Fails as a whole if either the column or the
    /// relationship query fails; never returns a partial graph.
    pub async fn load(&self) -> Result<SchemaGraph> {
        let columns = self
            .source
            .fetch_columns()
            .await
            .map_err(|e| AssistantError::SchemaUnavailable(format!("column enumeration failed: {}", e)))?;

        let relationships = self.source.fetch_relationships().await.map_err(|e| {
            AssistantError::SchemaUnavailable(format!("relationship enumeration failed: {}", e))
        })?;

        let graph = SchemaGraph::from_rows(columns, relationships);
        info!(
            "Loaded schema with {} tables and {} relationships",
            graph.tables.len(),
            graph.relationships.len()
        );
        Ok(graph)
    }

    /// Cached graph, loading it on first use.
    pub async fn graph(&self) -> Result<Arc<SchemaGraph>> {
        if let Some(graph) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(graph));
        }

        let mut slot = self.cached.write().await;
        if let Some(graph) = slot.as_ref() {
            return Ok(Arc::clone(graph));
        }
        let graph = Arc::new(self.load().await?);
        *slot = Some(Arc::clone(&graph));
        Ok(graph)
    }

    /// Reload unconditionally. On failure the previously cached graph stays
    /// in place.
    pub async fn refresh(&self) -> Result<Arc<SchemaGraph>> {
        let graph = Arc::new(self.load().await?);
        *self.cached.write().await = Some(Arc::clone(&graph));
        Ok(graph)
    }
}
