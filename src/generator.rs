//! SQL generation
//!
//! Builds the schema-grounded prompt, asks the model for a query, cleans the
//! completion and refuses anything that does not reference a known table.

use crate::error::{AssistantError, Result};
use crate::llm::{strip_reasoning, ChatMessage, ChatRequest, LanguageModel};
use crate::prompts::{PromptLibrary, SQL_CORRECTIONS, SQL_GENERATION};
use crate::schema::SchemaGraph;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Temperature for SQL generation; near zero keeps query shapes stable.
pub const GENERATION_TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub raw_text: String,
    pub sanitized_text: String,
    /// Never empty for a query returned by [`QueryGenerator::generate`].
    pub referenced_tables: BTreeSet<String>,
}

pub struct QueryGenerator {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptLibrary>,
    dialect: String,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptLibrary>, dialect: impl Into<String>) -> Self {
        Self {
            model,
            prompts,
            dialect: dialect.into(),
        }
    }

    /// Generate SQL for `question`. `corrections` maps `table.column` to the
    /// value the model must use instead of the user's wording.
    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaGraph,
        corrections: Option<&BTreeMap<String, String>>,
    ) -> Result<GeneratedQuery> {
        let prompt = self.build_prompt(question, schema, corrections)?;
        debug!("Generation prompt:\n{}", prompt);

        let request = ChatRequest::new(
            vec![ChatMessage::system(prompt), ChatMessage::user(question)],
            GENERATION_TEMPERATURE,
        );
        let raw_text = self.model.complete(&request).await?;

        let query = finalize_query(&raw_text, schema)?;
        info!("Generated SQL: {}", query.sanitized_text);
        Ok(query)
    }

    pub fn build_prompt(
        &self,
        question: &str,
        schema: &SchemaGraph,
        corrections: Option<&BTreeMap<String, String>>,
    ) -> Result<String> {
        let corrections_block = match corrections {
            Some(map) if !map.is_empty() => {
                let lines = map
                    .iter()
                    .map(|(field, value)| format!("- {} = '{}'", field, value))
                    .join("\n");
                self.prompts.render_with(SQL_CORRECTIONS, &[("corrections", lines.as_str())])?
            }
            _ => String::new(),
        };

        let schema_json = schema.to_prompt_json()?;
        self.prompts.render_with(
            SQL_GENERATION,
            &[
                ("dialect", self.dialect.as_str()),
                ("schema", schema_json.as_str()),
                ("question", question),
                ("corrections", corrections_block.as_str()),
            ],
        )
    }
}

/// Strip formatting artifacts: reasoning blocks, code fences, statement
/// terminators, backslashes and backticks.
pub fn sanitize_sql(raw: &str) -> String {
    strip_reasoning(raw)
        .replace("```sql", "")
        .replace("```SQL", "")
        .replace("```", "")
        .replace([';', '\\', '`'], "")
        .trim()
        .to_string()
}

/// Known tables whose names occur in `sql`, compared case-insensitively.
pub fn referenced_tables(sql: &str, schema: &SchemaGraph) -> BTreeSet<String> {
    let sql_lower = sql.to_lowercase();
    schema
        .table_names()
        .filter(|table| sql_lower.contains(&table.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Sanitize a raw completion and check it is safe to hand to execution.
pub fn finalize_query(raw_text: &str, schema: &SchemaGraph) -> Result<GeneratedQuery> {
    let sanitized_text = sanitize_sql(raw_text);

    let tables = referenced_tables(&sanitized_text, schema);
    if tables.is_empty() {
        return Err(AssistantError::NoTableReferenced(sanitized_text));
    }

    ensure_read_only(&sanitized_text)?;

    Ok(GeneratedQuery {
        raw_text: raw_text.to_string(),
        sanitized_text,
        referenced_tables: tables,
    })
}

/// Reject statements that parse as anything other than a query. SQL the
/// generic dialect cannot parse is let through.
fn ensure_read_only(sql: &str) -> Result<()> {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => {
            if statements.iter().all(|s| matches!(s, Statement::Query(_))) {
                Ok(())
            } else {
                Err(AssistantError::NonQueryStatement(sql.to_string()))
            }
        }
        Err(e) => {
            warn!("SQL parsing failed: {}, skipping statement check", e);
            Ok(())
        }
    }
}
