//! Natural-language questions over a relational database.
//!
//! A question is checked for relevance against the introspected schema,
//! turned into SQL by a language model, sanitized, executed read-only and,
//! when the result is empty, matched against stored column values so the
//! caller can retry once with corrected filter values.

pub mod assistant;
pub mod config;
pub mod correction;
pub mod db;
pub mod error;
pub mod generator;
pub mod llm;
pub mod narrator;
pub mod prompts;
pub mod relevance;
pub mod schema;

pub use assistant::{AskOutcome, QueryAssistant};
pub use config::{AssistantConfig, PipelineSettings};
pub use correction::{Candidate, CorrectionSet, FieldRef, ValueCache, ValueCorrector};
pub use db::{CellValue, QueryExecutor, ResultSet};
pub use error::{AssistantError, Result};
pub use generator::{GeneratedQuery, QueryGenerator};
pub use llm::{ChatMessage, ChatRequest, LanguageModel, LlmClient};
pub use narrator::InsightNarrator;
pub use prompts::PromptLibrary;
pub use relevance::{RelevanceValidator, ValidationResult};
pub use schema::{CatalogSource, ColumnRow, RelationshipRow, SchemaCatalog, SchemaGraph};
