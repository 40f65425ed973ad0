//! Question relevance validation
//!
//! The model decides first; when it fails or answers with something that is
//! not the expected JSON, a keyword heuristic decides instead. Validation
//! never returns an error.

use crate::llm::{strip_reasoning, ChatMessage, ChatRequest, LanguageModel};
use crate::prompts::{PromptLibrary, CONTEXT_VALIDATOR};
use crate::schema::SchemaGraph;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Suggestion returned with a rejected question when the model gave none.
pub const DEFAULT_REFRAME: &str = "I can only help with questions about your business data, \
and I can't perform administrative actions such as listing, creating, modifying or deleting \
records. Please contact your system administrator for those. Could you tell me what information \
you would like to look at instead?";

const ANALYTICAL_KEYWORDS: &[&str] = &["how many", "count", "list", "show", "find", "get", "what", "which"];

lazy_static! {
    // Data-modifying or catalog requests, matched as command shapes so that
    // "revenue drop" or "price update" stay analytical
    static ref ADMIN_INTENT: Regex = Regex::new(concat!(
        r"(?i)^\s*(please\s+)?(delete|drop|truncate|alter|grant|revoke|insert|update)\b",
        r"|\bdelete\s+(all\s+)?(the\s+)?(rows|records|data|entries)?\s*from\b",
        r"|\binsert\s+into\b",
        r"|\bupdate\s+\w+\s+set\b",
        r"|\b(drop|truncate|alter)\s+(the\s+)?(table|database|schema|column|index|view)s?\b",
        r"|\bcreate\s+(a\s+)?(new\s+)?(table|database|schema|index|view|user|role)s?\b",
        r"|\b(list|show|describe)\s+(me\s+)?(all\s+)?(the\s+)?(tables|schemas?|columns|relationships|databases?)\b",
    ))
    .unwrap();
    static ref KEYWORD_PATTERNS: Vec<Regex> = ANALYTICAL_KEYWORDS
        .iter()
        .map(|kw| Regex::new(&format!(r"(?i)\b{}(s|es|ing|ed)?\b", regex::escape(kw))).unwrap())
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_related: bool,
    pub reasoning: String,
    #[serde(default)]
    pub reframed_question: Option<String>,
}

impl ValidationResult {
    /// Enforce that a reframed question is present exactly when the question
    /// was rejected.
    pub fn normalized(mut self) -> Self {
        if self.is_related {
            self.reframed_question = None;
        } else {
            let keep = self
                .reframed_question
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            self.reframed_question = Some(keep.unwrap_or_else(|| DEFAULT_REFRAME.to_string()));
        }
        self
    }
}

pub struct RelevanceValidator {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptLibrary>,
}

impl RelevanceValidator {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptLibrary>) -> Self {
        Self { model, prompts }
    }

    pub async fn validate(&self, question: &str, schema: &SchemaGraph) -> ValidationResult {
        match self.validate_with_model(question, schema).await {
            Ok(result) => {
                info!("Relevance decided by model: is_related={}", result.is_related);
                result
            }
            Err(reason) => {
                warn!("Model relevance check unavailable ({}), using heuristic", reason);
                heuristic_verdict(question, schema)
            }
        }
    }

    async fn validate_with_model(&self, question: &str, schema: &SchemaGraph) -> Result<ValidationResult, String> {
        let tables_info = describe_tables(schema);
        let relationship_info = describe_relationships(schema);
        let system_prompt = self
            .prompts
            .render_with(
                CONTEXT_VALIDATOR,
                &[
                    ("tables_info", tables_info.as_str()),
                    ("relationship_info", relationship_info.as_str()),
                ],
            )
            .map_err(|e| e.to_string())?;
        debug!("Validator prompt:\n{}", system_prompt);

        let request = ChatRequest::new(
            vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(format!("Question: {}", question)),
            ],
            0.0,
        );
        let response = self.model.complete(&request).await.map_err(|e| e.to_string())?;
        parse_validation(&response)
    }
}

/// `Table 'T' contains: col (type), ...` per table.
pub fn describe_tables(schema: &SchemaGraph) -> String {
    schema
        .tables
        .iter()
        .map(|(name, info)| {
            let columns = info
                .columns
                .iter()
                .map(|c| format!("{} ({})", c.name, c.data_type))
                .join(", ");
            format!("Table '{}' contains: {}", name, columns)
        })
        .join("\n")
}

/// `Table 'A' is related to 'B' through A.x = B.y` per relationship.
pub fn describe_relationships(schema: &SchemaGraph) -> String {
    schema
        .relationships
        .iter()
        .map(|rel| {
            format!(
                "Table '{}' is related to '{}' through {}",
                rel.table, rel.referenced_table, rel
            )
        })
        .join("\n")
}

/// Strict decode of a model answer into a [`ValidationResult`].
pub fn parse_validation(response: &str) -> Result<ValidationResult, String> {
    let cleaned = strip_reasoning(response);
    let cleaned = cleaned
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return Err(format!("no JSON object in response: {}", cleaned)),
    };

    let parsed: ValidationResult =
        serde_json::from_str(json).map_err(|e| format!("malformed validation JSON: {}", e))?;
    Ok(parsed.normalized())
}

/// Deterministic verdict used when the model cannot be consulted.
pub fn heuristic_verdict(question: &str, schema: &SchemaGraph) -> ValidationResult {
    let question_lower = question.to_lowercase();

    if ADMIN_INTENT.is_match(&question_lower) {
        return ValidationResult {
            is_related: false,
            reasoning: "Question asks for an administrative or data-modifying action".to_string(),
            reframed_question: None,
        }
        .normalized();
    }

    for table in schema.table_names() {
        let table_lower = table.to_lowercase();
        if table_name_variants(&table_lower)
            .iter()
            .any(|variant| question_lower.contains(variant.as_str()))
        {
            return ValidationResult {
                is_related: true,
                reasoning: format!("Question mentions table - {}", table_lower),
                reframed_question: None,
            };
        }
    }

    if KEYWORD_PATTERNS.iter().any(|re| re.is_match(&question_lower)) {
        return ValidationResult {
            is_related: true,
            reasoning: "Question appears to be an analytical query".to_string(),
            reframed_question: None,
        };
    }

    ValidationResult {
        is_related: false,
        reasoning: "Question doesn't appear to be related to the database".to_string(),
        reframed_question: None,
    }
    .normalized()
}

/// The table name plus its naive singular and plural forms.
fn table_name_variants(table: &str) -> Vec<String> {
    let mut variants = vec![table.to_string(), format!("{}s", table)];
    if let Some(singular) = table.strip_suffix('s') {
        if singular.len() > 1 {
            variants.push(singular.to_string());
        }
    }
    variants
}
