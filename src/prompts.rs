//! Prompt templates
//!
//! Templates are fixed at construction. Placeholders use `{name}`; a literal
//! brace is written `{{` or `}}`.

use crate::error::{AssistantError, Result};
use std::collections::{BTreeMap, HashMap};

pub const CONTEXT_VALIDATOR: &str = "user_question_context_validator";
pub const SQL_GENERATION: &str = "sql_query_generation";
pub const SQL_CORRECTIONS: &str = "sql_query_corrections";
pub const NARRATIVE_INSIGHTS: &str = "narrative_insights";

/// Decides whether a question belongs to the business data in the database.
pub const CONTEXT_VALIDATOR_PROMPT: &str = r#"You are an expert validator deciding whether a business question can be answered from the database described below.

Tables:
{tables_info}

Relationships:
{relationship_info}

Treat a question as related when it:
1. Mentions a table, including variations and synonyms ('category' for 'categories').
2. Asks for data held in a column.
3. Asks how records in different tables relate to each other.
4. Asks for aggregates or summaries: counts, totals, averages and other analytics.
5. Uses business terms that clearly map onto the schema ('sales' onto a sales table).

Always reject, regardless of the rules above:
- Administrative requests of any kind.
- Requests to list or describe the database, its tables, columns or relationships.
- Requests to insert, update, delete or otherwise modify records or structure.
- Purely descriptive questions that do not ask for data ("What is Product?").

Respond with a single JSON object and nothing else:
{{
  "reasoning": "short explanation using words like 'database', 'table' or 'column' but never naming actual tables or columns",
  "is_related": true or false,
  "reframed_question": null when is_related is true; otherwise a polite suggestion steering the user toward a business question this assistant can answer, without technical database details
}}

Example reframed_question for a deletion request:
"I can't perform administrative actions such as deleting or modifying records. Please contact your system administrator for that. Is there information about these records you would like to look at instead?""#;

/// Turns a question into a single SQL query.
pub const SQL_GENERATION_PROMPT: &str = r#"Given the following {dialect} database schema:
{schema}

Write one SQL query that answers this question:
"{question}"
{corrections}
Requirements:
1. Use only tables and columns that exist in the schema.
2. Join through the listed relationships, and only when a join is needed.
3. Prefer LEFT JOIN where rows without a match must still appear.
4. Include the aggregations, groupings and date filters the question implies.
5. Use LIKE for fuzzy text filters, but exact comparison when an exact value is given.
6. Give every output column a concise PascalCase alias without punctuation.
7. When aggregating, also select the column the aggregate is grouped by.
8. Select only the columns needed to answer the question.

Output only the SQL query, with no explanation or commentary."#;

/// Block appended to the generation prompt on a corrected retry.
pub const SQL_CORRECTIONS_PROMPT: &str = r#"
The previous attempt returned no rows. Use these corrected values exactly as written:
{corrections}
"#;

/// Summarizes descriptive statistics of a result set.
pub const NARRATIVE_INSIGHTS_PROMPT: &str = r#"Analyze this dataset summary and describe the key insights in plain language:
{data_description}

The user asked: "{question}"

Focus on:
1. Key trends and patterns
2. Notable changes or anomalies
3. Business implications"#;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Registry of named, pre-parsed prompt templates.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<&'static str, Vec<Segment>>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptLibrary {
    pub fn new() -> Self {
        let templates = [
            (CONTEXT_VALIDATOR, CONTEXT_VALIDATOR_PROMPT),
            (SQL_GENERATION, SQL_GENERATION_PROMPT),
            (SQL_CORRECTIONS, SQL_CORRECTIONS_PROMPT),
            (NARRATIVE_INSIGHTS, NARRATIVE_INSIGHTS_PROMPT),
        ]
        .into_iter()
        .map(|(name, text)| (name, parse_template(text)))
        .collect();

        Self { templates }
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.templates.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Placeholders of a template, in order of first appearance.
    pub fn required_variables(&self, template_name: &str) -> Result<Vec<String>> {
        let segments = self.segments(template_name)?;
        let mut seen = Vec::new();
        for segment in segments {
            if let Segment::Placeholder(name) = segment {
                if !seen.contains(name) {
                    seen.push(name.clone());
                }
            }
        }
        Ok(seen)
    }

    /// Fill a template. Every placeholder needs a value; extra values are
    /// ignored.
    pub fn render(&self, template_name: &str, variables: &BTreeMap<String, String>) -> Result<String> {
        let segments = self.segments(template_name)?;
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = variables.get(name).ok_or_else(|| AssistantError::MissingVariable {
                        template: template_name.to_string(),
                        variable: name.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Convenience wrapper over [`PromptLibrary::render`] for literal pairs.
    pub fn render_with(&self, template_name: &str, variables: &[(&str, &str)]) -> Result<String> {
        let map: BTreeMap<String, String> = variables
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.render(template_name, &map)
    }

    fn segments(&self, template_name: &str) -> Result<&[Segment]> {
        self.templates
            .get(template_name)
            .map(|s| s.as_slice())
            .ok_or_else(|| AssistantError::UnknownTemplate(template_name.to_string()))
    }
}

/// Split a template into literal text and `{name}` placeholders. A `{` that
/// does not open a well-formed placeholder is kept as literal text.
fn parse_template(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                while let Some(&next) = chars.peek() {
                    if next == '}' {
                        chars.next();
                        closed = true;
                        break;
                    }
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                if closed && !name.is_empty() {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                } else {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_registered() {
        let library = PromptLibrary::new();
        assert_eq!(
            library.names(),
            vec![NARRATIVE_INSIGHTS, SQL_CORRECTIONS, SQL_GENERATION, CONTEXT_VALIDATOR]
        );
    }

    #[test]
    fn test_required_variables() {
        let library = PromptLibrary::new();
        assert_eq!(
            library.required_variables(SQL_GENERATION).unwrap(),
            vec!["dialect", "schema", "question", "corrections"]
        );
        assert_eq!(
            library.required_variables(CONTEXT_VALIDATOR).unwrap(),
            vec!["tables_info", "relationship_info"]
        );
    }

    #[test]
    fn test_render_escaped_braces_stay_literal() {
        let library = PromptLibrary::new();
        let prompt = library
            .render_with(
                CONTEXT_VALIDATOR,
                &[("tables_info", "Table 'Orders' contains: Id (int)"), ("relationship_info", "")],
            )
            .unwrap();
        assert!(prompt.contains("Table 'Orders' contains: Id (int)"));
        assert!(prompt.contains("{\n  \"reasoning\""));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_unknown_template() {
        let library = PromptLibrary::new();
        let err = library.render_with("nope", &[]).unwrap_err();
        assert!(matches!(err, AssistantError::UnknownTemplate(name) if name == "nope"));
    }

    #[test]
    fn test_missing_variable() {
        let library = PromptLibrary::new();
        let err = library
            .render_with(NARRATIVE_INSIGHTS, &[("data_description", "{}")])
            .unwrap_err();
        assert!(matches!(
            err,
            AssistantError::MissingVariable { ref variable, .. } if variable == "question"
        ));
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let library = PromptLibrary::new();
        let rendered = library
            .render_with(
                NARRATIVE_INSIGHTS,
                &[("data_description", "{\"Revenue\":{\"count\":3}}"), ("question", "{question}")],
            )
            .unwrap();
        assert!(rendered.contains("{\"Revenue\":{\"count\":3}}"));
        assert!(rendered.contains("\"{question}\""));
    }

    #[test]
    fn test_parse_template_malformed_brace_is_literal() {
        let segments = parse_template("a { b} {ok}");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("a { b} ".to_string()),
                Segment::Placeholder("ok".to_string()),
            ]
        );
    }
}
