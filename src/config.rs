//! Assistant configuration
//!
//! Settings come from the process environment (after `.env` has been loaded
//! by the binary). The CLI may override individual values afterwards.

use crate::error::{AssistantError, Result};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 80;
pub const DEFAULT_DISTINCT_VALUE_LIMIT: usize = 5000;
pub const DEFAULT_DB_SCHEMA: &str = "public";

/// Connection and model settings for one assistant session.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub database_url: String,
    /// Database schema whose tables are introspected and queried.
    pub db_schema: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub llm_timeout: Duration,
    pub query_timeout: Duration,
    pub settings: PipelineSettings,
}

/// Knobs consumed by the pipeline components themselves, independent of how
/// the database and model are reached.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Minimum similarity (0-100) for a value correction candidate.
    pub fuzzy_threshold: u8,
    /// Upper bound on distinct values cached per column.
    pub distinct_value_limit: usize,
    /// Dialect named in the generation prompt.
    pub sql_dialect: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            distinct_value_limit: DEFAULT_DISTINCT_VALUE_LIMIT,
            sql_dialect: "PostgreSQL".to_string(),
        }
    }
}

impl AssistantConfig {
    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first_of = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let database_url = first_of(&["DATABASE_URL", "CONNECTION_STRING"])
            .ok_or_else(|| AssistantError::Config("DATABASE_URL is not set".to_string()))?;
        let api_key = first_of(&["OPENAI_API_KEY", "API_KEY"])
            .ok_or_else(|| AssistantError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let llm_timeout_secs: u64 = parse_or(first_of(&["LLM_TIMEOUT_SECS"]), "LLM_TIMEOUT_SECS", 60)?;
        let query_timeout_secs: u64 =
            parse_or(first_of(&["QUERY_TIMEOUT_SECS"]), "QUERY_TIMEOUT_SECS", 30)?;
        let threshold: u32 = parse_or(
            first_of(&["FUZZY_THRESHOLD"]),
            "FUZZY_THRESHOLD",
            DEFAULT_FUZZY_THRESHOLD as u32,
        )?;
        let distinct_value_limit: usize = parse_or(
            first_of(&["DISTINCT_VALUE_LIMIT"]),
            "DISTINCT_VALUE_LIMIT",
            DEFAULT_DISTINCT_VALUE_LIMIT,
        )?;

        Ok(Self {
            database_url,
            db_schema: first_of(&["DB_SCHEMA"]).unwrap_or_else(|| DEFAULT_DB_SCHEMA.to_string()),
            api_key,
            base_url: first_of(&["OPENAI_BASE_URL"]).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: first_of(&["OPENAI_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            query_timeout: Duration::from_secs(query_timeout_secs),
            settings: PipelineSettings {
                fuzzy_threshold: threshold.min(100) as u8,
                distinct_value_limit,
                sql_dialect: first_of(&["SQL_DIALECT"]).unwrap_or_else(|| "PostgreSQL".to_string()),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| AssistantError::Config(format!("{} must be a number, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.settings.fuzzy_threshold, 80);
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
        assert_eq!(config.settings.sql_dialect, "PostgreSQL");
        assert_eq!(config.db_schema, DEFAULT_DB_SCHEMA);
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("CONNECTION_STRING", "postgres://db/sales"),
            ("API_KEY", "gsk-test"),
            ("OPENAI_BASE_URL", "https://api.groq.com/openai/v1"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/sales");
        assert_eq!(config.api_key, "gsk-test");
        assert_eq!(config.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_db_schema_override() {
        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/shop"),
            ("OPENAI_API_KEY", "sk"),
            ("DB_SCHEMA", "sales"),
        ]))
        .unwrap();
        assert_eq!(config.db_schema, "sales");
    }

    #[test]
    fn test_missing_database_url() {
        let err = AssistantConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk")])).unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }

    #[test]
    fn test_invalid_threshold_rejected_and_large_clamped() {
        let err = AssistantConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("OPENAI_API_KEY", "sk"),
            ("FUZZY_THRESHOLD", "high"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));

        let config = AssistantConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("OPENAI_API_KEY", "sk"),
            ("FUZZY_THRESHOLD", "250"),
        ]))
        .unwrap();
        assert_eq!(config.settings.fuzzy_threshold, 100);
    }
}
