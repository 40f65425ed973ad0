use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Unknown prompt template: {0}")]
    UnknownTemplate(String),

    #[error("Prompt template '{template}' is missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    #[error("LLM error: {0}")]
    ModelInvocation(String),

    #[error("Generated query does not reference any known table: {0}")]
    NoTableReferenced(String),

    #[error("Generated SQL is not a read-only query: {0}")]
    NonQueryStatement(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Narrative generation failed: {0}")]
    Narration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AssistantError {
    /// Whether the current request can carry on (or the caller can retry)
    /// after this error. Schema, template and configuration failures are
    /// fatal for the assistant instance.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AssistantError::SchemaUnavailable(_)
            | AssistantError::UnknownTemplate(_)
            | AssistantError::MissingVariable { .. }
            | AssistantError::Config(_) => false,
            AssistantError::ModelInvocation(_)
            | AssistantError::NoTableReferenced(_)
            | AssistantError::NonQueryStatement(_)
            | AssistantError::Execution(_)
            | AssistantError::Narration(_)
            | AssistantError::Database(_)
            | AssistantError::Json(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_are_not_recoverable() {
        assert!(!AssistantError::SchemaUnavailable("down".into()).is_recoverable());
        assert!(!AssistantError::UnknownTemplate("x".into()).is_recoverable());
        assert!(!AssistantError::MissingVariable {
            template: "t".into(),
            variable: "v".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_request_errors_are_recoverable() {
        assert!(AssistantError::ModelInvocation("429".into()).is_recoverable());
        assert!(AssistantError::NoTableReferenced("SELECT 1".into()).is_recoverable());
        assert!(AssistantError::Execution("syntax".into()).is_recoverable());
    }

    #[test]
    fn test_missing_variable_message() {
        let err = AssistantError::MissingVariable {
            template: "sql_query_generation".into(),
            variable: "schema".into(),
        };
        assert_eq!(
            err.to_string(),
            "Prompt template 'sql_query_generation' is missing variable 'schema'"
        );
    }
}
