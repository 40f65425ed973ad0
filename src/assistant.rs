//! Question answering session
//!
//! [`QueryAssistant`] owns everything a session needs: the schema graph, the
//! distinct value cache, the prompt library and the two external boundaries
//! (model and database). Requests flow validate → generate → execute, with a
//! single guided correction round when the result carries no information.

use crate::config::{AssistantConfig, PipelineSettings};
use crate::correction::{CorrectionSet, ValueCache, ValueCorrector};
use crate::db::{init_pool, PgCatalog, PgExecutor, QueryExecutor, ResultSet};
use crate::error::Result;
use crate::generator::{GeneratedQuery, QueryGenerator};
use crate::llm::{LanguageModel, LlmClient};
use crate::narrator::InsightNarrator;
use crate::prompts::PromptLibrary;
use crate::relevance::{RelevanceValidator, ValidationResult};
use crate::schema::{CatalogSource, SchemaCatalog, SchemaGraph};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// How a request ended.
#[derive(Debug, Clone)]
pub enum AskOutcome {
    /// The question is outside the database's business context.
    Rejected(ValidationResult),
    Answered {
        query: GeneratedQuery,
        result: ResultSet,
        narrative: String,
    },
    /// The result was empty or degenerate and some question words closely
    /// match stored values. Pick values and call
    /// [`QueryAssistant::ask_with_corrections`].
    NeedsCorrection {
        query: GeneratedQuery,
        result: ResultSet,
        corrections: CorrectionSet,
    },
    NoResults { query: GeneratedQuery },
}

pub struct QueryAssistant {
    catalog: SchemaCatalog,
    values: ValueCache,
    executor: Arc<dyn QueryExecutor>,
    validator: RelevanceValidator,
    generator: QueryGenerator,
    narrator: InsightNarrator,
    settings: PipelineSettings,
}

impl QueryAssistant {
    /// Connect to the database and the model service described by `config`.
    pub async fn connect(config: AssistantConfig) -> Result<Self> {
        let pool = init_pool(&config.database_url).await?;
        info!("Connected to database");

        let model = LlmClient::new(config.api_key, config.model, config.base_url, config.llm_timeout)?;
        info!("Using model {}", model.model());

        Self::new(
            Arc::new(model),
            Arc::new(PgCatalog::with_schema(pool.clone(), config.db_schema)),
            Arc::new(PgExecutor::new(pool, config.query_timeout)),
            config.settings,
        )
        .await
    }

    /// Build a session over arbitrary boundaries. The schema is loaded here;
    /// failure to load it is fatal.
    pub async fn new(
        model: Arc<dyn LanguageModel>,
        catalog: Arc<dyn CatalogSource>,
        executor: Arc<dyn QueryExecutor>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let prompts = Arc::new(PromptLibrary::new());
        let schema_catalog = SchemaCatalog::new(Arc::clone(&catalog));
        schema_catalog.graph().await?;

        Ok(Self {
            catalog: schema_catalog,
            values: ValueCache::new(catalog, settings.distinct_value_limit),
            executor,
            validator: RelevanceValidator::new(Arc::clone(&model), Arc::clone(&prompts)),
            generator: QueryGenerator::new(Arc::clone(&model), Arc::clone(&prompts), settings.sql_dialect.clone()),
            narrator: InsightNarrator::new(model, prompts),
            settings,
        })
    }

    pub async fn schema(&self) -> Result<Arc<SchemaGraph>> {
        self.catalog.graph().await
    }

    /// Re-introspect the database. Cached column values are kept.
    pub async fn refresh_schema(&self) -> Result<Arc<SchemaGraph>> {
        self.catalog.refresh().await
    }

    pub async fn validate_context(&self, question: &str) -> Result<ValidationResult> {
        let schema = self.schema().await?;
        Ok(self.validator.validate(question, &schema).await)
    }

    pub async fn generate_query(
        &self,
        question: &str,
        corrections: Option<&BTreeMap<String, String>>,
    ) -> Result<GeneratedQuery> {
        let schema = self.schema().await?;
        self.generator.generate(question, &schema, corrections).await
    }

    pub async fn execute(&self, query: &GeneratedQuery) -> Result<ResultSet> {
        self.executor.execute(&query.sanitized_text).await
    }

    /// Suggest stored values close to the words of `question`.
    pub async fn correct(&self, question: &str) -> Result<CorrectionSet> {
        let schema = self.schema().await?;
        Ok(ValueCorrector::suggest(&schema, question, &self.values, self.settings.fuzzy_threshold).await)
    }

    pub async fn narrate(&self, result: &ResultSet, question: &str) -> String {
        self.narrator.narrate(result, question).await
    }

    /// Run the whole pipeline for one question.
    pub async fn ask(&self, question: &str) -> Result<AskOutcome> {
        let span = info_span!("ask", request_id = %Uuid::new_v4());
        async move {
            info!("Question: {}", question);

            let validation = self.validate_context(question).await?;
            if !validation.is_related {
                info!("Question rejected: {}", validation.reasoning);
                return Ok(AskOutcome::Rejected(validation));
            }

            let query = self.generate_query(question, None).await?;
            let result = self.execute(&query).await?;

            if !result.is_degenerate() {
                let narrative = self.narrate(&result, question).await;
                return Ok(AskOutcome::Answered {
                    query,
                    result,
                    narrative,
                });
            }

            warn!("Query returned no usable rows, looking for value corrections");
            let corrections = self.correct(question).await?;
            if corrections.is_empty() {
                Ok(AskOutcome::NoResults { query })
            } else {
                Ok(AskOutcome::NeedsCorrection {
                    query,
                    result,
                    corrections,
                })
            }
        }
        .instrument(span)
        .await
    }

    /// Regenerate and run the query once with `selections` (`table.column`
    /// to value). No further correction round follows, whatever the result.
    pub async fn ask_with_corrections(
        &self,
        question: &str,
        selections: &BTreeMap<String, String>,
    ) -> Result<AskOutcome> {
        let span = info_span!("ask_with_corrections", request_id = %Uuid::new_v4());
        async move {
            info!("Retrying with {} corrected values", selections.len());

            let query = self.generate_query(question, Some(selections)).await?;
            let result = self.execute(&query).await?;

            if result.is_empty() {
                return Ok(AskOutcome::NoResults { query });
            }
            let narrative = self.narrate(&result, question).await;
            Ok(AskOutcome::Answered {
                query,
                result,
                narrative,
            })
        }
        .instrument(span)
        .await
    }
}
