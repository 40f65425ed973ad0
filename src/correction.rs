//! Fuzzy value correction
//!
//! When a query comes back empty, the words of the question are compared
//! against the distinct values stored in every column. Close matches are
//! offered back as corrected filter values for one guided retry.

use crate::error::Result;
use crate::schema::{CatalogSource, SchemaGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use strsim::normalized_levenshtein;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A column addressed by its table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub table: String,
    pub column: String,
}

impl FieldRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse `table.column`. The split happens at the first dot.
    pub fn parse(text: &str) -> Option<Self> {
        let (table, column) = text.split_once('.')?;
        let (table, column) = (table.trim(), column.trim());
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self::new(table, column))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Session-scoped cache of distinct column values.
///
/// Entries are filled on first access and never evicted, so the data can go
/// stale while the session lives. A failed fetch leaves no entry behind.
pub struct ValueCache {
    source: Arc<dyn CatalogSource>,
    limit: usize,
    entries: Mutex<HashMap<FieldRef, Arc<Vec<String>>>>,
}

impl ValueCache {
    pub fn new(source: Arc<dyn CatalogSource>, limit: usize) -> Self {
        Self {
            source,
            limit,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Distinct values of `field`, fetched at most once per session.
    pub async fn get_or_fetch(&self, field: &FieldRef) -> Result<Arc<Vec<String>>> {
        // Held across the fetch so concurrent callers wait instead of refetching
        let mut entries = self.entries.lock().await;
        if let Some(values) = entries.get(field) {
            return Ok(Arc::clone(values));
        }

        let values = self
            .source
            .fetch_distinct_values(&field.table, &field.column, self.limit)
            .await?;
        debug!("Cached {} distinct values for {}", values.len(), field);

        let values = Arc::new(values);
        entries.insert(field.clone(), Arc::clone(&values));
        Ok(values)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub value: String,
    /// Similarity to the closest question word, 0..=100.
    pub score: u8,
}

/// Suggested replacement values per field, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionSet {
    pub fields: BTreeMap<FieldRef, Vec<Candidate>>,
}

impl CorrectionSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Highest scoring value of every field, keyed by `table.column`.
    pub fn top_choices(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(field, candidates)| {
                candidates
                    .first()
                    .map(|best| (field.to_string(), best.value.clone()))
            })
            .collect()
    }
}

pub struct ValueCorrector;

impl ValueCorrector {
    /// Match question words against cached column values and keep every value
    /// scoring at least `threshold`. Fields whose values cannot be read are
    /// skipped.
    pub async fn suggest(
        schema: &SchemaGraph,
        question: &str,
        cache: &ValueCache,
        threshold: u8,
    ) -> CorrectionSet {
        let tokens = tokenize(question);
        let mut corrections = CorrectionSet::default();
        if tokens.is_empty() {
            return corrections;
        }

        for (table, column) in schema.fields() {
            let field = FieldRef::new(table, column);
            let values = match cache.get_or_fetch(&field).await {
                Ok(values) => values,
                Err(e) => {
                    warn!("Skipping {} during correction: {}", field, e);
                    continue;
                }
            };

            let candidates = score_values(&tokens, &values, threshold);
            if !candidates.is_empty() {
                corrections.fields.insert(field, candidates);
            }
        }

        info!(
            "Value correction found candidates for {} fields",
            corrections.len()
        );
        corrections
    }
}

/// Best score per value across all tokens, deduplicated and sorted by score
/// descending then value ascending.
fn score_values(tokens: &[String], values: &[String], threshold: u8) -> Vec<Candidate> {
    let mut best: HashMap<&str, u8> = HashMap::new();
    for value in values {
        let score = tokens
            .iter()
            .map(|token| similarity_score(token, value))
            .max()
            .unwrap_or(0);
        if score >= threshold {
            let entry = best.entry(value.as_str()).or_insert(score);
            *entry = (*entry).max(score);
        }
    }

    let mut candidates: Vec<Candidate> = best
        .into_iter()
        .map(|(value, score)| Candidate {
            value: value.to_string(),
            score,
        })
        .collect();
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.value.cmp(&b.value)));
    candidates
}

/// Case-insensitive similarity on a 0..=100 scale; 100 means equal.
pub fn similarity_score(a: &str, b: &str) -> u8 {
    let ratio = normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase());
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Whitespace-separated words with surrounding punctuation removed.
pub fn tokenize(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use crate::schema::{ColumnRow, RelationshipRow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCatalog {
        values: HashMap<(String, String), Vec<String>>,
        fetches: AtomicUsize,
    }

    impl CountingCatalog {
        fn new(values: &[(&str, &str, &[&str])]) -> Self {
            Self {
                values: values
                    .iter()
                    .map(|(t, c, vs)| {
                        (
                            (t.to_string(), c.to_string()),
                            vs.iter().map(|v| v.to_string()).collect(),
                        )
                    })
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogSource for CountingCatalog {
        async fn fetch_columns(&self) -> Result<Vec<ColumnRow>> {
            Ok(Vec::new())
        }

        async fn fetch_relationships(&self) -> Result<Vec<RelationshipRow>> {
            Ok(Vec::new())
        }

        async fn fetch_distinct_values(&self, table: &str, column: &str, _: usize) -> Result<Vec<String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(&(table.to_string(), column.to_string()))
                .cloned()
                .ok_or_else(|| AssistantError::Execution(format!("no such column {}.{}", table, column)))
        }
    }

    fn schema(fields: &[(&str, &str)]) -> SchemaGraph {
        SchemaGraph::from_rows(
            fields
                .iter()
                .map(|(t, c)| ColumnRow {
                    table: t.to_string(),
                    column: c.to_string(),
                    data_type: "text".to_string(),
                })
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn test_similarity_score_bounds() {
        assert_eq!(similarity_score("Acme", "acme"), 100);
        assert_eq!(similarity_score("", ""), 100);
        assert_eq!(similarity_score("abc", "xyz"), 0);
        assert!(similarity_score("Acmee", "Acme") >= 80);
    }

    #[test]
    fn test_tokenize_trims_punctuation() {
        assert_eq!(
            tokenize("Orders for \"Acme\", last month?"),
            vec!["Orders", "for", "Acme", "last", "month"]
        );
        assert!(tokenize("  ?! ").is_empty());
    }

    #[test]
    fn test_field_ref_parse_and_display() {
        let field = FieldRef::parse("Customers.Name").unwrap();
        assert_eq!(field, FieldRef::new("Customers", "Name"));
        assert_eq!(field.to_string(), "Customers.Name");
        assert!(FieldRef::parse("Customers").is_none());
        assert!(FieldRef::parse(".Name").is_none());
    }

    #[test]
    fn test_candidates_sorted_and_deduplicated() {
        let tokens = tokenize("acme acmee");
        let values = vec!["Acmee".to_string(), "Acme".to_string(), "Acme".to_string(), "Zenith".to_string()];
        let candidates = score_values(&tokens, &values, 80);
        assert_eq!(
            candidates,
            vec![
                Candidate { value: "Acme".into(), score: 100 },
                Candidate { value: "Acmee".into(), score: 100 },
            ]
        );
    }

    #[tokio::test]
    async fn test_threshold_is_monotonic() {
        let catalog = Arc::new(CountingCatalog::new(&[(
            "Customers",
            "Name",
            &["Acme Corp", "Acme", "Globex", "Initech"],
        )]));
        let schema = schema(&[("Customers", "Name")]);
        let cache = ValueCache::new(catalog, 100);
        let question = "How many orders did Acmee place?";

        let mut previous = usize::MAX;
        for threshold in [0u8, 40, 60, 80, 90, 100] {
            let set = ValueCorrector::suggest(&schema, question, &cache, threshold).await;
            let count: usize = set.fields.values().map(Vec::len).sum();
            assert!(count <= previous, "threshold {} grew the set", threshold);
            for candidate in set.fields.values().flatten() {
                assert!(candidate.score >= threshold);
            }
            previous = count;
        }
    }

    #[tokio::test]
    async fn test_suggest_finds_close_value() {
        let catalog = Arc::new(CountingCatalog::new(&[
            ("Customers", "Name", &["Acme", "Globex"]),
            ("Orders", "Status", &["shipped", "pending"]),
        ]));
        let schema = schema(&[("Customers", "Name"), ("Orders", "Status")]);
        let cache = ValueCache::new(catalog, 100);

        let set = ValueCorrector::suggest(&schema, "Total for Acmee orders shiped", &cache, 80).await;
        let top = set.top_choices();
        assert_eq!(top.get("Customers.Name").map(String::as_str), Some("Acme"));
        assert_eq!(top.get("Orders.Status").map(String::as_str), Some("shipped"));
    }

    #[tokio::test]
    async fn test_no_match_is_empty() {
        let catalog = Arc::new(CountingCatalog::new(&[("Customers", "Name", &["Acme"])]));
        let cache = ValueCache::new(catalog, 100);
        let set = ValueCorrector::suggest(&schema(&[("Customers", "Name")]), "weather in Paris", &cache, 80).await;
        assert!(set.is_empty());
        assert!(set.top_choices().is_empty());
    }

    #[tokio::test]
    async fn test_cache_fetches_each_field_once() {
        let catalog = Arc::new(CountingCatalog::new(&[("Customers", "Name", &["Acme"])]));
        let cache = ValueCache::new(catalog.clone(), 100);
        let field = FieldRef::new("Customers", "Name");

        let first = cache.get_or_fetch(&field).await.unwrap();
        let second = cache.get_or_fetch(&field).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_skipped_and_not_cached() {
        let catalog = Arc::new(CountingCatalog::new(&[("Customers", "Name", &["Acme"])]));
        let cache = ValueCache::new(catalog.clone(), 100);
        let schema = schema(&[("Customers", "Name"), ("Ghost", "Col")]);

        let set = ValueCorrector::suggest(&schema, "acme", &cache, 80).await;
        assert_eq!(set.len(), 1);
        assert_eq!(cache.len().await, 1);

        ValueCorrector::suggest(&schema, "acme", &cache, 80).await;
        // Customers.Name served from cache, Ghost.Col retried
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 3);
    }
}
