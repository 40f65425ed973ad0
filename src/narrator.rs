//! Narrative insights over a result set

use crate::db::result::{CellValue, ResultSet};
use crate::error::{AssistantError, Result};
use crate::llm::{strip_reasoning, ChatMessage, ChatRequest, LanguageModel};
use crate::prompts::{PromptLibrary, NARRATIVE_INSIGHTS};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NARRATIVE_TEMPERATURE: f32 = 0.3;

pub struct InsightNarrator {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptLibrary>,
}

impl InsightNarrator {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptLibrary>) -> Self {
        Self { model, prompts }
    }

    /// Commentary on `result` in light of `question`. Never fails: errors
    /// come back as a `Narrative generation failed: ...` message.
    pub async fn narrate(&self, result: &ResultSet, question: &str) -> String {
        match self.try_narrate(result, question).await {
            Ok(text) => text,
            Err(e) => {
                let failure = match e {
                    AssistantError::Narration(_) => e,
                    other => AssistantError::Narration(other.to_string()),
                };
                warn!("{}", failure);
                failure.to_string()
            }
        }
    }

    async fn try_narrate(&self, result: &ResultSet, question: &str) -> Result<String> {
        let description = serde_json::to_string(&describe_result_set(result))?;
        let prompt = self.prompts.render_with(
            NARRATIVE_INSIGHTS,
            &[("data_description", description.as_str()), ("question", question)],
        )?;
        debug!("Narrative prompt:\n{}", prompt);

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)], NARRATIVE_TEMPERATURE);
        let text = strip_reasoning(&self.model.complete(&request).await?);
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::Narration("model returned no text".to_string()));
        }
        Ok(text.to_string())
    }
}

/// Descriptive statistics per column.
///
/// Every column reports `count` of non-null values. Columns whose non-null
/// values are all numeric add `mean`, sample `std`, `min`, quartiles and
/// `max`; the rest add `unique`, `top` and `freq`.
pub fn describe_result_set(result: &ResultSet) -> Value {
    let mut description = Map::new();
    for (idx, column) in result.columns().iter().enumerate() {
        let present: Vec<&CellValue> = result.column_values(idx).filter(|v| !v.is_null()).collect();
        let numbers: Option<Vec<f64>> = present.iter().map(|v| v.as_f64()).collect();

        let stats = match numbers {
            Some(numbers) if !numbers.is_empty() => numeric_stats(numbers),
            _ => categorical_stats(&present),
        };
        description.insert(column.clone(), stats);
    }
    Value::Object(description)
}

fn numeric_stats(mut values: Vec<f64>) -> Value {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        Some(variance.sqrt())
    } else {
        None
    };

    json!({
        "count": n,
        "mean": mean,
        "std": std,
        "min": values[0],
        "25%": quantile(&values, 0.25),
        "50%": quantile(&values, 0.5),
        "75%": quantile(&values, 0.75),
        "max": values[n - 1],
    })
}

fn categorical_stats(values: &[&CellValue]) -> Value {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, value) in values.iter().enumerate() {
        let entry = counts.entry(value.to_string()).or_insert((0, position));
        entry.0 += 1;
    }

    // Most frequent; ties go to the value seen first
    let top = counts
        .iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then_with(|| b.1 .1.cmp(&a.1 .1)))
        .map(|(value, (freq, _))| (value.clone(), *freq));

    json!({
        "count": values.len(),
        "unique": counts.len(),
        "top": top.as_ref().map(|(value, _)| value.clone()),
        "freq": top.map(|(_, freq)| freq),
    })
}

/// Linear interpolation between closest ranks over sorted input.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
