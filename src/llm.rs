//! Language-model boundary
//!
//! The pipeline only ever sees the [`LanguageModel`] trait: a list of chat
//! messages goes in, completion text comes out. [`LlmClient`] implements it
//! against any OpenAI-compatible `/chat/completions` endpoint.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref REASONING_BLOCK: Regex = Regex::new(r"(?s)<think>.*?</think>").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            messages,
            temperature,
        }
    }
}

/// Anything that can turn a chat request into completion text.
///
/// Implementations may fail for any reason (rate limits, timeouts, filtered
/// content); callers decide whether that is fatal.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Remove `<think>...</think>` reasoning segments some models emit before
/// their answer.
pub fn strip_reasoning(text: &str) -> String {
    REASONING_BLOCK.replace_all(text, "").to_string()
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AssistantError::ModelInvocation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        // Reasoning models spend tokens before answering
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(4000);
        } else {
            body["max_tokens"] = serde_json::json!(2000);
        }
        body
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = self.request_body(request);
        debug!("LLM request to {} with {} messages", self.model, request.messages.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AssistantError::ModelInvocation(format!("LLM API call timed out: {}", e))
                } else {
                    AssistantError::ModelInvocation(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::ModelInvocation(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::ModelInvocation(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

/// Pull the first choice's message content out of a chat-completions body.
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(AssistantError::ModelInvocation(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| AssistantError::ModelInvocation("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| AssistantError::ModelInvocation("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(AssistantError::ModelInvocation(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| AssistantError::ModelInvocation("No content in LLM response".to_string()))?;

    if content.trim().is_empty() {
        return Err(AssistantError::ModelInvocation("Empty content in LLM response".to_string()));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_reasoning_multiline() {
        let raw = "<think>\nthe user wants\ncounts\n</think>SELECT * FROM Orders";
        assert_eq!(strip_reasoning(raw), "SELECT * FROM Orders");
    }

    #[test]
    fn test_strip_reasoning_multiple_blocks_non_greedy() {
        let raw = "<think>a</think>keep<think>b</think> this";
        assert_eq!(strip_reasoning(raw), "keep this");
    }

    #[test]
    fn test_extract_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "SELECT 1"}, "finish_reason": "stop"}]
        });
        assert_eq!(extract_content(&body).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_content_errors() {
        let filtered = serde_json::json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]
        });
        assert!(matches!(extract_content(&filtered), Err(AssistantError::ModelInvocation(_))));

        let api_error = serde_json::json!({"error": {"message": "rate limited"}});
        assert!(extract_content(&api_error).is_err());

        let empty = serde_json::json!({"choices": []});
        assert!(extract_content(&empty).is_err());

        let blank = serde_json::json!({"choices": [{"message": {"content": "  "}}]});
        assert!(extract_content(&blank).is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let client = LlmClient::new(
            "sk".to_string(),
            "llama-3.1-8b-instant".to_string(),
            "https://api.groq.com/openai/v1/".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        let body = client.request_body(&ChatRequest::new(
            vec![ChatMessage::system("s"), ChatMessage::user("u")],
            0.0,
        ));
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(client.base_url, "https://api.groq.com/openai/v1");
    }
}
