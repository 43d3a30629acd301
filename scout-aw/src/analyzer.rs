//! Analyzer client
//!
//! Calls the Anthropic Messages API with a constant system preamble (marked
//! cacheable at the provider layer so repeated calls hit the prompt cache)
//! and the assembled project context as the user message.
//!
//! The model is asked for JSON but never trusted to produce it: extraction
//! prefers a fenced ```json block, falls back to the first JSON value in
//! the text, and a completely unparseable response yields a fallback result
//! flagged for manual review rather than an error. Transport failures are
//! classified for the rate-limited executor.

use crate::context::ProjectContext;
use crate::limiter::{RetryClass, RetryClassify};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Identical across calls for as long as the process lives; the provider's
/// prompt cache keys on it. Correctness does not depend on caching.
const SYSTEM_PREAMBLE: &str = "You are a software project analyst. You receive the assembled \
context of one software project: its README, package manifest and a selection of source files. \
Analyze the project and respond with a single JSON object containing exactly these fields:\n\
- \"summary\": a concise prose summary of what the project does and how it is built\n\
- \"techStack\": an object grouping detected technologies by category, e.g. {\"frontend\": [...], \
\"backend\": [...], \"database\": [...], \"tooling\": [...]}\n\
- \"complexity\": one of \"simple\", \"moderate\", \"complex\", \"very-complex\"\n\
- \"recommendations\": an array of {\"kind\", \"priority\", \"description\"} objects\n\
- \"completionScore\": an integer 0-100 estimating how complete the project is\n\
- \"maturityLevel\": one of \"poc\", \"mvp\", \"beta\", \"production\", \"mature\"\n\
- \"productionGaps\": an array of strings naming what blocks production use\n\
- \"estimatedValue\": {\"amount\": number, \"currency\": string, \"confidence\": \
\"low\"|\"medium\"|\"high\"}\n\
Respond with the JSON object only, inside a ```json code fence.";

/// Analyzer failure, classified for retry
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("rate_limit: provider returned 429{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    #[error("overloaded: provider returned 529")]
    Overloaded,

    #[error("analysis cancelled")]
    Cancelled,

    #[error("{label} timed out after {ms} ms")]
    Timeout { label: String, ms: u64 },

    #[error("provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

fn retry_after_suffix(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(" (retry after {secs}s)"),
        None => String::new(),
    }
}

/// Message-content heuristics for errors that carry no useful status
fn message_is_retryable(message: &str) -> bool {
    let lowered = message.to_lowercase();
    ["rate_limit", "overloaded", "aborted", "timed out"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl RetryClassify for AnalyzerError {
    fn retry_class(&self) -> RetryClass {
        match self {
            AnalyzerError::RateLimited { .. } | AnalyzerError::Overloaded => RetryClass::RateLimit,
            AnalyzerError::Timeout { .. } => RetryClass::Transient,
            AnalyzerError::Cancelled => RetryClass::Fatal,
            AnalyzerError::Api { message, .. } | AnalyzerError::Network(message) => {
                if message_is_retryable(message) {
                    RetryClass::Transient
                } else {
                    RetryClass::Fatal
                }
            }
            AnalyzerError::Auth(_) => RetryClass::Fatal,
        }
    }
}

/// Complexity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl Complexity {
    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(|v| v.as_str()) {
            Some("simple") => Complexity::Simple,
            Some("complex") => Complexity::Complex,
            Some("very-complex") => Complexity::VeryComplex,
            _ => Complexity::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::VeryComplex => "very-complex",
        }
    }
}

/// Maturity bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityLevel {
    Poc,
    Mvp,
    Beta,
    Production,
    Mature,
}

impl MaturityLevel {
    fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(|v| v.as_str()) {
            Some("mvp") => MaturityLevel::Mvp,
            Some("beta") => MaturityLevel::Beta,
            Some("production") => MaturityLevel::Production,
            Some("mature") => MaturityLevel::Mature,
            _ => MaturityLevel::Poc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaturityLevel::Poc => "poc",
            MaturityLevel::Mvp => "mvp",
            MaturityLevel::Beta => "beta",
            MaturityLevel::Production => "production",
            MaturityLevel::Mature => "mature",
        }
    }
}

/// Structured result of one analysis. The `techStack`, `recommendations`,
/// `productionGaps` and `estimatedValue` blobs stay opaque: their shape is
/// owned by the prompt, and consumers parse them defensively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    pub tech_stack: Value,
    pub complexity: Complexity,
    pub recommendations: Value,
    pub completion_score: u8,
    pub maturity_level: MaturityLevel,
    pub production_gaps: Value,
    pub estimated_value: Value,
    pub model: String,
    pub tokens_used: u64,
    pub cache_hit: bool,
}

fn default_estimated_value() -> Value {
    json!({ "amount": 0, "currency": "USD", "confidence": "low" })
}

/// Build a result from whatever JSON the model produced; every missing or
/// malformed field takes its documented default.
fn result_from_value(value: &Value, model: &str, tokens_used: u64) -> AnalysisResult {
    let completion_score = value
        .get("completionScore")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .clamp(0, 100) as u8;

    AnalysisResult {
        summary: value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("No summary provided")
            .to_string(),
        tech_stack: value.get("techStack").cloned().unwrap_or_else(|| json!({})),
        complexity: Complexity::from_value(value.get("complexity")),
        recommendations: value
            .get("recommendations")
            .filter(|v| v.is_array())
            .cloned()
            .unwrap_or_else(|| json!([])),
        completion_score,
        maturity_level: MaturityLevel::from_value(value.get("maturityLevel")),
        production_gaps: value
            .get("productionGaps")
            .filter(|v| v.is_array())
            .cloned()
            .unwrap_or_else(|| json!([])),
        estimated_value: value
            .get("estimatedValue")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(default_estimated_value),
        model: model.to_string(),
        tokens_used,
        cache_hit: false,
    }
}

/// Result used when the response contained no parseable JSON at all
fn fallback_result(model: &str, tokens_used: u64) -> AnalysisResult {
    AnalysisResult {
        summary: "Automated analysis produced an unparseable response; manual review required"
            .to_string(),
        tech_stack: json!({}),
        complexity: Complexity::Moderate,
        recommendations: json!([{
            "kind": "tooling",
            "priority": "high",
            "description": "Analyzer output could not be parsed; review this project manually",
        }]),
        completion_score: 0,
        maturity_level: MaturityLevel::Poc,
        production_gaps: json!([]),
        estimated_value: default_estimated_value(),
        model: model.to_string(),
        tokens_used,
        cache_hit: false,
    }
}

/// Extract a ```json fenced block
fn extract_fenced_json(content: &str) -> Option<&str> {
    let start = content.find("```json")? + "```json".len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Extract the first valid JSON object in the text
fn extract_first_json_object(content: &str) -> Option<String> {
    for (idx, ch) in content.char_indices() {
        if ch == '{' {
            let candidate = &content[idx..];
            let mut stream =
                serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
            if let Some(Ok(_)) = stream.next() {
                let end = stream.byte_offset();
                if end > 0 && end <= candidate.len() {
                    return Some(candidate[..end].to_string());
                }
            }
        }
    }
    None
}

/// Parse the model's text into a result. Never fails: parse trouble yields
/// the fallback result.
pub fn parse_analysis(content: &str, model: &str, tokens_used: u64) -> AnalysisResult {
    if let Some(fenced) = extract_fenced_json(content) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return result_from_value(&value, model, tokens_used);
        }
    }
    if let Some(candidate) = extract_first_json_object(content) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return result_from_value(&value, model, tokens_used);
        }
    }
    warn!("Analyzer response contained no parseable JSON; using fallback result");
    fallback_result(model, tokens_used)
}

/// The external analyzer boundary. Production uses [`ClaudeAnalyzer`];
/// tests stub it.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        context: &ProjectContext,
        project_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalyzerError>;

    fn model(&self) -> &str;
}

/// Anthropic Messages API client
pub struct ClaudeAnalyzer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    base_url: String,
}

impl ClaudeAnalyzer {
    pub fn new(
        api_key: String,
        model: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, AnalyzerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model,
            max_tokens,
            temperature,
            base_url: API_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (tests)
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn request(&self, prompt: &str) -> Result<(String, u64), AnalyzerError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": [{
                "type": "text",
                "text": SYSTEM_PREAMBLE,
                "cache_control": { "type": "ephemeral" },
            }],
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": prompt }],
            }],
        });

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(AnalyzerError::RateLimited { retry_after });
            }
            529 => return Err(AnalyzerError::Overloaded),
            401 | 403 => {
                let message = response.text().await.unwrap_or_default();
                return Err(AnalyzerError::Auth(message));
            }
            _ if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                return Err(AnalyzerError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            _ => {}
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AnalyzerError::Network(e.to_string()))?;

        let text = payload
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let usage = payload.get("usage");
        let tokens_used = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + usage
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0);

        Ok((text, tokens_used))
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        context: &ProjectContext,
        project_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalyzerError> {
        let prompt = context.to_prompt();
        debug!(
            project_id = %project_id,
            prompt_tokens = context.summary.estimated_tokens,
            "Invoking analyzer"
        );

        // Cancellation aborts the in-flight transport call
        let (text, tokens_used) = tokio::select! {
            () = cancel.cancelled() => return Err(AnalyzerError::Cancelled),
            result = self.request(&prompt) => result?,
        };

        Ok(parse_analysis(&text, &self.model, tokens_used))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let content = "Here is my analysis:\n```json\n{\"summary\": \"A CLI tool\", \
                       \"complexity\": \"simple\", \"completionScore\": 80, \
                       \"maturityLevel\": \"beta\"}\n```\nHope that helps!";
        let result = parse_analysis(content, "test-model", 100);
        assert_eq!(result.summary, "A CLI tool");
        assert_eq!(result.complexity, Complexity::Simple);
        assert_eq!(result.completion_score, 80);
        assert_eq!(result.maturity_level, MaturityLevel::Beta);
        assert_eq!(result.model, "test-model");
        assert!(!result.cache_hit);
    }

    #[test]
    fn test_parse_bare_json_object() {
        let content = "The verdict: {\"summary\": \"bare\", \"completionScore\": 55} — done.";
        let result = parse_analysis(content, "m", 0);
        assert_eq!(result.summary, "bare");
        assert_eq!(result.completion_score, 55);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let result = parse_analysis("```json\n{}\n```", "m", 0);
        assert_eq!(result.tech_stack, json!({}));
        assert_eq!(result.complexity, Complexity::Moderate);
        assert_eq!(result.completion_score, 0);
        assert_eq!(result.maturity_level, MaturityLevel::Poc);
        assert_eq!(result.production_gaps, json!([]));
        assert_eq!(
            result.estimated_value.get("confidence").unwrap(),
            &json!("low")
        );
    }

    #[test]
    fn test_completion_score_clamped() {
        let result = parse_analysis("```json\n{\"completionScore\": 250}\n```", "m", 0);
        assert_eq!(result.completion_score, 100);
        let result = parse_analysis("```json\n{\"completionScore\": -3}\n```", "m", 0);
        assert_eq!(result.completion_score, 0);
    }

    #[test]
    fn test_unparseable_yields_fallback_not_error() {
        let result = parse_analysis("I refuse to answer in JSON.", "m", 12);
        assert!(result.summary.contains("manual review"));
        let recommendation = &result.recommendations[0];
        assert_eq!(recommendation.get("kind").unwrap(), &json!("tooling"));
        assert_eq!(recommendation.get("priority").unwrap(), &json!("high"));
        assert_eq!(result.tokens_used, 12);
    }

    #[test]
    fn test_retry_classification() {
        assert_eq!(
            AnalyzerError::RateLimited { retry_after: None }.retry_class(),
            RetryClass::RateLimit
        );
        assert_eq!(AnalyzerError::Overloaded.retry_class(), RetryClass::RateLimit);
        assert_eq!(
            AnalyzerError::Timeout {
                label: "analysis".to_string(),
                ms: 180_000
            }
            .retry_class(),
            RetryClass::Transient
        );
        assert_eq!(AnalyzerError::Cancelled.retry_class(), RetryClass::Fatal);
        assert_eq!(
            AnalyzerError::Network("connection timed out".to_string()).retry_class(),
            RetryClass::Transient
        );
        assert_eq!(
            AnalyzerError::Network("dns failure".to_string()).retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            AnalyzerError::Api {
                status: 500,
                message: "request aborted".to_string()
            }
            .retry_class(),
            RetryClass::Transient
        );
        assert_eq!(
            AnalyzerError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .retry_class(),
            RetryClass::Fatal
        );
    }

    #[test]
    fn test_result_round_trips_through_serde() {
        let result = parse_analysis(
            "```json\n{\"summary\": \"x\", \"complexity\": \"very-complex\"}\n```",
            "m",
            7,
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"complexity\":\"very-complex\""));
        assert!(json.contains("\"techStack\""));
        let back: AnalysisResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
