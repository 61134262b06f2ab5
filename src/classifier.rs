//! Gemini-powered content classification.
//!
//! Sends the newest message plus short conversational context to Gemini
//! and parses the verdict. The call sits on the hot path of message
//! handling, so it is rate limited and wrapped in a bounded retry that
//! degrades to no-violation rather than blocking ingestion.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};

use crate::error::{MagistrateError, Result};

/// Gemini 2.0 Flash API endpoint.
const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Default number of attempts before degrading to no-violation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff between attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 250;

/// Rate limiter type alias.
type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Verdict returned by the classifier.
///
/// When `violation_detected` is false the remaining fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierVerdict {
    pub violation_detected: bool,
    /// Warning level name; must match a configured level (case-insensitive).
    #[serde(default, rename = "level")]
    pub level_name: Option<String>,
    #[serde(default, rename = "reason")]
    pub explanation: String,
    /// The specific rule the classifier believes was broken.
    #[serde(default)]
    pub rule: Option<String>,
}

impl ClassifierVerdict {
    /// A verdict that flags nothing.
    pub fn clean() -> Self {
        Self {
            violation_detected: false,
            level_name: None,
            explanation: String::new(),
            rule: None,
        }
    }
}

/// Outcome of a bounded-retry classification.
///
/// An explicit result type rather than exceptions-as-control-flow: the
/// caller sees either a verdict or an exhausted retry budget.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    Verdict(ClassifierVerdict),
    Unavailable { attempts: u32 },
}

/// Gemini classifier for semantic content moderation.
pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    max_attempts: u32,
    backoff_ms: u64,
}

impl GeminiClassifier {
    /// Create a new classifier with the given API key.
    ///
    /// Rate limited to 60 requests per minute by default.
    pub fn new(api_key: String) -> Self {
        Self::with_rate_limit(api_key, 60)
    }

    /// Create a new classifier with a custom rate limit.
    pub fn with_rate_limit(api_key: String, requests_per_minute: u32) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(GovRateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GEMINI_API_URL.to_string(),
            rate_limiter,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }

    /// Override the retry budget.
    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_ms = backoff_ms;
        self
    }

    /// Override the API endpoint (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Classify a message, retrying transient failures a bounded number of
    /// times. Exhaustion is an explicit outcome, never an error: the
    /// pipeline treats it as no-violation so ingestion is never blocked.
    pub async fn classify_with_retry(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> ClassifyOutcome {
        for attempt in 1..=self.max_attempts {
            match self.classify(system_prompt, user_prompt).await {
                Ok(verdict) => return ClassifyOutcome::Verdict(verdict),
                Err(MagistrateError::RateLimited { retry_after_ms }) => {
                    tracing::warn!(
                        attempt = attempt,
                        retry_after_ms = retry_after_ms,
                        "Classifier rate limited"
                    );
                    if attempt < self.max_attempts {
                        // Cap the wait: availability beats exactness here
                        tokio::time::sleep(Duration::from_millis(retry_after_ms.min(5_000))).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "Classifier attempt failed");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(Duration::from_millis(
                            self.backoff_ms * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        ClassifyOutcome::Unavailable {
            attempts: self.max_attempts,
        }
    }

    /// Single classification attempt.
    pub async fn classify(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ClassifierVerdict> {
        // Wait for rate limiter
        self.rate_limiter.until_ready().await;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: user_prompt.to_string(),
                }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system_prompt.to_string(),
                }],
            }),
        };

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let response = self.client.post(&url).json(&request).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(MagistrateError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MagistrateError::ClassifierApi(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        parse_verdict(&gemini_response)
    }
}

/// Parse the model output into a verdict.
fn parse_verdict(response: &GeminiResponse) -> Result<ClassifierVerdict> {
    let text = response
        .candidates
        .first()
        .and_then(|c| c.content.parts.first())
        .map(|p| p.text.as_str())
        .unwrap_or("{}");

    let json_text = extract_json(text);

    serde_json::from_str(json_text)
        .map_err(|e| MagistrateError::ClassifierApi(format!("Failed to parse verdict: {}", e)))
}

/// Extract JSON from text that may be wrapped in markdown code blocks.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    text
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

/// Request to the Gemini API.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

/// Response from the Gemini API.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiPart>,
}

#[cfg(test)]
mod tests {
    use crate::classifier::{
        extract_json, ClassifierVerdict, ClassifyOutcome, GeminiClassifier,
    };

    #[test]
    fn extract_json_plain() {
        let text = r#"{"violation_detected": false}"#;
        assert_eq!(extract_json(text), text);
    }

    #[test]
    fn extract_json_code_block() {
        let text = r#"```json
{"violation_detected": false}
```"#;
        assert_eq!(extract_json(text), r#"{"violation_detected": false}"#);
    }

    #[test]
    fn extract_json_plain_code_block() {
        let text = r#"```
{"violation_detected": false}
```"#;
        assert_eq!(extract_json(text), r#"{"violation_detected": false}"#);
    }

    #[test]
    fn verdict_deserialize_violation() {
        let json = r#"{"violation_detected": true, "level": "orange", "reason": "Personal attack", "rule": "No insults"}"#;
        let verdict: ClassifierVerdict = serde_json::from_str(json).unwrap();

        assert!(verdict.violation_detected);
        assert_eq!(verdict.level_name.as_deref(), Some("orange"));
        assert_eq!(verdict.explanation, "Personal attack");
        assert_eq!(verdict.rule.as_deref(), Some("No insults"));
    }

    #[test]
    fn verdict_deserialize_clean_omits_fields() {
        let json = r#"{"violation_detected": false}"#;
        let verdict: ClassifierVerdict = serde_json::from_str(json).unwrap();

        assert!(!verdict.violation_detected);
        assert!(verdict.level_name.is_none());
        assert!(verdict.explanation.is_empty());
        assert!(verdict.rule.is_none());
    }

    #[test]
    fn verdict_serialize_roundtrip() {
        let original = ClassifierVerdict {
            violation_detected: true,
            level_name: Some("red".to_string()),
            explanation: "threat".to_string(),
            rule: None,
        };

        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClassifierVerdict = serde_json::from_str(&json).unwrap();

        assert_eq!(original, parsed);
    }

    #[test]
    fn clean_verdict_flags_nothing() {
        let verdict = ClassifierVerdict::clean();
        assert!(!verdict.violation_detected);
        assert!(verdict.level_name.is_none());
    }

    #[tokio::test]
    async fn retry_exhaustion_is_explicit_outcome() {
        // Unroutable endpoint: every attempt fails fast
        let classifier = GeminiClassifier::new("test-key".to_string())
            .with_base_url("http://127.0.0.1:9/classify")
            .with_retry(2, 1);

        let outcome = classifier.classify_with_retry("system", "user").await;
        assert_eq!(outcome, ClassifyOutcome::Unavailable { attempts: 2 });
    }
}
