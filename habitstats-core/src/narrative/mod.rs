//! LLM narration of habit reports.
//!
//! A [`NarrativeClient`] turns a system prompt and a user prompt into text.
//! [`narrate_report`] builds the prompts from a JSON report payload, skips
//! the call when an identical prompt was already narrated, and stores the
//! result in `ai_insights`.

use crate::config::{LlmConfig, LlmProvider};
use crate::types::{local_now, Insight};
use crate::{Database, Error, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Insight kind used for narrated habit reports.
pub const HABIT_REPORT_KIND: &str = "habit_report";

const SYSTEM_PROMPT: &str = "You are a personal productivity analyst. You receive statistics about a user's habits: streaks, completion rates and check-in counts. Write a short daily insight report in Markdown, addressed to the user in the second person. Cover: an overview of the key numbers, which habits are going well, which need attention, and two or three concrete suggestions. Keep the tone friendly and encouraging. Do not invent numbers that are not in the data.";

/// Failure of one narration request
#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Text-generation interface used for narration.
pub trait NarrativeClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> std::result::Result<String, NarrativeError>;
}

/// Create the default HTTP-backed narration client.
pub fn create_narrative_client(llm: &LlmConfig) -> Result<Box<dyn NarrativeClient>> {
    Ok(Box::new(HttpNarrativeClient::new(llm)?))
}

/// Result of [`narrate_report`]
#[derive(Debug, Clone)]
pub struct Narration {
    pub insight: Insight,
    /// False when the stored insight was reused
    pub generated: bool,
}

/// Build the user prompt for a report payload.
pub fn build_prompt(user_id: &str, date: NaiveDate, payload: &serde_json::Value) -> Result<String> {
    let data = serde_json::to_string_pretty(payload)?;
    Ok(format!(
        "Habit statistics for user {} on {}.\nAnalyze this data and write the daily insight report.\n\nData:\n```json\n{}\n```",
        user_id,
        date.format("%Y-%m-%d"),
        data
    ))
}

/// Hex SHA-256 of the full prompt pair.
pub fn prompt_hash(system: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update(b"\n\n");
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Narrate a report for one user and day, persisting it to `ai_insights`.
///
/// When an insight for the same day already exists with the same prompt
/// hash it is returned unchanged, unless `force` is set.
pub fn narrate_report(
    db: &Database,
    user_id: &str,
    date: NaiveDate,
    payload: &serde_json::Value,
    llm: &LlmConfig,
    client: &dyn NarrativeClient,
    force: bool,
) -> Result<Narration> {
    let prompt = build_prompt(user_id, date, payload)?;
    let hash = prompt_hash(SYSTEM_PROMPT, &prompt);

    let existing = db.get_insight(user_id, HABIT_REPORT_KIND, date)?;
    if let Some(insight) = &existing {
        if !force && insight.prompt_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!(user_id, %date, "Narration unchanged, reusing stored insight");
            return Ok(Narration {
                insight: insight.clone(),
                generated: false,
            });
        }
    }

    tracing::info!(user_id, %date, model = %llm.model, "Requesting narration");
    let content = client
        .complete(SYSTEM_PROMPT, &prompt)
        .map_err(|e| {
            tracing::warn!(user_id, error = %e, "Narration failed");
            Error::Narrative(e)
        })?
        .trim()
        .to_string();

    let now = local_now();
    let insight = Insight {
        user_id: user_id.to_string(),
        kind: HABIT_REPORT_KIND.to_string(),
        period_start: date,
        title: format!("Habit report for {}", date.format("%Y-%m-%d")),
        content,
        model: Some(llm.model.clone()),
        prompt_hash: Some(hash),
        created_at: existing.map_or(now, |i| i.created_at),
        updated_at: now,
    };
    db.upsert_insight(&insight)?;

    Ok(Narration {
        insight,
        generated: true,
    })
}

/// Blocking HTTP client for Ollama, Anthropic and OpenAI-compatible APIs.
pub struct HttpNarrativeClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpNarrativeClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| NarrativeError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint: config.endpoint(),
            api_key: config.resolved_api_key(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            runtime,
            http,
        })
    }

    fn headers(&self) -> std::result::Result<HeaderMap, NarrativeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = self.api_key.as_deref().unwrap_or_default();
        match self.provider {
            LlmProvider::Ollama => {}
            LlmProvider::Claude => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key)
                        .map_err(|e| NarrativeError::BadRequest(format!("invalid api key header: {e}")))?,
                );
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {key}"))
                        .map_err(|e| NarrativeError::BadRequest(format!("invalid auth header: {e}")))?,
                );
            }
        }
        Ok(headers)
    }

    fn request(&self, system: &str, prompt: &str) -> (String, serde_json::Value) {
        match self.provider {
            LlmProvider::Ollama => (
                format!("{}/api/generate", self.endpoint),
                json!({
                    "model": self.model,
                    "system": system,
                    "prompt": prompt,
                    "stream": false,
                    "options": { "temperature": self.temperature, "num_predict": self.max_tokens },
                }),
            ),
            LlmProvider::Claude => (
                format!("{}/v1/messages", self.endpoint),
                json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "temperature": self.temperature,
                    "system": system,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            ),
            LlmProvider::OpenAI => (
                format!("{}/v1/chat/completions", self.endpoint),
                json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "temperature": self.temperature,
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": prompt }
                    ]
                }),
            ),
        }
    }
}

impl NarrativeClient for HttpNarrativeClient {
    fn complete(&self, system: &str, prompt: &str) -> std::result::Result<String, NarrativeError> {
        let (url, body) = self.request(system, prompt);
        let headers = self.headers()?;
        let provider = self.provider;

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(classify_transport_error)?;
            let status = resp.status();
            let text = resp.text().await.map_err(classify_transport_error)?;

            check_status(status, &text)?;
            extract_text(provider, &text)
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> NarrativeError {
    if e.is_timeout() {
        NarrativeError::Timeout(e.to_string())
    } else {
        NarrativeError::Request(e.to_string())
    }
}

fn check_status(status: StatusCode, body: &str) -> std::result::Result<(), NarrativeError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = format!("{}: {}", status.as_u16(), body);
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => NarrativeError::RateLimited(detail),
        StatusCode::BAD_REQUEST => NarrativeError::BadRequest(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => NarrativeError::Timeout(detail),
        _ => NarrativeError::Request(detail),
    })
}

/// Pull the generated text out of a provider response body.
fn extract_text(provider: LlmProvider, body: &str) -> std::result::Result<String, NarrativeError> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| NarrativeError::InvalidResponse(format!("body is not JSON: {e}")))?;

    let text = match provider {
        LlmProvider::Ollama => json.get("response").and_then(|v| v.as_str()),
        LlmProvider::Claude => json
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str()),
        LlmProvider::OpenAI => json
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str()),
    };

    text.map(ToString::to_string).ok_or_else(|| {
        NarrativeError::InvalidResponse(format!("no generated text in {:?} response", provider))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClient {
        response: std::result::Result<String, ()>,
        calls: AtomicUsize,
    }

    impl MockClient {
        fn ok(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn rate_limited() -> Self {
            Self {
                response: Err(()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl NarrativeClient for MockClient {
        fn complete(&self, _system: &str, _prompt: &str) -> std::result::Result<String, NarrativeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .clone()
                .map_err(|_| NarrativeError::RateLimited("429: slow down".to_string()))
        }
    }

    fn llm() -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::Ollama,
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
            max_tokens: 1500,
            temperature: 0.5,
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_narration_is_stored() {
        let db = test_db();
        let client = MockClient::ok("  You kept your streak going!  ");
        let payload = json!({ "total_habits": 2 });

        let narration = narrate_report(&db, "u1", day(), &payload, &llm(), &client, false).unwrap();
        assert!(narration.generated);
        assert_eq!(narration.insight.content, "You kept your streak going!");

        let stored = db.get_insight("u1", HABIT_REPORT_KIND, day()).unwrap().unwrap();
        assert_eq!(stored.content, "You kept your streak going!");
        assert_eq!(stored.model.as_deref(), Some("llama3.2"));
    }

    #[test]
    fn test_unchanged_prompt_skips_client() {
        let db = test_db();
        let client = MockClient::ok("report");
        let payload = json!({ "total_habits": 2 });

        narrate_report(&db, "u1", day(), &payload, &llm(), &client, false).unwrap();
        let again = narrate_report(&db, "u1", day(), &payload, &llm(), &client, false).unwrap();
        assert!(!again.generated);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // Changed data or force both call the client again
        let changed = json!({ "total_habits": 3 });
        narrate_report(&db, "u1", day(), &changed, &llm(), &client, false).unwrap();
        narrate_report(&db, "u1", day(), &changed, &llm(), &client, true).unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_client_failure_is_typed_and_stores_nothing() {
        let db = test_db();
        let client = MockClient::rate_limited();
        let err = narrate_report(&db, "u1", day(), &json!({}), &llm(), &client, false).unwrap_err();
        assert!(matches!(
            err,
            Error::Narrative(NarrativeError::RateLimited(_))
        ));
        assert!(db.get_insight("u1", HABIT_REPORT_KIND, day()).unwrap().is_none());
    }

    #[test]
    fn test_prompt_embeds_payload() {
        let prompt = build_prompt("u1", day(), &json!({ "max_streak": 9 })).unwrap();
        assert!(prompt.contains("2026-10-16"));
        assert!(prompt.contains("\"max_streak\": 9"));
        assert_eq!(prompt_hash(SYSTEM_PROMPT, &prompt).len(), 64);
    }

    #[test]
    fn test_status_classification() {
        assert!(check_status(StatusCode::OK, "").is_ok());
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS, "slow"),
            Err(NarrativeError::RateLimited(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_REQUEST, "bad"),
            Err(NarrativeError::BadRequest(_))
        ));
        assert!(matches!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            Err(NarrativeError::Request(_))
        ));
    }

    #[test]
    fn test_extract_text_per_provider() {
        assert_eq!(
            extract_text(LlmProvider::Ollama, r#"{"response":"hi"}"#).unwrap(),
            "hi"
        );
        assert_eq!(
            extract_text(LlmProvider::Claude, r#"{"content":[{"text":"hi"}]}"#).unwrap(),
            "hi"
        );
        assert_eq!(
            extract_text(
                LlmProvider::OpenAI,
                r#"{"choices":[{"message":{"content":"hi"}}]}"#
            )
            .unwrap(),
            "hi"
        );
        assert!(matches!(
            extract_text(LlmProvider::OpenAI, r#"{"choices":[]}"#),
            Err(NarrativeError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_text(LlmProvider::Ollama, "not json"),
            Err(NarrativeError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_hosted_provider_without_key_fails_construction() {
        let config = LlmConfig {
            provider: LlmProvider::Claude,
            api_key: None,
            ..llm()
        };
        // Only meaningful when the env fallback is unset
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            assert!(matches!(
                HttpNarrativeClient::new(&config),
                Err(Error::Config(_))
            ));
        }
    }
}
