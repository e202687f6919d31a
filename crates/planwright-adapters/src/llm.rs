//! Content generation over an OpenAI-compatible chat-completions API.

use crate::config;
use anyhow::Context;
use async_trait::async_trait;
use planwright_core::util::truncate;
use planwright_core::{
    ChunkCallback, CollabResult, CollaboratorError, ContentGenerator, GenerationRequest,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000;
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2;
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

/// Extract a retry-after hint like "retry after 12 seconds" from an error body.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    (ms / 1000).max(1)
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

fn chat_request(request: &GenerationRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        messages.push(Message {
            role: "system".to_string(),
            content: system.to_string(),
        });
    }
    messages.push(Message {
        role: "user".to_string(),
        content: request.joined_prompt(),
    });
    ChatRequest {
        model: request.model.clone(),
        messages,
        stream: false,
    }
}

fn parse_response(text: &str) -> CollabResult<String> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        CollaboratorError::other(format!(
            "failed to parse model response: {} ({})",
            e,
            sanitize_api_response(text)
        ))
    })?;
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(CollaboratorError::other(
            "model response had no choices; the service may be temporarily unavailable",
        ));
    };
    if let Some(refusal) = choice.message.refusal {
        return Err(CollaboratorError::other(format!(
            "request was refused: {}",
            truncate(&refusal, 200)
        )));
    }
    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(CollaboratorError::other(
            "model returned an empty response; the service may be temporarily unavailable",
        ));
    }
    Ok(content)
}

fn map_request_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::other("model request timed out")
    } else if err.is_connect() {
        CollaboratorError::other("could not connect to the model API (network error)")
    } else {
        CollaboratorError::other(format!("model request failed: {}", err))
    }
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Client for `<api_base>/chat/completions`.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ChatCompletionsClient {
    pub fn new(api_base: &str, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Build from `PLANWRIGHT_API_KEY`/`OPENAI_API_KEY` and `PLANWRIGHT_API_BASE`.
    pub fn from_env() -> anyhow::Result<Self> {
        let key = config::api_key().context(
            "no API key configured; set PLANWRIGHT_API_KEY or OPENAI_API_KEY",
        )?;
        Self::new(&config::api_base(), key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn pause(retry_after: u64, cancel: &CancellationToken) -> CollabResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(retry_after)) => Ok(()),
        }
    }

    /// Send with automatic retry on network errors, rate limits, and 5xx responses.
    async fn send_with_retry(
        &self,
        body: &ChatRequest,
        cancel: &CancellationToken,
    ) -> CollabResult<String> {
        let mut retry_count = 0;

        loop {
            let sent = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;
            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        warn!(retry_count, error = %err, "model request failed, retrying");
                        Self::pause(backoff_secs(retry_count), cancel).await?;
                        continue;
                    }
                    return Err(map_request_error(err));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        Self::pause(backoff_secs(retry_count), cancel).await?;
                        continue;
                    }
                    return Err(map_request_error(err));
                }
            };

            if status.is_success() {
                return Ok(text);
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after =
                    parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                warn!(retry_count, retry_after, "rate limited by model API");
                Self::pause(retry_after, cancel).await?;
                continue;
            }

            if status.is_server_error() && retry_count < MAX_RETRIES {
                retry_count += 1;
                warn!(retry_count, status = status.as_u16(), "model API server error, retrying");
                Self::pause(backoff_secs(retry_count), cancel).await?;
                continue;
            }

            let detail = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| truncate(&body.error.message, MAX_ERROR_CONTENT_LEN))
                .unwrap_or_else(|_| sanitize_api_response(&text));
            let message = match status.as_u16() {
                401 | 403 => format!("invalid API key ({}): {}", status, detail),
                429 => format!(
                    "rate limited (429) after {} retries: {}",
                    retry_count, detail
                ),
                500..=599 => format!(
                    "model API server error ({}); the service may be temporarily unavailable",
                    status
                ),
                _ => format!("model API error {}: {}", status, detail),
            };
            return Err(CollaboratorError::other(message));
        }
    }
}

#[async_trait]
impl ContentGenerator for ChatCompletionsClient {
    async fn generate(
        &self,
        request: GenerationRequest,
        on_chunk: Option<ChunkCallback<'_>>,
        cancel: &CancellationToken,
    ) -> CollabResult<String> {
        let body = chat_request(&request);
        debug!(model = %body.model, messages = body.messages.len(), "sending chat request");

        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollaboratorError::Cancelled),
            result = self.send_with_retry(&body, cancel) => result?,
        };
        let content = parse_response(&text)?;
        if let Some(on_chunk) = on_chunk {
            on_chunk(&content);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_puts_system_first_and_joins_parts() {
        let request = GenerationRequest {
            prompt_parts: vec!["GOAL:\nadd a".into(), "FILE: a.ts".into()],
            model: "gpt-4o-mini".into(),
            system_instruction: Some("You write plans.".into()),
        };
        let json = serde_json::to_value(chat_request(&request)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "GOAL:\nadd a\n\nFILE: a.ts");

        let bare = GenerationRequest {
            system_instruction: Some("  ".into()),
            ..request
        };
        let json = serde_json::to_value(chat_request(&bare)).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn response_parsing_handles_refusal_and_empty_content() {
        let ok = r#"{"choices":[{"message":{"content":"hello"}}]}"#;
        assert_eq!(parse_response(ok).unwrap(), "hello");

        let refused = r#"{"choices":[{"message":{"content":null,"refusal":"no"}}]}"#;
        assert!(parse_response(refused)
            .unwrap_err()
            .to_string()
            .contains("refused"));

        let empty = r#"{"choices":[{"message":{"content":"  "}}]}"#;
        assert!(parse_response(empty)
            .unwrap_err()
            .to_string()
            .contains("temporarily unavailable"));
    }

    #[test]
    fn sanitizer_redacts_secrets_and_truncates() {
        assert_eq!(
            sanitize_api_response("bad key sk-abc123"),
            "(response details redacted - may contain sensitive data)"
        );
        let long = "x".repeat(500);
        assert_eq!(
            sanitize_api_response(&long).chars().count(),
            MAX_ERROR_CONTENT_LEN
        );
    }

    #[test]
    fn retry_hints_and_backoff() {
        assert_eq!(parse_retry_after("Please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("slow down"), None);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn endpoint_normalizes_trailing_slash() {
        let client = ChatCompletionsClient::new("http://localhost:8080/v1/", "k").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
