//! Inference HTTP client

use crate::config::InferenceConfig;
use crate::history::{ChatMessage, ConversationHistory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest slice of an error body carried in an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Inference call errors
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The endpoint did not answer, timed out or returned a non-success status
    #[error("Inference endpoint {endpoint} unavailable: {reason}")]
    Unavailable {
        endpoint: String,
        status: Option<u16>,
        reason: String,
    },

    /// The endpoint answered, but not with a chat completion
    #[error("Unexpected response from inference endpoint {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    #[error("Failed to build inference client: {0}")]
    Client(String),
}

impl InferenceError {
    /// HTTP status returned by the endpoint, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::Unavailable { status, .. } => *status,
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Blocking-style (non-streaming) chat client
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::Client(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Chat endpoint URL
    pub fn endpoint(&self) -> String {
        self.config.chat_url()
    }

    /// Build the message sequence for one call
    ///
    /// Order: optional system prompt, the history as given, then the prompt
    /// as a user turn.
    pub fn build_messages(
        &self,
        prompt: &str,
        history: Option<&ConversationHistory>,
    ) -> Vec<ChatMessage> {
        let history_len = history.map_or(0, |h| h.len());
        let mut messages = Vec::with_capacity(history_len + 2);

        if let Some(system) = &self.config.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        if let Some(history) = history {
            messages.extend(history.messages().iter().cloned());
        }
        messages.push(ChatMessage::user(prompt));

        messages
    }

    /// Send the prompt (after any history) and return the generated text
    ///
    /// Waits for the full, non-streamed response. Failures are returned as
    /// is; nothing is retried.
    pub async fn complete(
        &self,
        prompt: &str,
        history: Option<&ConversationHistory>,
    ) -> Result<String, InferenceError> {
        let endpoint = self.endpoint();
        let messages = self.build_messages(prompt, history);
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            stream: false,
        };

        debug!(
            endpoint = %endpoint,
            model = %self.config.model,
            messages = messages.len(),
            "Sending chat request"
        );
        let started = Instant::now();

        let response = self
            .http
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| unavailable(&endpoint, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| unavailable(&endpoint, &e))?;

        if !status.is_success() {
            warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                "Inference request failed"
            );
            return Err(InferenceError::Unavailable {
                endpoint,
                status: Some(status.as_u16()),
                reason: format!("status {}: {}", status, snippet(&body)),
            });
        }

        let content = extract_content(&body).map_err(|reason| InferenceError::Protocol {
            endpoint: endpoint.clone(),
            reason,
        })?;

        debug!(
            endpoint = %endpoint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = content.len(),
            "Chat response received"
        );

        Ok(content)
    }

    /// Names of the models installed on the endpoint
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let endpoint = self.config.tags_url();

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| unavailable(&endpoint, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Unavailable {
                endpoint,
                status: Some(status.as_u16()),
                reason: format!("status {}", status),
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Protocol {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn unavailable(endpoint: &str, err: &reqwest::Error) -> InferenceError {
    let reason = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };

    InferenceError::Unavailable {
        endpoint: endpoint.to_string(),
        status: err.status().map(|s| s.as_u16()),
        reason,
    }
}

/// Pull `message.content` out of a chat response body
fn extract_content(body: &str) -> Result<String, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("body is not JSON: {}", e))?;

    match value.pointer("/message/content") {
        Some(Value::String(content)) => Ok(content.clone()),
        Some(_) => Err("'message.content' is not a string".to_string()),
        None => Err(format!(
            "missing 'message.content' in response: {}",
            snippet(body)
        )),
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}
