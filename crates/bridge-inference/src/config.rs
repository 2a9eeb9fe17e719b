//! Inference client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default model requested from the endpoint
pub const DEFAULT_MODEL: &str = "llama3:70b";

/// Inference endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the endpoint, e.g. `http://127.0.0.1:12345`
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Optional system message sent ahead of every conversation
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Timeout for the whole request, response body included
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl InferenceConfig {
    /// Endpoint served on a local port (directly or through the tunnel)
    pub fn local(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            model: default_model(),
            system_prompt: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL of the chat endpoint
    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    /// URL listing the models installed on the endpoint
    pub fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url.trim_end_matches('/'))
    }
}
