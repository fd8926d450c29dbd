//! Provider abstractions for keyword inference backends.

use thiserror::Error;

pub mod fixed;
pub mod ollama;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("status {status} body {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("model not ready: {0}")]
    NotReady(String),
}

/// A single inference backend instance that turns an image into keywords.
#[async_trait::async_trait]
pub trait KeywordProvider: Send + Sync {
    /// Network address the provider talks to, used for logging and status.
    fn address(&self) -> &str;

    /// Lightweight readiness call; succeeds once the backend can serve the model.
    async fn ensure_ready(&self) -> Result<(), ProviderError>;

    /// Sends the prompt and an encoded JPEG, returning the raw keyword list.
    async fn keywords(&self, prompt: &str, jpeg: &[u8]) -> Result<Vec<String>, ProviderError>;
}

/// JSON schema the backend must satisfy: `{"keywords": [string, ...]}`.
pub fn keyword_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "keywords": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["keywords"]
    })
}

/// Decodes the structured-output content string into a keyword list.
pub fn parse_keywords(content: &str) -> Result<Vec<String>, ProviderError> {
    #[derive(serde::Deserialize)]
    struct KeywordPayload {
        keywords: Vec<String>,
    }

    serde_json::from_str::<KeywordPayload>(content)
        .map(|p| p.keywords)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}
