use crate::{keyword_schema, parse_keywords, KeywordProvider, ProviderError};
use base64::{engine::general_purpose, Engine};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Limit for readiness probes and chat requests.
    pub timeout: Duration,
    /// Limit for a model download; `None` waits as long as the pull runs.
    pub pull_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    cfg: Arc<OllamaConfig>,
}

impl OllamaProvider {
    pub fn new(mut cfg: OllamaConfig) -> Result<Self, ProviderError> {
        cfg.base_url = cfg.base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Option<Duration>,
    ) -> RequestBuilder {
        let builder = self
            .client
            .post(format!("{}{}", self.cfg.base_url, path))
            .json(body);
        match timeout {
            Some(limit) => builder.timeout(limit),
            None => builder,
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ProviderError> {
        send(self.request(path, body, Some(self.cfg.timeout))).await
    }

    fn pull_request(&self) -> RequestBuilder {
        self.request(
            "/api/pull",
            &PullRequest {
                model: &self.cfg.model,
                stream: false,
            },
            self.cfg.pull_timeout,
        )
    }

    async fn pull_model(&self) -> Result<(), ProviderError> {
        #[derive(Deserialize)]
        struct PullResponse {
            status: String,
        }

        info!(endpoint = %self.cfg.base_url, model = %self.cfg.model, "pulling model");
        let resp = send(self.pull_request()).await?;
        let resp = error_for_status(resp).await?;
        let parsed: PullResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        if parsed.status != "success" {
            return Err(ProviderError::NotReady(format!(
                "pull of {} ended with status {}",
                self.cfg.model, parsed.status
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

async fn send(builder: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    builder
        .send()
        .await
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    format: serde_json::Value,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: String,
}

fn chat_request<'a>(model: &'a str, prompt: &'a str, jpeg: &[u8]) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: prompt,
            images: vec![general_purpose::STANDARD.encode(jpeg)],
        }],
        format: keyword_schema(),
        stream: false,
    }
}

#[async_trait::async_trait]
impl KeywordProvider for OllamaProvider {
    fn address(&self) -> &str {
        &self.cfg.base_url
    }

    async fn ensure_ready(&self) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct ShowRequest<'a> {
            model: &'a str,
        }

        let resp = self
            .post(
                "/api/show",
                &ShowRequest {
                    model: &self.cfg.model,
                },
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(endpoint = %self.cfg.base_url, model = %self.cfg.model, "model missing");
            return self.pull_model().await;
        }
        error_for_status(resp).await?;
        Ok(())
    }

    async fn keywords(&self, prompt: &str, jpeg: &[u8]) -> Result<Vec<String>, ProviderError> {
        let body = chat_request(&self.cfg.model, prompt, jpeg);
        let resp = self.post("/api/chat", &body).await?;
        let resp = error_for_status(resp).await?;
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        parse_keywords(&parsed.message.content)
    }
}
