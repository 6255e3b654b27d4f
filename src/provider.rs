//! Model Provider Abstraction
//!
//! The streaming text-generation collaborator. Crucible only needs one capability from a
//! provider: turn a list of chat messages plus sampling parameters into a stream of text
//! deltas. OpenAI-compatible endpoints (OpenAI, Ollama's `/v1`, local servers) share one
//! client; a scripted provider covers offline runs and tests.

use crate::error::{ApiError, GenerationError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub mod scripted;
pub mod sse;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_tokens: u32,
    #[serde(default)]
    pub min_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub min_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            min_tokens: 0,
            temperature: 1.0,
            top_p: Some(0.95),
            top_k: None,
            min_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop_sequences: None,
        }
    }
}

impl GenerationParams {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Streaming completion type: a sequence of text deltas
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Model provider client trait
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    /// Open a streaming completion
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<CompletionStream, GenerationError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Provider backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Ollama,
    Custom,
}

impl ProviderType {
    fn default_endpoint(self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAI => Some("https://api.openai.com/v1"),
            ProviderType::Ollama => Some("http://localhost:11434/v1"),
            ProviderType::Custom => None,
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: String,
    /// Inline API key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Base URL of an OpenAI-compatible API
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            api_key_env: None,
            endpoint: None,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Endpoint must be an http(s) URL: {}", endpoint));
            }
        }
        if self.provider_type == ProviderType::Custom && self.endpoint.is_none() {
            return Err("Custom providers require an endpoint".to_string());
        }
        if self.provider_type == ProviderType::OpenAI && self.resolve_api_key().is_none() {
            return Err("OpenAI provider requires api_key or api_key_env".to_string());
        }
        Ok(())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }

    /// Build a streaming client for this configuration.
    pub fn create_client(&self) -> Result<Arc<dyn ModelProviderClient>, ApiError> {
        self.validate().map_err(ApiError::ProviderNotConfigured)?;
        let endpoint = self
            .endpoint
            .clone()
            .or_else(|| self.provider_type.default_endpoint().map(str::to_string))
            .ok_or_else(|| ApiError::ProviderNotConfigured("missing endpoint".to_string()))?;
        let client = OpenAICompatibleClient::new(
            provider_label(self.provider_type),
            self.model.clone(),
            self.resolve_api_key(),
            endpoint,
        )?;
        Ok(Arc::new(client))
    }
}

fn provider_label(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::OpenAI => "openai",
        ProviderType::Ollama => "ollama",
        ProviderType::Custom => "custom",
    }
}

// OpenAI-compatible request structure
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    stream: bool,
}

fn map_http_error(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        GenerationError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        GenerationError::Provider(format!("HTTP error: {}", error))
    }
}

fn map_status(status: u16, body: String) -> GenerationError {
    match status {
        401 => GenerationError::ProviderAuthFailed(body),
        429 => GenerationError::ProviderRateLimit(body),
        404 => GenerationError::ProviderModelNotFound(body),
        _ => GenerationError::ProviderRequestFailed(format!("status {}: {}", status, body)),
    }
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming client for any OpenAI-compatible chat completions endpoint
pub struct OpenAICompatibleClient {
    client: Client,
    provider_name: &'static str,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAICompatibleClient {
    pub fn new(
        provider_name: &'static str,
        model: String,
        api_key: Option<String>,
        base_url: String,
    ) -> Result<Self, ApiError> {
        // No overall request timeout: a stream may legitimately stay open for minutes.
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            provider_name,
            model,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelProviderClient for OpenAICompatibleClient {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<CompletionStream, GenerationError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            min_p: params.min_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop: params.stop_sequences,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status, body));
        }

        let stream = response
            .bytes_stream()
            .scan(Vec::new(), |buffer: &mut Vec<u8>, chunk| {
                let deltas = match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        sse::drain_deltas(buffer)
                    }
                    Err(e) => vec![Err(map_http_error(e))],
                };
                futures::future::ready(Some(deltas))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn provider_name(&self) -> &str {
        self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
