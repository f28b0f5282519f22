//! Recognition backends: the one seam where an image leaves the process.
//!
//! [`RecognitionBackend`] is deliberately narrow: one instruction, one image,
//! one text reply. Two implementations ship:
//!
//! * [`ProviderBackend`] drives any `edgequake-llm` [`LLMProvider`] (OpenAI,
//!   Anthropic, Gemini, Ollama, ...) through its multimodal `chat` call.
//! * [`ChatCompletionsBackend`] posts an OpenAI-style chat-completions body
//!   with `reqwest` to any compatible endpoint (vLLM, LM Studio, Azure
//!   gateways) that the provider factory doesn't know about.
//!
//! Tests inject their own implementation, so no pipeline test needs network.
//!
//! A backend makes exactly one attempt per call. Retrying is the caller's
//! decision.

use crate::error::StageError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

/// OpenAI's chat-completions endpoint.
pub const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// What a backend is asked to do for one page.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionRequest<'a> {
    pub instruction: &'a str,
    pub image: &'a EncodedImage,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A vision-language model that turns one image into text.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Short label for logs, e.g. `"openai"` or the endpoint host.
    fn name(&self) -> &str;

    /// Send one instruction plus one image and return the raw reply.
    async fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<String, StageError>;
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// Backend over an `edgequake-llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    /// Build through [`ProviderFactory::create_llm_provider`], which reads
    /// the provider's API key from its usual environment variable.
    pub fn from_factory(provider_name: &str, model: &str) -> Result<Self, StageError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            StageError::InvalidConfig(format!(
                "Provider '{provider_name}' is not configured: {e}"
            ))
        })?;
        Ok(Self::new(provider, provider_name))
    }
}

#[async_trait]
impl RecognitionBackend for ProviderBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<String, StageError> {
        let messages = vec![ChatMessage::user_with_images(
            request.instruction,
            vec![request.image.to_image_data()],
        )];

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| StageError::ExternalService {
                message: format!("{}: {}", self.label, e),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

// ── Raw chat-completions over HTTP ───────────────────────────────────────

/// Backend for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }

    /// Replace the HTTP client, e.g. to set proxies or default headers.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body<'a>(&'a self, request: &'a RecognitionRequest<'_>, data_uri: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: request.instruction,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl RecognitionBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<String, StageError> {
        let data_uri = request.image.data_uri();
        let body = self.build_body(request, &data_uri);

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| StageError::ExternalService {
            message: format!("request to {} failed: {}", self.endpoint, e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::ExternalService {
                message: format!("HTTP {}: {}", status, truncate(&text, 500)),
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| StageError::ExternalService {
                    message: format!("malformed response: {}", e),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| StageError::ExternalService {
                message: "malformed response: missing choices[0].message.content".into(),
            })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Selection ────────────────────────────────────────────────────────────

/// Which backend a [`crate::convert::Converter`] talks to.
#[derive(Debug, Clone, Default)]
pub enum BackendConfig {
    /// A named `edgequake-llm` provider (`"openai"`, `"anthropic"`, ...).
    Provider { name: String, model: String },
    /// A raw OpenAI-compatible endpoint.
    ChatCompletions {
        endpoint: String,
        api_key: Option<String>,
        model: String,
    },
    /// Resolve from the environment.
    #[default]
    Auto,
}

/// Build the backend described by `config`.
///
/// `Auto` resolves, in order:
/// 1. `IMG2LATEX_PROVIDER` + `IMG2LATEX_MODEL`, when both are set;
/// 2. `OPENAI_API_KEY` → the `openai` provider with [`DEFAULT_MODEL`];
/// 3. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_backend(config: &BackendConfig) -> Result<Arc<dyn RecognitionBackend>, StageError> {
    match config {
        BackendConfig::Provider { name, model } => {
            info!("Using provider {} (model {})", name, model);
            Ok(Arc::new(ProviderBackend::from_factory(name, model)?))
        }
        BackendConfig::ChatCompletions {
            endpoint,
            api_key,
            model,
        } => {
            info!("Using chat-completions endpoint {} (model {})", endpoint, model);
            Ok(Arc::new(ChatCompletionsBackend::new(
                endpoint.clone(),
                api_key.clone(),
                model.clone(),
            )))
        }
        BackendConfig::Auto => resolve_from_env(),
    }
}

fn resolve_from_env() -> Result<Arc<dyn RecognitionBackend>, StageError> {
    if let (Ok(provider), Ok(model)) = (
        std::env::var("IMG2LATEX_PROVIDER"),
        std::env::var("IMG2LATEX_MODEL"),
    ) {
        if !provider.is_empty() && !model.is_empty() {
            info!("Using provider {} (model {}) from environment", provider, model);
            return Ok(Arc::new(ProviderBackend::from_factory(&provider, &model)?));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            info!("Using provider openai (model {})", DEFAULT_MODEL);
            return Ok(Arc::new(ProviderBackend::from_factory(
                "openai",
                DEFAULT_MODEL,
            )?));
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        StageError::InvalidConfig(format!(
            "No vision model provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider/--endpoint.\n\
            Error: {}",
            e
        ))
    })?;

    Ok(Arc::new(ProviderBackend::new(llm_provider, "auto")))
}
