mod ollama;
mod openai;
mod players;

use async_trait::async_trait;
use std::time::Duration;

pub use ollama::{list_local_models, OllamaProvider};
pub use openai::OpenAiProvider;
pub use players::{
    fallback_answer, generate_or_fallback, parse_pick, pick_or_default, AnswerGenerator,
    VoterOracle, FALLBACK_DRAWING_ANSWER, FALLBACK_TEXT_ANSWER,
};

pub type LlmResult<T> = Result<T, LlmError>;

/// Why a model could not be used. Callers in the game fall back to a
/// placeholder answer or the first candidate instead of failing the round.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider call failed: {0}")]
    ApiError(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("provider misconfigured: {0}")]
    ConfigError(String),

    #[error("unusable reply: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Game rules and output format
    pub system_prompt: Option<String>,
    pub prompt: String,
    /// Reply length cap, in the provider's tokens
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    /// Model named in a "provider:model" id, replacing the provider's own
    pub model_override: Option<String>,
}

impl GenerateRequest {
    /// Model to ask, given the provider's configured one
    pub fn model_or(&self, configured: &str) -> String {
        self.model_override
            .clone()
            .unwrap_or_else(|| configured.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
}

/// One completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    /// Prefix of the model ids this provider answers to
    fn name(&self) -> &str;

    /// Model used when a request carries no override
    fn default_model(&self) -> &str;
}

/// Routes "provider:model" ids to the configured providers
pub struct LlmManager {
    providers: Vec<Box<dyn LlmProvider>>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmManager {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>) -> Self {
        let defaults = LlmConfig::default();
        Self {
            providers,
            timeout: defaults.default_timeout,
            max_tokens: defaults.default_max_tokens,
        }
    }

    pub fn with_limits(mut self, timeout: Duration, max_tokens: u32) -> Self {
        self.timeout = timeout;
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Model ids ("provider:model") of every configured provider's default model
    pub fn available_models(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| format!("{}:{}", p.name(), p.default_model()))
            .collect()
    }

    /// Run a request against `model_id` ("openai:gpt-4o-mini", "ollama:llama3.2").
    /// An empty model part keeps the provider's configured model.
    pub async fn generate_from_model(
        &self,
        model_id: &str,
        request: GenerateRequest,
    ) -> LlmResult<(String, GenerateResponse)> {
        let Some((provider_name, model_name)) = model_id.split_once(':') else {
            return Err(LlmError::ConfigError(
                format!("model id '{}' is not 'provider:model'", model_id),
            ));
        };

        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == provider_name)
            .ok_or_else(|| {
                LlmError::ConfigError(format!("no '{}' provider configured", provider_name))
            })?;

        let request_with_override = GenerateRequest {
            model_override: (!model_name.is_empty()).then(|| model_name.to_string()),
            ..request
        };

        let response = provider.generate(request_with_override).await?;
        tracing::debug!(
            provider = provider_name,
            model = %response.metadata.model,
            latency_ms = response.metadata.latency_ms,
            tokens = ?response.metadata.tokens_used,
            "Generated completion"
        );
        Ok((provider_name.to_string(), response))
    }
}

/// Which providers to build, from `OPENAI_*`, `OLLAMA_*` and `LLM_*` variables
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI is enabled only when a key is set
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /// `None` disables Ollama
    pub ollama_base_url: Option<String>,
    pub ollama_model: String,
    pub default_timeout: Duration,
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ollama_base_url: Some("http://localhost:11434".to_string()),
            ollama_model: "llama3.2".to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 150,
        }
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Unset means the local default, set-but-empty disables Ollama
        let ollama_base_url = match std::env::var("OLLAMA_BASE_URL") {
            Ok(url) => {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => defaults.ollama_base_url,
        };

        Self {
            openai_api_key: env_trimmed("OPENAI_API_KEY"),
            openai_model: env_trimmed("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url,
            ollama_model: env_trimmed("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            default_timeout: env_trimmed("LLM_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_timeout),
            default_max_tokens: env_trimmed("LLM_MAX_TOKENS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_tokens),
        }
    }

    /// One provider per configured backend; errors when there are none
    pub fn build_manager(&self) -> LlmResult<LlmManager> {
        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

        if let Some(api_key) = &self.openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(
                api_key.clone(),
                self.openai_model.clone(),
            )));
        }

        if let Some(base_url) = &self.ollama_base_url {
            providers.push(Box::new(OllamaProvider::new(
                base_url.clone(),
                self.ollama_model.clone(),
            )));
        }

        if providers.is_empty() {
            return Err(LlmError::ConfigError(
                "set OPENAI_API_KEY or OLLAMA_BASE_URL to enable automated players".to_string(),
            ));
        }

        Ok(LlmManager::new(providers).with_limits(self.default_timeout, self.default_max_tokens))
    }
}
