use super::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, Instant};

const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Completions from a local Ollama server
pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: http_client(),
        }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[derive(Debug, Serialize)]
struct GenerateBody {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

impl GenerateBody {
    fn new(request: GenerateRequest, model: String) -> Self {
        Self {
            model,
            prompt: request.prompt,
            stream: false,
            system: request.system_prompt,
            options: request
                .max_tokens
                .map(|num_predict| GenerateOptions { num_predict }),
        }
    }
}

/// Decode a successful JSON reply, turning HTTP failures into `ApiError`
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> LlmResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(LlmError::ApiError(format!("Ollama returned {}", status)));
    }
    response
        .json()
        .await
        .map_err(|e| LlmError::ParseError(e.to_string()))
}

/// Models pulled into the local Ollama instance, as "ollama:<name>" ids
pub async fn list_local_models(base_url: &str) -> LlmResult<Vec<String>> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = http_client()
        .get(&url)
        .timeout(LIST_TIMEOUT)
        .send()
        .await
        .map_err(|e| LlmError::ApiError(e.to_string()))?;

    let tags: TagsReply = read_json(response).await?;
    Ok(tags
        .models
        .into_iter()
        .map(|tag| format!("ollama:{}", tag.name))
        .collect())
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let started = Instant::now();
        let timeout = request.timeout;
        let model = request.model_or(&self.model);
        let body = GenerateBody::new(request, model.clone());

        let send = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(timeout))?
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        let reply: GenerateReply = read_json(response).await?;

        Ok(GenerateResponse {
            text: reply.response.trim().to_string(),
            metadata: ResponseMetadata {
                provider: self.name().to_string(),
                model,
                tokens_used: reply.eval_count,
                latency_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
