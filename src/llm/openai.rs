use super::*;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Instant;

impl From<OpenAIError> for LlmError {
    fn from(e: OpenAIError) -> Self {
        LlmError::ApiError(e.to_string())
    }
}

/// Chat completions against the OpenAI API
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::with_config(OpenAIConfig::new().with_api_key(api_key));
        Self { client, model }
    }
}

/// Game instructions go in as the system message, the prompt as the user turn
fn chat_request(request: &GenerateRequest, model: &str) -> LlmResult<CreateChatCompletionRequest> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
    if let Some(instructions) = &request.system_prompt {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(instructions.as_str())
                .build()?
                .into(),
        );
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.as_str())
            .build()?
            .into(),
    );

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(model).messages(messages);
    if let Some(limit) = request.max_tokens {
        args.max_tokens(limit);
    }
    Ok(args.build()?)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
        let started = Instant::now();
        let model = request.model_or(&self.model);
        let chat = chat_request(&request, &model)?;

        let completion = tokio::time::timeout(request.timeout, self.client.chat().create(chat))
            .await
            .map_err(|_| LlmError::Timeout(request.timeout))??;

        let text = completion
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("completion carried no text".to_string()))?;

        Ok(GenerateResponse {
            text: text.trim().to_string(),
            metadata: ResponseMetadata {
                provider: self.name().to_string(),
                model,
                tokens_used: completion.usage.map(|u| u.total_tokens),
                latency_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
