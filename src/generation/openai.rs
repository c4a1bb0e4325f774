//! OpenAI chat-completions streaming backend.

use super::{GenerationBackend, GenerationRequest, TokenStream};
use crate::error::{DocentError, Result};
use crate::openai::create_client;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::{future, StreamExt};
use tracing::{debug, instrument};

/// Generation backend using OpenAI chat completions.
pub struct OpenAIBackend {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
    name: String,
}

impl OpenAIBackend {
    pub fn new(model: &str, temperature: f32) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            model: model.to_string(),
            temperature,
            name: format!("openai/{}", model),
        })
    }
}

fn backend_error(e: impl std::fmt::Display) -> DocentError {
    DocentError::GenerationBackend(e.to_string())
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()
                .map_err(backend_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.clone())
                .build()
                .map_err(backend_error)?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(backend_error)?;

        let stream = self
            .client
            .chat()
            .create_stream(chat_request)
            .await
            .map_err(|e| DocentError::GenerationBackend(format!("Failed to start completion: {}", e)))?;

        debug!("OpenAI accepted generation request");

        let tokens = stream.filter_map(|item| {
            let token = match item {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(backend_error(e))),
            };
            future::ready(token)
        });

        Ok(tokens.boxed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
