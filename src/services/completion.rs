//! Chat completions using the `OpenAI` API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Completer, CompletionRequest, FailureKind, Service, ServiceError};
use crate::{Error, Result};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const TEMPERATURE: f32 = 0.7;
const PRESENCE_PENALTY: f32 = 0.1;
const FREQUENCY_PENALTY: f32 = 0.1;

/// Produces conversational replies from a transcript
pub struct OpenAiCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiCompleter {
    /// Create a new completer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for completions".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    fn build_request(&self, request: CompletionRequest<'_>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: system_message(request.system_prompt, request.display_name),
                },
                Message {
                    role: "user",
                    content: request.prompt.to_string(),
                },
            ],
            max_tokens: Some(request.max_tokens),
            temperature: TEMPERATURE,
            presence_penalty: PRESENCE_PENALTY,
            frequency_penalty: FREQUENCY_PENALTY,
        }
    }
}

/// System prompt followed by the per-user addressing directive
fn system_message(system_prompt: &str, display_name: &str) -> String {
    format!("{system_prompt}\n\nAddress the user by name: {display_name}")
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> std::result::Result<String, ServiceError> {
        let body = self.build_request(request);

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Completion, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(Service::Completion, status, &body));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Completion, &e))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ServiceError::new(
                Service::Completion,
                FailureKind::Transient,
                "model returned an empty reply",
            ));
        }

        tracing::debug!(chars = text.chars().count(), "completion received");
        Ok(text)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
