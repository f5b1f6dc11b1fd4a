//! Text-to-speech using the `OpenAI` speech endpoint

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{FailureKind, Service, ServiceError, Synthesizer};
use crate::{Error, Result};

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Maximum input length accepted by the speech endpoint
pub const MAX_INPUT_CHARS: usize = 4096;

/// Synthesizes speech from text
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }
}

/// Clean text before synthesis
///
/// Collapses whitespace and drops markdown markup the voice would otherwise read aloud.
#[must_use]
pub fn prepare_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '`' | '*' | '[' | ']' | '{' | '}' | '#' | '_'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to the endpoint limit, marking the cut with an ellipsis
#[must_use]
pub fn truncate_for_speech(text: &str) -> String {
    if text.chars().count() <= MAX_INPUT_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_INPUT_CHARS - 6).collect();
    truncated.push_str("...");
    truncated
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        dir: &Path,
    ) -> std::result::Result<PathBuf, ServiceError> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        let input = truncate_for_speech(&prepare_text(text));
        if input.is_empty() {
            return Err(ServiceError::new(
                Service::Synthesis,
                FailureKind::InvalidRequest,
                "empty text for synthesis",
            ));
        }

        let request = TtsRequest {
            model: &self.model,
            input: &input,
            voice,
            response_format: "opus",
        };

        let response = self
            .client
            .post(SPEECH_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Synthesis, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(Service::Synthesis, status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Synthesis, &e))?;
        if audio.is_empty() {
            return Err(ServiceError::new(
                Service::Synthesis,
                FailureKind::Transient,
                "synthesis returned no audio",
            ));
        }

        let path = dir.join("reply.ogg");
        tokio::fs::write(&path, &audio).await.map_err(|e| {
            ServiceError::new(Service::Synthesis, FailureKind::Transient, e.to_string())
        })?;

        tracing::debug!(bytes = audio.len(), path = %path.display(), "synthesis complete");
        Ok(path)
    }
}
