//! Speech-to-text using `OpenAI` Whisper

use std::path::Path;

use async_trait::async_trait;

use super::audio::{self, AudioFormat};
use super::{FailureKind, Service, ServiceError, Transcriber};
use crate::{Error, Result};

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Upload limit of the transcription endpoint
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech to text
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String, language: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
        })
    }

    fn build_form(&self, data: Vec<u8>, format: AudioFormat) -> std::result::Result<reqwest::multipart::Form, ServiceError> {
        let (file_name, mime) = format.upload_name();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| ServiceError::from_reqwest(Service::Transcription, &e))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        Ok(form)
    }
}

/// Reject uploads the endpoint would refuse anyway
fn check_upload_size(len: usize) -> std::result::Result<(), ServiceError> {
    if len > MAX_UPLOAD_BYTES {
        #[allow(clippy::cast_precision_loss)]
        let megabytes = len as f64 / (1024.0 * 1024.0);
        return Err(ServiceError::new(
            Service::Transcription,
            FailureKind::InvalidRequest,
            format!("file too large: {megabytes:.1}MB (max 25MB)"),
        ));
    }
    Ok(())
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, path: &Path) -> std::result::Result<String, ServiceError> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            ServiceError::new(Service::Transcription, FailureKind::Transient, e.to_string())
        })?;

        let prepared = audio::prepare_for_upload(raw).map_err(|e| {
            ServiceError::new(Service::Transcription, FailureKind::InvalidRequest, e.to_string())
        })?;
        check_upload_size(prepared.data.len())?;

        tracing::debug!(
            audio_bytes = prepared.data.len(),
            format = ?prepared.format,
            "starting Whisper transcription"
        );

        let form = self.build_form(prepared.data, prepared.format)?;

        let response = self
            .client
            .post(TRANSCRIPTIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Transcription, &e))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(Service::Transcription, status, &body));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::from_reqwest(Service::Transcription, &e))?;

        let text = result.text.trim().to_string();
        tracing::debug!(chars = text.chars().count(), "transcription complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_size_limit() {
        assert!(check_upload_size(MAX_UPLOAD_BYTES).is_ok());
        let err = check_upload_size(MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidRequest);
        assert_eq!(err.service, Service::Transcription);
    }

    #[test]
    fn test_requires_api_key() {
        assert!(WhisperTranscriber::new(String::new(), "whisper-1".into(), None).is_err());
        assert!(WhisperTranscriber::new("sk".into(), "whisper-1".into(), Some("ru".into())).is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_transient() {
        let stt = WhisperTranscriber::new("sk".into(), "whisper-1".into(), None).unwrap();
        let err = stt
            .transcribe(Path::new("/nonexistent/confide/voice.ogg"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
    }
}
