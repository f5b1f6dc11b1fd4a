//! External AI collaborators: transcription, completion and synthesis
//!
//! The conversation engine only sees the traits defined here. Every failure
//! is reduced to a [`ServiceError`] carrying one of four [`FailureKind`]s, so
//! the user-facing message never depends on provider-specific detail.

pub mod audio;
pub mod completion;
pub mod stt;
pub mod tts;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use completion::OpenAiCompleter;
pub use stt::WhisperTranscriber;
pub use tts::OpenAiSynthesizer;

/// Which external service produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Transcription,
    Completion,
    Synthesis,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcription => write!(f, "transcription"),
            Self::Completion => write!(f, "completion"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Classified cause of an external service failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    QuotaExceeded,
    RateLimited,
    InvalidRequest,
    Transient,
}

impl FailureKind {
    /// Classify a provider failure from its HTTP status (if any) and response body
    #[must_use]
    pub fn classify(status: Option<u16>, body: &str) -> Self {
        let body = body.to_ascii_lowercase();

        if body.contains("insufficient_quota") || body.contains("quota") {
            return Self::QuotaExceeded;
        }
        if status == Some(429) || body.contains("rate limit") || body.contains("rate_limit") {
            return Self::RateLimited;
        }
        if matches!(status, Some(400 | 404 | 413 | 422)) || body.contains("invalid") {
            return Self::InvalidRequest;
        }
        Self::Transient
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded => write!(f, "quota exceeded"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::Transient => write!(f, "transient failure"),
        }
    }
}

/// A classified failure of one external service call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{service} {kind}: {detail}")]
pub struct ServiceError {
    pub service: Service,
    pub kind: FailureKind,
    pub detail: String,
}

impl ServiceError {
    #[must_use]
    pub fn new(service: Service, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            detail: detail.into(),
        }
    }

    /// Build from a non-success HTTP response
    #[must_use]
    pub fn from_status(service: Service, status: reqwest::StatusCode, body: &str) -> Self {
        let kind = FailureKind::classify(Some(status.as_u16()), body);
        Self::new(service, kind, format!("{status}: {body}"))
    }

    /// Build from a transport-level error (connect, timeout, decode)
    #[must_use]
    pub fn from_reqwest(service: Service, error: &reqwest::Error) -> Self {
        let detail = error.to_string();
        let kind = match error.status() {
            Some(status) => FailureKind::classify(Some(status.as_u16()), &detail),
            None => FailureKind::Transient,
        };
        Self::new(service, kind, detail)
    }

    /// Short, non-technical message safe to show to the end user
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match (self.service, self.kind) {
            (Service::Transcription, FailureKind::QuotaExceeded) => {
                "Speech recognition is unavailable right now. Please contact the administrator."
            }
            (Service::Transcription, FailureKind::RateLimited) => {
                "Too many requests. Please try again in a minute."
            }
            (Service::Transcription, FailureKind::InvalidRequest) => {
                "Could not process the audio file. Please record it again."
            }
            (Service::Transcription, FailureKind::Transient) => {
                "I didn't catch that. Please try again."
            }
            (Service::Completion, FailureKind::QuotaExceeded) => {
                "The assistant has reached its usage limit. Please contact the administrator."
            }
            (Service::Completion, FailureKind::RateLimited) => {
                "Too many requests to the assistant. Please try again in a minute."
            }
            (Service::Completion, FailureKind::InvalidRequest) => {
                "Could not process the request. Please try rephrasing."
            }
            (Service::Completion, FailureKind::Transient) => {
                "Temporary assistant error. Please try again."
            }
            (Service::Synthesis, FailureKind::QuotaExceeded) => {
                "Voice synthesis has reached its usage limit. Please contact the administrator."
            }
            (Service::Synthesis, FailureKind::RateLimited) => {
                "Too many voice synthesis requests. Please try again in a minute."
            }
            (Service::Synthesis, FailureKind::InvalidRequest) => {
                "Could not prepare the reply for voicing."
            }
            (Service::Synthesis, FailureKind::Transient) => {
                "Temporary voice synthesis error. Please try again."
            }
        }
    }
}

/// Input for one completion call
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Validated transcript of the user's message
    pub prompt: &'a str,
    pub system_prompt: &'a str,
    /// Name the reply should address the user by
    pub display_name: &'a str,
    pub max_tokens: u32,
}

/// Speech-to-text collaborator
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio`
    ///
    /// An empty string is a valid result; the caller decides what that means.
    async fn transcribe(&self, audio: &Path) -> Result<String, ServiceError>;
}

/// Language model completion collaborator
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ServiceError>;
}

/// Text-to-speech collaborator
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`, writing the audio into `dir`
    ///
    /// Returns the path of the produced audio file.
    async fn synthesize(&self, text: &str, voice: &str, dir: &Path)
    -> Result<PathBuf, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_quota_before_rate_limit() {
        let body = r#"{"error":{"code":"insufficient_quota"}}"#;
        assert_eq!(
            FailureKind::classify(Some(429), body),
            FailureKind::QuotaExceeded
        );
    }

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(FailureKind::classify(Some(429), ""), FailureKind::RateLimited);
        assert_eq!(
            FailureKind::classify(None, "Rate limit reached for requests"),
            FailureKind::RateLimited
        );
    }

    #[test]
    fn test_classify_invalid_request() {
        for status in [400, 404, 413, 422] {
            assert_eq!(
                FailureKind::classify(Some(status), "bad"),
                FailureKind::InvalidRequest
            );
        }
        assert_eq!(
            FailureKind::classify(Some(500), "invalid file format"),
            FailureKind::InvalidRequest
        );
    }

    #[test]
    fn test_classify_transient() {
        assert_eq!(
            FailureKind::classify(Some(503), "upstream unavailable"),
            FailureKind::Transient
        );
        assert_eq!(FailureKind::classify(None, ""), FailureKind::Transient);
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = ServiceError::new(
            Service::Synthesis,
            FailureKind::QuotaExceeded,
            "sk-secret quota body",
        );
        assert!(!err.user_message().contains("sk-secret"));
        assert!(err.user_message().contains("usage limit"));
    }
}
