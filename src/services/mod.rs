// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech and language provider seams (STT, LLM, TTS).
//!
//! Each provider sits behind its own trait so the degradation ladder can
//! swap models per tier and tests can substitute deterministic fakes. Every
//! call returns an explicit `Result` carrying a typed usage record; nothing
//! in here talks to the degradation manager. The caller times the call,
//! enforces the tier's budget with [`with_budget`], and records the outcome
//! where it can be seen.

pub mod deepgram;
pub mod openai;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Results and usage
// ---------------------------------------------------------------------------

/// A finished transcription with its usage accounting.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    /// Seconds of audio the provider billed for.
    pub audio_seconds: f64,
    pub estimated_cost_usd: f64,
}

/// A generated reply with token accounting.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Synthesized speech: mono little-endian PCM16 at `sample_rate`.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub estimated_cost_usd: f64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a provider call failed. The caller maps every variant to a scripted
/// apology; none of this wording ever reaches the caller's ear.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} response could not be parsed: {detail}")]
    Decode {
        provider: &'static str,
        detail: String,
    },
    #[error("{provider} response had no usable content")]
    EmptyResponse { provider: &'static str },
    #[error("{provider} exceeded its {budget_ms}ms budget")]
    Timeout {
        provider: &'static str,
        budget_ms: u64,
    },
}

impl ServiceError {
    /// Stable short label for logs and degradation reasons.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ServiceError::Request { .. } => "request_error",
            ServiceError::Status { .. } => "bad_status",
            ServiceError::Decode { .. } => "decode_error",
            ServiceError::EmptyResponse { .. } => "empty_response",
            ServiceError::Timeout { .. } => "timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// One message in a generation request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// Speech-to-text over a finished utterance.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe mono little-endian PCM16 at `sample_rate` with `model`.
    async fn transcribe(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        model: &str,
    ) -> Result<Transcript, ServiceError>;
}

/// Conversational reply generation.
#[async_trait]
pub trait ResponseModel: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<Generation, ServiceError>;
}

/// Text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        model: &str,
        voice: &str,
    ) -> Result<Synthesis, ServiceError>;
}

/// Run a provider call under the tier's hard budget.
///
/// A timeout is a failure like any other, even if the provider would have
/// answered eventually; the abandoned future is dropped.
pub async fn with_budget<T>(
    provider: &'static str,
    budget: Duration,
    fut: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            provider,
            budget_ms: budget.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_budget_passes_through_success() {
        let out = with_budget("stt", Duration::from_secs(1), async {
            Ok::<_, ServiceError>(42)
        })
        .await;
        assert_eq!(out.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_budget_times_out() {
        let out = with_budget("llm", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await;
        let err = out.unwrap_err();
        assert_eq!(err.kind_label(), "timeout");
        assert!(err.to_string().contains("llm"));
    }

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
        assert_eq!(ChatMessage::assistant("x").role, "assistant");
    }
}
