// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! OpenAI chat-completion and speech synthesis clients.
//!
//! Both are one-shot REST calls: phone replies are a sentence or two, so
//! SSE streaming buys nothing over the turn budget, and the speech endpoint
//! returns raw PCM we feed straight into the playback path. Model and voice
//! come from the active service tier on every call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::codec::strip_wav_header;
use crate::services::{ChatMessage, Generation, ResponseModel, ServiceError, Synthesis, Synthesizer};

const PROVIDER: &str = "openai";

/// Sample rate of `response_format: "pcm"` speech audio.
pub const OPENAI_TTS_SAMPLE_RATE: u32 = 24_000;

/// USD per prompt/completion token.
fn chat_price(model: &str) -> (f64, f64) {
    if model.contains("mini") {
        (0.15e-6, 0.60e-6)
    } else {
        (2.50e-6, 10.00e-6)
    }
}

/// USD per input character.
fn tts_price(model: &str) -> f64 {
    if model.ends_with("-hd") {
        30.0e-6
    } else {
        15.0e-6
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Body sent to `/v1/audio/speech`.
#[derive(Debug, Serialize)]
struct TTSRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

// ---------------------------------------------------------------------------
// Chat completions
// ---------------------------------------------------------------------------

/// OpenAI chat-completion client for reply generation.
pub struct OpenAIResponder {
    api_key: String,
    base_url: String,
    temperature: f64,
    max_tokens: u64,
    client: reqwest::Client,
}

impl OpenAIResponder {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            temperature: 0.7,
            // Spoken replies: a couple of short sentences.
            max_tokens: 150,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder method: set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builder method: cap the reply length in tokens.
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder method: set a custom `reqwest::Client`.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ResponseModel for OpenAIResponder {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<Generation, ServiceError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(model, messages = messages.len(), "requesting reply generation");

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|source| ServiceError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ServiceError::Request {
                provider: PROVIDER,
                source,
            })?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode {
                provider: PROVIDER,
                detail: e.to_string(),
            })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ServiceError::EmptyResponse { provider: PROVIDER })?;

        let usage = parsed.usage.unwrap_or_default();
        let (prompt_price, completion_price) = chat_price(model);
        let estimated_cost_usd = usage.prompt_tokens as f64 * prompt_price
            + usage.completion_tokens as f64 * completion_price;

        tracing::debug!(
            text = %text,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "reply generated"
        );

        Ok(Generation {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            estimated_cost_usd,
        })
    }
}

// ---------------------------------------------------------------------------
// Speech synthesis
// ---------------------------------------------------------------------------

/// OpenAI text-to-speech client returning raw PCM16 at 24kHz.
pub struct OpenAISpeech {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAISpeech {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder method: set a custom `reqwest::Client`.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn api_url(&self) -> String {
        format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Synthesizer for OpenAISpeech {
    async fn synthesize(
        &self,
        text: &str,
        model: &str,
        voice: &str,
    ) -> Result<Synthesis, ServiceError> {
        let request = TTSRequest {
            model,
            input: text,
            voice,
            response_format: "pcm",
        };

        tracing::debug!(model, voice, chars = text.len(), "requesting speech synthesis");

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|source| ServiceError::Request {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| ServiceError::Request {
                provider: PROVIDER,
                source,
            })?;
        // Some compatible endpoints wrap "pcm" output in a WAV container.
        let audio = strip_wav_header(&bytes).to_vec();
        if audio.is_empty() {
            return Err(ServiceError::EmptyResponse { provider: PROVIDER });
        }

        Ok(Synthesis {
            audio,
            sample_rate: OPENAI_TTS_SAMPLE_RATE,
            estimated_cost_usd: text.len() as f64 * tts_price(model),
        })
    }
}
