// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deepgram speech-to-text over the prerecorded REST API.
//!
//! Utterances arrive as complete buffers (the bridge segments them before
//! transcription), so the batch endpoint fits better than a streaming
//! socket: one WAV upload per utterance, one transcript back. The model is
//! chosen per call by the active service tier.

use async_trait::async_trait;
use serde::Deserialize;

use crate::audio::codec::encode_pcm_to_wav;
use crate::services::{ServiceError, Transcriber, Transcript};

const PROVIDER: &str = "deepgram";

/// Published pay-as-you-go prices, USD per audio minute.
fn price_per_minute(model: &str) -> f64 {
    if model.starts_with("nova") {
        0.0043
    } else {
        0.0036
    }
}

/// Deepgram prerecorded transcription client.
pub struct DeepgramTranscriber {
    api_key: String,
    base_url: String,
    language: String,
    client: reqwest::Client,
}

impl DeepgramTranscriber {
    const DEFAULT_BASE_URL: &'static str = "https://api.deepgram.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            language: "en".to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Builder method: set the BCP-47 language hint.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builder method: set a custom `reqwest::Client`.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn api_url(&self, model: &str) -> String {
        let host = self.base_url.trim_end_matches('/');
        format!(
            "{}/v1/listen?model={}&language={}&smart_format=true",
            host, model, self.language
        )
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        model: &str,
    ) -> Result<Transcript, ServiceError> {
        let wav = encode_pcm_to_wav(pcm, sample_rate, 1);
        let url = self.api_url(model);

        tracing::debug!(
            kb = wav.len() as f64 / 1024.0,
            model,
            "sending utterance audio for transcription"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav)
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

        let parsed: DgPrerecordedResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode {
                provider: PROVIDER,
                detail: e.to_string(),
            })?;

        let billed_seconds = if parsed.metadata.duration > 0.0 {
            parsed.metadata.duration
        } else {
            // Header-less fallback: PCM16 mono byte budget.
            pcm.len() as f64 / (2.0 * sample_rate as f64)
        };

        let transcript = parsed
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next())
            .map(|alt| {
                tracing::debug!(
                    text = %alt.transcript,
                    confidence = alt.confidence,
                    "transcription received"
                );
                alt.transcript
            })
            .unwrap_or_default();

        Ok(Transcript {
            text: transcript,
            audio_seconds: billed_seconds,
            estimated_cost_usd: billed_seconds / 60.0 * price_per_minute(model),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DgPrerecordedResponse {
    #[serde(default)]
    metadata: DgMetadata,
    #[serde(default)]
    results: DgResults,
}

#[derive(Debug, Default, Deserialize)]
struct DgMetadata {
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DgResults {
    #[serde(default)]
    channels: Vec<DgChannel>,
}

#[derive(Debug, Default, Deserialize)]
struct DgChannel {
    #[serde(default)]
    alternatives: Vec<DgAlternative>,
}

#[derive(Debug, Default, Deserialize)]
struct DgAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}
