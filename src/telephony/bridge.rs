// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming audio bridge: one task per media-stream socket.
//!
//! The bridge pumps inbound mu-law frames through the segmenter, and when an
//! utterance closes it runs the full turn inline: transcribe, hand the text
//! to the agent, synthesize the reply, and pace it back to the telco in
//! 20ms chunks. The caller holds the floor between agent replies; the agent
//! holds it while audio is being paced out.
//!
//! While the agent is speaking, inbound frames are tested only against the
//! barge-in threshold and are never buffered, so playback echo cannot leak
//! into the next transcription. A loud enough frame cancels the playback
//! task and sends the telco a `clear` so its buffered audio stops
//! instantly; segmentation resumes with the frames that follow.
//!
//! The bridge owns its channels rather than the socket so tests can drive it
//! with plain events; [`StreamBridge::serve_socket`] adapts an accepted
//! WebSocket onto those channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{responses, CallAction, TransferReason, VoiceAgent};
use crate::audio::classifier::{
    ClassifierParams, FrameClassifier, SegmentEvent, SegmenterParams, UtteranceBuffer,
};
use crate::audio::codec::{mulaw_to_pcm, pcm_to_mulaw, resample_linear, MULAW_SAMPLE_RATE};
use crate::degradation::{ProviderKind, ServiceLevel};
use crate::services::{with_budget, Synthesizer, Transcriber};
use crate::telephony::events::{self, StreamEvent};
use crate::utils::generate_unique_id;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Tunables for one bridged stream.
#[derive(Debug, Clone)]
pub struct BridgeParams {
    pub classifier: ClassifierParams,
    pub segmenter: SegmenterParams,
    /// Outbound chunk size in mu-law bytes; 160 is 20ms at 8kHz.
    pub chunk_bytes: usize,
    /// Pacing gap between outbound chunks.
    pub chunk_interval: Duration,
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            classifier: ClassifierParams::default(),
            segmenter: SegmenterParams::default(),
            chunk_bytes: 160,
            chunk_interval: Duration::from_millis(20),
        }
    }
}

/// Why the bridge stopped pumping a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The agent said goodbye and the line finished playing.
    Completed,
    /// The call needs a person; the caller heard the handoff line.
    Transfer(TransferReason),
    /// The peer closed the stream or the transport died.
    TransportDropped,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything mutable about one live stream.
struct Session {
    stream_sid: String,
    call_id: Option<String>,
    caller_phone: Option<String>,
    buffer: UtteranceBuffer,
    playback: Option<Playback>,
    /// True while a playback task is sending audio. Shared with the task so
    /// the event loop can tell whether a loud frame is a barge-in.
    speaking: Arc<AtomicBool>,
}

struct Playback {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Pumps one media stream between the telco and the agent.
pub struct StreamBridge {
    agent: Arc<VoiceAgent>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    classifier: FrameClassifier,
    params: BridgeParams,
}

impl StreamBridge {
    pub fn new(
        agent: Arc<VoiceAgent>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let params = BridgeParams::default();
        Self {
            agent,
            transcriber,
            synthesizer,
            classifier: FrameClassifier::new(params.classifier.clone()),
            params,
        }
    }

    pub fn with_params(mut self, params: BridgeParams) -> Self {
        self.classifier = FrameClassifier::new(params.classifier.clone());
        self.params = params;
        self
    }

    /// Pump one accepted WebSocket through [`StreamBridge::run`].
    pub async fn serve_socket(&self, socket: WebSocket) -> BridgeExit {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (event_tx, event_rx) = mpsc::channel(256);
        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(256);

        let reader = tokio::spawn(async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                match message {
                    Message::Text(text) => {
                        if let Some(event) = events::parse_event(&text) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => {
                        let _ = event_tx.send(StreamEvent::Stopped).await;
                        break;
                    }
                    _ => {}
                }
            }
        });
        let writer = tokio::spawn(async move {
            while let Some(text) = reply_rx.recv().await {
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        let exit = self.run(event_rx, reply_tx).await;
        reader.abort();
        let _ = writer.await;
        exit
    }

    /// Run the event loop until the call ends one way or another.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<StreamEvent>,
        outbound: mpsc::Sender<String>,
    ) -> BridgeExit {
        let mut session = Session {
            stream_sid: String::new(),
            call_id: None,
            caller_phone: None,
            buffer: UtteranceBuffer::new(self.params.segmenter.clone()),
            playback: None,
            speaking: Arc::new(AtomicBool::new(false)),
        };

        let exit = loop {
            let Some(event) = inbound.recv().await else {
                break BridgeExit::TransportDropped;
            };
            match event {
                StreamEvent::Connected => {
                    tracing::debug!("media stream socket connected");
                }
                StreamEvent::Started {
                    stream_sid,
                    call_sid,
                    caller,
                } => {
                    let call_id = call_sid.unwrap_or_else(|| generate_unique_id("call"));
                    tracing::info!(
                        call_id = %call_id,
                        stream_sid = %stream_sid,
                        caller = ?caller,
                        "media stream started"
                    );
                    session.stream_sid = stream_sid;
                    session.caller_phone = caller;
                    let reply = self
                        .agent
                        .greeting_reply(&call_id, session.caller_phone.as_deref());
                    session.call_id = Some(call_id.clone());
                    self.speak(&mut session, &outbound, &call_id, &reply.text)
                        .await;
                }
                StreamEvent::Media { mulaw } => {
                    let Some(call_id) = session.call_id.clone() else {
                        // Audio before start has no call to attach to.
                        continue;
                    };
                    if session.speaking.load(Ordering::SeqCst) {
                        // While the agent speaks, a frame is only a barge-in
                        // candidate; it never reaches the utterance buffer.
                        if self.classifier.is_barge_in(&mulaw) {
                            self.interrupt_playback(&mut session, &outbound, &call_id)
                                .await;
                        }
                        continue;
                    }
                    let is_speech = self.classifier.is_speech(&mulaw);
                    if let SegmentEvent::Utterance(bytes) = session.buffer.push(&mulaw, is_speech)
                    {
                        if let Some(exit) = self
                            .process_utterance(&mut session, &outbound, &call_id, bytes)
                            .await
                        {
                            break exit;
                        }
                    }
                }
                StreamEvent::Dtmf { digit } => {
                    let Some(call_id) = session.call_id.clone() else {
                        continue;
                    };
                    tracing::debug!(call_id = %call_id, digit = %digit, "dtmf digit");
                    if digit == "0" {
                        let reply = self.agent.operator_reply(&call_id);
                        self.speak_final(&mut session, &outbound, &call_id, &reply.text)
                            .await;
                        break BridgeExit::Transfer(TransferReason::OperatorRequest);
                    }
                }
                StreamEvent::Mark { name } => {
                    tracing::trace!(mark = %name, "playback mark acknowledged");
                }
                StreamEvent::Stopped => {
                    tracing::info!(call_id = ?session.call_id, "media stream stopped by peer");
                    break BridgeExit::TransportDropped;
                }
            }
        };

        if let Some(playback) = session.playback.take() {
            playback.token.cancel();
            let _ = playback.handle.await;
        }
        self.cleanup(&session, &exit);
        exit
    }

    /// One full turn over a closed utterance. `Some(exit)` ends the call.
    async fn process_utterance(
        &self,
        session: &mut Session,
        outbound: &mpsc::Sender<String>,
        call_id: &str,
        mulaw: Vec<u8>,
    ) -> Option<BridgeExit> {
        let degradation = self.agent.degradation();
        let level = degradation.level();
        let config = degradation.config_for(level).clone();

        let text = if level == ServiceLevel::HumanTransfer {
            // The floor tier hands off without transcription; the agent turns
            // any utterance into the handoff line.
            String::new()
        } else if !degradation
            .health()
            .breaker(ProviderKind::Stt)
            .allow_attempt()
        {
            tracing::warn!(call_id = %call_id, "stt breaker open, utterance dropped");
            self.speak(session, outbound, call_id, responses::APOLOGY_RETRY)
                .await;
            return None;
        } else {
            let pcm = mulaw_to_pcm(&mulaw);
            let attempt = with_budget(
                "stt",
                config.reply_budget,
                self.transcriber
                    .transcribe(&pcm, MULAW_SAMPLE_RATE, &config.stt_model),
            )
            .await;
            match attempt {
                Ok(transcript) => {
                    degradation.record_provider_success(ProviderKind::Stt);
                    tracing::debug!(
                        call_id = %call_id,
                        text = %transcript.text,
                        audio_seconds = transcript.audio_seconds,
                        cost_usd = transcript.estimated_cost_usd,
                        "utterance transcribed"
                    );
                    transcript.text
                }
                Err(err) => {
                    degradation.record_provider_failure(ProviderKind::Stt, err.kind_label());
                    tracing::warn!(call_id = %call_id, error = %err, "transcription failed");
                    self.speak(session, outbound, call_id, responses::APOLOGY_RETRY)
                        .await;
                    return None;
                }
            }
        };

        let reply = self
            .agent
            .handle_turn(call_id, &text, session.caller_phone.as_deref())
            .await;
        match reply.action {
            CallAction::Continue => {
                self.speak(session, outbound, call_id, &reply.text).await;
                None
            }
            CallAction::Transfer(reason) => {
                self.speak_final(session, outbound, call_id, &reply.text)
                    .await;
                Some(BridgeExit::Transfer(reason))
            }
            CallAction::Hangup => {
                self.speak_final(session, outbound, call_id, &reply.text)
                    .await;
                Some(BridgeExit::Completed)
            }
        }
    }

    /// Cancel playback and flush the telco's buffered audio.
    ///
    /// The playback task is awaited before the `clear` goes out so no media
    /// chunk can trail it. Segmentation restarts from an empty buffer.
    async fn interrupt_playback(
        &self,
        session: &mut Session,
        outbound: &mpsc::Sender<String>,
        call_id: &str,
    ) {
        if let Some(playback) = session.playback.take() {
            playback.token.cancel();
            let _ = playback.handle.await;
        }
        session.speaking.store(false, Ordering::SeqCst);
        session.buffer.reset();
        if let Some(text) = events::clear_message(&session.stream_sid) {
            let _ = outbound.send(text).await;
        }
        tracing::debug!(call_id = %call_id, "caller barge-in, playback cancelled");
    }

    /// Synthesize and start paced playback; returns immediately.
    async fn speak(
        &self,
        session: &mut Session,
        outbound: &mpsc::Sender<String>,
        call_id: &str,
        text: &str,
    ) {
        if let Some(previous) = session.playback.take() {
            previous.token.cancel();
            let _ = previous.handle.await;
        }
        let Some(mulaw) = self.synthesize_reply(call_id, text).await else {
            return;
        };
        session.playback = Some(self.start_playback(session, outbound.clone(), mulaw));
    }

    /// Synthesize and play to the very end. Used for the last line of a call,
    /// where cutting off mid-sentence defeats the point.
    async fn speak_final(
        &self,
        session: &mut Session,
        outbound: &mpsc::Sender<String>,
        call_id: &str,
        text: &str,
    ) {
        if let Some(previous) = session.playback.take() {
            previous.token.cancel();
            let _ = previous.handle.await;
        }
        let Some(mulaw) = self.synthesize_reply(call_id, text).await else {
            return;
        };
        let playback = self.start_playback(session, outbound.clone(), mulaw);
        let _ = playback.handle.await;
    }

    /// TTS under the tier budget, resampled to the 8kHz mu-law the telco
    /// expects. `None` means nothing to play; the call carries on silently
    /// and the degradation ladder deals with the pattern.
    async fn synthesize_reply(&self, call_id: &str, text: &str) -> Option<Vec<u8>> {
        if text.is_empty() {
            return None;
        }
        let degradation = self.agent.degradation();
        let config = degradation.config_for(degradation.level()).clone();
        if !degradation
            .health()
            .breaker(ProviderKind::Tts)
            .allow_attempt()
        {
            tracing::warn!(call_id = %call_id, "tts breaker open, reply not spoken");
            return None;
        }
        let attempt = with_budget(
            "tts",
            config.reply_budget,
            self.synthesizer
                .synthesize(text, &config.tts_model, &config.tts_voice),
        )
        .await;
        match attempt {
            Ok(synthesis) => {
                degradation.record_provider_success(ProviderKind::Tts);
                tracing::debug!(
                    call_id = %call_id,
                    bytes = synthesis.audio.len(),
                    sample_rate = synthesis.sample_rate,
                    cost_usd = synthesis.estimated_cost_usd,
                    "reply synthesized"
                );
                let pcm = if synthesis.sample_rate == MULAW_SAMPLE_RATE {
                    synthesis.audio
                } else {
                    resample_linear(&synthesis.audio, synthesis.sample_rate, MULAW_SAMPLE_RATE)
                };
                Some(pcm_to_mulaw(&pcm))
            }
            Err(err) => {
                degradation.record_provider_failure(ProviderKind::Tts, err.kind_label());
                tracing::warn!(call_id = %call_id, error = %err, "synthesis failed, reply dropped");
                None
            }
        }
    }

    /// Spawn the task that paces mu-law chunks onto the wire, one every
    /// `chunk_interval`. A mark follows the last chunk so the telco can tell
    /// us when playback actually finished; a cancelled task sends no mark.
    fn start_playback(
        &self,
        session: &Session,
        outbound: mpsc::Sender<String>,
        mulaw: Vec<u8>,
    ) -> Playback {
        session.speaking.store(true, Ordering::SeqCst);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let speaking = Arc::clone(&session.speaking);
        let stream_sid = session.stream_sid.clone();
        let mark = generate_unique_id("reply");
        let chunk_bytes = self.params.chunk_bytes.max(1);
        let interval = self.params.chunk_interval;
        let handle = tokio::spawn(async move {
            let mut offset = 0;
            while offset < mulaw.len() && !task_token.is_cancelled() {
                let end = (offset + chunk_bytes).min(mulaw.len());
                if let Some(text) = events::media_message(&stream_sid, &mulaw[offset..end]) {
                    if outbound.send(text).await.is_err() {
                        break;
                    }
                }
                offset = end;
                if offset >= mulaw.len() {
                    break;
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            if offset >= mulaw.len() && !task_token.is_cancelled() {
                if let Some(text) = events::mark_message(&stream_sid, &mark) {
                    let _ = outbound.send(text).await;
                }
            }
            speaking.store(false, Ordering::SeqCst);
        });
        Playback { token, handle }
    }

    fn cleanup(&self, session: &Session, exit: &BridgeExit) {
        let Some(call_id) = &session.call_id else {
            return;
        };
        match exit {
            BridgeExit::Completed => {
                self.agent.store().delete(call_id);
            }
            // The person picking up needs the context; the TTL sweep
            // reclaims it later.
            BridgeExit::Transfer(_) => {}
            // A dropped line may call back. The state waits so the
            // conversation can resume, until the TTL sweep reclaims it.
            BridgeExit::TransportDropped => {}
        }
        tracing::info!(call_id = %call_id, exit = ?exit, "stream bridge finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::audio::codec::linear_to_mulaw;
    use crate::booking::InMemoryScheduler;
    use crate::call::state::BookingStage;
    use crate::call::store::CallStore;
    use crate::degradation::{DegradationManager, DegradationParams};
    use crate::services::{ServiceError, Synthesis, Transcript};

    struct FixedTranscriber {
        text: String,
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _sample_rate: u32,
            _model: &str,
        ) -> Result<Transcript, ServiceError> {
            Ok(Transcript {
                text: self.text.clone(),
                audio_seconds: 1.0,
                estimated_cost_usd: 0.0,
            })
        }
    }

    struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(
            &self,
            _pcm: &[u8],
            _sample_rate: u32,
            _model: &str,
        ) -> Result<Transcript, ServiceError> {
            Err(ServiceError::EmptyResponse {
                provider: "deepgram",
            })
        }
    }

    /// Returns `samples` PCM16 samples of silence at 8kHz, which the bridge
    /// turns into `samples` mu-law bytes, i.e. `samples / 160` chunks.
    struct SilenceSynthesizer {
        samples: usize,
    }

    #[async_trait]
    impl Synthesizer for SilenceSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            _model: &str,
            _voice: &str,
        ) -> Result<Synthesis, ServiceError> {
            Ok(Synthesis {
                audio: vec![0u8; self.samples * 2],
                sample_rate: 8000,
                estimated_cost_usd: 0.0,
            })
        }
    }

    fn bridge_with(
        transcriber: Arc<dyn Transcriber>,
        synth_samples: usize,
    ) -> (Arc<StreamBridge>, Arc<VoiceAgent>) {
        let store = Arc::new(CallStore::new(Duration::from_secs(3600)));
        let degradation = Arc::new(DegradationManager::new(DegradationParams::default()));
        let scheduler = Arc::new(InMemoryScheduler::new());
        let agent = Arc::new(VoiceAgent::new(store, degradation, scheduler));
        let bridge = Arc::new(StreamBridge::new(
            Arc::clone(&agent),
            transcriber,
            Arc::new(SilenceSynthesizer {
                samples: synth_samples,
            }),
        ));
        (bridge, agent)
    }

    fn start(
        bridge: &Arc<StreamBridge>,
    ) -> (
        mpsc::Sender<StreamEvent>,
        mpsc::Receiver<String>,
        JoinHandle<BridgeExit>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(512);
        let (reply_tx, reply_rx) = mpsc::channel(4096);
        let b = Arc::clone(bridge);
        let handle = tokio::spawn(async move { b.run(event_rx, reply_tx).await });
        (event_tx, reply_rx, handle)
    }

    fn started() -> StreamEvent {
        StreamEvent::Started {
            stream_sid: "MZtest".into(),
            call_sid: Some("CAtest".into()),
            caller: Some("+15550100".into()),
        }
    }

    fn frame_with_amplitude(amp: i16) -> Vec<u8> {
        (0..160)
            .map(|i| linear_to_mulaw(if i % 2 == 0 { amp } else { -amp }))
            .collect()
    }

    /// Drain outbound messages until the next mark; returns how many media
    /// chunks preceded it.
    async fn wait_for_mark(reply_rx: &mut mpsc::Receiver<String>) -> usize {
        let mut media = 0;
        loop {
            let text = reply_rx.recv().await.expect("stream closed before mark");
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            match parsed["event"].as_str().unwrap() {
                "media" => media += 1,
                "mark" => return media,
                other => panic!("unexpected outbound event {other}"),
            }
        }
    }

    /// 30 soft speech frames then 80 silence frames: one closed utterance.
    async fn send_utterance(event_tx: &mpsc::Sender<StreamEvent>) {
        let speech = frame_with_amplitude(100);
        for _ in 0..30 {
            event_tx
                .send(StreamEvent::Media {
                    mulaw: speech.clone(),
                })
                .await
                .unwrap();
        }
        let silence = vec![0xFFu8; 160];
        for _ in 0..80 {
            event_tx
                .send(StreamEvent::Media {
                    mulaw: silence.clone(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_plays_in_paced_chunks() {
        let (bridge, agent) = bridge_with(Arc::new(FixedTranscriber { text: String::new() }), 800);
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        // 800 mu-law bytes at 160 per chunk.
        assert_eq!(wait_for_mark(&mut reply_rx).await, 5);
        assert!(agent.store().contains("CAtest"));

        drop(event_tx);
        assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
        // A dropped line may call back; the state waits for the TTL sweep.
        assert!(agent.store().contains("CAtest"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_utterance_reaches_agent_and_reply_plays() {
        let (bridge, agent) = bridge_with(
            Arc::new(FixedTranscriber {
                text: "my furnace is broken, can you send someone out".into(),
            }),
            160,
        );
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        wait_for_mark(&mut reply_rx).await;

        send_utterance(&event_tx).await;
        wait_for_mark(&mut reply_rx).await;

        let (stage, issue) = agent
            .store()
            .peek("CAtest", |s| (s.booking_stage, s.booking_data.issue.clone()))
            .unwrap();
        assert_eq!(stage, BookingStage::CollectingLocation);
        assert_eq!(
            issue.as_deref(),
            Some("my furnace is broken, can you send someone out")
        );

        drop(event_tx);
        assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barge_in_clears_telco_buffer_and_stops_playback() {
        // A long greeting: 8000 mu-law bytes, 50 chunks, a second of audio.
        let (bridge, _agent) =
            bridge_with(Arc::new(FixedTranscriber { text: String::new() }), 8000);
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        event_tx
            .send(StreamEvent::Media {
                mulaw: frame_with_amplitude(8000),
            })
            .await
            .unwrap();

        let mut media_before_clear = 0;
        loop {
            let text = reply_rx.recv().await.expect("stream closed early");
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            match parsed["event"].as_str().unwrap() {
                "media" => media_before_clear += 1,
                "clear" => break,
                "mark" => panic!("playback must not complete after barge-in"),
                other => panic!("unexpected outbound event {other}"),
            }
        }
        assert!(media_before_clear < 50);

        drop(event_tx);
        assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digit_zero_hands_to_operator() {
        let (bridge, agent) = bridge_with(Arc::new(FixedTranscriber { text: String::new() }), 160);
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        wait_for_mark(&mut reply_rx).await;

        event_tx
            .send(StreamEvent::Dtmf { digit: "0".into() })
            .await
            .unwrap();
        // The handoff line plays to the end before the bridge exits.
        wait_for_mark(&mut reply_rx).await;

        assert_eq!(
            handle.await.unwrap(),
            BridgeExit::Transfer(TransferReason::OperatorRequest)
        );
        // Transfers keep the call state for whoever picks up.
        assert!(agent.store().contains("CAtest"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_goodbye_completes_the_call() {
        let (bridge, agent) = bridge_with(
            Arc::new(FixedTranscriber {
                text: "thanks, bye".into(),
            }),
            160,
        );
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        wait_for_mark(&mut reply_rx).await;

        send_utterance(&event_tx).await;
        wait_for_mark(&mut reply_rx).await;

        assert_eq!(handle.await.unwrap(), BridgeExit::Completed);
        assert!(!agent.store().contains("CAtest"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_failure_apologizes_and_records() {
        let (bridge, agent) = bridge_with(Arc::new(FailingTranscriber), 160);
        let (event_tx, mut reply_rx, handle) = start(&bridge);

        event_tx.send(started()).await.unwrap();
        wait_for_mark(&mut reply_rx).await;

        send_utterance(&event_tx).await;
        // The apology still plays; the failure lands in the ledger.
        wait_for_mark(&mut reply_rx).await;
        assert_eq!(agent.degradation().snapshot().total_failures, 1);

        drop(event_tx);
        assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
    }
}
