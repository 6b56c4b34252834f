// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Streaming-bridge integration: utterance dispatch over the media channel,
//! what the segmenter does and does not hear during playback, reconnecting
//! after a dropped transport, and a complete booking call carried by audio
//! alone. Paused-time tests; the paced playback runs instantly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dispatchline::agent::VoiceAgent;
use dispatchline::audio::codec::linear_to_mulaw;
use dispatchline::booking::InMemoryScheduler;
use dispatchline::call::state::BookingStage;
use dispatchline::call::store::CallStore;
use dispatchline::degradation::{DegradationManager, DegradationParams};
use dispatchline::services::{ServiceError, Synthesis, Synthesizer, Transcriber, Transcript};
use dispatchline::telephony::{BridgeExit, StreamBridge, StreamEvent};

/// Fixed transcript, a count of how many utterances actually reached the
/// transcriber, and the PCM byte length of the most recent one.
struct CountingTranscriber {
    text: &'static str,
    calls: Arc<AtomicUsize>,
    pcm_bytes: Arc<AtomicUsize>,
}

#[async_trait]
impl Transcriber for CountingTranscriber {
    async fn transcribe(
        &self,
        pcm: &[u8],
        _sample_rate: u32,
        _model: &str,
    ) -> Result<Transcript, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pcm_bytes.store(pcm.len(), Ordering::SeqCst);
        Ok(Transcript {
            text: self.text.to_string(),
            audio_seconds: 1.0,
            estimated_cost_usd: 0.0,
        })
    }
}

/// Scripted caller: each dispatched utterance transcribes to the next line.
struct SequenceTranscriber {
    lines: Mutex<VecDeque<&'static str>>,
}

impl SequenceTranscriber {
    fn new(lines: &[&'static str]) -> Self {
        Self {
            lines: Mutex::new(lines.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl Transcriber for SequenceTranscriber {
    async fn transcribe(
        &self,
        _pcm: &[u8],
        _sample_rate: u32,
        _model: &str,
    ) -> Result<Transcript, ServiceError> {
        let line = self
            .lines
            .lock()
            .unwrap()
            .pop_front()
            .expect("more utterances dispatched than scripted lines");
        Ok(Transcript {
            text: line.to_string(),
            audio_seconds: 1.0,
            estimated_cost_usd: 0.0,
        })
    }
}

/// `samples` PCM16 samples of silence at 8kHz; the bridge sends them as
/// `samples / 160` mu-law chunks.
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

fn stack(
    transcriber: Arc<dyn Transcriber>,
    synth_samples: usize,
) -> (Arc<StreamBridge>, Arc<VoiceAgent>, Arc<InMemoryScheduler>) {
    let store = Arc::new(CallStore::new(Duration::from_secs(3600)));
    let degradation = Arc::new(DegradationManager::new(DegradationParams::default()));
    let scheduler = Arc::new(InMemoryScheduler::new());
    let agent = Arc::new(VoiceAgent::new(
        store,
        degradation,
        Arc::clone(&scheduler) as _,
    ));
    let bridge = Arc::new(StreamBridge::new(
        Arc::clone(&agent),
        transcriber,
        Arc::new(SilenceSynthesizer {
            samples: synth_samples,
        }),
    ));
    (bridge, agent, scheduler)
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

async fn send_frames(event_tx: &mpsc::Sender<StreamEvent>, frame: Vec<u8>, count: usize) {
    for _ in 0..count {
        event_tx
            .send(StreamEvent::Media {
                mulaw: frame.clone(),
            })
            .await
            .unwrap();
    }
}

/// 30 soft speech frames then 80 silence frames: one closed utterance.
async fn send_utterance(event_tx: &mpsc::Sender<StreamEvent>) {
    send_frames(event_tx, frame_with_amplitude(100), 30).await;
    send_frames(event_tx, vec![0xFF; 160], 80).await;
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

#[tokio::test(start_paused = true)]
async fn test_each_closed_utterance_dispatches_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (bridge, agent, _scheduler) = stack(
        Arc::new(CountingTranscriber {
            text: "our kitchen sink is leaking, can you send someone out",
            calls: Arc::clone(&calls),
            pcm_bytes: Arc::new(AtomicUsize::new(0)),
        }),
        160,
    );
    let (event_tx, mut reply_rx, handle) = start(&bridge);

    event_tx.send(started()).await.unwrap();
    wait_for_mark(&mut reply_rx).await;

    // 40 speech frames then 85 silence: the utterance closes at the 80th
    // silence frame, and the 5 trailing frames must not dispatch again.
    send_frames(&event_tx, frame_with_amplitude(100), 40).await;
    send_frames(&event_tx, vec![0xFF; 160], 85).await;
    wait_for_mark(&mut reply_rx).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The counters went with the dispatch: a second utterance needs its own
    // run of speech and silence.
    send_utterance(&event_tx).await;
    wait_for_mark(&mut reply_rx).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Leak report became the issue, the repeat became the address.
    let stage = agent.store().peek("CAtest", |s| s.booking_stage).unwrap();
    assert_eq!(stage, BookingStage::CollectingTime);

    drop(event_tx);
    assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_interrupts_without_seeding_an_utterance() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pcm_bytes = Arc::new(AtomicUsize::new(0));
    // A one-second greeting keeps the line speaking while the caller talks.
    let (bridge, _agent, _scheduler) = stack(
        Arc::new(CountingTranscriber {
            text: "my water heater is rumbling, come take a look",
            calls: Arc::clone(&calls),
            pcm_bytes: Arc::clone(&pcm_bytes),
        }),
        8000,
    );
    let (event_tx, mut reply_rx, handle) = start(&bridge);

    event_tx.send(started()).await.unwrap();

    // Soft speech under the greeting leaves no trace; the loud frame stops
    // playback but is itself dropped rather than buffered.
    send_frames(&event_tx, frame_with_amplitude(100), 30).await;
    send_frames(&event_tx, frame_with_amplitude(8000), 1).await;
    loop {
        let text = reply_rx.recv().await.expect("stream closed early");
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        match parsed["event"].as_str().unwrap() {
            "media" => {}
            "clear" => break,
            "mark" => panic!("interrupted playback must not finish with a mark"),
            other => panic!("unexpected outbound event {other}"),
        }
    }

    // Nothing heard during playback is waiting to close: this silence run
    // dispatches no utterance of its own.
    send_frames(&event_tx, vec![0xFF; 160], 80).await;

    send_utterance(&event_tx).await;
    wait_for_mark(&mut reply_rx).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // 80 + 30 + 80 frames of 160 mu-law bytes each, decoded to 16-bit PCM.
    // One frame more would mean the interrupting frame was buffered.
    assert_eq!(pcm_bytes.load(Ordering::SeqCst), 190 * 160 * 2);

    drop(event_tx);
    assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
}

#[tokio::test(start_paused = true)]
async fn test_audio_heard_during_playback_is_never_transcribed() {
    let calls = Arc::new(AtomicUsize::new(0));
    // A one-second greeting; the caller mumbles under all of it.
    let (bridge, _agent, _scheduler) = stack(
        Arc::new(CountingTranscriber {
            text: "should never be spoken",
            calls: Arc::clone(&calls),
            pcm_bytes: Arc::new(AtomicUsize::new(0)),
        }),
        8000,
    );
    let (event_tx, mut reply_rx, handle) = start(&bridge);

    event_tx.send(started()).await.unwrap();
    // Speech-level but under the barge-in bar: playback runs to the end.
    send_frames(&event_tx, frame_with_amplitude(100), 30).await;
    assert_eq!(wait_for_mark(&mut reply_rx).await, 50);

    // The soft frames were never buffered, so this silence run has no
    // utterance to close.
    send_frames(&event_tx, vec![0xFF; 160], 80).await;

    drop(event_tx);
    assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_transport_call_resumes_where_it_left_off() {
    let transcriber = Arc::new(SequenceTranscriber::new(&[
        "our furnace stopped working overnight",
        "742 maple avenue",
    ]));
    let (bridge, agent, _scheduler) = stack(transcriber, 160);

    // First leg: the caller reports the issue, then the line dies.
    let (event_tx, mut reply_rx, handle) = start(&bridge);
    event_tx.send(started()).await.unwrap();
    wait_for_mark(&mut reply_rx).await;
    send_utterance(&event_tx).await;
    wait_for_mark(&mut reply_rx).await;
    drop(event_tx);
    assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
    assert!(agent.store().contains("CAtest"));

    // Second leg, same call id: the next utterance is the address, not a
    // restated issue, because the call kept its place.
    let (event_tx, mut reply_rx, handle) = start(&bridge);
    event_tx.send(started()).await.unwrap();
    wait_for_mark(&mut reply_rx).await;
    send_utterance(&event_tx).await;
    wait_for_mark(&mut reply_rx).await;

    let (stage, location) = agent
        .store()
        .peek("CAtest", |s| {
            (s.booking_stage, s.booking_data.location.clone())
        })
        .unwrap();
    assert_eq!(stage, BookingStage::CollectingTime);
    assert_eq!(location.as_deref(), Some("742 maple avenue"));

    drop(event_tx);
    assert_eq!(handle.await.unwrap(), BridgeExit::TransportDropped);
}

#[tokio::test(start_paused = true)]
async fn test_full_booking_call_over_the_stream() {
    let transcriber = Arc::new(SequenceTranscriber::new(&[
        "our furnace stopped working overnight",
        "742 maple avenue",
        "tomorrow at 2pm",
        "my name is dana whitfield",
        "yes, book it",
        "thats all, bye",
    ]));
    let (bridge, agent, scheduler) = stack(transcriber, 160);
    let (event_tx, mut reply_rx, handle) = start(&bridge);

    event_tx.send(started()).await.unwrap();
    wait_for_mark(&mut reply_rx).await;

    // Issue, address, slot, name, confirmation; listen through each reply.
    for _ in 0..5 {
        send_utterance(&event_tx).await;
        wait_for_mark(&mut reply_rx).await;
    }
    assert_eq!(scheduler.appointment_count(), 1);

    // The farewell plays to the end before the bridge hangs up.
    send_utterance(&event_tx).await;
    wait_for_mark(&mut reply_rx).await;

    assert_eq!(handle.await.unwrap(), BridgeExit::Completed);
    assert!(!agent.store().contains("CAtest"));
}
