// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deterministic speech/silence frame classification and utterance
//! segmentation for the 8kHz mu-law media stream.
//!
//! No model inference here: a frame is "speech" when its bytes stray far
//! enough from the mu-law silence reference. That keeps the hot per-frame
//! path allocation-free and the thresholds auditable. Segmentation follows
//! the classic consecutive-frame pattern: enough speech frames followed by
//! a long enough run of silence closes an utterance.

use crate::audio::codec::MULAW_SILENCE;

// ---------------------------------------------------------------------------
// Frame classification
// ---------------------------------------------------------------------------

/// Tunable thresholds for frame classification.
///
/// Deviations are mean absolute distances from the mu-law silence byte,
/// measured over one 20ms frame (160 bytes). The barge-in threshold is
/// deliberately higher than the speech threshold so echo and line noise
/// during agent playback do not cancel synthesis.
#[derive(Debug, Clone)]
pub struct ClassifierParams {
    /// Mean deviation at or above which a frame counts as speech.
    pub speech_deviation: f32,
    /// Mean deviation at or above which a frame interrupts agent playback.
    pub barge_in_deviation: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            speech_deviation: 12.0,
            barge_in_deviation: 25.0,
        }
    }
}

/// Stateless per-frame classifier over raw mu-law bytes.
#[derive(Debug, Clone, Default)]
pub struct FrameClassifier {
    params: ClassifierParams,
}

impl FrameClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    /// Mean absolute deviation of a mu-law frame from digital silence.
    ///
    /// Positive zero encodes to 0xFF and negative zero to 0x7F; the wire
    /// byte's sign bit picks which of the two a byte is measured against.
    pub fn frame_deviation(frame: &[u8]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let total: u32 = frame
            .iter()
            .map(|&b| {
                if b & 0x80 != 0 {
                    (MULAW_SILENCE - b) as u32
                } else {
                    (0x7F - b) as u32
                }
            })
            .sum();
        total as f32 / frame.len() as f32
    }

    /// Does this frame carry caller speech?
    pub fn is_speech(&self, frame: &[u8]) -> bool {
        Self::frame_deviation(frame) >= self.params.speech_deviation
    }

    /// Is this frame loud enough to interrupt the agent mid-playback?
    pub fn is_barge_in(&self, frame: &[u8]) -> bool {
        Self::frame_deviation(frame) >= self.params.barge_in_deviation
    }
}

// ---------------------------------------------------------------------------
// Utterance segmentation
// ---------------------------------------------------------------------------

/// Tunable thresholds for utterance segmentation, in 20ms frames.
#[derive(Debug, Clone)]
pub struct SegmenterParams {
    /// Minimum speech frames before a buffer can become an utterance (~0.5s).
    pub min_speech_frames: u32,
    /// Consecutive silence frames that close an utterance (~1.6s).
    pub silence_run_frames: u32,
    /// Hard cap on buffered mu-law bytes (~15s at 8kHz).
    pub max_buffer_bytes: usize,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            min_speech_frames: 25,
            silence_run_frames: 80,
            max_buffer_bytes: 120_000,
        }
    }
}

/// Outcome of feeding one frame into the segmentation buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Still collecting; nothing to dispatch.
    Accumulating,
    /// A complete utterance: buffered mu-law bytes, ready for transcription.
    Utterance(Vec<u8>),
    /// The buffer filled up without enough speech; contents were dropped.
    Discarded,
}

/// Per-call utterance buffer: accumulated mu-law audio plus the speech and
/// silence counters that decide when it is dispatched.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    params: SegmenterParams,
    data: Vec<u8>,
    speech_frames: u32,
    silence_run: u32,
}

impl UtteranceBuffer {
    pub fn new(params: SegmenterParams) -> Self {
        Self {
            params,
            data: Vec::new(),
            speech_frames: 0,
            silence_run: 0,
        }
    }

    /// Append one already-classified frame and report what to do next.
    ///
    /// An utterance closes on the first frame where both conditions hold:
    /// the buffer has seen at least `min_speech_frames` of speech and the
    /// trailing silence run has reached `silence_run_frames`. Hitting the
    /// byte cap dispatches early when enough speech accumulated, otherwise
    /// the buffer is treated as line noise and dropped.
    pub fn push(&mut self, frame: &[u8], is_speech: bool) -> SegmentEvent {
        self.data.extend_from_slice(frame);
        if is_speech {
            self.speech_frames += 1;
            self.silence_run = 0;
        } else {
            self.silence_run += 1;
        }

        let enough_speech = self.speech_frames >= self.params.min_speech_frames;
        if enough_speech && self.silence_run >= self.params.silence_run_frames {
            return SegmentEvent::Utterance(self.take());
        }
        if self.data.len() >= self.params.max_buffer_bytes {
            if enough_speech {
                return SegmentEvent::Utterance(self.take());
            }
            tracing::debug!(
                buffered = self.data.len(),
                speech_frames = self.speech_frames,
                "utterance buffer capped without speech, dropping"
            );
            self.reset();
            return SegmentEvent::Discarded;
        }
        SegmentEvent::Accumulating
    }

    /// Drop everything buffered and zero the counters. Used on barge-in and
    /// after every dispatch.
    pub fn reset(&mut self) {
        self.data.clear();
        self.speech_frames = 0;
        self.silence_run = 0;
    }

    fn take(&mut self) -> Vec<u8> {
        let out = std::mem::take(&mut self.data);
        self.speech_frames = 0;
        self.silence_run = 0;
        out
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn speech_frames(&self) -> u32 {
        self.speech_frames
    }

    pub fn silence_run(&self) -> u32 {
        self.silence_run
    }
}
