// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio subsystem: mu-law codec, WAV containers, frame classification,
//! and utterance segmentation.

pub mod classifier;
pub mod codec;

pub use classifier::{
    ClassifierParams, FrameClassifier, SegmentEvent, SegmenterParams, UtteranceBuffer,
};
