// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports for convenient use of dispatchline.
//!
//! ```
//! use dispatchline::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::agent::{AgentParams, AgentReply, CallAction, TransferReason, VoiceAgent};
pub use crate::audio::{
    ClassifierParams, FrameClassifier, SegmentEvent, SegmenterParams, UtteranceBuffer,
};
pub use crate::booking::{
    Appointment, BookingError, BookingRequest, InMemoryScheduler, Scheduler,
};
pub use crate::call::state::{BookingStage, CallState, Intent, ServiceCategory, Urgency};
pub use crate::call::store::CallStore;
pub use crate::degradation::{
    DegradationManager, DegradationParams, LevelConfig, ProviderKind, ServiceLevel,
};
pub use crate::services::{
    ChatMessage, ResponseModel, ServiceError, Synthesizer, Transcriber, with_budget,
};
pub use crate::telephony::{BridgeExit, BridgeParams, CallControl, StreamBridge, VoiceMarkup};
pub use crate::triage::{EmergencyCategory, EmergencyClassifier, EmergencyVerdict};
