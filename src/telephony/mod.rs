// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Telephony transports: the streaming media bridge and the turn webhook.
//!
//! Two ways a call reaches the agent. The bridge owns raw audio over a
//! WebSocket and does its own segmentation and synthesis; the webhook leans
//! on the telco's recognizer and answers with voice markup. They share the
//! agent, the call store, and the degradation ladder, so a call can be
//! served by either surface without the rest of the system caring.

pub mod bridge;
pub mod events;
pub mod webhook;

pub use bridge::{BridgeExit, BridgeParams, StreamBridge};
pub use events::{parse_event, StreamEvent};
pub use webhook::{CallControl, TurnForm, VoiceMarkup};
