// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Dispatchline - real-time call orchestration for a home-services phone line.
//!
//! Dispatchline answers the phone for a home-services business. It carries
//! each call through a deterministic booking conversation, screens every
//! caller turn for gas/CO/fire/flood emergencies, and degrades gracefully
//! through four service tiers when model providers misbehave, down to handing
//! the call to a person. Calls arrive either as a raw media stream (the
//! barge-in capable audio bridge) or as turn-by-turn webhooks.

pub mod agent;
pub mod audio;
pub mod booking;
pub mod call;
pub mod degradation;
pub mod prelude;
pub mod services;
pub mod telephony;
pub mod triage;
pub mod utils;
