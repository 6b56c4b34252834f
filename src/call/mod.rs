// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Call state: the per-call conversation/booking record and the concurrent
//! store that owns one per active call.

pub mod state;
pub mod store;

pub use state::{
    BookingData, BookingStage, BookingUpdate, CallState, ConversationTurn, FlowError, Intent,
    Role, ServiceCategory, Urgency, MAX_FRUSTRATION,
};
pub use store::{CallStore, DEFAULT_CALL_TTL};
