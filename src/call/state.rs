// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-call conversation and booking state.
//!
//! One `CallState` exists per active call, owned by the [`CallStore`] and
//! mutated only by that call's task. The booking flow is a strict stage
//! machine: stages advance one step at a time through the collection
//! sequence or reset to `None`; completion is only legal from `Confirming`
//! with every required detail filled in. Everything the caller said, every
//! detected intent, and the emergency/frustration signals accumulate here.
//!
//! [`CallStore`]: crate::call::CallStore

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::booking::Appointment;
use crate::utils::now_stamp;

/// Ceiling for the caller frustration score.
pub const MAX_FRUSTRATION: u8 = 5;

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Caller,
    Agent,
}

/// One utterance in the conversation, immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// Caller intents the deterministic detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BookService,
    Reschedule,
    Cancel,
    Emergency,
    Question,
    Goodbye,
    Operator,
}

// ---------------------------------------------------------------------------
// Booking flow
// ---------------------------------------------------------------------------

/// Where the booking conversation currently is.
///
/// The only legal moves are one step forward through the collection
/// sequence, or a reset back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStage {
    None,
    CollectingIssue,
    CollectingLocation,
    CollectingTime,
    CollectingContact,
    Confirming,
}

impl BookingStage {
    /// The next stage in the collection sequence, if any.
    pub fn next(self) -> Option<BookingStage> {
        match self {
            BookingStage::None => None,
            BookingStage::CollectingIssue => Some(BookingStage::CollectingLocation),
            BookingStage::CollectingLocation => Some(BookingStage::CollectingTime),
            BookingStage::CollectingTime => Some(BookingStage::CollectingContact),
            BookingStage::CollectingContact => Some(BookingStage::Confirming),
            BookingStage::Confirming => None,
        }
    }
}

/// Trade the agent can dispatch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Heating,
    Cooling,
    Plumbing,
    Electrical,
    General,
}

/// The booking details collected so far. Fields stay `None` until the
/// matching stage fills them in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingData {
    pub issue: Option<String>,
    pub category: Option<ServiceCategory>,
    pub location: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
}

/// A typed partial update merged into [`BookingData`].
///
/// Only `Some` fields overwrite; everything else keeps its value. A field
/// this struct does not declare cannot be smuggled in, which is the point.
#[derive(Debug, Clone, Default)]
pub struct BookingUpdate {
    pub issue: Option<String>,
    pub category: Option<ServiceCategory>,
    pub location: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
}

/// Caller urgency, escalated by triage and never lowered automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    High,
    Emergency,
}

/// Illegal booking-flow transitions.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("booking can only complete from the confirming stage, not {stage:?}")]
    NotConfirming { stage: BookingStage },
    #[error("booking is missing required details: {missing}")]
    MissingDetails { missing: String },
}

// ---------------------------------------------------------------------------
// Call state
// ---------------------------------------------------------------------------

/// Everything known about one active call.
#[derive(Debug, Clone)]
pub struct CallState {
    pub call_id: String,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,

    pub booking_stage: BookingStage,
    pub booking_data: BookingData,
    /// Failed tries within the current conversation: slot conflicts and
    /// rejected confirmations. Cleared only when a fresh flow starts.
    pub booking_attempts: u32,

    /// Business facts that outlive the booking flow they were learned in.
    pub issue: Option<String>,
    pub category: Option<ServiceCategory>,
    pub location: Option<String>,
    pub urgency: Urgency,

    pub has_appointment: bool,
    pub appointment_id: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    /// Caller asked to move the appointment but has not named a new slot yet.
    pub pending_reschedule: bool,

    pub intents_history: Vec<Intent>,
    pub conversation_history: Vec<ConversationTurn>,

    pub is_emergency: bool,
    pub emergency_type: Option<String>,
    pub frustration_level: u8,
    /// Consecutive empty/unintelligible caller turns.
    pub reprompts: u32,

    pub call_started: String,
    pub last_activity: Instant,
}

impl CallState {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            caller_name: None,
            caller_phone: None,
            booking_stage: BookingStage::None,
            booking_data: BookingData::default(),
            booking_attempts: 0,
            issue: None,
            category: None,
            location: None,
            urgency: Urgency::Normal,
            has_appointment: false,
            appointment_id: None,
            appointment_date: None,
            appointment_time: None,
            pending_reschedule: false,
            intents_history: Vec::new(),
            conversation_history: Vec::new(),
            is_emergency: false,
            emergency_type: None,
            frustration_level: 0,
            reprompts: 0,
            call_started: now_stamp(),
            last_activity: Instant::now(),
        }
    }

    /// Record activity so TTL cleanup leaves this call alone.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// How long since the call last did anything.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Append a turn, folding a newly seen intent into the history.
    pub fn add_turn(
        &mut self,
        role: Role,
        text: impl Into<String>,
        intent: Option<Intent>,
        emotion: Option<String>,
    ) {
        if let Some(intent) = intent {
            if !self.intents_history.contains(&intent) {
                self.intents_history.push(intent);
            }
        }
        self.conversation_history.push(ConversationTurn {
            role,
            text: text.into(),
            timestamp: now_stamp(),
            intent,
            emotion,
        });
        self.touch();
    }

    /// The most recent `n` turns, oldest first, for the generation context.
    pub fn history_window(&self, n: usize) -> &[ConversationTurn] {
        let len = self.conversation_history.len();
        &self.conversation_history[len.saturating_sub(n)..]
    }

    // -- booking flow -------------------------------------------------------

    /// Begin collecting booking details from scratch.
    pub fn start_booking_flow(&mut self) {
        self.booking_stage = BookingStage::CollectingIssue;
        self.booking_data = BookingData::default();
        self.booking_attempts = 0;
        self.touch();
    }

    /// Merge collected details; facts about the job itself are mirrored to
    /// the call-level fields so they survive a flow reset.
    pub fn update_booking_data(&mut self, update: BookingUpdate) {
        let BookingUpdate {
            issue,
            category,
            location,
            date,
            time,
            contact_name,
            contact_phone,
        } = update;
        if let Some(issue) = issue {
            self.issue = Some(issue.clone());
            self.booking_data.issue = Some(issue);
        }
        if let Some(category) = category {
            self.category = Some(category);
            self.booking_data.category = Some(category);
        }
        if let Some(location) = location {
            self.location = Some(location.clone());
            self.booking_data.location = Some(location);
        }
        if let Some(date) = date {
            self.booking_data.date = Some(date);
        }
        if let Some(time) = time {
            self.booking_data.time = Some(time);
        }
        if let Some(name) = contact_name {
            self.caller_name = Some(name.clone());
            self.booking_data.contact_name = Some(name);
        }
        if let Some(phone) = contact_phone {
            self.caller_phone = Some(phone.clone());
            self.booking_data.contact_phone = Some(phone);
        }
        self.touch();
    }

    /// Move one step along the collection sequence. Outside the collecting
    /// stages this is a no-op; the flow cannot overrun `Confirming`.
    pub fn advance_booking_stage(&mut self) -> BookingStage {
        if let Some(next) = self.booking_stage.next() {
            tracing::debug!(
                call_id = %self.call_id,
                from = ?self.booking_stage,
                to = ?next,
                "booking stage advanced"
            );
            self.booking_stage = next;
        }
        self.touch();
        self.booking_stage
    }

    /// Note a failed try (slot conflict, rejected confirmation).
    pub fn record_booking_attempt(&mut self) -> u32 {
        self.booking_attempts += 1;
        self.booking_attempts
    }

    /// Finish the flow with a confirmed appointment.
    ///
    /// Only legal from `Confirming` with issue, location, date, time, and a
    /// contact name all collected; anything else is a [`FlowError`].
    pub fn complete_booking_flow(&mut self, appointment: &Appointment) -> Result<(), FlowError> {
        if self.booking_stage != BookingStage::Confirming {
            return Err(FlowError::NotConfirming {
                stage: self.booking_stage,
            });
        }
        let mut missing = Vec::new();
        if self.booking_data.issue.is_none() {
            missing.push("issue");
        }
        if self.booking_data.location.is_none() {
            missing.push("location");
        }
        if self.booking_data.date.is_none() {
            missing.push("date");
        }
        if self.booking_data.time.is_none() {
            missing.push("time");
        }
        if self.booking_data.contact_name.is_none() {
            missing.push("contact name");
        }
        if !missing.is_empty() {
            return Err(FlowError::MissingDetails {
                missing: missing.join(", "),
            });
        }

        self.has_appointment = true;
        self.appointment_id = Some(appointment.id.clone());
        self.appointment_date = Some(appointment.date.clone());
        self.appointment_time = Some(appointment.time.clone());
        self.booking_stage = BookingStage::None;
        self.booking_data = BookingData::default();
        self.touch();
        Ok(())
    }

    /// Abandon the flow. Collected call-level facts and the attempt counter
    /// survive; the stage and in-flight details do not.
    pub fn reset_booking_flow(&mut self) {
        self.booking_stage = BookingStage::None;
        self.booking_data = BookingData::default();
        self.touch();
    }

    // -- emergency & frustration -------------------------------------------

    /// Flag the call as an emergency. One-way: the first category sticks
    /// and urgency pins to `Emergency`.
    pub fn set_emergency(&mut self, kind: impl Into<String>) {
        if !self.is_emergency {
            self.emergency_type = Some(kind.into());
        }
        self.is_emergency = true;
        self.urgency = Urgency::Emergency;
        self.touch();
    }

    /// Raise urgency, never lowering it.
    pub fn escalate_urgency(&mut self, to: Urgency) {
        if to > self.urgency {
            self.urgency = to;
        }
    }

    pub fn increment_frustration(&mut self, by: u8) -> u8 {
        self.frustration_level = self
            .frustration_level
            .saturating_add(by)
            .min(MAX_FRUSTRATION);
        self.frustration_level
    }

    pub fn reset_frustration(&mut self) {
        self.frustration_level = 0;
    }

    pub fn record_reprompt(&mut self) -> u32 {
        self.reprompts += 1;
        self.reprompts
    }

    pub fn clear_reprompts(&mut self) {
        self.reprompts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment() -> Appointment {
        Appointment {
            id: "appt-1".into(),
            date: "tomorrow".into(),
            time: "2 pm".into(),
            location: "12 Elm St".into(),
            category: ServiceCategory::Heating,
        }
    }

    fn filled(state: &mut CallState) {
        state.update_booking_data(BookingUpdate {
            issue: Some("furnace is dead".into()),
            category: Some(ServiceCategory::Heating),
            location: Some("12 Elm St".into()),
            date: Some("tomorrow".into()),
            time: Some("2 pm".into()),
            contact_name: Some("Pat".into()),
            ..Default::default()
        });
    }

    #[test]
    fn test_stage_sequence_advances_one_step() {
        let mut state = CallState::new("call-1");
        state.start_booking_flow();
        assert_eq!(state.booking_stage, BookingStage::CollectingIssue);
        assert_eq!(state.advance_booking_stage(), BookingStage::CollectingLocation);
        assert_eq!(state.advance_booking_stage(), BookingStage::CollectingTime);
        assert_eq!(state.advance_booking_stage(), BookingStage::CollectingContact);
        assert_eq!(state.advance_booking_stage(), BookingStage::Confirming);
        // No stage past Confirming.
        assert_eq!(state.advance_booking_stage(), BookingStage::Confirming);
    }

    #[test]
    fn test_complete_requires_confirming_stage() {
        let mut state = CallState::new("call-1");
        state.start_booking_flow();
        filled(&mut state);
        // Still at CollectingIssue: the sequence was not traversed.
        let err = state.complete_booking_flow(&appointment()).unwrap_err();
        assert!(matches!(err, FlowError::NotConfirming { .. }));
        assert!(!state.has_appointment);
    }

    #[test]
    fn test_complete_requires_all_details() {
        let mut state = CallState::new("call-1");
        state.start_booking_flow();
        for _ in 0..4 {
            state.advance_booking_stage();
        }
        assert_eq!(state.booking_stage, BookingStage::Confirming);
        let err = state.complete_booking_flow(&appointment()).unwrap_err();
        assert!(matches!(err, FlowError::MissingDetails { .. }));
    }

    #[test]
    fn test_complete_after_full_traversal() {
        let mut state = CallState::new("call-1");
        state.start_booking_flow();
        filled(&mut state);
        for _ in 0..4 {
            state.advance_booking_stage();
        }
        state.complete_booking_flow(&appointment()).unwrap();
        assert!(state.has_appointment);
        assert_eq!(state.booking_stage, BookingStage::None);
        assert_eq!(state.appointment_id.as_deref(), Some("appt-1"));
        // The job facts survive the flow reset.
        assert_eq!(state.issue.as_deref(), Some("furnace is dead"));
        assert_eq!(state.location.as_deref(), Some("12 Elm St"));
    }

    #[test]
    fn test_frustration_clamped_to_ceiling() {
        let mut state = CallState::new("call-1");
        for _ in 0..10 {
            state.increment_frustration(2);
        }
        assert_eq!(state.frustration_level, MAX_FRUSTRATION);
        state.reset_frustration();
        assert_eq!(state.frustration_level, 0);
        state.increment_frustration(200);
        assert_eq!(state.frustration_level, MAX_FRUSTRATION);
    }

    #[test]
    fn test_intents_deduplicated_in_order() {
        let mut state = CallState::new("call-1");
        state.add_turn(Role::Caller, "book me", Some(Intent::BookService), None);
        state.add_turn(Role::Caller, "please book", Some(Intent::BookService), None);
        state.add_turn(Role::Caller, "bye", Some(Intent::Goodbye), None);
        assert_eq!(
            state.intents_history,
            vec![Intent::BookService, Intent::Goodbye]
        );
        assert_eq!(state.conversation_history.len(), 3);
    }

    #[test]
    fn test_emergency_is_one_way() {
        let mut state = CallState::new("call-1");
        state.set_emergency("gas_leak");
        state.set_emergency("fire");
        assert!(state.is_emergency);
        assert_eq!(state.emergency_type.as_deref(), Some("gas_leak"));
        assert_eq!(state.urgency, Urgency::Emergency);
    }

    #[test]
    fn test_urgency_never_lowers() {
        let mut state = CallState::new("call-1");
        state.escalate_urgency(Urgency::High);
        state.escalate_urgency(Urgency::Normal);
        assert_eq!(state.urgency, Urgency::High);
    }

    #[test]
    fn test_reset_keeps_attempts_start_clears_them() {
        let mut state = CallState::new("call-1");
        state.start_booking_flow();
        state.record_booking_attempt();
        state.record_booking_attempt();
        state.reset_booking_flow();
        assert_eq!(state.booking_attempts, 2);
        assert_eq!(state.booking_stage, BookingStage::None);
        state.start_booking_flow();
        assert_eq!(state.booking_attempts, 0);
    }

    #[test]
    fn test_history_window_takes_tail() {
        let mut state = CallState::new("call-1");
        for i in 0..12 {
            state.add_turn(Role::Caller, format!("turn {i}"), None, None);
        }
        let window = state.history_window(5);
        assert_eq!(window.len(), 5);
        assert_eq!(window[0].text, "turn 7");
        assert_eq!(window[4].text, "turn 11");
    }
}
