// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The voice agent: one caller turn in, one reply out.
//!
//! Both call surfaces (the streaming bridge and the turn webhook) hand
//! their transcripts to [`VoiceAgent::handle_turn`]. The turn is planned
//! synchronously under the call-store lock, the single async follow-up the
//! plan names (model call, slot check, booking write) runs without any lock
//! held, and the spoken reply is recorded afterwards. Model outcomes feed
//! the degradation manager here so neither transport has to remember to.

pub mod responses;
pub mod script;

use std::sync::Arc;

use crate::booking::{BookingError, BookingRequest, Scheduler};
use crate::call::state::{Intent, Role};
use crate::call::store::CallStore;
use crate::degradation::{DegradationManager, ProviderKind, ServiceLevel};
use crate::services::{with_budget, ResponseModel};
use crate::triage::EmergencyClassifier;

pub use script::{GenerationSeed, TurnPlan};

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Why a call is being handed to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReason {
    Emergency,
    OperatorRequest,
    Frustrated,
    RepeatedMisunderstanding,
    BookingTrouble,
    ServiceDegraded,
}

impl TransferReason {
    pub fn label(self) -> &'static str {
        match self {
            TransferReason::Emergency => "emergency",
            TransferReason::OperatorRequest => "operator_request",
            TransferReason::Frustrated => "frustrated",
            TransferReason::RepeatedMisunderstanding => "repeated_misunderstanding",
            TransferReason::BookingTrouble => "booking_trouble",
            TransferReason::ServiceDegraded => "service_degraded",
        }
    }
}

/// What the transport should do once the reply has been spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Keep listening.
    Continue,
    /// Hand the call to a person.
    Transfer(TransferReason),
    /// End the call.
    Hangup,
}

/// One spoken reply plus the follow-up call-control action.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub action: CallAction,
}

impl AgentReply {
    fn speak(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: CallAction::Continue,
        }
    }

    fn transfer(text: impl Into<String>, reason: TransferReason) -> Self {
        Self {
            text: text.into(),
            action: CallAction::Transfer(reason),
        }
    }

    fn hangup(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: CallAction::Hangup,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Tunables that shape the conversation itself, not the infrastructure.
#[derive(Debug, Clone)]
pub struct AgentParams {
    /// Name the agent answers the phone with.
    pub business_name: String,
    /// Turns of history handed to the model at the full tier.
    pub history_window: usize,
    /// Frustration level at which the call goes to a person.
    pub frustration_transfer_at: u8,
    /// Failed booking tries before the flow goes to a person.
    pub booking_attempt_cap: u32,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            business_name: "Beacon Home Services".into(),
            history_window: 10,
            frustration_transfer_at: 4,
            booking_attempt_cap: 3,
        }
    }
}

/// Orchestrates one call's conversation across every service tier.
pub struct VoiceAgent {
    store: Arc<CallStore>,
    degradation: Arc<DegradationManager>,
    scheduler: Arc<dyn Scheduler>,
    /// `None` runs scripted-only, the same shape as the rule-based tier.
    responder: Option<Arc<dyn ResponseModel>>,
    triage: EmergencyClassifier,
    params: AgentParams,
}

impl VoiceAgent {
    pub fn new(
        store: Arc<CallStore>,
        degradation: Arc<DegradationManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            store,
            degradation,
            scheduler,
            responder: None,
            triage: EmergencyClassifier::default(),
            params: AgentParams::default(),
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn ResponseModel>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_params(mut self, params: AgentParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_triage(mut self, triage: EmergencyClassifier) -> Self {
        self.triage = triage;
        self
    }

    pub fn store(&self) -> &CallStore {
        &self.store
    }

    pub fn degradation(&self) -> &DegradationManager {
        &self.degradation
    }

    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    /// First words the caller hears. Creates the call state.
    pub fn greeting_reply(&self, call_id: &str, caller_phone: Option<&str>) -> AgentReply {
        let text = responses::greeting(&self.params.business_name);
        self.store.with_state(call_id, |state| {
            if state.caller_phone.is_none() {
                state.caller_phone = caller_phone.map(str::to_string);
            }
            state.add_turn(Role::Agent, &text, None, None);
        });
        AgentReply::speak(text)
    }

    /// The caller pressed 0, the universal "get me a person" key.
    pub fn operator_reply(&self, call_id: &str) -> AgentReply {
        self.store.with_state(call_id, |state| {
            state.add_turn(Role::Caller, "[pressed 0]", Some(Intent::Operator), None);
            state.add_turn(Role::Agent, responses::OPERATOR_TRANSFER, None, None);
        });
        AgentReply::transfer(responses::OPERATOR_TRANSFER, TransferReason::OperatorRequest)
    }

    /// Plan and execute one caller turn.
    pub async fn handle_turn(
        &self,
        call_id: &str,
        utterance: &str,
        caller_phone: Option<&str>,
    ) -> AgentReply {
        let level = self.degradation.level();

        // The floor tier does not converse at all.
        if level == ServiceLevel::HumanTransfer {
            self.store.with_state(call_id, |state| {
                if state.caller_phone.is_none() {
                    state.caller_phone = caller_phone.map(str::to_string);
                }
                if !utterance.trim().is_empty() {
                    state.add_turn(Role::Caller, utterance.trim(), None, None);
                }
                state.add_turn(Role::Agent, responses::DEGRADED_TRANSFER, None, None);
            });
            return AgentReply::transfer(
                responses::DEGRADED_TRANSFER,
                TransferReason::ServiceDegraded,
            );
        }

        let verdict = self.triage.classify(utterance);
        let plan = self.store.with_state(call_id, |state| {
            if state.caller_phone.is_none() {
                state.caller_phone = caller_phone.map(str::to_string);
            }
            script::plan_turn(state, utterance, &verdict, level, &self.params)
        });

        let reply = self.execute(call_id, plan, level).await;
        self.store.with_state(call_id, |state| {
            state.add_turn(Role::Agent, &reply.text, None, None);
        });
        if reply.action != CallAction::Continue {
            tracing::info!(
                call_id = %call_id,
                action = ?reply.action,
                "call leaving agent control"
            );
        }
        reply
    }

    async fn execute(&self, call_id: &str, plan: TurnPlan, level: ServiceLevel) -> AgentReply {
        match plan {
            TurnPlan::Speak { text } => AgentReply::speak(text),
            TurnPlan::Transfer { text, reason } => AgentReply::transfer(text, reason),
            TurnPlan::Hangup { text } => AgentReply::hangup(text),
            TurnPlan::Generate { seed } => self.generate(call_id, seed, level).await,
            TurnPlan::CheckSlot { date, time } => self.check_slot(call_id, date, time).await,
            TurnPlan::Book { request } => self.book(call_id, *request).await,
            TurnPlan::Reschedule {
                name,
                location,
                date,
                time,
            } => self.reschedule(call_id, name, location, date, time).await,
            TurnPlan::Cancel {
                name,
                location,
                date,
                time,
            } => self.cancel(call_id, name, location, date, time).await,
        }
    }

    async fn generate(&self, call_id: &str, seed: GenerationSeed, level: ServiceLevel) -> AgentReply {
        let config = self.degradation.config_for(level);
        let (Some(model), Some(responder)) = (config.llm_model.clone(), self.responder.clone())
        else {
            return AgentReply::speak(seed.fallback);
        };
        if !self
            .degradation
            .health()
            .breaker(ProviderKind::Llm)
            .allow_attempt()
        {
            tracing::debug!(call_id = %call_id, "llm breaker open, speaking scripted fallback");
            return AgentReply::speak(seed.fallback);
        }

        match with_budget("llm", config.reply_budget, responder.generate(&seed.messages, &model))
            .await
        {
            Ok(generation) => {
                self.degradation.record_provider_success(ProviderKind::Llm);
                tracing::debug!(
                    call_id = %call_id,
                    model = %model,
                    prompt_tokens = generation.prompt_tokens,
                    completion_tokens = generation.completion_tokens,
                    cost_usd = generation.estimated_cost_usd,
                    "reply generated"
                );
                AgentReply::speak(generation.text)
            }
            Err(err) => {
                self.degradation
                    .record_provider_failure(ProviderKind::Llm, err.kind_label());
                tracing::warn!(
                    call_id = %call_id,
                    error = %err,
                    "generation failed, speaking scripted fallback"
                );
                AgentReply::speak(seed.fallback)
            }
        }
    }

    async fn check_slot(&self, call_id: &str, date: String, time: String) -> AgentReply {
        let location = self
            .store
            .peek(call_id, |state| state.booking_data.location.clone())
            .flatten()
            .unwrap_or_default();
        match self.scheduler.check_availability(&date, &time, &location).await {
            Ok(true) => {
                let text = self.store.with_state(call_id, |state| {
                    state.advance_booking_stage();
                    // Contact may already be on file after a conflict restart.
                    if state.booking_data.contact_name.is_some() {
                        state.advance_booking_stage();
                        responses::confirm_summary(&state.booking_data)
                    } else {
                        responses::CONTACT_PROMPT.to_string()
                    }
                });
                AgentReply::speak(text)
            }
            Ok(false) => {
                let attempts = self
                    .store
                    .with_state(call_id, |state| state.record_booking_attempt());
                if attempts >= self.params.booking_attempt_cap {
                    return AgentReply::transfer(
                        responses::BOOKING_TROUBLE_TRANSFER,
                        TransferReason::BookingTrouble,
                    );
                }
                AgentReply::speak(responses::SLOT_TAKEN)
            }
            Err(err) => {
                tracing::warn!(call_id = %call_id, error = %err, "availability check failed");
                AgentReply::speak(responses::APOLOGY_RETRY)
            }
        }
    }

    async fn book(&self, call_id: &str, request: BookingRequest) -> AgentReply {
        match self.scheduler.create_booking(&request).await {
            Ok(appointment) => {
                let text = self.store.with_state(call_id, |state| {
                    if let Err(err) = state.complete_booking_flow(&appointment) {
                        // The appointment exists regardless; keep state and
                        // caller consistent with that fact.
                        tracing::error!(
                            call_id = %call_id,
                            error = %err,
                            "flow completion rejected after successful booking"
                        );
                    }
                    responses::booked_line(&appointment)
                });
                AgentReply::speak(text)
            }
            Err(BookingError::SlotTaken { .. }) => {
                // Lost a race for the slot between the check and the write.
                let text = self.store.with_state(call_id, |state| {
                    state.record_booking_attempt();
                    script::resume_time_collection(state);
                    responses::SLOT_TAKEN.to_string()
                });
                AgentReply::speak(text)
            }
            Err(err) => {
                tracing::error!(call_id = %call_id, error = %err, "booking backend error");
                let attempts = self
                    .store
                    .with_state(call_id, |state| state.record_booking_attempt());
                if attempts >= self.params.booking_attempt_cap {
                    return AgentReply::transfer(
                        responses::BOOKING_TROUBLE_TRANSFER,
                        TransferReason::BookingTrouble,
                    );
                }
                AgentReply::speak(responses::APOLOGY_RETRY)
            }
        }
    }

    async fn reschedule(
        &self,
        call_id: &str,
        name: String,
        location: String,
        date: String,
        time: String,
    ) -> AgentReply {
        match self
            .scheduler
            .reschedule_booking(&name, &location, &date, &time)
            .await
        {
            Ok(appointment) => {
                let text = responses::rescheduled_line(&appointment);
                self.store.with_state(call_id, |state| {
                    state.appointment_id = Some(appointment.id.clone());
                    state.appointment_date = Some(appointment.date.clone());
                    state.appointment_time = Some(appointment.time.clone());
                });
                AgentReply::speak(text)
            }
            Err(BookingError::SlotTaken { .. }) => {
                self.store
                    .with_state(call_id, |state| state.pending_reschedule = true);
                AgentReply::speak(responses::SLOT_TAKEN)
            }
            Err(BookingError::NotFound { .. }) => AgentReply::transfer(
                responses::BOOKING_TROUBLE_TRANSFER,
                TransferReason::BookingTrouble,
            ),
            Err(err) => {
                tracing::error!(call_id = %call_id, error = %err, "reschedule failed");
                self.store
                    .with_state(call_id, |state| state.pending_reschedule = true);
                AgentReply::speak(responses::APOLOGY_RETRY)
            }
        }
    }

    async fn cancel(
        &self,
        call_id: &str,
        name: String,
        location: String,
        date: String,
        time: String,
    ) -> AgentReply {
        match self.scheduler.cancel_booking(&name, &location).await {
            Ok(()) => {
                self.store.with_state(call_id, |state| {
                    state.has_appointment = false;
                    state.appointment_id = None;
                    state.appointment_date = None;
                    state.appointment_time = None;
                });
                AgentReply::speak(responses::cancelled_line(&date, &time))
            }
            Err(BookingError::NotFound { .. }) => AgentReply::transfer(
                responses::BOOKING_TROUBLE_TRANSFER,
                TransferReason::BookingTrouble,
            ),
            Err(err) => {
                tracing::error!(call_id = %call_id, error = %err, "cancel failed");
                AgentReply::speak(responses::APOLOGY_RETRY)
            }
        }
    }
}
