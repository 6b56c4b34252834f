// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end call flows through the turn webhook: a complete booking
//! conversation, an emergency mid-flow, and the degradation ladder stepping
//! down under repeated model failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use dispatchline::agent::VoiceAgent;
use dispatchline::booking::InMemoryScheduler;
use dispatchline::call::store::CallStore;
use dispatchline::degradation::{
    BreakerParams, DegradationManager, DegradationParams, ServiceLevel,
};
use dispatchline::services::{ChatMessage, Generation, ResponseModel, ServiceError};
use dispatchline::telephony::webhook::{CallControl, TurnForm, VoiceMarkup};

struct FailingResponder;

#[async_trait]
impl ResponseModel for FailingResponder {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _model: &str,
    ) -> Result<Generation, ServiceError> {
        Err(ServiceError::EmptyResponse { provider: "openai" })
    }
}

struct Harness {
    control: CallControl,
    agent: Arc<VoiceAgent>,
    scheduler: Arc<InMemoryScheduler>,
}

fn harness(responder: Option<Arc<dyn ResponseModel>>) -> Harness {
    let store = Arc::new(CallStore::new(Duration::from_secs(3600)));
    // Zero breaker cooldown: an open breaker still offers a probe slot on
    // every turn, so each scripted failure reaches the model.
    let degradation = Arc::new(DegradationManager::new(DegradationParams {
        breaker: BreakerParams {
            failure_threshold: 3,
            cooldown: Duration::from_millis(0),
        },
        ..DegradationParams::default()
    }));
    let scheduler = Arc::new(InMemoryScheduler::new());
    let mut agent = VoiceAgent::new(store, degradation, Arc::clone(&scheduler) as _);
    if let Some(responder) = responder {
        agent = agent.with_responder(responder);
    }
    let agent = Arc::new(agent);
    let control = CallControl::new(Arc::clone(&agent), Some("+15550123".into()));
    Harness {
        control,
        agent,
        scheduler,
    }
}

fn turn(call_sid: &str, speech: Option<&str>) -> TurnForm {
    TurnForm {
        call_sid: call_sid.into(),
        from: Some("+15550100".into()),
        speech_result: speech.map(str::to_string),
        ..TurnForm::default()
    }
}

/// Say one thing and expect the call to keep listening; returns the reply.
async fn gather(control: &CallControl, call_sid: &str, speech: &str) -> String {
    match control.handle_form(turn(call_sid, Some(speech))).await {
        VoiceMarkup::GatherAfter { text } => text,
        other => panic!("expected the call to continue, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_booking_conversation() {
    let h = harness(None);

    // First contact greets.
    let markup = h.control.handle_form(turn("CA100", None)).await;
    assert!(matches!(markup, VoiceMarkup::GatherAfter { .. }));

    // Issue, address, time, name, confirmation.
    let reply = gather(&h.control, "CA100", "our furnace stopped working overnight").await;
    assert!(reply.contains("service address"));
    let reply = gather(&h.control, "CA100", "742 Maple Avenue").await;
    assert!(reply.contains("day and time"));
    let reply = gather(&h.control, "CA100", "tomorrow at 2pm").await;
    assert!(reply.contains("Who should I put the appointment under"));
    let reply = gather(&h.control, "CA100", "my name is Dana Whitfield").await;
    assert!(reply.contains("Should I book it?"));
    assert!(reply.contains("742 Maple Avenue"));
    let reply = gather(&h.control, "CA100", "yes, book it").await;
    assert!(reply.contains("You're all set"));
    assert_eq!(h.scheduler.appointment_count(), 1);

    // The goodbye ends the call and drops its state.
    let markup = h
        .control
        .handle_form(turn("CA100", Some("thats all, bye")))
        .await;
    assert!(matches!(markup, VoiceMarkup::SayThenHangup { .. }));
    assert!(!h.agent.store().contains("CA100"));
}

#[tokio::test]
async fn test_emergency_interrupts_booking_flow() {
    let h = harness(None);

    h.control.handle_form(turn("CA200", None)).await;
    gather(&h.control, "CA200", "I need someone to look at my water heater").await;
    // Mid-flow, the emergency wins over the address question.
    let markup = h
        .control
        .handle_form(turn("CA200", Some("wait, theres a gas smell, help now")))
        .await;
    match markup {
        VoiceMarkup::SayThenDial { text, number } => {
            assert!(text.contains("step outside"));
            assert_eq!(number, "+15550123");
        }
        other => panic!("expected a transfer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_model_failures_walk_the_ladder_down() {
    let h = harness(Some(Arc::new(FailingResponder)));

    h.control.handle_form(turn("CA300", None)).await;
    assert_eq!(h.agent.degradation().level(), ServiceLevel::FullAi);

    // Small talk routes to the model; each failed generation still gets a
    // scripted reply but feeds the failure streak.
    for _ in 0..3 {
        gather(&h.control, "CA300", "what are your weekend hours").await;
    }
    assert_eq!(h.agent.degradation().level(), ServiceLevel::FastAi);

    for _ in 0..3 {
        gather(&h.control, "CA300", "do you service my neighborhood").await;
    }
    assert_eq!(h.agent.degradation().level(), ServiceLevel::RuleBased);

    // The rule tier never touches the model, so the level holds steady.
    let reply = gather(&h.control, "CA300", "tell me about your company").await;
    assert!(reply.contains("book a service visit"));
    assert_eq!(h.agent.degradation().level(), ServiceLevel::RuleBased);
}
