// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deterministic conversation script.
//!
//! Every caller turn is planned here, synchronously, under the call-store
//! lock. The plan names at most one async follow-up (model call, slot check,
//! booking write) for the agent to run afterwards; nothing in this module
//! touches the network. The same script drives every service level, so a
//! degraded call follows the exact booking path a healthy one does. It just
//! loses the model-written small talk.

use crate::booking::BookingRequest;
use crate::call::state::{
    BookingStage, BookingUpdate, CallState, Intent, Role, ServiceCategory, Urgency,
};
use crate::degradation::ServiceLevel;
use crate::services::ChatMessage;
use crate::triage::{self, EmergencyVerdict};

use super::responses;
use super::{AgentParams, TransferReason};

// ---------------------------------------------------------------------------
// Turn plans
// ---------------------------------------------------------------------------

/// What the agent should do with the turn it just planned.
#[derive(Debug)]
pub enum TurnPlan {
    /// Scripted line; nothing async to run.
    Speak { text: String },
    /// Ask the response model, falling back to the seeded line on failure.
    Generate { seed: GenerationSeed },
    /// Check slot availability before moving past time collection.
    CheckSlot { date: String, time: String },
    /// Confirmation accepted; create the booking.
    Book { request: Box<BookingRequest> },
    /// Move the appointment booked earlier in this call to a new slot.
    Reschedule {
        name: String,
        location: String,
        date: String,
        time: String,
    },
    /// Cancel the appointment booked earlier in this call.
    Cancel {
        name: String,
        location: String,
        date: String,
        time: String,
    },
    /// Speak the line, then hand the call to a person.
    Transfer { text: String, reason: TransferReason },
    /// Speak the line, then end the call.
    Hangup { text: String },
}

/// Prompt material for one model call, assembled under the lock so the
/// request needs no further state access.
#[derive(Debug)]
pub struct GenerationSeed {
    pub messages: Vec<ChatMessage>,
    /// Spoken instead if the model call fails or times out.
    pub fallback: String,
}

fn speak(text: impl Into<String>) -> TurnPlan {
    TurnPlan::Speak { text: text.into() }
}

fn transfer(text: impl Into<String>, reason: TransferReason) -> TurnPlan {
    TurnPlan::Transfer {
        text: text.into(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Turn planning
// ---------------------------------------------------------------------------

/// Plan one caller turn. Mutates `state` (history, flow stage, collected
/// fields) and returns the plan; the agent applies async results afterwards.
pub fn plan_turn(
    state: &mut CallState,
    utterance: &str,
    verdict: &EmergencyVerdict,
    level: ServiceLevel,
    params: &AgentParams,
) -> TurnPlan {
    let trimmed = utterance.trim();

    // Empty or unintelligible turn: reprompt once, then hand off rather
    // than loop forever.
    if trimmed.is_empty() {
        return if state.record_reprompt() >= 2 {
            transfer(
                responses::REPROMPT_TRANSFER,
                TransferReason::RepeatedMisunderstanding,
            )
        } else {
            speak(responses::REPROMPT)
        };
    }
    state.clear_reprompts();

    let intent = detect_intent(trimmed);
    let frustrated = note_frustration(state, trimmed);
    let recorded_intent = if verdict.is_emergency {
        Some(Intent::Emergency)
    } else {
        intent
    };
    let emotion = frustrated.then(|| "frustrated".to_string());
    state.add_turn(Role::Caller, trimmed, recorded_intent, emotion);

    // Emergencies preempt everything, including an active booking flow.
    if verdict.is_emergency {
        state.set_emergency(verdict.category.label());
        return transfer(
            responses::emergency_line(verdict.category),
            TransferReason::Emergency,
        );
    }
    if verdict.confidence >= 0.5 {
        state.escalate_urgency(Urgency::High);
    }

    if frustrated && state.frustration_level >= params.frustration_transfer_at {
        return transfer(responses::FRUSTRATION_TRANSFER, TransferReason::Frustrated);
    }

    match intent {
        Some(Intent::Goodbye) => {
            return TurnPlan::Hangup {
                text: responses::GOODBYE.into(),
            }
        }
        Some(Intent::Operator) => {
            return transfer(responses::OPERATOR_TRANSFER, TransferReason::OperatorRequest)
        }
        // "cancel" mid-flow means "stop what you're reading back", which the
        // stage handlers deal with, so these only apply between flows.
        Some(Intent::Cancel) if state.booking_stage == BookingStage::None => {
            return plan_cancel(state)
        }
        Some(Intent::Reschedule) if state.booking_stage == BookingStage::None => {
            return plan_reschedule(state, trimmed)
        }
        _ => {}
    }

    // A named slot while a reschedule is pending belongs to the reschedule.
    if state.pending_reschedule {
        return plan_reschedule(state, trimmed);
    }

    match state.booking_stage {
        BookingStage::None => plan_outside_flow(state, trimmed, intent, level, params),
        BookingStage::CollectingIssue => plan_issue(state, trimmed),
        BookingStage::CollectingLocation => plan_location(state, trimmed),
        BookingStage::CollectingTime => plan_time(state, trimmed),
        BookingStage::CollectingContact => plan_contact(state, trimmed),
        BookingStage::Confirming => plan_confirmation(state, trimmed, params),
    }
}

fn plan_outside_flow(
    state: &mut CallState,
    text: &str,
    intent: Option<Intent>,
    level: ServiceLevel,
    params: &AgentParams,
) -> TurnPlan {
    let booking_cue = matches!(intent, Some(Intent::BookService)) || category_for(text).is_some();
    if booking_cue {
        state.start_booking_flow();
        if let Some(category) = category_for(text) {
            // The trigger sentence already describes the problem.
            state.update_booking_data(BookingUpdate {
                issue: Some(text.to_string()),
                category: Some(category),
                ..Default::default()
            });
            state.advance_booking_stage();
            return speak(responses::LOCATION_PROMPT);
        }
        return speak(responses::ISSUE_PROMPT);
    }

    // After a completed booking, "no, that's it" wraps the call up.
    if state.has_appointment && negative(text) {
        return TurnPlan::Hangup {
            text: responses::GOODBYE.into(),
        };
    }

    match level {
        ServiceLevel::FullAi | ServiceLevel::FastAi => TurnPlan::Generate {
            seed: build_seed(state, level, params),
        },
        ServiceLevel::RuleBased | ServiceLevel::HumanTransfer => {
            speak(responses::RULE_TIER_GUIDANCE)
        }
    }
}

fn plan_issue(state: &mut CallState, text: &str) -> TurnPlan {
    let category = category_for(text);
    // "I want to book an appointment" again is a command, not a problem
    // description; keep asking for the problem.
    if category.is_none() && wants_booking(&normalize(text)) {
        return speak(responses::ISSUE_PROMPT);
    }
    state.update_booking_data(BookingUpdate {
        issue: Some(text.to_string()),
        category: Some(category.unwrap_or(ServiceCategory::General)),
        ..Default::default()
    });
    state.advance_booking_stage();
    speak(responses::LOCATION_PROMPT)
}

fn plan_location(state: &mut CallState, text: &str) -> TurnPlan {
    state.update_booking_data(BookingUpdate {
        location: Some(text.to_string()),
        ..Default::default()
    });
    state.advance_booking_stage();
    speak(responses::TIME_PROMPT)
}

fn plan_time(state: &mut CallState, text: &str) -> TurnPlan {
    let (date, time) = parse_when(text);
    // Merge whatever half arrived; the caller can give day and time across
    // separate turns.
    state.update_booking_data(BookingUpdate {
        date,
        time,
        ..Default::default()
    });
    match (
        state.booking_data.date.clone(),
        state.booking_data.time.clone(),
    ) {
        (Some(date), Some(time)) => TurnPlan::CheckSlot { date, time },
        (Some(_), None) => speak(responses::ASK_MISSING_TIME),
        (None, Some(_)) => speak(responses::ASK_MISSING_DATE),
        (None, None) => speak(responses::TIME_PROMPT),
    }
}

fn plan_contact(state: &mut CallState, text: &str) -> TurnPlan {
    let Some(name) = extract_name(text) else {
        return speak(responses::ASK_NAME);
    };
    let phone = state.caller_phone.clone();
    state.update_booking_data(BookingUpdate {
        contact_name: Some(name.clone()),
        contact_phone: phone,
        ..Default::default()
    });
    if state.caller_name.is_none() {
        state.caller_name = Some(name);
    }
    state.advance_booking_stage();
    speak(responses::confirm_summary(&state.booking_data))
}

fn plan_confirmation(state: &mut CallState, text: &str, params: &AgentParams) -> TurnPlan {
    if negative(text) {
        let attempts = state.record_booking_attempt();
        if attempts >= params.booking_attempt_cap {
            return transfer(
                responses::BOOKING_TROUBLE_TRANSFER,
                TransferReason::BookingTrouble,
            );
        }
        state.reset_booking_flow();
        return speak(responses::CHANGE_WHAT);
    }
    if affirmative(text) {
        return match build_booking_request(state) {
            Some(request) => TurnPlan::Book {
                request: Box::new(request),
            },
            // Unreachable from a legal flow; re-read the summary instead of
            // booking a hole-filled request.
            None => speak(responses::confirm_summary(&state.booking_data)),
        };
    }
    speak(responses::confirm_summary(&state.booking_data))
}

fn plan_cancel(state: &mut CallState) -> TurnPlan {
    let (Some(name), Some(location)) = (state.caller_name.clone(), state.location.clone()) else {
        return transfer(
            responses::BOOKING_TROUBLE_TRANSFER,
            TransferReason::BookingTrouble,
        );
    };
    if !state.has_appointment {
        return transfer(
            responses::BOOKING_TROUBLE_TRANSFER,
            TransferReason::BookingTrouble,
        );
    }
    TurnPlan::Cancel {
        name,
        location,
        date: state.appointment_date.clone().unwrap_or_default(),
        time: state.appointment_time.clone().unwrap_or_default(),
    }
}

fn plan_reschedule(state: &mut CallState, text: &str) -> TurnPlan {
    if !state.has_appointment {
        state.pending_reschedule = false;
        return transfer(
            responses::BOOKING_TROUBLE_TRANSFER,
            TransferReason::BookingTrouble,
        );
    }
    match parse_when(text) {
        (Some(date), Some(time)) => {
            state.pending_reschedule = false;
            let (Some(name), Some(location)) =
                (state.caller_name.clone(), state.location.clone())
            else {
                return transfer(
                    responses::BOOKING_TROUBLE_TRANSFER,
                    TransferReason::BookingTrouble,
                );
            };
            TurnPlan::Reschedule {
                name,
                location,
                date,
                time,
            }
        }
        _ => {
            state.pending_reschedule = true;
            speak(responses::ASK_NEW_TIME)
        }
    }
}

/// Rebuild the flow up to time collection after a booked slot fell through,
/// carrying forward the facts the caller already gave.
pub fn resume_time_collection(state: &mut CallState) {
    let update = BookingUpdate {
        issue: state.issue.clone(),
        category: state.category,
        location: state.location.clone(),
        contact_name: state.caller_name.clone(),
        contact_phone: state.caller_phone.clone(),
        ..Default::default()
    };
    state.reset_booking_flow();
    state.start_booking_flow();
    state.update_booking_data(update);
    // Issue and location are already satisfied.
    state.advance_booking_stage();
    state.advance_booking_stage();
}

fn build_booking_request(state: &CallState) -> Option<BookingRequest> {
    let data = &state.booking_data;
    Some(BookingRequest {
        call_id: state.call_id.clone(),
        customer_name: data.contact_name.clone()?,
        customer_phone: data.contact_phone.clone().or_else(|| state.caller_phone.clone()),
        issue: data.issue.clone()?,
        category: data.category.unwrap_or(ServiceCategory::General),
        location: data.location.clone()?,
        date: data.date.clone()?,
        time: data.time.clone()?,
    })
}

fn note_frustration(state: &mut CallState, text: &str) -> bool {
    let mut bump = 0u8;
    if triage::has_frustration_wording(text) {
        bump += 1;
    }
    if triage::is_shouting(text) {
        bump += 2;
    }
    if bump > 0 {
        state.increment_frustration(bump);
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Intent detection
// ---------------------------------------------------------------------------

/// Classify a caller utterance into at most one intent. Priority follows
/// how decisively each intent ends or redirects the call.
pub fn detect_intent(text: &str) -> Option<Intent> {
    let norm = normalize(text);
    if norm.is_empty() {
        return None;
    }
    let words: Vec<&str> = norm.split(' ').collect();
    if is_goodbye(&norm, &words) {
        return Some(Intent::Goodbye);
    }
    if wants_operator(&norm, &words) {
        return Some(Intent::Operator);
    }
    if wants_reschedule(&norm) {
        return Some(Intent::Reschedule);
    }
    if words.contains(&"cancel") || norm.contains("cancellation") {
        return Some(Intent::Cancel);
    }
    if wants_booking(&norm) {
        return Some(Intent::BookService);
    }
    if is_question(&norm, text) {
        return Some(Intent::Question);
    }
    None
}

fn is_goodbye(norm: &str, words: &[&str]) -> bool {
    if matches!(words.last(), Some(&"bye") | Some(&"goodbye")) {
        return true;
    }
    // Phrase forms only count on short turns so "nothing else is working"
    // does not end the call.
    if words.len() <= 5 {
        const PHRASES: &[&str] = &["thats all", "that is all", "nothing else", "im done", "were all set", "hang up"];
        return PHRASES.iter().any(|p| norm.contains(p));
    }
    false
}

fn wants_operator(norm: &str, words: &[&str]) -> bool {
    const WORDS: &[&str] = &["operator", "human", "representative", "agent"];
    const PHRASES: &[&str] = &["real person", "speak to someone", "talk to someone", "speak with someone"];
    words.iter().any(|w| WORDS.contains(w)) || PHRASES.iter().any(|p| norm.contains(p))
}

fn wants_reschedule(norm: &str) -> bool {
    const PHRASES: &[&str] = &[
        "reschedule",
        "move my appointment",
        "move the appointment",
        "change my appointment",
        "different time",
        "different day",
    ];
    PHRASES.iter().any(|p| norm.contains(p))
}

fn wants_booking(norm: &str) -> bool {
    let words: Vec<&str> = norm.split(' ').collect();
    const WORDS: &[&str] = &["book", "appointment", "schedule", "technician"];
    const PHRASES: &[&str] = &[
        "send someone",
        "come out",
        "come take a look",
        "service visit",
        "set up a visit",
        "someone to look",
    ];
    words.iter().any(|w| WORDS.contains(w)) || PHRASES.iter().any(|p| norm.contains(p))
}

fn is_question(norm: &str, raw: &str) -> bool {
    const OPENERS: &[&str] = &[
        "how much",
        "what do you charge",
        "what are your hours",
        "are you open",
        "do you service",
        "do you work on",
        "whats the price",
        "how late",
        "how soon",
    ];
    raw.trim_end().ends_with('?') || OPENERS.iter().any(|p| norm.starts_with(p))
}

/// Lowercase, keep letters and digits, drop punctuation (so "that's"
/// becomes "thats"), collapse whitespace.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if ch.is_whitespace() && !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.truncate(out.trim_end().len());
    out
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Keyword service-category guess. `None` means the sentence does not
/// describe a problem we recognize.
pub fn category_for(text: &str) -> Option<ServiceCategory> {
    let lowered = text.to_lowercase();
    let has = |phrases: &[&str]| phrases.iter().any(|p| lowered.contains(p));

    // "water heater" would otherwise match the heating list.
    if has(&["water heater", "hot water"]) {
        return Some(ServiceCategory::Plumbing);
    }
    if has(&[
        "furnace", "heater", "heating", "boiler", "radiator", "no heat", "thermostat",
        "pilot light",
    ]) {
        return Some(ServiceCategory::Heating);
    }
    if has(&["air condition", "a/c", "ac unit", "ac is", "cooling", "compressor"]) {
        return Some(ServiceCategory::Cooling);
    }
    if has(&["pipe", "plumb", "drain", "toilet", "faucet", "sink", "sump", "sewer", "leak"]) {
        return Some(ServiceCategory::Plumbing);
    }
    if has(&[
        "outlet", "breaker", "wiring", "electrical", "electric", "sparking", "light switch",
        "flickering", "power is out",
    ]) {
        return Some(ServiceCategory::Electrical);
    }
    None
}

const WEEKDAYS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

const PERIOD_WORDS: &[&str] = &["morning", "afternoon", "evening", "noon", "midday"];

struct ClockMatch {
    value: String,
    consumed_next: bool,
}

/// Pull a requested day and time out of free text. Either half may be
/// missing; the flow asks for whichever is absent. Values keep the caller's
/// own words ("tomorrow", "2 pm") since slots are compared as strings.
pub fn parse_when(text: &str) -> (Option<String>, Option<String>) {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != ':' && c != '\''))
        .filter(|t| !t.is_empty())
        .collect();

    let mut date: Option<String> = None;
    let mut time: Option<String> = None;
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i];
        if tok == "tonight" {
            date.get_or_insert_with(|| "today".to_string());
            time.get_or_insert_with(|| "evening".to_string());
            i += 1;
            continue;
        }
        if date.is_none() {
            if tok == "today" || tok == "tomorrow" || WEEKDAYS.contains(&tok) {
                date = Some(tok.to_string());
            } else if tok == "next" && i + 1 < tokens.len() && WEEKDAYS.contains(&tokens[i + 1]) {
                date = Some(format!("next {}", tokens[i + 1]));
                i += 1;
            }
        }
        if time.is_none() {
            if PERIOD_WORDS.contains(&tok) {
                time = Some(tok.to_string());
            } else if let Some(hit) = clock_time(tok, tokens.get(i + 1).copied()) {
                time = Some(hit.value);
                if hit.consumed_next {
                    i += 1;
                }
            }
        }
        i += 1;
    }
    (date, time)
}

fn clock_time(tok: &str, next: Option<&str>) -> Option<ClockMatch> {
    // Attached meridiem: "2pm", "10:30am".
    for suffix in ["am", "pm"] {
        if let Some(stripped) = tok.strip_suffix(suffix) {
            if valid_clock(stripped) {
                return Some(ClockMatch {
                    value: format!("{} {}", stripped, suffix),
                    consumed_next: false,
                });
            }
        }
    }
    if valid_clock(tok) {
        match next {
            Some("am") | Some("pm") => {
                return Some(ClockMatch {
                    value: format!("{} {}", tok, next.unwrap_or_default()),
                    consumed_next: true,
                });
            }
            Some("oclock") | Some("o'clock") => {
                return Some(ClockMatch {
                    value: format!("{} o'clock", tok),
                    consumed_next: true,
                });
            }
            _ => {}
        }
        // A 24-hour clock reading is unambiguous without a meridiem; a bare
        // "2" is not, so it gets re-asked.
        if tok.contains(':') {
            let hour = tok.split(':').next().and_then(|h| h.parse::<u32>().ok());
            if matches!(hour, Some(h) if (13..=23).contains(&h)) {
                return Some(ClockMatch {
                    value: tok.to_string(),
                    consumed_next: false,
                });
            }
        }
    }
    None
}

fn valid_clock(s: &str) -> bool {
    let mut parts = s.split(':');
    let Some(hour) = parts.next() else {
        return false;
    };
    let Ok(h) = hour.parse::<u32>() else {
        return false;
    };
    if h == 0 || h > 23 {
        return false;
    }
    match parts.next() {
        None => true,
        Some(minutes) => {
            parts.next().is_none()
                && minutes.len() == 2
                && minutes.parse::<u32>().map(|m| m < 60).unwrap_or(false)
        }
    }
}

/// Pull a plausible name out of a contact-stage reply by dropping lead-in
/// and filler words. `None` asks the caller again.
pub fn extract_name(text: &str) -> Option<String> {
    const STOPWORDS: &[&str] = &[
        "uh", "um", "yeah", "well", "hi", "hello", "its", "im", "i", "am", "my", "name", "is",
        "this", "the", "call", "me", "under", "please", "thanks", "thank", "you", "yes", "ok",
        "okay", "for", "put", "it", "down", "should", "be", "sure",
    ];
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-'))
        .filter(|w| {
            !w.is_empty() && !STOPWORDS.contains(&w.replace('\'', "").to_lowercase().as_str())
        })
        .collect();
    if words.is_empty() || words.iter().any(|w| w.chars().any(|c| c.is_ascii_digit())) {
        return None;
    }
    let picked: Vec<&str> = words.into_iter().take(3).collect();
    Some(title_case(&picked.join(" ")))
}

fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Confirmation parsing
// ---------------------------------------------------------------------------

pub fn negative(text: &str) -> bool {
    let norm = normalize(text);
    let words: Vec<&str> = norm.split(' ').collect();
    const WORDS: &[&str] = &["no", "nope", "nah", "dont", "wrong", "incorrect", "cancel"];
    const PHRASES: &[&str] = &["not right", "thats wrong", "start over", "hold off"];
    words.iter().any(|w| WORDS.contains(w)) || PHRASES.iter().any(|p| norm.contains(p))
}

pub fn affirmative(text: &str) -> bool {
    // "no, don't book it" contains "book it"; negation wins.
    if negative(text) {
        return false;
    }
    let norm = normalize(text);
    let words: Vec<&str> = norm.split(' ').collect();
    const WORDS: &[&str] = &[
        "yes", "yeah", "yep", "yup", "correct", "sure", "ok", "okay", "perfect", "confirmed",
    ];
    const PHRASES: &[&str] = &[
        "book it", "go ahead", "sounds good", "that works", "thats right", "please do", "do it",
    ];
    words.iter().any(|w| WORDS.contains(w)) || PHRASES.iter().any(|p| norm.contains(p))
}

// ---------------------------------------------------------------------------
// Model prompt assembly
// ---------------------------------------------------------------------------

fn build_seed(state: &CallState, level: ServiceLevel, params: &AgentParams) -> GenerationSeed {
    // The fast tier trades context for latency.
    let window = if level == ServiceLevel::FastAi {
        (params.history_window / 2).max(2)
    } else {
        params.history_window
    };
    let mut messages = Vec::with_capacity(window + 1);
    messages.push(ChatMessage::system(system_prompt(state, &params.business_name)));
    for turn in state.history_window(window) {
        let message = match turn.role {
            Role::Caller => ChatMessage::user(&turn.text),
            Role::Agent => ChatMessage::assistant(&turn.text),
        };
        messages.push(message);
    }
    GenerationSeed {
        messages,
        fallback: responses::RULE_TIER_GUIDANCE.to_string(),
    }
}

fn system_prompt(state: &CallState, business_name: &str) -> String {
    let mut prompt = format!(
        "You are the phone assistant for {business_name}, a home services company. You are \
         speaking with a caller over the phone, so keep every reply to one or two short spoken \
         sentences and never use lists or markup. Help the caller book a service visit; to book \
         you need the problem, the service address, a day and time, and a name. Never quote \
         prices and never promise an exact arrival window."
    );
    if let Some(issue) = &state.issue {
        prompt.push_str(&format!(" The caller's issue so far: {issue}."));
    }
    if let Some(location) = &state.location {
        prompt.push_str(&format!(" Their address: {location}."));
    }
    prompt
}
