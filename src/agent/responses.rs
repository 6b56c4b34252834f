// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The pre-approved phrase table.
//!
//! Every line the agent can speak without a model comes from here: stage
//! prompts, confirmations, apologies, transfer and goodbye lines, and the
//! emergency scripts. Failure paths must map to one of these; raw error
//! text never reaches the caller's ear.

use crate::booking::Appointment;
use crate::call::state::BookingData;
use crate::triage::EmergencyCategory;

pub fn greeting(business_name: &str) -> String {
    format!(
        "Thanks for calling {}. How can I help you today?",
        business_name
    )
}

// -- booking stage prompts --------------------------------------------------

pub const ISSUE_PROMPT: &str = "I can set up a visit for you. What's going on with your home?";
pub const LOCATION_PROMPT: &str = "Got it. What's the service address?";
pub const TIME_PROMPT: &str = "Thanks. What day and time work best for you?";
pub const CONTACT_PROMPT: &str = "That time looks open. Who should I put the appointment under?";
pub const ASK_NAME: &str = "And what name should I put on the appointment?";
pub const ASK_MISSING_DATE: &str = "Which day would you like that?";
pub const ASK_MISSING_TIME: &str = "And what time of day works for you?";

/// "Just to confirm: ..." summary read back before booking.
pub fn confirm_summary(data: &BookingData) -> String {
    format!(
        "Just to confirm: {} at {}, on {} at {}, under the name {}. Should I book it?",
        data.issue.as_deref().unwrap_or("a service visit"),
        data.location.as_deref().unwrap_or("your address"),
        data.date.as_deref().unwrap_or("the day we discussed"),
        data.time.as_deref().unwrap_or("the time we discussed"),
        data.contact_name.as_deref().unwrap_or("your name"),
    )
}

pub fn booked_line(appointment: &Appointment) -> String {
    format!(
        "You're all set. I've got you down for {} at {}. Is there anything else I can help with?",
        appointment.date, appointment.time
    )
}

pub const SLOT_TAKEN: &str =
    "It looks like that time is already taken. Is there another day or time that works for you?";
pub const CHANGE_WHAT: &str =
    "No problem, I won't book that. Tell me what you'd like instead and we'll set it up again.";

pub fn cancelled_line(date: &str, time: &str) -> String {
    format!(
        "Okay, I've cancelled your {} {} appointment. Is there anything else I can do for you?",
        date, time
    )
}

pub fn rescheduled_line(appointment: &Appointment) -> String {
    format!(
        "Done. I've moved your visit to {} at {}. Anything else?",
        appointment.date, appointment.time
    )
}

pub const ASK_NEW_TIME: &str = "Sure, I can move that. What day and time should I switch it to?";

// -- recovery and validation ------------------------------------------------

pub const REPROMPT: &str = "Sorry, I didn't catch that. Could you say it again?";
pub const APOLOGY_RETRY: &str =
    "Sorry, I'm having a little trouble on my end. Could you say that one more time?";
pub const RULE_TIER_GUIDANCE: &str =
    "I can help you book a service visit, or connect you with our team. What's going on with your home?";

// -- transfers --------------------------------------------------------------

pub const OPERATOR_TRANSFER: &str =
    "Of course. Let me connect you with one of our team members. One moment please.";
pub const DEGRADED_TRANSFER: &str =
    "Let me get you straight to one of our team members who can help. One moment please.";
pub const FRUSTRATION_TRANSFER: &str =
    "I'm sorry for the trouble. Let me get you to a person right away. One moment please.";
pub const REPROMPT_TRANSFER: &str =
    "I'm still having trouble hearing you, so let me connect you with a team member. One moment.";
pub const BOOKING_TROUBLE_TRANSFER: &str =
    "Let me have a team member finish setting this up with you. One moment please.";

/// Spoken when a transfer is required but no destination is configured.
pub const NO_TRANSFER_FALLBACK: &str =
    "I'm very sorry, we're having technical trouble right now. Please call us back in a few \
     minutes and we'll take care of you.";

pub fn emergency_line(category: EmergencyCategory) -> String {
    let base = "That sounds like an emergency, so I'm connecting you with our on-call team right now.";
    match safety_advice(category) {
        Some(advice) => format!("{} {}", base, advice),
        None => base.to_string(),
    }
}

/// Category-specific safety instruction read before the transfer.
pub fn safety_advice(category: EmergencyCategory) -> Option<&'static str> {
    match category {
        EmergencyCategory::GasLeak => Some(
            "Please step outside right away, and don't touch any switches or open flames on the way.",
        ),
        EmergencyCategory::CarbonMonoxide => {
            Some("Please get everyone outside into fresh air first.")
        }
        EmergencyCategory::Fire => {
            Some("If there are open flames, please hang up and call 911 first.")
        }
        EmergencyCategory::WaterFailure => {
            Some("If you can reach it safely, shutting off the main water valve will help.")
        }
        EmergencyCategory::NoHeat | EmergencyCategory::Unspecified => None,
    }
}

pub const GOODBYE: &str = "Thanks for calling. Have a great day!";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::state::ServiceCategory;

    #[test]
    fn test_confirm_summary_reads_collected_details() {
        let data = BookingData {
            issue: Some("furnace making a banging noise".into()),
            location: Some("12 Elm Street".into()),
            date: Some("tomorrow".into()),
            time: Some("2 pm".into()),
            contact_name: Some("Pat".into()),
            ..Default::default()
        };
        let line = confirm_summary(&data);
        assert!(line.contains("furnace making a banging noise"));
        assert!(line.contains("12 Elm Street"));
        assert!(line.contains("2 pm"));
        assert!(line.contains("Pat"));
        assert!(line.ends_with("Should I book it?"));
    }

    #[test]
    fn test_confirm_summary_survives_gaps() {
        // Never panics on missing fields; placeholders read naturally.
        let line = confirm_summary(&BookingData::default());
        assert!(line.contains("a service visit"));
    }

    #[test]
    fn test_gas_emergency_includes_safety_advice() {
        let line = emergency_line(EmergencyCategory::GasLeak);
        assert!(line.contains("connecting you"));
        assert!(line.contains("step outside"));
    }

    #[test]
    fn test_no_heat_emergency_has_no_extra_advice() {
        let line = emergency_line(EmergencyCategory::NoHeat);
        assert!(line.contains("connecting you"));
    }

    #[test]
    fn test_booked_line_mentions_slot() {
        let appointment = Appointment {
            id: "appt-1".into(),
            date: "friday".into(),
            time: "9 am".into(),
            location: "12 Elm Street".into(),
            category: ServiceCategory::Heating,
        };
        let line = booked_line(&appointment);
        assert!(line.contains("friday"));
        assert!(line.contains("9 am"));
    }
}
