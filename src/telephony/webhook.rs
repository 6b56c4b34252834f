// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn-based call control webhook.
//!
//! The fallback surface when no media stream is in play: the telco runs
//! speech recognition on its side and POSTs one form per caller turn. The
//! response is voice markup telling it what to say and whether to gather
//! another turn, dial a person, or hang up. Same agent, same state store as
//! the streaming bridge; only the transport differs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::agent::{responses, CallAction, VoiceAgent};
use crate::utils::generate_unique_id;

/// Route the markup points the telco back at.
pub const VOICE_ROUTE: &str = "/voice";

/// Call statuses after which the call cannot continue.
const TERMINAL_STATUSES: [&str; 5] = ["completed", "busy", "failed", "no-answer", "canceled"];

// ---------------------------------------------------------------------------
// Request form
// ---------------------------------------------------------------------------

/// One caller turn as the telco reports it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TurnForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From")]
    pub from: Option<String>,
    /// What the telco's recognizer heard; absent on the first request and
    /// on gather timeouts.
    #[serde(rename = "SpeechResult")]
    pub speech_result: Option<String>,
    #[serde(rename = "Digits")]
    pub digits: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Voice markup
// ---------------------------------------------------------------------------

/// What the telco should do next with the call.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceMarkup {
    /// Say the reply, then listen for the next turn.
    GatherAfter { text: String },
    /// Say the reply, then dial a person onto the line.
    SayThenDial { text: String, number: String },
    /// Say the reply (if any), then end the call.
    SayThenHangup { text: String },
    /// Status callbacks want an acknowledgment and nothing else.
    Empty,
}

impl VoiceMarkup {
    pub fn render(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>");
        match self {
            VoiceMarkup::GatherAfter { text } => {
                xml.push_str(&format!(
                    "<Gather input=\"speech\" action=\"{VOICE_ROUTE}\" method=\"POST\" \
                     speechTimeout=\"auto\"><Say>{}</Say></Gather>\
                     <Redirect method=\"POST\">{VOICE_ROUTE}</Redirect>",
                    escape_xml(text)
                ));
            }
            VoiceMarkup::SayThenDial { text, number } => {
                if !text.is_empty() {
                    xml.push_str(&format!("<Say>{}</Say>", escape_xml(text)));
                }
                xml.push_str(&format!("<Dial>{}</Dial>", escape_xml(number)));
            }
            VoiceMarkup::SayThenHangup { text } => {
                if !text.is_empty() {
                    xml.push_str(&format!("<Say>{}</Say>", escape_xml(text)));
                }
                xml.push_str("<Hangup/>");
            }
            VoiceMarkup::Empty => {}
        }
        xml.push_str("</Response>");
        xml
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The webhook's slice of the world: the agent plus where transfers go.
pub struct CallControl {
    agent: Arc<VoiceAgent>,
    /// Number a person answers. `None` means transfers can only apologize
    /// and hang up.
    transfer_number: Option<String>,
}

impl CallControl {
    pub fn new(agent: Arc<VoiceAgent>, transfer_number: Option<String>) -> Self {
        Self {
            agent,
            transfer_number,
        }
    }

    /// Turn one posted form into voice markup.
    pub async fn handle_form(&self, form: TurnForm) -> VoiceMarkup {
        let call_id = if form.call_sid.is_empty() {
            generate_unique_id("call")
        } else {
            form.call_sid.clone()
        };

        if let Some(status) = form.call_status.as_deref() {
            if TERMINAL_STATUSES.contains(&status) {
                tracing::info!(call_id = %call_id, status = status, "call ended, dropping state");
                self.agent.store().delete(&call_id);
                return VoiceMarkup::Empty;
            }
        }

        if form.digits.as_deref().is_some_and(|d| d.contains('0')) {
            let reply = self.agent.operator_reply(&call_id);
            return self.markup_for(reply.text, reply.action);
        }

        let speech = form.speech_result.as_deref().unwrap_or("");
        if speech.trim().is_empty() && !self.agent.store().contains(&call_id) {
            // First contact: answer the phone.
            let reply = self
                .agent
                .greeting_reply(&call_id, form.from.as_deref());
            return VoiceMarkup::GatherAfter { text: reply.text };
        }

        let reply = self
            .agent
            .handle_turn(&call_id, speech, form.from.as_deref())
            .await;
        if reply.action == CallAction::Hangup {
            self.agent.store().delete(&call_id);
        }
        self.markup_for(reply.text, reply.action)
    }

    fn markup_for(&self, text: String, action: CallAction) -> VoiceMarkup {
        match action {
            CallAction::Continue => VoiceMarkup::GatherAfter { text },
            CallAction::Hangup => VoiceMarkup::SayThenHangup { text },
            CallAction::Transfer(reason) => match &self.transfer_number {
                Some(number) => VoiceMarkup::SayThenDial {
                    text,
                    number: number.clone(),
                },
                None => {
                    tracing::error!(
                        reason = reason.label(),
                        "transfer needed but no transfer number is configured"
                    );
                    VoiceMarkup::SayThenHangup {
                        text: responses::NO_TRANSFER_FALLBACK.into(),
                    }
                }
            },
        }
    }
}

/// Axum handler for `POST /voice`.
pub async fn voice_webhook(
    State(control): State<Arc<CallControl>>,
    Form(form): Form<TurnForm>,
) -> Response {
    let markup = control.handle_form(form).await;
    (
        [(header::CONTENT_TYPE, "text/xml")],
        markup.render(),
    )
        .into_response()
}
