// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Media-stream wire protocol.
//!
//! The streaming bridge speaks a Twilio-style media-stream protocol over a
//! WebSocket: JSON text messages both ways, audio as base64 mu-law at 8 kHz
//! mono. Inbound messages parse into [`StreamEvent`]:
//!
//! - `connected` - socket-level hello
//! - `start` - stream live, carries `streamSid`, `callSid`, custom params
//! - `media` - one frame of caller audio
//! - `dtmf` - keypad press
//! - `mark` - playback marker acknowledgment
//! - `stop` - stream closed
//!
//! Outbound builders produce the `media`, `mark`, and `clear` messages the
//! bridge sends back.

use serde::{Deserialize, Serialize};

use crate::utils::{decode_base64, encode_base64};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Parsed inbound stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    /// The stream is live; identifiers for the rest of the call.
    Started {
        stream_sid: String,
        call_sid: Option<String>,
        /// Caller number forwarded by the call-control side.
        caller: Option<String>,
    },
    /// One frame of caller audio (mu-law 8 kHz mono).
    Media { mulaw: Vec<u8> },
    Dtmf { digit: String },
    /// The telco played our audio up to a marker we set.
    Mark { name: String },
    Stopped,
}

#[derive(Deserialize, Debug)]
struct StreamMessage {
    event: String,
    #[serde(default)]
    start: Option<StartPayload>,
    #[serde(default)]
    media: Option<MediaPayload>,
    #[serde(default)]
    mark: Option<MarkPayload>,
    #[serde(default)]
    dtmf: Option<DtmfPayload>,
}

#[derive(Deserialize, Debug)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid", default)]
    call_sid: Option<String>,
    /// Key/values the call-control side attached when it opened the stream;
    /// the caller's number arrives as "from".
    #[serde(rename = "customParameters", default)]
    custom_parameters: Option<serde_json::Value>,
    #[serde(rename = "mediaFormat", default)]
    #[allow(dead_code)]
    media_format: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct MediaPayload {
    payload: String,
    #[serde(default)]
    #[allow(dead_code)]
    track: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MarkPayload {
    name: String,
}

#[derive(Deserialize, Debug)]
struct DtmfPayload {
    digit: String,
}

/// Parse one inbound text message. Malformed or unknown input returns
/// `None`; the bridge skips it rather than killing the call.
pub fn parse_event(text: &str) -> Option<StreamEvent> {
    let msg: StreamMessage = serde_json::from_str(text).ok()?;
    match msg.event.as_str() {
        "connected" => Some(StreamEvent::Connected),
        "start" => {
            let start = msg.start?;
            let caller = start
                .custom_parameters
                .as_ref()
                .and_then(|params| params.get("from"))
                .and_then(|value| value.as_str())
                .map(str::to_string);
            Some(StreamEvent::Started {
                stream_sid: start.stream_sid,
                call_sid: start.call_sid,
                caller,
            })
        }
        "media" => {
            let media = msg.media?;
            match decode_base64(&media.payload) {
                Some(mulaw) => Some(StreamEvent::Media { mulaw }),
                None => {
                    tracing::warn!("media event with undecodable base64 payload");
                    None
                }
            }
        }
        "dtmf" => msg.dtmf.map(|dtmf| StreamEvent::Dtmf { digit: dtmf.digit }),
        "mark" => msg.mark.map(|mark| StreamEvent::Mark { name: mark.name }),
        "stop" => Some(StreamEvent::Stopped),
        other => {
            tracing::warn!(event = other, "unknown stream event");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MediaOut<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: MediaPayloadOut,
}

#[derive(Serialize)]
struct MediaPayloadOut {
    payload: String,
}

#[derive(Serialize)]
struct MarkOut<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    mark: MarkPayloadOut<'a>,
}

#[derive(Serialize)]
struct MarkPayloadOut<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct ClearOut<'a> {
    event: &'a str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
}

/// One outbound audio chunk.
pub fn media_message(stream_sid: &str, mulaw: &[u8]) -> Option<String> {
    let msg = MediaOut {
        event: "media",
        stream_sid,
        media: MediaPayloadOut {
            payload: encode_base64(mulaw),
        },
    };
    serde_json::to_string(&msg).ok()
}

/// Playback marker; the telco echoes it back once audio up to this point
/// has actually been played.
pub fn mark_message(stream_sid: &str, name: &str) -> Option<String> {
    let msg = MarkOut {
        event: "mark",
        stream_sid,
        mark: MarkPayloadOut { name },
    };
    serde_json::to_string(&msg).ok()
}

/// Tell the telco to drop any buffered audio immediately (barge-in).
pub fn clear_message(stream_sid: &str) -> Option<String> {
    let msg = ClearOut {
        event: "clear",
        stream_sid,
    };
    serde_json::to_string(&msg).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_with_caller() {
        let json = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ123",
                "callSid": "CA456",
                "customParameters": {"from": "+15550100"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000}
            }
        }"#;
        match parse_event(json) {
            Some(StreamEvent::Started {
                stream_sid,
                call_sid,
                caller,
            }) => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(call_sid.as_deref(), Some("CA456"));
                assert_eq!(caller.as_deref(), Some("+15550100"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_decodes_payload() {
        let payload = encode_base64(&[0xFF, 0x7F, 0x80]);
        let json = format!(r#"{{"event": "media", "media": {{"payload": "{payload}"}}}}"#);
        match parse_event(&json) {
            Some(StreamEvent::Media { mulaw }) => assert_eq!(mulaw, vec![0xFF, 0x7F, 0x80]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_bad_base64_is_skipped() {
        let json = r#"{"event": "media", "media": {"payload": "!!!not-base64!!!"}}"#;
        assert_eq!(parse_event(json), None);
    }

    #[test]
    fn test_parse_dtmf_and_stop() {
        assert_eq!(
            parse_event(r#"{"event": "dtmf", "dtmf": {"digit": "0"}}"#),
            Some(StreamEvent::Dtmf { digit: "0".into() })
        );
        assert_eq!(parse_event(r#"{"event": "stop"}"#), Some(StreamEvent::Stopped));
    }

    #[test]
    fn test_parse_unknown_event_is_skipped() {
        assert_eq!(parse_event(r#"{"event": "telemetry"}"#), None);
        assert_eq!(parse_event("not json"), None);
    }

    #[test]
    fn test_media_message_shape() {
        let text = media_message("MZ123", &[0xFF; 4]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["event"], "media");
        assert_eq!(parsed["streamSid"], "MZ123");
        let payload = parsed["media"]["payload"].as_str().unwrap();
        assert_eq!(decode_base64(payload).unwrap(), vec![0xFF; 4]);
    }

    #[test]
    fn test_mark_and_clear_shapes() {
        let mark: serde_json::Value =
            serde_json::from_str(&mark_message("MZ1", "reply-7").unwrap()).unwrap();
        assert_eq!(mark["event"], "mark");
        assert_eq!(mark["mark"]["name"], "reply-7");

        let clear: serde_json::Value =
            serde_json::from_str(&clear_message("MZ1").unwrap()).unwrap();
        assert_eq!(clear["event"], "clear");
        assert_eq!(clear["streamSid"], "MZ1");
    }
}
