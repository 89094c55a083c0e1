//! Inbound frame decoding
//!
//! A frame is accepted when it is a JSON object with a string `type`.
//! Known tags decode into [`ServerEvent`] (mistyped fields become `None`);
//! any other tag is kept verbatim so newer servers don't break older clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::server::ServerEvent;

/// Errors that make an inbound frame unusable
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,
}

/// One decoded stream event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WsEvent {
    Server(ServerEvent),
    /// Any other `type`, passed through untouched.
    Unrecognized(Value),
}

impl WsEvent {
    pub fn event_type(&self) -> &str {
        match self {
            WsEvent::Server(event) => event.event_type(),
            WsEvent::Unrecognized(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        }
    }

    pub fn as_server(&self) -> Option<&ServerEvent> {
        match self {
            WsEvent::Server(event) => Some(event),
            WsEvent::Unrecognized(_) => None,
        }
    }
}

impl From<ServerEvent> for WsEvent {
    fn from(event: ServerEvent) -> Self {
        WsEvent::Server(event)
    }
}

/// Decode one text frame from the stream socket.
pub fn decode_frame(text: &str) -> Result<WsEvent, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::InvalidJson)?;
    let known = match value.get("type") {
        Some(Value::String(event_type)) => ServerEvent::is_known_type(event_type),
        _ => return Err(FrameError::MissingType),
    };
    if !known {
        return Ok(WsEvent::Unrecognized(value));
    }

    // Every field decodes leniently, so a known tag on an object always maps.
    match ServerEvent::deserialize(&value) {
        Ok(event) => Ok(WsEvent::Server(event)),
        Err(_) => Ok(WsEvent::Unrecognized(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_event() {
        let event = decode_frame(r#"{"type":"chat.delta","run_id":"run-1","text_delta":"Hi"}"#)
            .expect("decode chat.delta");
        assert_eq!(
            event,
            WsEvent::Server(ServerEvent::ChatDelta {
                run_id: Some("run-1".to_string()),
                text_delta: Some("Hi".to_string()),
            })
        );
        assert_eq!(event.event_type(), "chat.delta");
    }

    #[test]
    fn keeps_unknown_types_verbatim() {
        let event = decode_frame(r#"{"type":"pong","extra":1}"#).expect("decode pong");
        match &event {
            WsEvent::Unrecognized(value) => assert_eq!(value["extra"], 1),
            other => panic!("expected unrecognized, got {:?}", other),
        }
        assert_eq!(event.event_type(), "pong");
        assert!(event.as_server().is_none());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            decode_frame("not json"),
            Err(FrameError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_frames_without_string_type() {
        assert!(matches!(
            decode_frame(r#"{"run_id":"x"}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            decode_frame(r#"{"type":42}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(decode_frame("[1,2]"), Err(FrameError::MissingType)));
        assert!(matches!(decode_frame("null"), Err(FrameError::MissingType)));
    }

    #[test]
    fn chat_final_with_null_usage_counters_still_decodes() {
        let event = decode_frame(
            r#"{"type":"chat.final","run_id":"run-1","full_text":"done","usage":{"prompt_tokens":null,"completion_tokens":3,"total_tokens":null},"session_key":"web:one"}"#,
        )
        .expect("decode chat.final");
        match event {
            WsEvent::Server(ServerEvent::ChatFinal {
                run_id,
                full_text,
                usage: Some(usage),
                session_key,
            }) => {
                assert_eq!(run_id.as_deref(), Some("run-1"));
                assert_eq!(full_text.as_deref(), Some("done"));
                assert_eq!(usage.keys().collect::<Vec<_>>(), vec!["completion_tokens"]);
                assert_eq!(session_key.as_deref(), Some("web:one"));
            }
            other => panic!("expected chat.final, got {:?}", other),
        }
    }

    #[test]
    fn known_type_with_mistyped_fields_is_kept() {
        let event = decode_frame(r#"{"type":"tool.end","run_id":"run-1","result_preview":42,"ok":"yes"}"#)
            .expect("decode tool.end");
        assert_eq!(
            event,
            WsEvent::Server(ServerEvent::ToolEnd {
                run_id: Some("run-1".to_string()),
                tool_name: None,
                result_preview: None,
                ok: None,
            })
        );
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let known = decode_frame(r#"{"type":"chat.ack","run_id":"r","session_key":"s"}"#)
            .expect("decode ack");
        assert_eq!(
            serde_json::to_value(&known).expect("serialize"),
            serde_json::json!({"type":"chat.ack","run_id":"r","session_key":"s"})
        );

        let unknown = decode_frame(r#"{"type":"custom.thing","n":2}"#).expect("decode custom");
        assert_eq!(
            serde_json::to_value(&unknown).expect("serialize"),
            serde_json::json!({"type":"custom.thing","n":2})
        );
    }
}
