//! Server → Client events

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Token accounting reported with a finished run (`prompt_tokens`, ...).
pub type Usage = BTreeMap<String, serde_json::Number>;

/// A null or wrongly typed value decodes as `None` instead of failing the
/// whole event.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// Keeps numeric counters only; providers report unknown ones as `null`.
fn lenient_usage<'de, D>(deserializer: D) -> Result<Option<Usage>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(counters) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        counters
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::Number(count) => Some((name, count)),
                _ => None,
            })
            .collect(),
    ))
}

/// Events streamed from the server over the control-room socket.
///
/// Every payload field is optional on the wire, and a field of the wrong
/// JSON type decodes as absent. Defaults are applied by consumers, not
/// during decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    // Run lifecycle
    #[serde(rename = "chat.ack")]
    ChatAck {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
    },
    #[serde(rename = "chat.delta")]
    ChatDelta {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        text_delta: Option<String>,
    },
    #[serde(rename = "chat.final")]
    ChatFinal {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        full_text: Option<String>,
        #[serde(default, deserialize_with = "lenient_usage", skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
    },

    // Tool activity
    #[serde(rename = "tool.start")]
    ToolStart {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    #[serde(rename = "tool.end")]
    ToolEnd {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        result_preview: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        ok: Option<bool>,
    },

    // Errors
    #[serde(rename = "agent.error")]
    AgentError {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // Session persistence
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
        #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
        updated_at: Option<String>,
    },
}

impl ServerEvent {
    /// Every `type` tag this enum decodes.
    pub const KNOWN_TYPES: [&'static str; 7] = [
        "chat.ack",
        "chat.delta",
        "chat.final",
        "tool.start",
        "tool.end",
        "agent.error",
        "session.updated",
    ];

    pub fn is_known_type(event_type: &str) -> bool {
        Self::KNOWN_TYPES.contains(&event_type)
    }

    /// The wire tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::ChatAck { .. } => "chat.ack",
            ServerEvent::ChatDelta { .. } => "chat.delta",
            ServerEvent::ChatFinal { .. } => "chat.final",
            ServerEvent::ToolStart { .. } => "tool.start",
            ServerEvent::ToolEnd { .. } => "tool.end",
            ServerEvent::AgentError { .. } => "agent.error",
            ServerEvent::SessionUpdated { .. } => "session.updated",
        }
    }

    /// Run id carried by the event, if any.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            ServerEvent::ChatAck { run_id, .. }
            | ServerEvent::ChatDelta { run_id, .. }
            | ServerEvent::ChatFinal { run_id, .. }
            | ServerEvent::ToolStart { run_id, .. }
            | ServerEvent::ToolEnd { run_id, .. }
            | ServerEvent::AgentError { run_id, .. } => run_id.as_deref(),
            ServerEvent::SessionUpdated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerEvent;

    #[test]
    fn parses_chat_ack() {
        let json = r#"{"type":"chat.ack","run_id":"run-1","session_key":"web:one"}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse chat.ack");
        assert_eq!(
            parsed,
            ServerEvent::ChatAck {
                run_id: Some("run-1".to_string()),
                session_key: Some("web:one".to_string()),
            }
        );
        assert_eq!(parsed.event_type(), "chat.ack");
        assert_eq!(parsed.run_id(), Some("run-1"));
    }

    #[test]
    fn missing_fields_decode_as_none() {
        let json = r#"{"type":"agent.error"}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse agent.error");
        match parsed {
            ServerEvent::AgentError { run_id, message } => {
                assert!(run_id.is_none());
                assert!(message.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn chat_final_keeps_usage_numbers() {
        let json = r#"{
          "type":"chat.final",
          "run_id":"run-9",
          "full_text":"done",
          "usage":{"prompt_tokens":12,"completion_tokens":3}
        }"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse chat.final");
        match parsed {
            ServerEvent::ChatFinal {
                usage: Some(usage),
                full_text,
                ..
            } => {
                assert_eq!(full_text.as_deref(), Some("done"));
                assert_eq!(usage.get("prompt_tokens").and_then(|n| n.as_u64()), Some(12));
                assert_eq!(usage.len(), 2);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn chat_final_drops_null_usage_counters() {
        let json = r#"{
          "type":"chat.final",
          "run_id":"run-1",
          "full_text":"done",
          "usage":{"prompt_tokens":null,"completion_tokens":3,"total_tokens":null},
          "session_key":"web:one"
        }"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse chat.final");
        match parsed {
            ServerEvent::ChatFinal {
                usage: Some(usage),
                session_key,
                ..
            } => {
                assert_eq!(usage.len(), 1);
                assert_eq!(usage.get("completion_tokens").and_then(|n| n.as_u64()), Some(3));
                assert_eq!(session_key.as_deref(), Some("web:one"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn mistyped_fields_decode_as_none() {
        let json = r#"{"type":"tool.end","run_id":"run-1","tool_name":"shell","result_preview":42,"ok":"yes"}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse tool.end");
        assert_eq!(
            parsed,
            ServerEvent::ToolEnd {
                run_id: Some("run-1".to_string()),
                tool_name: Some("shell".to_string()),
                result_preview: None,
                ok: None,
            }
        );

        let json = r#"{"type":"chat.final","run_id":"run-2","usage":"n/a","full_text":null}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse chat.final");
        assert_eq!(
            parsed,
            ServerEvent::ChatFinal {
                run_id: Some("run-2".to_string()),
                full_text: None,
                usage: None,
                session_key: None,
            }
        );
    }

    #[test]
    fn null_args_decode_as_none() {
        let json = r#"{"type":"tool.start","run_id":"r","args":null}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse tool.start");
        assert!(matches!(parsed, ServerEvent::ToolStart { args: None, .. }));
    }

    #[test]
    fn tool_start_keeps_arbitrary_args() {
        let json = r#"{"type":"tool.start","run_id":"r","tool_name":"shell","args":{"cmd":"pwd"}}"#;
        let parsed: ServerEvent = serde_json::from_str(json).expect("parse tool.start");
        match parsed {
            ServerEvent::ToolStart { args: Some(args), .. } => {
                assert_eq!(args["cmd"], "pwd");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn serializes_with_dotted_tag_and_skips_absent_fields() {
        let event = ServerEvent::SessionUpdated {
            session_key: Some("web:one".to_string()),
            updated_at: None,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"type":"session.updated","session_key":"web:one"}"#);
    }

    #[test]
    fn known_types_cover_every_variant() {
        for tag in ServerEvent::KNOWN_TYPES {
            let parsed: ServerEvent = serde_json::from_str(&format!(r#"{{"type":"{tag}"}}"#))
                .expect("every known tag decodes without fields");
            assert_eq!(parsed.event_type(), tag);
        }
        assert!(!ServerEvent::is_known_type("pong"));
    }
}
