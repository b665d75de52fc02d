//! Boundary decoding of heterogeneous raw inputs into a closed sum type.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent_events::AgentEvent;

/// A persisted row from an older store generation, recognized by shape
/// rather than by an explicit tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawLegacyRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp_unix_ms: Option<u64>,
}

/// Enumerates supported `RawMessage` values accepted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    /// A live runtime event wrapped for transport.
    AgentEvent {
        event: AgentEvent,
        request_id: Option<String>,
        conversation_id: Option<String>,
        timestamp_unix_ms: Option<u64>,
    },
    /// Transport-level failure signal.
    Error {
        message: String,
        request_id: Option<String>,
        timestamp_unix_ms: Option<u64>,
    },
    /// Turn-finished signal; carries no displayable content.
    Done { request_id: Option<String> },
    /// Turn aborted by the client.
    Aborted {
        request_id: Option<String>,
        timestamp_unix_ms: Option<u64>,
    },
    /// Persisted row from an earlier store generation.
    Legacy(RawLegacyRow),
}

/// Decodes one raw JSON value into the closed `RawMessage` union.
///
/// Values with a recognized `type` tag decode strictly; anything carrying a
/// `role` or `message` field takes the legacy path; everything else is
/// rejected at the boundary.
pub fn decode_raw_message(value: &Value) -> Result<RawMessage> {
    let object = match value.as_object() {
        Some(object) => object,
        None => bail!("raw message must be a JSON object"),
    };

    let request_id = string_field(object, "request_id");
    let conversation_id = string_field(object, "conversation_id");
    let timestamp_unix_ms = object.get("timestamp_unix_ms").and_then(Value::as_u64);

    match object.get("type").and_then(Value::as_str) {
        Some("agent_event") => {
            let data = object
                .get("data")
                .context("agent_event raw message requires a 'data' field")?;
            let event = serde_json::from_value::<AgentEvent>(data.clone())
                .context("failed to decode nested agent event")?;
            Ok(RawMessage::AgentEvent {
                event,
                request_id,
                conversation_id,
                timestamp_unix_ms,
            })
        }
        Some("error") => {
            let message = object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Ok(RawMessage::Error {
                message,
                request_id,
                timestamp_unix_ms,
            })
        }
        Some("done") => Ok(RawMessage::Done { request_id }),
        Some("aborted") => Ok(RawMessage::Aborted {
            request_id,
            timestamp_unix_ms,
        }),
        Some(other) => bail!("unsupported raw message type '{}'", other),
        None => {
            if object.contains_key("role") || object.contains_key("message") {
                let row = serde_json::from_value::<RawLegacyRow>(value.clone())
                    .context("failed to decode legacy message row")?;
                Ok(RawMessage::Legacy(row))
            } else {
                bail!("raw message carries neither a type tag nor a legacy shape");
            }
        }
    }
}

fn string_field(object: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
