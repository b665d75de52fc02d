use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const BRIDGE_REQUEST_SCHEMA_VERSION: u32 = 1;
pub const BRIDGE_EVENT_SCHEMA_VERSION: u32 = 1;

const BRIDGE_COMPATIBLE_REQUEST_SCHEMA_VERSIONS: [u32; 2] = [0, BRIDGE_REQUEST_SCHEMA_VERSION];

pub const BRIDGE_ERROR_CODE_INVALID_JSON: &str = "invalid_json";
pub const BRIDGE_ERROR_CODE_UNSUPPORTED_SCHEMA: &str = "unsupported_schema";
pub const BRIDGE_ERROR_CODE_UNSUPPORTED_KIND: &str = "unsupported_kind";
pub const BRIDGE_ERROR_CODE_INVALID_REQUEST_ID: &str = "invalid_request_id";
pub const BRIDGE_ERROR_CODE_INVALID_PAYLOAD: &str = "invalid_payload";
pub const BRIDGE_ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

/// Permission mode requested by the client for one conversation turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    AcceptEdits,
}

impl FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "default" => Ok(Self::Default),
            "plan" => Ok(Self::Plan),
            "accept_edits" | "acceptEdits" => Ok(Self::AcceptEdits),
            other => bail!(
                "unsupported permission mode '{}'; expected default, plan, or accept_edits",
                other
            ),
        }
    }
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Plan => "plan",
            Self::AcceptEdits => "accept_edits",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeRequestKind {
    SendMessage,
    AbortMessage,
    PermissionRespond,
}

impl FromStr for BridgeRequestKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "message.send" => Ok(Self::SendMessage),
            "message.abort" => Ok(Self::AbortMessage),
            "permission.respond" => Ok(Self::PermissionRespond),
            other => bail!(
                "unsupported bridge frame kind '{}'; supported kinds are message.send, message.abort, permission.respond",
                other
            ),
        }
    }
}

/// Parsed inbound client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeRequestFrame {
    pub request_id: String,
    pub kind: BridgeRequestKind,
    pub payload: serde_json::Map<String, Value>,
}

/// Outbound bridge frame pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeEventFrame {
    pub schema_version: u32,
    pub request_id: String,
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RawBridgeRequestFrame {
    schema_version: u32,
    request_id: String,
    kind: String,
    payload: Value,
}

pub fn parse_bridge_request_frame(raw: &str) -> Result<BridgeRequestFrame> {
    let frame = serde_json::from_str::<RawBridgeRequestFrame>(raw)
        .context("failed to parse bridge frame JSON")?;
    if !BRIDGE_COMPATIBLE_REQUEST_SCHEMA_VERSIONS.contains(&frame.schema_version) {
        let supported = BRIDGE_COMPATIBLE_REQUEST_SCHEMA_VERSIONS
            .iter()
            .map(|version| version.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!(
            "unsupported bridge frame schema: supported request schema versions are [{}], found {}",
            supported,
            frame.schema_version
        );
    }
    let request_id = frame.request_id.trim();
    if request_id.is_empty() {
        bail!("bridge frame request_id must be non-empty");
    }
    let kind = BridgeRequestKind::from_str(frame.kind.trim())?;
    let payload = frame
        .payload
        .as_object()
        .ok_or_else(|| anyhow!("bridge frame payload must be a JSON object"))?
        .clone();

    Ok(BridgeRequestFrame {
        request_id: request_id.to_string(),
        kind,
        payload,
    })
}

pub fn best_effort_bridge_request_id(raw: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(raw).ok()?;
    let request_id = value
        .as_object()
        .and_then(|object| object.get("request_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    Some(request_id.to_string())
}

pub fn classify_bridge_parse_error(message: &str) -> &'static str {
    if message.contains("failed to parse bridge frame JSON") {
        BRIDGE_ERROR_CODE_INVALID_JSON
    } else if message.contains("unsupported bridge frame schema") {
        BRIDGE_ERROR_CODE_UNSUPPORTED_SCHEMA
    } else if message.contains("unsupported bridge frame kind") {
        BRIDGE_ERROR_CODE_UNSUPPORTED_KIND
    } else if message.contains("bridge frame request_id must be non-empty") {
        BRIDGE_ERROR_CODE_INVALID_REQUEST_ID
    } else if message.contains("bridge frame payload must be a JSON object")
        || message.contains("payload field")
        || message.contains("unsupported permission mode")
    {
        BRIDGE_ERROR_CODE_INVALID_PAYLOAD
    } else {
        BRIDGE_ERROR_CODE_INTERNAL_ERROR
    }
}

pub fn build_bridge_event_frame(request_id: &str, kind: &str, payload: Value) -> BridgeEventFrame {
    BridgeEventFrame {
        schema_version: BRIDGE_EVENT_SCHEMA_VERSION,
        request_id: request_id.to_string(),
        kind: kind.to_string(),
        payload,
    }
}

pub fn build_bridge_error_frame(request_id: &str, code: &str, message: &str) -> BridgeEventFrame {
    build_bridge_event_frame(
        request_id,
        "error",
        json!({
            "code": code,
            "message": message,
        }),
    )
}

/// Payload of an inbound `message.send` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessagePayload {
    pub conversation_id: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub session_id_override: Option<String>,
    pub permission_mode: PermissionMode,
}

pub fn parse_send_message_payload(
    payload: &serde_json::Map<String, Value>,
) -> Result<SendMessagePayload> {
    let conversation_id = required_payload_string(payload, "conversation_id")?;
    let content = required_payload_string(payload, "content")?;
    let attachments = match payload.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    anyhow!("payload field 'attachments' entries must be strings")
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => bail!("payload field 'attachments' must be an array of strings"),
    };
    let session_id_override = optional_payload_string(payload, "session_id")?;
    let permission_mode = match optional_payload_string(payload, "permission_mode")? {
        Some(raw) => PermissionMode::from_str(&raw)?,
        None => PermissionMode::Default,
    };

    Ok(SendMessagePayload {
        conversation_id,
        content,
        attachments,
        session_id_override,
        permission_mode,
    })
}

/// Payload of an inbound `message.abort` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortMessagePayload {
    pub target_request_id: String,
}

pub fn parse_abort_message_payload(
    payload: &serde_json::Map<String, Value>,
) -> Result<AbortMessagePayload> {
    Ok(AbortMessagePayload {
        target_request_id: required_payload_string(payload, "target_request_id")?,
    })
}

/// Payload of an inbound `permission.respond` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRespondPayload {
    pub prompt_id: String,
    pub option_id: String,
}

pub fn parse_permission_respond_payload(
    payload: &serde_json::Map<String, Value>,
) -> Result<PermissionRespondPayload> {
    Ok(PermissionRespondPayload {
        prompt_id: required_payload_string(payload, "prompt_id")?,
        option_id: required_payload_string(payload, "option_id")?,
    })
}

fn required_payload_string(
    payload: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String> {
    let raw = payload
        .get(field)
        .ok_or_else(|| anyhow!("payload field '{}' is required", field))?
        .as_str()
        .ok_or_else(|| anyhow!("payload field '{}' must be a string", field))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("payload field '{}' must be non-empty", field);
    }
    Ok(trimmed.to_string())
}

fn optional_payload_string(
    payload: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<String>> {
    let Some(value) = payload.get(field) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow!("payload field '{}' must be a string", field))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("payload field '{}' must be non-empty when provided", field);
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame_json(kind: &str, payload: Value) -> String {
        json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": "req-1",
            "kind": kind,
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn parses_send_message_frame() {
        let raw = frame_json(
            "message.send",
            json!({
                "conversation_id": "conv-1",
                "content": "Hi",
                "permission_mode": "plan",
            }),
        );
        let frame = parse_bridge_request_frame(&raw).expect("frame");
        assert_eq!(frame.kind, BridgeRequestKind::SendMessage);
        let payload = parse_send_message_payload(&frame.payload).expect("payload");
        assert_eq!(payload.conversation_id, "conv-1");
        assert_eq!(payload.content, "Hi");
        assert!(payload.attachments.is_empty());
        assert_eq!(payload.permission_mode, PermissionMode::Plan);
    }

    #[test]
    fn rejects_unknown_kind_with_stable_code() {
        let raw = frame_json("message.unknown", json!({}));
        let error = parse_bridge_request_frame(&raw).expect_err("must fail");
        assert_eq!(
            classify_bridge_parse_error(&error.to_string()),
            BRIDGE_ERROR_CODE_UNSUPPORTED_KIND
        );
    }

    #[test]
    fn rejects_future_schema_version() {
        let raw = json!({
            "schema_version": 99,
            "request_id": "req-1",
            "kind": "message.send",
            "payload": {},
        })
        .to_string();
        let error = parse_bridge_request_frame(&raw).expect_err("must fail");
        assert_eq!(
            classify_bridge_parse_error(&error.to_string()),
            BRIDGE_ERROR_CODE_UNSUPPORTED_SCHEMA
        );
    }

    #[test]
    fn recovers_request_id_from_malformed_payload() {
        let raw = json!({
            "schema_version": BRIDGE_REQUEST_SCHEMA_VERSION,
            "request_id": "req-7",
            "kind": "message.send",
            "payload": "not-an-object",
        })
        .to_string();
        assert!(parse_bridge_request_frame(&raw).is_err());
        assert_eq!(best_effort_bridge_request_id(&raw).as_deref(), Some("req-7"));
    }

    #[test]
    fn permission_mode_accepts_camel_case_alias() {
        assert_eq!(
            PermissionMode::from_str("acceptEdits").expect("mode"),
            PermissionMode::AcceptEdits
        );
        assert_eq!(PermissionMode::AcceptEdits.as_str(), "accept_edits");
    }

    #[test]
    fn permission_respond_payload_requires_both_fields() {
        let payload = json!({ "prompt_id": "p-1" });
        let map = payload.as_object().expect("object").clone();
        assert!(parse_permission_respond_payload(&map).is_err());
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let frame = build_bridge_error_frame("req-1", BRIDGE_ERROR_CODE_INVALID_JSON, "bad json");
        assert_eq!(frame.kind, "error");
        assert_eq!(frame.payload["code"], "invalid_json");
        assert_eq!(frame.payload["message"], "bad json");
    }
}
