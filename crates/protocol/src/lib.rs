//! Agent gateway WebSocket/RPC protocol definitions (client side).
//!
//! Protocol version 3. All communication uses JSON text frames.
//!
//! Frame types:
//! - `RequestFrame`: client → gateway RPC call
//! - `ResponseFrame`: gateway → client RPC result, correlated by `id`
//! - `EventFrame`: gateway → client server-push
//!
//! The gateway opens every connection with a `connect.challenge` event; the
//! client answers with a single `connect` request and may not issue anything
//! else until that request succeeds.

pub mod chat;

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 3;
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // 10s
pub const REQUEST_TIMEOUT_MS: u64 = 30_000; // 30s
/// A ready connection that stays silent this long is considered dead.
pub const HEALTH_TIMEOUT_MS: u64 = 15_000; // 15s

// ── Subscriptions ────────────────────────────────────────────────────────────

pub mod subscriptions {
    /// Wildcard subscription: receive all events.
    pub const WILDCARD: &str = "*";
}

// ── Method and event names ───────────────────────────────────────────────────

pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const CHAT_SEND: &str = "chat.send";
    pub const CHAT_HISTORY: &str = "chat.history";
    pub const SESSIONS_LIST: &str = "sessions.list";
    pub const SESSIONS_PATCH: &str = "sessions.patch";
    pub const SESSIONS_DELETE: &str = "sessions.delete";
}

pub mod events {
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
    pub const CHAT: &str = "chat";
    pub const TICK: &str = "tick";
    pub const SHUTDOWN: &str = "shutdown";
}

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const PROTOCOL_MISMATCH: &str = "PROTOCOL_MISMATCH";

    /// Whether a handshake rejection with this code means no version in the
    /// offered range was acceptable.
    pub fn is_protocol_mismatch(code: &str) -> bool {
        matches!(code, PROTOCOL_MISMATCH | "UNSUPPORTED_PROTOCOL")
    }
}

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
        }
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (true, _) => f.write_str(&self.message),
            (false, true) => f.write_str(&self.code),
            (false, false) => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: String,
    pub method: String,
    pub params: serde_json::Value,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Gateway → client RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub r#type: String, // always "res"
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            r#type: "res".into(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Gateway → client server-push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub r#type: String, // always "event"
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            r#type: "event".into(),
            event: event.into(),
            payload: Some(payload),
            seq: None,
        }
    }
}

/// Discriminated union of all frame types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrameInner),
    #[serde(rename = "res")]
    Response(ResponseFrameInner),
    #[serde(rename = "event")]
    Event(EventFrameInner),
}

impl GatewayFrame {
    /// Decode one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrameInner {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrameInner {
    pub id: String,
    #[serde(default)]
    pub ok: bool,
    // Some gateway builds still answer with `result`.
    #[serde(alias = "result", skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrameInner {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Inclusive range of protocol versions the client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRange {
    pub min: u32,
    pub max: u32,
}

impl ProtocolRange {
    pub fn contains(&self, version: u32) -> bool {
        (self.min..=self.max).contains(&version)
    }
}

impl Default for ProtocolRange {
    fn default() -> Self {
        Self {
            min: PROTOCOL_VERSION,
            max: PROTOCOL_VERSION,
        }
    }
}

/// Parameters sent by the client in the `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    pub auth: ConnectAuth,
}

/// Identity and capability metadata sent once at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Payload of a successful `connect` response. Gateways differ in how much
/// they report, so every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloOk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>, // "hello-ok"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "connId", skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

// ── Roles and scopes ─────────────────────────────────────────────────────────

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connect_params_wire_shape() {
        let params = ConnectParams {
            min_protocol: 3,
            max_protocol: 3,
            client: ClientInfo {
                id: "openclaw-control-ui".into(),
                display_name: Some("Clawlink".into()),
                version: "1.0.0".into(),
                platform: "cli".into(),
                mode: "ui".into(),
            },
            caps: vec![],
            scopes: None,
            auth: ConnectAuth {
                token: Some("secret".into()),
            },
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["minProtocol"], 3);
        assert_eq!(json["maxProtocol"], 3);
        assert_eq!(json["client"]["displayName"], "Clawlink");
        assert_eq!(json["caps"], serde_json::json!([]));
        assert_eq!(json["auth"]["token"], "secret");
        assert!(!json.as_object().unwrap().contains_key("scopes"));
    }

    #[test]
    fn request_frame_serializes_type_tag() {
        let frame = RequestFrame::new("rpc-1", "chat.send", serde_json::json!({"a": 1}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "req");
        assert_eq!(json["id"], "rpc-1");
        assert_eq!(json["params"]["a"], 1);
    }

    #[test]
    fn gateway_frame_response_round_trip() {
        let json = r#"{"type":"res","id":"1","ok":true,"payload":{"result":"ok"}}"#;
        let frame = GatewayFrame::parse(json).unwrap();
        match frame {
            GatewayFrame::Response(inner) => {
                assert!(inner.ok);
                assert_eq!(inner.payload.unwrap()["result"], "ok");
            },
            _ => panic!("expected Response frame"),
        }
    }

    #[test]
    fn legacy_result_field_reads_as_payload() {
        let json = r#"{"type":"res","id":"2","ok":true,"result":{"messages":[]}}"#;
        let GatewayFrame::Response(inner) = GatewayFrame::parse(json).unwrap() else {
            panic!("expected Response frame");
        };
        assert_eq!(inner.payload.unwrap()["messages"], serde_json::json!([]));
    }

    #[test]
    fn gateway_frame_error_response() {
        let json = r#"{"type":"res","id":"7","ok":false,"error":{"code":"UNAUTHORIZED","message":"bad token"}}"#;
        let GatewayFrame::Response(inner) = GatewayFrame::parse(json).unwrap() else {
            panic!("expected Response frame");
        };
        let error = inner.error.unwrap();
        assert_eq!(error.code, "UNAUTHORIZED");
        assert_eq!(error.to_string(), "UNAUTHORIZED: bad token");
    }

    #[test]
    fn challenge_event_without_payload_parses() {
        let json = r#"{"type":"event","event":"connect.challenge"}"#;
        let GatewayFrame::Event(inner) = GatewayFrame::parse(json).unwrap() else {
            panic!("expected Event frame");
        };
        assert_eq!(inner.event, events::CONNECT_CHALLENGE);
        assert!(inner.payload.is_none());
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(GatewayFrame::parse(r#"{"type":"ping"}"#).is_err());
        assert!(GatewayFrame::parse("not json").is_err());
    }

    #[test]
    fn hello_ok_tolerates_sparse_payloads() {
        let hello: HelloOk = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(hello.protocol.is_none());

        let hello: HelloOk = serde_json::from_value(serde_json::json!({
            "type": "hello-ok",
            "protocol": 3,
            "server": { "version": "2026.2.1", "connId": "c-1" },
        }))
        .unwrap();
        assert_eq!(hello.protocol, Some(3));
        assert_eq!(hello.server.unwrap().conn_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn protocol_range_contains() {
        let range = ProtocolRange { min: 3, max: 4 };
        assert!(range.contains(3));
        assert!(range.contains(4));
        assert!(!range.contains(2));
        assert!(!range.contains(5));
    }

    #[test]
    fn mismatch_codes() {
        assert!(error_codes::is_protocol_mismatch(error_codes::PROTOCOL_MISMATCH));
        assert!(!error_codes::is_protocol_mismatch(error_codes::UNAUTHORIZED));
    }
}
