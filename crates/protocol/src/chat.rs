//! Chat method parameters and `chat` event payloads.

use serde::{Deserialize, Serialize};

// ── Requests ─────────────────────────────────────────────────────────────────

/// Parameters of `chat.send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    pub session_key: String,
    pub message: String,
    pub idempotency_key: String,
}

/// Parameters of `chat.history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    pub session_key: String,
}

/// Result of `chat.history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
}

/// Parameters of `sessions.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Result of `sessions.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsList {
    pub sessions: Vec<SessionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<SessionDefaults>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Parameters of `sessions.patch`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsPatchParams {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Parameters of `sessions.delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsDeleteParams {
    pub key: String,
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Streaming state carried by every `chat` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Delta,
    Final,
    Error,
    Aborted,
    #[serde(other)]
    Unknown,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub state: ChatState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ChatEventPayload {
    /// Flattened text of the carried message, empty when there is none.
    pub fn text(&self) -> String {
        self.message
            .as_ref()
            .and_then(|m| m.content.as_ref())
            .map(MessageContent::flatten)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Gateways send integers, floats or numeric strings here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Timestamp in milliseconds, when it is a non-negative number.
    pub fn timestamp_ms(&self) -> Option<u64> {
        match self.timestamp.as_ref()? {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            serde_json::Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| *f >= 0.0)
                .map(|f| f as u64),
            _ => None,
        }
    }
}

/// Message content is either a raw string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageContent {
    /// Concatenate the text of this content. Only `text`-typed parts count,
    /// in list order; anything else flattens to nothing.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter(|part| part.r#type == "text")
                .filter_map(|part| part.text.as_deref())
                .collect(),
            Self::Other(_) => String::new(),
        }
    }

    /// Flattened text with gateway-injected prefixes removed.
    pub fn display_text(&self) -> String {
        strip_message_metadata(&self.flatten()).to_string()
    }
}

// ── Normalization ────────────────────────────────────────────────────────────

const METADATA_HEADER: &str = "Conversation info (untrusted metadata):\n```json\n";
const METADATA_FOOTER: &str = "```\n\n";

/// Remove the untrusted-metadata JSON block and a leading `[timestamp]` tag
/// that the gateway prepends to relayed user messages.
pub fn strip_message_metadata(text: &str) -> &str {
    let mut rest = text;
    if let Some(after) = rest.strip_prefix(METADATA_HEADER)
        && let Some(end) = after.find(METADATA_FOOTER)
    {
        rest = &after[end + METADATA_FOOTER.len()..];
    }
    strip_timestamp_tag(rest)
}

fn strip_timestamp_tag(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('[') else {
        return text;
    };
    let Some(close) = inner.find(']') else {
        return text;
    };
    let tag = &inner[..close];
    let is_stamp = !tag.is_empty()
        && tag
            .chars()
            .all(|c| {
                c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | ':' | ',' | '-')
            });
    if is_stamp {
        inner[close + 1..].trim_start()
    } else {
        text
    }
}
