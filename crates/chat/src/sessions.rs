//! Session management requests: history, listing, model overrides.

use {
    clawlink_gateway::GatewayClient,
    clawlink_protocol::{
        chat::{
            ChatHistory, ChatHistoryParams, SessionSummary, SessionsDeleteParams, SessionsList,
            SessionsListParams, SessionsPatchParams,
        },
        methods,
    },
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    session::SessionKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One displayable message of a session transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: Option<u64>,
}

/// Fetch the transcript of `session_key`. Only user and assistant messages
/// with non-empty text are kept; gateway metadata prefixes are stripped.
pub async fn load_history(client: &GatewayClient, session_key: &str) -> Result<Vec<HistoryEntry>> {
    let history: ChatHistory = client
        .request(methods::CHAT_HISTORY, &ChatHistoryParams {
            session_key: session_key.to_string(),
        })
        .await?;

    let entries: Vec<HistoryEntry> = history
        .messages
        .into_iter()
        .filter_map(|message| {
            let role = match message.role.as_deref() {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                _ => return None,
            };
            let timestamp = message.timestamp_ms();
            let text = message.content?.display_text();
            (!text.trim().is_empty()).then_some(HistoryEntry {
                role,
                text,
                timestamp,
            })
        })
        .collect();
    debug!(session_key, messages = entries.len(), "loaded chat history");
    Ok(entries)
}

/// Sessions visible to the client, optionally limited to one agent.
pub async fn list_sessions(client: &GatewayClient, agent: Option<&str>) -> Result<SessionsList> {
    let mut list: SessionsList = client
        .request(methods::SESSIONS_LIST, &SessionsListParams {
            agent_id: agent.map(str::to_string),
        })
        .await?;
    if let Some(agent) = agent {
        let prefix = format!("agent:{agent}:");
        list.sessions
            .retain(|session: &SessionSummary| session.key.starts_with(&prefix));
    }
    Ok(list)
}

/// Override the model of one session without touching the gateway default.
pub async fn patch_session_model(
    client: &GatewayClient,
    session_key: &str,
    model: &str,
) -> Result<()> {
    let _: Value = client
        .request(methods::SESSIONS_PATCH, &SessionsPatchParams {
            key: session_key.to_string(),
            model: Some(model.to_string()),
            ..SessionsPatchParams::default()
        })
        .await?;
    Ok(())
}

pub async fn rename_session(
    client: &GatewayClient,
    session_key: &str,
    display_name: &str,
) -> Result<()> {
    let _: Value = client
        .request(methods::SESSIONS_PATCH, &SessionsPatchParams {
            key: session_key.to_string(),
            display_name: Some(display_name.to_string()),
            ..SessionsPatchParams::default()
        })
        .await?;
    Ok(())
}

/// Delete a session. The main session of an agent is refused locally.
pub async fn delete_session(client: &GatewayClient, session_key: &SessionKey) -> Result<()> {
    if session_key.is_main() {
        return Err(Error::MainSessionProtected);
    }
    let _: Value = client
        .request(methods::SESSIONS_DELETE, &SessionsDeleteParams {
            key: session_key.to_string(),
        })
        .await?;
    Ok(())
}

/// Strip routing prefixes from a gateway model id:
/// `openrouter/<provider>/<model>` and `<provider>/<model>` become `<model>`.
pub fn resolve_model_id(raw: &str) -> &str {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        ["openrouter", _provider, _, ..] => {
            let skip = "openrouter/".len() + parts[1].len() + 1;
            &raw[skip..]
        },
        [_provider, model] => *model,
        _ => raw,
    }
}
