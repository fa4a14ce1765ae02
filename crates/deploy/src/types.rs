//! Values exchanged with the host bridge.

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::bridge::commands;

/// Container runtime availability on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPrerequisites {
    pub installed: bool,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "compose", alias = "composeAvailable", default)]
    pub compose_available: bool,
    /// The runtime daemon answers.
    #[serde(rename = "running", alias = "runtimeActive", default)]
    pub runtime_active: bool,
}

impl HostPrerequisites {
    pub fn ready(&self) -> bool {
        self.installed && self.compose_available && self.runtime_active
    }
}

/// Credentials issued by the backend for a new deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    #[serde(rename = "openrouter_key", alias = "providerKey")]
    pub provider_key: Secret<String>,
    #[serde(alias = "gatewayToken")]
    pub gateway_token: Secret<String>,
    #[serde(alias = "authToken")]
    pub auth_token: Secret<String>,
}

/// Everything needed to render the deployment directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(rename = "openrouter_key", serialize_with = "serialize_secret")]
    pub provider_key: Secret<String>,
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
    #[serde(serialize_with = "serialize_secret")]
    pub gateway_token: Secret<String>,
    pub model_slug: String,
}

impl SetupConfig {
    /// Combine backend-issued credentials with the user's bot token and model.
    pub fn from_registration(
        registration: &Registration,
        bot_token: impl Into<String>,
        model_slug: impl Into<String>,
    ) -> Self {
        Self {
            provider_key: registration.provider_key.clone(),
            bot_token: Secret::new(bot_token.into()),
            gateway_token: registration.gateway_token.clone(),
            model_slug: model_slug.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(rename = "state", alias = "runtimeState")]
    pub runtime_state: String,
    #[serde(rename = "status", alias = "statusText", default)]
    pub status_text: String,
}

/// Snapshot of the compose project. Replaced wholesale on every query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub running: bool,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn command(self) -> &'static str {
        match self {
            Self::Start => commands::START_OPENCLAW,
            Self::Stop => commands::STOP_OPENCLAW,
            Self::Restart => commands::RESTART_OPENCLAW,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}
