//! The seam between the control client and the privileged host process.

use {async_trait::async_trait, serde_json::Value};

/// Command names understood by a host bridge.
pub mod commands {
    pub const CHECK_DOCKER: &str = "check_docker";
    pub const REGISTER_DESKTOP: &str = "register_desktop";
    pub const SETUP_OPENCLAW: &str = "setup_openclaw";
    pub const DEPLOY_OPENCLAW: &str = "deploy_openclaw";
    pub const APPLY_OPTIMIZATIONS: &str = "apply_optimizations";
    pub const TEARDOWN_OPENCLAW: &str = "teardown_openclaw";
    pub const START_OPENCLAW: &str = "start_openclaw";
    pub const STOP_OPENCLAW: &str = "stop_openclaw";
    pub const RESTART_OPENCLAW: &str = "restart_openclaw";
    pub const GET_OPENCLAW_STATUS: &str = "get_openclaw_status";
    pub const GET_OPENCLAW_LOGS: &str = "get_openclaw_logs";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The host process could not be reached or could not run the command.
    #[error("bridge unavailable: {0}")]
    Unavailable(String),

    /// The command ran and reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl BridgeError {
    /// The message as reported by the host, without any prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Unavailable(message) | Self::Failed(message) => message,
        }
    }
}

/// Invokes a named command on the host with JSON arguments and returns its
/// JSON result.
#[async_trait]
pub trait CommandBridge: Send + Sync {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError>;
}
