/// One variant per deployment operation. Messages are the bridge's own,
/// unmodified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("host bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("optimizations failed: {0}")]
    OptimizationFailed(String),

    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    #[error("{action} failed: {message}")]
    ControlFailed { action: &'static str, message: String },

    #[error("status unavailable: {0}")]
    StatusUnavailable(String),

    #[error("logs unavailable: {0}")]
    LogsUnavailable(String),
}

impl Error {
    pub fn message(&self) -> &str {
        match self {
            Self::BridgeUnavailable(m)
            | Self::RegistrationFailed(m)
            | Self::SetupFailed(m)
            | Self::OptimizationFailed(m)
            | Self::TeardownFailed(m)
            | Self::StatusUnavailable(m)
            | Self::LogsUnavailable(m) => m,
            Self::ControlFailed { message, .. } => message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
