#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] clawlink_gateway::Error),

    #[error("a different turn is already streaming on {session_key}")]
    TurnInProgress { session_key: String },

    #[error("invalid session key {0:?}, expected agent:<name>:<instance>")]
    InvalidSessionKey(String),

    #[error("the main session of an agent cannot be deleted")]
    MainSessionProtected,
}

pub type Result<T> = std::result::Result<T, Error>;
