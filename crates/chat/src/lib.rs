//! Chat on top of the gateway session: streamed turn aggregation, session
//! keys and session management requests.

pub mod aggregator;
pub mod error;
pub mod session;
pub mod sessions;

pub use {
    aggregator::{ChatAggregator, ChatTurn, StreamInterrupted, TurnHandle, TurnState, TurnUpdate},
    error::{Error, Result},
    session::{IdempotencyKey, SessionKey},
    sessions::{HistoryEntry, Role, resolve_model_id},
};
