//! Client side of the agent gateway protocol.
//!
//! The gateway speaks JSON frames over a WebSocket: the client waits for a
//! `connect.challenge` event, authenticates with a `connect` request, then
//! issues correlated requests and receives pushed events.

pub mod client;
pub mod error;
pub mod memory;
pub mod reconnect;
pub mod transport;
pub mod ws;

pub use {
    client::{
        ConnectOptions, ConnectionState, DisconnectReason, GatewayClient, GatewayEvent,
    },
    error::{Error, Result},
    reconnect::{Backoff, Reconnector},
    transport::{Connector, Transport},
    ws::WsConnector,
};
