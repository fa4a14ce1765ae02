//! Message-oriented duplex channel underneath a gateway session.
//!
//! A [`Connector`] opens one [`Transport`]: text frames go out through
//! `outbound`, frames (or the error that ended the stream) come back through
//! `inbound`. Dropping `outbound` closes the underlying socket. The inbound
//! channel yields `None` once the peer is gone.

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::error::Result;

/// Buffer size for the per-connection frame channels.
pub const CHANNEL_CAPACITY: usize = 64;

pub struct Transport {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Result<String>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Transport>;
}
