//! In-process transport for tests and embedding.
//!
//! Every [`MemoryConnector::open`] hands the far end of the new connection to
//! the receiver returned by [`MemoryConnector::new`], where a test plays the
//! gateway through [`MemoryPeer`].

use {
    async_trait::async_trait,
    clawlink_protocol::{ErrorShape, EventFrame, ResponseFrame, events},
    serde::Serialize,
    serde_json::{Value, json},
    tokio::sync::mpsc,
};

use crate::{
    error::{Error, Result},
    transport::{CHANNEL_CAPACITY, Connector, Transport},
};

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        (Self { peers }, accepted)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, endpoint: &str) -> Result<Transport> {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.peers
            .send(MemoryPeer {
                endpoint: endpoint.to_string(),
                to_client: in_tx,
                from_client: out_rx,
            })
            .map_err(|_| Error::transport(format!("nothing is listening on {endpoint}")))?;
        Ok(Transport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Gateway side of an in-memory connection.
pub struct MemoryPeer {
    endpoint: String,
    to_client: mpsc::Sender<Result<String>>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryPeer {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn send_raw(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(text.into())).await;
    }

    pub async fn send_json(&self, value: &Value) {
        self.send_raw(value.to_string()).await;
    }

    async fn send_frame<T: Serialize>(&self, frame: &T) {
        if let Ok(text) = serde_json::to_string(frame) {
            self.send_raw(text).await;
        }
    }

    pub async fn emit(&self, event: &str, payload: Value) {
        self.send_frame(&EventFrame::new(event, payload)).await;
    }

    pub async fn respond_ok(&self, id: &str, payload: Value) {
        self.send_frame(&ResponseFrame::ok(id, payload)).await;
    }

    pub async fn respond_err(&self, id: &str, code: &str, message: &str) {
        self.send_frame(&ResponseFrame::err(id, ErrorShape::new(code, message)))
            .await;
    }

    pub async fn challenge(&self) {
        self.emit(events::CONNECT_CHALLENGE, json!({ "nonce": "memory-nonce" }))
            .await;
    }

    /// Terminate the stream with a transport error instead of a clean close.
    pub async fn fail(&self, message: &str) {
        let _ = self.to_client.send(Err(Error::transport(message))).await;
    }

    /// Next frame written by the client, `None` once the client hung up.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Play the gateway side of a successful handshake and return the
    /// client's `connect` request frame.
    pub async fn accept_handshake(&mut self) -> Option<Value> {
        self.challenge().await;
        let request = self.recv_json().await?;
        let id = request["id"].as_str().unwrap_or_default().to_string();
        self.respond_ok(
            &id,
            json!({
                "type": "hello-ok",
                "protocol": clawlink_protocol::PROTOCOL_VERSION,
                "server": { "version": "memory", "connId": "mem-1" },
            }),
        )
        .await;
        Some(request)
    }
}
