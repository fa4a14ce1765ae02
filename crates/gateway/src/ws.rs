//! WebSocket transport backed by `tokio-tungstenite`.

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tokio_tungstenite::tungstenite::Message,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    transport::{CHANNEL_CAPACITY, Connector, Transport},
};

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<Transport> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint).await?;
        debug!(endpoint, "websocket connected");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Result<String>>(CHANNEL_CAPACITY);

        // Write loop: ends when every outbound sender is dropped, then sends
        // a close frame.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Read loop
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("dropping non-utf8 binary frame");
                            continue;
                        },
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by peer");
                        break;
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Err(Error::from(e))).await;
                        break;
                    },
                };
                if in_tx.send(Ok(text)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Transport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
