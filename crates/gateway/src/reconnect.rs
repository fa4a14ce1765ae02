//! Reconnect supervisor: re-establishes a session after it drops
//! unexpectedly, with exponential backoff between attempts.

use std::{sync::Arc, time::Duration};

use {
    clawlink_config::ReconnectSection,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    client::{ConnectionState, GatewayClient},
    error::Error,
    transport::Connector,
};

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReconnectSection::default())
    }
}

impl Backoff {
    pub fn from_config(section: &ReconnectSection) -> Self {
        Self {
            initial: Duration::from_millis(section.initial_delay_ms),
            max: Duration::from_millis(section.max_delay_ms.max(section.initial_delay_ms)),
            multiplier: section.multiplier.max(1.0),
        }
    }

    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Background task keeping a [`GatewayClient`] connected. It waits for the
/// session to drop, then retries until the handshake succeeds again, the
/// gateway rejects the credentials, or the client is closed.
pub struct Reconnector {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Reconnector {
    pub fn spawn(client: GatewayClient, connector: Arc<dyn Connector>, backoff: Backoff) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(client, connector, backoff, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the supervisor to exit on its own: the client was closed or
    /// the gateway refused the session.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    client: GatewayClient,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    cancel: CancellationToken,
) {
    let mut states = client.watch_state();
    loop {
        let dropped = async {
            states
                .wait_for(|s| matches!(s, ConnectionState::Disconnected | ConnectionState::Closed))
                .await
                .map(|s| *s)
        };
        let state = tokio::select! {
            _ = cancel.cancelled() => return,
            state = dropped => match state {
                Ok(state) => state,
                Err(_) => return,
            },
        };
        if state == ConnectionState::Closed {
            debug!("gateway client closed, reconnect supervisor exiting");
            return;
        }

        let mut attempt = 0u32;
        loop {
            let delay = backoff.delay(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to gateway");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {},
            }
            if client.state() == ConnectionState::Closed {
                return;
            }

            match client.connect(connector.as_ref()).await {
                Ok(()) => break,
                Err(Error::AlreadyConnected) => break,
                Err(e) if e.is_fatal_handshake() => {
                    warn!(error = %e, "gateway refused the session, giving up on reconnect");
                    return;
                },
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{client::ConnectOptions, memory::MemoryConnector},
        clawlink_protocol::ClientInfo,
    };

    fn client() -> GatewayClient {
        GatewayClient::new(ConnectOptions::new("ws://gateway.test", "", ClientInfo {
            id: "openclaw-control-ui".into(),
            display_name: None,
            version: "0.3.0".into(),
            platform: "linux".into(),
            mode: "ui".into(),
        }))
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn backoff_from_config_clamps_bad_values() {
        let backoff = Backoff::from_config(&ReconnectSection {
            enabled: true,
            initial_delay_ms: 500,
            max_delay_ms: 100,
            multiplier: 0.5,
        });
        assert_eq!(backoff.max, Duration::from_millis(500));
        assert_eq!(backoff.multiplier, 1.0);
        assert_eq!(backoff.delay(4), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transport_loss() {
        let (connector, mut peers) = MemoryConnector::new();
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let client = client();

        let first = {
            let client = client.clone();
            let connector = Arc::clone(&connector);
            tokio::spawn(async move { client.connect(connector.as_ref()).await })
        };
        let mut peer = peers.recv().await.unwrap();
        peer.accept_handshake().await.unwrap();
        first.await.unwrap().unwrap();

        let supervisor = Reconnector::spawn(client.clone(), connector, Backoff::default());
        drop(peer);

        let mut peer = peers.recv().await.unwrap();
        peer.accept_handshake().await.unwrap();
        let mut states = client.watch_state();
        states
            .wait_for(|s| *s == ConnectionState::Ready)
            .await
            .unwrap();

        client.close();
        supervisor.join().await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_credentials_are_rejected() {
        let (connector, mut peers) = MemoryConnector::new();
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let client = client();

        let first = {
            let client = client.clone();
            let connector = Arc::clone(&connector);
            tokio::spawn(async move { client.connect(connector.as_ref()).await })
        };
        let mut peer = peers.recv().await.unwrap();
        peer.accept_handshake().await.unwrap();
        first.await.unwrap().unwrap();

        let supervisor = Reconnector::spawn(client.clone(), connector, Backoff::default());
        drop(peer);

        let mut peer = peers.recv().await.unwrap();
        peer.challenge().await;
        let connect = peer.recv_json().await.unwrap();
        peer.respond_err(connect["id"].as_str().unwrap(), "UNAUTHORIZED", "token revoked")
            .await;

        let mut states = client.watch_state();
        states
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();
        supervisor.join().await;
        assert!(peers.try_recv().is_err(), "no further attempts after a fatal rejection");
    }
}
