//! Folds streamed `chat` events into one message per turn.
//!
//! Every `chat.send` opens a [`ChatTurn`] keyed by its session. `delta`
//! events append to the turn and are forwarded to the caller as they arrive,
//! `final` closes it. Connection loss or an `error`/`aborted` event
//! interrupts the turn but keeps the text received so far.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    clawlink_gateway::{GatewayClient, GatewayEvent},
    clawlink_protocol::{
        chat::{ChatEventPayload, ChatSendParams, ChatState},
        events, methods,
    },
    serde_json::Value,
    tokio::sync::mpsc,
    tracing::{debug, trace, warn},
};

use crate::{
    error::{Error, Result},
    session::IdempotencyKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    Final,
    Aborted,
}

/// One outstanding chat exchange within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub session_key: String,
    pub idempotency_key: IdempotencyKey,
    /// Run id acknowledged by `chat.send`, when the gateway reports one.
    pub run_id: Option<String>,
    pub accumulated_text: String,
    pub state: TurnState,
    pub error: Option<String>,
}

/// Progress notifications delivered through a [`TurnHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// A fragment arrived; `text` is everything accumulated so far.
    Delta { fragment: String, text: String },
    Final { text: String },
    Interrupted(StreamInterrupted),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chat stream on {session_key} interrupted: {reason}")]
pub struct StreamInterrupted {
    pub session_key: String,
    /// Text received before the interruption.
    pub partial_text: String,
    pub reason: String,
}

struct TurnSlot {
    turn: ChatTurn,
    updates: mpsc::UnboundedSender<TurnUpdate>,
}

impl TurnSlot {
    fn notify(&self, update: TurnUpdate) {
        if self.updates.send(update).is_err() {
            trace!(session_key = %self.turn.session_key, "turn handle dropped, update discarded");
        }
    }

    fn abort(&mut self, reason: String) {
        self.turn.state = TurnState::Aborted;
        self.turn.error = Some(reason.clone());
        debug!(
            session_key = %self.turn.session_key,
            partial_chars = self.turn.accumulated_text.len(),
            %reason,
            "chat turn interrupted"
        );
        self.notify(TurnUpdate::Interrupted(StreamInterrupted {
            session_key: self.turn.session_key.clone(),
            partial_text: self.turn.accumulated_text.clone(),
            reason,
        }));
    }
}

#[derive(Default)]
struct Turns {
    by_session: HashMap<String, TurnSlot>,
}

impl Turns {
    /// The only streaming session, used for events that omit `sessionKey`.
    fn sole_streaming(&self) -> Option<String> {
        let mut streaming = self
            .by_session
            .iter()
            .filter(|(_, slot)| slot.turn.state == TurnState::Streaming);
        match (streaming.next(), streaming.next()) {
            (Some((key, _)), None) => Some(key.clone()),
            _ => None,
        }
    }
}

/// Chat turn registry attached to one [`GatewayClient`].
#[derive(Clone)]
pub struct ChatAggregator {
    client: GatewayClient,
    turns: Arc<Mutex<Turns>>,
}

impl ChatAggregator {
    /// Subscribe to `chat` events and disconnects of `client`.
    pub fn attach(client: &GatewayClient) -> Self {
        let turns = Arc::new(Mutex::new(Turns::default()));
        {
            let turns = Arc::clone(&turns);
            client.subscribe(events::CHAT, move |event| handle_chat_event(&turns, event));
        }
        {
            let turns = Arc::clone(&turns);
            client.on_disconnect(move |reason| abort_streaming(&turns, &reason.to_string()));
        }
        Self {
            client: client.clone(),
            turns,
        }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    /// Open a turn on `session_key` and submit `message` with `chat.send`.
    ///
    /// Calling again with the same idempotency key while the turn is still
    /// streaming re-sends the request without resetting the turn; the new
    /// handle replaces the old one. A different key fails with
    /// [`Error::TurnInProgress`]. The same key after the turn went final
    /// resolves at once with the final text and sends nothing.
    pub async fn begin_turn(
        &self,
        session_key: &str,
        message: &str,
        idempotency_key: IdempotencyKey,
    ) -> Result<TurnHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
            match turns.by_session.get_mut(session_key) {
                Some(slot) if slot.turn.state == TurnState::Streaming => {
                    if slot.turn.idempotency_key != idempotency_key {
                        return Err(Error::TurnInProgress {
                            session_key: session_key.to_string(),
                        });
                    }
                    debug!(session_key, idempotency_key = %idempotency_key, "retrying chat turn");
                    if !slot.turn.accumulated_text.is_empty() {
                        let _ = tx.send(TurnUpdate::Delta {
                            fragment: String::new(),
                            text: slot.turn.accumulated_text.clone(),
                        });
                    }
                    slot.updates = tx;
                },
                Some(slot)
                    if slot.turn.state == TurnState::Final
                        && slot.turn.idempotency_key == idempotency_key =>
                {
                    debug!(
                        session_key,
                        idempotency_key = %idempotency_key,
                        "chat turn already final"
                    );
                    let _ = tx.send(TurnUpdate::Final {
                        text: slot.turn.accumulated_text.clone(),
                    });
                    return Ok(TurnHandle {
                        session_key: session_key.to_string(),
                        idempotency_key,
                        updates: rx,
                    });
                },
                _ => {
                    turns.by_session.insert(session_key.to_string(), TurnSlot {
                        turn: ChatTurn {
                            session_key: session_key.to_string(),
                            idempotency_key: idempotency_key.clone(),
                            run_id: None,
                            accumulated_text: String::new(),
                            state: TurnState::Streaming,
                            error: None,
                        },
                        updates: tx,
                    });
                },
            }
        }

        let params = ChatSendParams {
            session_key: session_key.to_string(),
            message: message.to_string(),
            idempotency_key: idempotency_key.to_string(),
        };
        match self.client.request::<_, Value>(methods::CHAT_SEND, &params).await {
            Ok(ack) => {
                if let Some(run_id) = ack.get("runId").and_then(Value::as_str) {
                    self.with_turn(session_key, &idempotency_key, |slot| {
                        slot.turn.run_id.get_or_insert_with(|| run_id.to_string());
                    });
                }
            },
            Err(e) => {
                warn!(session_key, error = %e, "chat.send failed");
                let reason = e.to_string();
                self.with_turn(session_key, &idempotency_key, |slot| {
                    if slot.turn.state == TurnState::Streaming {
                        slot.abort(reason);
                    }
                });
                return Err(e.into());
            },
        }

        Ok(TurnHandle {
            session_key: session_key.to_string(),
            idempotency_key,
            updates: rx,
        })
    }

    fn with_turn(&self, session_key: &str, key: &IdempotencyKey, f: impl FnOnce(&mut TurnSlot)) {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = turns.by_session.get_mut(session_key)
            && slot.turn.idempotency_key == *key
        {
            f(slot);
        }
    }

    /// Current state of the latest turn on `session_key`.
    pub fn snapshot(&self, session_key: &str) -> Option<ChatTurn> {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_session
            .get(session_key)
            .map(|slot| slot.turn.clone())
    }

    /// Drop a finished turn. Streaming turns are kept.
    pub fn forget(&self, session_key: &str) -> Option<ChatTurn> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if turns
            .by_session
            .get(session_key)
            .is_some_and(|slot| slot.turn.state == TurnState::Streaming)
        {
            return None;
        }
        turns.by_session.remove(session_key).map(|slot| slot.turn)
    }

    pub fn streaming_turns(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_session
            .values()
            .filter(|slot| slot.turn.state == TurnState::Streaming)
            .count()
    }
}

fn handle_chat_event(turns: &Mutex<Turns>, event: &GatewayEvent) {
    let payload: ChatEventPayload = match serde_json::from_value(event.payload.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "dropping malformed chat event");
            return;
        },
    };

    let mut turns = turns.lock().unwrap_or_else(|e| e.into_inner());
    let session_key = match payload.session_key.clone() {
        Some(key) => key,
        None => match turns.sole_streaming() {
            Some(key) => key,
            None => {
                debug!("chat event without sessionKey and no unambiguous turn");
                return;
            },
        },
    };
    let Some(slot) = turns.by_session.get_mut(&session_key) else {
        trace!(%session_key, "chat event for a session without a turn");
        return;
    };
    if slot.turn.state != TurnState::Streaming {
        debug!(%session_key, state = ?payload.state, "ignoring chat event for a finished turn");
        return;
    }

    match payload.state {
        ChatState::Delta => {
            let fragment = payload.text();
            if fragment.is_empty() {
                return;
            }
            slot.turn.accumulated_text.push_str(&fragment);
            let text = slot.turn.accumulated_text.clone();
            slot.notify(TurnUpdate::Delta { fragment, text });
        },
        ChatState::Final => {
            // A final that carries content is authoritative.
            let text = payload.text();
            if !text.is_empty() {
                slot.turn.accumulated_text = text;
            }
            slot.turn.state = TurnState::Final;
            debug!(%session_key, chars = slot.turn.accumulated_text.len(), "chat turn final");
            let text = slot.turn.accumulated_text.clone();
            slot.notify(TurnUpdate::Final { text });
        },
        ChatState::Error | ChatState::Aborted => {
            let reason = payload.error_message.unwrap_or_else(|| {
                if payload.state == ChatState::Error {
                    "gateway reported an error".into()
                } else {
                    "aborted by gateway".into()
                }
            });
            slot.abort(reason);
        },
        ChatState::Unknown => trace!(%session_key, "ignoring chat event with unknown state"),
    }
}

fn abort_streaming(turns: &Mutex<Turns>, reason: &str) {
    let mut turns = turns.lock().unwrap_or_else(|e| e.into_inner());
    for slot in turns.by_session.values_mut() {
        if slot.turn.state == TurnState::Streaming {
            slot.abort(reason.to_string());
        }
    }
}

/// Caller side of a turn.
pub struct TurnHandle {
    session_key: String,
    idempotency_key: IdempotencyKey,
    updates: mpsc::UnboundedReceiver<TurnUpdate>,
}

impl TurnHandle {
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    /// Next update, `None` after the terminal one has been taken or the turn
    /// was handed to a retry.
    pub async fn next(&mut self) -> Option<TurnUpdate> {
        self.updates.recv().await
    }

    /// Wait for the turn to end and return its final text.
    pub async fn finish(mut self) -> std::result::Result<String, StreamInterrupted> {
        let mut partial = String::new();
        while let Some(update) = self.next().await {
            match update {
                TurnUpdate::Delta { text, .. } => partial = text,
                TurnUpdate::Final { text } => return Ok(text),
                TurnUpdate::Interrupted(interrupted) => return Err(interrupted),
            }
        }
        Err(StreamInterrupted {
            session_key: self.session_key,
            partial_text: partial,
            reason: "turn was handed to a retry".into(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        clawlink_gateway::{
            ConnectOptions,
            memory::{MemoryConnector, MemoryPeer},
        },
        clawlink_protocol::ClientInfo,
        serde_json::json,
    };

    const KEY: &str = "agent:main:main";

    async fn setup() -> (ChatAggregator, MemoryPeer) {
        let (connector, mut peers) = MemoryConnector::new();
        let client = GatewayClient::new(ConnectOptions::new("ws://gateway.test", "t", ClientInfo {
            id: "openclaw-control-ui".into(),
            display_name: None,
            version: "0.3.0".into(),
            platform: "linux".into(),
            mode: "ui".into(),
        }));
        let aggregator = ChatAggregator::attach(&client);

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.connect(&connector).await })
        };
        let mut peer = peers.recv().await.unwrap();
        peer.accept_handshake().await.unwrap();
        task.await.unwrap().unwrap();
        (aggregator, peer)
    }

    async fn start_turn(
        aggregator: &ChatAggregator,
        peer: &mut MemoryPeer,
        session_key: &str,
        idempotency_key: &str,
    ) -> TurnHandle {
        let task = {
            let aggregator = aggregator.clone();
            let session_key = session_key.to_string();
            let idempotency_key = IdempotencyKey::from(idempotency_key);
            tokio::spawn(async move {
                aggregator
                    .begin_turn(&session_key, "hello there", idempotency_key)
                    .await
            })
        };
        let req = peer.recv_json().await.unwrap();
        assert_eq!(req["method"], "chat.send");
        assert_eq!(req["params"]["sessionKey"], session_key);
        assert_eq!(req["params"]["message"], "hello there");
        assert_eq!(req["params"]["idempotencyKey"], idempotency_key);
        peer.respond_ok(
            req["id"].as_str().unwrap(),
            json!({ "runId": idempotency_key, "status": "started" }),
        )
        .await;
        task.await.unwrap().unwrap()
    }

    fn chat(session_key: &str, state: &str, content: Value) -> Value {
        json!({
            "sessionKey": session_key,
            "state": state,
            "message": { "role": "assistant", "content": content },
        })
    }

    /// Round-trip a request so every frame sent before it has been dispatched.
    async fn settle(aggregator: &ChatAggregator, peer: &mut MemoryPeer) {
        let task = {
            let client = aggregator.client().clone();
            tokio::spawn(async move { client.send("sessions.list", json!({})).await })
        };
        let req = peer.recv_json().await.unwrap();
        peer.respond_ok(req["id"].as_str().unwrap(), json!({ "sessions": [] }))
            .await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn deltas_accumulate_until_final() {
        let (aggregator, mut peer) = setup().await;
        let mut turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        peer.emit("chat", chat(KEY, "delta", json!("lo"))).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;

        assert_eq!(
            turn.next().await,
            Some(TurnUpdate::Delta {
                fragment: "Hel".into(),
                text: "Hel".into()
            })
        );
        assert_eq!(
            turn.next().await,
            Some(TurnUpdate::Delta {
                fragment: "lo".into(),
                text: "Hello".into()
            })
        );
        assert_eq!(turn.finish().await.unwrap(), "Hello");

        let snapshot = aggregator.snapshot(KEY).unwrap();
        assert_eq!(snapshot.state, TurnState::Final);
        assert_eq!(snapshot.accumulated_text, "Hello");
        assert_eq!(snapshot.run_id.as_deref(), Some("k-1"));
    }

    #[tokio::test]
    async fn typed_parts_accumulate_the_same_way() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!([{ "type": "text", "text": "Hel" }])))
            .await;
        peer.emit(
            "chat",
            chat(
                KEY,
                "delta",
                json!([{ "type": "thinking", "text": "hmm" }, { "type": "text", "text": "lo" }]),
            ),
        )
        .await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;

        assert_eq!(turn.finish().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn fragments_after_final_are_ignored() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        peer.emit("chat", chat(KEY, "delta", json!("lo"))).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;
        peer.emit("chat", chat(KEY, "delta", json!(" world"))).await;
        peer.emit("chat", chat(KEY, "final", json!("Hello world"))).await;
        settle(&aggregator, &mut peer).await;

        assert_eq!(turn.finish().await.unwrap(), "Hello");
        assert_eq!(aggregator.snapshot(KEY).unwrap().accumulated_text, "Hello");
    }

    #[tokio::test]
    async fn final_content_replaces_accumulated_text() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        peer.emit("chat", chat(KEY, "final", json!("Hello, world."))).await;

        assert_eq!(turn.finish().await.unwrap(), "Hello, world.");
    }

    #[tokio::test]
    async fn connection_loss_preserves_partial_text() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        settle(&aggregator, &mut peer).await;
        drop(peer);

        let interrupted = turn.finish().await.unwrap_err();
        assert_eq!(interrupted.partial_text, "Hel");
        assert_eq!(interrupted.session_key, KEY);
        let snapshot = aggregator.snapshot(KEY).unwrap();
        assert_eq!(snapshot.state, TurnState::Aborted);
        assert_eq!(snapshot.accumulated_text, "Hel");
    }

    #[tokio::test]
    async fn close_mid_stream_interrupts_turn() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("partial"))).await;
        settle(&aggregator, &mut peer).await;
        aggregator.client().close();

        let interrupted = turn.finish().await.unwrap_err();
        assert_eq!(interrupted.partial_text, "partial");
        assert_eq!(interrupted.reason, "connection closed");
        assert_eq!(aggregator.streaming_turns(), 0);
    }

    #[tokio::test]
    async fn error_event_aborts_with_server_message() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        peer.emit(
            "chat",
            json!({ "sessionKey": KEY, "state": "error", "errorMessage": "model overloaded" }),
        )
        .await;

        let interrupted = turn.finish().await.unwrap_err();
        assert_eq!(interrupted.reason, "model overloaded");
        assert_eq!(interrupted.partial_text, "Hel");
        assert_eq!(aggregator.snapshot(KEY).unwrap().error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn rejected_send_aborts_turn() {
        let (aggregator, mut peer) = setup().await;
        let task = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                aggregator
                    .begin_turn(KEY, "hi", IdempotencyKey::from("k-1"))
                    .await
            })
        };
        let req = peer.recv_json().await.unwrap();
        peer.respond_err(req["id"].as_str().unwrap(), "INVALID_REQUEST", "unknown session")
            .await;

        let err = task.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::Gateway(clawlink_gateway::Error::Request { .. })));
        assert_eq!(aggregator.snapshot(KEY).unwrap().state, TurnState::Aborted);
    }

    #[tokio::test]
    async fn retry_with_same_key_keeps_one_turn() {
        let (aggregator, mut peer) = setup().await;
        let _first = start_turn(&aggregator, &mut peer, KEY, "k-1").await;
        peer.emit("chat", chat(KEY, "delta", json!("Hel"))).await;
        settle(&aggregator, &mut peer).await;

        let mut retried = start_turn(&aggregator, &mut peer, KEY, "k-1").await;
        assert_eq!(
            retried.next().await,
            Some(TurnUpdate::Delta {
                fragment: String::new(),
                text: "Hel".into()
            })
        );

        peer.emit("chat", chat(KEY, "delta", json!("lo"))).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;
        assert_eq!(retried.finish().await.unwrap(), "Hello");
        assert_eq!(aggregator.snapshot(KEY).unwrap().accumulated_text, "Hello");
    }

    #[tokio::test]
    async fn different_key_while_streaming_is_refused() {
        let (aggregator, mut peer) = setup().await;
        let _turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        let err = aggregator
            .begin_turn(KEY, "another", IdempotencyKey::from("k-2"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::TurnInProgress { .. }));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (aggregator, mut peer) = setup().await;
        let main = start_turn(&aggregator, &mut peer, KEY, "k-1").await;
        let side = start_turn(&aggregator, &mut peer, "agent:main:chat-2", "k-2").await;

        peer.emit("chat", chat("agent:main:chat-2", "delta", json!("side"))).await;
        peer.emit("chat", chat(KEY, "delta", json!("main"))).await;
        peer.emit("chat", chat("agent:other:main", "delta", json!("stray"))).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;
        peer.emit("chat", json!({ "sessionKey": "agent:main:chat-2", "state": "final" }))
            .await;

        assert_eq!(main.finish().await.unwrap(), "main");
        assert_eq!(side.finish().await.unwrap(), "side");
        assert!(aggregator.snapshot("agent:other:main").is_none());
    }

    #[tokio::test]
    async fn missing_session_key_routes_to_sole_turn() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;

        peer.emit("chat", json!({ "state": "delta", "message": { "content": "hi" } }))
            .await;
        peer.emit("chat", json!({ "state": "final" })).await;
        assert_eq!(turn.finish().await.unwrap(), "hi");

        assert!(aggregator.forget(KEY).is_some());
        assert!(aggregator.snapshot(KEY).is_none());
    }

    #[tokio::test]
    async fn same_key_after_final_returns_finished_text() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;
        peer.emit("chat", chat(KEY, "delta", json!("Hello"))).await;
        peer.emit("chat", json!({ "sessionKey": KEY, "state": "final" })).await;
        assert_eq!(turn.finish().await.unwrap(), "Hello");

        let retry = aggregator
            .begin_turn(KEY, "hello there", IdempotencyKey::from("k-1"))
            .await
            .unwrap();
        assert_eq!(retry.finish().await.unwrap(), "Hello");

        let turn = aggregator.snapshot(KEY).unwrap();
        assert_eq!(turn.state, TurnState::Final);
        assert_eq!(turn.accumulated_text, "Hello");

        // Nothing was resent: the next frame the gateway sees is this one.
        let ping = {
            let client = aggregator.client().clone();
            tokio::spawn(async move { client.send("sessions.list", json!({})).await })
        };
        let req = peer.recv_json().await.unwrap();
        assert_eq!(req["method"], "sessions.list");
        peer.respond_ok(req["id"].as_str().unwrap(), json!({ "sessions": [] }))
            .await;
        ping.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn new_key_after_final_starts_a_fresh_turn() {
        let (aggregator, mut peer) = setup().await;
        let turn = start_turn(&aggregator, &mut peer, KEY, "k-1").await;
        peer.emit("chat", chat(KEY, "final", json!("first"))).await;
        assert_eq!(turn.finish().await.unwrap(), "first");

        let mut next = start_turn(&aggregator, &mut peer, KEY, "k-2").await;
        let turn = aggregator.snapshot(KEY).unwrap();
        assert_eq!(turn.state, TurnState::Streaming);
        assert!(turn.accumulated_text.is_empty());

        peer.emit("chat", chat(KEY, "final", json!("second"))).await;
        assert_eq!(next.next().await, Some(TurnUpdate::Final { text: "second".into() }));
    }
}
