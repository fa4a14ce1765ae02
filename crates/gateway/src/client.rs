//! Gateway session: handshake, request/response correlation and event
//! fan-out over a [`Transport`].
//!
//! A [`GatewayClient`] is cheap to clone; all clones share one session.
//! Subscriptions survive reconnects, pending requests do not.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    clawlink_config::GatewaySection,
    clawlink_protocol::{
        ClientInfo, ConnectAuth, ConnectParams, ErrorShape, EventFrameInner, GatewayFrame,
        HelloOk, ProtocolRange, RequestFrame, ResponseFrameInner, error_codes, events, methods,
        subscriptions,
    },
    secrecy::{ExposeSecret, Secret},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    tokio::{
        sync::{mpsc, oneshot, watch},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::{Error, Result},
    transport::{Connector, Transport},
    ws::WsConnector,
};

// ── Public types ─────────────────────────────────────────────────────────────

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingChallenge,
    Authenticating,
    Ready,
    /// Closed on request. Terminal for the reconnect supervisor.
    Closed,
    /// The last connect attempt failed.
    Failed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::AwaitingChallenge | Self::Authenticating | Self::Ready)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    TransportLost(String),
    HealthTimeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed"),
            Self::TransportLost(detail) => write!(f, "connection lost: {detail}"),
            Self::HealthTimeout => f.write_str("no traffic from gateway within the health timeout"),
        }
    }
}

/// An event frame delivered to subscribers.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub event: String,
    pub payload: Value,
    pub seq: Option<u64>,
}

pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Everything needed to open and authenticate a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub endpoint: String,
    pub token: Secret<String>,
    pub client: ClientInfo,
    pub caps: Vec<String>,
    pub scopes: Vec<String>,
    pub protocol: ProtocolRange,
    pub handshake_timeout: Duration,
    /// `None` waits for responses indefinitely.
    pub request_timeout: Option<Duration>,
    /// Tear a ready session down after this long without inbound frames.
    pub health_timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, client: ClientInfo) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: Secret::new(token.into()),
            client,
            caps: Vec::new(),
            scopes: Vec::new(),
            protocol: ProtocolRange::default(),
            handshake_timeout: Duration::from_millis(clawlink_protocol::HANDSHAKE_TIMEOUT_MS),
            request_timeout: Some(Duration::from_millis(clawlink_protocol::REQUEST_TIMEOUT_MS)),
            health_timeout: Some(Duration::from_millis(clawlink_protocol::HEALTH_TIMEOUT_MS)),
        }
    }

    pub fn from_config(section: &GatewaySection) -> Self {
        Self {
            endpoint: section.url.clone(),
            token: section.token.clone(),
            client: section.client.client_info(),
            caps: section.client.caps.clone(),
            scopes: section.client.scopes.clone(),
            protocol: section.protocol_range(),
            handshake_timeout: section.handshake_timeout(),
            request_timeout: section.request_timeout(),
            health_timeout: section.health_timeout(),
        }
    }

    fn connect_params(&self) -> ConnectParams {
        let token = self.token.expose_secret();
        ConnectParams {
            min_protocol: self.protocol.min,
            max_protocol: self.protocol.max,
            client: self.client.clone(),
            caps: self.caps.clone(),
            scopes: (!self.scopes.is_empty()).then(|| self.scopes.clone()),
            auth: ConnectAuth {
                token: (!token.is_empty()).then(|| token.clone()),
            },
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Inner {
    options: ConnectOptions,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every connect attempt and by `close`; lets stale reader
    /// tasks and superseded handshakes recognize themselves.
    generation: AtomicU64,
    next_id: AtomicU64,
    connecting: tokio::sync::Mutex<()>,
    negotiated_protocol: Mutex<Option<u32>>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<PendingRequests>,
    subscribers: RwLock<HashMap<String, Vec<EventHandler>>>,
    disconnect_handlers: RwLock<Vec<DisconnectHandler>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct PendingRequest {
    method: String,
    submitted_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Requests awaiting a response on the current connection. `open` is false
/// whenever no session is ready, so late submissions fail fast.
#[derive(Default)]
struct PendingRequests {
    open: bool,
    entries: HashMap<String, PendingRequest>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl GatewayClient {
    pub fn new(options: ConnectOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                options,
                state,
                generation: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                connecting: tokio::sync::Mutex::new(()),
                negotiated_protocol: Mutex::new(None),
                outbound: Mutex::new(None),
                pending: Mutex::new(PendingRequests::default()),
                subscribers: RwLock::new(HashMap::new()),
                disconnect_handlers: RwLock::new(Vec::new()),
                reader: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Descriptor reported to the gateway during the handshake.
    pub fn client_descriptor(&self) -> &ClientInfo {
        &self.inner.options.client
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Protocol version agreed during the last successful handshake.
    pub fn negotiated_protocol(&self) -> Option<u32> {
        *self
            .inner
            .negotiated_protocol
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn pending_requests(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    // ── Connect ──────────────────────────────────────────────────────────

    /// Open a WebSocket to the configured endpoint and authenticate.
    pub async fn connect_ws(&self) -> Result<()> {
        self.connect(&WsConnector).await
    }

    /// Open a transport through `connector` and run the handshake. Resolves
    /// once the session is ready.
    pub async fn connect(&self, connector: &dyn Connector) -> Result<()> {
        let Ok(_connecting) = self.inner.connecting.try_lock() else {
            return Err(Error::AlreadyConnected);
        };
        if self.state().is_open() {
            return Err(Error::AlreadyConnected);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // Leave Closed so a `close` during the attempt is not a no-op.
        self.advance(generation, ConnectionState::Disconnected);
        let options = &self.inner.options;
        info!(endpoint = %options.endpoint, "connecting to gateway");

        let Transport {
            outbound,
            mut inbound,
        } = match connector.open(&options.endpoint).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(endpoint = %options.endpoint, error = %e, "gateway transport failed to open");
                self.fail_attempt(generation);
                return Err(e);
            },
        };
        if !self.advance(generation, ConnectionState::AwaitingChallenge) {
            debug!("connection closed while the transport was opening");
            return Err(Error::ConnectionClosed);
        }

        // `close` moves the state to Closed; that ends the handshake early and
        // drops the transport without writing to it.
        let mut state = self.inner.state.subscribe();
        let closed = async {
            let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
        };
        let handshake = tokio::select! {
            biased;
            () = closed => {
                debug!("connection closed while the handshake was in flight");
                return Err(Error::ConnectionClosed);
            },
            outcome = tokio::time::timeout(
                options.handshake_timeout,
                self.handshake(generation, &outbound, &mut inbound),
            ) => outcome,
        };
        let protocol = match handshake {
            Ok(Ok(protocol)) => protocol,
            Ok(Err(e)) => {
                warn!(error = %e, "gateway handshake failed");
                self.fail_attempt(generation);
                return Err(e);
            },
            Err(_) => {
                warn!(
                    timeout_ms = options.handshake_timeout.as_millis() as u64,
                    "gateway handshake timed out"
                );
                self.fail_attempt(generation);
                return Err(Error::HandshakeTimeout);
            },
        };

        *self
            .inner
            .negotiated_protocol
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(protocol);
        *self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(outbound);
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .open = true;

        // Ready before the reader exists, so a reader that ends at once
        // still sees a ready session and notifies disconnect handlers.
        if !self.advance(generation, ConnectionState::Ready) {
            debug!("connection closed while the handshake was in flight");
            drop(self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner()).take());
            self.inner
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .open = false;
            return Err(Error::ConnectionClosed);
        }

        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            generation,
            inbound,
        ));
        *self.inner.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            // Closed before the handle was stored.
            let reader = self.inner.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(handle) = reader {
                handle.abort();
            }
            return Err(Error::ConnectionClosed);
        }

        info!(protocol, "gateway session ready");
        Ok(())
    }

    async fn handshake(
        &self,
        generation: u64,
        outbound: &mpsc::Sender<String>,
        inbound: &mut mpsc::Receiver<Result<String>>,
    ) -> Result<u32> {
        // Nothing is sent until the gateway issues its challenge.
        loop {
            match GatewayFrame::parse(&next_frame(inbound).await?) {
                Ok(GatewayFrame::Event(ev)) if ev.event == events::CONNECT_CHALLENGE => break,
                Ok(_) => debug!("ignoring frame received before the connect challenge"),
                Err(e) => warn!(error = %e, "dropping malformed frame during handshake"),
            }
        }
        if !self.advance(generation, ConnectionState::Authenticating) {
            return Err(Error::ConnectionClosed);
        }

        let id = self.next_request_id("connect");
        let params = serde_json::to_value(self.inner.options.connect_params())?;
        let frame =
            serde_json::to_string(&RequestFrame::new(id.as_str(), methods::CONNECT, params))?;
        outbound
            .send(frame)
            .await
            .map_err(|_| Error::transport("connection closed during handshake"))?;

        loop {
            match GatewayFrame::parse(&next_frame(inbound).await?) {
                Ok(GatewayFrame::Response(res)) if res.id == id => return self.evaluate_hello(res),
                Ok(_) => debug!("ignoring frame while authenticating"),
                Err(e) => warn!(error = %e, "dropping malformed frame during handshake"),
            }
        }
    }

    fn evaluate_hello(&self, res: ResponseFrameInner) -> Result<u32> {
        let offered = self.inner.options.protocol;
        if !res.ok {
            let error = res
                .error
                .unwrap_or_else(|| ErrorShape::new(error_codes::UNAUTHORIZED, "connect rejected"));
            if error_codes::is_protocol_mismatch(&error.code) {
                return Err(Error::ProtocolMismatch {
                    offered,
                    server: None,
                    message: error.message,
                });
            }
            return Err(Error::AuthRejected(error));
        }

        let hello = match res.payload {
            Some(payload) => serde_json::from_value::<HelloOk>(payload).unwrap_or_else(|e| {
                debug!(error = %e, "unrecognized hello payload");
                HelloOk::default()
            }),
            None => HelloOk::default(),
        };
        if let Some(server) = &hello.server {
            debug!(server_version = %server.version, conn_id = ?server.conn_id, "gateway hello");
        }

        let protocol = hello.protocol.unwrap_or(offered.max);
        if !offered.contains(protocol) {
            return Err(Error::ProtocolMismatch {
                offered,
                server: Some(protocol),
                message: format!("gateway selected protocol {protocol}"),
            });
        }
        Ok(protocol)
    }

    fn fail_attempt(&self, generation: u64) {
        self.advance(generation, ConnectionState::Failed);
    }

    /// Move to `state` unless `close` or a newer attempt superseded
    /// `generation`. The check runs under the state lock.
    fn advance(&self, generation: u64, state: ConnectionState) -> bool {
        let mut current = false;
        self.inner.state.send_if_modified(|s| {
            current = self.inner.generation.load(Ordering::SeqCst) == generation;
            if current && *s != state {
                trace!(previous = ?*s, ?state, "gateway state change");
                *s = state;
                return true;
            }
            false
        });
        current
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Send an RPC request and wait for its response payload.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }

        let id = self.next_request_id("rpc");
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.open {
                return Err(Error::NotConnected);
            }
            pending.entries.insert(id.clone(), PendingRequest {
                method: method.to_string(),
                submitted_at: Instant::now(),
                tx,
            });
        }

        let frame = match serde_json::to_string(&RequestFrame::new(id.as_str(), method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.forget(&id);
                return Err(e.into());
            },
        };
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(outbound) = outbound else {
            self.forget(&id);
            return Err(Error::NotConnected);
        };

        debug!(%id, method, "gateway request");
        if outbound.send(frame).await.is_err() {
            self.forget(&id);
            return Err(Error::transport("connection writer closed"));
        }

        let outcome = match self.inner.options.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget(&id);
                    warn!(%id, method, "gateway request timed out");
                    return Err(Error::RequestTimeout {
                        method: method.to_string(),
                    });
                },
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| Err(Error::ConnectionClosed))
    }

    /// Typed wrapper around [`send`](Self::send).
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = self.send(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(payload)?)
    }

    fn forget(&self, id: &str) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .remove(id);
    }

    fn next_request_id(&self, prefix: &str) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Register a handler for `event`, or for every event with `"*"`.
    /// Handlers run on the reader task in registration order, exact-name
    /// handlers before wildcard ones, and must not block.
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register a handler invoked whenever a ready session ends.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.inner
            .disconnect_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    // ── Teardown ─────────────────────────────────────────────────────────

    /// Close the session. Pending requests fail with
    /// [`Error::ConnectionClosed`]. Calling it again is a no-op.
    pub fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.shutdown(DisconnectReason::Closed, true);
    }

    fn shutdown(&self, reason: DisconnectReason, abort_reader: bool) {
        let next = match reason {
            DisconnectReason::Closed => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        };
        let previous = self.inner.state.send_replace(next);
        if previous == ConnectionState::Closed {
            return;
        }

        // Dropping the sender closes the socket's write half.
        drop(self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner()).take());

        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.open = false;
            pending.entries.drain().collect()
        };
        for (id, request) in drained {
            debug!(%id, method = %request.method, "failing pending request");
            let err = match &reason {
                DisconnectReason::Closed => Error::ConnectionClosed,
                other => Error::transport(other.to_string()),
            };
            let _ = request.tx.send(Err(err));
        }

        let reader = self.inner.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if abort_reader && let Some(handle) = reader {
            handle.abort();
        }

        if previous == ConnectionState::Ready {
            match &reason {
                DisconnectReason::Closed => info!("gateway session closed"),
                other => warn!(reason = %other, "gateway session lost"),
            }
            let handlers = self
                .inner
                .disconnect_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for handler in handlers {
                handler(&reason);
            }
        }
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    fn dispatch(&self, text: &str) {
        let frame = match GatewayFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed gateway frame");
                return;
            },
        };
        match frame {
            GatewayFrame::Response(res) => self.resolve(res),
            GatewayFrame::Event(ev) => self.fan_out(ev),
            GatewayFrame::Request(req) => {
                debug!(id = %req.id, method = %req.method, "dropping server-initiated request");
            },
        }
    }

    fn resolve(&self, res: ResponseFrameInner) {
        let Some(request) = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .remove(&res.id)
        else {
            debug!(id = %res.id, "discarding response with no pending request");
            return;
        };

        debug!(
            id = %res.id,
            method = %request.method,
            ok = res.ok,
            elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
            "gateway response"
        );
        let outcome = if res.ok {
            Ok(res.payload.unwrap_or(Value::Null))
        } else {
            Err(Error::Request {
                method: request.method,
                error: res
                    .error
                    .unwrap_or_else(|| ErrorShape::new(error_codes::INTERNAL, "request failed")),
            })
        };
        let _ = request.tx.send(outcome);
    }

    fn fan_out(&self, ev: EventFrameInner) {
        let handlers: Vec<EventHandler> = {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(|e| e.into_inner());
            let exact = subscribers.get(&ev.event);
            let wildcard = (ev.event != subscriptions::WILDCARD)
                .then(|| subscribers.get(subscriptions::WILDCARD))
                .flatten();
            exact.into_iter().chain(wildcard).flatten().cloned().collect()
        };
        if handlers.is_empty() {
            trace!(event = %ev.event, "event without subscribers");
            return;
        }

        let event = GatewayEvent {
            event: ev.event,
            payload: ev.payload.unwrap_or(Value::Null),
            seq: ev.seq,
        };
        for handler in handlers {
            handler(&event);
        }
    }
}

async fn next_frame(inbound: &mut mpsc::Receiver<Result<String>>) -> Result<String> {
    match inbound.recv().await {
        Some(frame) => frame,
        None => Err(Error::transport("connection closed during handshake")),
    }
}

/// Reader task for one connection. Holds only a weak reference so dropping
/// every client handle ends the session.
async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::Receiver<Result<String>>,
) {
    let health = inner.upgrade().and_then(|i| i.options.health_timeout);
    let reason = loop {
        let next = match health {
            Some(limit) => match tokio::time::timeout(limit, inbound.recv()).await {
                Ok(next) => next,
                Err(_) => break DisconnectReason::HealthTimeout,
            },
            None => inbound.recv().await,
        };
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let client = GatewayClient { inner: strong };
        match next {
            Some(Ok(text)) => client.dispatch(&text),
            Some(Err(e)) => break DisconnectReason::TransportLost(e.to_string()),
            None => break DisconnectReason::TransportLost("closed by peer".into()),
        }
    };

    let Some(strong) = inner.upgrade() else {
        return;
    };
    if strong.generation.load(Ordering::SeqCst) != generation {
        debug!("ignoring teardown from a superseded connection");
        return;
    }
    GatewayClient { inner: strong }.shutdown(reason, false);
}
