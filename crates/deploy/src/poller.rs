//! Periodic status polling with explicit start/stop.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    clawlink_config::DeploySection,
    tokio::{
        sync::{broadcast, watch},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    control::DeploymentControl,
    error::{Error, Result},
    types::DeploymentState,
};

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Floor for the polling period; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that can report the deployment's current state.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Result<DeploymentState>;
}

#[async_trait]
impl StatusSource for DeploymentControl {
    async fn status(&self) -> Result<DeploymentState> {
        DeploymentControl::status(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Queries a [`StatusSource`] immediately on `start()` and then on a fixed
/// interval until `stop()`.
///
/// Successful polls replace the stored snapshot; failed polls leave it alone
/// and are published on the error channel instead.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    stop_when_running: bool,
    snapshot: Arc<watch::Sender<Option<DeploymentState>>>,
    errors: broadcast::Sender<Error>,
    /// Held for the duration of each status call.
    gate: Arc<tokio::sync::Mutex<()>>,
    running: Mutex<Option<Running>>,
}

impl StatusPoller {
    /// Periods below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(source: Arc<dyn StatusSource>, interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(None);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            source,
            interval: interval.max(MIN_POLL_INTERVAL),
            stop_when_running: false,
            snapshot: Arc::new(snapshot),
            errors,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            running: Mutex::new(None),
        }
    }

    pub fn from_config(source: Arc<dyn StatusSource>, config: &DeploySection) -> Self {
        Self::new(source, config.poll_interval()).with_stop_when_running(config.stop_when_running)
    }

    /// Stop by itself once a snapshot reports the gateway running.
    pub fn with_stop_when_running(mut self, stop: bool) -> Self {
        self.stop_when_running = stop;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin polling. Calling this while already polling does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("status poller already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(PollLoop {
            source: Arc::clone(&self.source),
            interval: self.interval,
            stop_when_running: self.stop_when_running,
            snapshot: Arc::clone(&self.snapshot),
            errors: self.errors.clone(),
            gate: Arc::clone(&self.gate),
            cancel: cancel.clone(),
        }));
        debug!(interval_ms = self.interval.as_millis() as u64, "status poller started");
        *running = Some(Running { cancel, handle });
    }

    /// Stop polling. Once this returns no further status call is made.
    /// Safe to call in any state, any number of times.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        // An in-flight call is abandoned on cancellation and releases the
        // gate; every later iteration re-checks the token under it.
        drop(self.gate.lock().await);
        running.handle.abort();
        debug!("status poller stopped");
    }

    pub fn state(&self) -> PollerState {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.as_ref() {
            Some(r) if !r.handle.is_finished() => PollerState::Polling,
            _ => PollerState::Idle,
        }
    }

    /// Last successfully polled state, if any poll has succeeded yet.
    pub fn snapshot(&self) -> Option<DeploymentState> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DeploymentState>> {
        self.snapshot.subscribe()
    }

    /// Poll failures, in order. Lagging receivers lose the oldest entries.
    pub fn errors(&self) -> broadcast::Receiver<Error> {
        self.errors.subscribe()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(running) = running {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}

struct PollLoop {
    source: Arc<dyn StatusSource>,
    interval: Duration,
    stop_when_running: bool,
    snapshot: Arc<watch::Sender<Option<DeploymentState>>>,
    errors: broadcast::Sender<Error>,
    gate: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
}

async fn poll_loop(ctx: PollLoop) {
    // The first tick completes immediately.
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let _gate = ctx.gate.lock().await;
        if ctx.cancel.is_cancelled() {
            break;
        }
        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            result = ctx.source.status() => result,
        };

        match result {
            Ok(state) => {
                let running = state.running;
                debug!(running, containers = state.containers.len(), "deployment status");
                ctx.snapshot.send_replace(Some(state));
                if running && ctx.stop_when_running {
                    info!("gateway is running, status polling finished");
                    break;
                }
            },
            Err(e) => {
                warn!(error = %e, "status poll failed");
                let _ = ctx.errors.send(e);
            },
        }
    }
}
