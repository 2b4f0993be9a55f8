//! Reconnect loop around a single remote client.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{watch, Notify},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    backoff::{Backoff, BackoffPolicy, BackoffStep, Severity},
    client::RemoteClient,
};

/// How often `stop` repeats its disconnect request while the loop is still
/// inside `connect`.
const DISCONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Connected,
    TransientDisconnect,
    /// Disconnects keep repeating; still retrying, but at escalated severity.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub policy: BackoffPolicy,
    pub network_name: String,
}

/// Callbacks into the owner of the supervisor.
#[async_trait]
pub trait SupervisorHooks: Send + Sync {
    /// Called once per unplanned end of `connect`, before the backoff sleep.
    async fn connection_lost(&self, message: &str, step: &BackoffStep);
}

pub struct Supervisor {
    client: Arc<dyn RemoteClient>,
    config: SupervisorConfig,
    intentional_disconnect: AtomicBool,
    running: AtomicBool,
    wake: Notify,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(client: Arc<dyn RemoteClient>, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            client,
            config,
            intentional_disconnect: AtomicBool::new(false),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            state,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        self.intentional_disconnect.load(Ordering::SeqCst)
    }

    /// Keeps the client connected until `stop` is called.
    ///
    /// Calling this while a loop is already running returns immediately.
    pub async fn start(&self, hooks: Arc<dyn SupervisorHooks>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("supervisor loop already running");
            return;
        }

        let mut backoff = Backoff::new(self.config.policy);
        while !self.is_stopping() {
            self.set_state(SupervisorState::Connecting);
            let result = self.client.connect().await;

            // the flag is only trusted once connect has returned
            if self.is_stopping() {
                info!("client connection finished");
                break;
            }

            let message = match result {
                Ok(()) => {
                    warn!("client connection finished unexpectedly");
                    "Client connection finished unexpectedly".to_string()
                }
                Err(err) => {
                    warn!(error = %err, "exception in connection");
                    format!("Exception in {} connection: {err}", self.config.network_name)
                }
            };

            let step = backoff.on_disconnect(Instant::now());
            self.set_state(match step.severity {
                Severity::Transient => SupervisorState::TransientDisconnect,
                Severity::Severe => SupervisorState::Fatal,
            });
            hooks.connection_lost(&message, &step).await;

            debug!(delay_secs = step.delay.as_secs(), "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(step.delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.set_state(SupervisorState::Idle);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Asks the loop to terminate and the client to disconnect, then waits for
    /// the loop to observe it.
    ///
    /// A disconnect that reaches the client before its connection is set up
    /// may be ignored, so the request is repeated until the loop is idle.
    pub async fn stop(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        let mut state = self.state.subscribe();
        loop {
            if let Err(err) = self.client.disconnect().await {
                warn!(error = %err, "failed to disconnect client");
            }
            let idle = tokio::time::timeout(
                DISCONNECT_RETRY_INTERVAL,
                state.wait_for(|s| *s == SupervisorState::Idle),
            )
            .await;
            if idle.is_ok() {
                break;
            }
            debug!("client still connected; repeating disconnect");
        }
    }

    /// Records what the client reported about the live connection.
    pub fn mark_connected(&self, connected: bool) {
        self.state.send_if_modified(|state| {
            let next = match (*state, connected) {
                (SupervisorState::Idle, _) | (SupervisorState::Connected, true) => return false,
                (_, true) => SupervisorState::Connected,
                (SupervisorState::Connected, false) => SupervisorState::TransientDisconnect,
                _ => return false,
            };
            *state = next;
            true
        });
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "supervisor state changed");
        }
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
