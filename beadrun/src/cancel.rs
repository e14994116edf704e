//! Cooperative cancellation shared by the schedulers and the signal sources.
//!
//! A first request is graceful: nothing new is dispatched and in-flight work
//! finishes with its natural result recorded. A second request (or
//! [`CancellationCoordinator::stop_now`]) is a hard stop: the scheduler
//! returns without waiting and in-flight beads stay `in_progress`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelState {
    Running,
    Graceful,
    Immediate,
}

/// Cloneable handle; every clone observes and escalates the same state.
#[derive(Debug, Clone)]
pub struct CancellationCoordinator {
    state: Arc<watch::Sender<CancelState>>,
}

impl Default for CancellationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CancelState::Running);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> CancelState {
        *self.state.borrow()
    }

    /// Escalate one step (`running -> graceful -> immediate`) and return the new state.
    pub fn request_cancel(&self) -> CancelState {
        self.state.send_if_modified(|state| {
            let next = match *state {
                CancelState::Running => CancelState::Graceful,
                CancelState::Graceful | CancelState::Immediate => CancelState::Immediate,
            };
            let changed = *state != next;
            *state = next;
            changed
        });
        let state = self.state();
        info!(?state, "cancellation requested");
        state
    }

    /// Jump straight to a hard stop.
    pub fn stop_now(&self) {
        self.state.send_if_modified(|state| {
            if *state == CancelState::Immediate {
                return false;
            }
            *state = CancelState::Immediate;
            true
        });
        info!("hard stop requested");
    }

    /// True once any cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state() != CancelState::Running
    }

    pub fn is_stopped_now(&self) -> bool {
        self.state() == CancelState::Immediate
    }

    /// Resolves once any cancellation was requested.
    pub async fn cancelled(&self) {
        self.wait_until(CancelState::Graceful).await;
    }

    /// Resolves once a hard stop was requested.
    pub async fn stopped_now(&self) {
        self.wait_until(CancelState::Immediate).await;
    }

    async fn wait_until(&self, at_least: CancelState) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state >= at_least).await;
    }

    /// Escalate on every Ctrl-C until a hard stop is reached.
    pub fn watch_ctrl_c(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(err = %err, "cannot listen for ctrl-c");
                    return;
                }
                if coordinator.request_cancel() == CancelState::Immediate {
                    return;
                }
            }
        })
    }

    /// Poll for `path` and request a graceful cancel when it appears.
    ///
    /// The flag file is removed once observed so the next run starts clean.
    pub fn watch_flag_file(&self, path: PathBuf, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                if coordinator.is_cancelled() {
                    return;
                }
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    info!(path = %path.display(), "cancel flag file found");
                    if let Err(err) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), err = %err, "cannot remove cancel flag file");
                    }
                    coordinator.request_cancel();
                    return;
                }
                debug!("cancel flag file absent");
                tokio::time::sleep(interval).await;
            }
        })
    }
}
