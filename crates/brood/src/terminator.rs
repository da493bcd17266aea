//! Fan-out signalling and fan-in close confirmation.
//!
//! [`Terminator::kill_children`] works on a registry snapshot, so launches and
//! closes that happen while it runs neither block it nor get double-signalled.
//! Every selected handle that is still running is signalled once, then all
//! of them are awaited concurrently, each wait bounded by the close timeout.
//! A handle confirms once its process has been reaped. Handles that were
//! already reaped are confirmed without a signal, since their pid may have
//! been reused. The completion ([`OnDone`]) runs exactly once, and only when
//! every selected handle has confirmed.

use futures::future::join_all;
use nix::sys::signal::Signal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TerminationConfig;
use crate::error::{TerminationError, Unconfirmed, UnconfirmedReason};
use crate::handle::{HandleSummary, ProcessHandle};
use crate::registry::Registry;
use crate::result::Result;
use crate::signal::{Delivery, KillSignaller, Signaller};

/// What happens once every selected handle has closed.
pub enum OnDone {
    /// Exit the host process with the configured exit code.
    ExitHost,
    /// Run a callback.
    Callback(Box<dyn FnOnce() + Send>),
    /// Only return the report.
    Return,
}

impl fmt::Debug for OnDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitHost => f.write_str("ExitHost"),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Return => f.write_str("Return"),
        }
    }
}

/// Parameters of one `kill_children` call.
///
/// The defaults match a launcher that is itself shutting down: start at the
/// first registered handle, use the configured signal, exit the host when
/// done.
#[derive(Debug)]
pub struct TerminationRequest {
    start_index: Option<i64>,
    signal: Option<Signal>,
    close_timeout: Option<Duration>,
    on_done: OnDone,
    cancel: Option<CancellationToken>,
}

impl Default for TerminationRequest {
    fn default() -> Self {
        Self {
            start_index: None,
            signal: None,
            close_timeout: None,
            on_done: OnDone::ExitHost,
            cancel: None,
        }
    }
}

impl TerminationRequest {
    /// Request with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Position in registry order to start from. Negative means 0.
    pub fn start_index(mut self, index: i64) -> Self {
        self.start_index = Some(index);
        self
    }

    /// Signal to send instead of the configured one.
    pub fn signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Per-handle bound on the wait for closure.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Run `f` once every selected handle has closed.
    pub fn on_done(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_done = OnDone::Callback(Box::new(f));
        self
    }

    /// Do not exit the host; just return the report.
    pub fn return_only(mut self) -> Self {
        self.on_done = OnDone::Return;
        self
    }

    /// Stop waiting when `token` is cancelled. Signals already sent stay sent.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Outcome of a fully confirmed termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    /// Signal that was sent
    pub signal: Signal,
    /// Resolved start position in the snapshot
    pub start_index: usize,
    /// Number of signals actually delivered
    pub signalled: usize,
    /// Every selected handle, in registry order
    pub confirmed: Vec<HandleSummary>,
}

impl TerminationReport {
    /// Number of handles that were selected.
    pub fn selected(&self) -> usize {
        self.confirmed.len()
    }
}

/// Terminates registered children.
#[derive(Clone)]
pub struct Terminator {
    registry: Arc<Registry>,
    config: TerminationConfig,
    signaller: Arc<dyn Signaller>,
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Terminator {
    /// Create a terminator that signals through `kill(2)`.
    pub fn new(registry: Arc<Registry>, config: TerminationConfig) -> Self {
        Self {
            registry,
            config,
            signaller: Arc::new(KillSignaller),
        }
    }

    /// Replace the signal delivery mechanism.
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Termination settings in use.
    pub fn config(&self) -> &TerminationConfig {
        &self.config
    }

    /// Signal the selected children and wait for all of them to exit.
    ///
    /// An empty selection (empty registry, or a start index at or past the
    /// end) completes immediately without sending anything.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if no signal was given and
    ///   the configured one is invalid
    /// - [`TerminationError::Timeout`] if any selected handle failed to
    ///   confirm closure within the bound; every other handle is still awaited
    /// - [`TerminationError::Undelivered`] if no wait timed out but some
    ///   signals could not be delivered
    /// - [`TerminationError::Cancelled`] if the request's token fired first
    ///
    /// The completion is not run when an error is returned.
    pub async fn kill_children(&self, request: TerminationRequest) -> Result<TerminationReport> {
        let signal = match request.signal {
            Some(signal) => signal,
            None => self.config.signal()?,
        };
        let bound = request.close_timeout.unwrap_or_else(|| self.config.close_timeout());

        let snapshot = self.registry.snapshot();
        let start = resolve_start(request.start_index, snapshot.len());
        let selected = &snapshot[start..];

        info!(
            selected = selected.len(),
            start_index = start,
            signal = %signal,
            "Terminating children"
        );

        let mut pending = Vec::with_capacity(selected.len());
        let mut unconfirmed = Vec::new();
        let mut signalled = 0;

        for handle in selected {
            if handle.has_exited() {
                debug!(
                    handle_id = %handle.id(),
                    pid = handle.pid(),
                    "Already exited, not signalling"
                );
                pending.push(handle.clone());
                continue;
            }

            match self.signaller.send(handle.pid(), signal) {
                Ok(Delivery::Sent) => {
                    handle.mark_signalled(signal);
                    signalled += 1;
                    info!(
                        handle_id = %handle.id(),
                        pid = handle.pid(),
                        signal = %signal,
                        "Signal sent"
                    );
                    pending.push(handle.clone());
                }
                Ok(Delivery::Gone) => {
                    // exiting on its own, the reap will still be observed
                    debug!(handle_id = %handle.id(), pid = handle.pid(), "Process already gone");
                    pending.push(handle.clone());
                }
                Err(e) => {
                    warn!(
                        handle_id = %handle.id(),
                        pid = handle.pid(),
                        error = %e,
                        "Failed to send signal"
                    );
                    unconfirmed.push(Unconfirmed {
                        handle: handle.summary(),
                        reason: UnconfirmedReason::SignalFailed(e.to_string()),
                    });
                }
            }
        }

        let waits = join_all(pending.iter().map(|handle| async move {
            tokio::time::timeout(bound, handle.exited()).await.is_ok()
        }));

        let outcomes = match &request.cancel {
            Some(token) => tokio::select! {
                outcomes = waits => Some(outcomes),
                _ = token.cancelled() => None,
            },
            None => Some(waits.await),
        };

        let cancelled = outcomes.is_none();
        let mut confirmed = 0;
        let mut timed_out = false;
        for (i, handle) in pending.iter().enumerate() {
            let exited = match &outcomes {
                Some(outcomes) => outcomes[i],
                None => handle.has_exited(),
            };
            if exited {
                confirmed += 1;
                continue;
            }

            let reason = if cancelled {
                UnconfirmedReason::Cancelled
            } else {
                timed_out = true;
                UnconfirmedReason::TimedOut
            };
            unconfirmed.push(Unconfirmed {
                handle: handle.summary(),
                reason,
            });
        }

        if !unconfirmed.is_empty() {
            let err = if cancelled {
                warn!(confirmed, unconfirmed = unconfirmed.len(), "Termination cancelled");
                TerminationError::Cancelled {
                    confirmed,
                    unconfirmed,
                }
            } else if timed_out {
                error!(
                    confirmed,
                    unconfirmed = unconfirmed.len(),
                    timeout = ?bound,
                    "Termination timed out"
                );
                TerminationError::Timeout {
                    timeout: bound,
                    confirmed,
                    unconfirmed,
                }
            } else {
                error!(
                    confirmed,
                    unconfirmed = unconfirmed.len(),
                    "Termination incomplete, signals not delivered"
                );
                TerminationError::Undelivered {
                    confirmed,
                    unconfirmed,
                }
            };
            return Err(err.into());
        }

        let report = TerminationReport {
            signal,
            start_index: start,
            signalled,
            confirmed: selected.iter().map(ProcessHandle::summary).collect(),
        };
        info!(confirmed = report.selected(), signalled, "All selected children exited");

        self.complete(request.on_done);
        Ok(report)
    }

    fn complete(&self, on_done: OnDone) {
        match on_done {
            OnDone::Return => {}
            OnDone::Callback(f) => f(),
            OnDone::ExitHost => {
                info!(exit_code = self.config.exit_code, "Exiting host");
                std::process::exit(self.config.exit_code);
            }
        }
    }
}

/// Absent or negative means 0, past the end means an empty selection.
fn resolve_start(index: Option<i64>, len: usize) -> usize {
    match index {
        Some(i) if i > 0 => usize::try_from(i).map_or(len, |i| i.min(len)),
        _ => 0,
    }
}
