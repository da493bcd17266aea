//! Supervisory handle for one spawned OS process.
//!
//! A [`ProcessHandle`] is cheap to clone; every clone refers to the same
//! process. The caller that launched the process holds one clone, the
//! [`Registry`](crate::Registry) holds another while the process is alive.
//!
//! Each handle owns a `watch` cell tracking its supervisory state:
//!
//! ```text
//! Running ──signal──▶ SignalSent ──reap──▶ Exited ──stdio EOF──▶ Closed
//!    └────────────────reap─────────────────┘
//! ```
//!
//! `Exited` is entered as soon as the process is reaped, which can be long
//! before `Closed` when a grandchild keeps the captured pipes open. Once a
//! handle has exited its pid may belong to someone else, so nothing signals
//! it any more. `Closed` is terminal. Waiting on [`ProcessHandle::exited`]
//! or [`ProcessHandle::closed`] resolves immediately when the state has
//! already been reached, so a late waiter never stalls on a notification
//! that has already fired.

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identity of a handle.
///
/// Process IDs can be recycled by the OS, handle ids never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(Uuid);

impl HandleId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a handle's output and messages are delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Complete stdout/stderr delivered once, after exit.
    Buffered,
    /// Incremental stdout/stderr chunks plus a final exit notification.
    Streamed,
    /// Bidirectional message channel plus optional streamed output.
    Channel,
}

impl LaunchMode {
    /// Lowercase name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffered => "buffered",
            Self::Streamed => "streamed",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a child process ended.
///
/// `code` is the raw OS exit code, unmodified. It is `None` when the child
/// was terminated by a signal, in which case `signal` carries the signal
/// number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReport {
    /// Exit code, if the child exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the child was killed by one
    pub signal: Option<i32>,
}

impl ExitReport {
    /// Whether the child exited normally with status zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => match Signal::try_from(signal) {
                Ok(sig) => write!(f, "killed by {}", sig),
                Err(_) => write!(f, "killed by signal {}", signal),
            },
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Supervisory state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Process is running and has not been signalled by the supervisor.
    Running,
    /// A termination signal was sent; exit not yet observed.
    SignalSent(Signal),
    /// Process has been reaped; captured stdio may still be draining.
    Exited(ExitReport),
    /// Process has exited and all of its captured stdio has been drained.
    Closed(ExitReport),
}

impl HandleState {
    /// Whether this is the terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Closed(_))
    }

    /// Exit report, once reaped.
    pub fn exit(&self) -> Option<ExitReport> {
        match self {
            Self::Exited(report) | Self::Closed(report) => Some(*report),
            _ => None,
        }
    }
}

/// Plain-data description of a handle, used in reports and errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSummary {
    /// Handle identity
    pub id: HandleId,
    /// OS process id
    pub pid: u32,
    /// Program the process was launched from
    pub program: String,
    /// Launch mode
    pub mode: LaunchMode,
}

impl fmt::Display for HandleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pid={} {}", self.program, self.pid, self.mode)
    }
}

#[derive(Debug)]
struct HandleInner {
    id: HandleId,
    pid: u32,
    program: String,
    args: Vec<String>,
    mode: LaunchMode,
    started_at: DateTime<Utc>,
    state: watch::Sender<HandleState>,
}

/// Identity and supervisory surface of one spawned process.
///
/// Equality is identity: two handles are equal when they refer to the same
/// launch, regardless of state.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: u32, program: String, args: Vec<String>, mode: LaunchMode) -> Self {
        let (state, _) = watch::channel(HandleState::Running);
        Self {
            inner: Arc::new(HandleInner {
                id: HandleId::new(),
                pid,
                program,
                args,
                mode,
                started_at: Utc::now(),
                state,
            }),
        }
    }

    /// Handle identity.
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// OS process id, fixed for the lifetime of the handle.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Program the process was launched from.
    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Arguments the process was launched with.
    pub fn args(&self) -> &[String] {
        &self.inner.args
    }

    /// Launch mode.
    pub fn mode(&self) -> LaunchMode {
        self.inner.mode
    }

    /// When the process was spawned.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Current supervisory state.
    pub fn state(&self) -> HandleState {
        *self.inner.state.borrow()
    }

    /// Whether the process has closed.
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.state().has_exited()
    }

    /// Exit report, once reaped.
    pub fn exit(&self) -> Option<ExitReport> {
        self.state().exit()
    }

    /// Wait until the process has been reaped.
    ///
    /// Resolves before [`closed`](Self::closed) when the process is gone but
    /// something else still holds its captured pipes.
    pub async fn exited(&self) -> ExitReport {
        self.wait_for(HandleState::has_exited).await
    }

    /// Wait until the process has closed.
    ///
    /// Resolves immediately if it already has. Not bounded: callers that
    /// need a bound wrap this in `tokio::time::timeout`.
    pub async fn closed(&self) -> ExitReport {
        self.wait_for(HandleState::is_closed).await
    }

    async fn wait_for(&self, reached: fn(&HandleState) -> bool) -> ExitReport {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(reached).await {
            Ok(state) => state.exit().unwrap_or_default(),
            // the sender lives in `self.inner`, it cannot be gone while we borrow it
            Err(_) => ExitReport::default(),
        }
    }

    /// Snapshot of the identifying fields.
    pub fn summary(&self) -> HandleSummary {
        HandleSummary {
            id: self.inner.id,
            pid: self.inner.pid,
            program: self.inner.program.clone(),
            mode: self.inner.mode,
        }
    }

    /// Record that a termination signal was sent. Returns `false` if the
    /// handle was not in the `Running` state.
    pub(crate) fn mark_signalled(&self, signal: Signal) -> bool {
        self.inner.state.send_if_modified(|state| match state {
            HandleState::Running => {
                *state = HandleState::SignalSent(signal);
                true
            }
            _ => false,
        })
    }

    /// Record that the process was reaped. Ignored once exited or closed.
    pub(crate) fn mark_exited(&self, report: ExitReport) {
        self.inner.state.send_if_modified(|state| {
            if state.has_exited() {
                false
            } else {
                *state = HandleState::Exited(report);
                true
            }
        });
    }

    /// Move to the terminal state. Later calls are ignored.
    pub(crate) fn mark_closed(&self, report: ExitReport) {
        self.inner.state.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = HandleState::Closed(report);
                true
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn detached(pid: u32, program: &str) -> Self {
        Self::new(pid, program.to_string(), Vec::new(), LaunchMode::Streamed)
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ProcessHandle {}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.summary(), self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handle_identity() {
        let a = ProcessHandle::detached(100, "sleep");
        let b = ProcessHandle::detached(100, "sleep");

        assert_eq!(a, a.clone());
        assert_ne!(a, b, "same pid must not imply same handle");
    }

    #[test]
    fn test_state_transitions() {
        let handle = ProcessHandle::detached(1, "sleep");
        assert_eq!(handle.state(), HandleState::Running);

        assert!(handle.mark_signalled(Signal::SIGTERM));
        assert_eq!(handle.state(), HandleState::SignalSent(Signal::SIGTERM));
        assert!(!handle.mark_signalled(Signal::SIGINT), "second signal does not overwrite");

        let report = ExitReport { code: None, signal: Some(15) };
        handle.mark_closed(report);
        assert_eq!(handle.exit(), Some(report));

        handle.mark_closed(ExitReport { code: Some(0), signal: None });
        assert_eq!(handle.exit(), Some(report), "closed is terminal");
        assert!(!handle.mark_signalled(Signal::SIGTERM));
    }

    #[test]
    fn test_exited_precedes_closed() {
        let handle = ProcessHandle::detached(1, "sh");
        assert!(handle.mark_signalled(Signal::SIGTERM));

        let report = ExitReport { code: Some(0), signal: None };
        handle.mark_exited(report);
        assert_eq!(handle.state(), HandleState::Exited(report));
        assert!(handle.has_exited());
        assert!(!handle.is_closed());
        assert_eq!(handle.exit(), Some(report));
        assert!(!handle.mark_signalled(Signal::SIGKILL), "a reaped pid is never signalled");

        handle.mark_exited(ExitReport { code: Some(1), signal: None });
        assert_eq!(handle.exit(), Some(report), "first reap wins");

        handle.mark_closed(report);
        assert!(handle.is_closed());
        handle.mark_exited(ExitReport::default());
        assert_eq!(handle.state(), HandleState::Closed(report));
    }

    #[tokio::test]
    async fn test_exited_resolves_without_close() {
        let handle = ProcessHandle::detached(1, "sh");
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.exited().await })
        };

        tokio::task::yield_now().await;
        handle.mark_exited(ExitReport { code: Some(4), signal: None });

        let report = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("exited() must not wait for stdio")
            .unwrap();
        assert_eq!(report.code, Some(4));
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_closed_resolves_for_already_closed_handle() {
        let handle = ProcessHandle::detached(1, "true");
        handle.mark_closed(ExitReport { code: Some(0), signal: None });

        let report = tokio::time::timeout(Duration::from_millis(100), handle.closed())
            .await
            .expect("closed() must not wait on a handle that already closed");
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_closed_wakes_waiter() {
        let handle = ProcessHandle::detached(1, "sleep");
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.closed().await })
        };

        tokio::task::yield_now().await;
        handle.mark_closed(ExitReport { code: Some(3), signal: None });

        let report = waiter.await.unwrap();
        assert_eq!(report.code, Some(3));
    }

    #[test]
    fn test_exit_report_display() {
        assert_eq!(ExitReport { code: Some(2), signal: None }.to_string(), "exit code 2");
        assert_eq!(
            ExitReport { code: None, signal: Some(2) }.to_string(),
            "killed by SIGINT"
        );
    }
}
