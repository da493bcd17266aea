//! Error hierarchy for the process supervisor.
//!
//! ```text
//! Error (top-level)
//! ├── Launch(LaunchError)
//! ├── Registry(RegistryError)
//! ├── Termination(TerminationError)
//! └── Config(String)
//! ```
//!
//! Launch errors are fatal to a single launch only. Registry anomalies are
//! recoverable and mostly surface through the log. Termination errors always
//! name the handles that failed to confirm closure.
//!
//! # Examples
//!
//! ```rust
//! use brood::error::{Error, RegistryError};
//!
//! fn may_fail() -> Result<(), Error> {
//!     Err(RegistryError::EmptyRegistry.into())
//! }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::handle::{HandleId, HandleSummary};

/// Top-level error type for supervisor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A process could not be launched or its completion could not be observed.
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// The registry rejected an operation.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A termination request did not complete for every selected handle.
    #[error("Termination error: {0}")]
    Termination(#[from] TerminationError),

    /// Invalid supervisor configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` when the operating system refused to create the process.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Launch(LaunchError::SpawnFailed { .. }))
    }

    /// Returns `true` when a termination wait ran out of time.
    pub fn is_termination_timeout(&self) -> bool {
        matches!(self, Self::Termination(TerminationError::Timeout { .. }))
    }
}

/// Errors raised while creating a child process or waiting for it.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The command line was rejected before reaching the OS.
    #[error("Invalid command: {reason}")]
    InvalidCommand {
        /// Why the command was rejected
        reason: String,
    },

    /// The OS could not create the process (not found, permission denied, ...).
    #[error("Failed to spawn process {program}: {source}")]
    SpawnFailed {
        /// Program that failed to spawn
        program: String,
        /// Working directory requested for the child, if any
        working_directory: Option<PathBuf>,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The message channel for a channel-mode launch could not be set up.
    #[error("Failed to establish message channel for {program}: {source}")]
    Channel {
        /// Program the channel was meant for
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the child, or draining one of its pipes, failed.
    #[error("Failed to observe process {pid}: {source}")]
    Wait {
        /// Process ID of the child
        pid: u32,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The supervising task went away before reporting completion.
    #[error("Supervising task for process {pid} ended without reporting completion")]
    Abandoned {
        /// Process ID of the child
        pid: u32,
    },
}

impl LaunchError {
    /// Create an invalid command error.
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }
}

/// Registry anomalies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The handle cannot be tracked (already tracked or already closed).
    #[error("Invalid handle {id}: {reason}")]
    InvalidHandle {
        /// Handle that was rejected
        id: HandleId,
        /// Why it was rejected
        reason: String,
    },

    /// The handle is not tracked by the registry.
    #[error("Handle {id} is not registered")]
    NotFound {
        /// Handle that was looked up
        id: HandleId,
    },

    /// Removal was attempted while the registry tracks nothing.
    #[error("Cannot remove a handle from an empty registry")]
    EmptyRegistry,
}

/// Why a selected handle did not confirm closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnconfirmedReason {
    /// The signal was sent but no close was observed within the bound.
    TimedOut,
    /// The signal could not be delivered.
    SignalFailed(String),
    /// The wait was cancelled before a close was observed.
    Cancelled,
}

impl fmt::Display for UnconfirmedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::SignalFailed(reason) => write!(f, "signal failed: {}", reason),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A handle that was selected for termination but never confirmed closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unconfirmed {
    /// The handle in question
    pub handle: HandleSummary,
    /// What went wrong
    pub reason: UnconfirmedReason,
}

impl fmt::Display for Unconfirmed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.handle, self.reason)
    }
}

/// Errors returned by [`Terminator::kill_children`](crate::Terminator::kill_children).
#[derive(Debug, Error)]
pub enum TerminationError {
    /// At least one handle did not confirm closure within the configured bound.
    #[error("Termination timed out after {timeout:?}: {} of {} process(es) unconfirmed [{}]",
        .unconfirmed.len(), .confirmed + .unconfirmed.len(), list(.unconfirmed))]
    Timeout {
        /// Per-handle bound that was applied
        timeout: Duration,
        /// Number of handles that did confirm closure
        confirmed: usize,
        /// Handles that did not
        unconfirmed: Vec<Unconfirmed>,
    },

    /// Every wait that ran confirmed closure, but some signals could not be
    /// delivered, so those handles were never awaited.
    #[error("Termination incomplete: {} of {} process(es) could not be signalled [{}]",
        .unconfirmed.len(), .confirmed + .unconfirmed.len(), list(.unconfirmed))]
    Undelivered {
        /// Number of handles that did confirm closure
        confirmed: usize,
        /// Handles whose signal failed
        unconfirmed: Vec<Unconfirmed>,
    },

    /// The caller cancelled the wait.
    #[error("Termination cancelled: {} process(es) unconfirmed [{}]",
        .unconfirmed.len(), list(.unconfirmed))]
    Cancelled {
        /// Number of handles that confirmed closure before cancellation
        confirmed: usize,
        /// Handles still pending
        unconfirmed: Vec<Unconfirmed>,
    },
}

impl TerminationError {
    /// Handles that failed to confirm closure.
    pub fn unconfirmed(&self) -> &[Unconfirmed] {
        match self {
            Self::Timeout { unconfirmed, .. }
            | Self::Undelivered { unconfirmed, .. }
            | Self::Cancelled { unconfirmed, .. } => unconfirmed,
        }
    }

    /// Ids of the handles that failed to confirm closure.
    pub fn unconfirmed_ids(&self) -> Vec<HandleId> {
        self.unconfirmed().iter().map(|u| u.handle.id).collect()
    }
}

fn list(items: &[Unconfirmed]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
