//! Supervisor configuration.
//!
//! ```toml
//! [termination]
//! signal = "SIGINT"
//! close_timeout_secs = 10
//! exit_code = 0
//! ```

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Error;
use crate::result::Result;
use crate::signal::parse_signal;

/// Default bound on how long a signalled process may take to close.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Termination settings
    #[serde(default)]
    pub termination: TerminationConfig,
}

/// Settings used by [`Terminator`](crate::Terminator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// Signal sent when a request does not name one.
    #[serde(default = "default_signal")]
    pub signal: String,

    /// Per-process bound on the wait for closure, in seconds.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,

    /// Exit status of the host when the default completion terminates it.
    #[serde(default)]
    pub exit_code: i32,
}

fn default_signal() -> String {
    "SIGINT".to_string()
}

fn default_close_timeout_secs() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_SECS
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            signal: default_signal(),
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            exit_code: 0,
        }
    }
}

impl TerminationConfig {
    /// The configured default signal.
    pub fn signal(&self) -> Result<Signal> {
        parse_signal(&self.signal)
    }

    /// The configured close timeout.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl SupervisorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown signal name or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        self.termination.signal()?;

        if self.termination.close_timeout_secs == 0 {
            return Err(Error::config(
                "termination.close_timeout_secs must be greater than zero",
            ));
        }

        Ok(())
    }
}
