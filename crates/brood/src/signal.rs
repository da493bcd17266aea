//! Signal delivery seam.
//!
//! The [`Terminator`](crate::Terminator) never calls `kill(2)` directly; it
//! goes through a [`Signaller`] so tests can observe the fan-out.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::str::FromStr;

use crate::error::Error;

/// Outcome of a signal delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was delivered.
    Sent,
    /// The process no longer exists (it is exiting or already gone).
    Gone,
}

/// Sends signals to processes by id.
#[cfg_attr(test, mockall::automock)]
pub trait Signaller: Send + Sync {
    /// Deliver `signal` to `pid`.
    fn send(&self, pid: u32, signal: Signal) -> std::io::Result<Delivery>;
}

/// [`Signaller`] backed by `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSignaller;

impl Signaller for KillSignaller {
    fn send(&self, pid: u32, signal: Signal) -> std::io::Result<Delivery> {
        let pid = i32::try_from(pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
        })?;

        match signal::kill(Pid::from_raw(pid), signal) {
            Ok(()) => Ok(Delivery::Sent),
            Err(Errno::ESRCH) => Ok(Delivery::Gone),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }
}

/// Parse a signal name such as `"SIGTERM"`, `"TERM"` or `"term"`.
pub fn parse_signal(name: &str) -> crate::Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    Signal::from_str(&full).map_err(|_| Error::config(format!("Unknown signal '{}'", name)))
}
