//! # brood
//!
//! A child process supervisor: launch OS processes, track every live child
//! in one ordered registry, and terminate a contiguous slice of them with a
//! signal while waiting for every one to confirm it has exited.
//!
//! ## Features
//!
//! - **Three launch modes**: buffered (output after exit), streamed (output
//!   as it arrives) and channel (JSON messages over a socket pair)
//! - **Self-cleaning registry**: handles deregister themselves on close
//! - **Bounded termination**: fan-out signalling with per-handle timeouts and
//!   optional cancellation, reporting exactly which children did not exit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brood::{LaunchOptions, Supervisor, SupervisorConfig, TerminationRequest};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> brood::Result<()> {
//!     let supervisor = Supervisor::new(SupervisorConfig::default())?;
//!     let options = LaunchOptions::default().inherit_environment();
//!
//!     let mut server = supervisor
//!         .launcher()
//!         .launch_streamed("python3", ["-m", "http.server"], &options)?;
//!
//!     if let Some(chunk) = server.output.next().await {
//!         print!("{}", chunk.text());
//!     }
//!
//!     supervisor
//!         .kill_children(TerminationRequest::new().return_only())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

#[cfg(not(unix))]
compile_error!("brood supports Unix targets only");

pub mod channel;
pub mod config;
pub mod error;
pub mod handle;
pub mod launcher;
pub mod options;
pub mod output;
pub mod registry;
pub mod result;
pub mod signal;
pub mod supervisor;
pub mod terminator;

pub use channel::{MessageSender, MessageStream};
pub use config::{SupervisorConfig, TerminationConfig};
pub use error::{
    Error, LaunchError, RegistryError, TerminationError, Unconfirmed, UnconfirmedReason,
};
pub use handle::{ExitReport, HandleId, HandleState, HandleSummary, LaunchMode, ProcessHandle};
pub use launcher::{
    BufferedLaunch, BufferedOutput, ChannelLaunch, Completion, Launcher, StreamedLaunch,
};
pub use options::LaunchOptions;
pub use output::{OutputChunk, OutputStream, StreamKind};
pub use registry::Registry;
pub use result::Result;
pub use signal::{Delivery, KillSignaller, Signaller, parse_signal};
pub use supervisor::Supervisor;
pub use terminator::{OnDone, TerminationReport, TerminationRequest, Terminator};

pub use nix::sys::signal::Signal;
