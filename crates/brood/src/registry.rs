//! Ordered registry of live process handles.
//!
//! The registry is an explicitly owned value: the [`Launcher`](crate::Launcher)
//! adds to it, closing handles remove themselves from it, and the
//! [`Terminator`](crate::Terminator) reads snapshots of it. Insertion order is
//! preserved and doubles as termination order.
//!
//! Every mutation is a single critical section over the underlying sequence,
//! so a snapshot never observes a half-added or half-removed handle. Snapshots
//! are copies; no lock is held while callers signal processes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use brood::{LaunchOptions, Launcher, Registry};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> brood::Result<()> {
//! let registry = Arc::new(Registry::new());
//! let launcher = Launcher::new(registry.clone());
//!
//! let launch = launcher.launch_streamed("sleep", &["5"], &LaunchOptions::default())?;
//! assert!(registry.contains(&launch.handle));
//! println!("Tracking {} process(es)", registry.len());
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::handle::{HandleId, ProcessHandle};

/// Thread-safe, insertion-ordered set of live handles.
#[derive(Debug, Default)]
pub struct Registry {
    handles: Mutex<Vec<ProcessHandle>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle.
    ///
    /// Fails with [`RegistryError::InvalidHandle`] if the handle is already
    /// tracked or has already closed. A closed handle would never deregister
    /// itself again and would linger forever.
    pub fn add(&self, handle: &ProcessHandle) -> Result<(), RegistryError> {
        let mut handles = self.handles.lock();

        if handle.is_closed() {
            warn!(
                handle_id = %handle.id(),
                pid = handle.pid(),
                "Refusing to register closed handle"
            );
            return Err(RegistryError::InvalidHandle {
                id: handle.id(),
                reason: "process has already closed".to_string(),
            });
        }

        if handles.iter().any(|h| h == handle) {
            warn!(
                handle_id = %handle.id(),
                pid = handle.pid(),
                "Refusing to register handle twice"
            );
            return Err(RegistryError::InvalidHandle {
                id: handle.id(),
                reason: "handle is already registered".to_string(),
            });
        }

        handles.push(handle.clone());
        debug!(
            handle_id = %handle.id(),
            pid = handle.pid(),
            tracked = handles.len(),
            "Registered handle"
        );
        Ok(())
    }

    /// Remove the first occurrence of `handle`.
    ///
    /// Fails with [`RegistryError::EmptyRegistry`] if nothing is tracked and
    /// with [`RegistryError::NotFound`] if the handle is not tracked. Neither
    /// failure modifies the registry.
    pub fn remove(&self, handle: &ProcessHandle) -> Result<ProcessHandle, RegistryError> {
        let mut handles = self.handles.lock();

        if handles.is_empty() {
            return Err(RegistryError::EmptyRegistry);
        }

        match handles.iter().position(|h| h == handle) {
            Some(index) => {
                let removed = handles.remove(index);
                debug!(
                    handle_id = %removed.id(),
                    pid = removed.pid(),
                    tracked = handles.len(),
                    "Deregistered handle"
                );
                Ok(removed)
            }
            None => Err(RegistryError::NotFound { id: handle.id() }),
        }
    }

    /// Copy of the current sequence, in insertion order.
    pub fn snapshot(&self) -> Vec<ProcessHandle> {
        self.handles.lock().clone()
    }

    /// Look up a handle by id.
    pub fn get(&self, id: HandleId) -> Option<ProcessHandle> {
        self.handles.lock().iter().find(|h| h.id() == id).cloned()
    }

    /// Whether `handle` is tracked.
    pub fn contains(&self, handle: &ProcessHandle) -> bool {
        self.handles.lock().iter().any(|h| h == handle)
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Process ids of all tracked handles, in order.
    pub fn pids(&self) -> Vec<u32> {
        self.handles.lock().iter().map(ProcessHandle::pid).collect()
    }
}
