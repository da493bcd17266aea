//! Supervisor facade owning one registry shared by a launcher and a terminator.

use std::sync::Arc;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::launcher::Launcher;
use crate::registry::Registry;
use crate::result::Result;
use crate::signal::Signaller;
use crate::terminator::{TerminationReport, TerminationRequest, Terminator};

/// A registry plus the launcher and terminator operating on it.
///
/// Independent supervisors never see each other's children.
#[derive(Debug, Clone)]
pub struct Supervisor {
    registry: Arc<Registry>,
    launcher: Launcher,
    terminator: Terminator,
}

impl Supervisor {
    /// Build a supervisor from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` is invalid.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new());
        debug!(
            signal = %config.termination.signal,
            close_timeout_secs = config.termination.close_timeout_secs,
            "Supervisor created"
        );

        Ok(Self {
            launcher: Launcher::new(registry.clone()),
            terminator: Terminator::new(registry.clone(), config.termination),
            registry,
        })
    }

    /// Replace the signal delivery mechanism.
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.terminator = self.terminator.with_signaller(signaller);
        self
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The launcher.
    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// The terminator.
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Shorthand for [`Terminator::kill_children`].
    pub async fn kill_children(&self, request: TerminationRequest) -> Result<TerminationReport> {
        self.terminator.kill_children(request).await
    }
}
