//! `brood start`: run the configured server until it exits or we are told to stop.

use anyhow::{Context, Result, bail};
use brood::{ExitReport, OutputStream, Supervisor, TerminationRequest};
use std::time::Duration;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{error, info, warn};

use crate::config::LauncherConfig;

/// SIGINT/SIGTERM listener for the launcher itself.
pub struct Shutdown {
    interrupt: Signal,
    terminate: Signal,
}

impl Shutdown {
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())
                .context("Failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    /// Wait for the next shutdown signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Wait until a stdout chunk contains `marker`.
///
/// The marker may be split across chunks.
pub async fn wait_ready(output: &mut OutputStream, marker: &str, timeout: Duration) -> Result<()> {
    let scan = async {
        let mut tail = String::new();
        while let Some(chunk) = output.recv().await {
            if !chunk.is_stdout() {
                continue;
            }
            tail.push_str(&chunk.text());
            if tail.contains(marker) {
                return Ok(());
            }

            let mut cut = tail.len().saturating_sub(marker.len());
            while !tail.is_char_boundary(cut) {
                cut += 1;
            }
            tail.drain(..cut);
        }
        bail!("server exited before printing '{}'", marker)
    };

    tokio::time::timeout(timeout, scan)
        .await
        .with_context(|| format!("server did not print '{}' within {:?}", marker, timeout))?
}

/// Start the server and supervise it. Returns the launcher's exit code.
pub async fn start(config: &LauncherConfig) -> Result<i32> {
    let server = &config.server;
    if server.command.trim().is_empty() {
        bail!("No server command configured; set [server] command in brood.toml");
    }

    let supervisor = Supervisor::new(config.supervisor())?;
    let mut shutdown = Shutdown::install()?;

    info!(
        command = %server.command,
        environment = %server.environment,
        "Starting server"
    );

    let mut launch = supervisor
        .launcher()
        .launch_streamed(&server.command, &server.args, &server.launch_options())
        .with_context(|| format!("Failed to start {}", server.command))?;
    let pid = launch.handle.pid();

    if let Some(marker) = &server.ready_marker {
        let ready = tokio::select! {
            ready = wait_ready(&mut launch.output, marker, server.ready_timeout()) => ready,
            name = shutdown.recv() => {
                info!(signal = name, "Shutdown requested during startup");
                return stop(&supervisor, config).await;
            }
        };

        if let Err(e) = ready {
            error!(pid, error = %e, "Server failed to become ready");
            if let Err(kill) = supervisor
                .kill_children(TerminationRequest::new().return_only())
                .await
            {
                warn!(error = %kill, "Failed to stop server after startup failure");
            }
            return Err(e);
        }
        info!(pid, "Server ready");
    }

    // further output is echoed by the launcher, nothing reads the stream
    drop(launch.output);

    tokio::select! {
        exit = launch.completion.wait() => {
            let exit = exit.context("Lost track of the server process")?;
            info!(pid, exit = %exit, "Server exited");
            Ok(exit_code(exit))
        }
        name = shutdown.recv() => {
            info!(signal = name, "Shutdown requested");
            stop(&supervisor, config).await
        }
    }
}

/// Terminate every child, then exit the launcher.
async fn stop(supervisor: &Supervisor, config: &LauncherConfig) -> Result<i32> {
    supervisor
        .kill_children(TerminationRequest::new())
        .await
        .context("Failed to stop children")?;
    Ok(config.termination.exit_code)
}

/// Shell convention: the exit code, or 128 + signal number.
pub fn exit_code(exit: ExitReport) -> i32 {
    match (exit.code, exit.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
