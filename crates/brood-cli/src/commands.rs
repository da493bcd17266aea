//! One-off commands: `brood run` and `brood config show`.

use anyhow::{Context, Result};
use brood::{LaunchOptions, Supervisor, TerminationRequest};
use std::io::Write;
use tracing::info;

use crate::config::LauncherConfig;
use crate::server::{Shutdown, exit_code};

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Run `program` under supervision and return its exit code.
///
/// Buffered mode prints the captured output once the program is done,
/// streamed mode echoes it as it arrives. Ctrl-C terminates the program
/// with the configured signal.
pub async fn run(
    config: &LauncherConfig,
    program: &str,
    args: &[String],
    stream: bool,
) -> Result<i32> {
    let supervisor = Supervisor::new(config.supervisor())?;
    let mut shutdown = Shutdown::install()?;
    let options = LaunchOptions::default().inherit_environment().show_echo(stream);

    tokio::select! {
        code = run_to_exit(&supervisor, program, args, &options, stream) => code,
        name = shutdown.recv() => {
            info!(signal = name, program, "Interrupted, stopping child");
            let report = supervisor
                .kill_children(TerminationRequest::new().return_only())
                .await
                .context("Failed to stop child")?;
            info!(confirmed = report.selected(), "Child stopped");
            Ok(130)
        }
    }
}

async fn run_to_exit(
    supervisor: &Supervisor,
    program: &str,
    args: &[String],
    options: &LaunchOptions,
    stream: bool,
) -> Result<i32> {
    if stream {
        let launch = supervisor
            .launcher()
            .launch_streamed(program, args, options)
            .with_context(|| format!("Failed to run {}", program))?;
        // echo is enabled, chunks need no further handling
        drop(launch.output);
        let exit = launch.completion.wait().await?;
        return Ok(exit_code(exit));
    }

    let output = supervisor
        .launcher()
        .launch_buffered(program, args, options)
        .with_context(|| format!("Failed to run {}", program))?
        .wait()
        .await?;

    std::io::stdout().write_all(output.stdout.as_bytes())?;
    std::io::stderr().write_all(output.stderr.as_bytes())?;
    Ok(exit_code(output.exit))
}

/// Print the effective configuration.
pub fn show_config(config: &LauncherConfig, format: ConfigFormat) -> Result<()> {
    let text = match format {
        ConfigFormat::Toml => config.to_toml()?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize config")?
        }
    };
    println!("{}", text);
    Ok(())
}
