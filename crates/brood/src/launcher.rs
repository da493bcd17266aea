//! Process launching in buffered, streamed and channel mode.
//!
//! Every successful launch registers exactly one [`ProcessHandle`] before the
//! launch call returns. A supervising task owns the child. It moves the
//! handle to `Exited` the moment the child is reaped, then waits for the
//! captured stdio to drain before moving it to `Closed`, deregistering it
//! and resolving the launch's [`Completion`].
//!
//! A failed spawn returns [`LaunchError::SpawnFailed`] synchronously and
//! registers nothing.
//!
//! All launch methods spawn Tokio tasks and must be called from within a
//! Tokio runtime.

use std::io;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{self, MessageSender, MessageStream};
use crate::error::LaunchError;
use crate::handle::{ExitReport, LaunchMode, ProcessHandle};
use crate::options::LaunchOptions;
use crate::output::{OutputStream, PumpTarget, StreamKind, pump};
use crate::registry::Registry;
use crate::result::Result;

type PumpTask = JoinHandle<io::Result<Vec<u8>>>;

/// Resolves once the launched process has closed.
///
/// Dropping a `Completion` does not affect the process.
#[derive(Debug)]
pub struct Completion<T> {
    pid: u32,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
    fn new(pid: u32) -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { pid, rx })
    }

    /// Wait for the process to close.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(LaunchError::Abandoned { pid: self.pid }.into()),
        }
    }
}

/// Everything a buffered launch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedOutput {
    /// How the process ended
    pub exit: ExitReport,
    /// Complete standard output
    pub stdout: String,
    /// Complete standard error
    pub stderr: String,
}

impl BufferedOutput {
    /// Raw exit code, `None` if the process was killed by a signal.
    pub fn code(&self) -> Option<i32> {
        self.exit.code
    }
}

/// A process launched in buffered mode.
#[derive(Debug)]
pub struct BufferedLaunch {
    /// Supervisory handle, also tracked by the registry until close
    pub handle: ProcessHandle,
    /// Output and exit status, delivered after close
    pub completion: Completion<BufferedOutput>,
}

impl BufferedLaunch {
    /// Wait for the process to close and return its output.
    pub async fn wait(self) -> Result<BufferedOutput> {
        self.completion.wait().await
    }
}

/// A process launched in streamed mode.
#[derive(Debug)]
pub struct StreamedLaunch {
    /// Supervisory handle, also tracked by the registry until close
    pub handle: ProcessHandle,
    /// Incremental stdout/stderr chunks
    pub output: OutputStream,
    /// Exit status, delivered exactly once after close
    pub completion: Completion<ExitReport>,
}

impl StreamedLaunch {
    /// Wait for the process to close, discarding any unread output.
    pub async fn wait(self) -> Result<ExitReport> {
        self.completion.wait().await
    }
}

/// A process launched in channel mode.
#[derive(Debug)]
pub struct ChannelLaunch {
    /// Supervisory handle, also tracked by the registry until close
    pub handle: ProcessHandle,
    /// Incremental stdout/stderr, `None` when output capture was disabled
    pub output: Option<OutputStream>,
    /// Messages sent by the child, in order
    pub messages: MessageStream,
    /// Sends messages to the child
    pub sender: MessageSender,
    /// Exit status, delivered exactly once after close
    pub completion: Completion<ExitReport>,
}

impl ChannelLaunch {
    /// Wait for the process to close.
    pub async fn wait(self) -> Result<ExitReport> {
        self.completion.wait().await
    }
}

struct Spawned {
    child: Child,
    handle: ProcessHandle,
    messages: Option<(MessageSender, MessageStream)>,
}

struct Captured {
    exit: ExitReport,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Creates supervised child processes.
#[derive(Debug, Clone)]
pub struct Launcher {
    registry: Arc<Registry>,
}

impl Launcher {
    /// Create a launcher that registers into `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry this launcher registers into.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Launch a process whose complete stdout/stderr are delivered after exit.
    ///
    /// ```rust,no_run
    /// use brood::{LaunchOptions, Launcher, Registry};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> brood::Result<()> {
    /// let launcher = Launcher::new(Arc::new(Registry::new()));
    /// let output = launcher
    ///     .launch_buffered("echo", ["hi"], &LaunchOptions::default())?
    ///     .wait()
    ///     .await?;
    ///
    /// assert_eq!(output.code(), Some(0));
    /// assert_eq!(output.stdout, "hi\n");
    /// # Ok(())
    /// # }
    /// ```
    pub fn launch_buffered<I, S>(
        &self,
        program: &str,
        args: I,
        options: &LaunchOptions,
    ) -> Result<BufferedLaunch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Spawned { mut child, handle, .. } =
            self.spawn(program, collect_args(args), options, LaunchMode::Buffered)?;
        let pid = handle.pid();

        let collect = || PumpTarget {
            echo: options.show_echo,
            collect: true,
            forward: None,
        };
        let stdout = start_pump(child.stdout.take(), StreamKind::Stdout, pid, collect());
        let stderr = start_pump(child.stderr.take(), StreamKind::Stderr, pid, collect());

        let (tx, completion) = Completion::new(pid);
        let registry = self.registry.clone();
        let supervised = handle.clone();
        tokio::spawn(async move {
            let result = supervise(child, supervised, stdout, stderr, registry)
                .await
                .map(|captured| BufferedOutput {
                    exit: captured.exit,
                    stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
                });
            let _ = tx.send(result);
        });

        Ok(BufferedLaunch { handle, completion })
    }

    /// Launch a process whose stdout/stderr are delivered chunk by chunk.
    ///
    /// Within each stream chunks arrive in emission order. The completion
    /// resolves exactly once, after both streams have ended and the process
    /// has exited.
    pub fn launch_streamed<I, S>(
        &self,
        program: &str,
        args: I,
        options: &LaunchOptions,
    ) -> Result<StreamedLaunch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Spawned { child, handle, .. } =
            self.spawn(program, collect_args(args), options, LaunchMode::Streamed)?;

        let (output, completion) = self.supervise_streaming(child, &handle, options.show_echo);
        Ok(StreamedLaunch {
            handle,
            output: output.unwrap_or_else(|| OutputStream::channel().1),
            completion,
        })
    }

    /// Launch a process with a bidirectional JSON message channel.
    ///
    /// Output is streamed as in [`launch_streamed`](Self::launch_streamed)
    /// unless [`LaunchOptions::capture_output`] is `false`, in which case the
    /// child shares the supervisor's stdio.
    pub fn launch_channel<I, S>(
        &self,
        program: &str,
        args: I,
        options: &LaunchOptions,
    ) -> Result<ChannelLaunch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Spawned { child, handle, messages } =
            self.spawn(program, collect_args(args), options, LaunchMode::Channel)?;
        let Some((sender, messages)) = messages else {
            return Err(LaunchError::Channel {
                program: program.to_string(),
                source: io::Error::other("message channel missing"),
            }
            .into());
        };

        let (output, completion) = self.supervise_streaming(child, &handle, options.show_echo);
        Ok(ChannelLaunch {
            handle,
            output,
            messages,
            sender,
            completion,
        })
    }

    /// Run a command line through `/bin/sh -c` in buffered mode.
    pub fn run_shell(&self, command_line: &str, options: &LaunchOptions) -> Result<BufferedLaunch> {
        if command_line.trim().is_empty() {
            return Err(LaunchError::invalid_command("command line must not be empty").into());
        }
        self.launch_buffered("/bin/sh", ["-c", command_line], options)
    }

    fn supervise_streaming(
        &self,
        mut child: Child,
        handle: &ProcessHandle,
        echo: bool,
    ) -> (Option<OutputStream>, Completion<ExitReport>) {
        let pid = handle.pid();
        let captured = child.stdout.is_some() || child.stderr.is_some();

        let (output, stdout, stderr) = if captured {
            let (tx, output) = OutputStream::channel();
            let target = |forward| PumpTarget {
                echo,
                collect: false,
                forward: Some(forward),
            };
            let stdout =
                start_pump(child.stdout.take(), StreamKind::Stdout, pid, target(tx.clone()));
            let stderr = start_pump(child.stderr.take(), StreamKind::Stderr, pid, target(tx));
            (Some(output), stdout, stderr)
        } else {
            (None, None, None)
        };

        let (tx, completion) = Completion::new(pid);
        let registry = self.registry.clone();
        let supervised = handle.clone();
        tokio::spawn(async move {
            let result = supervise(child, supervised, stdout, stderr, registry)
                .await
                .map(|captured| captured.exit);
            let _ = tx.send(result);
        });

        (output, completion)
    }

    fn spawn(
        &self,
        program: &str,
        args: Vec<String>,
        options: &LaunchOptions,
        mode: LaunchMode,
    ) -> Result<Spawned> {
        if program.trim().is_empty() {
            return Err(LaunchError::invalid_command("program must not be empty").into());
        }

        let mut command = Command::new(program);
        command
            .args(&args)
            .env_clear()
            .envs(&options.environment)
            .stdin(Stdio::null());

        if mode != LaunchMode::Channel || options.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        if let Some(dir) = &options.working_directory {
            command.current_dir(dir);
        }

        let pair = if mode == LaunchMode::Channel {
            let (parent_end, child_end) =
                StdUnixStream::pair().map_err(|source| LaunchError::Channel {
                    program: program.to_string(),
                    source,
                })?;
            channel::install_in_child(&mut command, &child_end);
            Some((parent_end, child_end))
        } else {
            None
        };

        debug!(program, mode = %mode, ?args, "Spawning process");

        let child = command.spawn().map_err(|source| {
            warn!(program, mode = %mode, error = %source, "Failed to spawn process");
            LaunchError::SpawnFailed {
                program: program.to_string(),
                working_directory: options.working_directory.clone(),
                source,
            }
        })?;

        let Some(pid) = child.id() else {
            abandon(child);
            return Err(LaunchError::Wait {
                pid: 0,
                source: io::Error::other("child exited before its id could be read"),
            }
            .into());
        };

        let messages = match pair {
            Some((parent_end, child_end)) => {
                // the child holds its own copy now
                drop(child_end);
                match channel::from_socket(parent_end, pid) {
                    Ok(halves) => Some(halves),
                    Err(source) => {
                        abandon(child);
                        return Err(LaunchError::Channel {
                            program: program.to_string(),
                            source,
                        }
                        .into());
                    }
                }
            }
            None => None,
        };

        let handle = ProcessHandle::new(pid, program.to_string(), args, mode);
        if let Err(e) = self.registry.add(&handle) {
            abandon(child);
            return Err(e.into());
        }

        info!(handle_id = %handle.id(), pid, program, mode = %mode, "Process launched");

        Ok(Spawned {
            child,
            handle,
            messages,
        })
    }
}

fn collect_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().map(|a| a.as_ref().to_string()).collect()
}

fn start_pump<R>(
    reader: Option<R>,
    stream: StreamKind,
    pid: u32,
    target: PumpTarget,
) -> Option<PumpTask>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|reader| tokio::spawn(pump(reader, stream, pid, target)))
}

/// Kill and reap a child that will never be handed to a caller.
fn abandon(mut child: Child) {
    let _ = child.start_kill();
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

async fn drain(task: Option<PumpTask>) -> io::Result<Vec<u8>> {
    match task {
        Some(task) => task.await.unwrap_or_else(|e| Err(io::Error::other(e))),
        None => Ok(Vec::new()),
    }
}

/// Record the exit as soon as the child is reaped, then wait for stdio EOF
/// before closing and deregistering the handle.
///
/// The pumps run as their own tasks, so they keep draining while the child
/// is awaited.
async fn supervise(
    mut child: Child,
    handle: ProcessHandle,
    stdout: Option<PumpTask>,
    stderr: Option<PumpTask>,
    registry: Arc<Registry>,
) -> Result<Captured> {
    let pid = handle.pid();
    let status = child.wait().await;

    let exit = match &status {
        Ok(status) => ExitReport::from(*status),
        Err(e) => {
            warn!(handle_id = %handle.id(), pid, error = %e, "Failed to wait for process");
            ExitReport::default()
        }
    };
    handle.mark_exited(exit);
    debug!(
        handle_id = %handle.id(),
        pid,
        exit_code = ?exit.code,
        signal = ?exit.signal,
        "Process exited"
    );

    let (stdout, stderr) = tokio::join!(drain(stdout), drain(stderr));

    handle.mark_closed(exit);
    info!(
        handle_id = %handle.id(),
        pid,
        program = handle.program(),
        exit_code = ?exit.code,
        signal = ?exit.signal,
        "Process closed"
    );

    if let Err(e) = registry.remove(&handle) {
        warn!(
            handle_id = %handle.id(),
            pid,
            error = %e,
            "Registry anomaly while deregistering closed process"
        );
    }

    status.map_err(|source| LaunchError::Wait { pid, source })?;
    let stdout = stdout.map_err(|source| LaunchError::Wait { pid, source })?;
    let stderr = stderr.map_err(|source| LaunchError::Wait { pid, source })?;

    Ok(Captured { exit, stdout, stderr })
}
