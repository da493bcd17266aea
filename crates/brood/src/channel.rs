//! Structured message channel between the supervisor and a channel-mode child.
//!
//! The channel is a Unix socket pair carrying newline-delimited JSON. The
//! child's end is installed as file descriptor [`CHANNEL_FD`] and its number
//! is exported in [`CHANNEL_FD_ENV`], so any language can pick it up. Rust
//! children can call [`connect_parent`].
//!
//! Inbound messages are delivered in the order they were written. Lines that
//! are not valid JSON are logged and skipped.

use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

/// File descriptor number of the channel inside the child.
pub const CHANNEL_FD: RawFd = 3;

/// Environment variable holding [`CHANNEL_FD`] in the child.
pub const CHANNEL_FD_ENV: &str = "BROOD_CHANNEL_FD";

/// Outbound half of a message channel.
#[derive(Debug, Clone)]
pub struct MessageSender {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl MessageSender {
    /// Serialize `message` as one JSON line and send it.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> io::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await
    }

    /// Close the outbound direction. The peer sees end-of-file.
    pub async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Inbound half of a message channel.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl MessageStream {
    /// Next message, or `None` once the peer closed its end.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Stream for MessageStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Wrap a connected std socket into a sender and a stream.
///
/// Spawns the reader task, so this must run inside a Tokio runtime.
pub fn from_socket(socket: StdUnixStream, pid: u32) -> io::Result<(MessageSender, MessageStream)> {
    socket.set_nonblocking(true)?;
    let socket = UnixStream::from_std(socket)?;
    let (read_half, write_half) = socket.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_messages(read_half, pid, tx));

    Ok((
        MessageSender {
            writer: Arc::new(Mutex::new(write_half)),
        },
        MessageStream { rx },
    ))
}

/// Connect to the supervisor from inside a channel-mode child.
///
/// Returns `None` when the process was not launched in channel mode.
pub fn connect_parent() -> Option<io::Result<(MessageSender, MessageStream)>> {
    let fd: RawFd = std::env::var(CHANNEL_FD_ENV).ok()?.parse().ok()?;
    // SAFETY: the supervisor installed this descriptor for us and nothing else
    // in this process owns it.
    let socket = unsafe { StdUnixStream::from_raw_fd(fd) };
    Some(from_socket(socket, std::process::id()))
}

async fn read_messages(read_half: OwnedReadHalf, pid: u32, tx: mpsc::UnboundedSender<Value>) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(message) => {
                        trace!(pid, bytes = line.len(), "Received channel message");
                        if tx.send(message).is_err() {
                            debug!(pid, "Message stream dropped, discarding further messages");
                        }
                    }
                    Err(e) => warn!(pid, error = %e, "Skipping malformed channel message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(pid, error = %e, "Channel read failed");
                break;
            }
        }
    }

    debug!(pid, "Message channel closed");
}

/// Make the child's end of the pair appear as [`CHANNEL_FD`] after exec.
pub(crate) fn install_in_child(command: &mut tokio::process::Command, child_end: &StdUnixStream) {
    let fd = child_end.as_raw_fd();
    command.env(CHANNEL_FD_ENV, CHANNEL_FD.to_string());

    // SAFETY: the closure runs between fork and exec and only calls the
    // async-signal-safe functions fcntl(2) and dup2(2).
    unsafe {
        command.pre_exec(move || install_fd(fd));
    }
}

fn install_fd(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain syscalls on descriptors owned by this (child) process.
    unsafe {
        if fd == CHANNEL_FD {
            // dup2 onto itself keeps FD_CLOEXEC, clear it by hand
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(fd, CHANNEL_FD) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
