//! Output capture for child stdio.
//!
//! Each captured stream is drained by its own task, so chunks of one stream
//! reach the caller in the order the child wrote them. Nothing orders stdout
//! relative to stderr.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Read size for a single chunk.
const CHUNK_SIZE: usize = 8 * 1024;

/// Which stdio stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// One read's worth of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Source stream
    pub stream: StreamKind,
    /// Raw bytes as read from the pipe
    pub data: Bytes,
}

impl OutputChunk {
    /// Chunk contents as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Whether the chunk came from stdout.
    pub fn is_stdout(&self) -> bool {
        self.stream == StreamKind::Stdout
    }
}

/// Incremental stdout/stderr of a streamed or channel launch.
///
/// Ends once both pipes have been drained. Dropping it does not affect the
/// child: its output keeps being drained and discarded.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputStream {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<OutputChunk>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next chunk, or `None` when both streams are exhausted.
    pub async fn recv(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }

    /// Drain everything that is left, split by stream.
    pub async fn collect_text(mut self) -> (String, String) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(chunk) = self.rx.recv().await {
            match chunk.stream {
                StreamKind::Stdout => stdout.push_str(&chunk.text()),
                StreamKind::Stderr => stderr.push_str(&chunk.text()),
            }
        }
        (stdout, stderr)
    }
}

impl Stream for OutputStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Where a pump delivers what it reads.
pub(crate) struct PumpTarget {
    pub(crate) echo: bool,
    pub(crate) collect: bool,
    pub(crate) forward: Option<mpsc::UnboundedSender<OutputChunk>>,
}

/// Drain `reader` to EOF. Returns the collected bytes when `collect` is set.
pub(crate) async fn pump<R>(
    mut reader: R,
    stream: StreamKind,
    pid: u32,
    target: PumpTarget,
) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);

    loop {
        buf.reserve(CHUNK_SIZE);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }

        let data = buf.split().freeze();
        trace!(pid, stream = %stream, bytes = n, "Received output chunk");

        if target.echo {
            echo(stream, &data).await;
        }
        if target.collect {
            collected.extend_from_slice(&data);
        }
        if let Some(tx) = &target.forward {
            // receiver gone means the caller stopped listening; keep draining
            let _ = tx.send(OutputChunk { stream, data });
        }
    }

    debug!(pid, stream = %stream, "Output stream closed");
    Ok(collected)
}

async fn echo(stream: StreamKind, data: &[u8]) {
    let result = match stream {
        StreamKind::Stdout => {
            let mut out = tokio::io::stdout();
            match out.write_all(data).await {
                Ok(()) => out.flush().await,
                Err(e) => Err(e),
            }
        }
        StreamKind::Stderr => {
            let mut err = tokio::io::stderr();
            match err.write_all(data).await {
                Ok(()) => err.flush().await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = result {
        debug!(stream = %stream, error = %e, "Failed to echo output");
    }
}
