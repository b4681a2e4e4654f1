//! Line framing over an accepted stream.
//!
//! The read side is owned by the session task and wrapped in [`Connection`].
//! The write side is moved into a dedicated writer task fed by a bounded
//! queue, so a slow peer only ever stalls its own writer. Both halves share a
//! [`CancellationToken`]: cancelling it unblocks a pending read with
//! end-of-stream and makes the writer flush what it can and shut down.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::sanitize;

/// How long a closing writer keeps trying to flush queued lines.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LineError {
    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads `\n`-terminated lines, refusing any longer than `max_len` bytes.
pub struct LineReader<R> {
    inner: R,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            max_len,
            buf: Vec::new(),
        }
    }

    /// Returns the next line without its terminator, or `None` at end-of-stream.
    /// A final unterminated line is still returned. Bytes of a line that was
    /// interrupted by cancellation are kept for the next call. After
    /// [`LineError::TooLong`] the stream is left mid-line.
    pub async fn read_line(&mut self) -> Result<Option<String>, LineError> {
        let limit = (self.max_len + 1).saturating_sub(self.buf.len()) as u64;
        (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > self.max_len {
            self.buf.clear();
            return Err(LineError::TooLong {
                limit: self.max_len,
            });
        } else if self.buf.is_empty() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// The read half of a session's stream plus its close signal.
pub struct Connection<R> {
    reader: LineReader<R>,
    closer: CancellationToken,
}

impl<R> Connection<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, max_line_len: usize, closer: CancellationToken) -> Self {
        Self {
            reader: LineReader::new(reader, max_line_len),
            closer,
        }
    }

    /// Waits for the next line. Yields `Ok(None)` once the peer hangs up or
    /// [`Connection::close`] has been called.
    pub async fn read_line(&mut self) -> Result<Option<String>, LineError> {
        if self.closer.is_cancelled() {
            return Ok(None);
        }
        select! {
            biased;
            _ = self.closer.cancelled() => Ok(None),
            line = self.reader.read_line() => line,
        }
    }

    /// Idempotent; safe to call from any task holding the token.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }
}

/// Writes one framed line and flushes it before returning.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = sanitize(line);
    let mut encoded = Vec::with_capacity(body.len() + 1);
    encoded.extend_from_slice(body.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Spawns the task that owns the write half. It exits when the queue's
/// senders are gone or the token is cancelled; a write failure cancels the
/// token so the read side winds down as well. After cancellation, the line
/// in flight and anything still queued get [`DRAIN_GRACE`] to go out.
pub fn spawn_writer<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    closer: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let line = select! {
                biased;
                _ = closer.cancelled() => break,
                line = outbound.recv() => line,
            };
            let Some(line) = line else { break };

            let write = write_line(&mut writer, &line);
            tokio::pin!(write);
            let written = select! {
                written = &mut write => written,
                _ = closer.cancelled() => match timeout(DRAIN_GRACE, &mut write).await {
                    Ok(written) => written,
                    Err(_) => {
                        debug!("gave up writing to a stalled connection");
                        return;
                    }
                },
            };
            if let Err(err) = written {
                debug!(?err, "write to peer failed");
                closer.cancel();
                return;
            }
        }

        let drain = async {
            outbound.close();
            while let Some(line) = outbound.recv().await {
                write_line(&mut writer, &line).await?;
            }
            writer.shutdown().await
        };
        match timeout(DRAIN_GRACE, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(?err, "failed to flush closing connection"),
            Err(_) => debug!("gave up flushing a stalled connection"),
        }
    })
}
