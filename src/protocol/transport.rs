//! Byte-stream endpoint abstraction.
//!
//! The framing layer only needs `read_exact`, `write_all` and `close`; the
//! same implementation serves pipes, sockets and the stdio of a spawned
//! remote shell. Each call carries an optional deadline; expiry aborts the
//! session with the timeout exit code. The underlying stream is never
//! assumed seekable.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SyncError};

/// Bounded number of extra reads attempted when a frame field arrives short.
const SHORT_READ_RETRIES: usize = 10;

#[async_trait]
pub trait Transport: Send {
    /// Read exactly `n` bytes. `Ok(None)` signals a clean EOF before any
    /// byte arrived; an EOF after a partial field is a short-read error.
    async fn read_exact(&mut self, n: usize) -> Result<Option<Bytes>>;

    /// Write the whole buffer.
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Transport over any pair of async stream halves.
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
    deadline: Option<Duration>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// `timeout_secs` of zero means blocking I/O with no deadline.
    pub fn new(reader: R, writer: W, timeout_secs: u64) -> Self {
        Self {
            reader,
            writer,
            deadline: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    async fn read_once(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.deadline {
            Some(d) => tokio::time::timeout(d, self.reader.read(buf))
                .await
                .map_err(|_| SyncError::Timeout(d.as_secs()))?
                .map_err(SyncError::Io),
            None => self.reader.read(buf).await.map_err(SyncError::Io),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_exact(&mut self, n: usize) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        let mut stalls = 0;
        while filled < n {
            let read = self.read_once(&mut buf[filled..]).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                stalls += 1;
                if stalls > SHORT_READ_RETRIES {
                    return Err(SyncError::ShortRead {
                        got: filled,
                        want: n,
                    });
                }
            } else {
                stalls = 0;
                filled += read;
            }
        }
        Ok(Some(Bytes::from(buf)))
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let fut = async {
            self.writer.write_all(data).await?;
            self.writer.flush().await
        };
        match self.deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| SyncError::Timeout(d.as_secs()))?
                .map_err(SyncError::Io),
            None => fut.await.map_err(SyncError::Io),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(SyncError::Io)
    }
}
