// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Length-delimited frame codec.
//!
//! Wire format of one frame:
//! - 4 bytes: header length (big-endian u32)
//! - 8 bytes: body length (big-endian u64)
//! - N bytes: JSON-encoded [`Header`]
//! - M bytes: body
//!
//! The body is handed to the caller as a bounded reader so large uploads and
//! downloads stream without buffering. Any body bytes the caller leaves
//! unread are discarded before the next `receive` returns, so one slow or
//! careless handler cannot desynchronize the framing.

use crate::proto::Header;
use bytes::{BufMut, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Upper bound on the JSON header; anything larger is a protocol violation.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4 + 8;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("header too large: {0} bytes (max {MAX_HEADER_LEN})")]
    HeaderTooLarge(usize),
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] serde_json::Error),
    #[error("short body: sent {written} of {declared} bytes")]
    ShortBody { written: u64, declared: u64 },
}

/// A framed request/reply connection over a split byte stream.
///
/// Usable from both ends: the server loop drives it for each accepted
/// connection and clients (including the integration tests) speak the same
/// frames through it.
pub struct FramedConn<R, W> {
    reader: R,
    writer: W,
    /// Unconsumed bytes of the current frame's body.
    pending_body: u64,
}

impl<R, W> FramedConn<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending_body: 0,
        }
    }

    /// Read the next frame header. Returns the header and the declared body
    /// length; consume the body through [`FramedConn::body_reader`].
    pub async fn receive(&mut self) -> Result<(Header, u64), ProtocolError> {
        self.drain_body().await?;

        let header_len = self.reader.read_u32().await? as usize;
        let body_len = self.reader.read_u64().await?;
        if header_len > MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderTooLarge(header_len));
        }

        let mut header_buf = vec![0u8; header_len];
        self.reader.read_exact(&mut header_buf).await?;
        let header: Header = serde_json::from_slice(&header_buf)?;

        self.pending_body = body_len;
        Ok((header, body_len))
    }

    /// Bounded reader over the current frame's body. Reports end-of-stream
    /// once the declared body length is consumed; if the peer closes early
    /// the reader returns end-of-stream short, which the caller must detect
    /// by counting.
    pub fn body_reader(&mut self) -> BodyReader<'_, R> {
        BodyReader {
            inner: &mut self.reader,
            remaining: &mut self.pending_body,
        }
    }

    /// Send a header-only frame.
    pub async fn send(&mut self, header: &Header) -> Result<(), ProtocolError> {
        self.write_prefix_and_header(header, 0).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a frame whose body is streamed from `body`. Exactly `len` bytes
    /// are copied; a source that runs short is an error and the connection
    /// is no longer usable.
    pub async fn send_with_body<B>(
        &mut self,
        header: &Header,
        body: &mut B,
        len: u64,
    ) -> Result<(), ProtocolError>
    where
        B: AsyncRead + Unpin,
    {
        self.write_prefix_and_header(header, len).await?;
        let mut limited = body.take(len);
        let written = tokio::io::copy(&mut limited, &mut self.writer).await?;
        if written != len {
            return Err(ProtocolError::ShortBody {
                written,
                declared: len,
            });
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Consume and discard the rest of the current frame's body. Used
    /// before replying on a path that closes the connection, so the peer
    /// receives the reply instead of a reset.
    pub async fn discard_body(&mut self) -> Result<(), ProtocolError> {
        self.drain_body().await
    }

    /// Shut down the write half. Lets a client signal end-of-stream while
    /// still reading the reply.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    async fn write_prefix_and_header(
        &mut self,
        header: &Header,
        body_len: u64,
    ) -> Result<(), ProtocolError> {
        let header_bytes = serde_json::to_vec(header)?;
        let mut frame = BytesMut::with_capacity(LEN_PREFIX + header_bytes.len());
        frame.put_u32(header_bytes.len() as u32);
        frame.put_u64(body_len);
        frame.put_slice(&header_bytes);
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    async fn drain_body(&mut self) -> Result<(), ProtocolError> {
        let mut scratch = [0u8; 8 * 1024];
        while self.pending_body > 0 {
            let want = scratch.len().min(self.pending_body as usize);
            let n = self.reader.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed inside frame body",
                )
                .into());
            }
            self.pending_body -= n as u64;
        }
        Ok(())
    }
}

/// Reader limited to the declared body length of the current frame.
/// Consumption is tracked on the connection so leftovers can be drained.
pub struct BodyReader<'a, R> {
    inner: &'a mut R,
    remaining: &'a mut u64,
}

impl<R: AsyncRead + Unpin> AsyncRead for BodyReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if *this.remaining == 0 {
            return Poll::Ready(Ok(()));
        }
        let mut limited = buf.take(*this.remaining as usize);
        ready!(Pin::new(&mut *this.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        // The sub-buffer borrowed `buf`'s unfilled region; account for what
        // the inner reader put there.
        unsafe { buf.assume_init(n) };
        buf.advance(n);
        *this.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}
