//! Buffered byte I/O over arbitrary async streams.
//!
//! [`ReadBuffer`] and [`WriteBuffer`] are the framed-I/O primitives everything
//! else is written in terms of: the read side keeps a growable window of
//! buffered-unread bytes with peek/line/require operations, the write side
//! accumulates reply tokens and flushes them in a single write.

use std::io;
use std::ops::Range;

use bytes::{Buf, BytesMut};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{unexpected_eof, Error, Result};

/// Buffers never shrink below this capacity.
pub(crate) const MIN_CAPACITY: usize = 4096;

/// Ceiling used for the write high-water mark and for deciding whether a
/// buffer is still worth pooling.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Longest tolerated line without a terminator before the stream is
/// considered hostile.
pub(crate) const MAX_LINE_SIZE: usize = 64 * 1024;

/// A read buffer over any async byte stream.
///
/// The buffer holds the bytes received but not yet consumed. Consumption
/// advances the front, refills append at the back; compaction happens when
/// the buffer reclaims consumed space before growing.
pub struct ReadBuffer<R> {
    rd: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> ReadBuffer<R> {
    pub fn new(rd: R) -> Self {
        Self::with_buffer(rd, BytesMut::with_capacity(MIN_CAPACITY))
    }

    /// Wraps a stream around a recycled buffer, usually one fetched from a
    /// [`BufferPool`](crate::pool::BufferPool).
    pub fn with_buffer(rd: R, mut buf: BytesMut) -> Self {
        buf.clear();
        buf.reserve(MIN_CAPACITY);
        Self { rd, buf }
    }

    /// Number of buffered-unread bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next byte without consuming it.
    pub async fn peek_byte(&mut self) -> Result<u8> {
        self.require(1).await?;
        Ok(self.buf[0])
    }

    /// Returns a view of `n` bytes starting `offset` bytes into the unread
    /// region, reading more data if needed. Never consumes.
    pub async fn peek_n(&mut self, offset: usize, n: usize) -> Result<&[u8]> {
        self.require(offset + n).await?;
        Ok(&self.buf[offset..offset + n])
    }

    /// Searches for the next line terminator starting at `offset` and returns
    /// the line's range (terminator included) within the unread region. Makes
    /// a single attempt to read more data when no terminator is buffered.
    /// Never consumes.
    pub async fn peek_line(&mut self, offset: usize) -> Result<Option<Range<usize>>> {
        if let Some(end) = self.find_line_end(offset) {
            return Ok(Some(offset..end + 1));
        }
        self.fill().await?;
        Ok(self.find_line_end(offset).map(|end| offset..end + 1))
    }

    /// Resolves a range previously returned by [`peek_line`](Self::peek_line).
    pub(crate) fn window(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }

    /// Consumes and returns one line, terminator included. Keeps reading
    /// until a terminator arrives, up to a sanity limit.
    pub async fn read_line(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(end) = self.find_line_end(0) {
                return Ok(self.buf.split_to(end + 1));
            }
            if self.buf.len() > MAX_LINE_SIZE {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                )));
            }
            self.fill().await?;
        }
    }

    /// Guarantees at least `n` buffered-unread bytes, growing the buffer as
    /// required. End of stream before `n` bytes surfaces as an I/O error.
    pub async fn require(&mut self, n: usize) -> Result<()> {
        while self.buf.len() < n {
            self.buf.reserve(n - self.buf.len());
            if self.rd.read_buf(&mut self.buf).await? == 0 {
                return Err(unexpected_eof());
            }
        }
        Ok(())
    }

    /// Performs a single read into the buffer's spare capacity.
    pub(crate) async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(MIN_CAPACITY);
        if self.rd.read_buf(&mut self.buf).await? == 0 {
            return Err(unexpected_eof());
        }
        Ok(())
    }

    /// Advances past any buffered run of `\r` and `\n`. Never reads.
    pub fn discard_crlf(&mut self) {
        while let Some(&c) = self.buf.first() {
            if c != b'\r' && c != b'\n' {
                return;
            }
            self.buf.advance(1);
        }
    }

    /// Advances by `n` bytes only when they are already buffered; a shorter
    /// buffer leaves everything in place. Trailer consumption relies on this
    /// being lenient.
    pub(crate) fn skip(&mut self, n: usize) {
        if self.buf.len() >= n {
            self.buf.advance(n);
        }
    }

    /// Discards exactly `n` bytes, reading as needed without growing the
    /// buffer beyond its current capacity.
    pub(crate) async fn skip_exact(&mut self, n: usize) -> Result<()> {
        let mut remaining = n;
        while remaining > 0 {
            if self.buf.is_empty() {
                self.fill().await?;
            }
            let take = remaining.min(self.buf.len());
            self.buf.advance(take);
            remaining -= take;
        }
        Ok(())
    }

    pub(crate) async fn read_byte(&mut self) -> Result<u8> {
        let c = self.peek_byte().await?;
        self.buf.advance(1);
        Ok(c)
    }

    /// Detaches the first `n` buffered bytes as a zero-copy view. The caller
    /// must have required them first.
    pub(crate) fn split_off_front(&mut self, n: usize) -> bytes::Bytes {
        self.buf.split_to(n).freeze()
    }

    /// Consumes the `\n` half of a CRLF terminator, waiting for it when a
    /// read boundary split the terminator. A clean end of stream and a
    /// missing `\n` are both tolerated.
    pub(crate) async fn consume_lf(&mut self) -> Result<()> {
        match self.peek_byte().await {
            Ok(b'\n') => {
                self.buf.advance(1);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) if err.is_eof() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Consumes one full line terminator (`\r\n`, bare `\r` or bare `\n`),
    /// waiting for bytes that have not arrived yet. A clean end of stream is
    /// tolerated, as is a terminator that is simply absent.
    pub(crate) async fn consume_crlf(&mut self) -> Result<()> {
        match self.peek_byte().await {
            Ok(b'\r') => {
                self.buf.advance(1);
                self.consume_lf().await
            }
            Ok(b'\n') => {
                self.buf.advance(1);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) if err.is_eof() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn find_line_end(&self, offset: usize) -> Option<usize> {
        if offset >= self.buf.len() {
            return None;
        }
        memchr(b'\n', &self.buf[offset..]).map(|pos| offset + pos)
    }

    /// Swaps in a new stream, retaining the grown buffer.
    pub fn reset(&mut self, rd: R) {
        self.rd = rd;
        self.buf.clear();
    }

    /// Releases the internal buffer for pooling.
    pub fn into_buffer(mut self) -> BytesMut {
        self.buf.clear();
        self.buf
    }
}

/// A write buffer over any async byte stream.
///
/// Appends are in-memory and infallible; [`flush`](Self::flush) commits the
/// whole buffer in one write. The `dirty` flag records whether a flush has
/// happened since the last [`mark_clean`](Self::mark_clean), which is how the
/// server tells "produced no output" apart from "produced output and flushed".
pub struct WriteBuffer<W> {
    wr: W,
    buf: BytesMut,
    dirty: bool,
}

impl<W: AsyncWrite + Unpin> WriteBuffer<W> {
    pub fn new(wr: W) -> Self {
        Self::with_buffer(wr, BytesMut::with_capacity(MIN_CAPACITY))
    }

    pub fn with_buffer(wr: W, mut buf: BytesMut) -> Self {
        buf.clear();
        buf.reserve(MIN_CAPACITY);
        Self {
            wr,
            buf,
            dirty: false,
        }
    }

    /// Number of bytes pending in the buffer.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.buf.extend_from_slice(&[byte]);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Writes the whole buffer to the stream and truncates it. Short writes
    /// are retried until the buffer is drained or the stream fails.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.wr.write_all(&self.buf).await?;
        self.wr.flush().await?;
        self.buf.clear();
        self.dirty = true;
        Ok(())
    }

    /// Appends a bulk whose payload is streamed from `src`.
    ///
    /// Small payloads land in the buffer's spare capacity. Anything that
    /// would not fit flushes the pending buffer first and is then copied to
    /// the stream through the buffer used as scratch space, so large payloads
    /// never force the buffer to grow.
    pub async fn write_from<S>(&mut self, src: &mut S, n: usize) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        self.push(b'$');
        self.extend(n.to_string().as_bytes());
        self.extend(b"\r\n");

        let start = self.buf.len();
        if self.buf.capacity() - start >= n + 2 {
            self.buf.resize(start + n, 0);
            src.read_exact(&mut self.buf[start..]).await?;
            self.extend(b"\r\n");
            return Ok(());
        }

        self.flush().await?;

        let scratch = self.buf.capacity();
        self.buf.resize(scratch, 0);
        let mut remaining = n;
        while remaining > 0 {
            let take = remaining.min(scratch);
            src.read_exact(&mut self.buf[..take]).await?;
            self.wr.write_all(&self.buf[..take]).await?;
            remaining -= take;
        }
        self.buf.clear();
        self.extend(b"\r\n");
        Ok(())
    }

    /// Swaps in a new stream, retaining the grown buffer.
    pub fn reset(&mut self, wr: W) {
        self.wr = wr;
        self.buf.clear();
        self.dirty = false;
    }

    /// Releases the internal buffer for pooling.
    pub fn into_buffer(mut self) -> BytesMut {
        self.buf.clear();
        self.buf
    }
}
