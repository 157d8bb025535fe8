//! Response-side framing: the buffered writer handed to command handlers and
//! the client-side reader that consumes tagged replies.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bufio::{ReadBuffer, WriteBuffer};
use crate::codec::ReplyType;
use crate::error::Result;

/// The write half of a server connection, type-erased so that handlers stay
/// object-safe.
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered, protocol-aware response writer.
///
/// This is the handle command handlers receive: append any number of reply
/// tokens, and the connection driver flushes them in request order. Appends
/// are in-memory and cannot fail; only [`flush`](Self::flush) and
/// [`write_from`](Self::write_from) touch the transport.
pub struct ResponseWriter {
    wr: WriteBuffer<BoxedWrite>,
}

impl ResponseWriter {
    pub fn new(wr: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            wr: WriteBuffer::new(Box::new(wr)),
        }
    }

    pub fn with_buffer(wr: impl AsyncWrite + Send + Unpin + 'static, buf: BytesMut) -> Self {
        Self {
            wr: WriteBuffer::with_buffer(Box::new(wr), buf),
        }
    }

    /// Number of bytes pending in the buffer.
    pub fn buffered(&self) -> usize {
        self.wr.buffered()
    }

    /// Appends an array header.
    pub fn append_array_len(&mut self, n: usize) {
        self.wr.append_array_len(n);
    }

    /// Appends bulk bytes.
    pub fn append_bulk(&mut self, p: &[u8]) {
        self.wr.append_bulk(p);
    }

    /// Appends a bulk string.
    pub fn append_bulk_str(&mut self, s: &str) {
        self.wr.append_bulk_str(s);
    }

    /// Appends inline (status) bytes.
    pub fn append_inline(&mut self, p: &[u8]) {
        self.wr.append_inline(p);
    }

    /// Appends an inline (status) string.
    pub fn append_inline_str(&mut self, s: &str) {
        self.wr.append_inline_str(s);
    }

    /// Appends an error reply.
    pub fn append_error(&mut self, msg: &str) {
        self.wr.append_error(msg);
    }

    /// Appends an integer reply.
    pub fn append_int(&mut self, n: i64) {
        self.wr.append_int(n);
    }

    /// Appends a null bulk.
    pub fn append_nil(&mut self) {
        self.wr.append_nil();
    }

    /// Appends `+OK`.
    pub fn append_ok(&mut self) {
        self.wr.append_ok();
    }

    /// Appends a bulk whose payload is streamed from `src`; may flush the
    /// pending buffer to keep memory bounded.
    pub async fn write_from<S>(&mut self, src: &mut S, n: usize) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        self.wr.write_from(src, n).await
    }

    /// Commits the pending buffer to the connection. Handlers rarely need
    /// this; the driver flushes after every batch.
    pub async fn flush(&mut self) -> Result<()> {
        self.wr.flush().await
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.wr.is_dirty()
    }

    pub(crate) fn mark_clean(&mut self) {
        self.wr.mark_clean();
    }

    /// Swaps in a new stream, retaining the grown buffer.
    pub fn reset(&mut self, wr: impl AsyncWrite + Send + Unpin + 'static) {
        self.wr.reset(Box::new(wr));
    }

    /// Releases the internal buffer for pooling.
    pub fn into_buffer(self) -> BytesMut {
        self.wr.into_buffer()
    }
}

/// Client-side reader for tagged replies, in submission order.
///
/// Callers peek the pending reply's type and then read it with the matching
/// typed operation.
pub struct ResponseReader<R> {
    rd: ReadBuffer<R>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(rd: R) -> Self {
        Self {
            rd: ReadBuffer::new(rd),
        }
    }

    pub fn with_buffer(rd: R, buf: BytesMut) -> Self {
        Self {
            rd: ReadBuffer::with_buffer(rd, buf),
        }
    }

    /// The type of the next pending reply.
    pub async fn peek_type(&mut self) -> Result<ReplyType> {
        self.rd.peek_type().await
    }

    /// Reads a null bulk.
    pub async fn read_nil(&mut self) -> Result<()> {
        self.rd.read_nil().await
    }

    /// Reads a bulk reply.
    pub async fn read_bulk(&mut self) -> Result<Bytes> {
        self.rd.read_bulk().await
    }

    /// Reads a bulk reply as an owned string.
    pub async fn read_bulk_string(&mut self) -> Result<String> {
        self.rd.read_bulk_string().await
    }

    /// Reads an integer reply.
    pub async fn read_int(&mut self) -> Result<i64> {
        self.rd.read_int().await
    }

    /// Reads an array header; the elements follow as individual replies.
    /// A null array reads as `-1`.
    pub async fn read_array_len(&mut self) -> Result<i64> {
        self.rd.read_array_len().await
    }

    /// Reads a status reply.
    pub async fn read_status(&mut self) -> Result<String> {
        self.rd.read_status().await
    }

    /// Reads an error reply, returning its message.
    pub async fn read_error(&mut self) -> Result<String> {
        self.rd.read_error().await
    }

    /// Swaps in a new stream, retaining the grown buffer.
    pub fn reset(&mut self, rd: R) {
        self.rd.reset(rd);
    }

    /// Releases the internal buffer for pooling.
    pub fn into_buffer(self) -> BytesMut {
        self.rd.into_buffer()
    }
}
