//! A minimalist pipelining client connection.
//!
//! [`Conn`] pairs a [`RequestWriter`] with a [`ResponseReader`] over one
//! transport: write any number of commands, flush once, then read the
//! replies back in submission order. Connection pooling is left to the
//! caller.

use bytes::Bytes;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::codec::ReplyType;
use crate::error::Result;
use crate::request::RequestWriter;
use crate::response::ResponseReader;

pub struct Conn<S> {
    writer: RequestWriter<WriteHalf<S>>,
    reader: ResponseReader<ReadHalf<S>>,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (rd, wr) = split(stream);
        Self {
            writer: RequestWriter::new(wr),
            reader: ResponseReader::new(rd),
        }
    }

    /// Appends a full command to the pipeline.
    pub fn write_cmd(&mut self, cmd: &str, args: &[&[u8]]) {
        self.writer.write_cmd(cmd, args);
    }

    /// Appends a full command with string arguments to the pipeline.
    pub fn write_cmd_str(&mut self, cmd: &str, args: &[&str]) {
        self.writer.write_cmd_str(cmd, args);
    }

    /// Low-level: appends a multi-bulk header.
    pub fn write_array_len(&mut self, n: usize) {
        self.writer.write_array_len(n);
    }

    /// Low-level: appends one bulk.
    pub fn write_bulk(&mut self, p: &[u8]) {
        self.writer.write_bulk(p);
    }

    /// Low-level: appends one bulk string.
    pub fn write_bulk_str(&mut self, s: &str) {
        self.writer.write_bulk_str(s);
    }

    /// Low-level: appends a bulk streamed from a reader.
    pub async fn write_from<T>(&mut self, src: &mut T, n: usize) -> Result<()>
    where
        T: AsyncRead + Unpin,
    {
        self.writer.write_from(src, n).await
    }

    /// Number of request bytes pending in the buffer.
    pub fn buffered(&self) -> usize {
        self.writer.buffered()
    }

    /// Commits the pipeline. Call once the pipeline is complete, then read
    /// the replies.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }

    /// The type of the next pending reply.
    pub async fn peek_type(&mut self) -> Result<ReplyType> {
        self.reader.peek_type().await
    }

    /// Reads a null bulk reply.
    pub async fn read_nil(&mut self) -> Result<()> {
        self.reader.read_nil().await
    }

    /// Reads a bulk reply.
    pub async fn read_bulk(&mut self) -> Result<Bytes> {
        self.reader.read_bulk().await
    }

    /// Reads a bulk reply as an owned string.
    pub async fn read_bulk_string(&mut self) -> Result<String> {
        self.reader.read_bulk_string().await
    }

    /// Reads an integer reply.
    pub async fn read_int(&mut self) -> Result<i64> {
        self.reader.read_int().await
    }

    /// Reads an array header; elements follow as individual replies.
    pub async fn read_array_len(&mut self) -> Result<i64> {
        self.reader.read_array_len().await
    }

    /// Reads a status reply.
    pub async fn read_status(&mut self) -> Result<String> {
        self.reader.read_status().await
    }

    /// Reads an error reply, returning its message.
    pub async fn read_error(&mut self) -> Result<String> {
        self.reader.read_error().await
    }
}
