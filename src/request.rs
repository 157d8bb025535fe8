//! Request-side framing: parsing inbound command streams and writing
//! outbound pipelines.
//!
//! Two request dialects are understood: the standard multi-bulk form
//! (`*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n`) and the legacy inline form
//! (`ECHO hello\r\n`), tokenised on runs of spaces and tabs.

use std::io;
use std::ops::Range;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bufio::{ReadBuffer, WriteBuffer, MAX_LINE_SIZE};
use crate::command::{Argument, Command};
use crate::error::{Error, ProtocolError, Result};

/// Parses pipelined requests from a byte stream into [`Command`] values.
pub struct RequestReader<R> {
    rd: ReadBuffer<R>,
}

impl<R: AsyncRead + Unpin> RequestReader<R> {
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

    /// Number of bytes received but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.rd.buffered()
    }

    /// Reads the next command, refilling `cmd` in place. Blank lines and
    /// empty arrays are skipped.
    ///
    /// Declared bulk lengths are trusted rather than validated against the
    /// payload, matching deployed Redis: `*1\r\n$4\r\nPING123\r\n` parses as
    /// `PING`, and the unclaimed `3` becomes the next (inline) command.
    pub async fn read_cmd(&mut self, cmd: &mut Command) -> Result<()> {
        cmd.reset();
        loop {
            let done = if self.rd.peek_byte().await? == b'*' {
                self.read_multi_bulk(cmd).await?
            } else {
                self.read_inline(cmd).await?
            };
            if done {
                return Ok(());
            }
        }
    }

    /// Returns the name of the next command without consuming any input.
    pub async fn peek_cmd(&mut self) -> Result<String> {
        let mut offset = 0;
        loop {
            let range = self.peek_full_line(offset).await?;

            enum Line {
                Blank,
                Inline(String),
                MultiBulk(i64),
            }

            let parsed = {
                let line = trim_line(self.rd.window(range.clone()));
                if line.is_empty() {
                    Line::Blank
                } else if line[0] == b'*' {
                    Line::MultiBulk(parse_size_line(
                        line,
                        b'*',
                        ProtocolError::InvalidMultiBulkLength,
                    )?)
                } else {
                    Line::Inline(first_word(line))
                }
            };
            offset = range.end;

            match parsed {
                Line::Blank => continue,
                Line::Inline(name) => return Ok(name),
                Line::MultiBulk(sz) if sz < 1 => continue,
                Line::MultiBulk(_) => {
                    let range = self.peek_full_line(offset).await?;
                    let sz = {
                        let line = trim_line(self.rd.window(range.clone()));
                        parse_size_line(line, b'$', ProtocolError::InvalidBulkLength)?
                    };
                    offset = range.end;
                    if sz < 0 {
                        return Err(ProtocolError::InvalidBulkLength.into());
                    }
                    let name = self.rd.peek_n(offset, sz as usize).await?;
                    return Ok(String::from_utf8_lossy(name).into_owned());
                }
            }
        }
    }

    /// Consumes and discards the next command without parsing it. Used by
    /// dispatchers that already replied to an unknown command and need the
    /// arguments drained from the stream.
    pub async fn skip_cmd(&mut self) -> Result<()> {
        loop {
            match self.rd.peek_byte().await? {
                b'\r' | b'\n' => {
                    self.rd.discard_crlf();
                }
                b'*' => {
                    let sz = self.rd.read_array_len().await?;
                    if sz < 1 {
                        continue;
                    }
                    for _ in 0..sz {
                        self.rd.skip_bulk().await?;
                    }
                    return Ok(());
                }
                _ => {
                    self.rd.read_line().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Peeks one line, waiting for the terminator to arrive when the line
    /// straddles a read boundary.
    async fn peek_full_line(&mut self, offset: usize) -> Result<Range<usize>> {
        loop {
            if let Some(range) = self.rd.peek_line(offset).await? {
                return Ok(range);
            }
            if self.rd.buffered() > offset + MAX_LINE_SIZE {
                return Err(unterminated_line());
            }
        }
    }

    async fn read_multi_bulk(&mut self, cmd: &mut Command) -> Result<bool> {
        let sz = self.rd.read_array_len().await?;
        if sz < 1 {
            return Ok(false);
        }

        let argc = (sz - 1) as usize;
        cmd.args.reserve(argc);

        let name = self.rd.read_bulk().await?;
        cmd.name.push_str(&String::from_utf8_lossy(&name));

        for _ in 0..argc {
            let arg = self.rd.read_bulk().await?;
            cmd.args.push(Argument(arg));
        }
        Ok(true)
    }

    async fn read_inline(&mut self, cmd: &mut Command) -> Result<bool> {
        let line = self.rd.read_line().await?.freeze();
        let end = trim_line(&line).len();

        let mut has_name = false;
        let mut i = 0;
        while i < end {
            if line[i] == b' ' || line[i] == b'\t' {
                i += 1;
                continue;
            }
            let start = i;
            while i < end && line[i] != b' ' && line[i] != b'\t' {
                i += 1;
            }
            if has_name {
                cmd.args.push(Argument(line.slice(start..i)));
            } else {
                cmd.name.push_str(&String::from_utf8_lossy(&line[start..i]));
                has_name = true;
            }
        }
        Ok(has_name)
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

/// Writes command pipelines to a byte stream; the client-side mirror of
/// [`RequestReader`]. Nothing reaches the wire until
/// [`flush`](RequestWriter::flush).
pub struct RequestWriter<W> {
    wr: WriteBuffer<W>,
}

impl<W: AsyncWrite + Unpin> RequestWriter<W> {
    pub fn new(wr: W) -> Self {
        Self {
            wr: WriteBuffer::new(wr),
        }
    }

    pub fn with_buffer(wr: W, buf: BytesMut) -> Self {
        Self {
            wr: WriteBuffer::with_buffer(wr, buf),
        }
    }

    /// Number of bytes pending in the buffer.
    pub fn buffered(&self) -> usize {
        self.wr.buffered()
    }

    /// Appends a full command to the pipeline.
    pub fn write_cmd(&mut self, cmd: &str, args: &[&[u8]]) {
        self.wr.append_array_len(args.len() + 1);
        self.wr.append_bulk_str(cmd);
        for arg in args {
            self.wr.append_bulk(arg);
        }
    }

    /// Appends a full command with string arguments to the pipeline.
    pub fn write_cmd_str(&mut self, cmd: &str, args: &[&str]) {
        self.wr.append_array_len(args.len() + 1);
        self.wr.append_bulk_str(cmd);
        for arg in args {
            self.wr.append_bulk_str(arg);
        }
    }

    /// Low-level: appends a multi-bulk header. Prefer
    /// [`write_cmd`](Self::write_cmd).
    pub fn write_array_len(&mut self, n: usize) {
        self.wr.append_array_len(n);
    }

    /// Low-level: appends one bulk.
    pub fn write_bulk(&mut self, p: &[u8]) {
        self.wr.append_bulk(p);
    }

    /// Low-level: appends one bulk string.
    pub fn write_bulk_str(&mut self, s: &str) {
        self.wr.append_bulk_str(s);
    }

    /// Low-level: appends a bulk streamed from a reader; oversize payloads
    /// are copied to the stream directly.
    pub async fn write_from<S>(&mut self, src: &mut S, n: usize) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        self.wr.write_from(src, n).await
    }

    /// Commits the pipeline to the stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.wr.flush().await
    }

    /// Swaps in a new stream, retaining the grown buffer.
    pub fn reset(&mut self, wr: W) {
        self.wr.reset(wr);
    }

    /// Releases the internal buffer for pooling.
    pub fn into_buffer(self) -> BytesMut {
        self.wr.into_buffer()
    }
}

fn trim_line(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last != b'\r' && last != b'\n' {
            break;
        }
        line = rest;
    }
    line
}

fn first_word(line: &[u8]) -> String {
    let start = line
        .iter()
        .position(|&c| c != b' ' && c != b'\t')
        .unwrap_or(line.len());
    let end = line[start..]
        .iter()
        .position(|&c| c == b' ' || c == b'\t')
        .map_or(line.len(), |i| start + i);
    String::from_utf8_lossy(&line[start..end]).into_owned()
}

/// Parses a `*<n>` or `$<n>` header from an already-trimmed line.
fn parse_size_line(line: &[u8], prefix: u8, invalid: ProtocolError) -> Result<i64> {
    let Some((&first, rest)) = line.split_first() else {
        return Err(invalid.into());
    };
    if first != prefix {
        return Err(ProtocolError::UnexpectedByte {
            expected: prefix as char,
            got: first as char,
        }
        .into());
    }

    let mut n: i64 = 0;
    let mut sign: i64 = 1;
    let mut first_char = true;
    let mut digits = false;
    for &c in rest {
        match c {
            b'0'..=b'9' => {
                n = n
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(i64::from(c - b'0')))
                    .ok_or(invalid.clone())?;
                digits = true;
            }
            b'-' if first_char => sign = -1,
            _ => return Err(invalid.into()),
        }
        first_char = false;
    }
    if !digits {
        return Err(invalid.into());
    }
    Ok(n * sign)
}

fn unterminated_line() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        "request line not terminated",
    ))
}
