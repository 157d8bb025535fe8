//! Typed RESP2 operations layered on the byte buffers.
//!
//! Wire tokens: `+status\r\n`, `-error\r\n`, `:int\r\n`, `$len\r\ndata\r\n`,
//! `$-1\r\n` (null bulk), `*len\r\n...` (array). Reference:
//! <https://redis.io/docs/reference/protocol-spec>

use bytes::Bytes;
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bufio::{ReadBuffer, WriteBuffer, MAX_LINE_SIZE};
use crate::error::{Error, ProtocolError, Result};

pub(crate) static CRLF: &[u8] = b"\r\n";
static NIL: &[u8] = b"$-1\r\n";
static OK: &[u8] = b"+OK\r\n";
static ZERO: &[u8] = b":0\r\n";
static ONE: &[u8] = b":1\r\n";

/// The type of the next pending reply, derived from its first one or two
/// bytes without consuming anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    Unknown,
    Array,
    Bulk,
    Status,
    Error,
    Int,
    Nil,
}

impl<R: AsyncRead + Unpin> ReadBuffer<R> {
    /// Peeks the type tag of the next reply.
    pub async fn peek_type(&mut self) -> Result<ReplyType> {
        self.require(1).await?;
        let t = match self.window(0..1)[0] {
            b'*' => ReplyType::Array,
            b'$' => {
                self.require(2).await?;
                if self.window(1..2)[0] == b'-' {
                    ReplyType::Nil
                } else {
                    ReplyType::Bulk
                }
            }
            b'+' => ReplyType::Status,
            b'-' => ReplyType::Error,
            b':' => ReplyType::Int,
            _ => ReplyType::Unknown,
        };
        Ok(t)
    }

    /// Reads an array header. Negative lengths (the null array) are passed
    /// through to the caller.
    pub async fn read_array_len(&mut self) -> Result<i64> {
        self.read_size(b'*', ProtocolError::InvalidMultiBulkLength)
            .await
    }

    /// Reads a bulk header. Null bulks are not valid here; use
    /// [`read_nil`](Self::read_nil) after peeking the type.
    pub async fn read_bulk_len(&mut self) -> Result<usize> {
        let sz = self
            .read_size(b'$', ProtocolError::InvalidBulkLength)
            .await?;
        if sz < 0 {
            return Err(ProtocolError::InvalidBulkLength.into());
        }
        Ok(sz as usize)
    }

    /// Reads one bulk value. The payload is a zero-copy view into the read
    /// buffer. The declared length is trusted: exactly that many bytes are
    /// read, then two trailer bytes are skipped.
    ///
    /// Payload and trailer are required together, so a read boundary between
    /// them cannot strand the CRLF and corrupt the next header. A stream
    /// that ends cleanly right after the payload is still accepted.
    pub async fn read_bulk(&mut self) -> Result<Bytes> {
        let sz = self.read_bulk_len().await?;
        match self.require(sz + 2).await {
            Ok(()) => {}
            Err(err) if err.is_eof() && self.buffered() >= sz => {}
            Err(err) => return Err(err),
        }
        let data = self.split_off_front(sz);
        self.skip(2);
        Ok(data)
    }

    /// Reads one bulk value as an owned string, replacing invalid UTF-8.
    pub async fn read_bulk_string(&mut self) -> Result<String> {
        let data = self.read_bulk().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Consumes one bulk value without retaining it. Oversize payloads are
    /// discarded chunk-wise, never growing the buffer.
    pub async fn skip_bulk(&mut self) -> Result<()> {
        let sz = self.read_bulk_len().await?;
        self.skip_exact(sz).await?;
        match self.require(2).await {
            Ok(()) => self.skip(2),
            Err(err) if err.is_eof() => {}
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Reads an integer reply.
    pub async fn read_int(&mut self) -> Result<i64> {
        let c = self.read_byte().await?;
        if c != b':' {
            return Err(Error::NotAnInt);
        }

        // Accumulate in negative space so that i64::MIN parses without
        // overflowing.
        let mut n: i64 = 0;
        let mut negative = false;
        let mut first = true;
        let mut digits = false;
        loop {
            let c = self.read_byte().await?;
            match c {
                b'0'..=b'9' => {
                    n = n
                        .checked_mul(10)
                        .and_then(|v| v.checked_sub(i64::from(c - b'0')))
                        .ok_or(Error::NotAnInt)?;
                    digits = true;
                }
                b'-' if first => negative = true,
                b'\r' if digits => {
                    // Wait for the other half of the terminator even when a
                    // read boundary split it.
                    self.consume_lf().await?;
                    break;
                }
                b'\n' if digits => break,
                _ => return Err(Error::NotAnInt),
            }
            first = false;
        }
        if negative {
            Ok(n)
        } else {
            n.checked_neg().ok_or(Error::NotAnInt)
        }
    }

    /// Reads a status reply.
    pub async fn read_status(&mut self) -> Result<String> {
        self.read_prefixed_line(b'+', || Error::NotAStatus).await
    }

    /// Reads an error reply, returning its message.
    pub async fn read_error(&mut self) -> Result<String> {
        self.read_prefixed_line(b'-', || Error::NotAnError).await
    }

    /// Reads a null bulk. A reply of any other type leaves the stream
    /// untouched and reports the mismatch.
    pub async fn read_nil(&mut self) -> Result<()> {
        if self.peek_n(0, 3).await? != b"$-1" {
            return Err(Error::NotANil);
        }
        self.skip(3);
        self.consume_crlf().await?;
        Ok(())
    }

    async fn read_prefixed_line(
        &mut self,
        prefix: u8,
        wrong_type: impl Fn() -> Error,
    ) -> Result<String> {
        let c = self.read_byte().await?;
        if c != prefix {
            return Err(wrong_type());
        }

        let pos = loop {
            if let Some(pos) = self.find_cr() {
                break pos;
            }
            if self.buffered() > MAX_LINE_SIZE {
                return Err(wrong_type());
            }
            self.fill().await?;
        };
        let line = self.split_off_front(pos);
        self.consume_crlf().await?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn find_cr(&self) -> Option<usize> {
        memchr(b'\r', self.window(0..self.buffered()))
    }

    /// Reads a size line: prefix byte, decimal digits with an optional
    /// leading minus, then a line terminator. A transport failure on the
    /// prefix byte itself is reported as a framing error so that a dispatcher
    /// can keep the connection alive.
    async fn read_size(&mut self, prefix: u8, invalid: ProtocolError) -> Result<i64> {
        match self.read_byte().await {
            Ok(c) if c == prefix => {}
            Ok(c) => {
                return Err(ProtocolError::UnexpectedByte {
                    expected: prefix as char,
                    got: c as char,
                }
                .into())
            }
            Err(_) => {
                return Err(ProtocolError::UnexpectedByte {
                    expected: prefix as char,
                    got: ' ',
                }
                .into())
            }
        }

        let mut n: i64 = 0;
        let mut sign: i64 = 1;
        let mut first = true;
        let mut digits = false;
        loop {
            let c = self.read_byte().await?;
            match c {
                b'0'..=b'9' => {
                    n = n
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(i64::from(c - b'0')))
                        .ok_or(invalid.clone())?;
                    digits = true;
                }
                b'-' if first => sign = -1,
                b'\r' if digits => {
                    // Wait for the other half of the terminator even when a
                    // read boundary split it.
                    self.consume_lf().await?;
                    break;
                }
                b'\n' if digits => break,
                _ => return Err(invalid.into()),
            }
            first = false;
        }
        Ok(n * sign)
    }
}

impl<W: AsyncWrite + Unpin> WriteBuffer<W> {
    /// Appends an array header.
    pub fn append_array_len(&mut self, n: usize) {
        self.append_size(b'*', n);
    }

    /// Appends a bulk value.
    pub fn append_bulk(&mut self, p: &[u8]) {
        self.append_size(b'$', p.len());
        self.extend(p);
        self.extend(CRLF);
    }

    /// Appends a bulk string.
    pub fn append_bulk_str(&mut self, s: &str) {
        self.append_bulk(s.as_bytes());
    }

    /// Appends an inline (status) value.
    pub fn append_inline(&mut self, p: &[u8]) {
        self.push(b'+');
        self.extend(p);
        self.extend(CRLF);
    }

    /// Appends an inline (status) string.
    pub fn append_inline_str(&mut self, s: &str) {
        self.append_inline(s.as_bytes());
    }

    /// Appends an error reply.
    pub fn append_error(&mut self, msg: &str) {
        self.push(b'-');
        self.extend(msg.as_bytes());
        self.extend(CRLF);
    }

    /// Appends an integer reply.
    pub fn append_int(&mut self, n: i64) {
        match n {
            0 => self.extend(ZERO),
            1 => self.extend(ONE),
            _ => {
                self.push(b':');
                self.extend(n.to_string().as_bytes());
                self.extend(CRLF);
            }
        }
    }

    /// Appends a null bulk.
    pub fn append_nil(&mut self) {
        self.extend(NIL);
    }

    /// Appends the `+OK` fast path.
    pub fn append_ok(&mut self) {
        self.extend(OK);
    }

    fn append_size(&mut self, prefix: u8, n: usize) {
        self.push(prefix);
        self.extend(n.to_string().as_bytes());
        self.extend(CRLF);
    }
}
