//! Per-connection state and the read-execute-write loop.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bufio::MAX_BUFFER_SIZE;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::request::RequestReader;
use crate::response::ResponseWriter;
use crate::server::{unknown_command, CommandMap, Config};

static CLIENT_ID: AtomicU64 = AtomicU64::new(0);

/// A cloneable reference to a live connection, installed into every
/// [`Command`] before dispatch.
///
/// Handlers use it to identify the connection and to request a close, which
/// takes effect once all pending replies have been written. The cancellation
/// token travels with commands as a cooperative context; the core never
/// observes it.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: u64,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ClientHandle {
    fn next() -> Self {
        Self {
            id: CLIENT_ID.fetch_add(1, Ordering::Relaxed) + 1,
            closed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// The connection's unique, monotonically assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests a disconnect after pending replies are flushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A served connection: owned transport halves, request reader, response
/// writer, and one [`Command`] refilled per request.
pub struct Connection<S> {
    handle: ClientHandle,
    reader: RequestReader<ReadHalf<S>>,
    writer: ResponseWriter,
    cmd: Command,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self::with_buffers(stream, BytesMut::new(), BytesMut::new())
    }

    /// Builds a connection around recycled buffers, usually fetched from the
    /// server's pools.
    pub fn with_buffers(stream: S, read_buf: BytesMut, write_buf: BytesMut) -> Self {
        let (rd, wr) = split(stream);
        Self {
            handle: ClientHandle::next(),
            reader: RequestReader::with_buffer(rd, read_buf),
            writer: ResponseWriter::with_buffer(wr, write_buf),
            cmd: Command::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Drives the connection until the peer goes away, an I/O error occurs
    /// or a handler requests a close.
    ///
    /// Each iteration serves every command already buffered before flushing
    /// once, which is what amortises writes across pipelined requests.
    /// Protocol errors are reported to the peer and the loop continues;
    /// anything else gets a best-effort error reply and terminates.
    pub async fn run(&mut self, commands: &CommandMap, config: &Config) {
        let id = self.handle.id();
        debug!(id, "connection open");

        while !self.handle.is_closed() {
            let result = if config.timeout > Duration::ZERO {
                match time::timeout(config.timeout, self.serve_batch(commands)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Io(io::ErrorKind::TimedOut.into())),
                }
            } else {
                self.serve_batch(commands).await
            };

            if let Err(err) = result {
                self.writer.append_error(&format!("ERR {err}"));
                if !err.is_protocol() {
                    let _ = self.writer.flush().await;
                    debug!(id, %err, "connection closed");
                    return;
                }
            }

            if let Err(err) = self.writer.flush().await {
                debug!(id, %err, "connection closed: flush failed");
                return;
            }
        }

        let _ = self.writer.flush().await;
        debug!(id, "connection closed by handler");
    }

    /// Serves one blocking command, then keeps going while further commands
    /// are already buffered.
    async fn serve_batch(&mut self, commands: &CommandMap) -> Result<()> {
        loop {
            self.serve_one(commands).await?;
            if self.reader.buffered() == 0 {
                return Ok(());
            }
        }
    }

    async fn serve_one(&mut self, commands: &CommandMap) -> Result<()> {
        let name = match self.reader.peek_cmd().await {
            Ok(name) => name,
            Err(err) => {
                // Drain the malformed command so the stream can make
                // progress once the error has been reported.
                if err.is_protocol() {
                    let _ = self.reader.skip_cmd().await;
                }
                return Err(err);
            }
        };

        let norm = name.to_lowercase();
        let Some(handler) = commands.get(&norm) else {
            self.writer.append_error(&unknown_command(&norm));
            self.reader.skip_cmd().await?;
            return Ok(());
        };

        self.reader.read_cmd(&mut self.cmd).await?;
        self.cmd.attach(self.handle.clone());

        let mark = self.writer.buffered();
        self.writer.mark_clean();
        handler.serve(&mut self.writer, &self.cmd).await;
        if self.writer.buffered() == mark && !self.writer.is_dirty() {
            self.writer.append_ok();
        }

        if self.writer.buffered() > MAX_BUFFER_SIZE / 2 {
            self.writer.flush().await?;
        }
        Ok(())
    }

    /// Releases the read and write buffers for pooling. Dropping the halves
    /// closes the transport.
    pub fn into_buffers(self) -> (BytesMut, BytesMut) {
        (self.reader.into_buffer(), self.writer.into_buffer())
    }
}
