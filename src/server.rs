//! The request-dispatch server: command registry, accept loop and
//! per-connection task scheduling.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::connection::Connection;
use crate::error::Result;
use crate::pool::BufferPool;
use crate::response::ResponseWriter;

/// A registered command handler.
///
/// Handlers append zero or more reply tokens for the command they were
/// given. A handler that returns without touching the writer gets an `+OK`
/// appended on its behalf. Errors are ordinary replies: append them with
/// [`ResponseWriter::append_error`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve(&self, w: &mut ResponseWriter, cmd: &Command);
}

/// Adapter for plain closures; see [`Server::handle_fn`].
struct HandlerFn<F>(F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut ResponseWriter, &Command) + Send + Sync,
{
    async fn serve(&self, w: &mut ResponseWriter, cmd: &Command) {
        (self.0)(w, cmd)
    }
}

/// The command table: lowercased name to handler. Populated before serving,
/// read-only afterwards.
pub type CommandMap = HashMap<String, Arc<dyn Handler>>;

/// Server configuration. Zero durations disable the respective behaviour.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Per-iteration transport deadline. A connection that cannot complete a
    /// read-execute-write round within this window is closed.
    pub timeout: Duration,
    /// TCP keep-alive period applied to accepted sockets.
    pub tcp_keepalive: Duration,
}

/// The canonical reply for a command nobody registered.
pub fn unknown_command(name: &str) -> String {
    format!("ERR unknown command '{name}'")
}

/// The canonical reply for a command invoked with a bad arity. Arity is the
/// handler's judgement; this only formats the message.
pub fn wrong_number_of_arguments(name: &str) -> String {
    format!("ERR wrong number of arguments for '{name}' command")
}

/// A RESP server: a case-insensitive command table plus the accept loop that
/// schedules one driver task per connection.
pub struct Server {
    config: Config,
    commands: CommandMap,
    read_buffers: Arc<BufferPool>,
    write_buffers: Arc<BufferPool>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            commands: HashMap::new(),
            read_buffers: Arc::new(BufferPool::new()),
            write_buffers: Arc::new(BufferPool::new()),
        }
    }

    /// Registers a handler. Names are case-insensitive; a repeated name
    /// replaces the previous handler. Registration is meant for startup and
    /// is not synchronised with [`serve`](Self::serve).
    pub fn handle(&mut self, name: &str, handler: impl Handler + 'static) {
        self.commands.insert(name.to_lowercase(), Arc::new(handler));
    }

    /// Registers a plain closure as a handler.
    pub fn handle_fn<F>(&mut self, name: &str, callback: F)
    where
        F: Fn(&mut ResponseWriter, &Command) + Send + Sync + 'static,
    {
        self.handle(name, HandlerFn(callback));
    }

    /// Number of registered commands.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Accepts connections until the listener fails, spawning an independent
    /// driver task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let _ = tracing_subscriber::fmt()
            .try_init()
            .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

        info!("serving RESP connections on {}", listener.local_addr()?);
        let server = Arc::new(self);

        loop {
            let (socket, peer_addr) = listener.accept().await?;

            if server.config.tcp_keepalive > Duration::ZERO {
                if let Err(e) = set_keepalive(&socket, server.config.tcp_keepalive) {
                    warn!("failed to set TCP keep-alive on {peer_addr}: {e}");
                }
            }
            debug!("accepted connection from {peer_addr}");

            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let mut conn = Connection::with_buffers(
                    socket,
                    server.read_buffers.get(),
                    server.write_buffers.get(),
                );
                conn.run(&server.commands, &server.config).await;

                let (read_buf, write_buf) = conn.into_buffers();
                server.read_buffers.put(read_buf);
                server.write_buffers.put(write_buf);
            });
        }
    }
}

fn set_keepalive(socket: &TcpStream, period: Duration) -> io::Result<()> {
    let sock_ref = socket2::SockRef::from(socket);
    let keepalive = socket2::TcpKeepalive::new().with_time(period);
    sock_ref.set_tcp_keepalive(&keepalive)
}
