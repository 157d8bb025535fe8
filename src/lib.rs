//! Building blocks for servers and clients speaking RESP2, the REdis
//! Serialization Protocol.
//!
//! The crate provides a streaming codec over buffered byte I/O, a
//! request-dispatch server that routes pipelined commands to registered
//! handlers, and the mirror primitives for writing clients. Command
//! semantics are application code: register handlers, the server does the
//! framing.
//!
//! ```no_run
//! use respio::{Config, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> respio::Result<()> {
//!     let mut server = Server::new(Config::default());
//!     server.handle_fn("ping", |w, _cmd| w.append_inline_str("PONG"));
//!     server.handle_fn("echo", |w, cmd| match cmd.arg(0) {
//!         Some(msg) => w.append_bulk(msg),
//!         None => w.append_error(&respio::wrong_number_of_arguments(cmd.name())),
//!     });
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     server.serve(listener).await
//! }
//! ```

pub mod bufio;
pub mod client;
pub mod codec;
pub mod command;
pub mod connection;
pub mod error;
pub mod pool;
pub mod request;
pub mod response;
pub mod server;

pub use codec::ReplyType;
pub use command::{Argument, Command};
pub use connection::{ClientHandle, Connection};
pub use error::{Error, ProtocolError, Result};
pub use request::{RequestReader, RequestWriter};
pub use response::{ResponseReader, ResponseWriter};
pub use server::{unknown_command, wrong_number_of_arguments, Config, Handler, Server};
