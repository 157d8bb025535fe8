use std::fmt;
use std::ops::Deref;
use std::str::{self, Utf8Error};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::connection::ClientHandle;

/// A single command argument: raw bytes, convertible on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument(pub(crate) Bytes);

impl Argument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The argument as UTF-8 text.
    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        str::from_utf8(&self.0)
    }

    /// The argument parsed as a signed integer.
    pub fn to_i64(&self) -> Option<i64> {
        self.as_str().ok()?.parse().ok()
    }

    /// The argument parsed as a float.
    pub fn to_f64(&self) -> Option<f64> {
        self.as_str().ok()?.parse().ok()
    }
}

impl Deref for Argument {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A parsed request: the command name plus its ordered arguments.
///
/// Commands are refilled in place by
/// [`RequestReader::read_cmd`](crate::request::RequestReader::read_cmd); the
/// name and argument storage keep their capacity across reuses, so a
/// connection allocates once and parses from then on.
#[derive(Debug, Default)]
pub struct Command {
    pub(crate) name: String,
    pub(crate) args: Vec<Argument>,
    pub(crate) client: Option<ClientHandle>,
    pub(crate) ctx: Option<CancellationToken>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command name with its original casing. Dispatchers compare
    /// lowercased.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments (the name is not an argument).
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// The argument at position `i`.
    pub fn arg(&self, i: usize) -> Option<&Argument> {
        self.args.get(i)
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Handle of the connection this command arrived on. `None` for commands
    /// parsed outside a server, e.g. in tests.
    pub fn client(&self) -> Option<&ClientHandle> {
        self.client.as_ref()
    }

    /// Cooperative cancellation context, when one was installed. The server
    /// core installs the connection's token and never observes it itself.
    pub fn context(&self) -> Option<&CancellationToken> {
        self.ctx.as_ref()
    }

    pub fn set_context(&mut self, ctx: CancellationToken) {
        self.ctx = Some(ctx);
    }

    /// Truncates the command in place, retaining allocated capacity.
    pub(crate) fn reset(&mut self) {
        self.name.clear();
        self.args.clear();
        self.client = None;
        self.ctx = None;
    }

    pub(crate) fn attach(&mut self, client: ClientHandle) {
        self.ctx = Some(client.cancellation().clone());
        self.client = Some(client);
    }
}
