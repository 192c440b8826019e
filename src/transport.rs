//! Persistent request/response connection to the environment server.
//!
//! Messages are JSON objects carried in WebSocket text messages. Exactly one reply is read for
//! every command sent, and `send` takes `&mut self`, so a second command can never be issued
//! before the reply to the first one arrived.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument, trace, warn};
use tungstenite::client::client_with_config;
use tungstenite::error::ProtocolError;
use tungstenite::protocol::WebSocketConfig;
use tungstenite::{Message, WebSocket};

use crate::error::{BridgeError, Result};
use crate::protocol::Command;

/// A synchronous, one-in-flight-at-a-time message channel to the server.
pub trait Transport {
    /// Open the connection. Connecting while connected replaces the previous connection.
    fn connect(&mut self) -> Result<()>;

    /// Send one command and wait for its reply.
    ///
    /// # Errors
    /// - [`BridgeError::NotConnected`] when called before `connect` or after `close`
    /// - [`BridgeError::Connection`] on I/O failure, timeout or a closed socket
    /// - [`BridgeError::Protocol`] when the reply is not a JSON object
    fn send(&mut self, command: &Command) -> Result<Value>;

    /// Best-effort close. Idempotent.
    fn close(&mut self);

    /// True between a successful `connect` and the next `close` or fatal error.
    fn is_connected(&self) -> bool;
}

/// TCP stream whose reads fail once the deadline of the current exchange has passed.
///
/// The socket read timeout only bounds a single `read` call, so a peer trickling bytes could
/// otherwise hold an exchange open forever.
#[derive(Debug)]
struct DeadlineStream {
    inner: TcpStream,
    deadline: Option<Instant>,
}

impl DeadlineStream {
    fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }
}

impl Read for DeadlineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline elapsed"));
            }
            self.inner.set_read_timeout(Some(remaining))?;
        }
        self.inner.read(buf)
    }
}

impl Write for DeadlineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Split a server address into the WebSocket URL and the `host:port` to dial.
///
/// Accepts `ws://host:port[/path]` and bare `host:port`. A URL without port uses port 80.
fn endpoint(address: &str) -> Result<(String, String)> {
    let url = match address.split_once("://") {
        Some(("ws", _)) => address.to_string(),
        Some((scheme, _)) => {
            return Err(BridgeError::connection(format!(
                "unsupported scheme '{scheme}' in '{address}', expected ws://"
            )))
        }
        None => format!("ws://{address}"),
    };
    let authority = url["ws://".len()..]
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    if authority.is_empty() {
        return Err(BridgeError::connection(format!("no host in '{address}'")));
    }
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    let host = if has_port {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Ok((url, host))
}

/// [`Transport`] over a WebSocket connection, one text message per command and per reply.
#[derive(Debug)]
pub struct WsTransport {
    address: String,
    timeout: Duration,
    max_reply_bytes: usize,
    socket: Option<WebSocket<DeadlineStream>>,
}

impl WsTransport {
    /// Default cap on the size of a single reply.
    pub const DEFAULT_MAX_REPLY_BYTES: usize = 16 << 20;

    /// Create a disconnected transport for `address` (`ws://host:port` or `host:port`).
    ///
    /// `timeout` bounds both connection establishment and the wait for every reply.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            max_reply_bytes: Self::DEFAULT_MAX_REPLY_BYTES,
            socket: None,
        }
    }

    /// Set the largest reply accepted. A bigger reply is a protocol error.
    pub fn with_max_reply_bytes(mut self, bytes: usize) -> Self {
        self.max_reply_bytes = bytes;
        self
    }

    /// Address this transport connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn resolve(&self, host: &str) -> Result<Vec<SocketAddr>> {
        let addrs = host
            .to_socket_addrs()
            .map_err(|e| BridgeError::connection(format!("could not resolve '{host}': {e}")))?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(BridgeError::connection(format!(
                "'{host}' resolved to no address"
            )));
        }
        Ok(addrs)
    }

    fn open(
        &self,
        url: &str,
        addr: &SocketAddr,
    ) -> std::result::Result<WebSocket<DeadlineStream>, String> {
        let stream = TcpStream::connect_timeout(addr, self.timeout).map_err(|e| e.to_string())?;
        stream
            .set_write_timeout(Some(self.timeout))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| e.to_string())?;
        let mut stream = DeadlineStream {
            inner: stream,
            deadline: None,
        };
        stream.arm(self.timeout);

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_reply_bytes);
        config.max_frame_size = Some(self.max_reply_bytes);
        let (socket, _response) = client_with_config(url, stream, Some(config))
            .map_err(|e| format!("handshake failed: {e}"))?;
        Ok(socket)
    }

    /// Drop the connection after a failure: a late reply would otherwise be read as the answer
    /// to the next command.
    fn fail(&mut self, err: BridgeError) -> BridgeError {
        warn!("{err}, tearing connection down");
        self.close();
        err
    }
}

/// Write `text` and wait for the next text message, skipping control frames.
fn exchange(
    socket: &mut WebSocket<DeadlineStream>,
    command: &Command,
    text: String,
    timeout: Duration,
) -> Result<String> {
    socket.get_mut().arm(timeout);
    socket.send(Message::text(text)).map_err(|e| {
        BridgeError::connection(format!("I/O error while sending '{}': {e}", command.name()))
    })?;

    loop {
        match socket.read() {
            Ok(Message::Text(reply)) => return Ok(reply.to_string()),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(Message::Binary(_)) => {
                return Err(BridgeError::protocol(format!(
                    "binary reply to '{}'",
                    command.name()
                )))
            }
            Ok(Message::Close(_)) => {
                return Err(BridgeError::connection("connection closed by server"))
            }
            Err(tungstenite::Error::Utf8) => {
                return Err(BridgeError::protocol(format!(
                    "reply to '{}' is not valid UTF-8",
                    command.name()
                )))
            }
            Err(tungstenite::Error::Capacity(e)) => {
                return Err(BridgeError::protocol(format!(
                    "reply to '{}' is too large: {e}",
                    command.name()
                )))
            }
            Err(tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
                return Err(BridgeError::connection("connection closed by server"))
            }
            Err(tungstenite::Error::Protocol(e)) => {
                return Err(BridgeError::protocol(format!(
                    "malformed reply to '{}': {e}",
                    command.name()
                )))
            }
            Err(tungstenite::Error::Io(e)) => {
                return Err(BridgeError::connection(format!(
                    "no reply to '{}' within {timeout:?}: {e}",
                    command.name()
                )))
            }
            Err(e) => {
                return Err(BridgeError::connection(format!(
                    "connection lost while waiting for '{}': {e}",
                    command.name()
                )))
            }
        }
    }
}

impl Transport for WsTransport {
    #[instrument(skip(self), fields(address = %self.address))]
    fn connect(&mut self) -> Result<()> {
        if self.socket.is_some() {
            debug!("already connected, reconnecting");
            self.close();
        }

        let (url, host) = endpoint(&self.address)?;
        let mut last_error = None;
        for addr in self.resolve(&host)? {
            match self.open(&url, &addr) {
                Ok(socket) => {
                    debug!(%addr, "connected");
                    self.socket = Some(socket);
                    return Ok(());
                }
                Err(e) => last_error = Some(format!("{addr}: {e}")),
            }
        }
        Err(BridgeError::connection(format!(
            "could not connect to '{}' within {:?} ({})",
            self.address,
            self.timeout,
            last_error.unwrap_or_default()
        )))
    }

    fn send(&mut self, command: &Command) -> Result<Value> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(BridgeError::NotConnected);
        };

        let text = serde_json::to_string(command)
            .map_err(|e| BridgeError::protocol(format!("could not encode command: {e}")))?;
        trace!(cmd = command.name(), "sending");

        let line = match exchange(socket, command, text, self.timeout) {
            Ok(line) => line,
            Err(e) => return Err(self.fail(e)),
        };
        trace!(reply = line.as_str(), "received");

        let reply: Value = serde_json::from_str(&line)
            .map_err(|e| BridgeError::protocol(format!("reply is not valid JSON: {e}")))?;
        if !reply.is_object() {
            return Err(BridgeError::protocol(format!(
                "reply to '{}' is not a JSON object: {reply}",
                command.name()
            )));
        }
        Ok(reply)
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.get_mut().arm(self.timeout);
            let _ = socket.close(None);
            let _ = socket.flush();
            let _ = socket.get_ref().inner.shutdown(std::net::Shutdown::Both);
            debug!(address = %self.address, "connection closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
