//! Socket transport abstraction
//!
//! The session never touches the WebSocket library directly. A [`Connector`]
//! opens a socket and hands back two halves:
//!
//! - a [`SocketHandle`] for the outbound side (`send`, `is_open`, `close`)
//! - a [`SocketEvents`] receiver for the inbound side (`Message`, `Closed`)
//!
//! Opening returns immediately; the handshake runs in the background and the
//! handle reports open once it completes. A socket that never opens, or that
//! the server answers with an unexpected HTTP response, reports `Closed`
//! exactly like one that dropped after opening.
//!
//! [`WsConnector`] is the production implementation over `tokio-tungstenite`.

use constellation_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;

/// Header marking the connection as an automated client
pub const BOT_HEADER: &str = "x-is-bot";

/// Credentials placed on the handshake request
///
/// The bot marker header is always sent; cookie and authorization only when
/// configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectHeaders {
    /// Value of the `cookie` header
    pub cookie: Option<String>,
    /// Value of the `authorization` header
    pub authorization: Option<String>,
}

impl ConnectHeaders {
    /// Header name/value pairs in the order they are sent
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(BOT_HEADER, "true".to_string())];
        if let Some(cookie) = &self.cookie {
            pairs.push(("cookie", cookie.clone()));
        }
        if let Some(authorization) = &self.authorization {
            pairs.push(("authorization", authorization.clone()));
        }
        pairs
    }
}

/// Raw event reported by a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame arrived
    Message(String),
    /// The socket closed, failed to open, or got an unexpected response
    Closed,
}

/// Inbound half of a socket
pub type SocketEvents = mpsc::UnboundedReceiver<SocketEvent>;

/// Command for the task driving the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write a text frame
    Text(String),
    /// Close the socket
    Close,
}

/// Outbound half of a socket
///
/// Writes are queued to the task that owns the socket, in call order. The
/// handle is cheap to clone; all clones drive the same socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl SocketHandle {
    /// Create a handle over an outbound queue and a shared open flag
    ///
    /// Connector implementations set the flag once the handshake completes
    /// and clear it when the socket goes away.
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, open: Arc<AtomicBool>) -> Self {
        Self { outbound, open }
    }

    /// True iff the socket is in the open state
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    /// Write a text frame
    ///
    /// # Errors
    ///
    /// `Error::NotConnected` if the socket is not open; nothing is written.
    pub fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Request the socket to close
    ///
    /// Idempotent. The handle reports not-open immediately.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Opens sockets
///
/// Implementations must not block: the handshake happens in the background
/// and its outcome is observed through the returned handle and events.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a socket to `address` with the given headers
    ///
    /// # Errors
    ///
    /// Fails synchronously only when the request itself cannot be built
    /// (malformed address, header value with forbidden bytes).
    fn open(&self, address: &str, headers: &ConnectHeaders) -> Result<(SocketHandle, SocketEvents)>;
}

/// WebSocket connector over `tokio-tungstenite`
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

/// Build the handshake request with the connection headers applied
pub fn build_request(address: &str, headers: &ConnectHeaders) -> Result<Request<()>> {
    let mut request = address
        .into_client_request()
        .map_err(|e| Error::WebSocket(format!("Failed to build WebSocket request: {}", e)))?;

    for (name, value) in headers.pairs() {
        let value = HeaderValue::from_str(&value).map_err(|e| Error::InvalidHeader {
            name,
            reason: e.to_string(),
        })?;
        request
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }

    Ok(request)
}

impl Connector for WsConnector {
    fn open(&self, address: &str, headers: &ConnectHeaders) -> Result<(SocketHandle, SocketEvents)> {
        let request = build_request(address, headers)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(drive_socket(request, outbound_rx, event_tx, Arc::clone(&open)));

        Ok((SocketHandle::new(outbound_tx, open), event_rx))
    }
}

/// Owns one WebSocket for its whole life
///
/// Always ends by clearing the open flag and reporting `Closed` once.
async fn drive_socket(
    request: Request<()>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<SocketEvent>,
    open: Arc<AtomicBool>,
) {
    let uri = request.uri().to_string();
    tracing::debug!(uri = %uri, "Opening WebSocket");

    let ws_stream = tokio::select! {
        result = connect_async(request) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "WebSocket handshake failed");
                open.store(false, Ordering::SeqCst);
                let _ = events.send(SocketEvent::Closed);
                return;
            }
        },
        // Closed (or abandoned) before the handshake finished
        _ = wait_for_close(&mut outbound) => {
            open.store(false, Ordering::SeqCst);
            let _ = events.send(SocketEvent::Closed);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    open.store(true, Ordering::SeqCst);
    tracing::debug!(uri = %uri, "WebSocket open");

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(SocketEvent::Message(text));
                    }
                    Err(_) => tracing::debug!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(uri = %uri, "WebSocket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(uri = %uri, error = %e, "WebSocket error");
                    break;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::warn!(uri = %uri, error = %e, "WebSocket write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    tracing::debug!(uri = %uri, "WebSocket closed by client");
                    break;
                }
            },
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = events.send(SocketEvent::Closed);
}

/// Resolves once the handle asks for a close or every handle is dropped
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match outbound.recv().await {
            Some(Outbound::Close) | None => return,
            // Not open yet; `send` refuses before reaching the queue
            Some(Outbound::Text(_)) => {}
        }
    }
}
