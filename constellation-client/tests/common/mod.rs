//! Common test utilities for constellation-client integration tests
//!
//! A mock live events server over a real WebSocket. Each accepted connection
//! is handed to the test, which plays the server: it sees the handshake
//! headers, reads the client's frames, and pushes replies and events.

#![allow(dead_code)]

use constellation_client::LifecycleEvent;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Mock Constellation server
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockWsServer {
    /// Bind to an ephemeral port and start accepting
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            tokio::spawn(serve_connection(stream, conn_tx.clone()));
                        }
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            connections: conn_rx,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next client connection
    pub async fn next_connection(&mut self) -> ServerConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }

    /// Connection accepted within `within`, if any
    pub async fn connection_within(&mut self, within: Duration) -> Option<ServerConnection> {
        tokio::time::timeout(within, self.connections.recv())
            .await
            .ok()
            .flatten()
    }

    /// Stop accepting connections
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    connections: mpsc::UnboundedSender<ServerConnection>,
) {
    let mut headers = HashMap::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        for (name, value) in request.headers() {
            headers.insert(
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }
        Ok(response)
    };

    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let (mut write, mut read) = ws_stream.split();
    let (to_client, mut outbound) = mpsc::unbounded_channel::<Message>();
    let (inbound, from_client) = mpsc::unbounded_channel::<Value>();

    let _ = connections.send(ServerConnection {
        headers,
        to_client,
        from_client,
    });

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str(&text) {
                        let _ = inbound.send(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            command = outbound.recv() => match command {
                Some(Message::Close(frame)) => {
                    let _ = write.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Server side of one client connection
pub struct ServerConnection {
    /// Handshake request headers, names lowercased
    pub headers: HashMap<String, String>,
    to_client: mpsc::UnboundedSender<Message>,
    from_client: mpsc::UnboundedReceiver<Value>,
}

impl ServerConnection {
    /// Push a frame to the client
    pub fn send(&self, frame: Value) {
        let _ = self.to_client.send(Message::Text(frame.to_string()));
    }

    /// Send the handshake greeting
    pub fn hello(&self) {
        self.send(mock_event("hello", json!({"authenticated": false})));
    }

    /// Push a payload on a channel
    pub fn live(&self, channel: &str, payload: Value) {
        self.send(mock_live(channel, payload));
    }

    /// Answer a method call
    pub fn reply(&self, id: u64, result: Value) {
        self.send(mock_reply(id, result));
    }

    /// Reject a method call
    pub fn reply_error(&self, id: u64, code: i32, message: &str) {
        self.send(mock_error_reply(id, code, message));
    }

    /// Next frame written by the client
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    /// Frame written within `within`, if any
    pub async fn recv_within(&mut self, within: Duration) -> Option<Value> {
        tokio::time::timeout(within, self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Close the socket from the server side
    pub fn close(&self) {
        let _ = self.to_client.send(Message::Close(None));
    }
}

/// Helper to create an event envelope
pub fn mock_event(event: &str, data: Value) -> Value {
    json!({"type": "event", "event": event, "data": data})
}

/// Helper to create a live push
pub fn mock_live(channel: &str, payload: Value) -> Value {
    mock_event("live", json!({"channel": channel, "payload": payload}))
}

/// Helper to create a successful reply
pub fn mock_reply(id: u64, result: Value) -> Value {
    json!({"type": "reply", "id": id, "result": result, "error": null})
}

/// Helper to create an error reply
pub fn mock_error_reply(id: u64, code: i32, message: &str) -> Value {
    json!({
        "type": "reply",
        "id": id,
        "result": null,
        "error": {"code": code, "message": message}
    })
}

/// Next lifecycle signal, failing the test after a timeout
pub async fn next_lifecycle(lifecycle: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
    tokio::time::timeout(WAIT, lifecycle.recv())
        .await
        .expect("timed out waiting for a lifecycle signal")
        .expect("lifecycle channel closed")
}

/// Accept the next connection, greet it, and read the bulk resubscribe
pub async fn handshake(
    server: &mut MockWsServer,
    lifecycle: &mut broadcast::Receiver<LifecycleEvent>,
) -> (ServerConnection, Value) {
    let mut conn = server.next_connection().await;
    conn.hello();
    match next_lifecycle(lifecycle).await {
        LifecycleEvent::Connected(_) => {}
        other => panic!("expected Connected, got {:?}", other),
    }
    let bulk = conn.recv().await;
    assert_eq!(bulk["method"], "livesubscribe");
    (conn, bulk)
}
