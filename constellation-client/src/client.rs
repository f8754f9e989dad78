//! Constellation client
//!
//! `ConstellationClient` owns the connection to the live events service and
//! everything that must outlive a single socket:
//!
//! - the set of wire channels the server should deliver (the registry)
//! - the listeners registered per channel name
//! - the reconnect state machine
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: open a socket (state `Connecting`)
//! 2. **Handshake**: the server greets with `hello`; the client emits
//!    `Connected` and subscribes every registered channel in one call
//! 3. **Use**: subscribe, cancel, and issue method calls
//! 4. **Reconnect**: when the socket closes, `Disconnected` is emitted and,
//!    if the strategy allows, a new socket is opened after the delay
//!
//! Connecting again while a socket is live replaces it silently: the old
//! socket's pending calls fail with `TransportClosed` and its closure is not
//! reported.
//!
//! # Dispatch
//!
//! Each socket has its own dispatch task fed by the receive task, so pushes
//! reach listeners in arrival order while replies keep flowing. A listener
//! may await [`ConstellationClient::call`] on the same socket.
//!
//! # Cloning
//!
//! `ConstellationClient` is cheaply cloneable; all clones share one
//! connection. Background tasks hold weak references, so dropping the last
//! clone closes the socket and stops reconnecting.

use crate::channel::{is_reserved, resolve_channel};
use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::dispatch::{Dispatcher, HandlerId};
use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectionStrategy;
use crate::registry::SubscriptionRegistry;
use crate::session::Session;
use crate::transport::{Connector, SocketEvent, SocketEvents};
use crate::ClientConfig;
use constellation_core::{
    Error, EventEnvelope, LiveEvents, LivePush, Result, LIVE_SUBSCRIBE, LIVE_UNSUBSCRIBE,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

const LIFECYCLE_CAPACITY: usize = 64;

/// Connection lifecycle signal
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The server sent its `hello` greeting; carries the greeting data
    Connected(Value),
    /// The current socket closed
    Disconnected,
    /// A reconnect attempt is starting
    Reconnecting,
    /// A subscribe or unsubscribe issued by the client failed
    Error(Error),
}

/// Handle for one registered listener
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::cancel`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    client: Weak<Inner>,
    channel: String,
    id: HandlerId,
}

impl Subscription {
    /// Channel name the listener was registered under
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the listener
    ///
    /// When no listener remains whose name maps to the same wire channel, the
    /// channel leaves the registry and an unsubscribe is sent.
    pub fn cancel(self) {
        if let Some(inner) = self.client.upgrade() {
            inner.release_interest(&self.channel, self.id);
        }
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    connection: ConnectionManager,
    registry: Mutex<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    /// Current socket; only the owning generation's tasks may clear it
    session: Mutex<Option<Arc<Session>>>,
    /// Bumped under the session lock by every connect and disconnect
    generation: AtomicU64,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    metrics: Option<Arc<ClientMetrics>>,
}

/// Client for the Constellation live events service
#[derive(Clone)]
pub struct ConstellationClient {
    inner: Arc<Inner>,
}

impl ConstellationClient {
    pub(crate) fn from_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                connection: ConnectionManager::new(strategy),
                registry: Mutex::new(SubscriptionRegistry::new()),
                dispatcher: Dispatcher::new(),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                lifecycle,
                metrics,
            }),
        }
    }

    /// Open a new socket, replacing any existing one
    ///
    /// Returns once the socket task is started; `Connected` is emitted when
    /// the server greets. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the address or a header value is malformed. The client is
    /// left disconnected and no reconnect is scheduled.
    #[tracing::instrument(skip(self), fields(address = %self.inner.config.server_address))]
    pub fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Close the socket and stay disconnected
    ///
    /// Pending calls fail with `TransportClosed`. Registered channels are
    /// kept and resubscribed by the next `connect`.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Listen on `channel`
    ///
    /// Every listener registered under the same name receives each push, in
    /// registration order. If the wire channel the name maps to is new, it is
    /// recorded and a subscribe is sent when a socket is open; otherwise it
    /// is sent with the next handshake.
    ///
    /// # Errors
    ///
    /// `Error::ReservedChannel` for the lifecycle signal names (`connected`,
    /// `reconnecting`, `disconnected`, `error`); use
    /// [`ConstellationClient::lifecycle`] for those.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use constellation_client::ClientBuilder;
    ///
    /// # async fn example() -> constellation_core::Result<()> {
    /// let client = ClientBuilder::new().build()?;
    /// let subscription = client.subscribe("user:1:update", |payload| async move {
    ///     println!("update: {}", payload);
    /// })?;
    ///
    /// subscription.cancel();
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe<F, Fut>(&self, channel: impl Into<String>, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let channel = channel.into();
        if is_reserved(&channel) {
            return Err(Error::ReservedChannel(channel));
        }

        let id = self.inner.acquire_interest(&channel, handler);
        Ok(Subscription {
            client: Arc::downgrade(&self.inner),
            channel,
            id,
        })
    }

    /// Issue a method call and deserialize the result
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Issue a method call on the current socket
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` if no socket is open
    /// - `Error::Server` with the server's error object, verbatim
    /// - `Error::TransportClosed` if the socket closed before the reply
    #[tracing::instrument(skip(self, params), fields(method = %method))]
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        let start = Instant::now();
        let sent = match self.inner.current_session() {
            Some(session) => session.call(method, params),
            None => Err(Error::NotConnected),
        };

        let outcome = match sent {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };

        let duration = start.elapsed().as_secs_f64();
        if let Some(ref m) = self.inner.metrics {
            let status = if outcome.is_ok() { "success" } else { "error" };
            m.record_call(method, status, duration);
        }
        if let Err(ref e) = outcome {
            tracing::debug!(method = %method, error = %e, "Call failed");
        }
        outcome
    }

    /// Subscribe to connection lifecycle signals
    ///
    /// Signals sent before this call are not replayed.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// True iff a socket is currently open
    pub fn is_connected(&self) -> bool {
        self.inner
            .current_session()
            .map_or(false, |session| session.is_open())
    }

    /// Wire channels currently registered, in insertion order
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.registry.lock().list()
    }

    /// Number of listeners registered under `channel`
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner.dispatcher.listener_count(channel)
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Inner {
    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.lifecycle.send(event);
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Disconnected => self.connection.disconnected(),
            ConnectionState::Connecting => self.connection.connecting(),
            ConnectionState::Connected => self.connection.connected(),
        }
        if let Some(ref m) = self.metrics {
            m.update_connection_state(state);
        }
    }

    fn connect(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.session.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(previous) = slot.take() {
            tracing::debug!("Replacing existing socket");
            previous.close();
        }

        let headers = self.config.headers();
        let (session, events) =
            match Session::open(self.connector.as_ref(), &self.config.server_address, &headers) {
                Ok(opened) => opened,
                Err(e) => {
                    drop(slot);
                    tracing::error!(error = %e, "Failed to open socket");
                    if let Some(ref m) = self.metrics {
                        m.record_error("connect");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            };

        let session = Arc::new(session);
        *slot = Some(Arc::clone(&session));
        drop(slot);

        self.set_state(ConnectionState::Connecting);
        tracing::info!(address = %self.config.server_address, "Connecting");

        let (pushes, queued) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(Arc::downgrade(self), queued, generation));
        tokio::spawn(receive_loop(
            Arc::downgrade(self),
            Arc::downgrade(&session),
            events,
            pushes,
            generation,
        ));
        Ok(())
    }

    fn disconnect(&self) {
        let previous = {
            let mut slot = self.session.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };

        if let Some(previous) = previous {
            previous.close();
            self.set_state(ConnectionState::Disconnected);
            tracing::info!("Disconnected by client");
            self.emit(LifecycleEvent::Disconnected);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Route one event from the socket opened by connect call `generation`
    ///
    /// Pushes are queued for the dispatch task, never awaited here.
    fn handle_event(
        self: &Arc<Self>,
        session: &Session,
        event: EventEnvelope,
        pushes: &mpsc::UnboundedSender<LivePush>,
        generation: u64,
    ) {
        if event.is_hello() {
            self.on_hello(session, event.data, generation);
            return;
        }

        match event.live_push() {
            Some(push) => {
                if !self.is_current(generation) {
                    tracing::debug!(channel = %push.channel, "Dropping push from replaced socket");
                    return;
                }
                if let Some(ref m) = self.metrics {
                    m.record_live_event(&push.channel);
                }
                // Fails only once the dispatch task has seen the client dropped
                let _ = pushes.send(push);
            }
            None => {
                tracing::debug!(event = %event.event, "Ignoring event");
            }
        }
    }

    fn on_hello(self: &Arc<Self>, session: &Session, data: Value, generation: u64) {
        if !self.is_current(generation) {
            return;
        }

        self.set_state(ConnectionState::Connected);
        if let Some(ref m) = self.metrics {
            m.record_handshake();
        }
        tracing::info!("Connected");
        self.emit(LifecycleEvent::Connected(data));

        // One call for every registered channel, sent even when empty
        let registry = self.registry.lock();
        let channels = registry.list();
        tracing::debug!(channels = channels.len(), "Resubscribing");
        self.issue_live_call(Some(session), LIVE_SUBSCRIBE, channels);
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        {
            let mut slot = self.session.lock();
            if !self.is_current(generation) {
                tracing::debug!("Replaced socket closed");
                return;
            }
            *slot = None;
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected");
        self.emit(LifecycleEvent::Disconnected);
        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let Some(delay) = self.connection.next_reconnect_delay() else {
            tracing::info!(attempts = self.connection.attempt(), "Not reconnecting");
            return;
        };

        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.connection.attempt(),
            "Reconnect scheduled"
        );

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            // An explicit connect or disconnect since the closure wins
            if !inner.is_current(generation) {
                return;
            }

            inner.emit(LifecycleEvent::Reconnecting);
            if let Some(ref m) = inner.metrics {
                m.record_reconnection_attempt();
            }

            if let Err(e) = inner.connect() {
                tracing::warn!(error = %e, "Reconnect failed");
                let current = inner.generation.load(Ordering::SeqCst);
                inner.schedule_reconnect(current);
            }
        });
    }

    fn acquire_interest<F, Fut>(self: &Arc<Self>, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let resolved = resolve_channel(channel).into_owned();

        let mut registry = self.registry.lock();
        let id = self.dispatcher.register(channel, handler);

        if registry.add(resolved.clone()) {
            tracing::debug!(channel = %channel, wire_channel = %resolved, "Subscribing");
            self.issue_live_call(None, LIVE_SUBSCRIBE, vec![resolved]);
        }
        id
    }

    /// Remove listener `id` from `channel`
    ///
    /// Unsubscribe works on the wire channel `channel` maps to, not on the
    /// name as given: `chat:7:StopStreaming` releases `channel:7:update`, and
    /// only once no listener under any name still maps to it.
    fn release_interest(self: &Arc<Self>, channel: &str, id: HandlerId) {
        let mut registry = self.registry.lock();

        if !self.dispatcher.unregister(channel, id) {
            return;
        }
        if self.dispatcher.listener_count(channel) > 0 {
            return;
        }

        let resolved = resolve_channel(channel);
        let still_wanted = self
            .dispatcher
            .channels()
            .iter()
            .any(|other| resolve_channel(other) == resolved);

        if !still_wanted && registry.remove(&resolved) {
            tracing::debug!(channel = %channel, wire_channel = %resolved, "Unsubscribing");
            self.issue_live_call(None, LIVE_UNSUBSCRIBE, vec![resolved.into_owned()]);
        }
    }

    /// Send a subscribe or unsubscribe on `session`, or on the current socket
    ///
    /// Failures are never returned: losing the connection is expected (the
    /// next handshake resubscribes), anything else is emitted as
    /// `LifecycleEvent::Error`.
    fn issue_live_call(
        self: &Arc<Self>,
        session: Option<&Session>,
        method: &'static str,
        channels: Vec<String>,
    ) {
        let params = match serde_json::to_value(LiveEvents::new(channels)) {
            Ok(params) => params,
            Err(e) => {
                self.surface_live_error(method, e.into());
                return;
            }
        };

        let sent = match session {
            Some(session) => session.call(method, params),
            None => match self.current_session() {
                Some(session) => session.call(method, params),
                None => Err(Error::NotConnected),
            },
        };

        match sent {
            Ok(pending) => {
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    if let Err(e) = pending.await {
                        if let Some(inner) = weak.upgrade() {
                            inner.surface_live_error(method, e);
                        }
                    }
                });
            }
            Err(e) => self.surface_live_error(method, e),
        }
    }

    fn surface_live_error(&self, method: &str, error: Error) {
        if error.is_connection_loss() {
            tracing::debug!(method = %method, error = %error, "Deferred until next handshake");
            return;
        }

        tracing::warn!(method = %method, error = %error, "Live call failed");
        if let Some(ref m) = self.metrics {
            m.record_error(if error.server_error().is_some() { "server" } else { "client" });
        }
        self.emit(LifecycleEvent::Error(error));
    }
}

async fn receive_loop(
    client: Weak<Inner>,
    session: Weak<Session>,
    mut events: SocketEvents,
    pushes: mpsc::UnboundedSender<LivePush>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        let text = match event {
            SocketEvent::Message(text) => text,
            SocketEvent::Closed => break,
        };

        let (Some(inner), Some(session)) = (client.upgrade(), session.upgrade()) else {
            break;
        };

        if let Some(event) = session.handle_incoming(&text) {
            inner.handle_event(&session, event, &pushes, generation);
        }
    }

    if let Some(session) = session.upgrade() {
        session.teardown();
    }
    if let Some(inner) = client.upgrade() {
        inner.on_closed(generation);
    }
}

/// Hand queued pushes to listeners, one at a time and in arrival order
///
/// Ends when the receive task drops its sender. Pushes still queued after a
/// connect or disconnect superseded `generation` are dropped.
async fn dispatch_loop(
    client: Weak<Inner>,
    mut queued: mpsc::UnboundedReceiver<LivePush>,
    generation: u64,
) {
    while let Some(push) = queued.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            continue;
        }

        let invoked = inner.dispatcher.dispatch(&push.channel, push.payload).await;
        tracing::trace!(channel = %push.channel, listeners = invoked, "Live event dispatched");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{FixedDelay, NoReconnect};
    use crate::transport::testing::{MemoryConnector, MemoryPeer};
    use crate::ClientBuilder;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn build(auto_reconnect: bool) -> (ConstellationClient, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (connector, peers) = MemoryConnector::new();
        let client = ClientBuilder::new()
            .server_address("memory://constellation")
            .auto_connect(false)
            .auto_reconnect(auto_reconnect)
            .reconnect_time(Duration::from_millis(20))
            .with_connector(Arc::new(connector))
            .build()
            .unwrap();
        (client, peers)
    }

    async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .expect("no socket opened")
            .expect("connector dropped")
    }

    async fn next_event(lifecycle: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
        tokio::time::timeout(WAIT, lifecycle.recv())
            .await
            .expect("no lifecycle event")
            .expect("lifecycle closed")
    }

    /// Accept the socket, greet, and consume the bulk resubscribe
    async fn handshake(
        peers: &mut mpsc::UnboundedReceiver<MemoryPeer>,
        lifecycle: &mut broadcast::Receiver<LifecycleEvent>,
    ) -> (MemoryPeer, Value) {
        let mut peer = next_peer(peers).await;
        peer.accept();
        peer.hello();
        assert!(matches!(next_event(lifecycle).await, LifecycleEvent::Connected(_)));
        let bulk = peer.next_frame().await.expect("no bulk subscribe");
        (peer, bulk)
    }

    #[tokio::test]
    async fn test_handshake_emits_connected_and_bulk_subscribe() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();

        client.connect().unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);

        let (_peer, bulk) = handshake(&mut peers, &mut lifecycle).await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(bulk["type"], "method");
        assert_eq!(bulk["method"], "livesubscribe");
        assert_eq!(bulk["params"], json!({"events": []}));
        assert_eq!(bulk["id"], 1);
    }

    #[tokio::test]
    async fn test_connected_carries_hello_data() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();

        let peer = next_peer(&mut peers).await;
        peer.accept();
        peer.push(json!({"type": "event", "event": "hello", "data": {"authenticated": true}}));

        match next_event(&mut lifecycle).await {
            LifecycleEvent::Connected(data) => assert_eq!(data, json!({"authenticated": true})),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_replayed_in_order() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();

        client.subscribe("a", |_| async {}).unwrap();
        client.subscribe("b", |_| async {}).unwrap();
        client.subscribe("a", |_| async {}).unwrap();
        assert_eq!(client.subscriptions(), vec!["a", "b"]);

        client.connect().unwrap();
        let (mut peer, bulk) = handshake(&mut peers, &mut lifecycle).await;

        assert_eq!(bulk["params"], json!({"events": ["a", "b"]}));
        assert!(peer.drain_frames().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_while_connected_sends_incremental_call() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        client.subscribe("user:1:update", |_| async {}).unwrap();
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["method"], "livesubscribe");
        assert_eq!(frame["params"], json!({"events": ["user:1:update"]}));
        assert_eq!(frame["id"], 2);

        // A second listener on the same channel is local only
        client.subscribe("user:1:update", |_| async {}).unwrap();
        assert!(peer.drain_frames().is_empty());
        assert_eq!(client.listener_count("user:1:update"), 2);
    }

    #[tokio::test]
    async fn test_alias_subscribes_update_channel() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        client.subscribe("chat:7:StartStreaming", |_| async {}).unwrap();
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["params"], json!({"events": ["channel:7:update"]}));

        client.subscribe("chat:7:StopStreaming", |_| async {}).unwrap();
        assert!(peer.drain_frames().is_empty());
        assert_eq!(client.subscriptions(), vec!["channel:7:update"]);
        assert_eq!(client.listener_count("chat:7:StartStreaming"), 1);
    }

    #[tokio::test]
    async fn test_alias_unsubscribes_after_last_alias_cancelled() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let start = client.subscribe("chat:7:StartStreaming", |_| async {}).unwrap();
        let stop = client.subscribe("chat:7:StopStreaming", |_| async {}).unwrap();
        peer.next_frame().await.unwrap();

        start.cancel();
        assert!(peer.drain_frames().is_empty());
        assert_eq!(client.subscriptions(), vec!["channel:7:update"]);

        stop.cancel();
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["method"], "liveunsubscribe");
        assert_eq!(frame["params"], json!({"events": ["channel:7:update"]}));
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_reserved_names_rejected() {
        let (client, _peers) = build(true);

        for name in ["connected", "reconnecting", "disconnected", "error"] {
            let result = client.subscribe(name, |_| async {});
            assert!(matches!(result, Err(Error::ReservedChannel(ref n)) if n == name));
        }
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_live_push_reaches_every_listener_in_order() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        for tag in ["first", "second"] {
            let tx = tx.clone();
            client
                .subscribe("user:1:update", move |payload| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send((tag, payload));
                    }
                })
                .unwrap();
        }

        peer.push(json!({
            "type": "event",
            "event": "live",
            "data": {"channel": "user:1:update", "payload": {"level": 42}}
        }));

        let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, ("first", json!({"level": 42})));
        assert_eq!(second, ("second", json!({"level": 42})));
    }

    #[tokio::test]
    async fn test_alias_listeners_not_invoked_for_update_channel() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let alias_tx = tx.clone();
        client
            .subscribe("chat:7:StartStreaming", move |_| {
                let tx = alias_tx.clone();
                async move {
                    let _ = tx.send("alias");
                }
            })
            .unwrap();
        client
            .subscribe("user:2:update", move |_| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send("user");
                }
            })
            .unwrap();

        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "channel:7:update", "payload": {}}}));
        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "user:2:update", "payload": {}}}));

        // Pushes are handled in order, so only the user listener fires
        let received = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, "user");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_may_await_call_on_same_socket() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let caller = client.clone();
        client
            .subscribe("user:1:update", move |payload| {
                let caller = caller.clone();
                let tx = tx.clone();
                async move {
                    let user = caller.call_raw("getUser", json!({})).await;
                    let _ = tx.send((payload, user));
                }
            })
            .unwrap();
        peer.next_frame().await.unwrap();

        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": 1}}));
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["method"], "getUser");
        peer.reply(frame["id"].as_u64().unwrap(), json!({"username": "ada"}));

        let (payload, user) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!(1));
        assert_eq!(user.unwrap(), json!({"username": "ada"}));

        // The socket keeps working after the listener returns
        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": 2}}));
        let frame = peer.next_frame().await.unwrap();
        peer.reply(frame["id"].as_u64().unwrap(), Value::Null);
        let (payload, _) = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!(2));
    }

    #[tokio::test]
    async fn test_slow_listener_does_not_block_closure() {
        let (client, mut peers) = build(false);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        client
            .subscribe("user:1:update", |_| async {
                std::future::pending::<()>().await;
            })
            .unwrap();

        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": 1}}));
        peer.drop_connection();
        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Disconnected));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_pushes_queued_from_replaced_socket_are_dropped() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (first, _) = handshake(&mut peers, &mut lifecycle).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconnector = client.clone();
        client
            .subscribe("user:1:update", move |payload| {
                let reconnector = reconnector.clone();
                let tx = tx.clone();
                async move {
                    if payload == json!(1) {
                        reconnector.connect().unwrap();
                    }
                    let _ = tx.send(payload);
                }
            })
            .unwrap();

        for payload in [1, 2] {
            first.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": payload}}));
        }
        assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), json!(1));

        let (second, _) = handshake(&mut peers, &mut lifecycle).await;
        second.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": 3}}));
        assert_eq!(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_cancelled_listener_stops_receiving() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = client
            .subscribe("user:1:update", move |payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload);
                }
            })
            .unwrap();
        assert_eq!(subscription.channel(), "user:1:update");
        peer.next_frame().await.unwrap();

        subscription.cancel();
        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["method"], "liveunsubscribe");
        assert_eq!(frame["params"], json!({"events": ["user:1:update"]}));

        peer.push(json!({"type": "event", "event": "live", "data": {"channel": "user:1:update", "payload": 1}}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_rejection_surfaces_as_error() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        client.subscribe("my silly event", |_| async {}).unwrap();
        let frame = peer.next_frame().await.unwrap();
        let id = frame["id"].as_u64().unwrap();
        peer.reply_error(id, 4106, "Unknown event 'my silly event'");

        match next_event(&mut lifecycle).await {
            LifecycleEvent::Error(Error::Server(object)) => {
                assert_eq!(object.code, 4106);
                assert_eq!(object.message, "Unknown event 'my silly event'");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_while_socket_not_open_is_silent() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let mut peer = next_peer(&mut peers).await;

        // Socket opened but not yet accepted: the call is refused locally
        client.subscribe("user:1:update", |_| async {}).unwrap();
        assert!(peer.drain_frames().is_empty());
        assert!(tokio::time::timeout(Duration::from_millis(50), lifecycle.recv())
            .await
            .is_err());
        assert_eq!(client.subscriptions(), vec!["user:1:update"]);
    }

    #[tokio::test]
    async fn test_call_resolves_and_ignores_stale_ids() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let caller = client.clone();
        let call = tokio::spawn(async move {
            caller
                .call::<_, Value>("divide", json!({"numerator": 4, "denominator": 2}))
                .await
        });

        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame["method"], "divide");
        let id = frame["id"].as_u64().unwrap();

        peer.reply(id + 100, json!("wrong"));
        peer.reply(id, json!(2));

        let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn test_call_without_socket_is_not_connected() {
        let (client, _peers) = build(true);
        let result = client.call_raw("divide", json!({})).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_call_rejects_with_server_error() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call_raw("divide", json!({})).await });

        let id = peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        peer.reply_error(id, 4000, "Cannot divide by zero");

        let error = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
        assert_eq!(error.server_error().map(|e| e.code), Some(4000));
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_registry() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.subscribe("user:1:update", |_| async {}).unwrap();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        peer.drop_connection();
        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Disconnected));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Reconnecting));

        let (_peer, bulk) = handshake(&mut peers, &mut lifecycle).await;
        assert_eq!(bulk["params"], json!({"events": ["user:1:update"]}));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_pending_call_fails_when_socket_drops() {
        let (client, mut peers) = build(false);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut peer, _) = handshake(&mut peers, &mut lifecycle).await;

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call_raw("divide", json!({})).await });
        peer.next_frame().await.unwrap();

        peer.drop_connection();
        let error = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(error, Error::TransportClosed));
    }

    #[tokio::test]
    async fn test_no_reconnect_when_disabled() {
        let (client, mut peers) = build(false);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        peer.drop_connection();
        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Disconnected));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(peers.try_recv().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_replaced_socket_closes_silently() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (mut first, _) = handshake(&mut peers, &mut lifecycle).await;

        client.connect().unwrap();
        let second = next_peer(&mut peers).await;
        second.accept();

        // The old socket was closed by the client
        assert!(first.next_frame().await.is_none());
        assert!(first.is_closed_by_client());
        assert!(tokio::time::timeout(Duration::from_millis(100), lifecycle.recv())
            .await
            .is_err());
        assert!(peers.try_recv().is_err());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_stops_reconnecting() {
        let (client, mut peers) = build(true);
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (_peer, _) = handshake(&mut peers, &mut lifecycle).await;

        client.disconnect();
        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Disconnected));
        assert!(!client.is_connected());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(peers.try_recv().is_err());
        assert!(lifecycle.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handshake_headers_from_config() {
        let (connector, mut peers) = MemoryConnector::new();
        let client = ClientBuilder::new()
            .auto_connect(false)
            .cookie("session=abc")
            .authorization("Bearer xyz")
            .with_connector(Arc::new(connector))
            .build()
            .unwrap();
        client.connect().unwrap();

        let peer = next_peer(&mut peers).await;
        assert_eq!(peer.headers.cookie.as_deref(), Some("session=abc"));
        assert_eq!(peer.headers.authorization.as_deref(), Some("Bearer xyz"));
        assert_eq!(peer.address, "wss://constellation.beam.pro");
    }

    #[tokio::test]
    async fn test_failed_reconnect_retries() {
        struct Flaky {
            inner: MemoryConnector,
            failures: parking_lot::Mutex<u32>,
        }

        impl Connector for Flaky {
            fn open(
                &self,
                address: &str,
                headers: &crate::transport::ConnectHeaders,
            ) -> Result<(crate::transport::SocketHandle, SocketEvents)> {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(Error::WebSocket("refused".to_string()));
                }
                self.inner.open(address, headers)
            }
        }

        let (memory, mut peers) = MemoryConnector::new();
        let flaky = Arc::new(Flaky {
            inner: memory,
            failures: parking_lot::Mutex::new(0),
        });
        let config = ClientConfig {
            auto_connect: false,
            ..ClientConfig::default()
        };
        let client = ConstellationClient::from_parts(
            config,
            Arc::clone(&flaky) as Arc<dyn Connector>,
            Box::new(FixedDelay::new(Duration::from_millis(10))),
            None,
        );
        let mut lifecycle = client.lifecycle();
        client.connect().unwrap();
        let (peer, _) = handshake(&mut peers, &mut lifecycle).await;

        *flaky.failures.lock() = 2;
        peer.drop_connection();

        assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Disconnected));
        for _ in 0..3 {
            assert!(matches!(next_event(&mut lifecycle).await, LifecycleEvent::Reconnecting));
        }
        let _ = handshake(&mut peers, &mut lifecycle).await;
    }

    #[test]
    fn test_no_reconnect_strategy_type() {
        let (connector, _peers) = MemoryConnector::new();
        let client = ConstellationClient::from_parts(
            ClientConfig::default(),
            Arc::new(connector),
            Box::new(NoReconnect),
            None,
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.config().server_address, "wss://constellation.beam.pro");
    }
}
