//! Live change channel over the CMS websocket.
//!
//! One [`RealtimeChannel`] owns a supervisor task that opens the socket,
//! authenticates, re-announces subscriptions and pumps frames. Connection
//! loss feeds an exponential backoff loop; once the attempt budget is spent
//! the channel stops touching the socket for good and degrades to the
//! polling fallback, which synthesizes the same events from snapshot diffs.
//!
//! Subscribers hold their own bounded event channel. Delivery never blocks:
//! a closed receiver is pruned, a saturated one loses events with a warning,
//! and neither interferes with the other subscribers.

use crate::error::{RealtimeError, RealtimeResult};
use crate::fallback::Baselines;
use crate::protocol::{ClientFrame, DataEntry, ServerFrame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voltek_api::ContentSource;
use voltek_types::{ChangeEvent, ChangeKind};

/// Collection name registering a subscriber for every event, regardless of
/// which collection it belongs to. Never sent over the wire.
pub const WILDCARD: &str = "*";

/// Per-subscriber event buffer. A subscriber this far behind starts losing
/// events instead of stalling dispatch for everyone else.
const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;
type Registry = HashMap<String, HashMap<Uuid, mpsc::Sender<ChangeEvent>>>;

/// Where the channel currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket, no poller. Initial and between reconnect attempts.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Authenticated socket, frames flowing.
    Connected,
    /// Socket given up for this session; polling diffs instead.
    Fallback,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Tuning knobs for a [`RealtimeChannel`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket endpoint of the CMS.
    pub ws_url: String,
    /// Access token presented in the auth handshake. `None` skips the
    /// handshake entirely (public socket).
    pub access_token: Option<String>,
    /// Delay after the first failed attempt; doubles per attempt.
    pub reconnect_base: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_cap: Duration,
    /// Consecutive failures tolerated before giving up on the socket.
    pub max_reconnect_attempts: u32,
    /// Snapshot interval once in fallback.
    pub poll_interval: Duration,
    /// How long to wait for the server's auth answer.
    pub auth_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8055/websocket".to_string(),
            access_token: None,
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            poll_interval: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(10),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubles from `base`
/// and never exceeds `cap`.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// One registered subscriber. Dropping it (or the receiver running dry)
/// detaches it from the channel on the next delivery.
pub struct Subscription {
    id: Uuid,
    collection: String,
    receiver: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Waits for the next event. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The collection this subscription listens on, or [`WILDCARD`].
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

/// Live subscription channel with reconnect backoff and polling fallback.
///
/// Cheap to clone; clones share all channel state.
#[derive(Clone)]
pub struct RealtimeChannel {
    config: RealtimeConfig,
    source: Arc<dyn ContentSource>,
    state: Arc<RwLock<ChannelState>>,
    registry: Arc<RwLock<Registry>>,
    outgoing: Arc<RwLock<Option<mpsc::Sender<ClientFrame>>>>,
    baselines: Arc<Mutex<Baselines>>,
    attempts: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RealtimeChannel {
    /// Creates a channel. Nothing happens until [`RealtimeChannel::connect`]
    /// or the first subscription.
    #[must_use]
    pub fn new(config: RealtimeConfig, source: Arc<dyn ContentSource>) -> Self {
        Self {
            config,
            source,
            state: Arc::new(RwLock::new(ChannelState::Disconnected)),
            registry: Arc::new(RwLock::new(HashMap::new())),
            outgoing: Arc::new(RwLock::new(None)),
            baselines: Arc::new(Mutex::new(Baselines::default())),
            attempts: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Starts the supervisor task. Idempotent; calling while running (or
    /// while in fallback) does nothing.
    pub async fn connect(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.attempts.store(0, Ordering::SeqCst);
        info!("Starting live channel to {}", self.config.ws_url);
        let channel = self.clone();
        let handle = tokio::spawn(async move { channel.run().await });
        self.tasks.lock().await.push(handle);
    }

    /// Stops the supervisor and poller tasks and returns to Disconnected.
    /// Registered subscribers stay registered and resume on reconnect.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.outgoing.write().await = None;
        self.set_state(ChannelState::Disconnected).await;
        info!("Live channel shut down");
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Consecutive failed connection attempts so far; resets on success.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Registers a subscriber for one collection's change events.
    ///
    /// Connected → announces the subscription on the wire (first subscriber
    /// per collection only). Fallback → seeds the polling baseline. Anything
    /// else → triggers [`RealtimeChannel::connect`].
    pub async fn subscribe(&self, collection: &str) -> Subscription {
        self.register(collection).await
    }

    /// Registers a subscriber receiving every event of every collection.
    pub async fn subscribe_all(&self) -> Subscription {
        self.register(WILDCARD).await
    }

    /// Detaches a subscriber. When a collection loses its last subscriber,
    /// its wire subscription (or polling baseline) is torn down too.
    pub async fn unsubscribe(&self, subscription: &Subscription) {
        let emptied = {
            let mut registry = self.registry.write().await;
            let Some(subscribers) = registry.get_mut(subscription.collection()) else {
                return;
            };
            subscribers.remove(&subscription.id());
            if subscribers.is_empty() {
                registry.remove(subscription.collection());
                true
            } else {
                false
            }
        };
        debug!(
            "Subscriber {} left {}",
            subscription.id(),
            subscription.collection()
        );
        if !emptied || subscription.collection() == WILDCARD {
            return;
        }
        match self.state().await {
            ChannelState::Connected => {
                self.send(ClientFrame::Unsubscribe {
                    collection: subscription.collection().to_string(),
                })
                .await;
            }
            ChannelState::Fallback => {
                self.baselines.lock().await.remove(subscription.collection());
            }
            _ => {}
        }
    }

    async fn register(&self, collection: &str) -> Subscription {
        let (tx, receiver) = mpsc::channel(EVENT_BUFFER);
        let id = Uuid::new_v4();
        let first_for_collection = {
            let mut registry = self.registry.write().await;
            let subscribers = registry.entry(collection.to_string()).or_default();
            let first = subscribers.is_empty();
            subscribers.insert(id, tx);
            first
        };
        debug!("Subscriber {id} registered on {collection}");

        match self.state().await {
            ChannelState::Connected => {
                if first_for_collection && collection != WILDCARD {
                    self.send(ClientFrame::subscribe(collection)).await;
                }
            }
            ChannelState::Fallback => {
                if collection != WILDCARD {
                    self.seed_baseline(collection).await;
                }
            }
            ChannelState::Disconnected | ChannelState::Connecting => self.connect().await,
        }

        Subscription {
            id,
            collection: collection.to_string(),
            receiver,
        }
    }

    // ── Supervisor ───────────────────────────────────────────────────────

    async fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            self.set_state(ChannelState::Connecting).await;
            if let Err(err) = self.run_session().await {
                warn!("Live channel session failed: {err}");
            }
            *self.outgoing.write().await = None;
            self.set_state(ChannelState::Disconnected).await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.config.max_reconnect_attempts {
                self.enter_fallback().await;
                return;
            }
            let delay = backoff_delay(attempt, self.config.reconnect_base, self.config.reconnect_cap);
            debug!("Reconnect attempt {attempt} in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    /// One socket's lifetime: connect, authenticate, announce, pump.
    async fn run_session(&self) -> RealtimeResult<()> {
        let (socket, _) = connect_async(self.config.ws_url.as_str())
            .await
            .map_err(|e| RealtimeError::Connect(format!("{}: {e}", self.config.ws_url)))?;
        let (mut writer, mut reader) = socket.split();

        if let Some(token) = self.config.access_token.clone() {
            send_frame(&mut writer, &ClientFrame::Auth { access_token: token }).await?;
            self.await_auth_ok(&mut reader).await?;
        }

        self.attempts.store(0, Ordering::SeqCst);

        // All outbound traffic goes through one writer task so frame sends
        // never contend with the read loop.
        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(EVENT_BUFFER);
        *self.outgoing.write().await = Some(out_tx);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("Dropping unencodable frame: {err}");
                        continue;
                    }
                };
                if writer.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
        });

        self.set_state(ChannelState::Connected).await;
        info!("Live channel connected");

        for collection in self.subscribed_collections().await {
            self.send(ClientFrame::subscribe(collection)).await;
        }

        let outcome = self.pump_frames(&mut reader).await;
        writer_task.abort();
        outcome
    }

    async fn await_auth_ok(&self, reader: &mut WsReader) -> RealtimeResult<()> {
        let handshake = async {
            while let Some(message) = reader.next().await {
                let message =
                    message.map_err(|e| RealtimeError::Connect(format!("socket error: {e}")))?;
                let Message::Text(text) = message else { continue };
                match serde_json::from_str::<ServerFrame>(text.as_str())? {
                    ServerFrame::Auth { status } if status == "ok" => return Ok(()),
                    ServerFrame::Auth { status } => {
                        return Err(RealtimeError::Auth(format!("server answered \"{status}\"")));
                    }
                    _ => {}
                }
            }
            Err(RealtimeError::Auth("socket closed during handshake".to_string()))
        };
        match tokio::time::timeout(self.config.auth_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RealtimeError::Auth(format!(
                "no answer within {:?}",
                self.config.auth_timeout
            ))),
        }
    }

    async fn pump_frames(&self, reader: &mut WsReader) -> RealtimeResult<()> {
        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_frame(text.as_str()).await,
                Ok(Message::Close(_)) => {
                    debug!("Server closed the live channel");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => return Err(RealtimeError::Connect(format!("socket error: {err}"))),
            }
        }
        Ok(())
    }

    async fn handle_frame(&self, text: &str) {
        let frame = match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Ignoring undecodable frame: {err}");
                return;
            }
        };
        match frame {
            ServerFrame::Ping => self.send(ClientFrame::Pong).await,
            ServerFrame::Auth { status } => debug!("Late auth frame: {status}"),
            ServerFrame::Other => {}
            ServerFrame::Subscription {
                event,
                collection,
                data,
            } => {
                let Some(kind) = ChangeKind::from_wire(&event) else {
                    debug!("Skipping {event} frame for {collection}");
                    return;
                };
                for value in data {
                    let Some(entry) = DataEntry::from_value(value) else {
                        debug!("Skipping unidentifiable record in {collection} frame");
                        continue;
                    };
                    let change = match entry {
                        DataEntry::Record(id, item) => match kind {
                            ChangeKind::Create => ChangeEvent::created(&collection, id, item),
                            ChangeKind::Update => ChangeEvent::updated(&collection, id, item),
                            ChangeKind::Delete => ChangeEvent::deleted(&collection, id),
                        },
                        DataEntry::Id(id) => ChangeEvent::new(kind, &collection, id, None),
                    };
                    self.dispatch(&change).await;
                }
            }
        }
    }

    /// Fans one event out to the collection's subscribers and the wildcard
    /// set. Closed receivers are pruned; full ones lose this event.
    async fn dispatch(&self, event: &ChangeEvent) {
        let mut registry = self.registry.write().await;
        for key in [event.collection.as_str(), WILDCARD] {
            let Some(subscribers) = registry.get_mut(key) else {
                continue;
            };
            subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {id} on {key} is saturated, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Pruning dropped subscriber {id} on {key}");
                    false
                }
            });
        }
    }

    // ── Fallback ─────────────────────────────────────────────────────────

    async fn enter_fallback(&self) {
        warn!(
            "Live channel unavailable after {} attempts, polling every {:?}",
            self.config.max_reconnect_attempts, self.config.poll_interval
        );
        // Baselines first, then the state flip: anyone who observes Fallback
        // can rely on existing subscriptions already having a baseline.
        for collection in self.subscribed_collections().await {
            self.seed_baseline(&collection).await;
        }
        self.set_state(ChannelState::Fallback).await;
        let channel = self.clone();
        let handle = tokio::spawn(async move { channel.poll_loop().await });
        self.tasks.lock().await.push(handle);
    }

    async fn poll_loop(&self) {
        let start = tokio::time::Instant::now() + self.config.poll_interval;
        let mut ticks = tokio::time::interval_at(start, self.config.poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.running.load(Ordering::SeqCst) {
            ticks.tick().await;
            self.poll_once().await;
        }
    }

    async fn poll_once(&self) {
        for collection in self.subscribed_collections().await {
            match self.source.list_items(&collection).await {
                Ok(items) => {
                    let events = self.baselines.lock().await.advance(&collection, &items);
                    for event in events {
                        self.dispatch(&event).await;
                    }
                }
                // The baseline stays put, so a transient outage cannot turn
                // into a storm of synthesized deletes.
                Err(err) => warn!("Poll of {collection} failed: {err}"),
            }
        }
    }

    async fn seed_baseline(&self, collection: &str) {
        if self.baselines.lock().await.contains(collection) {
            return;
        }
        match self.source.list_items(collection).await {
            Ok(items) => {
                debug!(
                    "Seeded polling baseline for {collection} with {} items",
                    items.len()
                );
                self.baselines.lock().await.seed(collection, &items);
            }
            Err(err) => warn!("Could not seed baseline for {collection}: {err}"),
        }
    }

    // ── Plumbing ─────────────────────────────────────────────────────────

    async fn subscribed_collections(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .keys()
            .filter(|key| key.as_str() != WILDCARD)
            .cloned()
            .collect()
    }

    async fn send(&self, frame: ClientFrame) {
        let tx = self.outgoing.read().await.clone();
        if let Some(tx) = tx {
            if tx.send(frame).await.is_err() {
                debug!("Live channel writer is gone, frame dropped");
            }
        }
    }

    async fn set_state(&self, next: ChannelState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Live channel {} -> {next}", *state);
            *state = next;
        }
    }
}

async fn send_frame(writer: &mut WsWriter, frame: &ClientFrame) -> RealtimeResult<()> {
    let text = serde_json::to_string(frame)?;
    writer
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| RealtimeError::Connect(format!("send failed: {e}")))
}
