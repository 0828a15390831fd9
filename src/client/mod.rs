//! Client handle and its background driver.
//!
//! `ProgressClient` is split into focused submodules:
//! - [`driver`] - The event loop that owns connection state, timers and transports
//!
//! Every `ProgressClient` clone talks to the same driver task over a command
//! channel. The driver is the only place that mutates connection state, the
//! subscription set, the dedup cache and statistics; accessors receive snapshots.

mod driver;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus, EventKind, HandlerId};
use crate::subscription::SubscriptionSnapshot;
use crate::transport::{Connector, TransportNegotiator, default_connectors};
use crate::types::{ConnectionInfo, ConnectionState, Statistics, TaskId, TransportKind};

use driver::Driver;

/// Request sent from a handle to the driver
#[derive(Debug)]
pub(crate) enum Command {
    Connect(oneshot::Sender<Result<TransportKind>>),
    Disconnect(oneshot::Sender<()>),
    Dispose(oneshot::Sender<()>),
    SubscribeTask(TaskId, oneshot::Sender<bool>),
    UnsubscribeTask(TaskId, oneshot::Sender<bool>),
    SubscribeChannel(String, oneshot::Sender<bool>),
    UnsubscribeChannel(String, oneshot::Sender<bool>),
    SetAuthToken(Option<String>),
    Statistics(oneshot::Sender<Statistics>),
    ConnectionInfo(oneshot::Sender<ConnectionInfo>),
    Subscriptions(oneshot::Sender<SubscriptionSnapshot>),
}

/// Real-time progress notification client (cloneable - all clones share one connection)
///
/// The client negotiates the best available transport, keeps it alive with
/// heartbeats, reconnects with exponential backoff and delivers deduplicated task
/// events to registered handlers.
///
/// # Example
///
/// ```no_run
/// use progress_link::{ClientConfig, ClientEvent, EventKind, ProgressClient};
///
/// # async fn example() -> progress_link::Result<()> {
/// let config = ClientConfig {
///     socket_url: Some("wss://api.example.com/ws/progress".to_string()),
///     stream_url: Some("https://api.example.com/events".to_string()),
///     auth_token: Some("token".to_string()),
///     ..Default::default()
/// };
/// let client = ProgressClient::new(config)?;
///
/// client.on(EventKind::ProgressUpdate, |event| {
///     if let ClientEvent::ProgressUpdate(record) = event {
///         println!("{}: {:.1}%", record.task_id, record.progress_percent);
///     }
/// });
///
/// let transport = client.connect().await?;
/// println!("connected over {transport}");
/// client.subscribe_task("task-42").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProgressClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for ProgressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressClient")
            .field("state", &*self.state.borrow())
            .field("bus", &self.bus)
            .finish()
    }
}

impl ProgressClient {
    /// Create a client with the built-in socket, event stream and polling transports
    ///
    /// Must be called within a Tokio runtime; the driver task is spawned immediately.
    /// No connection is made until [`connect`](Self::connect) is called.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.transports.connect_timeout)
            .build()?;
        let connectors = default_connectors(&config, http);
        Self::with_connectors(config, connectors)
    }

    /// Create a client with custom transport implementations
    ///
    /// Transports are still attempted in `config.transports.order`; a kind without
    /// a matching connector counts as a failed attempt.
    pub fn with_connectors(config: ClientConfig, connectors: Vec<Arc<dyn Connector>>) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(config.event_buffer);
        let bus = Arc::new(EventBus::new());

        let negotiator = TransportNegotiator::new(
            connectors,
            config.negotiation_order(),
            config.transports.connect_timeout,
        );
        tracing::debug!(order = ?negotiator.order(), "Progress client created");

        let driver = Driver::new(
            config,
            negotiator,
            command_rx,
            state_tx,
            Arc::clone(&bus),
            event_tx.clone(),
        );
        tokio::spawn(driver.run());

        Ok(Self {
            commands: command_tx,
            state: state_rx,
            bus,
            event_tx,
        })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::ClientClosed)?;
        reply_rx.await.map_err(|_| Error::ClientClosed)
    }

    /// Negotiate a transport
    ///
    /// Resolves with the transport chosen by the first negotiation round. If every
    /// transport fails, returns [`Error::AllTransportsExhausted`] while automatic
    /// reconnection continues in the background. Already connected: returns the
    /// current transport. Connecting or reconnecting: joins the round in flight.
    pub async fn connect(&self) -> Result<TransportKind> {
        self.request(Command::Connect).await?
    }

    /// Close the transport, cancel every timer and any scheduled reconnect
    ///
    /// Idempotent. Subscriptions are kept and replayed by the next `connect()`.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }

    /// Disconnect and clear subscriptions, handlers, the dedup cache and statistics
    pub async fn dispose(&self) -> Result<()> {
        self.request(Command::Dispose).await
    }

    /// Receive updates for a task; returns false if already subscribed
    pub async fn subscribe_task(&self, task_id: impl Into<TaskId>) -> Result<bool> {
        let task_id = task_id.into();
        self.request(|reply| Command::SubscribeTask(task_id, reply))
            .await
    }

    /// Stop receiving updates for a task; returns false if it was not subscribed
    pub async fn unsubscribe_task(&self, task_id: impl Into<TaskId>) -> Result<bool> {
        let task_id = task_id.into();
        self.request(|reply| Command::UnsubscribeTask(task_id, reply))
            .await
    }

    /// Join a channel; returns false if already joined
    ///
    /// On the event stream transport the channel list is fixed per connection and
    /// takes effect on the next (re)connect.
    pub async fn subscribe_channel(&self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.request(|reply| Command::SubscribeChannel(name, reply))
            .await
    }

    /// Leave a channel; returns false if it was not joined
    pub async fn unsubscribe_channel(&self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.request(|reply| Command::UnsubscribeChannel(name, reply))
            .await
    }

    /// Replace the credential used by the next negotiation
    pub fn set_auth_token(&self, token: Option<String>) -> Result<()> {
        self.commands
            .send(Command::SetAuthToken(token))
            .map_err(|_| Error::ClientClosed)
    }

    /// Register a handler; handlers for one kind run in registration order
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, Arc::new(handler))
    }

    /// Remove a handler registered with [`on`](Self::on)
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        self.bus.off(kind, id)
    }

    /// Subscribe to every event through a broadcast channel
    ///
    /// Slow receivers lag and skip events rather than blocking the client.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Every event as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.events())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ClientClosed)?;
        Ok(*matched)
    }

    /// Statistics snapshot
    pub async fn statistics(&self) -> Result<Statistics> {
        self.request(Command::Statistics).await
    }

    /// Connection details snapshot
    pub async fn connection_info(&self) -> Result<ConnectionInfo> {
        self.request(Command::ConnectionInfo).await
    }

    /// Current subscription set
    pub async fn subscriptions(&self) -> Result<SubscriptionSnapshot> {
        self.request(Command::Subscriptions).await
    }
}
