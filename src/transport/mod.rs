//! Transports carrying notifications from the server
//!
//! Three mechanisms are supported, tried in order of preference by the
//! [`TransportNegotiator`]:
//!
//! - [`SocketConnector`]: persistent WebSocket, the only transport that accepts
//!   client-to-server messages (subscribe, unsubscribe, ping)
//! - [`EventStreamConnector`]: server-sent events over a long-lived HTTP response
//! - [`PollingConnector`]: authenticated GET against a status endpoint on a fixed
//!   interval
//!
//! A connector's `connect()` returns once the transport is established. Traffic then
//! flows through the returned [`TransportChannel`]: background pump tasks push
//! [`InboundFrame`]s into it and drain outbound text from it. Dropping or closing
//! the channel cancels the pumps, so a replaced transport never outlives its
//! successor.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::TransportKind;

mod event_stream;
mod negotiator;
mod polling;
mod socket;

pub use event_stream::EventStreamConnector;
pub use negotiator::TransportNegotiator;
pub use polling::PollingConnector;
pub use socket::SocketConnector;

/// Capacity of the inbound frame queue between pump tasks and the client
pub(crate) const INBOUND_BUFFER: usize = 256;

/// Capacity of the outbound text queue of a socket transport
pub(crate) const OUTBOUND_BUFFER: usize = 64;

/// Per-attempt connection parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectParams {
    /// Bearer credential, sent as the `token` query parameter or Authorization header
    pub auth_token: Option<String>,
    /// Channels to receive; encoded into the event stream URL
    pub channels: Vec<String>,
}

impl ConnectParams {
    /// Comma-joined channel list
    pub fn channels_param(&self) -> String {
        self.channels.join(",")
    }
}

/// Unit of inbound traffic produced by a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// JSON envelope (socket text frame)
    Text(String),
    /// Server-sent event; the name carries the message type
    Event {
        /// SSE event name (empty or `message` for envelope-style events)
        name: String,
        /// Event data
        data: String,
    },
    /// Status body from one poll
    Poll(String),
    /// Status body of the request that established a polling transport
    ///
    /// Delivered like a poll, but it proves only that the endpoint answered once,
    /// so it does not count toward connection stability.
    Initial(String),
    /// The transport is gone; no more frames will follow
    Closed(String),
}

/// Establishes one kind of transport
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport this connector produces
    fn kind(&self) -> TransportKind;

    /// Open the transport; returns once it is established
    async fn connect(&self, params: &ConnectParams) -> Result<TransportChannel>;
}

/// Handle to an established transport
///
/// Owns the inbound queue and, for bidirectional transports, the outbound queue.
/// Dropping the channel cancels every pump task tied to it.
#[derive(Debug)]
pub struct TransportChannel {
    kind: TransportKind,
    inbound: mpsc::Receiver<InboundFrame>,
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportChannel {
    /// Wrap queues produced by a connector
    ///
    /// `outbound` is `None` for receive-only transports. `cancel` must be observed
    /// by the connector's pump tasks.
    pub fn new(
        kind: TransportKind,
        inbound: mpsc::Receiver<InboundFrame>,
        outbound: Option<mpsc::Sender<String>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            inbound,
            outbound,
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Tie a pump task's lifetime to this channel
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Transport kind
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Whether `send` can succeed on this transport
    pub fn can_send(&self) -> bool {
        self.outbound.is_some()
    }

    /// Next inbound frame; `None` once every producer has gone away
    pub async fn recv(&mut self) -> Option<InboundFrame> {
        self.inbound.recv().await
    }

    /// Queue text for the server without waiting
    pub fn send(&self, text: String) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(Error::NotConnected)?;
        outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::transport(self.kind, "outbound queue full")
            }
            mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Stop every pump task
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.outbound = None;
        self.inbound.close();
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

/// Build the connectors for every transport that has an endpoint configured
pub fn default_connectors(
    config: &ClientConfig,
    http: reqwest::Client,
) -> Vec<Arc<dyn Connector>> {
    let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();
    if let Some(url) = config.socket_url.as_deref() {
        connectors.push(Arc::new(SocketConnector::new(url)));
    }
    if let Some(url) = config.stream_url.as_deref() {
        connectors.push(Arc::new(EventStreamConnector::new(url, http.clone())));
    }
    if let Some(url) = config.poll_url.as_deref() {
        connectors.push(Arc::new(PollingConnector::new(
            url,
            http,
            config.transports.poll_interval,
        )));
    }
    connectors
}

/// Append query parameters to an endpoint URL, skipping empty values
pub(crate) fn endpoint_url(base: &str, params: &[(&str, Option<&str>)]) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let present: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (*key, v)))
        .collect();
    if !present.is_empty() {
        url.query_pairs_mut().extend_pairs(present);
    }
    Ok(url)
}

/// Push a frame from a pump task; false when the client stopped listening
pub(crate) async fn forward_frame(tx: &mpsc::Sender<InboundFrame>, frame: InboundFrame) -> bool {
    tx.send(frame).await.is_ok()
}
