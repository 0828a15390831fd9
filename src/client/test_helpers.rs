//! Shared test helpers for driving a ProgressClient over in-memory transports.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::client::ProgressClient;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventKind};
use crate::transport::{
    ConnectParams, Connector, INBOUND_BUFFER, InboundFrame, OUTBOUND_BUFFER, TransportChannel,
};
use crate::types::TransportKind;

/// What a mock connector does on its next attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    Hang,
}

/// Connector whose attempts follow a script, handing each accepted connection
/// to the test as a [`MockSession`]
pub(crate) struct MockConnector {
    kind: TransportKind,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    attempts: AtomicUsize,
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockSession>>,
}

impl MockConnector {
    /// Run `script` first, then `fallback` for every later attempt
    pub(crate) fn scripted(
        kind: TransportKind,
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> Arc<Self> {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            kind,
            script: Mutex::new(script.into_iter().collect()),
            fallback: Mutex::new(fallback),
            attempts: AtomicUsize::new(0),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        })
    }

    pub(crate) fn accepting(kind: TransportKind) -> Arc<Self> {
        Self::scripted(kind, [], Outcome::Accept)
    }

    pub(crate) fn refusing(kind: TransportKind) -> Arc<Self> {
        Self::scripted(kind, [], Outcome::Refuse)
    }

    pub(crate) fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection
    pub(crate) async fn next_session(&self) -> MockSession {
        self.sessions_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, params: &ConnectParams) -> Result<TransportChannel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(*self.fallback.lock().unwrap())
        };

        match outcome {
            Outcome::Refuse => Err(Error::transport(self.kind, "connection refused")),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
                let (outbound_tx, outbound_rx) = if self.kind.supports_send() {
                    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };
                self.sessions_tx
                    .send(MockSession {
                        kind: self.kind,
                        params: params.clone(),
                        inbound: inbound_tx,
                        outbound: outbound_rx,
                    })
                    .unwrap();
                Ok(TransportChannel::new(
                    self.kind,
                    inbound_rx,
                    outbound_tx,
                    CancellationToken::new(),
                ))
            }
        }
    }
}

/// Server side of one accepted mock connection
pub(crate) struct MockSession {
    kind: TransportKind,
    pub(crate) params: ConnectParams,
    inbound: mpsc::Sender<InboundFrame>,
    outbound: Option<mpsc::Receiver<String>>,
}

impl MockSession {
    pub(crate) async fn push(&self, frame: InboundFrame) {
        self.inbound.send(frame).await.unwrap();
    }

    /// Deliver a message the way this transport frames it
    pub(crate) async fn push_message(&self, kind: &str, data: Value) {
        let frame = match self.kind {
            TransportKind::Socket => {
                InboundFrame::Text(json!({"type": kind, "data": data}).to_string())
            }
            TransportKind::EventStream => InboundFrame::Event {
                name: kind.to_string(),
                data: data.to_string(),
            },
            TransportKind::Polling => InboundFrame::Poll(data.to_string()),
        };
        self.push(frame).await;
    }

    /// Deliver the body a polling transport was established with
    pub(crate) async fn push_initial(&self, data: Value) {
        self.push(InboundFrame::Initial(data.to_string())).await;
    }

    pub(crate) async fn close(&self, reason: &str) {
        self.push(InboundFrame::Closed(reason.to_string())).await;
    }

    /// Next message the client sent; `None` once the client dropped the transport
    pub(crate) async fn next_sent(&mut self) -> Option<Value> {
        let text = self.outbound.as_mut()?.recv().await?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Message already queued by the client, without waiting
    pub(crate) fn try_next_sent(&mut self) -> Option<Value> {
        let text = self.outbound.as_mut()?.try_recv().ok()?;
        Some(serde_json::from_str(&text).unwrap())
    }
}

/// Configuration with every endpoint set and a bearer token
pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        socket_url: Some("ws://progress.test/ws".to_string()),
        stream_url: Some("http://progress.test/events".to_string()),
        poll_url: Some("http://progress.test/status".to_string()),
        auth_token: Some("secret".to_string()),
        ..Default::default()
    }
}

pub(crate) fn client_with(config: ClientConfig, connectors: &[&Arc<MockConnector>]) -> ProgressClient {
    let connectors = connectors
        .iter()
        .map(|connector| Arc::clone(*connector) as Arc<dyn Connector>)
        .collect();
    ProgressClient::with_connectors(config, connectors).unwrap()
}

/// Skip events until one of `kind` arrives
pub(crate) async fn next_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    kind: EventKind,
) -> ClientEvent {
    loop {
        let event = events.recv().await.unwrap();
        if event.kind() == kind {
            return event;
        }
    }
}

pub(crate) fn progress(task_id: &str, value: f64) -> Value {
    json!({"task_id": task_id, "progress": value, "current_stage": "download"})
}
