//! The client's single event loop
//!
//! One driver task per client owns every piece of mutable state. It waits on the
//! command channel, the in-flight negotiation, the live transport and three timers
//! (reconnect delay, heartbeat, latency probe). Each of those is an `Option`; a
//! `None` slot never fires, so tearing a connection down is just clearing slots.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at};

use super::Command;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use crate::latency::LatencyTracker;
use crate::protocol::{
    self, Inbound, InboundMessage, OutboundMessage, parse_envelope, parse_named_event,
    parse_poll_body,
};
use crate::reconnect::{ReconnectDecision, ReconnectScheduler};
use crate::router::{MessageRouter, RouteContext, Routed};
use crate::subscription::{SubscriptionRegistry, channel_delta, task_delta};
use crate::transport::{ConnectParams, InboundFrame, TransportChannel, TransportNegotiator};
use crate::types::{ConnectionInfo, ConnectionState, Statistics, TransportKind};

type Negotiation = BoxFuture<'static, Result<TransportChannel>>;

#[derive(Debug, Default)]
struct Counters {
    messages_received: u64,
    parse_errors: u64,
    updates_suppressed: u64,
    reconnect_attempts: u64,
}

pub(super) struct Driver {
    config: ClientConfig,
    auth_token: Option<String>,
    negotiator: TransportNegotiator,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    bus: Arc<EventBus>,
    event_tx: broadcast::Sender<ClientEvent>,

    registry: SubscriptionRegistry,
    router: MessageRouter,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    latency: LatencyTracker,
    counters: Counters,

    transport: Option<TransportChannel>,
    negotiation: Option<Negotiation>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat_timer: Option<Interval>,
    probe_timer: Option<Interval>,

    pending_connects: Vec<oneshot::Sender<Result<TransportKind>>>,
    connected_at: Option<Instant>,
    last_message_at: Option<DateTime<Utc>>,
    awaiting_stability: bool,
}

async fn next_negotiation(slot: &mut Option<Negotiation>) -> Result<TransportChannel> {
    match slot {
        Some(negotiation) => negotiation.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(slot: &mut Option<TransportChannel>) -> Option<InboundFrame> {
    match slot {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_elapsed(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Driver {
    pub(super) fn new(
        config: ClientConfig,
        negotiator: TransportNegotiator,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        bus: Arc<EventBus>,
        event_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            auth_token: config.auth_token.clone(),
            registry: SubscriptionRegistry::new(config.channels.clone()),
            router: MessageRouter::new(config.dedup_threshold),
            scheduler: ReconnectScheduler::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat, Instant::now()),
            latency: LatencyTracker::new(config.heartbeat.latency_alpha),
            counters: Counters::default(),
            config,
            negotiator,
            commands,
            state_tx,
            bus,
            event_tx,
            transport: None,
            negotiation: None,
            reconnect_timer: None,
            heartbeat_timer: None,
            probe_timer: None,
            pending_connects: Vec::new(),
            connected_at: None,
            last_message_at: None,
            awaiting_stability: false,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = next_negotiation(&mut self.negotiation) => {
                    self.negotiation = None;
                    self.on_negotiated(result);
                }
                frame = next_frame(&mut self.transport) => self.on_frame(frame),
                _ = sleep_elapsed(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    tracing::debug!(attempt = self.scheduler.attempt(), "Reconnect delay elapsed");
                    self.start_negotiation();
                }
                _ = next_tick(&mut self.heartbeat_timer) => self.on_heartbeat_tick(),
                _ = next_tick(&mut self.probe_timer) => self.send_latency_probe(),
            }
        }

        self.teardown();
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(Error::ClientClosed));
        }
        tracing::debug!("Progress client driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect("disconnect requested");
                let _ = reply.send(());
            }
            Command::Dispose(reply) => {
                self.dispose();
                let _ = reply.send(());
            }
            Command::SubscribeTask(task_id, reply) => {
                let added = self.registry.subscribe_task(task_id.clone());
                if added {
                    tracing::debug!(task_id = %task_id, "Subscribed to task");
                    self.send(&task_delta(&task_id, true));
                }
                let _ = reply.send(added);
            }
            Command::UnsubscribeTask(task_id, reply) => {
                let removed = self.registry.unsubscribe_task(task_id.as_str());
                if removed {
                    tracing::debug!(task_id = %task_id, "Unsubscribed from task");
                    self.send(&task_delta(&task_id, false));
                }
                let _ = reply.send(removed);
            }
            Command::SubscribeChannel(name, reply) => {
                let added = self.registry.subscribe_channel(name.clone());
                if added {
                    tracing::debug!(channel = %name, "Joined channel");
                    self.send(&channel_delta(&name, true));
                }
                let _ = reply.send(added);
            }
            Command::UnsubscribeChannel(name, reply) => {
                let removed = self.registry.unsubscribe_channel(&name);
                if removed {
                    tracing::debug!(channel = %name, "Left channel");
                    self.send(&channel_delta(&name, false));
                }
                let _ = reply.send(removed);
            }
            Command::SetAuthToken(token) => {
                tracing::debug!(present = token.is_some(), "Auth token replaced");
                self.auth_token = token;
            }
            Command::Statistics(reply) => {
                let _ = reply.send(self.statistics());
            }
            Command::ConnectionInfo(reply) => {
                let _ = reply.send(self.connection_info());
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn emit(&self, event: ClientEvent) {
        self.bus.emit(&event);
        // No broadcast receivers is fine; handlers were already called
        self.event_tx.send(event).ok();
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<TransportKind>>) {
        match self.state() {
            ConnectionState::Connected(kind) => {
                let _ = reply.send(Ok(kind));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.pending_connects.push(reply);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.teardown();
                self.scheduler.reset();
                self.set_state(ConnectionState::Connecting);
                tracing::info!(order = ?self.negotiator.order(), "Connecting");
                self.pending_connects.push(reply);
                self.start_negotiation();
            }
        }
    }

    fn start_negotiation(&mut self) {
        let negotiator = self.negotiator.clone();
        let params = ConnectParams {
            auth_token: self.auth_token.clone(),
            channels: self.registry.channels().map(str::to_string).collect(),
        };
        self.negotiation = Some(Box::pin(async move { negotiator.negotiate(&params).await }));
    }

    fn on_negotiated(&mut self, result: Result<TransportChannel>) {
        match result {
            Ok(channel) => self.on_established(channel),
            Err(e) => {
                let failures = match &e {
                    Error::AllTransportsExhausted { failures } => failures.clone(),
                    _ => Vec::new(),
                };
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Err(Error::AllTransportsExhausted {
                        failures: failures.clone(),
                    }));
                }
                tracing::warn!(error = %e, "Negotiation round failed");
                self.handle_failure(&e.to_string());
            }
        }
    }

    fn on_established(&mut self, channel: TransportChannel) {
        let kind = channel.kind();
        let now = Instant::now();

        self.transport = Some(channel);
        self.connected_at = Some(now);
        self.awaiting_stability = true;
        self.heartbeat.reset(now);
        if kind.uses_heartbeat() {
            self.heartbeat_timer = Some(delayed_interval(self.heartbeat.interval()));
            self.probe_timer = Some(delayed_interval(self.config.heartbeat.latency_probe_interval));
        }

        self.set_state(ConnectionState::Connected(kind));
        tracing::info!(transport = %kind, "Connected");

        if kind.supports_send() {
            self.send(&self.registry.replay_message());
        }
        self.emit(ClientEvent::Connected { transport: kind });
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Ok(kind));
        }
    }

    /// Tear down and consult the scheduler after any connection failure
    fn handle_failure(&mut self, reason: &str) {
        self.teardown();
        match self.scheduler.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                self.counters.reconnect_attempts += 1;
                self.set_state(ConnectionState::Reconnecting);
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    reason,
                    "Reconnect scheduled"
                );
                self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
                self.emit(ClientEvent::Reconnecting { attempt, delay });
            }
            ReconnectDecision::Terminal { attempts } => {
                self.set_state(ConnectionState::Failed);
                let error = Error::MaxReconnectExceeded { attempts };
                tracing::error!(attempts, reason, "Giving up on reconnecting");
                self.emit(ClientEvent::ConnectionError {
                    message: format!("{error}: {reason}"),
                    attempts,
                });
            }
            ReconnectDecision::Exhausted => {
                self.set_state(ConnectionState::Failed);
            }
        }
    }

    fn on_transport_lost(&mut self, reason: String) {
        tracing::warn!(reason = %reason, "Transport lost");
        if self.state().is_connected() {
            self.emit(ClientEvent::Disconnected {
                reason: reason.clone(),
            });
        }
        self.handle_failure(&reason);
    }

    /// Drop the transport and every timer; never touches state or subscriptions
    fn teardown(&mut self) {
        self.negotiation = None;
        self.reconnect_timer = None;
        self.heartbeat_timer = None;
        self.probe_timer = None;
        if let Some(mut transport) = self.transport.take() {
            tracing::debug!(transport = %transport.kind(), "Closing transport");
            transport.close();
        }
        self.connected_at = None;
        self.awaiting_stability = false;
    }

    fn disconnect(&mut self, reason: &str) {
        let previous = self.state();
        self.teardown();
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(Error::Cancelled));
        }
        self.set_state(ConnectionState::Disconnected);
        if previous.is_live() {
            tracing::info!(reason, "Disconnected");
            self.emit(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn dispose(&mut self) {
        self.disconnect("client disposed");
        self.registry.clear();
        self.router.clear();
        self.scheduler.reset();
        self.latency.reset();
        self.counters = Counters::default();
        self.last_message_at = None;
        self.bus.clear();
        tracing::debug!("Client state disposed");
    }

    fn can_send(&self) -> bool {
        self.state().is_connected() && self.transport.as_ref().is_some_and(|t| t.can_send())
    }

    fn send(&self, message: &OutboundMessage) {
        if !self.can_send() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode outbound message");
                return;
            }
        };
        self.log_frame("outbound", &text);
        if let Err(e) = transport.send(text) {
            tracing::warn!(error = %e, "Failed to queue outbound message");
        }
    }

    fn log_frame(&self, direction: &str, text: &str) {
        if self.config.debug {
            tracing::debug!(direction, frame = text, "Raw frame");
        } else {
            tracing::trace!(direction, frame = text, "Raw frame");
        }
    }

    fn on_frame(&mut self, frame: Option<InboundFrame>) {
        let Some(frame) = frame else {
            self.on_transport_lost("transport closed".to_string());
            return;
        };
        let mut counts_as_stable = true;
        let parsed = match frame {
            InboundFrame::Closed(reason) => {
                self.on_transport_lost(reason);
                return;
            }
            InboundFrame::Text(text) => {
                self.log_frame("inbound", &text);
                parse_envelope(&text)
            }
            InboundFrame::Event { name, data } => {
                self.log_frame("inbound", &data);
                parse_named_event(&name, &data)
            }
            InboundFrame::Poll(body) => {
                self.log_frame("inbound", &body);
                parse_poll_body(&body)
            }
            InboundFrame::Initial(body) => {
                self.log_frame("inbound", &body);
                counts_as_stable = false;
                parse_poll_body(&body)
            }
        };

        let received_at = Utc::now();
        self.counters.messages_received += 1;
        self.last_message_at = Some(received_at);
        self.heartbeat.record_inbound(Instant::now());

        match parsed {
            Ok(inbound) => {
                if counts_as_stable {
                    self.mark_stable();
                }
                self.on_message(inbound, received_at);
            }
            Err(e) => {
                self.counters.parse_errors += 1;
                tracing::warn!(error = %e, "Dropping malformed message");
            }
        }
    }

    /// First well-formed message on a new connection restores the reconnect budget
    fn mark_stable(&mut self) {
        if self.awaiting_stability {
            self.awaiting_stability = false;
            self.scheduler.reset();
        }
    }

    fn on_message(&mut self, inbound: Inbound, received_at: DateTime<Utc>) {
        let latency = self.sample_latency(&inbound, received_at);
        let broadcast_transport = self
            .state()
            .transport()
            .is_some_and(|kind| !kind.supports_send());
        let ctx = RouteContext {
            received_at,
            latency,
            task_filter: broadcast_transport.then_some(&self.registry),
        };

        match self.router.route(inbound, ctx) {
            Routed::Forward(event) => self.emit(event),
            Routed::Suppressed => self.counters.updates_suppressed += 1,
            Routed::OutOfOrder | Routed::Filtered | Routed::Ignored => {}
        }
    }

    /// Samples apply in receipt order, so the latest heartbeat or pong wins
    fn sample_latency(&mut self, inbound: &Inbound, now: DateTime<Utc>) -> Option<Duration> {
        let sent_at = match &inbound.message {
            InboundMessage::Heartbeat(data) => data
                .get("timestamp")
                .and_then(protocol::parse_timestamp)
                .or(inbound.timestamp),
            _ => inbound.timestamp,
        }?;
        self.latency.observe(sent_at, now)
    }

    fn on_heartbeat_tick(&mut self) {
        match self.heartbeat.tick(Instant::now(), Utc::now()) {
            HeartbeatTick::Ping(ping) => {
                tracing::debug!("Sending heartbeat");
                self.send(&ping);
            }
            HeartbeatTick::Stale { silent_for } => {
                let error = Error::StaleConnection { silent_for };
                self.on_transport_lost(error.to_string());
            }
        }
    }

    fn send_latency_probe(&mut self) {
        tracing::debug!("Sending latency probe");
        self.send(&OutboundMessage::latency_probe(Utc::now()));
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            messages_received: self.counters.messages_received,
            parse_errors: self.counters.parse_errors,
            updates_suppressed: self.counters.updates_suppressed,
            average_latency_ms: self.latency.average_ms(),
            connection_uptime: self
                .connected_at
                .map(|at| at.elapsed())
                .unwrap_or_default(),
            reconnect_attempts: self.counters.reconnect_attempts,
            current_transport: self.state().transport(),
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        let state = self.state();
        ConnectionInfo {
            state,
            transport: state.transport(),
            reconnect_attempt: self.scheduler.attempt(),
            last_message_at: self.last_message_at,
            latency_ms: self.latency.average_ms(),
            subscriptions: self.registry.snapshot(),
        }
    }
}
