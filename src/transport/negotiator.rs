//! Ordered transport negotiation with per-attempt timeouts

use std::sync::Arc;
use std::time::Duration;

use super::{ConnectParams, Connector, TransportChannel};
use crate::error::{Error, Result};
use crate::types::TransportKind;

/// Tries transports in preference order until one is established
///
/// Cloning is cheap; the client hands a clone to every negotiation round so the
/// round can run as an owned future.
#[derive(Clone)]
pub struct TransportNegotiator {
    connectors: Arc<[Arc<dyn Connector>]>,
    order: Arc<[TransportKind]>,
    timeout: Duration,
}

impl std::fmt::Debug for TransportNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportNegotiator")
            .field("order", &self.order)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TransportNegotiator {
    /// Create a negotiator over `connectors`, attempting kinds in `order`
    pub fn new(
        connectors: Vec<Arc<dyn Connector>>,
        order: Vec<TransportKind>,
        timeout: Duration,
    ) -> Self {
        Self {
            connectors: connectors.into(),
            order: order.into(),
            timeout,
        }
    }

    /// Preference order
    pub fn order(&self) -> &[TransportKind] {
        &self.order
    }

    /// Run one negotiation round
    ///
    /// Attempts are strictly sequential: a later transport is only started after the
    /// earlier one failed or timed out. Returns the first established transport, or
    /// [`Error::AllTransportsExhausted`] listing every failure.
    pub async fn negotiate(&self, params: &ConnectParams) -> Result<TransportChannel> {
        let mut failures = Vec::with_capacity(self.order.len());

        for &kind in self.order.iter() {
            let Some(connector) = self.connectors.iter().find(|c| c.kind() == kind) else {
                tracing::warn!(transport = %kind, "No connector registered, skipping");
                failures.push((kind, "no connector registered".to_string()));
                continue;
            };

            tracing::debug!(transport = %kind, timeout_ms = self.timeout.as_millis(), "Attempting transport");
            match tokio::time::timeout(self.timeout, connector.connect(params)).await {
                Ok(Ok(channel)) => {
                    tracing::info!(transport = %kind, "Transport established");
                    return Ok(channel);
                }
                Ok(Err(e)) => {
                    tracing::warn!(transport = %kind, error = %e, "Transport attempt failed");
                    failures.push((kind, e.to_string()));
                }
                Err(_) => {
                    let reason = format!("timed out after {}ms", self.timeout.as_millis());
                    tracing::warn!(transport = %kind, "Transport attempt {reason}");
                    failures.push((kind, reason));
                }
            }
        }

        Err(Error::AllTransportsExhausted { failures })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    struct StubConnector {
        kind: TransportKind,
        behavior: Behavior,
        calls: AtomicUsize,
        log: Arc<Mutex<Vec<TransportKind>>>,
    }

    impl StubConnector {
        fn new(
            kind: TransportKind,
            behavior: Behavior,
            log: &Arc<Mutex<Vec<TransportKind>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                calls: AtomicUsize::new(0),
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn connect(&self, _params: &ConnectParams) -> Result<TransportChannel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.kind);
            match self.behavior {
                Behavior::Succeed => {
                    let (_tx, rx) = mpsc::channel(1);
                    Ok(TransportChannel::new(
                        self.kind,
                        rx,
                        None,
                        CancellationToken::new(),
                    ))
                }
                Behavior::Fail => Err(Error::transport(self.kind, "refused")),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    fn erased(connector: &Arc<StubConnector>) -> Arc<dyn Connector> {
        connector.clone()
    }

    const ALL: [TransportKind; 3] = [
        TransportKind::Socket,
        TransportKind::EventStream,
        TransportKind::Polling,
    ];

    #[tokio::test]
    async fn first_success_wins_and_later_transports_never_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let socket = StubConnector::new(TransportKind::Socket, Behavior::Fail, &log);
        let stream = StubConnector::new(TransportKind::EventStream, Behavior::Succeed, &log);
        let polling = StubConnector::new(TransportKind::Polling, Behavior::Succeed, &log);
        let negotiator = TransportNegotiator::new(
            vec![erased(&polling), erased(&stream), erased(&socket)],
            ALL.to_vec(),
            Duration::from_secs(5),
        );

        let channel = negotiator.negotiate(&ConnectParams::default()).await.unwrap();
        assert_eq!(channel.kind(), TransportKind::EventStream);
        assert_eq!(
            *log.lock().unwrap(),
            vec![TransportKind::Socket, TransportKind::EventStream]
        );
        assert_eq!(polling.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempt_times_out_and_falls_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let negotiator = TransportNegotiator::new(
            vec![
                erased(&StubConnector::new(TransportKind::Socket, Behavior::Hang, &log)),
                erased(&StubConnector::new(
                    TransportKind::EventStream,
                    Behavior::Succeed,
                    &log,
                )),
            ],
            ALL.to_vec(),
            Duration::from_secs(5),
        );

        let started = tokio::time::Instant::now();
        let channel = negotiator.negotiate(&ConnectParams::default()).await.unwrap();
        assert_eq!(channel.kind(), TransportKind::EventStream);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_round_lists_every_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let negotiator = TransportNegotiator::new(
            vec![
                erased(&StubConnector::new(TransportKind::Socket, Behavior::Fail, &log)),
                erased(&StubConnector::new(TransportKind::EventStream, Behavior::Hang, &log)),
            ],
            ALL.to_vec(),
            Duration::from_secs(5),
        );

        match negotiator.negotiate(&ConnectParams::default()).await {
            Err(Error::AllTransportsExhausted { failures }) => {
                let kinds: Vec<_> = failures.iter().map(|(k, _)| *k).collect();
                assert_eq!(kinds, ALL.to_vec());
                assert!(failures[1].1.contains("timed out"));
                assert_eq!(failures[2].1, "no connector registered");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_order_is_exhausted_immediately() {
        let negotiator = TransportNegotiator::new(Vec::new(), Vec::new(), Duration::from_secs(5));
        let err = negotiator.negotiate(&ConnectParams::default()).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "all transports exhausted (no transports configured)");
    }
}
