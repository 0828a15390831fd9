//! Status polling transport

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::{
    ConnectParams, Connector, INBOUND_BUFFER, InboundFrame, TransportChannel, forward_frame,
};
use crate::error::Result;
use crate::types::TransportKind;

/// Fetches a status endpoint on a fixed interval
///
/// One successful request establishes the transport; its body is delivered as the
/// first frame ([`InboundFrame::Initial`]). A failed poll closes the transport so
/// the client renegotiates.
#[derive(Clone, Debug)]
pub struct PollingConnector {
    url: String,
    http: reqwest::Client,
    interval: Duration,
}

impl PollingConnector {
    /// Create a connector polling `url` every `interval`
    pub fn new(url: impl Into<String>, http: reqwest::Client, interval: Duration) -> Self {
        Self {
            url: url.into(),
            http,
            interval,
        }
    }
}

async fn fetch_status(http: &reqwest::Client, url: &str, token: Option<&str>) -> Result<String> {
    let mut request = http.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?.error_for_status()?;
    Ok(response.text().await?)
}

#[async_trait]
impl Connector for PollingConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn connect(&self, params: &ConnectParams) -> Result<TransportChannel> {
        let token = params.auth_token.clone();
        let initial = fetch_status(&self.http, &self.url, token.as_deref()).await?;

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        // Buffer is empty, so the initial body always fits
        let _ = tx.try_send(InboundFrame::Initial(initial));

        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let http = self.http.clone();
        let url = self.url.clone();
        let period = self.interval;

        let poller = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let frame = tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    result = fetch_status(&http, &url, token.as_deref()) => match result {
                        Ok(body) => InboundFrame::Poll(body),
                        Err(e) => {
                            tracing::warn!(error = %e, "Status poll failed");
                            let _ = forward_frame(&tx, InboundFrame::Closed(e.to_string())).await;
                            break;
                        }
                    },
                };
                if !forward_frame(&tx, frame).await {
                    break;
                }
            }
        });

        Ok(TransportChannel::new(TransportKind::Polling, rx, None, cancel).with_task(poller))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> ConnectParams {
        ConnectParams {
            auth_token: Some("secret".to_string()),
            channels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn initial_body_is_first_frame_and_polling_repeats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"active_tasks":1}"#))
            .mount(&server)
            .await;

        let connector = PollingConnector::new(
            format!("{}/status", server.uri()),
            reqwest::Client::new(),
            Duration::from_millis(20),
        );
        let mut channel = connector.connect(&params()).await.unwrap();
        let body = r#"{"active_tasks":1}"#.to_string();
        assert_eq!(channel.recv().await.unwrap(), InboundFrame::Initial(body.clone()));
        for _ in 0..2 {
            assert_eq!(channel.recv().await.unwrap(), InboundFrame::Poll(body.clone()));
        }
        assert!(server.received_requests().await.unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn failed_initial_request_fails_the_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let connector = PollingConnector::new(
            format!("{}/status", server.uri()),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        assert!(matches!(
            connector.connect(&params()).await,
            Err(Error::Network(_))
        ));
    }

    #[tokio::test]
    async fn failed_poll_closes_the_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let connector = PollingConnector::new(
            format!("{}/status", server.uri()),
            reqwest::Client::new(),
            Duration::from_millis(10),
        );
        let mut channel = connector.connect(&params()).await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), InboundFrame::Initial("{}".to_string()));
        assert!(matches!(
            channel.recv().await.unwrap(),
            InboundFrame::Closed(_)
        ));
    }

    #[tokio::test]
    async fn closing_the_channel_stops_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let connector = PollingConnector::new(
            format!("{}/status", server.uri()),
            reqwest::Client::new(),
            Duration::from_millis(10),
        );
        let channel = connector.connect(&params()).await.unwrap();
        drop(channel);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let seen = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), seen);
    }
}
