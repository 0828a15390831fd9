//! Server-sent event transport

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    ConnectParams, Connector, INBOUND_BUFFER, InboundFrame, TransportChannel, endpoint_url,
    forward_frame,
};
use crate::error::Result;
use crate::types::TransportKind;

/// Subscribes to a server-sent event endpoint
///
/// The token and the comma-joined channel list are passed as `token` and
/// `channels` query parameters. The transport counts as established once the
/// server answers with a success status.
#[derive(Clone, Debug)]
pub struct EventStreamConnector {
    url: String,
    http: reqwest::Client,
}

impl EventStreamConnector {
    /// Create a connector sharing an HTTP client
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl Connector for EventStreamConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    async fn connect(&self, params: &ConnectParams) -> Result<TransportChannel> {
        let channels = params.channels_param();
        let url = endpoint_url(
            &self.url,
            &[
                ("token", params.auth_token.as_deref()),
                ("channels", Some(channels.as_str())),
            ],
        )?;

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let mut events = response.bytes_stream().eventsource();

        let pump = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    next = events.next() => match next {
                        Some(Ok(event)) => InboundFrame::Event {
                            name: event.event,
                            data: event.data,
                        },
                        Some(Err(e)) => {
                            let _ = forward_frame(&tx, InboundFrame::Closed(e.to_string())).await;
                            break;
                        }
                        None => {
                            let _ = forward_frame(
                                &tx,
                                InboundFrame::Closed("event stream ended".to_string()),
                            )
                            .await;
                            break;
                        }
                    },
                };
                if !forward_frame(&tx, frame).await {
                    break;
                }
            }
        });

        Ok(TransportChannel::new(TransportKind::EventStream, rx, None, cancel).with_task(pump))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> ConnectParams {
        ConnectParams {
            auth_token: Some("secret".to_string()),
            channels: vec!["progress".to_string(), "system".to_string()],
        }
    }

    #[tokio::test]
    async fn streams_named_and_default_events() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: progress_update\n",
            "data: {\"task_id\":\"t1\",\"progress\":5}\n\n",
            "data: {\"type\":\"heartbeat\",\"data\":{}}\n\n",
        );
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("token", "secret"))
            .and(query_param("channels", "progress,system"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let connector =
            EventStreamConnector::new(format!("{}/events", server.uri()), reqwest::Client::new());
        let mut channel = connector.connect(&params()).await.unwrap();
        assert_eq!(channel.kind(), TransportKind::EventStream);
        assert!(!channel.can_send());

        assert_eq!(
            channel.recv().await.unwrap(),
            InboundFrame::Event {
                name: "progress_update".to_string(),
                data: "{\"task_id\":\"t1\",\"progress\":5}".to_string(),
            }
        );
        match channel.recv().await.unwrap() {
            InboundFrame::Event { name, data } => {
                assert!(name.is_empty() || name == "message");
                assert_eq!(data, "{\"type\":\"heartbeat\",\"data\":{}}");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(matches!(
            channel.recv().await.unwrap(),
            InboundFrame::Closed(_)
        ));
    }

    #[tokio::test]
    async fn error_status_fails_the_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let connector =
            EventStreamConnector::new(format!("{}/events", server.uri()), reqwest::Client::new());
        let err = connector.connect(&params()).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
