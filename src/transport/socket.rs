//! WebSocket transport

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{
    ConnectParams, Connector, INBOUND_BUFFER, InboundFrame, OUTBOUND_BUFFER, TransportChannel,
    endpoint_url, forward_frame,
};
use crate::error::Result;
use crate::types::TransportKind;

/// Opens a WebSocket to the progress endpoint
///
/// The auth token travels as the `token` query parameter. Once the handshake
/// completes, one task reads frames and another writes queued outbound text.
#[derive(Clone, Debug)]
pub struct SocketConnector {
    url: String,
}

impl SocketConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for SocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self, params: &ConnectParams) -> Result<TransportChannel> {
        let url = endpoint_url(&self.url, &[("token", params.auth_token.as_deref())])?;
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();

        let reader_cancel = cancel.clone();
        let reader_tx = inbound_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    next = source.next() => match next {
                        Some(Ok(Message::Text(text))) => InboundFrame::Text(text.as_str().to_string()),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("closed by server ({})", u16::from(f.code)))
                                .unwrap_or_else(|| "closed by server".to_string());
                            let _ = forward_frame(&reader_tx, InboundFrame::Closed(reason)).await;
                            break;
                        }
                        // Ping/pong/binary frames carry no notifications
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let _ = forward_frame(&reader_tx, InboundFrame::Closed(e.to_string())).await;
                            break;
                        }
                        None => {
                            let _ = forward_frame(
                                &reader_tx,
                                InboundFrame::Closed("socket stream ended".to_string()),
                            )
                            .await;
                            break;
                        }
                    },
                };
                if !forward_frame(&reader_tx, frame).await {
                    break;
                }
            }
        });

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.close().await;
                        break;
                    }
                    text = outbound_rx.recv() => {
                        let Some(text) = text else {
                            let _ = sink.close().await;
                            break;
                        };
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!(error = %e, "Socket write failed");
                            let _ = forward_frame(&inbound_tx, InboundFrame::Closed(e.to_string())).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok(
            TransportChannel::new(TransportKind::Socket, inbound_rx, Some(outbound_tx), cancel)
                .with_task(reader)
                .with_task(writer),
        )
    }
}
