use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, stream::BoxStream, Sink, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Both halves of one established connection, carrying text frames.
pub struct TransportLink {
    pub inbound: FrameStream,
    pub outbound: FrameSink,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError>;
}

pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        let (ws_writer, ws_reader) = ws_stream.split();

        let inbound = ws_reader
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(Message::Close(_)) => Some(Err(TransportError::ClosedByPeer)),
                    Ok(other) => {
                        debug!(kind = ?other, "ws: ignoring control frame");
                        None
                    }
                    Err(err) => Some(Err(TransportError::WebSocket(err))),
                })
            })
            .boxed();

        let outbound = ws_writer
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

        Ok(TransportLink {
            inbound,
            outbound: Box::pin(outbound),
        })
    }
}

/// Accepts `ws(s)://` as is and rewrites `http(s)://` to the matching websocket scheme.
pub fn normalize_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(endpoint.trim()).map_err(|err| invalid(&err.to_string()))?;
    let ws_scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        _ => return Err(invalid("scheme must be ws, wss, http or https")),
    };
    url.set_scheme(ws_scheme)
        .map_err(|_| invalid("scheme could not be rewritten"))?;
    Ok(url)
}
