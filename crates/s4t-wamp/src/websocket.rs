use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::WampError;
use crate::serializer::Serializer;
use crate::tls::{self, TlsPolicy};
use crate::transport::{Connector, Transport, CHANNEL_CAPACITY};

pub const DEFAULT_ROUTER_URL: &str = "wss://crossbar:8181/ws";

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub tls: TlsPolicy,
    /// Offered to the router in this order.
    pub serializers: Vec<Serializer>,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ROUTER_URL.to_string(),
            tls: TlsPolicy::Verify,
            serializers: vec![Serializer::Json, Serializer::MsgPack],
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connects to a WAMP router over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: TransportConfig,
}

impl WebSocketConnector {
    pub fn new(config: TransportConfig) -> Result<Self, WampError> {
        if config.serializers.is_empty() {
            return Err(WampError::transport("no serializers configured"));
        }
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(WampError::transport(format!(
                "router URL must be ws:// or wss://, got {}",
                config.url
            )));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Transport, WampError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(WampError::transport)?;

        let offered = self
            .config
            .serializers
            .iter()
            .map(|s| s.subprotocol())
            .collect::<Vec<_>>()
            .join(", ");
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(&offered).map_err(WampError::transport)?,
        );

        let connector = tls::connector(&self.config.tls)?;
        let (ws, response) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_tls_with_config(request, None, false, connector),
        )
        .await
        .map_err(|_| WampError::transport(format!("connect to {} timed out", self.config.url)))?
        .map_err(WampError::transport)?;

        let serializer = match response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
        {
            Some(name) => Serializer::from_subprotocol(name).ok_or_else(|| {
                WampError::transport(format!("router chose unsupported subprotocol {name}"))
            })?,
            None => {
                warn!("router did not confirm a subprotocol, assuming {}", self.config.serializers[0]);
                self.config.serializers[0]
            }
        };

        info!(url = %self.config.url, %serializer, "websocket connected");
        Ok(spawn_pumps(ws, serializer))
    }

    fn endpoint(&self) -> String {
        self.config.url.clone()
    }
}

fn spawn_pumps(ws: WebSocketStream<MaybeTlsStream<TcpStream>>, serializer: Serializer) -> Transport {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<crate::message::WampMessage>(CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    // Pongs must go out through the write half, which only the writer owns.
    let (pong_tx, mut pong_rx) = mpsc::channel::<Message>(8);

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                msg = out_rx.recv() => match msg {
                    Some(msg) => match serializer.encode(&msg) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("dropping outbound message: {e}");
                            continue;
                        }
                    },
                    None => break,
                },
                Some(pong) = pong_rx.recv() => pong,
            };
            if let Err(e) = sink.send(frame).await {
                debug!("websocket write failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let decoded = match frame {
                Ok(Message::Text(text)) => serializer.decode(text.as_str().as_bytes()),
                Ok(Message::Binary(bytes)) => serializer.decode(&bytes),
                Ok(Message::Ping(payload)) => {
                    let _ = pong_tx.try_send(Message::Pong(payload));
                    continue;
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "router closed the websocket");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!("websocket read failed: {e}");
                    break;
                }
            };
            match decoded {
                Ok(msg) => {
                    if in_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("dropping undecodable frame: {e}"),
            }
        }
    });

    Transport::from_parts(out_tx, in_rx, vec![writer, reader])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_url() {
        let config = TransportConfig {
            url: "https://crossbar:8181/ws".into(),
            ..TransportConfig::default()
        };
        assert!(WebSocketConnector::new(config).is_err());
    }

    #[test]
    fn test_requires_a_serializer() {
        let config = TransportConfig {
            serializers: vec![],
            ..TransportConfig::default()
        };
        assert!(WebSocketConnector::new(config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_router_is_transport_failure() {
        // Port 9 (discard) on localhost is closed in test environments.
        let connector = WebSocketConnector::new(TransportConfig {
            url: "ws://127.0.0.1:9/ws".into(),
            connect_timeout: Duration::from_secs(2),
            ..TransportConfig::default()
        })
        .unwrap();
        assert!(matches!(
            connector.connect().await,
            Err(WampError::TransportFailure(_))
        ));
    }
}
