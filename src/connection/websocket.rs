use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::client::{Connector, Incoming, Link, Outgoing};
use crate::error::ConnectionError;

/// Path of the voice endpoint, relative to the server origin
pub const VOICE_PATH: &str = "/ws/voice";

/// Derive the WebSocket address from a page/server location
///
/// Only the origin of `base` is kept; `http` maps to `ws` and `https` to `wss`.
pub fn endpoint(base: &str, path: &str) -> Result<String, ConnectionError> {
    let invalid = |reason: &str| ConnectionError::Connect {
        url: base.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, rest) = base.split_once("://").ok_or_else(|| invalid("missing scheme"))?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("unsupported scheme")),
    };

    let authority = rest
        .split(|c: char| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();

    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Ok(format!("{ws_scheme}://{authority}{path}"))
}

/// Connects over WebSocket with one reader and one writer task
pub struct WebSocketConnector {
    channel_capacity: usize,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| ConnectionError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        info!("WebSocket open: {}", url);

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outgoing>(self.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Incoming>(self.channel_capacity);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Outgoing::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("WebSocket send failed: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            let _ = sink.close().await;
            debug!("WebSocket writer stopped");
        });

        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(Incoming::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if inbound_tx.send(Incoming::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => warn!("Skipping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string());
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };

            debug!("WebSocket reader stopped: {:?}", reason);
            let _ = inbound_tx.send(Incoming::Closed { reason }).await;
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
