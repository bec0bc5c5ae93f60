//! WebSocket event source.
//!
//! Connects to the realtime endpoint with tokio-tungstenite and decodes each
//! text or binary frame into a [`RealtimeMessage`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use syncline_protocol::{codec, RealtimeMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::traits::{EventSource, TransportError};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket event source configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Realtime endpoint, e.g. `wss://broadcast.example.com/realtime`.
    pub url: String,
    /// Bearer token sent in the handshake.
    pub token: Option<String>,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    /// Create a configuration for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Authenticate the handshake with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Realtime event source over a WebSocket.
pub struct WebSocketEventSource {
    config: WebSocketConfig,
    stream: Option<Stream>,
}

impl WebSocketEventSource {
    /// Create an unconnected event source.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    fn mark_closed(&mut self) {
        self.stream = None;
    }
}

#[async_trait]
impl EventSource for WebSocketEventSource {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("Invalid realtime URL: {}", e)))?;
        if let Some(token) = &self.config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Connect(format!("Invalid token: {}", e)))?;
            request.headers_mut().insert("authorization", value);
        }

        let (stream, response) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(format!("WebSocket handshake failed: {}", e)))?;

        info!(url = %self.config.url, status = response.status().as_u16(), "Realtime channel connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<RealtimeMessage>, TransportError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(TransportError::ConnectionClosed);
            };

            match stream.next().await {
                Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!(error = %e, "Dropping undecodable realtime frame"),
                },
                Some(Ok(Message::Binary(data))) => match codec::decode_bytes(&data) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => warn!(error = %e, "Dropping undecodable realtime frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("Realtime channel closed");
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .close(None)
                .await
                .map_err(|e| TransportError::Other(format!("Close failed: {}", e)))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
