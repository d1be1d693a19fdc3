use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::events::{ClientEvent, EventFrame, ServerEvent};

/// Opens authenticated realtime connections. The connection manager only
/// talks to this trait, so tests can substitute an in-memory transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportLink>, ChatError>;
}

/// One live connection. `recv` returns `None` when the peer closed the
/// stream and `Some(Err(_))` on transport errors; both end the link.
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<(), ChatError>;
    async fn recv(&mut self) -> Option<Result<ServerEvent, ChatError>>;
    async fn close(&mut self);
}

/// WebSocket transport carrying `{event, payload}` JSON frames, with the
/// bearer token supplied as an `Authorization` header during the handshake.
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn classify_ws_error(err: &WsError) -> ChatError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                ChatError::Auth(format!("handshake rejected: {status}"))
            } else {
                ChatError::Transient(format!("handshake failed: {status}"))
            }
        }
        other => ChatError::Transient(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportLink>, ChatError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Transient(format!("invalid socket url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChatError::Auth(format!("token is not header-safe: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!(url = %self.url, "opening realtime connection");
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| classify_ws_error(&e))?;
        Ok(Box::new(WsLink { inner: stream }))
    }
}

struct WsLink {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, event: ClientEvent) -> Result<(), ChatError> {
        let text = serde_json::to_string(&event.into_frame())
            .map_err(|e| ChatError::Request(e.to_string()))?;
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| ChatError::Transient(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerEvent, ChatError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let frame = match serde_json::from_str::<EventFrame>(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("unparseable frame: {e}");
                            continue;
                        }
                    };
                    match ServerEvent::from_frame(&frame) {
                        Some(event) => return Some(Ok(event)),
                        None => {
                            debug!(event = %frame.event, "ignoring unknown event");
                            continue;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) => return None,
                // Pings are answered by the protocol layer; binary frames
                // are not part of this channel.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(classify_ws_error(&e))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
