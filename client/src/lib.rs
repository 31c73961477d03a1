//! # Plaza Headless Client
//!
//! A minimal WebSocket client for the plaza server, used by load bots and
//! the integration tests. It speaks the same JSON protocol as a real game
//! client but renders nothing.
//!
//! ```rust,no_run
//! use plaza_client::{plaza_url, PlazaClient};
//! use plaza_shared::ClientMessage;
//!
//! # async fn demo(token: &str) -> Result<(), plaza_client::ClientError> {
//! let mut client = PlazaClient::connect(&plaza_url("127.0.0.1:8080", token)).await?;
//! client.send(&ClientMessage::Auth { token: None }).await?;
//! # Ok(())
//! # }
//! ```

pub mod wander;

use futures_util::{SinkExt, StreamExt};
use log::debug;
use plaza_shared::{ClientMessage, ServerMessage, TOKEN_QUERY_PARAM};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code reported when the socket ended without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection closed ({code}): {reason}")]
    Closed { code: u16, reason: String },
}

/// Something received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(ServerMessage),
    Closed { code: u16, reason: String },
}

/// Builds the connection URL for a server address and session token.
pub fn plaza_url(addr: &str, token: &str) -> String {
    format!("ws://{}/?{}={}", addr, TOKEN_QUERY_PARAM, token)
}

pub struct PlazaClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl PlazaClient {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { ws, closed: false })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.ws.send(Message::Text(message.to_text()?)).await?;
        Ok(())
    }

    /// Sends a raw text frame, bypassing message encoding.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Waits for the next decoded server message or the close.
    ///
    /// Frames that do not decode are skipped. Once closed, every further
    /// call reports the closure again.
    pub async fn recv(&mut self) -> Result<ClientEvent, ClientError> {
        if self.closed {
            return Err(ClientError::Closed {
                code: ABNORMAL_CLOSE,
                reason: "already closed".to_string(),
            });
        }

        loop {
            let frame = match self.ws.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!("Socket error: {}", e);
                    return Ok(self.mark_closed(ABNORMAL_CLOSE, String::new()));
                }
                None => return Ok(self.mark_closed(ABNORMAL_CLOSE, String::new())),
            };

            match frame {
                Message::Text(text) => match ServerMessage::parse(&text) {
                    Some(message) => return Ok(ClientEvent::Message(message)),
                    None => debug!("Skipping undecodable frame: {}", text),
                },
                Message::Close(Some(close)) => {
                    return Ok(self.mark_closed(close.code.into(), close.reason.to_string()))
                }
                Message::Close(None) => {
                    return Ok(self.mark_closed(ABNORMAL_CLOSE, String::new()))
                }
                _ => {}
            }
        }
    }

    /// Receives until a message satisfies `pred`, skipping the rest.
    pub async fn recv_until<F>(
        &mut self,
        mut pred: F,
        timeout: Duration,
    ) -> Result<ServerMessage, ClientError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let wait = async {
            loop {
                match self.recv().await? {
                    ClientEvent::Message(message) if pred(&message) => return Ok(message),
                    ClientEvent::Message(_) => {}
                    ClientEvent::Closed { code, reason } => {
                        return Err(ClientError::Closed { code, reason })
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Receives until the server closes, returning the close code and reason.
    pub async fn wait_closed(&mut self, timeout: Duration) -> Result<(u16, String), ClientError> {
        let wait = async {
            loop {
                if let ClientEvent::Closed { code, reason } = self.recv().await? {
                    return Ok((code, reason));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.ws.close(None).await?;
        }
        Ok(())
    }

    fn mark_closed(&mut self, code: u16, reason: String) -> ClientEvent {
        self.closed = true;
        ClientEvent::Closed { code, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaza_url() {
        assert_eq!(
            plaza_url("127.0.0.1:9000", "a.b.c"),
            "ws://127.0.0.1:9000/?token=a.b.c"
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = PlazaClient::connect(&plaza_url(&addr.to_string(), "x")).await;
        assert!(matches!(result.err(), Some(ClientError::WebSocket(_))));
    }
}
