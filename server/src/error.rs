use crate::config::ConfigError;
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Why the server closed a connection. Every variant is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Missing, malformed, badly signed or expired token at connect.
    InvalidToken,
    /// Token sent with `auth` did not verify or named another session.
    InvalidTokenReauth,
    InsufficientScope,
    ServerFull,
    HandshakeTimeout,
    /// A newer connection joined with the same session id.
    SessionReplaced,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::InvalidToken => "invalid_token",
            CloseReason::InvalidTokenReauth => "invalid_token_reauth",
            CloseReason::InsufficientScope => "insufficient_scope",
            CloseReason::ServerFull => "server_full",
            CloseReason::HandshakeTimeout => "handshake_timeout",
            CloseReason::SessionReplaced => "session_replaced",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }

    /// WebSocket close code sent with this reason.
    pub fn close_code(&self) -> CloseCode {
        match self {
            CloseReason::ServerFull => CloseCode::Again,
            CloseReason::ServerShutdown => CloseCode::Away,
            _ => CloseCode::Policy,
        }
    }

    /// Authentication failures are reported with `auth_error`, the rest with `kick`.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CloseReason::InvalidToken
                | CloseReason::InvalidTokenReauth
                | CloseReason::InsufficientScope
        )
    }
}
