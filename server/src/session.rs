//! Connection lifecycle state machine.
//!
//! [`Plaza`] owns the registry and applies every [`NetworkEvent`] to it:
//! connection acceptance, client messages, socket closes and handshake
//! timeouts. It is driven by exactly one task, the plaza loop in
//! [`crate::network`], so handlers run to completion one at a time and
//! never race each other or the movement/snapshot ticks.
//!
//! ```text
//! Connecting ──► Rejected
//!     │
//!     ▼
//! Handshaking ──► Joined ──► Closed
//!     └──────────────────────►┘
//! ```

use crate::client_manager::{ClientContext, ClientManager, ConnId, HandshakeInfo, Outbound};
use crate::config::ServerConfig;
use crate::error::CloseReason;
use crate::game;
use crate::network::NetworkEvent;
use crate::ratelimit::ActionClass;
use crate::sanitize::TextSanitizer;
use crate::utils::trim_and_cap;
use log::{debug, info, warn};
use plaza_shared::{token, ClientMessage, PlazaEvent, ServerMessage, JOIN_SCOPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const MAX_CHAT_CHARS: usize = 240;
pub const MAX_EMOTE_CHARS: usize = 32;

/// Lifecycle of one connection.
///
/// `Connecting` and `Rejected` describe a connection before a
/// [`ClientContext`] exists: admission either rejects it outright or creates
/// the context directly in `Handshaking`. Only the remaining states are ever
/// stored on a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Joined,
    Closed,
    Rejected,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Rejected)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Connecting, Rejected) | (Connecting, Handshaking) | (Handshaking, Joined) => true,
            (Connecting | Handshaking | Joined, Closed) => true,
            _ => false,
        }
    }
}

/// The shared space: registry, configuration and the event handlers that
/// move connections through their lifecycle.
pub struct Plaza {
    config: Arc<ServerConfig>,
    clients: ClientManager,
    sanitizer: Arc<dyn TextSanitizer>,
    /// Used to schedule handshake timeouts back into the plaza loop
    events: mpsc::UnboundedSender<NetworkEvent>,
    player_count: watch::Sender<usize>,
}

impl Plaza {
    pub fn new(
        config: Arc<ServerConfig>,
        sanitizer: Arc<dyn TextSanitizer>,
        events: mpsc::UnboundedSender<NetworkEvent>,
        player_count: watch::Sender<usize>,
    ) -> Self {
        Self {
            clients: ClientManager::new(config.max_clients),
            config,
            sanitizer,
            events,
            player_count,
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn player_count(&self) -> usize {
        self.clients.joined_count()
    }

    pub fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::NewConnection {
                conn_id,
                token,
                outbound,
            } => {
                self.accept(conn_id, token, outbound);
            }
            NetworkEvent::ClientMessage { conn_id, message } => {
                self.handle_message(conn_id, message)
            }
            NetworkEvent::ClientDisconnect { conn_id } => {
                if self.cleanup(conn_id).is_some() {
                    debug!("Client {} closed its connection", conn_id);
                }
            }
            NetworkEvent::HandshakeTimeout { conn_id } => self.handshake_timed_out(conn_id),
        }
    }

    /// Admits a Connecting connection: verify the URL token, check capacity,
    /// then enter Handshaking. Returns the state the connection ended in.
    fn accept(
        &mut self,
        conn_id: ConnId,
        token: Option<String>,
        outbound: Outbound,
    ) -> ConnectionState {
        let claims = match token.as_deref().map(|t| token::verify(t, &self.config.secret)) {
            Some(Ok(claims)) => claims,
            Some(Err(e)) => {
                info!("Rejecting client {}: {}", conn_id, e);
                return Self::reject(outbound, CloseReason::InvalidToken);
            }
            None => {
                info!("Rejecting client {}: no token", conn_id);
                return Self::reject(outbound, CloseReason::InvalidToken);
            }
        };

        if self.clients.is_full() {
            info!("Rejecting client {}: server full", conn_id);
            return Self::reject(outbound, CloseReason::ServerFull);
        }

        let mut context = ClientContext::new(conn_id, claims, outbound);
        context.send(&ServerMessage::Welcome {
            motd: self.config.motd.clone(),
            instance_id: self.config.instance_id.clone(),
            snapshot_interval: self.config.snapshot_interval.as_millis() as u64,
        });
        context.handshake_timer = Some(self.arm_handshake_timer(conn_id));
        debug_assert!(ConnectionState::Connecting.can_transition(context.state));
        let state = context.state;
        self.clients.insert(context);
        state
    }

    fn reject(outbound: Outbound, reason: CloseReason) -> ConnectionState {
        debug_assert!(ConnectionState::Connecting.can_transition(ConnectionState::Rejected));
        outbound.close(reason);
        ConnectionState::Rejected
    }

    fn arm_handshake_timer(&self, conn_id: ConnId) -> tokio::task::JoinHandle<()> {
        let events = self.events.clone();
        let timeout = self.config.handshake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(NetworkEvent::HandshakeTimeout { conn_id });
        })
    }

    fn handshake_timed_out(&mut self, conn_id: ConnId) {
        // The timer may fire after a join or close that raced its abort
        let still_pending = self
            .clients
            .get(conn_id)
            .is_some_and(|c| c.state == ConnectionState::Handshaking);
        if still_pending {
            info!("Client {} did not authenticate in time", conn_id);
            self.close(conn_id, CloseReason::HandshakeTimeout);
        }
    }

    fn handle_message(&mut self, conn_id: ConnId, message: ClientMessage) {
        let Some(client) = self.clients.get_mut(conn_id) else {
            return;
        };
        let joined = client.is_joined();

        match message {
            ClientMessage::Hello {
                build,
                device,
                locale,
            } => {
                client.handshake = HandshakeInfo::new(build, device, locale);
                debug!("Client {} hello: {:?}", conn_id, client.handshake);
            }
            ClientMessage::Auth { token } => self.finalize_join(conn_id, token),
            ClientMessage::SelectAvatar {
                character_id,
                cosmetics,
            } => {
                if !client.select_avatar(character_id, cosmetics) {
                    debug!("Client {} selected a character it does not own", conn_id);
                }
            }
            ClientMessage::Input {
                seq, axes, emote, ..
            } if joined => {
                client.apply_input(seq, axes);
                if let Some(emote) = emote {
                    self.handle_emote(conn_id, &emote);
                }
            }
            ClientMessage::Chat { text } if joined => self.handle_chat(conn_id, &text),
            ClientMessage::Ping { ts } if joined => client.send(&ServerMessage::Pong { ts }),
            _ => debug!("Client {} sent a message before joining; ignored", conn_id),
        }
    }

    /// Handshaking → Joined, triggered by `auth`.
    fn finalize_join(&mut self, conn_id: ConnId, token: Option<String>) {
        let secret = &self.config.secret;
        let Some(client) = self.clients.get_mut(conn_id) else {
            return;
        };
        if client.is_joined() {
            return;
        }

        if let Some(token) = token {
            match token::verify(&token, secret) {
                Ok(claims) if claims.sid == client.session_id => client.refresh_claims(claims),
                Ok(_) => {
                    warn!("Client {} re-authenticated with another session", conn_id);
                    self.close(conn_id, CloseReason::InvalidTokenReauth);
                    return;
                }
                Err(e) => {
                    info!("Client {} re-authentication failed: {}", conn_id, e);
                    self.close(conn_id, CloseReason::InvalidTokenReauth);
                    return;
                }
            }
        }

        if !client.claims.permits(JOIN_SCOPE) {
            self.close(conn_id, CloseReason::InsufficientScope);
            return;
        }

        let session_id = client.session_id.clone();
        if let Some(previous) = self.clients.joined_conn(&session_id) {
            info!(
                "Session {} moved from client {} to {}",
                session_id, previous, conn_id
            );
            self.close(previous, CloseReason::SessionReplaced);
        }

        if self.clients.is_full() {
            self.close(conn_id, CloseReason::ServerFull);
            return;
        }

        if !self.clients.mark_joined(conn_id) {
            return;
        }
        self.publish_count();

        let Some(client) = self.clients.get_mut(conn_id) else {
            return;
        };
        client.cancel_handshake_timer();
        let you = client.view();
        let others = self
            .clients
            .joined()
            .filter(|c| c.conn_id != conn_id)
            .map(ClientContext::view)
            .collect();

        if let Some(client) = self.clients.get(conn_id) {
            client.send(&ServerMessage::AuthOk {
                session_id: session_id.clone(),
            });
            client.send(&ServerMessage::Joined {
                you: you.clone(),
                others,
            });
        }
        self.broadcast(&ServerMessage::Event(PlazaEvent::Join(you)), Some(conn_id));
    }

    fn handle_chat(&mut self, conn_id: ConnId, text: &str) {
        let text = trim_and_cap(text, MAX_CHAT_CHARS);
        if text.is_empty() {
            return;
        }
        if !self.allow(conn_id, ActionClass::Chat) {
            return;
        }

        let sanitized = self.sanitizer.sanitize(&text);
        if sanitized.clean.is_empty() {
            return;
        }
        let Some(client) = self.clients.get(conn_id) else {
            return;
        };

        let event = PlazaEvent::Chat {
            id: client.session_id.clone(),
            name: client.name.clone(),
            text: sanitized.clean,
            flagged: sanitized.flagged,
        };
        self.broadcast(&ServerMessage::Event(event), None);
    }

    fn handle_emote(&mut self, conn_id: ConnId, emote: &str) {
        let emote = trim_and_cap(emote, MAX_EMOTE_CHARS);
        if emote.is_empty() || !self.allow(conn_id, ActionClass::Emote) {
            return;
        }
        let Some(client) = self.clients.get(conn_id) else {
            return;
        };

        let event = PlazaEvent::Emote {
            id: client.session_id.clone(),
            emote,
        };
        self.broadcast(&ServerMessage::Event(event), None);
    }

    /// Applies the per-class rate limit, notifying only the acting client
    /// when the action is refused.
    fn allow(&mut self, conn_id: ConnId, action: ActionClass) -> bool {
        let (window, limit) = match self.clients.get_mut(conn_id) {
            Some(client) => match action {
                ActionClass::Chat => (&mut client.chat_window, self.config.chat_limit),
                ActionClass::Emote => (&mut client.emote_window, self.config.emote_limit),
            },
            None => return false,
        };
        if window.check_and_record(&limit) {
            return true;
        }

        debug!("Client {} rate limited on {}", conn_id, action.as_str());
        if let Some(client) = self.clients.get(conn_id) {
            client.send(&ServerMessage::Event(PlazaEvent::System {
                code: "rate_limited".to_string(),
                action: Some(action.as_str().to_string()),
                message: format!("Slow down: too many {} messages.", action.as_str()),
            }));
        }
        false
    }

    /// Sends `message` to every Joined client except `exclude`.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<ConnId>) {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        for client in self.clients.joined() {
            if Some(client.conn_id) != exclude {
                client.outbound.send_text(text.clone());
            }
        }
    }

    /// Server-initiated close: notify the client, then clean up at once.
    pub fn close(&mut self, conn_id: ConnId, reason: CloseReason) {
        if let Some(client) = self.cleanup(conn_id) {
            info!("Closing client {}: {}", conn_id, reason.as_str());
            client.outbound.close(reason);
        }
    }

    /// Removes a connection from every registry. Idempotent.
    ///
    /// If it had joined, the player count is republished and the remaining
    /// clients receive a `leave` event.
    fn cleanup(&mut self, conn_id: ConnId) -> Option<ClientContext> {
        let mut client = self.clients.remove(conn_id)?;
        client.cancel_handshake_timer();

        let was_joined = client.is_joined();
        client.state = ConnectionState::Closed;
        if was_joined {
            self.publish_count();
            self.broadcast(
                &ServerMessage::Event(PlazaEvent::Leave {
                    id: client.session_id.clone(),
                }),
                None,
            );
        }
        Some(client)
    }

    /// Runs one movement tick.
    pub fn tick(&mut self, elapsed: Duration) {
        game::step(&mut self.clients, elapsed);
    }

    pub fn broadcast_snapshot(&self) -> usize {
        game::broadcast_snapshot(&self.clients)
    }

    /// Closes every connection with `server_shutdown` and empties the registry.
    pub fn shutdown(&mut self) -> usize {
        let clients = self.clients.drain();
        let closed = clients.len();
        for mut client in clients {
            client.cancel_handshake_timer();
            client.state = ConnectionState::Closed;
            client.outbound.close(CloseReason::ServerShutdown);
        }
        self.publish_count();
        closed
    }

    fn publish_count(&self) {
        // send_replace never fails, even with no receivers
        self.player_count.send_replace(self.clients.joined_count());
    }
}
