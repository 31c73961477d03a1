//! Per-connection client state and the connection registry.
//!
//! This module owns:
//! - [`ClientContext`], the mutable state of one accepted connection
//! - [`Outbound`], the fire-and-forget frame channel to its socket writer
//! - [`ClientManager`], the two registries (by connection id, and Joined
//!   contexts by session id) plus capacity accounting
//!
//! Everything here is mutated only from the plaza loop task, so nothing is
//! locked.

use crate::error::CloseReason;
use crate::game::spawn_position;
use crate::ratelimit::SlidingWindow;
use crate::session::ConnectionState;
use crate::utils::{display_name, trim_and_cap};
use log::{debug, error, info};
use plaza_shared::protocol::Cosmetics;
use plaza_shared::{PlayerSnapshot, PlayerView, ServerMessage, SessionClaims, Vector2};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Server-assigned connection identifier. Never reused within a process.
pub type ConnId = u64;

/// Character used when the claims own nothing.
pub const FALLBACK_CHARACTER: &str = "default";

const MAX_METADATA_LEN: usize = 64;
const MAX_CHARACTER_ID_LEN: usize = 64;

/// Sending half of a connection's outbound frame queue.
///
/// Sends never block and failures are swallowed: a closed queue means the
/// socket is already gone and cleanup will follow.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbound {
    /// Wraps the sending half of a writer task's queue.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Creates a queue, returning the sender and the receiver the socket
    /// writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Encodes and queues one message.
    ///
    /// Encoding failures are logged and the message is dropped; the
    /// connection stays open.
    pub fn send(&self, message: &ServerMessage) {
        match message.to_text() {
            Ok(text) => self.send_text(text),
            Err(e) => error!("Failed to encode outbound message: {}", e),
        }
    }

    /// Queues pre-encoded text, so a broadcast encodes once for everyone.
    pub fn send_text(&self, text: String) {
        let _ = self.tx.send(Message::Text(text));
    }

    /// Sends the reason frame (`auth_error` or `kick`) followed by a close frame.
    pub fn close(&self, reason: CloseReason) {
        let notice = if reason.is_auth_failure() {
            ServerMessage::AuthError {
                reason: reason.as_str().to_string(),
            }
        } else {
            ServerMessage::Kick {
                reason: reason.as_str().to_string(),
            }
        };
        self.send(&notice);
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: reason.close_code(),
            reason: reason.as_str().into(),
        })));
    }
}

/// Client-reported metadata from `hello`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub build: Option<String>,
    pub device: Option<String>,
    pub locale: Option<String>,
}

impl HandshakeInfo {
    pub fn new(build: Option<String>, device: Option<String>, locale: Option<String>) -> Self {
        let cap = |v: Option<String>| {
            v.map(|s| trim_and_cap(&s, MAX_METADATA_LEN))
                .filter(|s| !s.is_empty())
        };
        Self {
            build: cap(build),
            device: cap(device),
            locale: cap(locale),
        }
    }
}

/// State of one accepted connection.
#[derive(Debug)]
pub struct ClientContext {
    pub conn_id: ConnId,
    pub outbound: Outbound,
    pub state: ConnectionState,
    pub subject: String,
    pub session_id: String,
    pub name: String,
    pub character_id: String,
    pub position: Vector2,
    /// Heading in radians.
    pub rotation: f32,
    /// Movement input, each component in `[-1, 1]`.
    pub axes: Vector2,
    pub last_seq: u64,
    pub cosmetics: Cosmetics,
    pub claims: SessionClaims,
    pub handshake: HandshakeInfo,
    pub chat_window: SlidingWindow,
    pub emote_window: SlidingWindow,
    pub handshake_timer: Option<JoinHandle<()>>,
    pub created_at: Instant,
}

impl ClientContext {
    /// Creates a Handshaking context from verified claims.
    pub fn new(conn_id: ConnId, claims: SessionClaims, outbound: Outbound) -> Self {
        let character_id = claims
            .owned_ids()
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_CHARACTER.to_string());

        Self {
            conn_id,
            outbound,
            state: ConnectionState::Handshaking,
            subject: claims.sub.clone(),
            session_id: claims.sid.clone(),
            name: display_name(&claims.sub),
            character_id,
            position: spawn_position(),
            rotation: 0.0,
            axes: Vector2::ZERO,
            last_seq: 0,
            cosmetics: Cosmetics::new(),
            claims,
            handshake: HandshakeInfo::default(),
            chat_window: SlidingWindow::new(),
            emote_window: SlidingWindow::new(),
            handshake_timer: None,
            created_at: Instant::now(),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.state == ConnectionState::Joined
    }

    /// Queues a message on this connection's socket.
    pub fn send(&self, message: &ServerMessage) {
        self.outbound.send(message);
    }

    /// Aborts the pending handshake timer, if any.
    pub fn cancel_handshake_timer(&mut self) {
        if let Some(timer) = self.handshake_timer.take() {
            timer.abort();
        }
    }

    /// Applies an avatar selection.
    ///
    /// A character id must be one of the owned ids when the claims list any;
    /// otherwise any id is accepted. Cosmetics are replaced wholesale when
    /// present. Returns false if the character id was refused.
    pub fn select_avatar(
        &mut self,
        character_id: Option<String>,
        cosmetics: Option<Cosmetics>,
    ) -> bool {
        let mut accepted = true;

        if let Some(id) = character_id.map(|id| trim_and_cap(&id, MAX_CHARACTER_ID_LEN)) {
            let owned = self.claims.owned_ids();
            if id.is_empty() || (!owned.is_empty() && !owned.contains(&id)) {
                accepted = false;
            } else {
                self.character_id = id;
            }
        }

        if let Some(cosmetics) = cosmetics {
            self.cosmetics = cosmetics;
        }

        accepted
    }

    /// Replaces the claims with a refreshed token's claims.
    ///
    /// The current character must still be owned under the new claims;
    /// otherwise it falls back to the first owned id. An empty owned list
    /// keeps whatever was selected.
    pub fn refresh_claims(&mut self, claims: SessionClaims) {
        let owned = claims.owned_ids();
        if !owned.is_empty() && !owned.contains(&self.character_id) {
            debug!(
                "Client {} no longer owns {}, resetting avatar",
                self.conn_id, self.character_id
            );
            self.character_id = owned[0].clone();
        }
        self.claims = claims;
    }

    /// Records movement input. Axes are clamped, sequence numbers only grow.
    pub fn apply_input(&mut self, seq: u64, axes: Vector2) {
        self.axes = axes.clamp_axes();
        self.last_seq = self.last_seq.max(seq);
    }

    /// Full public description of this player, as sent in `joined` and
    /// `join` events.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.session_id.clone(),
            name: self.name.clone(),
            character_id: self.character_id.clone(),
            cosmetics: self.cosmetics.clone(),
            pos: self.position,
            rot: self.rotation,
        }
    }

    /// Position-only entry for a `state` snapshot.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.session_id.clone(),
            pos: self.position,
            rot: self.rotation,
        }
    }
}

/// Registry of every accepted connection plus the Joined index.
///
/// A context lives in `clients` from acceptance until close. It appears in
/// `joined` (keyed by session id) only between a successful join and close,
/// and a session id maps to at most one connection.
#[derive(Debug)]
pub struct ClientManager {
    clients: HashMap<ConnId, ClientContext>,
    joined: HashMap<String, ConnId>,
    /// Maximum number of concurrently Joined clients
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry admitting at most `max_clients` Joined
    /// clients. Pending connections do not count against the limit.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            joined: HashMap::new(),
            max_clients,
        }
    }

    /// Adds a freshly accepted context. Replaces nothing: ids are unique.
    pub fn insert(&mut self, context: ClientContext) {
        info!(
            "Client {} connected (session {})",
            context.conn_id, context.session_id
        );
        self.clients.insert(context.conn_id, context);
    }

    /// Looks up a connection, pending or Joined.
    pub fn get(&self, conn_id: ConnId) -> Option<&ClientContext> {
        self.clients.get(&conn_id)
    }

    /// Mutable lookup, pending or Joined.
    pub fn get_mut(&mut self, conn_id: ConnId) -> Option<&mut ClientContext> {
        self.clients.get_mut(&conn_id)
    }

    /// True when the Joined count has reached capacity.
    pub fn is_full(&self) -> bool {
        self.joined.len() >= self.max_clients
    }

    /// Connection currently Joined under `session_id`.
    pub fn joined_conn(&self, session_id: &str) -> Option<ConnId> {
        self.joined.get(session_id).copied()
    }

    /// Moves a Handshaking context into the Joined registry.
    ///
    /// Returns false, changing nothing, if the context is unknown, already
    /// Joined, or its session id is held by another connection.
    pub fn mark_joined(&mut self, conn_id: ConnId) -> bool {
        let Some(context) = self.clients.get_mut(&conn_id) else {
            return false;
        };
        if context.is_joined() || self.joined.contains_key(&context.session_id) {
            return false;
        }

        debug_assert!(context.state.can_transition(ConnectionState::Joined));
        context.state = ConnectionState::Joined;
        self.joined.insert(context.session_id.clone(), conn_id);
        info!(
            "Client {} joined as {} ({} online)",
            conn_id,
            context.session_id,
            self.joined.len()
        );
        true
    }

    /// Removes a context from both registries.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<ClientContext> {
        let context = self.clients.remove(&conn_id)?;
        if self.joined.get(&context.session_id) == Some(&conn_id) {
            self.joined.remove(&context.session_id);
        }
        info!("Client {} disconnected", conn_id);
        Some(context)
    }

    /// Empties both registries, returning every context.
    pub fn drain(&mut self) -> Vec<ClientContext> {
        self.joined.clear();
        self.clients.drain().map(|(_, context)| context).collect()
    }

    /// Number of Joined clients, the figure published as the player count.
    pub fn joined_count(&self) -> usize {
        self.joined.len()
    }

    /// Iterates Joined clients in no particular order.
    pub fn joined(&self) -> impl Iterator<Item = &ClientContext> {
        self.clients.values().filter(|c| c.is_joined())
    }

    /// Mutable iteration over Joined clients, used by the movement tick.
    pub fn joined_mut(&mut self) -> impl Iterator<Item = &mut ClientContext> {
        self.clients.values_mut().filter(|c| c.is_joined())
    }

    /// Number of accepted connections, pending or Joined.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// True when no connection is registered at all.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(sid: &str, owned: Option<Vec<&str>>) -> SessionClaims {
        SessionClaims {
            sub: format!("user-{}", sid),
            sid: sid.to_string(),
            exp: u64::MAX,
            nonce: "n".to_string(),
            scope: None,
            owned: owned.map(|ids| ids.into_iter().map(String::from).collect()),
        }
    }

    fn context(conn_id: ConnId, sid: &str) -> ClientContext {
        let (outbound, _rx) = Outbound::channel();
        ClientContext::new(conn_id, claims(sid, None), outbound)
    }

    #[test]
    fn test_context_creation() {
        let (outbound, _rx) = Outbound::channel();
        let ctx = ClientContext::new(7, claims("s1", Some(vec!["char-a", "char-b"])), outbound);

        assert_eq!(ctx.conn_id, 7);
        assert_eq!(ctx.session_id, "s1");
        assert_eq!(ctx.name, "user-s1");
        assert_eq!(ctx.character_id, "char-a");
        assert_eq!(ctx.state, ConnectionState::Handshaking);
        assert_eq!(ctx.last_seq, 0);
        assert!(ctx.position.in_world());
    }

    #[test]
    fn test_context_fallback_character() {
        let ctx = context(1, "s1");
        assert_eq!(ctx.character_id, FALLBACK_CHARACTER);
    }

    #[test]
    fn test_select_avatar_respects_owned_list() {
        let (outbound, _rx) = Outbound::channel();
        let mut ctx = ClientContext::new(1, claims("s1", Some(vec!["char-a", "char-b"])), outbound);

        assert!(ctx.select_avatar(Some("char-b".to_string()), None));
        assert_eq!(ctx.character_id, "char-b");

        assert!(!ctx.select_avatar(Some("char-z".to_string()), None));
        assert_eq!(ctx.character_id, "char-b");
    }

    #[test]
    fn test_select_avatar_without_owned_list_accepts_anything() {
        let mut ctx = context(1, "s1");
        let mut cosmetics = Cosmetics::new();
        cosmetics.insert("hat".to_string(), json!("crown"));

        assert!(ctx.select_avatar(Some("anything".to_string()), Some(cosmetics.clone())));
        assert_eq!(ctx.character_id, "anything");
        assert_eq!(ctx.cosmetics, cosmetics);
    }

    #[test]
    fn test_refresh_claims_revalidates_character() {
        let (outbound, _rx) = Outbound::channel();
        let mut ctx = ClientContext::new(1, claims("s1", Some(vec!["char-a", "char-b"])), outbound);
        assert!(ctx.select_avatar(Some("char-b".to_string()), None));

        ctx.refresh_claims(claims("s1", Some(vec!["char-a", "char-b", "char-c"])));
        assert_eq!(ctx.character_id, "char-b");

        ctx.refresh_claims(claims("s1", Some(vec!["char-c"])));
        assert_eq!(ctx.character_id, "char-c");
        assert_eq!(ctx.claims.owned_ids(), vec!["char-c".to_string()]);

        ctx.refresh_claims(claims("s1", None));
        assert_eq!(ctx.character_id, "char-c");
    }

    #[test]
    fn test_apply_input_clamps_and_keeps_highest_seq() {
        let mut ctx = context(1, "s1");

        ctx.apply_input(5, Vector2::new(4.0, -0.5));
        assert_eq!(ctx.axes, Vector2::new(1.0, -0.5));
        assert_eq!(ctx.last_seq, 5);

        ctx.apply_input(3, Vector2::new(0.0, 0.0));
        assert_eq!(ctx.last_seq, 5);
        assert_eq!(ctx.axes, Vector2::ZERO);
    }

    #[test]
    fn test_handshake_info_is_capped() {
        let info = HandshakeInfo::new(Some("x".repeat(200)), Some("  ".to_string()), None);
        assert_eq!(info.build.unwrap().len(), MAX_METADATA_LEN);
        assert_eq!(info.device, None);
        assert_eq!(info.locale, None);
    }

    #[test]
    fn test_outbound_close_sends_reason_then_close_frame() {
        let (outbound, mut rx) = Outbound::channel();
        outbound.close(CloseReason::InsufficientScope);

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(
                ServerMessage::parse(&text),
                Some(ServerMessage::AuthError {
                    reason: "insufficient_scope".to_string()
                })
            ),
            other => panic!("Unexpected frame: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason, "insufficient_scope");
            }
            other => panic!("Unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_manager_join_and_capacity() {
        let mut manager = ClientManager::new(1);
        manager.insert(context(1, "s1"));
        manager.insert(context(2, "s2"));

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.joined_count(), 0);
        assert!(!manager.is_full());

        assert!(manager.mark_joined(1));
        assert_eq!(manager.joined_count(), 1);
        assert!(manager.is_full());
        assert_eq!(manager.joined_conn("s1"), Some(1));
    }

    #[test]
    fn test_mark_joined_is_exactly_once() {
        let mut manager = ClientManager::new(4);
        manager.insert(context(1, "s1"));

        assert!(manager.mark_joined(1));
        assert!(!manager.mark_joined(1));
        assert!(!manager.mark_joined(99));
        assert_eq!(manager.joined_count(), 1);
    }

    #[test]
    fn test_session_id_unique_among_joined() {
        let mut manager = ClientManager::new(4);
        manager.insert(context(1, "shared"));
        manager.insert(context(2, "shared"));

        assert!(manager.mark_joined(1));
        assert!(!manager.mark_joined(2));
        assert_eq!(manager.joined_conn("shared"), Some(1));

        manager.remove(1);
        assert!(manager.mark_joined(2));
        assert_eq!(manager.joined_conn("shared"), Some(2));
    }

    #[test]
    fn test_remove_pending_does_not_touch_joined_entry() {
        let mut manager = ClientManager::new(4);
        manager.insert(context(1, "shared"));
        manager.insert(context(2, "shared"));
        manager.mark_joined(1);

        let removed = manager.remove(2).unwrap();
        assert_eq!(removed.state, ConnectionState::Handshaking);
        assert_eq!(manager.joined_conn("shared"), Some(1));
        assert!(manager.remove(2).is_none());
    }

    #[test]
    fn test_drain_clears_everything() {
        let mut manager = ClientManager::new(4);
        manager.insert(context(1, "s1"));
        manager.insert(context(2, "s2"));
        manager.mark_joined(1);

        assert_eq!(manager.drain().len(), 2);
        assert!(manager.is_empty());
        assert_eq!(manager.joined_count(), 0);
        assert_eq!(manager.joined().count(), 0);
    }
}
