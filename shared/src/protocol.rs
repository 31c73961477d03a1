//! JSON wire protocol spoken over the plaza WebSocket.
//!
//! Every frame is a single JSON object whose `type` field selects the
//! message. Inbound frames decode into the closed [`ClientMessage`] set;
//! anything else fails to decode and is dropped by the server.

use crate::Vector2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque cosmetic selections, passed through untouched.
pub type Cosmetics = Map<String, Value>;

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locale: Option<String>,
    },
    Auth {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    SelectAvatar {
        #[serde(
            rename = "characterId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        character_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cosmetics: Option<Cosmetics>,
    },
    Input {
        seq: u64,
        ts: f64,
        axes: Vector2,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emote: Option<String>,
    },
    Chat {
        text: String,
    },
    Ping {
        ts: f64,
    },
}

impl ClientMessage {
    /// Decodes one text frame. Malformed JSON, unknown `type` values and
    /// missing required fields all yield `None`.
    pub fn parse(text: &str) -> Option<ClientMessage> {
        serde_json::from_str(text).ok()
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Full description of a player, sent on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    #[serde(rename = "characterId")]
    pub character_id: String,
    #[serde(default)]
    pub cosmetics: Cosmetics,
    pub pos: Vector2,
    pub rot: f32,
}

/// Per-player entry of a `state` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub pos: Vector2,
    pub rot: f32,
}

/// Discrete social events, carried as `{"type":"event","event":..,"data":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PlazaEvent {
    Join(PlayerView),
    Leave {
        id: String,
    },
    Chat {
        id: String,
        name: String,
        text: String,
        flagged: bool,
    },
    Emote {
        id: String,
        emote: String,
    },
    System {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        message: String,
    },
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        motd: String,
        #[serde(rename = "instanceId")]
        instance_id: String,
        /// Snapshot cadence in milliseconds.
        #[serde(rename = "snapshotInterval")]
        snapshot_interval: u64,
    },
    AuthOk {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    AuthError {
        reason: String,
    },
    Kick {
        reason: String,
    },
    Joined {
        you: PlayerView,
        others: Vec<PlayerView>,
    },
    State {
        t: u64,
        #[serde(rename = "seqAck")]
        seq_ack: u64,
        players: Vec<PlayerSnapshot>,
    },
    Event(PlazaEvent),
    Pong {
        ts: f64,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Option<ServerMessage> {
        serde_json::from_str(text).ok()
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input_message() {
        let text = r#"{"type":"input","seq":7,"ts":1234.5,"axes":{"x":1,"y":-0.5},"emote":"wave"}"#;

        match ClientMessage::parse(text) {
            Some(ClientMessage::Input {
                seq,
                ts,
                axes,
                emote,
            }) => {
                assert_eq!(seq, 7);
                assert_eq!(ts, 1234.5);
                assert_eq!(axes, Vector2::new(1.0, -0.5));
                assert_eq!(emote.as_deref(), Some("wave"));
            }
            other => panic!("Unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_optional_fields_default_to_none() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"hello"}"#),
            Some(ClientMessage::Hello {
                build: None,
                device: None,
                locale: None,
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"auth"}"#),
            Some(ClientMessage::Auth { token: None })
        );
    }

    #[test]
    fn test_parse_select_avatar_uses_camel_case() {
        let text = r#"{"type":"select_avatar","characterId":"char-9","cosmetics":{"hat":"red"}}"#;

        match ClientMessage::parse(text) {
            Some(ClientMessage::SelectAvatar {
                character_id,
                cosmetics,
            }) => {
                assert_eq!(character_id.as_deref(), Some("char-9"));
                assert_eq!(cosmetics.unwrap().get("hat"), Some(&json!("red")));
            }
            other => panic!("Unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(ClientMessage::parse(r#"{"type":"teleport","x":5}"#).is_none());
        assert!(ClientMessage::parse(r#"{"text":"no type"}"#).is_none());
        assert!(ClientMessage::parse(r#"{"type":"input","seq":-1,"ts":0,"axes":{"x":0,"y":0}}"#).is_none());
        assert!(ClientMessage::parse(r#"{"type":"chat"}"#).is_none());
        assert!(ClientMessage::parse("not json").is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let message = ServerMessage::Event(PlazaEvent::Chat {
            id: "s1".to_string(),
            name: "alice".to_string(),
            text: "hi".to_string(),
            flagged: false,
        });

        let value: Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "event",
                "event": "chat",
                "data": {"id": "s1", "name": "alice", "text": "hi", "flagged": false}
            })
        );

        assert_eq!(ServerMessage::parse(&message.to_text().unwrap()), Some(message));
    }

    #[test]
    fn test_state_wire_shape() {
        let message = ServerMessage::State {
            t: 99,
            seq_ack: 4,
            players: vec![PlayerSnapshot {
                id: "s1".to_string(),
                pos: Vector2::new(1.0, 2.0),
                rot: 0.5,
            }],
        };

        let value: Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["seqAck"], 4);
        assert_eq!(value["players"][0]["pos"], json!({"x": 1.0, "y": 2.0}));
    }

    #[test]
    fn test_welcome_wire_shape() {
        let message = ServerMessage::Welcome {
            motd: "hello".to_string(),
            instance_id: "abc".to_string(),
            snapshot_interval: 100,
        };

        let value: Value = serde_json::from_str(&message.to_text().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "welcome", "motd": "hello", "instanceId": "abc", "snapshotInterval": 100})
        );
    }
}
