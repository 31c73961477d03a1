//! Types shared between the plaza server and its clients.
//!
//! Holds the world constants both sides agree on, the 2D vector used for
//! positions and input axes, the JSON wire protocol, and the signed session
//! token format.

pub mod protocol;
pub mod token;

use serde::{Deserialize, Serialize};

pub use protocol::{ClientMessage, PlayerSnapshot, PlayerView, PlazaEvent, ServerMessage};
pub use token::{SessionClaims, TokenError};

/// Movement speed in world units per second at full axis deflection.
pub const PLAYER_SPEED: f32 = 6.0;
/// The world is the square `[-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT]` on both axes.
pub const WORLD_HALF_EXTENT: f32 = 40.0;
/// Scope a session must carry (when it carries any scopes) to enter the plaza.
pub const JOIN_SCOPE: &str = "plaza:join";
/// Query parameter carrying the session token on the connection URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// A vector in the plaza's 2D ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    /// Clamps each component into `[-1, 1]`. Non-finite components become zero.
    pub fn clamp_axes(&self) -> Vector2 {
        fn axis(v: f32) -> f32 {
            if v.is_finite() {
                v.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        }
        Vector2 {
            x: axis(self.x),
            y: axis(self.y),
        }
    }

    /// Clamps the point into the world rectangle.
    pub fn clamp_to_world(&self) -> Vector2 {
        Vector2 {
            x: self.x.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT),
            y: self.y.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT),
        }
    }

    /// True if the point lies inside the world rectangle, edges included.
    pub fn in_world(&self) -> bool {
        self.x.abs() <= WORLD_HALF_EXTENT && self.y.abs() <= WORLD_HALF_EXTENT
    }
}
