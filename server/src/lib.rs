//! # Plaza Server Library
//!
//! This library provides the authoritative server for a shared, real-time
//! presence space ("the plaza"). Clients connect over WebSocket with a signed
//! session token, pick an avatar, move around with analog input, chat and
//! emote, and receive periodic position snapshots of everyone present.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Every connection presents an HMAC-signed token in its URL. The server
//! verifies it before anything else, enforces a capacity limit, and only
//! makes a client visible to others once it has completed the handshake
//! (`auth`) and holds the join scope.
//!
//! ### Authoritative Simulation
//! Positions are integrated on the server from each client's input axes at
//! a fixed tick, clamped to the world bounds. Clients only ever send intent.
//!
//! ### Broadcasting
//! Position snapshots go out on their own cadence, independent of the
//! simulation tick. Discrete events (join, leave, chat, emote) are pushed
//! to every Joined client as they happen.
//!
//! ## Architecture Design
//!
//! ### Single Plaza Loop
//! One task owns all connection state and processes socket events, the
//! movement tick and the snapshot tick sequentially via `tokio::select!`.
//! Socket reader/writer tasks only talk to it through channels, so no state
//! is shared behind locks.
//!
//! ### Fire-and-Forget Sends
//! Each connection has an unbounded outbound queue drained by its writer
//! task. A failed send never interrupts a broadcast to other clients.
//!
//! ## Module Organization
//!
//! - `client_manager`: per-connection context and the connection registries
//! - `session`: the lifecycle state machine and message handlers
//! - `game`: movement integration and snapshots
//! - `network`: WebSocket acceptance, socket tasks and the plaza loop
//! - `ratelimit`: sliding-window limits for chat and emotes
//! - `sanitize`: the chat text filter
//! - `config` / `error`: configuration and error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use plaza_server::config::ServerConfig;
//! use plaza_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ServerConfig::new("shared-signing-secret");
//!     config.port = 9000;
//!
//!     let server = Server::bind(config).await?;
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod ratelimit;
pub mod sanitize;
pub mod session;
pub mod utils;

pub use config::ServerConfig;
pub use error::{CloseReason, ServerError};
pub use network::Server;
