//! Movement simulation and position snapshots.
//!
//! The simulation integrates each Joined client's input axes on a fixed
//! tick. Snapshots are produced on their own, slower cadence by the plaza
//! loop, so simulation fidelity does not depend on broadcast bandwidth.
//! Nothing in here touches the network.

use crate::client_manager::{ClientContext, ClientManager};
use crate::utils::get_timestamp;
use log::error;
use plaza_shared::{PlayerSnapshot, ServerMessage, Vector2, PLAYER_SPEED};
use rand::Rng;
use std::f32::consts::TAU;
use std::time::Duration;

/// Upper bound on the elapsed time a single tick integrates.
pub const MAX_TICK_ELAPSED: Duration = Duration::from_millis(100);

/// New players appear within this distance of the origin.
pub const SPAWN_RADIUS: f32 = 2.0;

pub fn spawn_position() -> Vector2 {
    let mut rng = rand::thread_rng();
    let angle = rng.gen_range(0.0..TAU);
    let distance = rng.gen_range(0.0..SPAWN_RADIUS);
    Vector2::new(angle.cos() * distance, angle.sin() * distance).clamp_to_world()
}

/// Caps real elapsed time so a late tick cannot teleport players.
pub fn capped_elapsed(elapsed: Duration) -> Duration {
    elapsed.min(MAX_TICK_ELAPSED)
}

/// Advances one client by `dt` seconds.
///
/// Rotation follows the movement heading and is left alone when the client
/// did not move, including when pinned against the world edge.
pub fn integrate(client: &mut ClientContext, dt: f32) {
    let displacement = client.axes.scale(PLAYER_SPEED * dt);
    let next = client.position.add(&displacement).clamp_to_world();

    let dx = next.x - client.position.x;
    let dy = next.y - client.position.y;
    if dx != 0.0 || dy != 0.0 {
        client.rotation = dy.atan2(dx);
    }
    client.position = next;
}

/// Runs one movement tick over every Joined client.
pub fn step(clients: &mut ClientManager, elapsed: Duration) {
    let dt = capped_elapsed(elapsed).as_secs_f32();
    if dt <= 0.0 {
        return;
    }

    for client in clients.joined_mut() {
        integrate(client, dt);
    }
}

/// Positions of every Joined client.
pub fn snapshot(clients: &ClientManager) -> Vec<PlayerSnapshot> {
    clients.joined().map(ClientContext::snapshot).collect()
}

/// Sends a `state` message to every Joined client.
///
/// Each recipient gets its own `seqAck`. Returns the number of recipients.
pub fn broadcast_snapshot(clients: &ClientManager) -> usize {
    if clients.joined_count() == 0 {
        return 0;
    }

    let players = snapshot(clients);
    let t = get_timestamp();
    let mut sent = 0;

    for client in clients.joined() {
        let message = ServerMessage::State {
            t,
            seq_ack: client.last_seq,
            players: players.clone(),
        };
        // A failure to encode for one recipient must not starve the others
        match message.to_text() {
            Ok(text) => {
                client.outbound.send_text(text);
                sent += 1;
            }
            Err(e) => error!("Failed to encode snapshot for {}: {}", client.conn_id, e),
        }
    }

    sent
}
