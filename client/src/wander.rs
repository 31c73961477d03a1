//! Input generator for bots: walks in a random heading for a while, pauses
//! now and then, and picks a new heading. Seeded, so runs are repeatable.

use plaza_shared::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

pub const EMOTES: [&str; 4] = ["wave", "dance", "cheer", "sit"];

#[derive(Debug)]
pub struct Wanderer {
    rng: StdRng,
    heading: Vector2,
    ticks_left: u32,
    /// Inclusive range of ticks a heading is held for.
    hold: (u32, u32),
    /// Chance per heading change to stand still instead.
    idle_chance: f64,
    emote_chance: f64,
}

impl Wanderer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            heading: Vector2::ZERO,
            ticks_left: 0,
            hold: (10, 40),
            idle_chance: 0.2,
            emote_chance: 0.01,
        }
    }

    pub fn with_hold(mut self, min_ticks: u32, max_ticks: u32) -> Self {
        self.hold = (min_ticks.max(1), max_ticks.max(min_ticks).max(1));
        self
    }

    pub fn with_emote_chance(mut self, chance: f64) -> Self {
        self.emote_chance = chance.clamp(0.0, 1.0);
        self
    }

    /// Axes for the next input message.
    pub fn next_axes(&mut self) -> Vector2 {
        if self.ticks_left == 0 {
            self.heading = if self.rng.gen_bool(self.idle_chance) {
                Vector2::ZERO
            } else {
                let angle = self.rng.gen_range(0.0..TAU);
                Vector2::new(angle.cos(), angle.sin()).clamp_axes()
            };
            self.ticks_left = self.rng.gen_range(self.hold.0..=self.hold.1);
        }

        self.ticks_left -= 1;
        self.heading
    }

    /// Occasionally returns an emote to attach to an input.
    pub fn next_emote(&mut self) -> Option<&'static str> {
        if self.rng.gen_bool(self.emote_chance) {
            Some(EMOTES[self.rng.gen_range(0..EMOTES.len())])
        } else {
            None
        }
    }
}
