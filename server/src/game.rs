use crate::physics;
use crate::registry::SharedRegistry;
use log::{error, info};
use parking_lot::Mutex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use shared::{Msg, PlayerMessage, PLAYER_SPEED, PLAYER_START_RADIUS, WORLD_SIZE};
use std::sync::Arc;

/// Attempts made to find a free spot before settling for an overlapping one.
const SPAWN_ATTEMPTS: usize = 25;
const MIN_SPORE_RADIUS: f64 = 5.0;
const SPORE_RADIUS_MEAN: f64 = 10.0;
const SPORE_RADIUS_STD_DEV: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    /// Heading in radians
    pub direction: f64,
    pub speed: f64,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            x: 0.0,
            y: 0.0,
            radius: PLAYER_START_RADIUS,
            direction: 0.0,
            speed: PLAYER_SPEED,
        }
    }

    pub fn mass(&self) -> f64 {
        physics::mass(self.radius)
    }

    pub fn to_message(&self, id: u64) -> Msg {
        Msg::Player(PlayerMessage {
            id,
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            radius: self.radius,
            direction: self.direction,
            speed: self.speed,
        })
    }
}

/// A player shared between its owning session's state, its motion task and
/// the player registry.
pub type SharedPlayer = Arc<Mutex<Player>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spore {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Spore {
    pub fn to_message(&self, id: u64) -> Msg {
        Msg::spore(id, self.x, self.y, self.radius)
    }
}

/// Live game entities visible to every session.
///
/// Players are keyed by the id of the session that owns them; spores by
/// their own auto-incrementing id.
pub struct World {
    pub players: SharedRegistry<SharedPlayer>,
    pub spores: SharedRegistry<Spore>,
}

impl World {
    pub fn new() -> Self {
        Self {
            players: SharedRegistry::new(),
            spores: SharedRegistry::new(),
        }
    }

    /// Fills the spore registry with `count` randomly placed spores.
    pub fn seed_spores(&self, count: usize) {
        let sizes = match Normal::new(SPORE_RADIUS_MEAN, SPORE_RADIUS_STD_DEV) {
            Ok(sizes) => sizes,
            Err(e) => {
                error!("Invalid spore size distribution: {}", e);
                return;
            }
        };

        let mut rng = rand::thread_rng();
        for _ in 0..count {
            let radius = spore_radius(&mut rng, &sizes);
            let (x, y) = random_point(&mut rng, radius);
            self.spores.add(Spore { x, y, radius });
        }
        info!("Placed {} spores", count);
    }

    /// Picks a spawn point for a circle of `radius` that avoids live players.
    pub fn spawn_position(&self, radius: f64) -> (f64, f64) {
        let occupied: Vec<(f64, f64, f64)> = self
            .players
            .snapshot()
            .into_iter()
            .map(|(_, player)| {
                let player = player.lock();
                (player.x, player.y, player.radius)
            })
            .collect();

        spawn_position(&mut rand::thread_rng(), radius, &occupied)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples up to [`SPAWN_ATTEMPTS`] points and returns the first whose circle
/// overlaps none of `occupied` (x, y, radius). Falls back to the last sample.
pub fn spawn_position<R: Rng>(rng: &mut R, radius: f64, occupied: &[(f64, f64, f64)]) -> (f64, f64) {
    let mut candidate = random_point(rng, radius);
    for _ in 1..SPAWN_ATTEMPTS {
        if is_free(candidate, radius, occupied) {
            return candidate;
        }
        candidate = random_point(rng, radius);
    }
    candidate
}

/// Draws a spore radius, never smaller than the minimum
fn spore_radius<R: Rng>(rng: &mut R, sizes: &Normal<f64>) -> f64 {
    sizes.sample(rng).max(MIN_SPORE_RADIUS)
}

fn is_free(point: (f64, f64), radius: f64, occupied: &[(f64, f64, f64)]) -> bool {
    occupied.iter().all(|&(x, y, other_radius)| {
        let min_gap = radius + other_radius;
        physics::distance_sq(point.0, point.1, x, y) > min_gap * min_gap
    })
}

fn random_point<R: Rng>(rng: &mut R, radius: f64) -> (f64, f64) {
    let margin = radius.min(WORLD_SIZE / 2.0);
    (
        rng.gen_range(margin..=WORLD_SIZE - margin),
        rng.gen_range(margin..=WORLD_SIZE - margin),
    )
}
