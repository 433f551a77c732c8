//! Mass, reach and motion arithmetic used to validate gameplay claims.
//!
//! Mass is the area of a player's or spore's circle. Growth adds the mass of
//! whatever was consumed and converts back to a radius.

use shared::CONSUME_MASS_RATIO;
use std::f64::consts::PI;

///Returns the mass of a circle with the given radius.
pub fn mass(radius: f64) -> f64 {
    PI * radius * radius
}

///Returns the radius of a circle with the given mass.
pub fn radius(mass: f64) -> f64 {
    (mass / PI).sqrt()
}

///Returns the radius after absorbing `gained_mass`.
pub fn grown_radius(current_radius: f64, gained_mass: f64) -> f64 {
    radius(mass(current_radius) + gained_mass)
}

/// Whether a player at (`x`, `y`) is close enough to touch an object.
///
/// Compares squared distances; a claim exactly on the threshold is accepted.
pub fn within_reach(
    x: f64,
    y: f64,
    player_radius: f64,
    object_x: f64,
    object_y: f64,
    object_radius: f64,
    buffer: f64,
) -> bool {
    distance_sq(x, y, object_x, object_y) <= reach_sq(player_radius, object_radius, buffer)
}

pub fn distance_sq(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x1 - x2;
    let dy = y1 - y2;
    dx * dx + dy * dy
}

pub fn reach_sq(player_radius: f64, object_radius: f64, buffer: f64) -> f64 {
    let threshold = player_radius + buffer + object_radius;
    threshold * threshold
}

/// Whether an attacker of `attacker_radius` outweighs its victim by strictly
/// more than [`CONSUME_MASS_RATIO`].
pub fn outweighs(attacker_radius: f64, victim_radius: f64) -> bool {
    outweighs_mass(mass(attacker_radius), mass(victim_radius))
}

pub fn outweighs_mass(attacker_mass: f64, victim_mass: f64) -> bool {
    attacker_mass > victim_mass * CONSUME_MASS_RATIO
}

///Advances a position along `direction` (radians) for `dt` seconds.
pub fn integrate(x: f64, y: f64, speed: f64, direction: f64, dt: f64) -> (f64, f64) {
    (
        x + speed * direction.cos() * dt,
        y + speed * direction.sin() * dt,
    )
}
