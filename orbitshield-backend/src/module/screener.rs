//! Satellite/debris close-approach screening
//!
//! All-pairs comparison between the satellite and debris partitions. At the
//! catalog sizes this service handles a spatial index is not needed; callers
//! only depend on `screen` returning qualifying pairs in id order.

use orbitshield_common::ObjectClass;

use crate::model::{CandidatePair, StateVector};

fn norm(dx: f64, dy: f64, dz: f64) -> f64 {
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Euclidean separation in km. Symmetric bit-for-bit: each difference only
/// changes sign when the arguments swap, and squaring discards the sign.
pub fn distance(a: &StateVector, b: &StateVector) -> f64 {
    norm(
        a.position[0] - b.position[0],
        a.position[1] - b.position[1],
        a.position[2] - b.position[2],
    )
}

/// Magnitude of the relative velocity in km/s
pub fn relative_speed(a: &StateVector, b: &StateVector) -> f64 {
    norm(
        a.velocity[0] - b.velocity[0],
        a.velocity[1] - b.velocity[1],
        a.velocity[2] - b.velocity[2],
    )
}

/// Every satellite/debris pair with separation strictly below `threshold_km`,
/// ordered by satellite id then debris id.
pub fn screen(states: &[StateVector], threshold_km: f64) -> Vec<CandidatePair> {
    let mut satellites: Vec<&StateVector> = states
        .iter()
        .filter(|s| s.class == ObjectClass::Satellite)
        .collect();
    let mut debris: Vec<&StateVector> = states
        .iter()
        .filter(|s| s.class == ObjectClass::Debris)
        .collect();

    satellites.sort_by_key(|s| s.object_id);
    debris.sort_by_key(|d| d.object_id);

    let mut pairs = Vec::new();
    for sat in &satellites {
        for deb in &debris {
            let distance_km = distance(sat, deb);
            if distance_km < threshold_km {
                pairs.push(CandidatePair {
                    satellite: **sat,
                    debris: **deb,
                    distance_km,
                    relative_speed_km_s: relative_speed(sat, deb),
                });
            }
        }
    }
    pairs
}
