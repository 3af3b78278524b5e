//! SGP4 propagation of two-line element sets
//!
//! Positions are in km and velocities in km/s, TEME frame. The requested
//! instant is split into Julian day and day fraction before differencing
//! against the element epoch, so sub-second resolution survives for element
//! sets that are several days old.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

use crate::model::{StateVector, TrackedObject};

const MINUTES_PER_DAY: f64 = 1440.0;
const SECONDS_PER_DAY: f64 = 86400.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropagationError {
    #[error("object has no element set")]
    MissingElements,

    #[error("malformed element set: {0}")]
    Malformed(String),

    #[error("propagation diverged: {0}")]
    Diverged(String),
}

/// Produces state vectors for catalog objects at a given instant
pub trait StatePropagator: Send + Sync {
    fn propagate(
        &self,
        object: &TrackedObject,
        at: DateTime<Utc>,
    ) -> Result<StateVector, PropagationError>;
}

/// Stateless SGP4 propagator
#[derive(Debug, Clone, Copy, Default)]
pub struct Sgp4Propagator;

impl StatePropagator for Sgp4Propagator {
    fn propagate(
        &self,
        object: &TrackedObject,
        at: DateTime<Utc>,
    ) -> Result<StateVector, PropagationError> {
        let (line1, line2) = object
            .element_set()
            .ok_or(PropagationError::MissingElements)?;
        let (position, velocity) = propagate_elements(&object.name, line1, line2, at)?;

        Ok(StateVector {
            object_id: object.id,
            class: object.class,
            position,
            velocity,
            epoch: at,
        })
    }
}

/// Parse a two-line element set
pub fn parse_elements(
    name: &str,
    line1: &str,
    line2: &str,
) -> Result<sgp4::Elements, PropagationError> {
    sgp4::Elements::from_tle(
        Some(name.to_string()),
        line1.trim_end().as_bytes(),
        line2.trim_end().as_bytes(),
    )
    .map_err(|e| PropagationError::Malformed(e.to_string()))
}

/// Propagate one element set to `at`, returning `(position_km, velocity_km_s)`
pub fn propagate_elements(
    name: &str,
    line1: &str,
    line2: &str,
    at: DateTime<Utc>,
) -> Result<([f64; 3], [f64; 3]), PropagationError> {
    let elements = parse_elements(name, line1, line2)?;
    let constants = sgp4::Constants::from_elements(&elements)
        .map_err(|e| PropagationError::Malformed(e.to_string()))?;

    let minutes = minutes_since_epoch(&elements.datetime, &at.naive_utc());
    let prediction = constants
        .propagate(sgp4::MinutesSinceEpoch(minutes))
        .map_err(|e| PropagationError::Diverged(e.to_string()))?;

    let finite = prediction
        .position
        .iter()
        .chain(prediction.velocity.iter())
        .all(|v| v.is_finite());
    if !finite {
        return Err(PropagationError::Diverged(
            "non-finite state vector".to_string(),
        ));
    }

    Ok((prediction.position, prediction.velocity))
}

/// Julian day (at 0h) and fraction of day for a UTC datetime
pub fn julian_day_split(datetime: &NaiveDateTime) -> (f64, f64) {
    let year = datetime.year() as f64;
    let month = datetime.month() as f64;
    let day = datetime.day() as f64;

    let jd = 367.0 * year - (7.0 * (year + ((month + 9.0) / 12.0).floor()) * 0.25).floor()
        + (275.0 * month / 9.0).floor()
        + day
        + 1_721_013.5;

    let seconds = datetime.num_seconds_from_midnight() as f64
        + datetime.nanosecond() as f64 * 1e-9;

    (jd, seconds / SECONDS_PER_DAY)
}

/// Minutes elapsed from `epoch` to `at`
pub fn minutes_since_epoch(epoch: &NaiveDateTime, at: &NaiveDateTime) -> f64 {
    let (jd_epoch, fr_epoch) = julian_day_split(epoch);
    let (jd_at, fr_at) = julian_day_split(at);
    ((jd_at - jd_epoch) + (fr_at - fr_epoch)) * MINUTES_PER_DAY
}
