use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use orbitshield_common::{AlertEntry, ObjectClass, ObjectEntry, RiskClass, StreamMessage};

/// A catalog record: one satellite or debris object and its element set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub class: ObjectClass,
    #[serde(default)]
    pub tle_line1: Option<String>,
    #[serde(default)]
    pub tle_line2: Option<String>,
    /// Nominal physical size
    #[serde(default)]
    pub size: Option<f64>,
}

impl TrackedObject {
    /// Both element lines, if the record has a complete set
    pub fn element_set(&self) -> Option<(&str, &str)> {
        match (&self.tle_line1, &self.tle_line2) {
            (Some(l1), Some(l2)) => Some((l1.as_str(), l2.as_str())),
            _ => None,
        }
    }
}

/// Position (km) and velocity (km/s) of one object at one epoch, TEME frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub object_id: i64,
    pub class: ObjectClass,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub epoch: DateTime<Utc>,
}

/// A satellite and a debris object closer than the screening threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    pub satellite: StateVector,
    pub debris: StateVector,
    pub distance_km: f64,
    pub relative_speed_km_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    /// 0..=100
    pub score: u8,
    pub class: RiskClass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alert {
    pub pair: CandidatePair,
    pub assessment: RiskAssessment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub name: String,
    pub state: StateVector,
}

/// Everything computed in one tick. All states share `timestamp` as epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSnapshot {
    pub timestamp: DateTime<Utc>,
    pub objects: Vec<ObjectState>,
    pub alerts: Vec<Alert>,
}

impl CycleSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            objects: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Wire form pushed to stream subscribers
    pub fn to_message(&self) -> StreamMessage {
        let objects = self
            .objects
            .iter()
            .map(|obj| {
                let [x, y, z] = obj.state.position;
                let [vx, vy, vz] = obj.state.velocity;
                ObjectEntry {
                    id: obj.state.object_id,
                    name: obj.name.clone(),
                    class: obj.state.class,
                    x,
                    y,
                    z,
                    vx,
                    vy,
                    vz,
                }
            })
            .collect();

        let alerts = self
            .alerts
            .iter()
            .map(|alert| AlertEntry {
                sat_id: alert.pair.satellite.object_id,
                debris_id: alert.pair.debris.object_id,
                distance: alert.pair.distance_km,
                speed: alert.pair.relative_speed_km_s,
                risk_score: alert.assessment.score,
                risk_class: alert.assessment.class,
            })
            .collect();

        StreamMessage {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            objects,
            alerts,
        }
    }
}
