use serde::{Deserialize, Serialize};

/// Class of a tracked object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectClass {
    #[serde(rename = "satellite")]
    Satellite,
    #[serde(rename = "debris")]
    Debris,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Satellite => "satellite",
            ObjectClass::Debris => "debris",
        }
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordinal collision risk class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskClass {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::Low => "LOW",
            RiskClass::Medium => "MEDIUM",
            RiskClass::High => "HIGH",
        }
    }
}

impl std::fmt::Display for RiskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One propagated object in a stream message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub class: ObjectClass,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

/// One close approach in a stream message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub sat_id: i64,
    pub debris_id: i64,
    /// Separation in km
    pub distance: f64,
    /// Relative speed in km/s
    pub speed: f64,
    pub risk_score: u8,
    pub risk_class: RiskClass,
}

/// Message pushed to every stream subscriber once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// RFC 3339 timestamp of the tick, UTC with `Z` suffix
    pub timestamp: String,
    pub objects: Vec<ObjectEntry>,
    pub alerts: Vec<AlertEntry>,
}

/// Response of the token issuance endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Expiry instant, milliseconds since the Unix epoch
    pub expiry: i64,
}

/// Ad hoc scoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreRequest {
    pub distance: f64,
    pub speed: f64,
    pub size_sat: f64,
    pub size_deb: f64,
    #[serde(default)]
    pub history: f64,
    #[serde(default)]
    pub tle_noise: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScoreResponse {
    pub risk_score: u8,
    pub risk_class: RiskClass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_class_wire_names() {
        let class: ObjectClass = serde_json::from_str("\"debris\"").unwrap();
        assert_eq!(class, ObjectClass::Debris);
        assert_eq!(ObjectClass::Satellite.to_string(), "satellite");
        assert!(serde_json::from_str::<ObjectClass>("\"rocket\"").is_err());
    }

    #[test]
    fn test_stream_message_field_names() {
        let msg = StreamMessage {
            timestamp: "2024-03-01T12:00:00.000000Z".to_string(),
            objects: vec![ObjectEntry {
                id: 7,
                name: "SAT-A".to_string(),
                class: ObjectClass::Satellite,
                x: 1.0,
                y: 2.0,
                z: 3.0,
                vx: 0.1,
                vy: 0.2,
                vz: 0.3,
            }],
            alerts: vec![AlertEntry {
                sat_id: 7,
                debris_id: 9,
                distance: 50.0,
                speed: 2.0,
                risk_score: 0,
                risk_class: RiskClass::Low,
            }],
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["objects"][0]["type"], "satellite");
        assert_eq!(value["objects"][0]["vz"], 0.3);
        assert_eq!(value["alerts"][0]["debris_id"], 9);
        assert_eq!(value["alerts"][0]["risk_class"], "LOW");
    }

    #[test]
    fn test_risk_request_defaults() {
        let req: RiskScoreRequest =
            serde_json::from_str(r#"{"distance":5,"speed":3,"size_sat":5,"size_deb":1}"#).unwrap();
        assert_eq!(req.history, 0.0);
        assert_eq!(req.tle_noise, 0.0);
    }
}
