//! Wire types shared between the OrbitShield backend and its stream clients.

pub mod types;

pub use types::{
    AlertEntry, ObjectClass, ObjectEntry, RiskClass, RiskScoreRequest, RiskScoreResponse,
    StreamMessage, TokenResponse,
};
