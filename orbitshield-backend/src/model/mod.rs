pub mod catalog;
pub mod types;

pub use catalog::{CatalogError, CatalogSource, JsonCatalog, MemoryCatalog, NewObject};
pub use types::{
    Alert, CandidatePair, CycleSnapshot, ObjectState, RiskAssessment, StateVector, TrackedObject,
};
