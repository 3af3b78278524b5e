pub mod propagator;
pub mod registry;
pub mod risk;
pub mod scheduled;
pub mod screener;
pub mod token;

pub use propagator::{PropagationError, Sgp4Propagator, StatePropagator};
pub use registry::{DeliveryError, Frame, SnapshotSink, SubscriberId, SubscriberRegistry};
pub use risk::{RiskFeatures, RiskScorer, ScoringMode};
pub use scheduled::{CycleConfig, CycleScheduler, ScheduledTaskManager, SchedulerState};
pub use token::{AccessToken, InvalidTtl, MAX_TOKEN_TTL, TokenAuthority, TokenRejection};
