//! Collision risk scoring
//!
//! Two strategies share one feature vector: a learned model loaded from a
//! JSON artifact, and a closed-form heuristic. The learned model is used while
//! it is available; the first failed invocation degrades the scorer to the
//! heuristic for the rest of the process lifetime.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use orbitshield_common::RiskClass;

use crate::model::RiskAssessment;

pub const FEATURE_COUNT: usize = 6;

const HIGH_CUTOFF: u8 = 70;
const MEDIUM_CUTOFF: u8 = 40;

/// Inputs of one assessment, in model feature order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskFeatures {
    pub distance_km: f64,
    pub relative_speed_km_s: f64,
    pub size_satellite: f64,
    pub size_debris: f64,
    pub history_factor: f64,
    pub noise_factor: f64,
}

impl RiskFeatures {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.distance_km,
            self.relative_speed_km_s,
            self.size_satellite,
            self.size_debris,
            self.history_factor,
            self.noise_factor,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model artifact: {0}")]
    Format(#[from] serde_json::Error),

    #[error("model produced an invalid probability: {0}")]
    InvalidOutput(f64),
}

/// A learned model mapping features to a collision probability in [0, 1]
pub trait RiskModel: Send + Sync {
    fn predict_probability(&self, features: &[f64; FEATURE_COUNT]) -> Result<f64, ModelError>;
}

/// Logistic regression exported from the training pipeline.
///
/// Features are standardised with `mean`/`scale` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: [f64; FEATURE_COUNT],
    pub intercept: f64,
    #[serde(default)]
    pub mean: Option<[f64; FEATURE_COUNT]>,
    #[serde(default)]
    pub scale: Option<[f64; FEATURE_COUNT]>,
}

impl LogisticModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl RiskModel for LogisticModel {
    fn predict_probability(&self, features: &[f64; FEATURE_COUNT]) -> Result<f64, ModelError> {
        let mut z = self.intercept;
        for (i, (x, w)) in features.iter().zip(self.weights.iter()).enumerate() {
            let mut x = *x;
            if let Some(mean) = &self.mean {
                x -= mean[i];
            }
            if let Some(scale) = &self.scale {
                x /= scale[i];
            }
            z += w * x;
        }

        let p = 1.0 / (1.0 + (-z).exp());
        if !p.is_finite() {
            return Err(ModelError::InvalidOutput(p));
        }
        Ok(p)
    }
}

/// Which strategy the scorer is currently using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    LearnedModel,
    Heuristic,
}

/// Risk class for a clamped score
pub fn classify(score: u8) -> RiskClass {
    if score > HIGH_CUTOFF {
        RiskClass::High
    } else if score > MEDIUM_CUTOFF {
        RiskClass::Medium
    } else {
        RiskClass::Low
    }
}

/// Truncate a raw score into 0..=100. Non-finite input scores 0.
fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0) as u8
}

/// `(20 - d)*3 + v*5 + size_debris*4 + history*2 + noise*10`, clamped.
///
/// Non-increasing in distance and non-decreasing in relative speed.
pub fn heuristic_score(features: &RiskFeatures) -> u8 {
    let raw = (20.0 - features.distance_km) * 3.0
        + features.relative_speed_km_s * 5.0
        + features.size_debris * 4.0
        + features.history_factor * 2.0
        + features.noise_factor * 10.0;
    clamp_score(raw)
}

pub struct RiskScorer {
    learned: Option<Box<dyn RiskModel>>,
    learned_available: AtomicBool,
}

impl RiskScorer {
    pub fn heuristic() -> Self {
        Self {
            learned: None,
            learned_available: AtomicBool::new(false),
        }
    }

    pub fn with_model(model: Box<dyn RiskModel>) -> Self {
        Self {
            learned: Some(model),
            learned_available: AtomicBool::new(true),
        }
    }

    /// Load the learned model artifact if configured; any failure selects the
    /// heuristic strategy.
    pub fn from_artifact(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No risk model configured, using heuristic scoring");
            return Self::heuristic();
        };

        match LogisticModel::load(path) {
            Ok(model) => {
                info!("Loaded risk model from {}", path.display());
                Self::with_model(Box::new(model))
            }
            Err(e) => {
                warn!(
                    "Risk model {} unavailable ({}), falling back to heuristic scoring",
                    path.display(),
                    e
                );
                Self::heuristic()
            }
        }
    }

    pub fn mode(&self) -> ScoringMode {
        if self.learned.is_some() && self.learned_available.load(Ordering::Relaxed) {
            ScoringMode::LearnedModel
        } else {
            ScoringMode::Heuristic
        }
    }

    /// Score one feature set. Never fails: learned-model errors degrade to
    /// the heuristic.
    pub fn score(&self, features: &RiskFeatures) -> RiskAssessment {
        let score = match self.learned_score(features) {
            Some(score) => score,
            None => heuristic_score(features),
        };
        RiskAssessment {
            score,
            class: classify(score),
        }
    }

    fn learned_score(&self, features: &RiskFeatures) -> Option<u8> {
        let model = self.learned.as_ref()?;
        if !self.learned_available.load(Ordering::Relaxed) {
            return None;
        }

        match model.predict_probability(&features.to_array()) {
            Ok(p) if (0.0..=1.0).contains(&p) => Some(clamp_score(p * 100.0)),
            Ok(p) => {
                self.degrade(&ModelError::InvalidOutput(p));
                None
            }
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    fn degrade(&self, error: &ModelError) {
        if self.learned_available.swap(false, Ordering::Relaxed) {
            warn!("Risk model failed ({}), switching to heuristic scoring", error);
        }
    }
}
