use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::module::token::MAX_TOKEN_TTL;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bounds accepted by `validate`
pub const MAX_CADENCE_SECS: f64 = 3600.0;
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Sleep between two stream ticks (seconds)
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: f64,

    /// Separation below which a satellite/debris pair becomes an alert (km)
    #[serde(default = "default_threshold_km")]
    pub threshold_km: f64,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Only accept stream connections declaring this origin
    #[serde(default)]
    pub allowed_origin: Option<String>,

    /// Learned risk model artifact (JSON)
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Outbound queue length per stream subscriber
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub risk: RiskConfig,
}

/// Feature defaults used when scoring screened pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_satellite_size")]
    pub default_satellite_size: f64,

    #[serde(default = "default_debris_size")]
    pub default_debris_size: f64,

    #[serde(default)]
    pub history_factor: f64,

    #[serde(default = "default_noise_factor")]
    pub noise_factor: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_cadence_secs() -> f64 {
    1.0
}

fn default_threshold_km() -> f64 {
    100.0
}

fn default_token_ttl_secs() -> u64 {
    600
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/catalog.json")
}

fn default_subscriber_queue() -> usize {
    16
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_satellite_size() -> f64 {
    5.0
}

fn default_debris_size() -> f64 {
    1.0
}

fn default_noise_factor() -> f64 {
    0.2
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_satellite_size: default_satellite_size(),
            default_debris_size: default_debris_size(),
            history_factor: 0.0,
            noise_factor: default_noise_factor(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            cadence_secs: default_cadence_secs(),
            threshold_km: default_threshold_km(),
            token_ttl_secs: default_token_ttl_secs(),
            allowed_origin: None,
            model_path: None,
            catalog_path: default_catalog_path(),
            subscriber_queue: default_subscriber_queue(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            risk: RiskConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: BackendConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Apply environment-level overrides on top of the file values.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a closure.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.parse().with_context(|| format!("Invalid PORT '{}'", port))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(cadence) = lookup("STREAM_CADENCE_SEC") {
            self.cadence_secs = cadence
                .parse()
                .with_context(|| format!("Invalid STREAM_CADENCE_SEC '{}'", cadence))?;
        }
        if let Some(threshold) = lookup("PROXIMITY_THRESHOLD_KM") {
            self.threshold_km = threshold
                .parse()
                .with_context(|| format!("Invalid PROXIMITY_THRESHOLD_KM '{}'", threshold))?;
        }
        if let Some(ttl) = lookup("TOKEN_TTL_SEC") {
            self.token_ttl_secs = ttl
                .parse()
                .with_context(|| format!("Invalid TOKEN_TTL_SEC '{}'", ttl))?;
        }
        if let Some(origin) = lookup("FRONTEND_URL") {
            self.allowed_origin = Some(origin).filter(|o| !o.is_empty());
        }
        if let Some(path) = lookup("AI_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Some(path) = lookup("CATALOG_PATH") {
            self.catalog_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.cadence_secs > 0.0 && self.cadence_secs <= MAX_CADENCE_SECS) {
            anyhow::bail!(
                "cadence_secs must be in (0, {}], got {}",
                MAX_CADENCE_SECS,
                self.cadence_secs
            );
        }
        if !(self.threshold_km.is_finite() && self.threshold_km > 0.0) {
            anyhow::bail!("threshold_km must be positive, got {}", self.threshold_km);
        }
        let max_ttl = MAX_TOKEN_TTL.as_secs();
        if !(1..=max_ttl).contains(&self.token_ttl_secs) {
            anyhow::bail!(
                "token_ttl_secs must be in [1, {}], got {}",
                max_ttl,
                self.token_ttl_secs
            );
        }
        if self.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
            anyhow::bail!(
                "shutdown_grace_secs must be at most {}, got {}",
                MAX_SHUTDOWN_GRACE_SECS,
                self.shutdown_grace_secs
            );
        }
        if self.subscriber_queue == 0 {
            anyhow::bail!("subscriber_queue must be at least 1");
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tick cadence, clamped to the range `validate` accepts
    pub fn cadence(&self) -> Duration {
        Duration::try_from_secs_f64(self.cadence_secs.min(MAX_CADENCE_SECS))
            .unwrap_or_else(|_| Duration::from_secs_f64(default_cadence_secs()))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs.min(MAX_SHUTDOWN_GRACE_SECS))
    }
}

pub static CONFIG: OnceLock<BackendConfig> = OnceLock::new();

/// Load `config.toml` (or `$ORBITSHIELD_CONFIG`), apply environment overrides
/// and store the result process-wide.
pub fn read_config() -> anyhow::Result<&'static BackendConfig> {
    let path = std::env::var("ORBITSHIELD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if Path::new(&path).exists() {
        BackendConfig::from_file(&path)?
    } else {
        BackendConfig::default()
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: BackendConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cadence_secs, 1.0);
        assert_eq!(config.threshold_km, 100.0);
        assert_eq!(config.token_ttl_secs, 600);
        assert!(config.allowed_origin.is_none());
        assert_eq!(config.risk.noise_factor, 0.2);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file() {
        let config: BackendConfig = toml::from_str(
            r#"
            threshold_km = 25.0
            allowed_origin = "https://orbit.example"

            [risk]
            default_debris_size = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.threshold_km, 25.0);
        assert_eq!(config.allowed_origin.as_deref(), Some("https://orbit.example"));
        assert_eq!(config.risk.default_debris_size, 2.5);
        assert_eq!(config.risk.default_satellite_size, 5.0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STREAM_CADENCE_SEC", "0.5"),
            ("TOKEN_TTL_SEC", "30"),
            ("FRONTEND_URL", "https://app.example"),
            ("AI_MODEL_PATH", ""),
        ]
        .into_iter()
        .collect();

        let mut config = BackendConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cadence(), Duration::from_millis(500));
        assert_eq!(config.token_ttl_secs, 30);
        assert_eq!(config.allowed_origin.as_deref(), Some("https://app.example"));
        assert!(config.model_path.is_none());
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let mut config = BackendConfig::default();
        let result = config.apply_overrides(|key| (key == "PORT").then(|| "eighty".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cadence() {
        let config = BackendConfig {
            cadence_secs: 0.0,
            ..BackendConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let huge_cadence = BackendConfig {
            cadence_secs: 1e30,
            ..BackendConfig::default()
        };
        assert!(huge_cadence.validate().is_err());
        // no panic even when validation was skipped
        assert_eq!(huge_cadence.cadence(), Duration::from_secs(3600));

        let negative_cadence = BackendConfig {
            cadence_secs: -1.0,
            ..BackendConfig::default()
        };
        assert!(negative_cadence.validate().is_err());
        assert_eq!(negative_cadence.cadence(), Duration::from_secs(1));

        let nan_cadence = BackendConfig {
            cadence_secs: f64::NAN,
            ..BackendConfig::default()
        };
        assert!(nan_cadence.validate().is_err());

        let huge_ttl = BackendConfig {
            token_ttl_secs: 10_000_000_000_000,
            ..BackendConfig::default()
        };
        assert!(huge_ttl.validate().is_err());

        let huge_grace = BackendConfig {
            shutdown_grace_secs: u64::MAX,
            ..BackendConfig::default()
        };
        assert!(huge_grace.validate().is_err());
        assert_eq!(huge_grace.shutdown_grace(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_cadence_overflow_fails_validation() {
        let mut config = BackendConfig::default();
        config
            .apply_overrides(|key| (key == "STREAM_CADENCE_SEC").then(|| "1e30".to_string()))
            .unwrap();
        assert!(config.validate().is_err());
    }
}
