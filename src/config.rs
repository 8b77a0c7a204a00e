//! Configuration management for the risk orchestrator

use crate::types::verdict::BandThresholds;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub agents: AgentsConfig,
    pub evidence: EvidenceConfig,
    pub fusion: FusionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transaction contexts
    pub transaction_subject: String,
    /// Subject for outgoing decision records
    pub decision_subject: String,
    /// Request/reply subject served by the biometric model
    pub biometric_subject: String,
}

/// Transaction scoring model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Path to the ONNX transaction model
    pub transaction_model_path: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Confidence reported when a model does not supply one
    #[serde(default = "default_nominal_confidence")]
    pub nominal_confidence: f64,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_nominal_confidence() -> f64 {
    0.8
}

/// Per-agent timeouts and biometric policy
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    /// Transaction monitoring timeout in milliseconds
    pub transaction_monitor_timeout_ms: u64,
    /// Deepfake detection timeout in milliseconds
    pub deepfake_timeout_ms: u64,
    /// Face match below this similarity fails verification
    #[serde(default = "default_face_match_threshold")]
    pub face_match_threshold: f64,
    /// Minimum risk reported when biometric verification fails
    #[serde(default = "default_failed_verification_floor")]
    pub failed_verification_floor: f64,
}

fn default_face_match_threshold() -> f64 {
    0.80
}

fn default_failed_verification_floor() -> f64 {
    0.90
}

impl AgentsConfig {
    pub fn transaction_monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_monitor_timeout_ms)
    }

    pub fn deepfake_timeout(&self) -> Duration {
        Duration::from_millis(self.deepfake_timeout_ms)
    }
}

/// Evidence collection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceConfig {
    /// JSON file with account history, loaded into memory at startup
    #[serde(default)]
    pub history_file: Option<String>,
    /// History window for averages and counts, in days
    #[serde(default = "default_history_window_days")]
    pub history_window_days: i64,
    /// Amount larger than this multiple of the average is an anomaly
    #[serde(default = "default_amount_anomaly_multiplier")]
    pub amount_anomaly_multiplier: f64,
    /// More transactions than this in 24 hours is high velocity
    #[serde(default = "default_velocity_limit_24h")]
    pub velocity_limit_24h: u32,
}

fn default_history_window_days() -> i64 {
    30
}

fn default_amount_anomaly_multiplier() -> f64 {
    5.0
}

fn default_velocity_limit_24h() -> u32 {
    10
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            history_window_days: default_history_window_days(),
            amount_anomaly_multiplier: default_amount_anomaly_multiplier(),
            velocity_limit_24h: default_velocity_limit_24h(),
        }
    }
}

/// Fusion coefficients
#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Penalty weight for each failed or timed-out agent
    pub unusable_penalty_weight: f64,
    /// Penalty weight for each skipped agent
    pub skipped_penalty_weight: f64,
    /// Band cut-points
    pub bands: BandThresholds,
    /// Number of merged attributions kept on the verdict
    pub top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            unusable_penalty_weight: 0.30,
            skipped_penalty_weight: 0.15,
            bands: BandThresholds::default(),
            top_k: 5,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [
            ("unusable_penalty_weight", self.unusable_penalty_weight),
            ("skipped_penalty_weight", self.skipped_penalty_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                bail!("fusion.{} must be within [0, 1], got {}", name, weight);
            }
        }
        if self.skipped_penalty_weight > self.unusable_penalty_weight {
            bail!(
                "fusion.skipped_penalty_weight ({}) must not exceed unusable_penalty_weight ({})",
                self.skipped_penalty_weight,
                self.unusable_penalty_weight
            );
        }
        if self.top_k == 0 {
            bail!("fusion.top_k must be at least 1");
        }
        self.bands
            .validate()
            .map_err(|e| anyhow::anyhow!("fusion.bands: {}", e))
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent evaluations
    pub workers: usize,
    /// Whole-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, with `FRAUD__SECTION__KEY` overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fusion.validate()?;
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        let agent_budget = self
            .agents
            .transaction_monitor_timeout_ms
            .max(self.agents.deepfake_timeout_ms);
        if self.pipeline.request_timeout_ms <= agent_budget {
            bail!(
                "pipeline.request_timeout_ms ({}) must exceed the longest agent timeout ({})",
                self.pipeline.request_timeout_ms,
                agent_budget
            );
        }
        if !(0.0..=1.0).contains(&self.models.nominal_confidence) {
            bail!("models.nominal_confidence must be within [0, 1]");
        }
        self.evidence.validate()
    }
}

impl EvidenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_window_days <= 0 {
            bail!(
                "evidence.history_window_days must be positive, got {}",
                self.history_window_days
            );
        }
        if !(self.amount_anomaly_multiplier.is_finite() && self.amount_anomaly_multiplier > 0.0) {
            bail!(
                "evidence.amount_anomaly_multiplier must be positive, got {}",
                self.amount_anomaly_multiplier
            );
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                transaction_subject: "transactions".to_string(),
                decision_subject: "fraud.decisions".to_string(),
                biometric_subject: "biometric.predict".to_string(),
            },
            models: ModelsConfig {
                transaction_model_path: "models/xgboost.onnx".to_string(),
                onnx_threads: 1,
                nominal_confidence: default_nominal_confidence(),
            },
            agents: AgentsConfig {
                transaction_monitor_timeout_ms: 800,
                deepfake_timeout_ms: 1500,
                face_match_threshold: default_face_match_threshold(),
                failed_verification_floor: default_failed_verification_floor(),
            },
            evidence: EvidenceConfig::default(),
            fusion: FusionConfig::default(),
            pipeline: PipelineConfig {
                workers: 4,
                request_timeout_ms: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.fusion.top_k, 5);
        assert_eq!(config.fusion.bands.critical, 0.85);
        assert_eq!(config.agents.deepfake_timeout(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fusion_validation() {
        let mut fusion = FusionConfig::default();
        fusion.skipped_penalty_weight = 0.5;
        assert!(fusion.validate().is_err());

        let mut fusion = FusionConfig::default();
        fusion.top_k = 0;
        assert!(fusion.validate().is_err());

        let mut fusion = FusionConfig::default();
        fusion.unusable_penalty_weight = 1.5;
        assert!(fusion.validate().is_err());
    }

    #[test]
    fn test_evidence_validation() {
        let mut config = AppConfig::default();
        config.evidence.history_window_days = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.evidence.history_window_days = -7;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.evidence.amount_anomaly_multiplier = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.evidence.amount_anomaly_multiplier = -2.5;
        assert!(config.validate().is_err());

        assert!(EvidenceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_request_timeout_must_cover_agents() {
        let mut config = AppConfig::default();
        config.pipeline.request_timeout_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_file_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.toml");
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.fusion.bands.high, 0.70);
        assert_eq!(config.pipeline.workers, 4);
    }
}
