//! Deepfake detection agent: biometric authenticity of the submitted media.
//!
//! Only invoked when the transaction carries a media reference; otherwise the
//! orchestrator records an explicit `Skipped` result.

use crate::agents::{RawAgentOutput, ScoringAgent};
use crate::types::agent::AgentId;
use crate::types::features::FeatureBundle;
use crate::types::transaction::{MediaRef, TransactionContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Skip reason recorded when no biometric sample is supplied
pub const NO_MEDIA_REASON: &str = "no biometric media supplied";

/// Native output of the biometric model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricModelOutput {
    /// Face similarity against the account's reference sample
    pub similarity: f64,
    #[serde(default)]
    pub is_deepfake: bool,
    #[serde(default)]
    pub deepfake_confidence: f64,
    /// Whether the presented verification code matched; `None` if not checked
    #[serde(default)]
    pub code_validated: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Per-signal attribution weights keyed by the model's signal names
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
}

/// Contract of the external biometric model
#[async_trait]
pub trait BiometricModel: Send + Sync {
    async fn predict(
        &self,
        media: &MediaRef,
        features: &FeatureBundle,
    ) -> Result<BiometricModelOutput>;
}

/// Biometric model served over NATS request/reply
pub struct NatsBiometricModel {
    client: async_nats::Client,
    subject: String,
}

#[derive(Serialize)]
struct BiometricRequest<'a> {
    transaction_id: &'a str,
    media_uri: &'a str,
    expected_code: Option<&'a str>,
}

impl NatsBiometricModel {
    pub fn new(client: async_nats::Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }
}

#[async_trait]
impl BiometricModel for NatsBiometricModel {
    async fn predict(
        &self,
        media: &MediaRef,
        features: &FeatureBundle,
    ) -> Result<BiometricModelOutput> {
        let request = BiometricRequest {
            transaction_id: &features.transaction_id,
            media_uri: &media.uri,
            expected_code: media.expected_code.as_deref(),
        };
        let payload = serde_json::to_vec(&request)?;
        let reply = self
            .client
            .request(self.subject.clone(), payload.into())
            .await
            .context("Biometric model request failed")?;
        serde_json::from_slice(&reply.payload).context("Malformed biometric model reply")
    }
}

/// Scores biometric authenticity when media is present
pub struct DeepfakeDetectionAgent {
    model: Arc<dyn BiometricModel>,
    timeout: Duration,
}

impl DeepfakeDetectionAgent {
    pub fn new(model: Arc<dyn BiometricModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl ScoringAgent for DeepfakeDetectionAgent {
    fn id(&self) -> AgentId {
        AgentId::DeepfakeDetection
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn skip_reason(&self, ctx: &TransactionContext) -> Option<String> {
        ctx.media.is_none().then(|| NO_MEDIA_REASON.to_string())
    }

    async fn score(
        &self,
        ctx: &TransactionContext,
        features: &FeatureBundle,
    ) -> Result<RawAgentOutput> {
        let media = ctx
            .media
            .as_ref()
            .context("deepfake detection invoked without media")?;
        let output = self.model.predict(media, features).await?;
        Ok(RawAgentOutput::Biometric(output))
    }
}
