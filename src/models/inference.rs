//! ONNX-backed transaction scoring model

use crate::agents::transaction_monitor::{NativeAttribution, TransactionModel, TransactionModelOutput};
use crate::config::ModelsConfig;
use crate::models::loader::{LoadedModel, ModelLoader};
use crate::types::features::{FeatureBundle, FeatureName};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Transaction model served by ONNX Runtime.
///
/// Attributions come from occlusion: each feature's weight is the drop in
/// fraud probability when that feature alone is reset to zero. The base row
/// and all occluded rows are scored in one batch.
pub struct OnnxTransactionModel {
    model: Arc<RwLock<LoadedModel>>,
}

impl OnnxTransactionModel {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let path = Path::new(&config.transaction_model_path);
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("transaction_model");
        let loader = ModelLoader::with_threads(config.onnx_threads)?;
        let model = loader.load_model(path, name)?;
        Ok(Self {
            model: Arc::new(RwLock::new(model)),
        })
    }

    pub fn name(&self) -> String {
        self.model
            .read()
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransactionModel for OnnxTransactionModel {
    async fn predict(&self, features: &FeatureBundle) -> Result<TransactionModelOutput> {
        let input = features.to_model_input();
        let model = self.model.clone();

        let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f64>> {
            let mut model = model
                .write()
                .map_err(|e| anyhow!("Lock error: {}", e))?;
            run_batch(&mut model, &occlusion_rows(&input))
        })
        .await
        .context("inference task aborted")??;

        let (probability, attributions) = occlusion_attributions(&scores)?;
        debug!(
            transaction_id = %features.transaction_id,
            probability = probability,
            "Transaction model inference complete"
        );
        Ok(TransactionModelOutput {
            probability,
            confidence: None,
            attributions,
        })
    }
}

/// Base row followed by one row per feature with that feature zeroed
fn occlusion_rows(input: &[f32]) -> Vec<Vec<f32>> {
    let mut rows = Vec::with_capacity(input.len() + 1);
    rows.push(input.to_vec());
    for i in 0..input.len() {
        let mut row = input.to_vec();
        row[i] = 0.0;
        rows.push(row);
    }
    rows
}

/// Split batch scores into the base probability and per-feature attributions
fn occlusion_attributions(scores: &[f64]) -> Result<(f64, Vec<NativeAttribution>)> {
    let (&base, occluded) = scores
        .split_first()
        .ok_or_else(|| anyhow!("model returned no scores"))?;
    let columns: Vec<FeatureName> = FeatureName::bundle_features().collect();
    if occluded.len() != columns.len() {
        bail!(
            "expected {} occluded scores, model returned {}",
            columns.len(),
            occluded.len()
        );
    }
    let attributions = columns
        .iter()
        .zip(occluded)
        .map(|(feature, &score)| NativeAttribution {
            name: feature.model_column().to_string(),
            value: base - score,
        })
        .filter(|a| a.value != 0.0)
        .collect();
    Ok((base, attributions))
}

fn run_batch(model: &mut LoadedModel, rows: &[Vec<f32>]) -> Result<Vec<f64>> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let shape = vec![rows.len() as i64, width as i64];
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    let input_tensor =
        Tensor::from_array((shape, data)).context("Failed to create input tensor")?;

    let outputs = model
        .session
        .run(ort::inputs![model.input_name.as_str() => input_tensor])?;
    let output = outputs
        .get(model.output_name.as_str())
        .ok_or_else(|| anyhow!("model {} has no output {}", model.name, model.output_name))?;

    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return probabilities_from_tensor(&dims, data, rows.len());
    }
    if DynSequenceValueType::can_downcast(&output.dtype()) {
        return probabilities_from_sequence(output, rows.len());
    }
    bail!("unsupported output type for model {}", model.name)
}

/// Fraud-class probabilities from a `[rows, classes]` or `[rows]` tensor
fn probabilities_from_tensor(dims: &[i64], data: &[f32], rows: usize) -> Result<Vec<f64>> {
    let classes = match dims {
        [r, c] if *r as usize == rows && *c >= 1 => *c as usize,
        [r] if *r as usize == rows => 1,
        _ => bail!("unexpected output shape {:?} for {} rows", dims, rows),
    };
    if data.len() < rows * classes {
        bail!("output holds {} values, expected {}", data.len(), rows * classes);
    }
    // Binary classifiers emit [p(legit), p(fraud)]; single column is p(fraud)
    let fraud_column = if classes >= 2 { 1 } else { 0 };
    Ok((0..rows)
        .map(|r| data[r * classes + fraud_column] as f64)
        .collect())
}

/// Fraud-class probabilities from a `seq(map(int64, float))` output
fn probabilities_from_sequence(output: &ort::value::DynValue, rows: usize) -> Result<Vec<f64>> {
    let allocator = Allocator::default();
    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow!("Failed to downcast to sequence: {}", e))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    if maps.len() != rows {
        bail!("sequence holds {} maps, expected {}", maps.len(), rows);
    }

    maps.iter()
        .map(|map| {
            let pairs = map.try_extract_key_values::<i64, f32>()?;
            pairs
                .iter()
                .find(|(class, _)| *class == 1)
                .map(|(_, p)| *p as f64)
                .or_else(|| {
                    pairs
                        .iter()
                        .find(|(class, _)| *class == 0)
                        .map(|(_, p)| 1.0 - *p as f64)
                })
                .ok_or_else(|| anyhow!("no class probability in output map"))
        })
        .collect()
}
