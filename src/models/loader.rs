//! ONNX model loader

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

/// Loaded ONNX session with the tensor names it is driven through
pub struct LoadedModel {
    pub name: String,
    pub session: Session,
    pub input_name: String,
    /// Output carrying class probabilities
    pub output_name: String,
}

/// Builds ONNX Runtime sessions with a fixed intra-op thread count
pub struct ModelLoader {
    onnx_threads: usize,
}

impl ModelLoader {
    /// Initialize the runtime environment and create a loader
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self {
            onnx_threads: onnx_threads.max(1),
        })
    }

    pub fn load_model<P: AsRef<Path>>(&self, path: P, name: &str) -> Result<LoadedModel> {
        let path = path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        // Classifier exports name the probability output `probabilities`;
        // fall back to the last output, which skips the `label` head.
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            model = %name,
            path = %path.display(),
            input = %input_name,
            output = %output_name,
            "Transaction model loaded"
        );

        Ok(LoadedModel {
            name: name.to_string(),
            session,
            input_name,
            output_name,
        })
    }
}
