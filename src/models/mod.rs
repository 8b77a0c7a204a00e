//! ONNX model integration for the transaction monitoring agent

pub mod inference;
pub mod loader;

pub use inference::OnnxTransactionModel;
pub use loader::{LoadedModel, ModelLoader};
