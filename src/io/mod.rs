//! ONNX I/O module
//!
//! Encoding, atomic file output, loading, and the default model checker.
//!
//! # Example
//!
//! ```ignore
//! use trace2onnx::io::{load_model, save_model, validate_model};
//!
//! save_model(&model, "model.onnx")?;
//! let model = load_model("model.onnx")?;
//! assert!(validate_model(&model).is_valid);
//! ```

pub mod reader;
pub mod validation;
pub mod writer;

pub use reader::{load_graph, load_model, load_model_from_bytes, ModelInfo};
pub use validation::{
    check_model, get_opset_version, is_opset_supported, validate_graph, validate_model,
    OnnxChecker, ValidationResult,
};
pub use writer::{model_size, model_to_bytes, save_model, write_model};
