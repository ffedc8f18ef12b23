//! # trace2onnx
//!
//! Converts traced program graphs into ONNX models.
//!
//! A tracer records a model run as a [`graph::ProgramGraph`]: namespaced
//! nodes (`aten::relu`, `prim::If`, ...), typed values and nested blocks for
//! conditionals. The exporter optimizes that graph, lowers every node to
//! ONNX operators through an opset-versioned registry of symbolic
//! functions, folds constant subgraphs, and emits a validated `ModelProto`.
//!
//! ## Features
//!
//! - **Optimizer pipeline**: sixteen linted passes run before lowering
//! - **Symbolic lowering**: per-operator lowerings with ATen fallback modes
//! - **Control flow**: conditionals become `If` nodes with nested subgraphs
//! - **Constant folding**: parameter-only subgraphs become initializers
//!
//! ## Example
//!
//! ```ignore
//! use trace2onnx::prelude::*;
//!
//! let options = ExportOptions::default().with_opset(13);
//! let outputs = export_to_path(&traced_module, &inputs, "model.onnx", options)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod eval;
pub mod export;
pub mod graph;
pub mod io;
pub mod opset;
pub mod passes;
pub mod proto;
pub mod symbolic;
pub mod tensor;
pub mod trace;
pub mod traits;

/// Prelude module - import commonly used types with `use trace2onnx::prelude::*`
pub mod prelude {
    pub use crate::error::{ExportError, ExportResult};
    pub use crate::export::{
        export, export_to_path, DynamicAxes, ExportOptions, ExportedModel, Exporter, TrainingMode,
    };
    pub use crate::graph::{GraphBuilder, JitType, ProgramGraph, TensorType};
    pub use crate::io::{load_model, save_model, OnnxChecker};
    pub use crate::opset::OperatorExportType;
    pub use crate::proto::onnx::*;
    pub use crate::symbolic::{SymbolicContext, SymbolicRegistry};
    pub use crate::tensor::{ScalarType, Tensor};
    pub use crate::trace::{FnTracer, TraceOptions, TracedModule};
    pub use crate::traits::{GraphPass, ModelValidator, SymbolicLookup, Tracer};
}

pub use error::{ExportError, ExportResult};
pub use export::{export, export_to_path, ExportOptions, Exporter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lowest opset the exporter targets
pub const SUPPORTED_OPSET_MIN: i64 = 7;
/// Highest opset the exporter targets
pub const SUPPORTED_OPSET_MAX: i64 = 17;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_opset_range() {
        assert_eq!(SUPPORTED_OPSET_MIN, 7);
        assert_eq!(SUPPORTED_OPSET_MAX, 17);
        assert!(ExportOptions::default().validate().is_ok());
    }
}
