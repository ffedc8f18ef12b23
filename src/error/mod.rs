//! Error types for trace2onnx
//!
//! Every stage of an export (tracing, optimization, lowering, folding,
//! emission, validation) reports failures through [`ExportError`]. A failure
//! anywhere aborts the whole export.

use thiserror::Error;

/// Main error type for export operations
#[derive(Error, Debug)]
pub enum ExportError {
    /// A value type cannot be projected into an ONNX type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// No lowering is registered for a node kind and fallback is disabled
    #[error("Symbolic function for {kind} not found (opset {opset})")]
    SymbolicFunctionNotFound {
        /// Node kind, e.g. `aten::foo`
        kind: String,
        /// Active opset version
        opset: i64,
    },

    /// A lowering function returned the wrong number of outputs
    #[error("Lowering of {kind} returned {actual} outputs, expected {expected}")]
    OutputArityMismatch {
        /// Node kind being lowered
        kind: String,
        /// Output count of the original node
        expected: usize,
        /// Output count returned by the lowering
        actual: usize,
    },

    /// The graph is malformed after a pass
    #[error("Graph lint failed after {pass}: {detail}")]
    StructuralLint {
        /// Name of the pass that ran last
        pass: String,
        /// What was wrong
        detail: String,
    },

    /// User supplied input names do not match the graph inputs
    #[error("Input names count mismatch: {actual} names supplied, graph has {expected} inputs")]
    NameCountMismatch {
        /// Number of (non-self) graph inputs
        expected: usize,
        /// Number of names supplied
        actual: usize,
    },

    /// The exported model failed validation
    #[error("Model validation failed: {0}")]
    Validation(String),

    /// A control-flow node does not have the expected block structure
    #[error("Malformed control flow: {0}")]
    MalformedControlFlow(String),

    /// An attribute path does not resolve to a known parameter
    #[error("Parameter not found in state dict: {0}")]
    MissingParameter(String),

    /// Unsupported opset version
    #[error("Unsupported opset version: {version}, expected {min}..={max}")]
    UnsupportedOpset {
        /// Requested version
        version: i64,
        /// Minimum supported
        min: i64,
        /// Maximum supported
        max: i64,
    },

    /// Invalid tensor data type
    #[error("Invalid data type: {0}")]
    InvalidDataType(i32),

    /// The tracer failed to produce a graph
    #[error("Tracing failed: {0}")]
    Trace(String),

    /// A graph operation was given inconsistent arguments
    #[error("Invalid graph operation: {0}")]
    InvalidGraph(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Protobuf encode error
    #[error("Protobuf encode error: {0}")]
    ProtoEncode(#[from] prost::EncodeError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for export operations
pub type ExportResult<T> = Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExportError::SymbolicFunctionNotFound {
            kind: "aten::frobnicate".to_string(),
            opset: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("aten::frobnicate"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = ExportError::OutputArityMismatch {
            kind: "aten::split".to_string(),
            expected: 3,
            actual: 1,
        };
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_unsupported_opset() {
        let err = ExportError::UnsupportedOpset {
            version: 3,
            min: 7,
            max: 17,
        };
        assert!(err.to_string().contains("3"));
    }
}
