//! Core traits for trace2onnx
//!
//! The exporter talks to its collaborators through these seams: the tracer
//! that produces a program graph, the registry of lowering functions, the
//! optimizer passes, and the validator of the finished model.

use crate::error::ExportResult;
use crate::graph::ProgramGraph;
use crate::passes::{PassContext, PassResult};
use crate::proto::ModelProto;
use crate::symbolic::SymbolicFn;
use crate::tensor::Tensor;
use crate::trace::{TraceOptions, TracedModule};

/// A rewrite over the program graph
///
/// Passes run in a fixed order inside the optimizer pipeline; the graph is
/// linted after each one.
///
/// # Example
///
/// ```ignore
/// struct Noop;
///
/// impl GraphPass for Noop {
///     fn name(&self) -> &'static str {
///         "Noop"
///     }
///
///     fn run(&self, _graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
///         Ok(PassResult::new())
///     }
/// }
/// ```
pub trait GraphPass {
    /// Name used in logs and lint errors
    fn name(&self) -> &'static str;

    /// Rewrite the graph in place
    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult>;
}

/// Produces a program graph by running a model on example inputs
pub trait Tracer {
    /// Trace the model
    ///
    /// The returned module carries the graph, the outputs of the example run
    /// and the module's state dict.
    fn trace(&self, inputs: &[Tensor], options: &TraceOptions) -> ExportResult<TracedModule>;
}

/// Registry of per-operator lowering functions
pub trait SymbolicLookup {
    /// Lowering for `op` valid at `opset`, if any
    ///
    /// `op` is the operator name without namespace; inplace suffixes are
    /// already stripped and `prim` operators are prefixed with `prim_`.
    fn lookup(&self, op: &str, opset: i64) -> Option<SymbolicFn>;
}

/// Checks (and possibly annotates) a finished model
pub trait ModelValidator {
    /// Validate the model, returning it with any inferred annotations
    fn validate(&self, model: ModelProto) -> ExportResult<ModelProto>;
}

/// Validator that accepts every model unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NoValidation;

impl ModelValidator for NoValidation {
    fn validate(&self, model: ModelProto) -> ExportResult<ModelProto> {
        Ok(model)
    }
}
