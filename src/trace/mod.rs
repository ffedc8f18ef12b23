//! Traced modules
//!
//! A [`TracedModule`] is what a tracer hands to the exporter: the recorded
//! program graph, the outputs of the example run and the module's state
//! dict. Tracers are external; [`FnTracer`] adapts a closure and a
//! `TracedModule` can stand in for an already-traced model.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{ExportError, ExportResult};
use crate::graph::ProgramGraph;
use crate::tensor::Tensor;
use crate::traits::Tracer;

/// Tracer settings forwarded from the export options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Re-run the model and compare against the trace
    pub check_trace: bool,
    /// Reject mutable containers in the traced outputs
    pub strict: bool,
    /// Record inplace ops as their out-of-place variants
    pub force_outplace: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            check_trace: false,
            strict: true,
            force_outplace: false,
        }
    }
}

/// Result of tracing a model on example inputs
#[derive(Debug, Clone, Default)]
pub struct TracedModule {
    /// Qualified name of the traced module
    pub name: String,
    /// Recorded program
    pub graph: ProgramGraph,
    /// Outputs of the example run, one per graph output
    pub outputs: Vec<Tensor>,
    /// Parameters and buffers by dotted path
    pub state_dict: IndexMap<String, Tensor>,
}

impl TracedModule {
    /// Wrap a recorded graph
    pub fn new(name: &str, graph: ProgramGraph) -> Self {
        Self {
            name: name.to_string(),
            graph,
            outputs: Vec::new(),
            state_dict: IndexMap::new(),
        }
    }

    /// Attach the example outputs
    pub fn with_outputs(mut self, outputs: Vec<Tensor>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Add a parameter or buffer
    pub fn with_parameter(mut self, path: &str, tensor: Tensor) -> Self {
        self.state_dict.insert(path.to_string(), tensor);
        self
    }

    /// Look up a parameter by dotted path
    pub fn parameter(&self, path: &str) -> Option<&Tensor> {
        self.state_dict.get(path)
    }

    /// Check that the example outputs line up with the graph outputs
    pub fn check_outputs(&self) -> ExportResult<()> {
        let expected = self.graph.outputs().len();
        if !self.outputs.is_empty() && self.outputs.len() != expected {
            return Err(ExportError::Trace(format!(
                "graph of {} has {} outputs but the example run produced {}",
                self.name,
                expected,
                self.outputs.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TracedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        write!(f, "{}", self.graph)
    }
}

impl Tracer for TracedModule {
    fn trace(&self, _inputs: &[Tensor], _options: &TraceOptions) -> ExportResult<TracedModule> {
        Ok(self.clone())
    }
}

/// Tracer backed by a closure
pub struct FnTracer<F> {
    func: F,
}

impl<F> FnTracer<F>
where
    F: Fn(&[Tensor], &TraceOptions) -> ExportResult<TracedModule>,
{
    /// Wrap a tracing closure
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Tracer for FnTracer<F>
where
    F: Fn(&[Tensor], &TraceOptions) -> ExportResult<TracedModule>,
{
    fn trace(&self, inputs: &[Tensor], options: &TraceOptions) -> ExportResult<TracedModule> {
        (self.func)(inputs, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    fn relu_module() -> TracedModule {
        let mut b = GraphBuilder::new("Relu");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::relu", &[x], JitType::tensor_of(ScalarType::Float, &[2]));
        b.output(y);
        let (name, graph) = b.finish();
        TracedModule::new(&name, graph)
    }

    #[test]
    fn test_traced_module_is_a_tracer() {
        let module = relu_module().with_parameter("w", Tensor::scalar_f32(1.0));
        let traced = module.trace(&[], &TraceOptions::default()).unwrap();
        assert_eq!(traced.name, "Relu");
        assert!(traced.parameter("w").is_some());
    }

    #[test]
    fn test_fn_tracer_sees_inputs() {
        let tracer = FnTracer::new(|inputs: &[Tensor], _opts: &TraceOptions| {
            if inputs.len() != 1 {
                return Err(ExportError::Trace("expected one input".to_string()));
            }
            Ok(relu_module().with_outputs(inputs.to_vec()))
        });
        let opts = TraceOptions::default();
        assert!(tracer.trace(&[], &opts).is_err());
        let traced = tracer.trace(&[Tensor::scalar_f32(1.0)], &opts).unwrap();
        assert_eq!(traced.outputs.len(), 1);
        assert!(traced.check_outputs().is_ok());
    }

    #[test]
    fn test_output_count_mismatch() {
        let module = relu_module().with_outputs(vec![Tensor::scalar_f32(0.0); 2]);
        assert!(matches!(module.check_outputs(), Err(ExportError::Trace(_))));
    }
}
