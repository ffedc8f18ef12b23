//! Graph optimizer pipeline
//!
//! Rewrites applied to the traced graph before symbolic lowering. Every pass
//! implements [`GraphPass`] and works in place on a [`ProgramGraph`].
//!
//! # Standard order
//!
//! 1. [`InlineForkWait`]
//! 2. [`ConstantPropagation`] (when `constant_propagation` is set)
//! 3. [`DeadCodeElimination`]
//! 4. [`CanonicalizeFuserOps`]
//! 5. [`Peephole`]
//! 6. [`FuseAddmm`]
//! 7. [`Peephole`]
//! 8. [`LowerTuples`]
//! 9. [`OnnxPreprocess`]
//! 10. [`PrepareDivision`]
//! 11. [`RemovePrint`]
//! 12. [`TargetPreprocess`]
//! 13. [`QuantizationUnpack`] (ATen fallback only)
//! 14. [`EraseNumberTypes`]
//! 15. [`RenameInputs`]
//! 16. [`MarkDynamicAxes`]
//!
//! The graph is linted after every pass; a failing lint aborts the export
//! with [`ExportError::StructuralLint`] naming the pass.
//!
//! # Example
//!
//! ```ignore
//! use trace2onnx::export::ExportOptions;
//! use trace2onnx::passes::{optimize, PassContext};
//!
//! let options = ExportOptions::default();
//! let stats = optimize(&mut graph, &PassContext::new(&options))?;
//! println!("{} rewrites", stats.rewrites);
//! ```

pub mod canonicalize;
pub mod common;
pub mod constant_propagation;
pub mod dead_code;
pub mod dynamic_axes;
pub mod erase_number_types;
pub mod fuse_addmm;
pub mod inline_fork_wait;
pub mod lower_tuples;
pub mod onnx_preprocess;
pub mod peephole;
pub mod prepare_division;
pub mod quantization;
pub mod remove_print;
pub mod rename_inputs;
pub mod target_preprocess;

pub use canonicalize::CanonicalizeFuserOps;
pub use common::{PassContext, PassResult};
pub use constant_propagation::ConstantPropagation;
pub use dead_code::DeadCodeElimination;
pub use dynamic_axes::MarkDynamicAxes;
pub use erase_number_types::EraseNumberTypes;
pub use fuse_addmm::FuseAddmm;
pub use inline_fork_wait::InlineForkWait;
pub use lower_tuples::LowerTuples;
pub use onnx_preprocess::OnnxPreprocess;
pub use peephole::Peephole;
pub use prepare_division::PrepareDivision;
pub use quantization::QuantizationUnpack;
pub use remove_print::RemovePrint;
pub use rename_inputs::RenameInputs;
pub use target_preprocess::TargetPreprocess;

use tracing::debug;

use crate::error::{ExportError, ExportResult};
use crate::graph::ProgramGraph;
use crate::traits::GraphPass;

/// Ordered list of passes, linted one by one
pub struct Pipeline {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Append a pass
    pub fn add<T: GraphPass + 'static>(mut self, pass: T) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// The sixteen passes run before lowering
    pub fn standard() -> Self {
        Self::new()
            .add(InlineForkWait::new())
            .add(ConstantPropagation::new())
            .add(DeadCodeElimination::new())
            .add(CanonicalizeFuserOps::new())
            .add(Peephole::new())
            .add(FuseAddmm::new())
            .add(Peephole::new())
            .add(LowerTuples::new())
            .add(OnnxPreprocess::new())
            .add(PrepareDivision::new())
            .add(RemovePrint::new())
            .add(TargetPreprocess::new())
            .add(QuantizationUnpack::new())
            .add(EraseNumberTypes::new())
            .add(RenameInputs::new())
            .add(MarkDynamicAxes::new())
    }

    /// Number of passes
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Whether the pipeline has no passes
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in run order
    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass in order, linting after each
    pub fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut total = PassResult::new();
        for pass in &self.passes {
            let result = pass.run(graph, ctx)?;
            debug!(
                "{}: {} rewrites, {} nodes eliminated",
                pass.name(),
                result.rewrites,
                result.nodes_eliminated
            );
            graph
                .lint()
                .map_err(|detail| ExportError::StructuralLint {
                    pass: pass.name().to_string(),
                    detail,
                })?;
            total.merge(result);
        }
        Ok(total)
    }
}

/// Run the standard pipeline
pub fn optimize(graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
    Pipeline::standard().run(graph, ctx)
}
