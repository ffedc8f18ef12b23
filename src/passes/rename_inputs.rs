//! Apply user supplied input names

use crate::error::{ExportError, ExportResult};
use crate::graph::ProgramGraph;
use crate::passes::common::{self_input, PassContext, PassResult};
use crate::traits::GraphPass;

/// Rename the graph inputs after `input_names`
///
/// The module object input is not positional and is never renamed. The
/// number of names must match the remaining inputs exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameInputs;

impl RenameInputs {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for RenameInputs {
    fn name(&self) -> &'static str {
        "RenameInputs"
    }

    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        let names = match &ctx.options.input_names {
            Some(names) => names,
            None => return Ok(result),
        };
        let skip = usize::from(self_input(graph).is_some());
        let inputs = graph.inputs()[skip..].to_vec();
        if inputs.len() != names.len() {
            return Err(ExportError::NameCountMismatch {
                expected: inputs.len(),
                actual: names.len(),
            });
        }
        for (value, name) in inputs.into_iter().zip(names) {
            graph.set_debug_name(value, name)?;
            result.record("input");
        }
        Ok(result)
    }
}
