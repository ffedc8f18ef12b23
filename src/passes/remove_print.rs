//! Drop debug printing

use crate::error::ExportResult;
use crate::graph::ProgramGraph;
use crate::passes::common::{all_nodes, PassContext, PassResult};
use crate::traits::GraphPass;

/// Remove every `prim::Print`
#[derive(Debug, Default, Clone, Copy)]
pub struct RemovePrint;

impl RemovePrint {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for RemovePrint {
    fn name(&self) -> &'static str {
        "RemovePrint"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if graph.is_alive(node) && graph.kind(node) == "prim::Print" {
                graph.destroy_node(node)?;
                result.record_elimination("prim::Print");
            }
        }
        Ok(result)
    }
}
