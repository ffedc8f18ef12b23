//! Preprocessing required before symbolic lowering

use crate::error::ExportResult;
use crate::graph::{AttrValue, NodeId, ProgramGraph, Use};
use crate::passes::common::{all_nodes, insert_before, PassContext, PassResult};
use crate::traits::GraphPass;

/// Kinds whose list result can become a fixed number of outputs
const SPLITTING_KINDS: &[&str] = &["aten::split", "aten::split_with_sizes", "aten::unbind"];

/// Give list-producing splits a static output count
///
/// A split whose list result is consumed only by a `prim::ListUnpack` is
/// replaced by one node of the same kind with one output per unpacked
/// element and an `_outputs` attribute holding that count.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxPreprocess;

impl OnnxPreprocess {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn fuse_list_unpack(graph: &mut ProgramGraph, split: NodeId) -> ExportResult<bool> {
    if graph.node_outputs(split).len() != 1 {
        return Ok(false);
    }
    let list = graph.node_outputs(split)[0];
    let unpack = match graph.uses(list) {
        [Use::Node { node, .. }] if graph.kind(*node) == "prim::ListUnpack" => *node,
        _ => return Ok(false),
    };
    let pieces = graph.node_outputs(unpack).to_vec();
    let inputs = graph.node_inputs(split).to_vec();
    let kind = graph.kind(split).to_string();

    let fused = insert_before(graph, split, &kind, &inputs, pieces.len())?;
    graph.copy_attributes(fused, split);
    graph.set_attr(fused, "_outputs", AttrValue::Int(pieces.len() as i64));
    let outs = graph.node_outputs(fused).to_vec();
    for (&new, &old) in outs.iter().zip(&pieces) {
        graph.copy_metadata(new, old)?;
        graph.replace_all_uses_with(old, new);
    }
    graph.destroy_node(unpack)?;
    graph.destroy_node(split)?;
    Ok(true)
}

impl GraphPass for OnnxPreprocess {
    fn name(&self) -> &'static str {
        "OnnxPreprocess"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) || !SPLITTING_KINDS.contains(&graph.kind(node)) {
                continue;
            }
            let kind = graph.kind(node).to_string();
            if fuse_list_unpack(graph, node)? {
                result.record(&kind);
            }
        }
        Ok(result)
    }
}
