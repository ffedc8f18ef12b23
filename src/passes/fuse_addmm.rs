//! Fuse `mm` + `add` into `addmm`

use crate::error::ExportResult;
use crate::graph::{AttrValue, JitType, NodeId, ProgramGraph, ValueId};
use crate::passes::common::{all_nodes, constant_int, insert_before, PassContext, PassResult};
use crate::traits::GraphPass;

/// `add(mm(a, b), c, 1)` (either operand order) becomes `addmm(c, a, b, 1, 1)`
///
/// Only fires when the `mm` result has no other consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseAddmm;

impl FuseAddmm {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn single_use_mm(graph: &ProgramGraph, value: ValueId) -> Option<NodeId> {
    let node = graph.producing_node(value)?;
    (graph.kind(node) == "aten::mm" && graph.uses(value).len() == 1).then_some(node)
}

fn fuse(graph: &mut ProgramGraph, add: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(add).to_vec();
    if inputs.len() != 3 || constant_int(graph, inputs[2]) != Some(1) {
        return Ok(false);
    }
    let (mm, bias) = match (single_use_mm(graph, inputs[0]), single_use_mm(graph, inputs[1])) {
        (Some(mm), _) => (mm, inputs[1]),
        (None, Some(mm)) => (mm, inputs[0]),
        _ => return Ok(false),
    };
    let factors = graph.node_inputs(mm).to_vec();

    let block = graph.root();
    let mut one = || {
        graph.insert_constant(block, Some(add), "prim::Constant", AttrValue::Int(1), JitType::Int)
    };
    let beta = one()?;
    let alpha = one()?;
    let addmm = insert_before(
        graph,
        add,
        "aten::addmm",
        &[bias, factors[0], factors[1], beta, alpha],
        1,
    )?;
    let old = graph.node_outputs(add)[0];
    let new = graph.node_outputs(addmm)[0];
    graph.copy_metadata(new, old)?;
    graph.replace_all_uses_with(old, new);
    graph.destroy_node(add)?;
    graph.destroy_node(mm)?;
    Ok(true)
}

impl GraphPass for FuseAddmm {
    fn name(&self) -> &'static str {
        "FuseAddmm"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) || graph.kind(node) != "aten::add" {
                continue;
            }
            if fuse(graph, node)? {
                result.record("aten::add");
            }
        }
        Ok(result)
    }
}
