//! Local algebraic simplifications

use crate::error::ExportResult;
use crate::graph::{NodeId, ProgramGraph, ValueId};
use crate::passes::common::{
    all_nodes, constant_int_list, forward_input, remove_if_dead, PassContext, PassResult,
};
use crate::traits::GraphPass;

/// Peephole rewrites on single nodes and their producers
///
/// - `t(t(x))` becomes `x`
/// - `type_as(x, y)` becomes `x` when both have the same scalar type
/// - `expand(x, sizes)` becomes `x` when `sizes` equals the static sizes of `x`
/// - `ListUnpack(ListConstruct(a, b, ..))` becomes `a, b, ..`
#[derive(Debug, Default, Clone, Copy)]
pub struct Peephole;

impl Peephole {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn producer_of_kind(graph: &ProgramGraph, value: ValueId, kind: &str) -> Option<NodeId> {
    graph
        .producing_node(value)
        .filter(|&n| graph.kind(n) == kind)
}

fn double_transpose(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let inner = match producer_of_kind(graph, graph.node_inputs(node)[0], "aten::t") {
        Some(inner) => inner,
        None => return Ok(false),
    };
    let source = graph.node_inputs(inner)[0];
    let out = graph.node_outputs(node)[0];
    graph.replace_all_uses_with(out, source);
    graph.destroy_node(node)?;
    remove_if_dead(graph, inner)?;
    Ok(true)
}

fn redundant_type_as(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(node);
    let lhs = graph.value_type(inputs[0]).as_tensor().and_then(|t| t.scalar_type);
    let rhs = graph.value_type(inputs[1]).as_tensor().and_then(|t| t.scalar_type);
    match (lhs, rhs) {
        (Some(a), Some(b)) if a == b => {
            forward_input(graph, node, 0)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn redundant_expand(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(node);
    let current = graph
        .value_type(inputs[0])
        .as_tensor()
        .and_then(|t| t.static_sizes());
    let target = constant_int_list(graph, inputs[1]);
    match (current, target) {
        (Some(cur), Some(tgt)) if cur == tgt => {
            let sizes = graph.producing_node(inputs[1]);
            forward_input(graph, node, 0)?;
            if let Some(sizes) = sizes {
                remove_if_dead(graph, sizes)?;
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn unpack_of_construct(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let list = graph.node_inputs(node)[0];
    let construct = match producer_of_kind(graph, list, "prim::ListConstruct") {
        Some(c) => c,
        None => return Ok(false),
    };
    let elements = graph.node_inputs(construct).to_vec();
    let outputs = graph.node_outputs(node).to_vec();
    if elements.len() != outputs.len() {
        return Ok(false);
    }
    for (out, elem) in outputs.into_iter().zip(elements) {
        graph.replace_all_uses_with(out, elem);
    }
    graph.destroy_node(node)?;
    remove_if_dead(graph, construct)?;
    Ok(true)
}

impl GraphPass for Peephole {
    fn name(&self) -> &'static str {
        "Peephole"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) {
                continue;
            }
            let kind = graph.kind(node).to_string();
            let arity = graph.node_inputs(node).len();
            let rewritten = match kind.as_str() {
                "aten::t" if arity == 1 => double_transpose(graph, node)?,
                "aten::type_as" if arity == 2 => redundant_type_as(graph, node)?,
                "aten::expand" if arity >= 2 => redundant_expand(graph, node)?,
                "prim::ListUnpack" if arity == 1 => unpack_of_construct(graph, node)?,
                _ => false,
            };
            if rewritten {
                result.record(&kind);
            }
        }
        Ok(result)
    }
}
