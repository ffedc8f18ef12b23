//! Quantized weight unpacking for the ATen fallback export type

use crate::error::ExportResult;
use crate::graph::{AttrValue, IValue, JitType, NodeId, ProgramGraph, ValueId};
use crate::opset::OperatorExportType;
use crate::passes::common::{
    all_nodes, constant_int_list, insert_after, insert_before, remove_if_dead, PassContext,
    PassResult,
};
use crate::traits::GraphPass;

const QUANTIZED_KINDS: &[&str] = &["quantized::linear", "quantized::conv2d"];

const NCHW_TO_NHWC: [i64; 4] = [0, 2, 3, 1];
const NHWC_TO_NCHW: [i64; 4] = [0, 3, 1, 2];

/// Unpack quantized weights and bracket quantized convolutions with layout
/// permutes
///
/// Only runs for [`OperatorExportType::OnnxAtenFallback`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QuantizationUnpack;

impl QuantizationUnpack {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn packed_params(graph: &ProgramGraph, node: NodeId) -> Option<ValueId> {
    let packed = *graph.node_inputs(node).get(1)?;
    let producer = graph.producing_node(packed)?;
    (graph.kind(producer) == "prim::GetAttr").then_some(packed)
}

fn unpack_weights(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let packed = match packed_params(graph, node) {
        Some(p) => p,
        None => return Ok(false),
    };
    let mut fields = Vec::with_capacity(2);
    for field in ["weight", "bias"] {
        let get = insert_before(graph, node, "prim::GetAttr", &[packed], 1)?;
        graph.set_attr(get, "name", AttrValue::Str(field.to_string()));
        let out = graph.node_outputs(get)[0];
        graph.set_type(out, JitType::tensor());
        fields.push(out);
    }

    let old_inputs = graph.node_inputs(node).to_vec();
    let mut inputs = vec![old_inputs[0], fields[0], fields[1]];
    inputs.extend_from_slice(&old_inputs[2..]);
    let kind = graph.kind(node).to_string();
    let outputs = graph.node_outputs(node).to_vec();
    let rebuilt = insert_before(graph, node, &kind, &inputs, outputs.len())?;
    graph.copy_attributes(rebuilt, node);
    let new_outputs = graph.node_outputs(rebuilt).to_vec();
    for (&new, &old) in new_outputs.iter().zip(&outputs) {
        graph.copy_metadata(new, old)?;
        graph.replace_all_uses_with(old, new);
    }
    graph.destroy_node(node)?;
    Ok(true)
}

fn permute_constant(graph: &mut ProgramGraph, anchor: NodeId, perm: &[i64]) -> ExportResult<ValueId> {
    let block = graph.root();
    let value = IValue::List(perm.iter().map(|&p| IValue::Int(p)).collect());
    graph.insert_constant(
        block,
        Some(anchor),
        "prim::Constant",
        AttrValue::IValue(value),
        JitType::list_of(JitType::Int),
    )
}

fn bracket_conv(graph: &mut ProgramGraph, conv: NodeId) -> ExportResult<()> {
    let x = graph.node_inputs(conv)[0];
    let perm = permute_constant(graph, conv, &NCHW_TO_NHWC)?;
    let to_nhwc = insert_before(graph, conv, "aten::permute", &[x, perm], 1)?;
    let nhwc = graph.node_outputs(to_nhwc)[0];
    graph.replace_input(conv, 0, nhwc);

    let y = graph.node_outputs(conv)[0];
    let to_nchw = insert_after(graph, conv, "aten::permute", &[y], 1)?;
    let perm = permute_constant(graph, to_nchw, &NHWC_TO_NCHW)?;
    graph.add_input(to_nchw, perm);
    let nchw = graph.node_outputs(to_nchw)[0];
    graph.copy_metadata(nchw, y)?;
    graph.replace_all_uses_with(y, nchw);
    graph.replace_input(to_nchw, 0, y);
    Ok(())
}

fn is_permute(graph: &ProgramGraph, node: NodeId, perm: &[i64]) -> bool {
    graph.kind(node) == "aten::permute"
        && graph.node_inputs(node).len() == 2
        && constant_int_list(graph, graph.node_inputs(node)[1]).as_deref() == Some(perm)
}

fn remove_permute_pair(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    if !is_permute(graph, node, &NCHW_TO_NHWC) {
        return Ok(false);
    }
    let inner = match graph.producing_node(graph.node_inputs(node)[0]) {
        Some(inner) if is_permute(graph, inner, &NHWC_TO_NCHW) => inner,
        _ => return Ok(false),
    };
    let source = graph.node_inputs(inner)[0];
    let out = graph.node_outputs(node)[0];
    graph.replace_all_uses_with(out, source);
    graph.destroy_node(node)?;
    remove_if_dead(graph, inner)?;
    Ok(true)
}

impl GraphPass for QuantizationUnpack {
    fn name(&self) -> &'static str {
        "QuantizationUnpack"
    }

    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        if ctx.options.operator_export_type != OperatorExportType::OnnxAtenFallback {
            return Ok(result);
        }

        for node in all_nodes(graph) {
            if graph.is_alive(node) && QUANTIZED_KINDS.contains(&graph.kind(node)) {
                let kind = graph.kind(node).to_string();
                if unpack_weights(graph, node)? {
                    result.record(&kind);
                }
            }
        }
        for node in all_nodes(graph) {
            if graph.is_alive(node) && graph.kind(node) == "quantized::conv2d" {
                bracket_conv(graph, node)?;
                result.record("quantized::conv2d");
            }
        }
        for node in all_nodes(graph) {
            if graph.is_alive(node) && remove_permute_pair(graph, node)? {
                result.record("aten::permute");
            }
        }
        Ok(result)
    }
}
