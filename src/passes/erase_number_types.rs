//! Replace Python number types by 0-d tensors

use crate::error::ExportResult;
use crate::graph::{AttrValue, IValue, JitType, NodeId, ProgramGraph, TensorType, ValueId};
use crate::passes::common::{
    all_blocks, all_nodes, constant_ivalue, forward_input, PassContext, PassResult,
};
use crate::tensor::{ScalarType, Tensor};
use crate::traits::GraphPass;

/// Conversions between numbers and tensors that become no-ops once numbers
/// are tensors
const NUMBER_CONVERSIONS: &[&str] = &[
    "aten::Int",
    "aten::Float",
    "prim::NumToTensor",
    "prim::ImplicitTensorToNum",
    "aten::ScalarImplicit",
];

/// Erase `int`, `float` and `bool` from the graph
///
/// Number constants become tensor constants, number/tensor conversions are
/// forwarded and every remaining number-typed value is retyped as a 0-d
/// tensor (`int` as Long, `float` as Double, `bool` as Bool).
#[derive(Debug, Default, Clone, Copy)]
pub struct EraseNumberTypes;

impl EraseNumberTypes {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn tensor_type_for(ty: &JitType) -> Option<JitType> {
    let scalar = match ty {
        JitType::Int => ScalarType::Long,
        JitType::Float => ScalarType::Double,
        JitType::Bool => ScalarType::Bool,
        _ => return None,
    };
    Some(JitType::Tensor(TensorType::scalar(scalar)))
}

fn tensor_constant(graph: &mut ProgramGraph, node: NodeId) -> bool {
    let out = graph.node_outputs(node)[0];
    let tensor = match constant_ivalue(graph, out) {
        Some(IValue::Int(i)) => Tensor::scalar_i64(i),
        Some(IValue::Float(f)) => Tensor::scalar_f64(f),
        Some(IValue::Bool(b)) => Tensor::scalar_bool(b),
        _ => return false,
    };
    let ty = JitType::Tensor(TensorType::of(&tensor));
    graph.set_attr(node, "value", AttrValue::Tensor(tensor));
    graph.set_type(out, ty);
    true
}

fn retype(graph: &mut ProgramGraph, value: ValueId) -> bool {
    match tensor_type_for(graph.value_type(value)) {
        Some(ty) => {
            graph.set_type(value, ty);
            true
        }
        None => false,
    }
}

impl GraphPass for EraseNumberTypes {
    fn name(&self) -> &'static str {
        "EraseNumberTypes"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) {
                continue;
            }
            let kind = graph.kind(node).to_string();
            if kind == "prim::Constant" {
                let out = graph.node_outputs(node)[0];
                if graph.value_type(out).is_number() && tensor_constant(graph, node) {
                    result.record(&kind);
                }
            } else if NUMBER_CONVERSIONS.contains(&kind.as_str())
                && !graph.node_inputs(node).is_empty()
            {
                forward_input(graph, node, 0)?;
                result.record_elimination(&kind);
            }
        }

        let mut values: Vec<ValueId> = Vec::new();
        for block in all_blocks(graph) {
            values.extend_from_slice(graph.block_inputs(block));
        }
        for node in all_nodes(graph) {
            values.extend_from_slice(graph.node_outputs(node));
        }
        for value in values {
            if retype(graph, value) {
                result.record("number");
            }
        }
        Ok(result)
    }
}
