//! Give integer division floating point semantics

use crate::error::ExportResult;
use crate::graph::{AttrValue, JitType, NodeId, ProgramGraph, TensorType};
use crate::passes::common::{all_nodes, insert_before, PassContext, PassResult};
use crate::tensor::ScalarType;
use crate::traits::GraphPass;

/// Cast both operands of an integer `aten::div` to float
///
/// `aten::div` is true division while ONNX `Div` truncates integers, so the
/// operands are converted before lowering.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrepareDivision;

impl PrepareDivision {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn cast_operands(graph: &mut ProgramGraph, div: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(div).to_vec();
    if inputs.len() < 2
        || !inputs[..2]
            .iter()
            .all(|&v| graph.value_type(v).is_integer_like())
    {
        return Ok(false);
    }
    let block = graph.root();
    for (offset, &operand) in inputs[..2].iter().enumerate() {
        let non_blocking = graph.insert_constant(
            block,
            Some(div),
            "prim::Constant",
            AttrValue::Int(0),
            JitType::Bool,
        )?;
        let cast = insert_before(graph, div, "aten::_cast_Float", &[operand, non_blocking], 1)?;
        let out = graph.node_outputs(cast)[0];
        let sizes = graph
            .value_type(operand)
            .as_tensor()
            .and_then(|t| t.sizes.clone())
            .unwrap_or_default();
        graph.set_type(
            out,
            JitType::Tensor(TensorType {
                scalar_type: Some(ScalarType::Float),
                sizes: Some(sizes),
            }),
        );
        graph.replace_input(div, offset, out);
    }
    Ok(true)
}

impl GraphPass for PrepareDivision {
    fn name(&self) -> &'static str {
        "PrepareDivision"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) || graph.kind(node) != "aten::div" {
                continue;
            }
            if cast_operands(graph, node)? {
                result.record("aten::div");
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportOptions;
    use crate::graph::GraphBuilder;

    #[test]
    fn test_integer_division_cast() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Long, &[3]);
        let y = b.tensor_input("y", ScalarType::Long, &[3]);
        let q = b.op("aten::div", &[x, y], JitType::tensor());
        b.output(q);
        let mut g = b.build();

        let opts = ExportOptions::default();
        let res = PrepareDivision::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert_eq!(res.rewrites, 1);

        let div = g.producing_node(q).unwrap();
        for &operand in g.node_inputs(div) {
            let cast = g.producing_node(operand).unwrap();
            assert_eq!(g.kind(cast), "aten::_cast_Float");
            assert_eq!(
                g.value_type(operand),
                &JitType::tensor_of(ScalarType::Float, &[3])
            );
        }
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_float_division_untouched() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[3]);
        let y = b.tensor_input("y", ScalarType::Long, &[3]);
        let q = b.op("aten::div", &[x, y], JitType::tensor());
        b.output(q);
        let mut g = b.build();

        let opts = ExportOptions::default();
        let res = PrepareDivision::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert!(res.is_empty());
    }
}
