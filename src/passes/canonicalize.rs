//! Canonicalize ops the fuser understands

use crate::error::ExportResult;
use crate::graph::{AttrValue, NodeId, ProgramGraph, Use};
use crate::passes::common::{all_nodes, constant_int, insert_before, PassContext, PassResult};
use crate::traits::GraphPass;

/// Turn `aten::chunk` + `prim::ListUnpack` into `prim::ConstantChunk`
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalizeFuserOps;

impl CanonicalizeFuserOps {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn rewrite_chunk(graph: &mut ProgramGraph, chunk: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(chunk).to_vec();
    if inputs.len() != 3 {
        return Ok(false);
    }
    let (chunks, dim) = match (constant_int(graph, inputs[1]), constant_int(graph, inputs[2])) {
        (Some(c), Some(d)) => (c, d),
        _ => return Ok(false),
    };
    let list = graph.node_outputs(chunk)[0];
    let unpack = match graph.uses(list) {
        [Use::Node { node, .. }] if graph.kind(*node) == "prim::ListUnpack" => *node,
        _ => return Ok(false),
    };
    let pieces = graph.node_outputs(unpack).to_vec();
    if pieces.len() as i64 != chunks {
        return Ok(false);
    }

    let fused = insert_before(graph, chunk, "prim::ConstantChunk", &inputs[..1], pieces.len())?;
    graph.set_attr(fused, "chunks", AttrValue::Int(chunks));
    graph.set_attr(fused, "dim", AttrValue::Int(dim));
    let outs = graph.node_outputs(fused).to_vec();
    for (&new, &old) in outs.iter().zip(&pieces) {
        graph.copy_metadata(new, old)?;
        graph.replace_all_uses_with(old, new);
    }
    graph.destroy_node(unpack)?;
    graph.destroy_node(chunk)?;
    Ok(true)
}

impl GraphPass for CanonicalizeFuserOps {
    fn name(&self) -> &'static str {
        "CanonicalizeFuserOps"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) || graph.kind(node) != "aten::chunk" {
                continue;
            }
            if rewrite_chunk(graph, node)? {
                result.record("aten::chunk");
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportOptions;
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    #[test]
    fn test_chunk_becomes_constant_chunk() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[4, 2]);
        let two = b.constant_int(2);
        let zero = b.constant_int(0);
        let list = b.op("aten::chunk", &[x, two, zero], JitType::list_of(JitType::tensor()));
        let parts = b.op_multi(
            "prim::ListUnpack",
            &[list],
            &[JitType::tensor(), JitType::tensor()],
        );
        let y = b.op("aten::add", &[parts[0], parts[1]], JitType::tensor());
        b.output(y);
        let mut g = b.build();

        let opts = ExportOptions::default();
        let res = CanonicalizeFuserOps::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert_eq!(res.rewrites, 1);

        let add = g.producing_node(y).unwrap();
        let fused = g.producing_node(g.node_inputs(add)[0]).unwrap();
        assert_eq!(g.kind(fused), "prim::ConstantChunk");
        assert_eq!(g.attr(fused, "chunks"), Some(&AttrValue::Int(2)));
        assert_eq!(g.node_outputs(fused).len(), 2);
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_dynamic_chunks_untouched() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[4]);
        let n = b.input("n", JitType::Int);
        let zero = b.constant_int(0);
        let list = b.op("aten::chunk", &[x, n, zero], JitType::list_of(JitType::tensor()));
        b.output(list);
        let mut g = b.build();

        let opts = ExportOptions::default();
        let res = CanonicalizeFuserOps::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert!(res.is_empty());
    }
}
