//! Flatten tuple values

use crate::error::ExportResult;
use crate::graph::{JitType, NodeId, ProgramGraph, ValueId};
use crate::passes::common::{
    all_nodes, constant_int, insert_after, remove_if_dead, set_block_outputs, PassContext,
    PassResult,
};
use crate::traits::GraphPass;

/// Remove tuples from the graph
///
/// Tuple construction followed by unpacking or constant indexing is
/// forwarded, tuple-valued conditional results are split into one result per
/// element and tuples returned from the graph are flattened.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowerTuples;

impl LowerTuples {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn tuple_construct(graph: &ProgramGraph, value: ValueId) -> Option<NodeId> {
    graph
        .producing_node(value)
        .filter(|&n| graph.kind(n) == "prim::TupleConstruct")
}

fn forward_unpack(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let construct = match tuple_construct(graph, graph.node_inputs(node)[0]) {
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

fn forward_index(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let inputs = graph.node_inputs(node).to_vec();
    let construct = match tuple_construct(graph, inputs[0]) {
        Some(c) => c,
        None => return Ok(false),
    };
    let index = match constant_int(graph, inputs[1]) {
        Some(i) => i,
        None => return Ok(false),
    };
    let elements = graph.node_inputs(construct).to_vec();
    let len = elements.len() as i64;
    let index = if index < 0 { index + len } else { index };
    if !(0..len).contains(&index) {
        return Ok(false);
    }
    let out = graph.node_outputs(node)[0];
    graph.replace_all_uses_with(out, elements[index as usize]);
    graph.destroy_node(node)?;
    remove_if_dead(graph, construct)?;
    Ok(true)
}

/// Split tuple result `offset` of a conditional into one result per element
fn flatten_if_output(graph: &mut ProgramGraph, node: NodeId, offset: usize) -> ExportResult<bool> {
    let old = graph.node_outputs(node)[offset];
    let elem_types = match graph.value_type(old) {
        JitType::Tuple(elems) => elems.clone(),
        _ => return Ok(false),
    };
    let blocks = graph.node_blocks(node).to_vec();
    let constructs: Option<Vec<NodeId>> = blocks
        .iter()
        .map(|&b| tuple_construct(graph, graph.block_outputs(b)[offset]))
        .collect();
    let constructs = match constructs {
        Some(c) if c.iter().all(|&n| graph.node_inputs(n).len() == elem_types.len()) => c,
        _ => return Ok(false),
    };

    let new_outputs: Vec<ValueId> = elem_types
        .into_iter()
        .map(|ty| {
            let v = graph.add_output(node);
            graph.set_type(v, ty);
            v
        })
        .collect();
    for (&block, &construct) in blocks.iter().zip(&constructs) {
        for elem in graph.node_inputs(construct).to_vec() {
            graph.add_block_output(block, elem);
        }
        graph.erase_block_output(block, offset);
    }

    for user in graph.users(old) {
        if graph.kind(user) == "prim::TupleUnpack" {
            let outs = graph.node_outputs(user).to_vec();
            for (out, &new) in outs.into_iter().zip(&new_outputs) {
                graph.replace_all_uses_with(out, new);
            }
            graph.destroy_node(user)?;
        }
    }
    if graph.has_uses(old) {
        let rebuilt = insert_after(graph, node, "prim::TupleConstruct", &new_outputs, 1)?;
        let out = graph.node_outputs(rebuilt)[0];
        graph.copy_metadata(out, old)?;
        graph.replace_all_uses_with(old, out);
    }
    graph.erase_output(node, offset)?;
    for construct in constructs {
        remove_if_dead(graph, construct)?;
    }
    Ok(true)
}

fn flatten_values(
    graph: &ProgramGraph,
    values: &[ValueId],
    out: &mut Vec<ValueId>,
    constructs: &mut Vec<NodeId>,
) {
    for &v in values {
        match tuple_construct(graph, v) {
            Some(c) => {
                constructs.push(c);
                flatten_values(graph, graph.node_inputs(c), out, constructs);
            }
            None => out.push(v),
        }
    }
}

fn flatten_graph_outputs(graph: &mut ProgramGraph) -> ExportResult<bool> {
    let root = graph.root();
    let current = graph.outputs().to_vec();
    let mut flat = Vec::with_capacity(current.len());
    let mut constructs = Vec::new();
    flatten_values(graph, &current, &mut flat, &mut constructs);
    if constructs.is_empty() {
        return Ok(false);
    }
    set_block_outputs(graph, root, &flat);
    for construct in constructs {
        remove_if_dead(graph, construct)?;
    }
    Ok(true)
}

impl GraphPass for LowerTuples {
    fn name(&self) -> &'static str {
        "LowerTuples"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) {
                continue;
            }
            let kind = graph.kind(node).to_string();
            let rewritten = match kind.as_str() {
                "prim::TupleUnpack" => forward_unpack(graph, node)?,
                "prim::TupleIndex" if graph.node_inputs(node).len() == 2 => {
                    forward_index(graph, node)?
                }
                _ => false,
            };
            if rewritten {
                result.record(&kind);
            }
        }

        // innermost conditionals first
        for node in all_nodes(graph).into_iter().rev() {
            if !graph.is_alive(node) || graph.kind(node) != "prim::If" {
                continue;
            }
            for offset in (0..graph.node_outputs(node).len()).rev() {
                if flatten_if_output(graph, node, offset)? {
                    result.record("prim::If");
                }
            }
        }

        if flatten_graph_outputs(graph)? {
            result.record("prim::Return");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportOptions;
    use crate::graph::GraphBuilder;
    use crate::tensor::ScalarType;

    fn run(g: &mut ProgramGraph) -> PassResult {
        let opts = ExportOptions::default();
        LowerTuples::new().run(g, &PassContext::new(&opts)).unwrap()
    }

    #[test]
    fn test_unpack_and_index_forwarded() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.tensor_input("y", ScalarType::Float, &[2]);
        let t = b.tuple(&[x, y]);
        let one = b.constant_int(1);
        let second = b.op("prim::TupleIndex", &[t, one], JitType::tensor());
        let parts = b.op_multi(
            "prim::TupleUnpack",
            &[t],
            &[JitType::tensor(), JitType::tensor()],
        );
        let z = b.op("aten::add", &[parts[0], second], JitType::tensor());
        b.output(z);
        let mut g = b.build();

        assert_eq!(run(&mut g).rewrites, 2);
        let add = g.producing_node(z).unwrap();
        assert_eq!(g.node_inputs(add), &[x, y]);
        assert!(g.nodes().iter().all(|&n| g.kind(n) != "prim::TupleConstruct"));
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_graph_outputs_flattened() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::neg", &[x], JitType::tensor());
        let inner = b.tuple(&[x, y]);
        let outer = b.tuple(&[inner, y]);
        b.output(outer);
        let mut g = b.build();

        run(&mut g);
        assert_eq!(g.outputs(), &[x, y, y]);
        assert_eq!(g.nodes().len(), 1);
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_conditional_tuple_split() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.tensor_input("c", ScalarType::Bool, &[]);
        let pair = JitType::Tuple(vec![JitType::tensor(), JitType::tensor()]);
        let outs = b.if_else(
            c,
            &[pair],
            |b| {
                let n = b.op("aten::neg", &[x], JitType::tensor());
                vec![b.tuple(&[x, n])]
            },
            |b| {
                let r = b.op("aten::relu", &[x], JitType::tensor());
                vec![b.tuple(&[r, x])]
            },
        );
        let parts = b.op_multi(
            "prim::TupleUnpack",
            &[outs[0]],
            &[JitType::tensor(), JitType::tensor()],
        );
        let z = b.op("aten::mul", &[parts[0], parts[1]], JitType::tensor());
        b.output(z);
        let mut g = b.build();

        run(&mut g);
        let node = g.nodes()[0];
        assert_eq!(g.kind(node), "prim::If");
        assert_eq!(g.node_outputs(node).len(), 2);
        for &block in g.node_blocks(node) {
            assert_eq!(g.block_outputs(block).len(), 2);
            assert!(g
                .block_nodes(block)
                .iter()
                .all(|&n| g.kind(n) != "prim::TupleConstruct"));
        }
        let mul = g.producing_node(z).unwrap();
        assert_eq!(g.node_inputs(mul), g.node_outputs(node));
        assert!(g.lint().is_ok());
    }
}
