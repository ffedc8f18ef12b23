//! Constant folding of the lowered graph
//!
//! Root-block ONNX nodes whose inputs are all known are evaluated in order.
//! Every folded value still needed by an unfolded consumer becomes a new
//! trailing graph input named `<kind>_<id>`; [`materialize`] then turns
//! those inputs into documented `Constant` nodes and drops them from the
//! graph boundary.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::ExportResult;
use crate::eval::Evaluator;
use crate::export::doc::NodeDocs;
use crate::graph::{AttrValue, JitType, NodeId, ProgramGraph, TensorType, Use, ValueId};
use crate::tensor::Tensor;

/// Evaluate constant subgraphs of the root block
///
/// `params` seeds the known values with module parameters. Returns the
/// folded values by the name of the graph input that now stands for them.
pub fn fold_constants(
    graph: &mut ProgramGraph,
    params: &FxHashMap<ValueId, Tensor>,
    evaluator: &Evaluator,
) -> ExportResult<IndexMap<String, Tensor>> {
    let mut known: FxHashMap<ValueId, Tensor> = params.clone();
    let mut computed: FxHashSet<NodeId> = FxHashSet::default();
    let mut produced: Vec<ValueId> = Vec::new();

    for node in graph.block_nodes(graph.root()).to_vec() {
        if graph.kind(node) == "onnx::Constant" {
            if let Some(AttrValue::Tensor(t)) = graph.attr(node, "value") {
                known.insert(graph.node_outputs(node)[0], t.clone());
            }
            continue;
        }
        if graph.namespace(node) != "onnx" || !graph.node_blocks(node).is_empty() {
            continue;
        }
        let inputs = graph.node_inputs(node);
        if inputs.is_empty() || !inputs.iter().all(|v| known.contains_key(v)) {
            continue;
        }
        let args: Vec<Tensor> = inputs.iter().filter_map(|v| known.get(v).cloned()).collect();
        let op = graph.op_name(node);
        let results = match evaluator.eval_onnx(op, &args, graph.attrs(node)) {
            Ok(Some(results)) if results.len() == graph.node_outputs(node).len() => results,
            Ok(_) => continue,
            Err(e) => {
                debug!("not folding {}: {}", graph.kind(node), e);
                continue;
            }
        };
        for (&out, t) in graph.node_outputs(node).iter().zip(results) {
            known.insert(out, t);
            produced.push(out);
        }
        computed.insert(node);
    }

    let mut folded = IndexMap::new();
    for value in produced {
        let needed = graph.uses(value).iter().any(|u| match u {
            Use::Node { node, .. } => !computed.contains(node),
            Use::Return { .. } => true,
        });
        if !needed {
            continue;
        }
        let (Some(tensor), Some(producer)) = (known.get(&value), graph.producing_node(value))
        else {
            continue;
        };
        let name = format!("{}_{}", graph.kind(producer), value.index());
        let input = graph.add_input_value(JitType::Tensor(TensorType::of(tensor)));
        graph.set_debug_name(input, &name)?;
        graph.replace_all_uses_with(value, input);
        debug!("folded {} into input {}", graph.kind(producer), name);
        folded.insert(name, tensor.clone());
    }
    Ok(folded)
}

/// Replace folded graph inputs by `Constant` nodes
///
/// Each constant takes over the name of the input it replaces and is
/// placed at the front of the root block; the inputs are then removed from
/// the end of the input list. Returns the created constant nodes.
pub fn materialize(
    graph: &mut ProgramGraph,
    folded: &IndexMap<String, Tensor>,
    docs: Option<&mut NodeDocs>,
) -> ExportResult<FxHashSet<NodeId>> {
    let mut created = FxHashSet::default();
    let mut new_docs = Vec::new();
    let root = graph.root();

    let mut replaced = 0;
    for (name, tensor) in folded {
        let input = match graph.value_by_debug_name(name) {
            Some(v) if graph.is_graph_input(v) => v,
            _ => continue,
        };
        let node = graph.create_node("onnx::Constant", &[], 1);
        graph.set_attr(node, "value", AttrValue::Tensor(tensor.clone()));
        graph.prepend_node(root, node);
        let constant = graph.node_outputs(node)[0];
        new_docs.push((node, format!("Constant folded node: {}", graph.value_to_string(input))));
        graph.replace_all_uses_with(input, constant);
        graph.copy_metadata(constant, input)?;
        created.insert(node);
        replaced += 1;
    }

    let keep = graph.inputs().len() - replaced;
    while graph.inputs().len() > keep {
        graph.erase_graph_input(keep)?;
    }

    if let Some(docs) = docs {
        docs.extend(new_docs);
    }
    Ok(created)
}
