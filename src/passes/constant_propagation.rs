//! Constant propagation over `aten`/`prim` nodes

use tracing::debug;

use crate::error::{ExportError, ExportResult};
use crate::eval::Evaluator;
use crate::graph::{AttrValue, IValue, JitType, NodeId, ProgramGraph, TensorType};
use crate::passes::common::{all_nodes, constant_int, constant_ivalue, PassContext, PassResult};
use crate::traits::GraphPass;

/// Replace nodes whose inputs are all constants by their value
///
/// Conditionals on a constant condition are replaced by the taken branch.
/// Only runs when `constant_propagation` is enabled.
#[derive(Debug, Default, Clone)]
pub struct ConstantPropagation {
    evaluator: Evaluator,
}

impl ConstantPropagation {
    /// Create the pass
    pub fn new() -> Self {
        Self::default()
    }

    fn candidate(graph: &ProgramGraph, node: NodeId) -> bool {
        let kind = graph.kind(node);
        let native = kind.starts_with("aten::") || kind.starts_with("prim::");
        native
            && !graph.is_constant_kind(node)
            && kind != "prim::GetAttr"
            && graph.node_blocks(node).is_empty()
            && graph.node_outputs(node).len() == 1
    }

    fn fold_node(&self, graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
        let inputs: Option<Vec<IValue>> = graph
            .node_inputs(node)
            .iter()
            .map(|&v| constant_ivalue(graph, v))
            .collect();
        let inputs = match inputs {
            Some(inputs) => inputs,
            None => return Ok(false),
        };
        let kind = graph.kind(node).to_string();
        if kind == "prim::ListConstruct"
            && !inputs
                .iter()
                .all(|v| matches!(v, IValue::Int(_) | IValue::Float(_) | IValue::Bool(_)))
        {
            return Ok(false);
        }

        let value = match self.evaluator.eval_aten(&kind, &inputs) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(false),
            Err(e) => {
                debug!("not propagating {}: {}", kind, e);
                return Ok(false);
            }
        };

        let out = graph.node_outputs(node)[0];
        let ty = match &value {
            IValue::Tensor(t) => JitType::Tensor(TensorType::of(t)),
            IValue::Int(_) => JitType::Int,
            IValue::Float(_) => JitType::Float,
            IValue::Bool(_) => JitType::Bool,
            _ => graph.value_type(out).clone(),
        };
        let constant = graph.insert_constant(
            graph.root(),
            Some(node),
            "prim::Constant",
            AttrValue::from(value),
            ty,
        )?;
        let scope = graph.scope(node).to_string();
        if let Some(c) = graph.producing_node(constant) {
            graph.set_scope(c, &scope);
        }
        graph.replace_all_uses_with(out, constant);
        graph.destroy_node(node)?;
        Ok(true)
    }
}

/// Replace a conditional by the nodes and results of one of its branches
pub(crate) fn inline_branch(
    graph: &mut ProgramGraph,
    node: NodeId,
    take_then: bool,
) -> ExportResult<()> {
    let blocks = graph.node_blocks(node).to_vec();
    if blocks.len() != 2 {
        return Err(ExportError::MalformedControlFlow(format!(
            "prim::If with {} blocks",
            blocks.len()
        )));
    }
    let chosen = if take_then { blocks[0] } else { blocks[1] };
    for inner in graph.block_nodes(chosen).to_vec() {
        graph.move_before(inner, node)?;
    }
    let returns = graph.block_outputs(chosen).to_vec();
    let outputs = graph.node_outputs(node).to_vec();
    if returns.len() != outputs.len() {
        return Err(ExportError::MalformedControlFlow(format!(
            "branch yields {} values for {} outputs",
            returns.len(),
            outputs.len()
        )));
    }
    for (out, ret) in outputs.into_iter().zip(returns) {
        graph.replace_all_uses_with(out, ret);
    }
    graph.destroy_node(node)
}

impl GraphPass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "ConstantPropagation"
    }

    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        if !ctx.options.constant_propagation {
            return Ok(result);
        }
        for node in all_nodes(graph) {
            if !graph.is_alive(node) {
                continue;
            }
            if graph.kind(node) == "prim::If" {
                let cond = graph.node_inputs(node).first().copied();
                if let Some(c) = cond.and_then(|c| constant_int(graph, c)) {
                    inline_branch(graph, node, c != 0)?;
                    result.record("prim::If");
                }
                continue;
            }
            if Self::candidate(graph, node) {
                let kind = graph.kind(node).to_string();
                if self.fold_node(graph, node)? {
                    result.record(&kind);
                }
            }
        }
        Ok(result)
    }
}
