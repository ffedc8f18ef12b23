//! Inline `prim::fork` bodies and resolve `aten::wait`

use crate::error::{ExportError, ExportResult};
use crate::graph::{JitType, NodeId, ProgramGraph};
use crate::passes::common::{all_nodes, insert_before, PassContext, PassResult};
use crate::traits::GraphPass;

/// Run forked bodies synchronously at the fork site
///
/// The body's nodes move in front of the fork, body parameters are bound to
/// the fork arguments and every `aten::wait` on the future yields the body
/// result directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineForkWait;

impl InlineForkWait {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

fn inline_fork(graph: &mut ProgramGraph, fork: NodeId) -> ExportResult<()> {
    let body = *graph.node_blocks(fork).first().ok_or_else(|| {
        ExportError::MalformedControlFlow("prim::fork without a body".to_string())
    })?;
    let args = graph.node_inputs(fork).to_vec();
    let params = graph.block_inputs(body).to_vec();
    if args.len() != params.len() {
        return Err(ExportError::MalformedControlFlow(format!(
            "prim::fork passes {} arguments to a body taking {}",
            args.len(),
            params.len()
        )));
    }
    for (&param, &arg) in params.iter().zip(&args) {
        graph.replace_all_uses_with(param, arg);
    }
    for node in graph.block_nodes(body).to_vec() {
        graph.move_before(node, fork)?;
    }

    let results = graph.block_outputs(body).to_vec();
    let result = match results.as_slice() {
        [single] => *single,
        _ => {
            let tuple = insert_before(graph, fork, "prim::TupleConstruct", &results, 1)?;
            let types = results
                .iter()
                .map(|&v| graph.value_type(v).clone())
                .collect();
            let out = graph.node_outputs(tuple)[0];
            graph.set_type(out, JitType::Tuple(types));
            out
        }
    };

    let future = graph.node_outputs(fork)[0];
    for user in graph.users(future) {
        if graph.kind(user) == "aten::wait" {
            let waited = graph.node_outputs(user)[0];
            graph.replace_all_uses_with(waited, result);
            graph.destroy_node(user)?;
        }
    }
    if graph.has_uses(future) {
        return Err(ExportError::InvalidGraph(format!(
            "future %{} is used by something other than aten::wait",
            graph.debug_name(future)
        )));
    }
    graph.destroy_node(fork)
}

impl GraphPass for InlineForkWait {
    fn name(&self) -> &'static str {
        "InlineForkWait"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        for node in all_nodes(graph) {
            if graph.is_alive(node) && graph.kind(node) == "prim::fork" {
                inline_fork(graph, node)?;
                result.record("prim::fork");
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
    use crate::tensor::ScalarType;

    #[test]
    fn test_fork_is_inlined() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let fut = b.fork(&[x], |b, params| b.op("aten::relu", &[params[0]], JitType::tensor()));
        let y = b.wait(fut);
        let z = b.op("aten::neg", &[y], JitType::tensor());
        b.output(z);
        let mut g = b.build();

        let opts = ExportOptions::default();
        let res = InlineForkWait::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();

        assert_eq!(res.rewrites, 1);
        let kinds: Vec<&str> = g.nodes().iter().map(|&n| g.kind(n)).collect();
        assert_eq!(kinds, vec!["aten::relu", "aten::neg"]);
        let relu = g.nodes()[0];
        assert_eq!(g.node_inputs(relu), &[x]);
        assert!(g.lint().is_ok());
    }
}
