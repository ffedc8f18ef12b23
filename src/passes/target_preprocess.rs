//! Target specific cleanup before lowering

use crate::error::ExportResult;
use crate::export::TrainingMode;
use crate::graph::{NodeId, ProgramGraph};
use crate::passes::common::{all_nodes, constant_int, forward_input, PassContext, PassResult};
use crate::traits::GraphPass;

/// Kinds that return their first input unchanged for export purposes
const IDENTITY_KINDS: &[&str] = &["aten::detach", "aten::contiguous", "aten::clone"];

const DROPOUT_KINDS: &[&str] = &["aten::dropout", "aten::feature_dropout"];

/// Remove identity-like ops and inference-time dropout
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetPreprocess;

impl TargetPreprocess {
    /// Create the pass
    pub fn new() -> Self {
        Self
    }
}

/// Whether a dropout is a no-op under the training mode
fn dropout_is_noop(graph: &ProgramGraph, node: NodeId, mode: TrainingMode) -> bool {
    match mode {
        TrainingMode::Eval => true,
        TrainingMode::Train => false,
        TrainingMode::Preserve => graph
            .node_inputs(node)
            .get(2)
            .and_then(|&train| constant_int(graph, train))
            == Some(0),
    }
}

impl GraphPass for TargetPreprocess {
    fn name(&self) -> &'static str {
        "TargetPreprocess"
    }

    fn run(&self, graph: &mut ProgramGraph, ctx: &PassContext) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        let mode = ctx.options.training();
        for node in all_nodes(graph) {
            if !graph.is_alive(node) || graph.node_inputs(node).is_empty() {
                continue;
            }
            let kind = graph.kind(node).to_string();
            let remove = IDENTITY_KINDS.contains(&kind.as_str())
                || (DROPOUT_KINDS.contains(&kind.as_str()) && dropout_is_noop(graph, node, mode));
            if remove {
                forward_input(graph, node, 0)?;
                result.record_elimination(&kind);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportOptions;
    use crate::graph::{GraphBuilder, JitType, ValueId};
    use crate::tensor::ScalarType;

    fn dropout_graph(train: bool) -> (ProgramGraph, ValueId) {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[4]);
        let c = b.op("aten::contiguous", &[x], JitType::tensor());
        let p = b.constant_float(0.5);
        let t = b.constant_bool(train);
        let y = b.op("aten::dropout", &[c, p, t], JitType::tensor());
        b.output(y);
        (b.build(), x)
    }

    fn kinds(g: &ProgramGraph) -> Vec<&str> {
        g.nodes().iter().map(|&n| g.kind(n)).collect()
    }

    #[test]
    fn test_eval_removes_dropout() {
        let (mut g, x) = dropout_graph(true);
        let opts = ExportOptions::default();
        let res = TargetPreprocess::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert_eq!(res.nodes_eliminated, 2);
        assert_eq!(g.outputs(), &[x]);
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_train_keeps_dropout() {
        let (mut g, _) = dropout_graph(true);
        let opts = ExportOptions::default().with_training_mode(TrainingMode::Train);
        TargetPreprocess::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert!(kinds(&g).contains(&"aten::dropout"));
        assert!(!kinds(&g).contains(&"aten::contiguous"));
    }

    #[test]
    fn test_preserve_follows_traced_flag() {
        let opts = ExportOptions::default().with_training_mode(TrainingMode::Preserve);

        let (mut g, _) = dropout_graph(true);
        TargetPreprocess::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert!(kinds(&g).contains(&"aten::dropout"));

        let (mut g, _) = dropout_graph(false);
        TargetPreprocess::new()
            .run(&mut g, &PassContext::new(&opts))
            .unwrap();
        assert!(!kinds(&g).contains(&"aten::dropout"));
    }
}
