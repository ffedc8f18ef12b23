//! Dead code elimination

use crate::error::ExportResult;
use crate::graph::{BlockId, NodeId, ProgramGraph};
use crate::passes::common::{PassContext, PassResult};
use crate::traits::GraphPass;

/// Kinds kept even when their outputs are unused
const SIDE_EFFECT_KINDS: &[&str] = &["prim::Print", "prim::RaiseException", "aten::warn"];

/// Remove nodes whose outputs are never used
///
/// Blocks are swept bottom-up so a chain of dead nodes goes in one pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCodeElimination {
    allow_side_effects: bool,
}

impl DeadCodeElimination {
    /// Keep side-effecting nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove side-effecting nodes too
    pub fn allowing_side_effects() -> Self {
        Self {
            allow_side_effects: true,
        }
    }

    /// Run outside the optimizer pipeline
    pub fn sweep_graph(&self, graph: &mut ProgramGraph) -> ExportResult<PassResult> {
        let mut result = PassResult::new();
        self.sweep(graph, graph.root(), &mut result)?;
        Ok(result)
    }

    fn sweep(
        &self,
        graph: &mut ProgramGraph,
        block: BlockId,
        result: &mut PassResult,
    ) -> ExportResult<()> {
        for node in graph.block_nodes(block).to_vec().into_iter().rev() {
            for sub in graph.node_blocks(node).to_vec() {
                self.sweep(graph, sub, result)?;
            }
            if self.removable(graph, node) {
                let kind = graph.kind(node).to_string();
                graph.destroy_node(node)?;
                result.record_elimination(&kind);
            }
        }
        Ok(())
    }

    fn removable(&self, graph: &ProgramGraph, node: NodeId) -> bool {
        if graph
            .node_outputs(node)
            .iter()
            .any(|&out| graph.has_uses(out))
        {
            return false;
        }
        self.allow_side_effects || !has_side_effects(graph, node)
    }
}

fn has_side_effects(graph: &ProgramGraph, node: NodeId) -> bool {
    SIDE_EFFECT_KINDS.contains(&graph.kind(node))
        || graph.node_blocks(node).iter().any(|&b| {
            graph
                .block_nodes(b)
                .iter()
                .any(|&n| has_side_effects(graph, n))
        })
}

impl GraphPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "DeadCodeElimination"
    }

    fn run(&self, graph: &mut ProgramGraph, _ctx: &PassContext) -> ExportResult<PassResult> {
        self.sweep_graph(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    #[test]
    fn test_removes_dead_chain() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let dead = b.op("aten::relu", &[x], JitType::tensor());
        b.op("aten::neg", &[dead], JitType::tensor());
        let live = b.op("aten::sigmoid", &[x], JitType::tensor());
        b.output(live);
        let mut g = b.build();

        let res = DeadCodeElimination::new().sweep_graph(&mut g).unwrap();
        assert_eq!(res.nodes_eliminated, 2);
        assert_eq!(g.nodes().len(), 1);
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_side_effects_kept_unless_allowed() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        b.node("prim::Print", &[x], 0);
        b.output(x);
        let mut g = b.build();

        DeadCodeElimination::new().sweep_graph(&mut g).unwrap();
        assert_eq!(g.nodes().len(), 1);

        DeadCodeElimination::allowing_side_effects()
            .sweep_graph(&mut g)
            .unwrap();
        assert!(g.nodes().is_empty());
    }

    #[test]
    fn test_sweeps_inside_blocks() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.tensor_input("c", ScalarType::Bool, &[]);
        let outs = b.if_else(
            c,
            &[JitType::tensor()],
            |b| {
                b.op("aten::exp", &[x], JitType::tensor());
                vec![x]
            },
            |b| vec![b.op("aten::neg", &[x], JitType::tensor())],
        );
        b.output(outs[0]);
        let mut g = b.build();

        DeadCodeElimination::new().sweep_graph(&mut g).unwrap();
        let node = g.producing_node(outs[0]).unwrap();
        let then_block = g.node_blocks(node)[0];
        assert!(g.block_nodes(then_block).is_empty());
        assert!(g.lint().is_ok());
    }
}
