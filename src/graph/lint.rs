//! Structural lint
//!
//! Checks that a graph is well formed:
//! - block membership and node ownership agree
//! - every input is defined before use (block parameters and values of
//!   enclosing blocks are visible inside nested blocks)
//! - use lists match node inputs and block returns exactly
//! - destroyed nodes leave no outputs behind with uses

use rustc_hash::FxHashSet;

use super::context::{BlockId, ProgramGraph, Use, ValueId};

impl ProgramGraph {
    /// Run the structural lint, returning a description of the first problem
    pub fn lint(&self) -> Result<(), String> {
        let mut visible = FxHashSet::default();
        self.lint_block(self.root, &mut visible)?;
        self.lint_uses()?;
        Ok(())
    }

    fn lint_block(&self, block: BlockId, visible: &mut FxHashSet<ValueId>) -> Result<(), String> {
        visible.extend(self.block_inputs(block).iter().copied());

        for &node in self.block_nodes(block) {
            let data = self.node_data(node);
            if !data.alive {
                return Err(format!("destroyed {} is still listed in a block", node));
            }
            if data.owner != Some(block) {
                return Err(format!(
                    "{} ({}) is listed in block {} but owned by {:?}",
                    node,
                    data.kind,
                    block.index(),
                    data.owner.map(|b| b.index())
                ));
            }
            for (i, input) in data.inputs.iter().enumerate() {
                if !visible.contains(input) {
                    return Err(format!(
                        "input {} (%{}) of {} ({}) is used before it is defined",
                        i,
                        self.debug_name(*input),
                        node,
                        data.kind
                    ));
                }
            }
            for &sub in &data.blocks {
                if self.block_owner(sub) != Some(node) {
                    return Err(format!("block {} has the wrong owner", sub.index()));
                }
                let mut inner = visible.clone();
                self.lint_block(sub, &mut inner)?;
            }
            visible.extend(data.outputs.iter().copied());
        }

        for (i, ret) in self.block_outputs(block).iter().enumerate() {
            if !visible.contains(ret) {
                return Err(format!(
                    "return {} (%{}) of block {} is not defined in scope",
                    i,
                    self.debug_name(*ret),
                    block.index()
                ));
            }
        }
        Ok(())
    }

    fn lint_uses(&self) -> Result<(), String> {
        for (index, value) in self.values.iter().enumerate() {
            let id = ValueId(index);
            for u in &value.uses {
                let consistent = match *u {
                    Use::Node { node, offset } => {
                        let data = self.node_data(node);
                        data.alive && data.inputs.get(offset) == Some(&id)
                    }
                    Use::Return { block, offset } => {
                        self.block_outputs(block).get(offset) == Some(&id)
                    }
                };
                if !consistent {
                    return Err(format!(
                        "dangling use {:?} of %{}",
                        u,
                        self.debug_name(id)
                    ));
                }
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if !node.alive {
                continue;
            }
            for (offset, input) in node.inputs.iter().enumerate() {
                let expected = Use::Node {
                    node: super::context::NodeId(index),
                    offset,
                };
                if !self.uses(*input).contains(&expected) {
                    return Err(format!(
                        "input {} of node#{} ({}) is missing from the use list of %{}",
                        offset,
                        index,
                        node.kind,
                        self.debug_name(*input)
                    ));
                }
            }
        }

        for (index, block) in self.blocks.iter().enumerate() {
            for (offset, ret) in block.returns.iter().enumerate() {
                let expected = Use::Return {
                    block: BlockId(index),
                    offset,
                };
                if !self.uses(*ret).contains(&expected) {
                    return Err(format!(
                        "return {} of block {} is missing from the use list of %{}",
                        offset,
                        index,
                        self.debug_name(*ret)
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    #[test]
    fn test_well_formed_graph_passes() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::relu", &[x], JitType::tensor());
        b.output(y);
        assert!(b.build().lint().is_ok());
    }

    #[test]
    fn test_branch_sees_outer_values() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.constant_bool(true);
        let outs = b.if_else(
            c,
            &[JitType::tensor()],
            |b| vec![b.op("aten::relu", &[x], JitType::tensor())],
            |b| vec![b.op("aten::neg", &[x], JitType::tensor())],
        );
        b.output(outs[0]);
        assert!(b.build().lint().is_ok());
    }

    #[test]
    fn test_detects_use_before_definition() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::relu", &[x], JitType::tensor());
        let z = b.op("aten::neg", &[y], JitType::tensor());
        b.output(z);
        let mut g = b.build();

        let neg = g.producing_node(z).unwrap();
        let relu = g.producing_node(y).unwrap();
        g.move_before(neg, relu).unwrap();
        let err = g.lint().unwrap_err();
        assert!(err.contains("used before it is defined"));
    }
}
