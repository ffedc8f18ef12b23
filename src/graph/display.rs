//! Textual dump of a program graph
//!
//! The format follows the tracer's printer so verbose logs read familiar:
//!
//! ```text
//! graph(%x : Float(2, 3)):
//!   %1 : Tensor = aten::relu(%x) # layer
//!   return (%1)
//! ```

use std::fmt::{self, Write};

use super::context::{BlockId, NodeId, ProgramGraph, ValueId};

impl ProgramGraph {
    /// `%name : Type` for a value
    pub fn value_to_string(&self, value: ValueId) -> String {
        format!("%{} : {}", self.debug_name(value), self.value_type(value))
    }

    /// One node, with its nested blocks, without trailing newline
    pub fn node_to_string(&self, node: NodeId) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_node(&mut out, node, 0);
        out.trim_end().to_string()
    }

    fn value_list(&self, values: &[ValueId]) -> String {
        values
            .iter()
            .map(|v| format!("%{}", self.debug_name(*v)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn write_node(&self, f: &mut impl Write, node: NodeId, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        let outputs: Vec<String> = self
            .node_outputs(node)
            .iter()
            .map(|v| self.value_to_string(*v))
            .collect();
        write!(f, "{}{} = {}", pad, outputs.join(", "), self.kind(node))?;

        let attrs = self.attrs(node);
        if !attrs.is_empty() {
            let parts: Vec<String> = attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "[{}]", parts.join(", "))?;
        }
        write!(f, "({})", self.value_list(self.node_inputs(node)))?;

        let scope = self.scope(node);
        if !scope.is_empty() {
            write!(f, " # {}", scope)?;
        }
        writeln!(f)?;

        for (i, &block) in self.node_blocks(node).iter().enumerate() {
            writeln!(
                f,
                "{}  block{}({}):",
                pad,
                i,
                self.value_list(self.block_inputs(block))
            )?;
            self.write_block_body(f, block, indent + 4)?;
            writeln!(
                f,
                "{}    -> ({})",
                pad,
                self.value_list(self.block_outputs(block))
            )?;
        }
        Ok(())
    }

    fn write_block_body(&self, f: &mut impl Write, block: BlockId, indent: usize) -> fmt::Result {
        for &node in self.block_nodes(block) {
            self.write_node(f, node, indent)?;
        }
        Ok(())
    }
}

impl fmt::Display for ProgramGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .inputs()
            .iter()
            .map(|v| self.value_to_string(*v))
            .collect();
        writeln!(f, "graph({}):", params.join(",\n      "))?;
        let mut body = String::new();
        self.write_block_body(&mut body, self.root(), 2)?;
        f.write_str(&body)?;
        writeln!(f, "  return ({})", self.value_list(self.outputs()))
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    #[test]
    fn test_graph_display() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2, 3]);
        b.scope("__module.layer");
        let y = b.op("aten::relu", &[x], JitType::tensor());
        b.output(y);
        let g = b.build();

        let text = g.to_string();
        assert!(text.starts_with("graph(%x : Float(2, 3)):"));
        assert!(text.contains("= aten::relu(%x) # __module.layer"));
        assert!(text.trim_end().ends_with(&format!("return (%{})", y.index())));
    }

    #[test]
    fn test_node_display_with_blocks() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.constant_bool(true);
        let outs = b.if_else(c, &[JitType::tensor()], |_| vec![x], |_| vec![x]);
        b.output(outs[0]);
        let g = b.build();

        let node = g.producing_node(outs[0]).unwrap();
        let text = g.node_to_string(node);
        assert!(text.contains("prim::If"));
        assert!(text.contains("block0()"));
        assert!(text.contains("block1()"));
        assert!(text.contains("-> (%x)"));
    }
}
