//! Shared helpers for optimizer passes

use crate::error::ExportResult;
use crate::export::ExportOptions;
use crate::graph::{BlockId, IValue, JitType, NodeId, ProgramGraph, ValueId};

/// Read-only state available to every pass
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Options of the running export
    pub options: &'a ExportOptions,
}

impl<'a> PassContext<'a> {
    /// Wrap the export options
    pub fn new(options: &'a ExportOptions) -> Self {
        Self { options }
    }
}

/// Statistics of one or more passes
#[derive(Debug, Default, Clone)]
pub struct PassResult {
    /// Number of rewrites applied
    pub rewrites: usize,
    /// Number of nodes removed
    pub nodes_eliminated: usize,
    /// Kinds of rewritten or removed nodes
    pub touched: Vec<String>,
}

impl PassResult {
    /// Create empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rewrite
    pub fn record(&mut self, kind: &str) {
        self.rewrites += 1;
        self.touched.push(kind.to_string());
    }

    /// Record a removed node
    pub fn record_elimination(&mut self, kind: &str) {
        self.nodes_eliminated += 1;
        self.touched.push(kind.to_string());
    }

    /// Merge with another result
    pub fn merge(&mut self, other: PassResult) {
        self.rewrites += other.rewrites;
        self.nodes_eliminated += other.nodes_eliminated;
        self.touched.extend(other.touched);
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.rewrites == 0 && self.nodes_eliminated == 0
    }
}

/// Every live node of every block, outer nodes before the nodes of their
/// blocks
pub fn all_nodes(graph: &ProgramGraph) -> Vec<NodeId> {
    graph.nodes_recursive(graph.root())
}

/// Every block, root first
pub fn all_blocks(graph: &ProgramGraph) -> Vec<BlockId> {
    let mut blocks = vec![graph.root()];
    for node in all_nodes(graph) {
        blocks.extend_from_slice(graph.node_blocks(node));
    }
    blocks
}

/// Constant payload of a value, with bools typed as bools
pub fn constant_ivalue(graph: &ProgramGraph, value: ValueId) -> Option<IValue> {
    let iv = graph.constant_value(value)?;
    Some(match (graph.value_type(value), iv) {
        (JitType::Bool, IValue::Int(i)) => IValue::Bool(i != 0),
        (_, iv) => iv,
    })
}

/// Integer payload of a constant value
pub fn constant_int(graph: &ProgramGraph, value: ValueId) -> Option<i64> {
    constant_ivalue(graph, value).and_then(|iv| iv.as_int())
}

/// Integer list payload of a constant value or of a list built from
/// integer constants
pub fn constant_int_list(graph: &ProgramGraph, value: ValueId) -> Option<Vec<i64>> {
    if let Some(iv) = constant_ivalue(graph, value) {
        return iv.as_int_list();
    }
    let node = graph.producing_node(value)?;
    if graph.kind(node) != "prim::ListConstruct" {
        return None;
    }
    graph
        .node_inputs(node)
        .iter()
        .map(|&v| constant_int(graph, v))
        .collect()
}

/// The module object input, if the graph has one
pub fn self_input(graph: &ProgramGraph) -> Option<ValueId> {
    graph
        .inputs()
        .first()
        .copied()
        .filter(|&v| graph.value_type(v).is_class())
}

/// Replace output 0 of `node` by its input `input` and remove the node
pub fn forward_input(graph: &mut ProgramGraph, node: NodeId, input: usize) -> ExportResult<()> {
    let outputs = graph.node_outputs(node).to_vec();
    let source = graph.node_inputs(node)[input];
    for out in outputs {
        graph.replace_all_uses_with(out, source);
    }
    graph.destroy_node(node)
}

/// Destroy `node` if none of its outputs is used anymore
pub fn remove_if_dead(graph: &mut ProgramGraph, node: NodeId) -> ExportResult<bool> {
    let dead = graph.is_alive(node)
        && graph.node_blocks(node).is_empty()
        && !graph.node_outputs(node).iter().any(|&o| graph.has_uses(o));
    if dead {
        graph.destroy_node(node)?;
    }
    Ok(dead)
}

/// Create a node before `anchor`, inheriting its scope and source range
pub fn insert_before(
    graph: &mut ProgramGraph,
    anchor: NodeId,
    kind: &str,
    inputs: &[ValueId],
    num_outputs: usize,
) -> ExportResult<NodeId> {
    let node = graph.create_node(kind, inputs, num_outputs);
    let scope = graph.scope(anchor).to_string();
    let range = graph.source_range(anchor).to_string();
    graph.set_scope(node, &scope);
    graph.set_source_range(node, &range);
    graph.move_before(node, anchor)?;
    Ok(node)
}

/// Create a node after `anchor`, inheriting its scope and source range
pub fn insert_after(
    graph: &mut ProgramGraph,
    anchor: NodeId,
    kind: &str,
    inputs: &[ValueId],
    num_outputs: usize,
) -> ExportResult<NodeId> {
    let node = insert_before(graph, anchor, kind, inputs, num_outputs)?;
    graph.move_after(node, anchor)?;
    Ok(node)
}

/// Replace every return of a block at once
pub fn set_block_outputs(graph: &mut ProgramGraph, block: BlockId, values: &[ValueId]) {
    for offset in (0..graph.block_outputs(block).len()).rev() {
        graph.erase_block_output(block, offset);
    }
    for &v in values {
        graph.add_block_output(block, v);
    }
}
