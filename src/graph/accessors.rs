//! Read-only graph queries
//!
//! Navigation over nodes, values and blocks of a [`ProgramGraph`].

use super::attr::{AttrValue, Attributes, IValue};
use super::context::{BlockId, NodeId, ProgramGraph, Producer, Use, ValueId};
use super::types::JitType;

impl ProgramGraph {
    // ========================================================================
    // Graph boundary
    // ========================================================================

    /// Graph inputs (parameters of the root block)
    pub fn inputs(&self) -> &[ValueId] {
        &self.block_data(self.root).params
    }

    /// Graph outputs (returns of the root block)
    pub fn outputs(&self) -> &[ValueId] {
        &self.block_data(self.root).returns
    }

    /// Top-level nodes in execution order
    pub fn nodes(&self) -> &[NodeId] {
        self.block_nodes(self.root)
    }

    /// Check if a value is a graph input
    pub fn is_graph_input(&self, value: ValueId) -> bool {
        matches!(self.producer(value), Producer::Param { block, .. } if block == self.root)
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Nodes of a block in execution order
    pub fn block_nodes(&self, block: BlockId) -> &[NodeId] {
        &self.block_data(block).nodes
    }

    /// Block parameters
    pub fn block_inputs(&self, block: BlockId) -> &[ValueId] {
        &self.block_data(block).params
    }

    /// Block returns
    pub fn block_outputs(&self, block: BlockId) -> &[ValueId] {
        &self.block_data(block).returns
    }

    /// Node owning a block, `None` for the root block
    pub fn block_owner(&self, block: BlockId) -> Option<NodeId> {
        self.block_data(block).owner
    }

    /// Every live node of a block and its nested blocks, in pre-order
    pub fn nodes_recursive(&self, block: BlockId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_nodes(block, &mut out);
        out
    }

    fn collect_nodes(&self, block: BlockId, out: &mut Vec<NodeId>) {
        for &node in self.block_nodes(block) {
            out.push(node);
            for &sub in self.node_blocks(node) {
                self.collect_nodes(sub, out);
            }
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Namespaced kind, e.g. `aten::add`
    pub fn kind(&self, node: NodeId) -> &str {
        &self.node_data(node).kind
    }

    /// Operator part of the kind, e.g. `add` for `aten::add`
    pub fn op_name(&self, node: NodeId) -> &str {
        let kind = self.kind(node);
        kind.rsplit("::").next().unwrap_or(kind)
    }

    /// Namespace part of the kind, e.g. `aten` for `aten::add`
    pub fn namespace(&self, node: NodeId) -> &str {
        let kind = self.kind(node);
        kind.split_once("::").map(|(ns, _)| ns).unwrap_or("")
    }

    /// Input values of a node
    pub fn node_inputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_data(node).inputs
    }

    /// Output values of a node
    pub fn node_outputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_data(node).outputs
    }

    /// First output of a node
    pub fn node_output(&self, node: NodeId) -> Option<ValueId> {
        self.node_outputs(node).first().copied()
    }

    /// Nested blocks of a node
    pub fn node_blocks(&self, node: NodeId) -> &[BlockId] {
        &self.node_data(node).blocks
    }

    /// Attribute map of a node
    pub fn attrs(&self, node: NodeId) -> &Attributes {
        &self.node_data(node).attrs
    }

    /// Attribute by name
    pub fn attr(&self, node: NodeId, name: &str) -> Option<&AttrValue> {
        self.node_data(node).attrs.get(name)
    }

    /// Check for an attribute
    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.node_data(node).attrs.contains_key(name)
    }

    /// Module scope the node was recorded in
    pub fn scope(&self, node: NodeId) -> &str {
        &self.node_data(node).scope
    }

    /// Source location the node was recorded at
    pub fn source_range(&self, node: NodeId) -> &str {
        &self.node_data(node).source_range
    }

    /// Block containing the node, `None` when detached
    pub fn node_owner(&self, node: NodeId) -> Option<BlockId> {
        self.node_data(node).owner
    }

    /// Check whether the node has not been destroyed
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.node_data(node).alive
    }

    /// Position of a node inside its block
    pub fn position(&self, node: NodeId) -> Option<usize> {
        let owner = self.node_owner(node)?;
        self.block_nodes(owner).iter().position(|&n| n == node)
    }

    /// Number of live nodes in the whole graph, nested blocks included
    pub fn live_node_count(&self) -> usize {
        self.nodes_recursive(self.root).len()
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Inferred type of a value
    pub fn value_type(&self, value: ValueId) -> &JitType {
        &self.value_data(value).ty
    }

    /// Producer of a value
    pub fn producer(&self, value: ValueId) -> Producer {
        self.value_data(value).producer
    }

    /// Node producing a value, `None` for block parameters
    pub fn producing_node(&self, value: ValueId) -> Option<NodeId> {
        match self.producer(value) {
            Producer::Node { node, .. } => Some(node),
            Producer::Param { .. } => None,
        }
    }

    /// Consumers of a value in use order
    pub fn uses(&self, value: ValueId) -> &[Use] {
        &self.value_data(value).uses
    }

    /// Check whether a value has any consumer
    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.value_data(value).uses.is_empty()
    }

    /// Nodes consuming a value (block returns excluded)
    pub fn users(&self, value: ValueId) -> Vec<NodeId> {
        self.uses(value)
            .iter()
            .filter_map(|u| match u {
                Use::Node { node, .. } => Some(*node),
                Use::Return { .. } => None,
            })
            .collect()
    }

    /// Explicit debug name, if one was set
    pub fn explicit_debug_name(&self, value: ValueId) -> Option<&str> {
        self.value_data(value).debug_name.as_deref()
    }

    /// Debug name: the explicit name, or the unique id
    pub fn debug_name(&self, value: ValueId) -> String {
        match &self.value_data(value).debug_name {
            Some(name) => name.clone(),
            None => value.index().to_string(),
        }
    }

    /// Value currently holding a debug name
    pub fn value_by_debug_name(&self, name: &str) -> Option<ValueId> {
        self.debug_names.get(name).copied()
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// Check for a constant node kind (`prim::Constant` or `onnx::Constant`)
    pub fn is_constant_kind(&self, node: NodeId) -> bool {
        matches!(self.kind(node), "prim::Constant" | "onnx::Constant")
    }

    /// Payload of the constant producing `value`
    ///
    /// Returns `Some(IValue::None)` for a payload-less `prim::Constant` and
    /// `None` when the value is not produced by a constant at all.
    pub fn constant_value(&self, value: ValueId) -> Option<IValue> {
        let node = self.producing_node(value)?;
        if !self.is_constant_kind(node) {
            return None;
        }
        match self.attr(node, "value") {
            Some(attr) => Some(attr.to_ivalue()),
            None => Some(IValue::None),
        }
    }

    /// Check whether a value is the `None` constant
    pub fn is_none_constant(&self, value: ValueId) -> bool {
        matches!(self.constant_value(value), Some(IValue::None))
    }
}
