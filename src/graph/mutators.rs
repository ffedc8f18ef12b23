//! Graph mutation operations
//!
//! Creating, placing, rewiring and destroying nodes, plus boundary edits of
//! blocks. Every mutation keeps the use lists in sync with node inputs and
//! block returns.

use crate::error::{ExportError, ExportResult};

use super::attr::AttrValue;
use super::context::{BlockId, NodeData, NodeId, ProgramGraph, Producer, Use, ValueId};
use super::types::JitType;

impl ProgramGraph {
    // ========================================================================
    // Node creation and placement
    // ========================================================================

    /// Create a detached node
    ///
    /// Uses of `inputs` are registered immediately; outputs start with an
    /// unknown tensor type.
    pub fn create_node(&mut self, kind: &str, inputs: &[ValueId], num_outputs: usize) -> NodeId {
        let node = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind: kind.to_string(),
            inputs: inputs.to_vec(),
            outputs: Vec::with_capacity(num_outputs),
            attrs: Default::default(),
            blocks: Default::default(),
            owner: None,
            scope: String::new(),
            source_range: String::new(),
            alive: true,
        });

        for (offset, &input) in inputs.iter().enumerate() {
            self.value_data_mut(input).uses.push(Use::Node { node, offset });
        }
        for offset in 0..num_outputs {
            let out = self.alloc_value(JitType::tensor(), Producer::Node { node, offset });
            self.node_data_mut(node).outputs.push(out);
        }
        node
    }

    /// Append a detached node to the end of a block
    pub fn append_node(&mut self, block: BlockId, node: NodeId) {
        self.detach(node);
        self.block_data_mut(block).nodes.push(node);
        self.node_data_mut(node).owner = Some(block);
    }

    /// Insert a node at the front of a block
    pub fn prepend_node(&mut self, block: BlockId, node: NodeId) {
        self.detach(node);
        self.block_data_mut(block).nodes.insert(0, node);
        self.node_data_mut(node).owner = Some(block);
    }

    /// Place `node` immediately before `anchor`, in the anchor's block
    pub fn move_before(&mut self, node: NodeId, anchor: NodeId) -> ExportResult<()> {
        if node == anchor {
            return Ok(());
        }
        let block = self.node_owner(anchor).ok_or_else(|| {
            ExportError::InvalidGraph(format!("anchor {} is not in a block", anchor))
        })?;
        self.detach(node);
        let pos = self.position(anchor).ok_or_else(|| {
            ExportError::InvalidGraph(format!("anchor {} is not in its block", anchor))
        })?;
        self.block_data_mut(block).nodes.insert(pos, node);
        self.node_data_mut(node).owner = Some(block);
        Ok(())
    }

    /// Place `node` immediately after `anchor`, in the anchor's block
    pub fn move_after(&mut self, node: NodeId, anchor: NodeId) -> ExportResult<()> {
        if node == anchor {
            return Ok(());
        }
        let block = self.node_owner(anchor).ok_or_else(|| {
            ExportError::InvalidGraph(format!("anchor {} is not in a block", anchor))
        })?;
        self.detach(node);
        let pos = self.position(anchor).ok_or_else(|| {
            ExportError::InvalidGraph(format!("anchor {} is not in its block", anchor))
        })?;
        self.block_data_mut(block).nodes.insert(pos + 1, node);
        self.node_data_mut(node).owner = Some(block);
        Ok(())
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(owner) = self.node_data(node).owner {
            self.block_data_mut(owner).nodes.retain(|&n| n != node);
            self.node_data_mut(node).owner = None;
        }
    }

    /// Destroy a node whose outputs are no longer used
    ///
    /// Nested blocks are destroyed with it. Fails if any output still has a
    /// consumer.
    pub fn destroy_node(&mut self, node: NodeId) -> ExportResult<()> {
        if !self.is_alive(node) {
            return Ok(());
        }
        for &out in self.node_outputs(node) {
            if self.has_uses(out) {
                return Err(ExportError::InvalidGraph(format!(
                    "cannot destroy {} ({}): output %{} still has {} uses",
                    node,
                    self.kind(node),
                    self.debug_name(out),
                    self.uses(out).len()
                )));
            }
        }

        let blocks: Vec<BlockId> = self.node_blocks(node).to_vec();
        for block in blocks {
            self.clear_block(block)?;
        }

        self.remove_all_inputs(node);
        self.detach(node);

        let outputs = self.node_outputs(node).to_vec();
        for out in outputs {
            self.release_debug_name(out);
        }
        self.node_data_mut(node).alive = false;
        Ok(())
    }

    fn clear_block(&mut self, block: BlockId) -> ExportResult<()> {
        let returns = std::mem::take(&mut self.block_data_mut(block).returns);
        for (offset, v) in returns.into_iter().enumerate() {
            self.remove_use(v, Use::Return { block, offset });
        }
        let nodes: Vec<NodeId> = self.block_nodes(block).to_vec();
        for node in nodes.into_iter().rev() {
            self.destroy_node(node)?;
        }
        Ok(())
    }

    // ========================================================================
    // Inputs and outputs of nodes
    // ========================================================================

    /// Append an input to a node
    pub fn add_input(&mut self, node: NodeId, value: ValueId) {
        let offset = self.node_inputs(node).len();
        self.node_data_mut(node).inputs.push(value);
        self.value_data_mut(value).uses.push(Use::Node { node, offset });
    }

    /// Replace input `offset` of a node
    pub fn replace_input(&mut self, node: NodeId, offset: usize, value: ValueId) {
        let old = self.node_inputs(node)[offset];
        if old == value {
            return;
        }
        self.remove_use(old, Use::Node { node, offset });
        self.node_data_mut(node).inputs[offset] = value;
        self.value_data_mut(value).uses.push(Use::Node { node, offset });
    }

    /// Remove input `offset` of a node, shifting later inputs down
    pub fn remove_input(&mut self, node: NodeId, offset: usize) {
        let old = self.node_data_mut(node).inputs.remove(offset);
        self.remove_use(old, Use::Node { node, offset });
        let later: Vec<ValueId> = self.node_inputs(node)[offset..].to_vec();
        for (i, v) in later.into_iter().enumerate() {
            let from = Use::Node { node, offset: offset + i + 1 };
            let to = Use::Node { node, offset: offset + i };
            self.retarget_use(v, from, to);
        }
    }

    /// Remove every input of a node
    pub fn remove_all_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self.node_data_mut(node).inputs);
        for (offset, v) in inputs.into_iter().enumerate() {
            self.remove_use(v, Use::Node { node, offset });
        }
    }

    /// Append an output to a node
    pub fn add_output(&mut self, node: NodeId) -> ValueId {
        let offset = self.node_outputs(node).len();
        let out = self.alloc_value(JitType::tensor(), Producer::Node { node, offset });
        self.node_data_mut(node).outputs.push(out);
        out
    }

    /// Remove an unused output of a node, shifting later outputs down
    pub fn erase_output(&mut self, node: NodeId, offset: usize) -> ExportResult<()> {
        let value = self.node_outputs(node)[offset];
        if self.has_uses(value) {
            return Err(ExportError::InvalidGraph(format!(
                "cannot erase output {} of {}: still used",
                offset,
                self.kind(node)
            )));
        }
        self.release_debug_name(value);
        self.node_data_mut(node).outputs.remove(offset);
        let later: Vec<ValueId> = self.node_outputs(node)[offset..].to_vec();
        for (i, v) in later.into_iter().enumerate() {
            self.value_data_mut(v).producer = Producer::Node {
                node,
                offset: offset + i,
            };
        }
        Ok(())
    }

    // ========================================================================
    // Rewiring
    // ========================================================================

    /// Redirect every consumer of `old` to `new` in a single pass
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.value_data_mut(old).uses);
        for u in uses {
            match u {
                Use::Node { node, offset } => self.node_data_mut(node).inputs[offset] = new,
                Use::Return { block, offset } => self.block_data_mut(block).returns[offset] = new,
            }
            self.value_data_mut(new).uses.push(u);
        }
    }

    fn remove_use(&mut self, value: ValueId, u: Use) {
        let uses = &mut self.value_data_mut(value).uses;
        if let Some(pos) = uses.iter().position(|x| *x == u) {
            uses.remove(pos);
        }
    }

    fn retarget_use(&mut self, value: ValueId, from: Use, to: Use) {
        if let Some(slot) = self
            .value_data_mut(value)
            .uses
            .iter_mut()
            .find(|x| **x == from)
        {
            *slot = to;
        }
    }

    // ========================================================================
    // Blocks and graph boundary
    // ========================================================================

    /// Add a nested block to a node
    pub fn add_block(&mut self, node: NodeId) -> BlockId {
        let block = self.alloc_block(Some(node));
        self.node_data_mut(node).blocks.push(block);
        block
    }

    /// Append a parameter to a block
    pub fn add_block_input(&mut self, block: BlockId, ty: JitType) -> ValueId {
        let offset = self.block_inputs(block).len();
        let v = self.alloc_value(ty, Producer::Param { block, offset });
        self.block_data_mut(block).params.push(v);
        v
    }

    /// Append a graph input
    pub fn add_input_value(&mut self, ty: JitType) -> ValueId {
        let root = self.root;
        self.add_block_input(root, ty)
    }

    /// Remove an unused block parameter, shifting later parameters down
    pub fn erase_block_input(&mut self, block: BlockId, offset: usize) -> ExportResult<()> {
        let value = self.block_inputs(block)[offset];
        if self.has_uses(value) {
            return Err(ExportError::InvalidGraph(format!(
                "cannot erase input %{}: still used",
                self.debug_name(value)
            )));
        }
        self.release_debug_name(value);
        self.block_data_mut(block).params.remove(offset);
        let later: Vec<ValueId> = self.block_inputs(block)[offset..].to_vec();
        for (i, v) in later.into_iter().enumerate() {
            self.value_data_mut(v).producer = Producer::Param {
                block,
                offset: offset + i,
            };
        }
        Ok(())
    }

    /// Remove an unused graph input
    pub fn erase_graph_input(&mut self, offset: usize) -> ExportResult<()> {
        let root = self.root;
        self.erase_block_input(root, offset)
    }

    /// Append a return value to a block
    pub fn add_block_output(&mut self, block: BlockId, value: ValueId) -> usize {
        let offset = self.block_outputs(block).len();
        self.block_data_mut(block).returns.push(value);
        self.value_data_mut(value)
            .uses
            .push(Use::Return { block, offset });
        offset
    }

    /// Append a graph output
    pub fn register_output(&mut self, value: ValueId) -> usize {
        let root = self.root;
        self.add_block_output(root, value)
    }

    /// Replace return `offset` of a block
    pub fn set_block_output(&mut self, block: BlockId, offset: usize, value: ValueId) {
        let old = self.block_outputs(block)[offset];
        if old == value {
            return;
        }
        self.remove_use(old, Use::Return { block, offset });
        self.block_data_mut(block).returns[offset] = value;
        self.value_data_mut(value)
            .uses
            .push(Use::Return { block, offset });
    }

    /// Remove return `offset` of a block, shifting later returns down
    pub fn erase_block_output(&mut self, block: BlockId, offset: usize) {
        let old = self.block_data_mut(block).returns.remove(offset);
        self.remove_use(old, Use::Return { block, offset });
        let later: Vec<ValueId> = self.block_outputs(block)[offset..].to_vec();
        for (i, v) in later.into_iter().enumerate() {
            let from = Use::Return { block, offset: offset + i + 1 };
            let to = Use::Return { block, offset: offset + i };
            self.retarget_use(v, from, to);
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Set the inferred type of a value
    pub fn set_type(&mut self, value: ValueId, ty: JitType) {
        self.value_data_mut(value).ty = ty;
    }

    /// Give a value an explicit debug name
    ///
    /// Names made only of digits are reserved for unique ids. If another
    /// value already holds `name`, that value is renamed with a numeric
    /// suffix.
    pub fn set_debug_name(&mut self, value: ValueId, name: &str) -> ExportResult<()> {
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            return Err(ExportError::InvalidGraph(format!(
                "debug names may not be integers: {}",
                name
            )));
        }

        self.release_debug_name(value);
        if name.is_empty() {
            return Ok(());
        }

        if let Some(holder) = self.debug_names.get(name).copied() {
            if holder != value {
                let renamed = self.fresh_debug_name(name);
                self.value_data_mut(holder).debug_name = Some(renamed.clone());
                self.debug_names.insert(renamed, holder);
            }
        }
        self.debug_names.insert(name.to_string(), value);
        self.value_data_mut(value).debug_name = Some(name.to_string());
        Ok(())
    }

    fn fresh_debug_name(&self, base: &str) -> String {
        let mut suffix = 1;
        loop {
            let candidate = format!("{}.{}", base, suffix);
            if !self.debug_names.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn release_debug_name(&mut self, value: ValueId) {
        if let Some(old) = self.value_data_mut(value).debug_name.take() {
            if self.debug_names.get(&old) == Some(&value) {
                self.debug_names.remove(&old);
            }
        }
    }

    /// Copy type and (explicit) debug name from `src` to `dst`
    pub fn copy_metadata(&mut self, dst: ValueId, src: ValueId) -> ExportResult<()> {
        let ty = self.value_type(src).clone();
        self.set_type(dst, ty);
        if let Some(name) = self.explicit_debug_name(src).map(str::to_string) {
            self.set_debug_name(dst, &name)?;
        }
        Ok(())
    }

    /// Set or replace an attribute
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: AttrValue) {
        self.node_data_mut(node).attrs.insert(name.to_string(), value);
    }

    /// Remove an attribute
    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> Option<AttrValue> {
        self.node_data_mut(node).attrs.shift_remove(name)
    }

    /// Copy every attribute of `src` onto `dst`
    pub fn copy_attributes(&mut self, dst: NodeId, src: NodeId) {
        let attrs = self.attrs(src).clone();
        for (k, v) in attrs {
            self.node_data_mut(dst).attrs.insert(k, v);
        }
    }

    /// Set the module scope of a node
    pub fn set_scope(&mut self, node: NodeId, scope: &str) {
        self.node_data_mut(node).scope = scope.to_string();
    }

    /// Set the source location of a node
    pub fn set_source_range(&mut self, node: NodeId, range: &str) {
        self.node_data_mut(node).source_range = range.to_string();
    }

    /// Change the kind of a node in place
    pub fn set_kind(&mut self, node: NodeId, kind: &str) {
        self.node_data_mut(node).kind = kind.to_string();
    }

    /// Insert a constant before `anchor` (or at the end of `block` when no
    /// anchor is given)
    pub fn insert_constant(
        &mut self,
        block: BlockId,
        anchor: Option<NodeId>,
        kind: &str,
        value: AttrValue,
        ty: JitType,
    ) -> ExportResult<ValueId> {
        let node = self.create_node(kind, &[], 1);
        self.set_attr(node, "value", value);
        match anchor {
            Some(anchor) => self.move_before(node, anchor)?,
            None => self.append_node(block, node),
        }
        let out = self.node_outputs(node)[0];
        self.set_type(out, ty);
        Ok(out)
    }
}
