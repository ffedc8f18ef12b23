//! Program graph arena
//!
//! `ProgramGraph` stores nodes, values and blocks in growable tables indexed
//! by [`NodeId`], [`ValueId`] and [`BlockId`]. Ids are never reused, so an id
//! stays a valid identity for the whole conversion even after the node or
//! value it names has been destroyed.
//!
//! Edges are expressed through value identity: every value knows its
//! producer and the ordered list of its uses, and every node lists its input
//! and output values.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::attr::Attributes;
use super::types::JitType;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Index of a value in the arena, unique for the whole conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) usize);

/// Index of a block in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl NodeId {
    /// Raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl ValueId {
    /// Raw arena index, the value's unique id
    pub fn index(self) -> usize {
        self.0
    }
}

impl BlockId {
    /// Raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Where a value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    /// Output `offset` of a node
    Node {
        /// Producing node
        node: NodeId,
        /// Output position
        offset: usize,
    },
    /// Input parameter `offset` of a block (graph inputs for the root block)
    Param {
        /// Owning block
        block: BlockId,
        /// Parameter position
        offset: usize,
    },
}

/// A consumer of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Use {
    /// Input `offset` of a node
    Node {
        /// Consuming node
        node: NodeId,
        /// Input position
        offset: usize,
    },
    /// Output `offset` of a block (graph outputs for the root block)
    Return {
        /// Returning block
        block: BlockId,
        /// Output position
        offset: usize,
    },
}

/// Node storage
#[derive(Debug, Clone)]
pub struct NodeData {
    pub(crate) kind: String,
    pub(crate) inputs: Vec<ValueId>,
    pub(crate) outputs: Vec<ValueId>,
    pub(crate) attrs: Attributes,
    pub(crate) blocks: SmallVec<[BlockId; 2]>,
    pub(crate) owner: Option<BlockId>,
    pub(crate) scope: String,
    pub(crate) source_range: String,
    pub(crate) alive: bool,
}

/// Value storage
#[derive(Debug, Clone)]
pub struct ValueData {
    pub(crate) debug_name: Option<String>,
    pub(crate) ty: JitType,
    pub(crate) producer: Producer,
    pub(crate) uses: Vec<Use>,
}

/// Block storage
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub(crate) params: Vec<ValueId>,
    pub(crate) returns: Vec<ValueId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) owner: Option<NodeId>,
}

/// Mutable traced program graph
#[derive(Debug, Clone)]
pub struct ProgramGraph {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) values: Vec<ValueData>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) root: BlockId,
    pub(crate) debug_names: FxHashMap<String, ValueId>,
}

impl Default for ProgramGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramGraph {
    /// Create an empty graph with a root block
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            values: Vec::new(),
            blocks: vec![BlockData::default()],
            root: BlockId(0),
            debug_names: FxHashMap::default(),
        }
    }

    /// Root block
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Number of node slots ever allocated; the next created node gets this index
    pub fn node_watermark(&self) -> usize {
        self.nodes.len()
    }

    /// Number of value slots ever allocated; the next created value gets this index
    pub fn value_watermark(&self) -> usize {
        self.values.len()
    }

    // ========================================================================
    // Raw table access
    // ========================================================================

    pub(crate) fn node_data(&self, node: NodeId) -> &NodeData {
        &self.nodes[node.0]
    }

    pub(crate) fn node_data_mut(&mut self, node: NodeId) -> &mut NodeData {
        &mut self.nodes[node.0]
    }

    pub(crate) fn value_data(&self, value: ValueId) -> &ValueData {
        &self.values[value.0]
    }

    pub(crate) fn value_data_mut(&mut self, value: ValueId) -> &mut ValueData {
        &mut self.values[value.0]
    }

    pub(crate) fn block_data(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.0]
    }

    pub(crate) fn block_data_mut(&mut self, block: BlockId) -> &mut BlockData {
        &mut self.blocks[block.0]
    }

    pub(crate) fn alloc_value(&mut self, ty: JitType, producer: Producer) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(ValueData {
            debug_name: None,
            ty,
            producer,
            uses: Vec::new(),
        });
        id
    }

    pub(crate) fn alloc_block(&mut self, owner: Option<NodeId>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockData {
            owner,
            ..Default::default()
        });
        id
    }
}
