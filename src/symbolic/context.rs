//! Node creation for lowering functions

use crate::graph::{AttrValue, BlockId, IValue, JitType, NodeId, ProgramGraph, ValueId};
use crate::tensor::Tensor;

/// Where lowered nodes go
///
/// Every node created through the context is appended to the end of the
/// block being lowered and inherits the scope and source range of the
/// original node. Kinds without a namespace are ONNX operators.
pub struct SymbolicContext<'g> {
    graph: &'g mut ProgramGraph,
    block: BlockId,
    opset: i64,
    scope: String,
    source_range: String,
}

/// Qualify a bare ONNX operator name
fn qualify(kind: &str) -> String {
    if kind.contains("::") {
        kind.to_string()
    } else {
        format!("onnx::{}", kind)
    }
}

impl<'g> SymbolicContext<'g> {
    /// Context appending to `block`
    pub fn new(graph: &'g mut ProgramGraph, block: BlockId, opset: i64) -> Self {
        Self {
            graph,
            block,
            opset,
            scope: String::new(),
            source_range: String::new(),
        }
    }

    /// Tag created nodes with the scope and source range of the original node
    pub fn with_origin(mut self, scope: &str, source_range: &str) -> Self {
        self.scope = scope.to_string();
        self.source_range = source_range.to_string();
        self
    }

    /// Active opset version
    pub fn opset(&self) -> i64 {
        self.opset
    }

    /// Read access to the graph
    pub fn graph(&self) -> &ProgramGraph {
        self.graph
    }

    /// Create a node with `num_outputs` outputs
    pub fn node(&mut self, kind: &str, inputs: &[ValueId], num_outputs: usize) -> NodeId {
        let node = self.graph.create_node(&qualify(kind), inputs, num_outputs);
        self.graph.set_scope(node, &self.scope);
        self.graph.set_source_range(node, &self.source_range);
        self.graph.append_node(self.block, node);
        node
    }

    /// Create a single-output node
    pub fn op(&mut self, kind: &str, inputs: &[ValueId], attrs: &[(&str, AttrValue)]) -> ValueId {
        self.op_multi(kind, inputs, attrs, 1)[0]
    }

    /// Create a node and return all of its outputs
    pub fn op_multi(
        &mut self,
        kind: &str,
        inputs: &[ValueId],
        attrs: &[(&str, AttrValue)],
        num_outputs: usize,
    ) -> Vec<ValueId> {
        let node = self.node(kind, inputs, num_outputs);
        for (name, value) in attrs {
            self.graph.set_attr(node, name, value.clone());
        }
        self.graph.node_outputs(node).to_vec()
    }

    /// Set an attribute on a node created by this context
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: AttrValue) {
        self.graph.set_attr(node, name, value);
    }

    /// Set the type of a created value
    pub fn set_type(&mut self, value: ValueId, ty: JitType) {
        self.graph.set_type(value, ty);
    }

    /// `onnx::Constant` holding `tensor`
    pub fn constant(&mut self, tensor: Tensor) -> ValueId {
        let ty = JitType::Tensor(crate::graph::TensorType::of(&tensor));
        let out = self.op("Constant", &[], &[("value", AttrValue::Tensor(tensor))]);
        self.graph.set_type(out, ty);
        out
    }

    /// 1-d int64 constant
    pub fn constant_ints(&mut self, values: &[i64]) -> ValueId {
        self.constant(Tensor::vec_i64(values))
    }

    /// Payload of a constant input
    pub fn constant_value(&self, value: ValueId) -> Option<IValue> {
        match self.graph.constant_value(value)? {
            IValue::None => None,
            v => Some(v),
        }
    }

    /// Integer payload of a constant input
    pub fn constant_int(&self, value: ValueId) -> Option<i64> {
        self.constant_value(value)?.as_int()
    }

    /// Float payload of a constant input
    pub fn constant_float(&self, value: ValueId) -> Option<f64> {
        self.constant_value(value)?.as_float()
    }

    /// Integer list payload of a constant input
    pub fn constant_int_list(&self, value: ValueId) -> Option<Vec<i64>> {
        match self.constant_value(value)? {
            IValue::Int(i) => Some(vec![i]),
            IValue::Tensor(t) if t.ndim() == 0 => t.item_i64().map(|i| vec![i]),
            v => v.as_int_list(),
        }
    }

    /// Whether an input is the `None` constant
    pub fn is_none(&self, value: ValueId) -> bool {
        self.graph.is_none_constant(value)
    }

    /// Type of a value
    pub fn value_type(&self, value: ValueId) -> &JitType {
        self.graph.value_type(value)
    }

    /// Rank of a tensor value, when known
    pub fn rank(&self, value: ValueId) -> Option<usize> {
        self.graph.value_type(value).as_tensor()?.rank()
    }

    /// Static sizes of a tensor value, when all known
    pub fn static_sizes(&self, value: ValueId) -> Option<Vec<i64>> {
        self.graph.value_type(value).as_tensor()?.static_sizes()
    }

    /// Kind of the node producing `value`
    pub fn producer_kind(&self, value: ValueId) -> Option<&str> {
        self.graph.producing_node(value).map(|n| self.graph.kind(n))
    }

    /// Inputs of the node producing `value`
    pub fn producer_inputs(&self, value: ValueId) -> Vec<ValueId> {
        self.graph
            .producing_node(value)
            .map(|n| self.graph.node_inputs(n).to_vec())
            .unwrap_or_default()
    }
}
