//! Program graph builder
//!
//! Records nodes the way a tracer would: in execution order, each tagged
//! with the module scope active at the time. Used by tracer adapters and
//! throughout the tests.

use tracing::warn;

use crate::tensor::{ScalarType, Tensor};

use super::attr::{AttrValue, IValue};
use super::context::{BlockId, NodeId, ProgramGraph, ValueId};
use super::types::{JitType, TensorType};

/// Incremental builder for a [`ProgramGraph`]
#[derive(Debug)]
pub struct GraphBuilder {
    graph: ProgramGraph,
    name: String,
    block: BlockId,
    scope: String,
    source_range: String,
}

impl GraphBuilder {
    /// Start a graph for the module `name`
    pub fn new(name: &str) -> Self {
        let graph = ProgramGraph::new();
        let block = graph.root();
        Self {
            graph,
            name: name.to_string(),
            block,
            scope: String::new(),
            source_range: String::new(),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Graph under construction
    pub fn graph(&self) -> &ProgramGraph {
        &self.graph
    }

    /// Mutable access for edits the builder does not cover
    pub fn graph_mut(&mut self) -> &mut ProgramGraph {
        &mut self.graph
    }

    /// Scope recorded on subsequently added nodes
    pub fn scope(&mut self, scope: &str) -> &mut Self {
        self.scope = scope.to_string();
        self
    }

    /// Source range recorded on subsequently added nodes
    pub fn source_range(&mut self, range: &str) -> &mut Self {
        self.source_range = range.to_string();
        self
    }

    /// Give a value a debug name; integer names are ignored
    pub fn set_name(&mut self, value: ValueId, name: &str) {
        if let Err(e) = self.graph.set_debug_name(value, name) {
            warn!("ignoring debug name {:?}: {}", name, e);
        }
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Module object input, conventionally the first one
    pub fn self_input(&mut self, class: &str) -> ValueId {
        self.input("self", JitType::Class(class.to_string()))
    }

    /// Graph input of any type
    pub fn input(&mut self, name: &str, ty: JitType) -> ValueId {
        let v = self.graph.add_input_value(ty);
        self.set_name(v, name);
        v
    }

    /// Fully static tensor input
    pub fn tensor_input(&mut self, name: &str, scalar_type: ScalarType, sizes: &[i64]) -> ValueId {
        self.input(name, JitType::tensor_of(scalar_type, sizes))
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Append a node to the current block
    pub fn node(&mut self, kind: &str, inputs: &[ValueId], num_outputs: usize) -> NodeId {
        let node = self.graph.create_node(kind, inputs, num_outputs);
        self.graph.set_scope(node, &self.scope);
        self.graph.set_source_range(node, &self.source_range);
        self.graph.append_node(self.block, node);
        node
    }

    /// Single-output op
    pub fn op(&mut self, kind: &str, inputs: &[ValueId], ty: JitType) -> ValueId {
        self.op_multi(kind, inputs, &[ty])[0]
    }

    /// Multi-output op
    pub fn op_multi(&mut self, kind: &str, inputs: &[ValueId], tys: &[JitType]) -> Vec<ValueId> {
        let node = self.node(kind, inputs, tys.len());
        let outputs = self.graph.node_outputs(node).to_vec();
        for (v, ty) in outputs.iter().zip(tys) {
            self.graph.set_type(*v, ty.clone());
        }
        outputs
    }

    /// Single-output op with attributes
    pub fn op_with_attrs(
        &mut self,
        kind: &str,
        inputs: &[ValueId],
        attrs: &[(&str, AttrValue)],
        ty: JitType,
    ) -> ValueId {
        let out = self.op(kind, inputs, ty);
        if let Some(node) = self.graph.producing_node(out) {
            for (name, value) in attrs {
                self.graph.set_attr(node, name, value.clone());
            }
        }
        out
    }

    // ========================================================================
    // Constants
    // ========================================================================

    /// `prim::Constant` with a payload
    pub fn constant(&mut self, value: AttrValue, ty: JitType) -> ValueId {
        self.op_with_attrs("prim::Constant", &[], &[("value", value)], ty)
    }

    /// Payload-less `prim::Constant` (Python `None`)
    pub fn none(&mut self) -> ValueId {
        self.op("prim::Constant", &[], JitType::None)
    }

    /// Tensor constant
    pub fn constant_tensor(&mut self, tensor: Tensor) -> ValueId {
        let ty = JitType::Tensor(TensorType::of(&tensor));
        self.constant(AttrValue::Tensor(tensor), ty)
    }

    /// int constant
    pub fn constant_int(&mut self, value: i64) -> ValueId {
        self.constant(AttrValue::Int(value), JitType::Int)
    }

    /// float constant
    pub fn constant_float(&mut self, value: f64) -> ValueId {
        self.constant(AttrValue::Float(value), JitType::Float)
    }

    /// bool constant
    pub fn constant_bool(&mut self, value: bool) -> ValueId {
        self.constant(AttrValue::Int(i64::from(value)), JitType::Bool)
    }

    /// str constant
    pub fn constant_str(&mut self, value: &str) -> ValueId {
        self.constant(AttrValue::Str(value.to_string()), JitType::Str)
    }

    /// int[] constant
    pub fn constant_ints(&mut self, values: &[i64]) -> ValueId {
        let list = IValue::List(values.iter().map(|&v| IValue::Int(v)).collect());
        self.constant(AttrValue::IValue(list), JitType::list_of(JitType::Int))
    }

    // ========================================================================
    // Structured values
    // ========================================================================

    /// `prim::GetAttr[name=...]` on a module object
    pub fn get_attr(&mut self, object: ValueId, name: &str, ty: JitType) -> ValueId {
        self.op_with_attrs(
            "prim::GetAttr",
            &[object],
            &[("name", AttrValue::Str(name.to_string()))],
            ty,
        )
    }

    /// `prim::ListConstruct`
    pub fn list(&mut self, elements: &[ValueId], elem_ty: JitType) -> ValueId {
        self.op("prim::ListConstruct", elements, JitType::list_of(elem_ty))
    }

    /// `prim::TupleConstruct`
    pub fn tuple(&mut self, elements: &[ValueId]) -> ValueId {
        let tys = elements
            .iter()
            .map(|v| self.graph.value_type(*v).clone())
            .collect();
        self.op("prim::TupleConstruct", elements, JitType::Tuple(tys))
    }

    /// `prim::If` with two branches built by the given closures
    ///
    /// Each closure returns the values its branch yields; both must yield
    /// `out_tys.len()` values.
    pub fn if_else<T, E>(
        &mut self,
        cond: ValueId,
        out_tys: &[JitType],
        then_branch: T,
        else_branch: E,
    ) -> Vec<ValueId>
    where
        T: FnOnce(&mut Self) -> Vec<ValueId>,
        E: FnOnce(&mut Self) -> Vec<ValueId>,
    {
        let node = self.node("prim::If", &[cond], out_tys.len());
        let outputs = self.graph.node_outputs(node).to_vec();
        for (v, ty) in outputs.iter().zip(out_tys) {
            self.graph.set_type(*v, ty.clone());
        }

        let outer = self.block;
        let then_block = self.graph.add_block(node);
        self.block = then_block;
        for v in then_branch(self) {
            self.graph.add_block_output(then_block, v);
        }

        let else_block = self.graph.add_block(node);
        self.block = else_block;
        for v in else_branch(self) {
            self.graph.add_block_output(else_block, v);
        }

        self.block = outer;
        outputs
    }

    /// `prim::fork` running `body` on `args`
    ///
    /// The body block gets one parameter per argument and yields a single
    /// value; the fork produces a future of it.
    pub fn fork<F>(&mut self, args: &[ValueId], body: F) -> ValueId
    where
        F: FnOnce(&mut Self, &[ValueId]) -> ValueId,
    {
        let node = self.node("prim::fork", args, 1);
        let block = self.graph.add_block(node);
        let params: Vec<ValueId> = args
            .iter()
            .map(|&a| {
                let ty = self.graph.value_type(a).clone();
                self.graph.add_block_input(block, ty)
            })
            .collect();

        let outer = self.block;
        self.block = block;
        let result = body(self, &params);
        self.graph.add_block_output(block, result);
        self.block = outer;

        let future = self.graph.node_outputs(node)[0];
        let ty = JitType::Future(Box::new(self.graph.value_type(result).clone()));
        self.graph.set_type(future, ty);
        future
    }

    /// `aten::wait` on a future
    pub fn wait(&mut self, future: ValueId) -> ValueId {
        let ty = match self.graph.value_type(future) {
            JitType::Future(inner) => (**inner).clone(),
            _ => JitType::tensor(),
        };
        self.op("aten::wait", &[future], ty)
    }

    /// Register a graph output
    pub fn output(&mut self, value: ValueId) -> &mut Self {
        self.graph.register_output(value);
        self
    }

    /// Finish building
    pub fn build(self) -> ProgramGraph {
        self.graph
    }

    /// Finish building, keeping the module name
    pub fn finish(self) -> (String, ProgramGraph) {
        (self.name, self.graph)
    }
}
