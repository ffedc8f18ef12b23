//! Symbolic lowering of the optimized graph
//!
//! Every traced node is replaced by ONNX nodes in one walk over a snapshot
//! of each block. New nodes are appended to the end of the block being
//! lowered; the traced nodes stay in place with their consumers rewired and
//! are removed by dead-code elimination afterwards.
//!
//! Four kinds are handled here instead of through the registry: constants,
//! attribute reads, list construction and conditionals. A conditional is
//! lowered depth-first and then scheduled to move behind every node
//! created before its branches were finished, so it never precedes one of
//! its own inputs.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::{ExportError, ExportResult};
use crate::export::doc::{original_node_doc, symbolic_node_doc, DocLog, NodeDocs};
use crate::export::naming::ValueNames;
use crate::export::ExportOptions;
use crate::graph::{AttrValue, BlockId, IValue, JitType, NodeId, ProgramGraph, TensorType, ValueId};
use crate::opset::ATEN_FALLBACK_KIND;
use crate::symbolic::ops::unsqueeze;
use crate::symbolic::{lookup_key, SymbolicCall, SymbolicContext, SymbolicFn};
use crate::tensor::Tensor;
use crate::traits::SymbolicLookup;

/// Kinds lowered without the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Constant,
    GetAttr,
    ListConstruct,
    If,
}

impl Handler {
    fn for_kind(kind: &str) -> Option<Self> {
        match kind {
            "prim::Constant" => Some(Handler::Constant),
            "prim::GetAttr" => Some(Handler::GetAttr),
            "prim::ListConstruct" => Some(Handler::ListConstruct),
            "prim::If" => Some(Handler::If),
            _ => None,
        }
    }
}

/// A conditional waiting to be moved after lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    node: NodeId,
    block: BlockId,
    /// First node index created after the conditional was lowered
    watermark: usize,
}

/// Lowers traced nodes to ONNX nodes
pub struct Dispatcher<'a> {
    options: &'a ExportOptions,
    registry: &'a dyn SymbolicLookup,
    state_dict: &'a IndexMap<String, Tensor>,
    self_value: Option<ValueId>,
    names: &'a mut ValueNames,
    docs: &'a mut NodeDocs,
    log: &'a mut DocLog,
    pending: Vec<PendingMove>,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher recording aliases into `names` and node doc
    /// strings into `docs`
    pub fn new(
        options: &'a ExportOptions,
        registry: &'a dyn SymbolicLookup,
        state_dict: &'a IndexMap<String, Tensor>,
        self_value: Option<ValueId>,
        names: &'a mut ValueNames,
        docs: &'a mut NodeDocs,
        log: &'a mut DocLog,
    ) -> Self {
        Self {
            options,
            registry,
            state_dict,
            self_value,
            names,
            docs,
            log,
            pending: Vec::new(),
        }
    }

    fn opset(&self) -> i64 {
        self.options.opset_version
    }

    /// Lower every node of `block`, recursing into conditionals
    pub fn lower_block(&mut self, graph: &mut ProgramGraph, block: BlockId) -> ExportResult<()> {
        let snapshot = graph.block_nodes(block).to_vec();
        for node in snapshot {
            if graph.is_alive(node) {
                self.lower_node(graph, block, node)?;
            }
        }
        Ok(())
    }

    fn lower_node(&mut self, graph: &mut ProgramGraph, block: BlockId, node: NodeId) -> ExportResult<()> {
        match Handler::for_kind(graph.kind(node)) {
            Some(Handler::Constant) => self.lower_constant(graph, block, node),
            Some(Handler::GetAttr) => self.lower_get_attr(graph, node),
            Some(Handler::ListConstruct) => self.lower_list_construct(graph, block, node),
            Some(Handler::If) => self.lower_if(graph, block, node),
            None => {
                let func = self.resolve(graph, node)?;
                self.run_symbolic(graph, block, node, func)
            }
        }
    }

    /// Lowering function of a registry-dispatched node
    fn resolve(&self, graph: &ProgramGraph, node: NodeId) -> ExportResult<SymbolicFn> {
        let kind = graph.kind(node);
        let export_type = self.options.operator_export_type;
        let found = if export_type.always_native() {
            None
        } else {
            self.registry
                .lookup(&lookup_key(kind, graph.attrs(node)), self.opset())
        };
        match found {
            Some(func) => Ok(func),
            None if export_type.allows_fallback() => Ok(aten_fallback()),
            None => Err(ExportError::SymbolicFunctionNotFound {
                kind: kind.to_string(),
                opset: self.opset(),
            }),
        }
    }

    /// Run `func` on `node` and splice its results in place of the node's
    /// outputs
    fn run_symbolic(
        &mut self,
        graph: &mut ProgramGraph,
        block: BlockId,
        node: NodeId,
        func: SymbolicFn,
    ) -> ExportResult<()> {
        let kind = graph.kind(node).to_string();
        let mut call = SymbolicCall {
            kind: kind.clone(),
            inputs: graph.node_inputs(node).to_vec(),
            attrs: graph.attrs(node).clone(),
            scalar_args: Vec::new(),
            num_outputs: graph.node_outputs(node).len(),
        };
        call.attrs.shift_remove("inplace");
        if kind == "prim::PythonOp" {
            if let Some(args) = call.attrs.shift_remove("scalar_args") {
                call.scalar_args = match args.to_ivalue() {
                    IValue::List(items) => items,
                    other => vec![other],
                };
            }
        }

        let node_mark = graph.node_watermark();
        let value_mark = graph.value_watermark();
        let scope = graph.scope(node).to_string();
        let range = graph.source_range(node).to_string();

        let outputs = {
            let mut ctx = SymbolicContext::new(graph, block, self.opset()).with_origin(&scope, &range);
            func(&mut ctx, &call)?
        };
        if outputs.len() != call.num_outputs {
            return Err(ExportError::OutputArityMismatch {
                kind,
                expected: call.num_outputs,
                actual: outputs.len(),
            });
        }

        let added = added_nodes(graph, &call.inputs, &outputs, node_mark);
        self.log.log(&format!("Converting node {}", kind), || graph.node_to_string(node));
        if !added.is_empty() {
            self.log.log(&format!("Converted node {}", kind), || {
                added
                    .iter()
                    .map(|&n| graph.node_to_string(n))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        debug!("lowered {} into {} nodes", kind, added.len());

        if self.options.keep_doc_strings() {
            for &sym in &added {
                let doc = symbolic_node_doc(graph, sym, node);
                self.docs.insert(sym, doc);
            }
        }

        let old_outputs = graph.node_outputs(node).to_vec();
        for (old, new) in old_outputs.into_iter().zip(outputs) {
            graph.replace_all_uses_with(old, new);
            if new.index() >= value_mark {
                graph.copy_metadata(new, old)?;
            }
        }
        Ok(())
    }

    fn lower_constant(&mut self, graph: &mut ProgramGraph, block: BlockId, node: NodeId) -> ExportResult<()> {
        // payload-less constants stand for `None` and stay as they are
        if !graph.has_attr(node, "value") {
            return Ok(());
        }
        let func: SymbolicFn = Arc::new(|ctx: &mut SymbolicContext<'_>, call: &SymbolicCall| {
            let value = match call.attrs.get("value") {
                Some(AttrValue::IValue(ival)) => ival.clone(),
                Some(AttrValue::Tensor(t)) => return Ok(vec![ctx.constant(t.clone())]),
                _ => {
                    let node = ctx.node("Constant", &[], 1);
                    for (name, attr) in call.attrs.iter() {
                        ctx.set_attr(node, name, attr.clone());
                    }
                    return Ok(ctx.graph().node_outputs(node).to_vec());
                }
            };
            match value {
                IValue::List(items)
                    if !items.is_empty()
                        && !matches!(
                            items[0],
                            IValue::Int(_) | IValue::Float(_) | IValue::Bool(_)
                        ) =>
                {
                    let mut elements = Vec::with_capacity(items.len());
                    for item in items {
                        let element = match item {
                            IValue::Tensor(t) => ctx.constant(t),
                            // non-tensor elements become payload-less constants
                            _ => {
                                let node = ctx.node("Constant", &[], 1);
                                ctx.graph().node_outputs(node)[0]
                            }
                        };
                        elements.push(element);
                    }
                    Ok(vec![ctx.op("SequenceConstruct", &elements, &[])])
                }
                other => Ok(vec![ctx.constant(other.to_tensor()?)]),
            }
        });
        self.run_symbolic(graph, block, node, func)
    }

    fn lower_get_attr(&mut self, graph: &mut ProgramGraph, node: NodeId) -> ExportResult<()> {
        let input = first_input(graph, node)?;
        let name = graph
            .attr(node, "name")
            .and_then(AttrValue::as_str)
            .ok_or_else(|| ExportError::InvalidGraph("prim::GetAttr without a name".to_string()))?
            .to_string();
        let path = if Some(input) == self.self_value {
            name
        } else {
            let base = self.names.alias(input).ok_or_else(|| {
                ExportError::InvalidGraph(format!(
                    "attribute {} read from a value that is not a module attribute",
                    name
                ))
            })?;
            format!("{}.{}", base, name)
        };

        let out = first_output(graph, node)?;
        if let Some(tensor) = self.state_dict.get(&path) {
            graph.set_type(out, JitType::Tensor(TensorType::of(tensor)));
        }
        self.names.add_alias(out, path);
        Ok(())
    }

    fn lower_list_construct(
        &mut self,
        graph: &mut ProgramGraph,
        block: BlockId,
        node: NodeId,
    ) -> ExportResult<()> {
        let out = first_output(graph, node)?;
        let int_list = graph.value_type(out).element_type() == Some(&JitType::Int);
        let func: SymbolicFn = if int_list && !graph.node_inputs(node).is_empty() {
            Arc::new(|ctx: &mut SymbolicContext<'_>, call: &SymbolicCall| {
                let mut parts = Vec::with_capacity(call.inputs.len());
                for &input in &call.inputs {
                    let scalar =
                        *ctx.value_type(input) == JitType::Int || ctx.rank(input) == Some(0);
                    parts.push(if scalar {
                        unsqueeze(ctx, input, &[0])
                    } else {
                        input
                    });
                }
                Ok(vec![ctx.op("Concat", &parts, &[("axis", AttrValue::Int(0))])])
            })
        } else {
            Arc::new(|ctx: &mut SymbolicContext<'_>, call: &SymbolicCall| {
                if call.inputs.is_empty() {
                    Ok(vec![ctx.op("SequenceEmpty", &[], &[])])
                } else {
                    Ok(vec![ctx.op("SequenceConstruct", &call.inputs, &[])])
                }
            })
        };
        self.run_symbolic(graph, block, node, func)
    }

    fn lower_if(&mut self, graph: &mut ProgramGraph, block: BlockId, node: NodeId) -> ExportResult<()> {
        let doc = format!("\n{}", original_node_doc(graph, node));
        for branch in graph.node_blocks(node).to_vec() {
            self.lower_block(graph, branch)?;
        }
        if self.options.keep_doc_strings() {
            self.docs.insert(node, doc);
        }
        self.pending.push(PendingMove {
            node,
            block,
            watermark: graph.node_watermark(),
        });
        Ok(())
    }

    /// Move every lowered conditional behind the nodes created before its
    /// branches were finished, in the order the conditionals were lowered
    pub fn apply_pending_moves(&mut self, graph: &mut ProgramGraph) -> ExportResult<()> {
        for PendingMove { node, block, watermark } in std::mem::take(&mut self.pending) {
            let anchor = graph
                .block_nodes(block)
                .iter()
                .copied()
                .find(|n| n.index() >= watermark);
            match anchor {
                Some(anchor) => graph.move_before(node, anchor)?,
                None => graph.append_node(block, node),
            }
        }
        Ok(())
    }

    /// Number of conditionals waiting to be moved
    pub fn pending_moves(&self) -> usize {
        self.pending.len()
    }
}

fn first_input(graph: &ProgramGraph, node: NodeId) -> ExportResult<ValueId> {
    graph.node_inputs(node).first().copied().ok_or_else(|| {
        ExportError::InvalidGraph(format!("{} has no inputs", graph.kind(node)))
    })
}

fn first_output(graph: &ProgramGraph, node: NodeId) -> ExportResult<ValueId> {
    graph.node_outputs(node).first().copied().ok_or_else(|| {
        ExportError::InvalidGraph(format!("{} has no outputs", graph.kind(node)))
    })
}

/// Nodes created by a lowering: everything reachable backwards from
/// `outputs` without crossing the original inputs or older nodes
fn added_nodes(
    graph: &ProgramGraph,
    inputs: &[ValueId],
    outputs: &[ValueId],
    watermark: usize,
) -> Vec<NodeId> {
    let boundary: FxHashSet<ValueId> = inputs.iter().copied().collect();
    let mut seen = FxHashSet::default();
    let mut stack: Vec<ValueId> = outputs.to_vec();
    while let Some(value) = stack.pop() {
        if boundary.contains(&value) {
            continue;
        }
        let node = match graph.producing_node(value) {
            Some(n) if n.index() >= watermark => n,
            _ => continue,
        };
        if seen.insert(node) {
            stack.extend_from_slice(graph.node_inputs(node));
        }
    }
    let mut added: Vec<NodeId> = seen.into_iter().collect();
    added.sort_unstable_by_key(|n| n.index());
    added
}

/// Lowering to an opaque `ATen` node carrying the original attributes
fn aten_fallback() -> SymbolicFn {
    Arc::new(|ctx: &mut SymbolicContext<'_>, call: &SymbolicCall| {
        let node = ctx.node(ATEN_FALLBACK_KIND, &call.inputs, call.num_outputs);
        for (name, attr) in call.attrs.iter() {
            ctx.set_attr(node, name, attr.clone());
        }
        let op = call.kind.rsplit("::").next().unwrap_or(&call.kind);
        ctx.set_attr(node, "operator", AttrValue::Str(op.to_string()));
        Ok(ctx.graph().node_outputs(node).to_vec())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::graph::GraphBuilder;
    use crate::opset::OperatorExportType;
    use crate::passes::DeadCodeElimination;
    use crate::symbolic::SymbolicRegistry;
    use crate::tensor::ScalarType;

    struct Lowered {
        graph: ProgramGraph,
        names: ValueNames,
        docs: NodeDocs,
    }

    fn lower_with(
        graph: ProgramGraph,
        options: &ExportOptions,
        state_dict: &IndexMap<String, Tensor>,
    ) -> ExportResult<Lowered> {
        lower_using(graph, options, state_dict, &SymbolicRegistry::with_default_ops())
    }

    fn lower_using(
        graph: ProgramGraph,
        options: &ExportOptions,
        state_dict: &IndexMap<String, Tensor>,
        registry: &SymbolicRegistry,
    ) -> ExportResult<Lowered> {
        let mut graph = graph;
        let mut names = ValueNames::new();
        let mut docs = NodeDocs::default();
        let mut log = DocLog::new("m", false, true);
        let self_value = crate::passes::common::self_input(&graph);
        let mut dispatcher = Dispatcher::new(
            options,
            registry,
            state_dict,
            self_value,
            &mut names,
            &mut docs,
            &mut log,
        );
        let root = graph.root();
        dispatcher.lower_block(&mut graph, root)?;
        dispatcher.apply_pending_moves(&mut graph)?;
        DeadCodeElimination::allowing_side_effects().sweep_graph(&mut graph)?;
        Ok(Lowered { graph, names, docs })
    }

    fn lower(graph: ProgramGraph) -> Lowered {
        lower_with(graph, &ExportOptions::default(), &IndexMap::new()).unwrap()
    }

    fn kinds(g: &ProgramGraph) -> Vec<&str> {
        g.nodes().iter().map(|&n| g.kind(n)).collect()
    }

    #[test]
    fn test_unary_op_rewired() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::relu_", &[x], JitType::tensor_of(ScalarType::Float, &[2]));
        b.output(y);
        let out = lower(b.build());
        let g = &out.graph;

        assert_eq!(kinds(g), vec!["onnx::Relu"]);
        let new_out = g.outputs()[0];
        assert_ne!(new_out, y);
        assert_eq!(g.value_type(new_out), &JitType::tensor_of(ScalarType::Float, &[2]));
        assert!(g.lint().is_ok());
        let relu = g.nodes()[0];
        assert!(out.docs[&relu].starts_with("## Symbolic node\n"));
    }

    #[test]
    fn test_unknown_op_fails() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("aten::frobnicate", &[x], JitType::tensor());
        b.output(y);
        let err = lower_with(b.build(), &ExportOptions::default(), &IndexMap::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ExportError::SymbolicFunctionNotFound { ref kind, opset: 12 } if kind == "aten::frobnicate"
        ));
    }

    #[test]
    fn test_aten_fallback_node() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op_with_attrs(
            "aten::frobnicate",
            &[x],
            &[("level", AttrValue::Int(3))],
            JitType::tensor(),
        );
        b.output(y);
        let options = ExportOptions::default()
            .with_operator_export_type(OperatorExportType::OnnxAtenFallback);
        let out = lower_with(b.build(), &options, &IndexMap::new()).unwrap();
        let g = &out.graph;

        assert_eq!(kinds(g), vec![ATEN_FALLBACK_KIND]);
        let aten = g.nodes()[0];
        assert_eq!(g.attr(aten, "operator"), Some(&AttrValue::Str("frobnicate".into())));
        assert_eq!(g.attr(aten, "level"), Some(&AttrValue::Int(3)));
    }

    #[test]
    fn test_arity_mismatch() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let outs = b.op_multi("aten::twice", &[x], &[JitType::tensor(), JitType::tensor()]);
        b.output(outs[0]).output(outs[1]);
        let graph = b.build();

        let mut registry = SymbolicRegistry::new();
        registry.register("twice", 7, |ctx, call| Ok(vec![ctx.op("Identity", &call.inputs, &[])]));
        let options = ExportOptions::default();
        let state = IndexMap::new();
        let mut names = ValueNames::new();
        let mut docs = NodeDocs::default();
        let mut log = DocLog::new("m", false, true);
        let mut dispatcher =
            Dispatcher::new(&options, &registry, &state, None, &mut names, &mut docs, &mut log);
        let mut graph = graph;
        let root = graph.root();
        let err = dispatcher.lower_block(&mut graph, root).unwrap_err();
        assert!(matches!(
            err,
            ExportError::OutputArityMismatch { expected: 2, actual: 1, .. }
        ));
    }

    #[test]
    fn test_get_attr_aliases() {
        let mut b = GraphBuilder::new("m");
        let this = b.self_input("Net");
        let x = b.tensor_input("x", ScalarType::Float, &[1, 2]);
        let fc = b.get_attr(this, "fc", JitType::Class("Linear".into()));
        let w = b.get_attr(fc, "weight", JitType::tensor());
        let y = b.op("aten::matmul", &[x, w], JitType::tensor());
        b.output(y);

        let mut state = IndexMap::new();
        state.insert("fc.weight".to_string(), Tensor::from_vec_f32(&[2, 3], vec![0.0; 6]).unwrap());
        let out = lower_with(b.build(), &ExportOptions::default(), &state).unwrap();

        assert_eq!(out.names.alias(fc), Some("fc"));
        assert_eq!(out.names.alias(w), Some("fc.weight"));
        assert_eq!(out.graph.value_type(w), &JitType::tensor_of(ScalarType::Float, &[2, 3]));
    }

    #[test]
    fn test_int_list_becomes_concat() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2, 3]);
        let zero = b.constant_tensor(Tensor::scalar_i64(0));
        let n = b.op("aten::size", &[x, zero], JitType::tensor_of(ScalarType::Long, &[]));
        let minus_one = b.constant_tensor(Tensor::scalar_i64(-1));
        let shape = b.list(&[n, minus_one], JitType::Int);
        let y = b.op("aten::view", &[x, shape], JitType::tensor());
        b.output(y);
        let out = lower(b.build());
        let g = &out.graph;

        let ks = kinds(g);
        assert!(ks.contains(&"onnx::Concat"));
        assert_eq!(ks.iter().filter(|k| **k == "onnx::Unsqueeze").count(), 2);
        assert_eq!(ks.last(), Some(&"onnx::Reshape"));
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_tensor_list_becomes_sequence() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let empty = b.list(&[], JitType::tensor());
        let seq = b.list(&[x, x], JitType::tensor());
        b.output(empty).output(seq);
        let out = lower(b.build());
        assert_eq!(
            kinds(&out.graph),
            vec!["onnx::SequenceEmpty", "onnx::SequenceConstruct"]
        );
    }

    #[test]
    fn test_constants() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let none = b.none();
        let two = b.constant_tensor(Tensor::scalar_f32(2.0));
        let y = b.op("aten::add", &[x, two, none], JitType::tensor());
        b.output(y);
        let out = lower(b.build());
        let g = &out.graph;

        assert_eq!(kinds(g), vec!["onnx::Constant", "onnx::Add"]);
        let c = g.nodes().iter().copied().find(|&n| g.kind(n) == "onnx::Constant").unwrap();
        assert_eq!(g.attr(c, "value"), Some(&AttrValue::Tensor(Tensor::scalar_f32(2.0))));
    }

    #[test]
    fn test_if_moved_after_its_inputs() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let s = b.op("aten::sum", &[x], JitType::tensor());
        let cond = b.op("aten::neg", &[s], JitType::tensor_of(ScalarType::Bool, &[]));
        let outs = b.if_else(
            cond,
            &[JitType::tensor()],
            |b| vec![b.op("aten::relu", &[x], JitType::tensor())],
            |b| vec![b.op("aten::neg", &[x], JitType::tensor())],
        );
        let z = b.op("aten::sigmoid", &[outs[0]], JitType::tensor());
        b.output(z);

        let mut registry = SymbolicRegistry::with_default_ops();
        registry.register("sum", 7, |ctx, call| {
            Ok(vec![ctx.op("ReduceSum", &call.inputs[..1], &[("keepdims", AttrValue::Int(0))])])
        });
        let options = ExportOptions::default();
        let state = IndexMap::new();
        let mut names = ValueNames::new();
        let mut docs = NodeDocs::default();
        let mut log = DocLog::new("m", false, true);
        let mut graph = b.build();
        let mut dispatcher =
            Dispatcher::new(&options, &registry, &state, None, &mut names, &mut docs, &mut log);
        let root = graph.root();
        dispatcher.lower_block(&mut graph, root).unwrap();
        assert_eq!(dispatcher.pending_moves(), 1);
        dispatcher.apply_pending_moves(&mut graph).unwrap();
        DeadCodeElimination::allowing_side_effects()
            .sweep_graph(&mut graph)
            .unwrap();

        assert_eq!(
            kinds(&graph),
            vec!["onnx::ReduceSum", "onnx::Neg", "prim::If", "onnx::Sigmoid"]
        );
        assert!(graph.lint().is_ok());
        let if_node = graph.nodes()[2];
        for &branch in graph.node_blocks(if_node) {
            assert_eq!(graph.block_nodes(branch).len(), 1);
            assert_eq!(graph.block_outputs(branch).len(), 1);
        }
        assert!(docs[&if_node].contains("## Original node"));
    }
    fn constant_payloads(g: &ProgramGraph) -> Vec<Option<&AttrValue>> {
        g.nodes()
            .iter()
            .filter(|&&n| g.kind(n) == "onnx::Constant")
            .map(|&n| g.attr(n, "value"))
            .collect()
    }

    #[test]
    fn test_bool_list_constant_becomes_tensor() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Bool, &[2]);
        let mask = b.constant(
            AttrValue::IValue(IValue::List(vec![IValue::Bool(true), IValue::Bool(false)])),
            JitType::list_of(JitType::Bool),
        );
        let y = b.op("aten::mul", &[x, mask], JitType::tensor_of(ScalarType::Bool, &[2]));
        b.output(y);
        let out = lower(b.build());
        let g = &out.graph;

        assert_eq!(kinds(g), vec!["onnx::Constant", "onnx::Mul"]);
        match constant_payloads(g)[0] {
            Some(AttrValue::Tensor(t)) => {
                assert_eq!(t.scalar_type(), ScalarType::Bool);
                assert_eq!(t.to_i64_vec(), vec![1, 0]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_tensor_list_constant_becomes_sequence() {
        let mut b = GraphBuilder::new("m");
        let list = b.constant(
            AttrValue::IValue(IValue::List(vec![
                IValue::Tensor(Tensor::scalar_f32(1.0)),
                IValue::Tensor(Tensor::scalar_f32(2.0)),
            ])),
            JitType::list_of(JitType::tensor()),
        );
        b.output(list);
        let out = lower(b.build());
        let g = &out.graph;

        assert_eq!(
            kinds(g),
            vec!["onnx::Constant", "onnx::Constant", "onnx::SequenceConstruct"]
        );
        let seq = g.nodes()[2];
        assert_eq!(g.node_inputs(seq).len(), 2);
        assert!(constant_payloads(g)
            .iter()
            .all(|p| matches!(p, Some(AttrValue::Tensor(_)))));
        assert!(g.lint().is_ok());
    }

    #[test]
    fn test_optional_list_constant_keeps_none_elements() {
        let mut b = GraphBuilder::new("m");
        let list = b.constant(
            AttrValue::IValue(IValue::List(vec![
                IValue::Tensor(Tensor::scalar_f32(1.0)),
                IValue::None,
            ])),
            JitType::list_of(JitType::tensor()),
        );
        b.output(list);
        let out = lower(b.build());
        let g = &out.graph;

        assert_eq!(
            kinds(g),
            vec!["onnx::Constant", "onnx::Constant", "onnx::SequenceConstruct"]
        );
        let payloads = constant_payloads(g);
        assert!(matches!(payloads[0], Some(AttrValue::Tensor(_))));
        assert!(payloads[1].is_none());
    }

    #[test]
    fn test_python_op_scalar_args() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op_with_attrs(
            "prim::PythonOp",
            &[x],
            &[
                ("name", AttrValue::Str("MyClamp".into())),
                ("scalar_args", AttrValue::Floats(vec![0.0, 6.0])),
                ("inplace", AttrValue::Int(0)),
                ("module", AttrValue::Str("ops".into())),
            ],
            JitType::tensor_of(ScalarType::Float, &[2]),
        );
        b.output(y);

        let seen: Arc<Mutex<Option<SymbolicCall>>> = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let mut registry = SymbolicRegistry::new();
        registry.register("MyClamp", 7, move |ctx, call| {
            *record.lock().unwrap() = Some(call.clone());
            Ok(vec![ctx.op("Clip", &call.inputs, &[])])
        });
        let out = lower_using(b.build(), &ExportOptions::default(), &IndexMap::new(), &registry)
            .unwrap();
        assert_eq!(kinds(&out.graph), vec!["onnx::Clip"]);

        let call = seen.lock().unwrap().take().unwrap();
        assert_eq!(call.kind, "prim::PythonOp");
        assert_eq!(call.scalar_args, vec![IValue::Float(0.0), IValue::Float(6.0)]);
        assert!(!call.attrs.contains_key("scalar_args"));
        assert!(!call.attrs.contains_key("inplace"));
        assert_eq!(call.attrs.get("module"), Some(&AttrValue::Str("ops".into())));
    }

    #[test]
    fn test_get_attr_without_input_is_rejected() {
        let mut b = GraphBuilder::new("m");
        let w = b.op_with_attrs(
            "prim::GetAttr",
            &[],
            &[("name", AttrValue::Str("weight".into()))],
            JitType::tensor(),
        );
        b.output(w);
        let err = lower_with(b.build(), &ExportOptions::default(), &IndexMap::new())
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::InvalidGraph(_)));
    }
}
