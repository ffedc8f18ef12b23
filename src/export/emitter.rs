//! Emission of the lowered graph as ONNX protos
//!
//! One walk per block turns every remaining node into a `NodeProto`.
//! Conditionals become `If` nodes whose branches are emitted recursively as
//! `then_branch`/`else_branch` subgraphs. Parameters and folded constants
//! are collected as initializers instead of nodes.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;

use crate::error::{ExportError, ExportResult};
use crate::export::doc::NodeDocs;
use crate::export::naming::ValueNames;
use crate::export::type_proto::project;
use crate::graph::{AttrValue, BlockId, IValue, NodeId, ProgramGraph, ValueId};
use crate::opset::{domain_of_kind, op_type_of_kind};
use crate::proto::extensions::{make_graph, make_value_info};
use crate::proto::{AttributeProto, GraphProto, NodeProto, TensorProto, ValueInfoProto};
use crate::tensor::{tensor_to_proto, Tensor};

const BRANCH_ATTRS: [&str; 2] = ["then_branch", "else_branch"];

/// Walks lowered blocks and produces ONNX nodes
pub struct Emitter<'a> {
    state_dict: &'a IndexMap<String, Tensor>,
    self_value: Option<ValueId>,
    docs: &'a NodeDocs,
    folded: &'a FxHashSet<NodeId>,
    keep_doc_strings: bool,
    names: &'a mut ValueNames,
    initializers: IndexMap<String, TensorProto>,
    domains: IndexSet<String>,
}

impl<'a> Emitter<'a> {
    /// Create an emitter
    ///
    /// `folded` holds the constant nodes that stand for folded inputs; they
    /// are emitted as initializers.
    pub fn new(
        state_dict: &'a IndexMap<String, Tensor>,
        self_value: Option<ValueId>,
        docs: &'a NodeDocs,
        folded: &'a FxHashSet<NodeId>,
        keep_doc_strings: bool,
        names: &'a mut ValueNames,
    ) -> Self {
        Self {
            state_dict,
            self_value,
            docs,
            folded,
            keep_doc_strings,
            names,
            initializers: IndexMap::new(),
            domains: IndexSet::new(),
        }
    }

    /// Emit the nodes of one block
    ///
    /// Node names are `<op>_<n>` with `n` counting from 1 within this call.
    pub fn emit_block(
        &mut self,
        graph: &ProgramGraph,
        block: BlockId,
    ) -> ExportResult<Vec<NodeProto>> {
        let mut counter = 0;
        let mut nodes = Vec::new();
        for &node in graph.block_nodes(block) {
            if self.skip(graph, node) {
                continue;
            }
            if self.folded.contains(&node) {
                self.emit_folded(graph, node)?;
                continue;
            }
            counter += 1;
            let name = format!("{}_{}", op_type_of_kind(graph.kind(node)), counter);
            nodes.push(self.emit_node(graph, node, name)?);
        }
        Ok(nodes)
    }

    /// Name of a value, as used by the emitted nodes
    pub fn value_name(&mut self, graph: &ProgramGraph, value: ValueId) -> String {
        self.names.resolve(graph, value)
    }

    /// Initializers collected so far, in first-use order
    pub fn initializers(&self) -> impl Iterator<Item = &TensorProto> {
        self.initializers.values()
    }

    /// Consume the emitter, returning the initializers and the non-default
    /// domains of the emitted nodes
    pub fn finish(self) -> (Vec<TensorProto>, Vec<String>) {
        (
            self.initializers.into_values().collect(),
            self.domains.into_iter().collect(),
        )
    }

    fn skip(&self, graph: &ProgramGraph, node: NodeId) -> bool {
        match graph.kind(node) {
            "prim::GetAttr" => true,
            "onnx::Constant" => graph.node_outputs(node).iter().all(|&v| !graph.has_uses(v)),
            "prim::Constant" => !graph.has_attr(node, "value"),
            _ => false,
        }
    }

    fn emit_folded(&mut self, graph: &ProgramGraph, node: NodeId) -> ExportResult<()> {
        let tensor = match graph.attr(node, "value") {
            Some(AttrValue::Tensor(t)) => t,
            _ => {
                return Err(ExportError::Internal(format!(
                    "folded constant {} has no tensor value",
                    node
                )))
            }
        };
        let name = self.value_name(graph, graph.node_outputs(node)[0]);
        let proto = tensor_to_proto(tensor, &name);
        self.initializers.entry(name).or_insert(proto);
        Ok(())
    }

    fn input_name(&mut self, graph: &ProgramGraph, value: ValueId) -> ExportResult<String> {
        if let Some(path) = self.names.alias(value) {
            if !self.initializers.contains_key(path) {
                let tensor = self
                    .state_dict
                    .get(path)
                    .ok_or_else(|| ExportError::MissingParameter(path.to_string()))?;
                let proto = tensor_to_proto(tensor, path);
                self.initializers.insert(path.to_string(), proto);
            }
        }
        Ok(self.value_name(graph, value))
    }

    fn emit_node(
        &mut self,
        graph: &ProgramGraph,
        node: NodeId,
        name: String,
    ) -> ExportResult<NodeProto> {
        let kind = graph.kind(node);
        let mut proto = NodeProto {
            op_type: op_type_of_kind(kind).to_string(),
            domain: domain_of_kind(kind).to_string(),
            ..Default::default()
        };
        if !proto.domain.is_empty() {
            self.domains.insert(proto.domain.clone());
        }

        let blocks = graph.node_blocks(node);
        if kind == "prim::If" {
            if blocks.len() != BRANCH_ATTRS.len() {
                return Err(ExportError::MalformedControlFlow(format!(
                    "{} has {} blocks, expected 2",
                    graph.node_to_string(node),
                    blocks.len()
                )));
            }
            if let Some(pending) = self.docs.get(&node) {
                proto.doc_string = format!(
                    "## Symbolic node\n{}\n{}",
                    graph.node_to_string(node),
                    pending
                );
            }
            for (&attr, &branch) in BRANCH_ATTRS.iter().zip(blocks) {
                let subgraph = self.emit_branch(
                    graph,
                    branch,
                    &format!("{}_{}", name, attr),
                    &proto.doc_string,
                )?;
                proto.attribute.push(AttributeProto::new_graph(attr, subgraph));
            }
        } else {
            if !blocks.is_empty() {
                return Err(ExportError::MalformedControlFlow(format!(
                    "{} has blocks but is not a conditional",
                    kind
                )));
            }
            if let Some(doc) = self.docs.get(&node) {
                proto.doc_string = doc.clone();
            }
            for (attr, value) in graph.attrs(node) {
                proto.attribute.push(attribute_proto(attr, value)?);
            }
        }

        for &input in graph.node_inputs(node) {
            if Some(input) == self.self_value {
                continue;
            }
            proto.input.push(self.input_name(graph, input)?);
        }
        for &output in graph.node_outputs(node) {
            proto.output.push(self.value_name(graph, output));
        }
        proto.name = name;
        Ok(proto)
    }

    fn emit_branch(
        &mut self,
        graph: &ProgramGraph,
        block: BlockId,
        name: &str,
        doc: &str,
    ) -> ExportResult<GraphProto> {
        let nodes = self.emit_block(graph, block)?;
        let inputs = graph
            .block_inputs(block)
            .iter()
            .map(|&v| self.branch_value_info(graph, v))
            .collect::<ExportResult<Vec<_>>>()?;
        let outputs = graph
            .block_outputs(block)
            .iter()
            .map(|&v| self.branch_value_info(graph, v))
            .collect::<ExportResult<Vec<_>>>()?;
        Ok(make_graph(name, nodes, inputs, outputs, Vec::new(), doc))
    }

    fn branch_value_info(
        &mut self,
        graph: &ProgramGraph,
        value: ValueId,
    ) -> ExportResult<ValueInfoProto> {
        let ty = project(graph.value_type(value))?;
        let name = self.value_name(graph, value);
        let doc = if self.keep_doc_strings {
            graph.value_to_string(value)
        } else {
            String::new()
        };
        Ok(make_value_info(&name, Some(ty), &doc))
    }
}

/// Convert a node attribute
///
/// Generic constants are accepted when they map onto a single ONNX
/// attribute type; lists must be homogeneous.
pub fn attribute_proto(name: &str, value: &AttrValue) -> ExportResult<AttributeProto> {
    let proto = match value {
        AttrValue::Int(i) => AttributeProto::new_int(name, *i),
        AttrValue::Float(f) => AttributeProto::new_float(name, *f as f32),
        AttrValue::Str(s) => AttributeProto::new_string(name, s),
        AttrValue::Tensor(t) => AttributeProto::new_tensor(name, tensor_to_proto(t, "")),
        AttrValue::Ints(v) => AttributeProto::new_ints(name, v.clone()),
        AttrValue::Floats(v) => {
            AttributeProto::new_floats(name, v.iter().map(|&f| f as f32).collect())
        }
        AttrValue::Strings(v) => AttributeProto::new_strings(name, v),
        AttrValue::Tensors(v) => AttributeProto::new_tensors(
            name,
            v.iter().map(|t| tensor_to_proto(t, "")).collect(),
        ),
        AttrValue::IValue(IValue::List(items)) => list_attribute(name, items)?,
        AttrValue::IValue(IValue::None) => {
            return Err(ExportError::UnsupportedType(format!(
                "attribute {} is None",
                name
            )))
        }
        AttrValue::IValue(scalar) => attribute_proto(name, &AttrValue::from(scalar.clone()))?,
    };
    Ok(proto)
}

fn list_attribute(name: &str, items: &[IValue]) -> ExportResult<AttributeProto> {
    let ints: Option<Vec<i64>> = items
        .iter()
        .map(|v| match v {
            IValue::Int(i) => Some(*i),
            IValue::Bool(b) => Some(*b as i64),
            _ => None,
        })
        .collect();
    if let Some(ints) = ints {
        return Ok(AttributeProto::new_ints(name, ints));
    }
    let floats: Option<Vec<f32>> = items
        .iter()
        .map(|v| match v {
            IValue::Int(i) => Some(*i as f32),
            IValue::Float(f) => Some(*f as f32),
            _ => None,
        })
        .collect();
    if let Some(floats) = floats {
        return Ok(AttributeProto::new_floats(name, floats));
    }
    let strings: Option<Vec<String>> = items
        .iter()
        .map(|v| match v {
            IValue::Str(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    if let Some(strings) = strings {
        return Ok(AttributeProto::new_strings(name, &strings));
    }
    let tensors: Option<Vec<TensorProto>> = items
        .iter()
        .map(|v| match v {
            IValue::Tensor(t) => Some(tensor_to_proto(t, "")),
            _ => None,
        })
        .collect();
    match tensors {
        Some(tensors) => Ok(AttributeProto::new_tensors(name, tensors)),
        None => Err(ExportError::UnsupportedType(format!(
            "attribute {} is a heterogeneous list",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, JitType};
    use crate::proto::attribute_proto::AttributeType;
    use crate::tensor::ScalarType;

    struct Fixture {
        state_dict: IndexMap<String, Tensor>,
        docs: NodeDocs,
        folded: FxHashSet<NodeId>,
        names: ValueNames,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                state_dict: IndexMap::new(),
                docs: NodeDocs::default(),
                folded: FxHashSet::default(),
                names: ValueNames::new(),
            }
        }

        fn emitter(&mut self, self_value: Option<ValueId>) -> Emitter<'_> {
            Emitter::new(
                &self.state_dict,
                self_value,
                &self.docs,
                &self.folded,
                true,
                &mut self.names,
            )
        }
    }

    #[test]
    fn test_node_names_count_per_call() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let y = b.op("onnx::Relu", &[x], JitType::tensor());
        let z = b.op("onnx::Neg", &[y], JitType::tensor());
        b.output(z);
        let g = b.build();

        let mut fx = Fixture::new();
        let mut emitter = fx.emitter(None);
        let nodes = emitter.emit_block(&g, g.root()).unwrap();
        assert_eq!(nodes[0].name, "Relu_1");
        assert_eq!(nodes[1].name, "Neg_2");
        assert_eq!(nodes[1].input, vec![nodes[0].output[0].clone()]);
        let again = emitter.emit_block(&g, g.root()).unwrap();
        assert_eq!(again[0].name, "Relu_1");
        assert_eq!(again[1].output, nodes[1].output);
    }

    #[test]
    fn test_parameters_become_initializers_once() {
        let mut b = GraphBuilder::new("m");
        let this = b.self_input("Net");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let w = b.get_attr(this, "weight", JitType::tensor());
        let y = b.op("onnx::Mul", &[x, w], JitType::tensor());
        let z = b.op("onnx::Add", &[y, w], JitType::tensor());
        b.output(z);
        let g = b.build();

        let mut fx = Fixture::new();
        fx.state_dict.insert("weight".into(), Tensor::from_vec_f32(&[2], vec![1.0, 2.0]).unwrap());
        fx.names.add_alias(w, "weight".into());
        let mut emitter = fx.emitter(Some(this));
        let nodes = emitter.emit_block(&g, g.root()).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].input[1], "weight");
        let (initializers, domains) = emitter.finish();
        assert_eq!(initializers.len(), 1);
        assert_eq!(initializers[0].name, "weight");
        assert!(domains.is_empty());
    }

    #[test]
    fn test_missing_parameter() {
        let mut b = GraphBuilder::new("m");
        let this = b.self_input("Net");
        let w = b.get_attr(this, "bias", JitType::tensor());
        let y = b.op("onnx::Neg", &[w], JitType::tensor());
        b.output(y);
        let g = b.build();

        let mut fx = Fixture::new();
        fx.names.add_alias(w, "bias".into());
        let err = fx.emitter(Some(this)).emit_block(&g, g.root()).unwrap_err();
        assert!(matches!(err, ExportError::MissingParameter(p) if p == "bias"));
    }

    #[test]
    fn test_unused_constants_and_none_are_skipped() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let none = b.none();
        let y = b.op("org.pytorch.aten::ATen", &[x, none], JitType::tensor());
        b.output(y);
        let mut g = b.build();
        let unused = g.create_node("onnx::Constant", &[], 1);
        g.set_attr(unused, "value", AttrValue::Tensor(Tensor::scalar_f32(2.0)));
        let root = g.root();
        g.prepend_node(root, unused);

        let mut fx = Fixture::new();
        let mut emitter = fx.emitter(None);
        let nodes = emitter.emit_block(&g, g.root()).unwrap();
        let ops: Vec<&str> = nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, vec!["ATen"]);
        assert_eq!(nodes[0].domain, "org.pytorch.aten");
        assert_eq!(nodes[0].input, vec!["x".to_string(), String::new()]);
        let (_, domains) = emitter.finish();
        assert_eq!(domains, vec!["org.pytorch.aten".to_string()]);
    }

    #[test]
    fn test_folded_constant_is_initializer() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[]);
        b.output(x);
        let mut g = b.build();
        let c = g.create_node("onnx::Constant", &[], 1);
        g.set_attr(c, "value", AttrValue::Tensor(Tensor::scalar_f32(6.0)));
        let root = g.root();
        g.prepend_node(root, c);
        let out = g.node_outputs(c)[0];
        g.set_debug_name(out, "onnx::Mul_7").unwrap();
        let add = g.create_node("onnx::Add", &[x, out], 1);
        g.append_node(root, add);
        let sum = g.node_outputs(add)[0];
        g.set_block_output(root, 0, sum);

        let mut fx = Fixture::new();
        fx.folded.insert(c);
        let mut emitter = fx.emitter(None);
        let nodes = emitter.emit_block(&g, root).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].input, vec!["x".to_string(), "onnx::Mul_7".to_string()]);
        let names: Vec<&str> = emitter.initializers().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["onnx::Mul_7"]);
    }

    #[test]
    fn test_conditional_subgraphs() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.tensor_input("c", ScalarType::Bool, &[]);
        let outs = b.if_else(
            c,
            &[JitType::tensor()],
            |b| vec![b.op("onnx::Relu", &[x], JitType::tensor())],
            |b| vec![b.op("onnx::Neg", &[x], JitType::tensor())],
        );
        b.output(outs[0]);
        let g = b.build();
        let node = g.producing_node(outs[0]).unwrap();

        let mut fx = Fixture::new();
        fx.docs.insert(node, "\n## Original node\n".into());
        let nodes = fx.emitter(None).emit_block(&g, g.root()).unwrap();
        assert_eq!(nodes.len(), 1);
        let cond = &nodes[0];
        assert_eq!(cond.op_type, "If");
        assert_eq!(cond.name, "If_1");
        assert!(cond.doc_string.starts_with("## Symbolic node\n"));
        assert_eq!(cond.attribute.len(), 2);
        let then_branch = cond.attribute[0].g.as_ref().unwrap();
        assert_eq!(cond.attribute[0].name, "then_branch");
        assert_eq!(then_branch.name, "If_1_then_branch");
        assert_eq!(then_branch.doc_string, cond.doc_string);
        assert_eq!(then_branch.node[0].name, "Relu_1");
        assert!(then_branch.input.is_empty());
        assert_eq!(then_branch.output.len(), 1);
        assert_eq!(then_branch.output[0].name, then_branch.node[0].output[0]);
        let else_branch = cond.attribute[1].g.as_ref().unwrap();
        assert_eq!(else_branch.node[0].op_type, "Neg");
    }

    #[test]
    fn test_branch_output_without_onnx_type() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        let c = b.tensor_input("c", ScalarType::Bool, &[]);
        let outs = b.if_else(
            c,
            &[JitType::Str],
            |b| vec![b.op("onnx::Identity", &[x], JitType::Str)],
            |b| vec![b.op("onnx::Identity", &[x], JitType::Str)],
        );
        b.output(outs[0]);
        let g = b.build();

        let err = Fixture::new().emitter(None).emit_block(&g, g.root()).unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedType(_)));
    }

    #[test]
    fn test_block_on_plain_node_is_rejected() {
        let mut b = GraphBuilder::new("m");
        let x = b.tensor_input("x", ScalarType::Float, &[2]);
        b.output(x);
        let mut g = b.build();
        let loop_node = g.create_node("onnx::Loop", &[x], 1);
        g.add_block(loop_node);
        let root = g.root();
        g.append_node(root, loop_node);

        let err = Fixture::new().emitter(None).emit_block(&g, root).unwrap_err();
        assert!(matches!(err, ExportError::MalformedControlFlow(_)));
    }

    #[test]
    fn test_attribute_conversion() {
        let ints = attribute_proto(
            "perm",
            &AttrValue::IValue(IValue::List(vec![IValue::Int(1), IValue::Int(0)])),
        )
        .unwrap();
        assert_eq!(ints.r#type, AttributeType::Ints as i32);
        assert_eq!(ints.ints, vec![1, 0]);

        let floats = attribute_proto(
            "scales",
            &AttrValue::IValue(IValue::List(vec![IValue::Int(1), IValue::Float(0.5)])),
        )
        .unwrap();
        assert_eq!(floats.floats, vec![1.0, 0.5]);

        let flag = attribute_proto("keepdims", &AttrValue::IValue(IValue::Bool(true))).unwrap();
        assert_eq!(flag.i, 1);

        let mixed = AttrValue::IValue(IValue::List(vec![
            IValue::Str("a".into()),
            IValue::Int(1),
        ]));
        assert!(matches!(
            attribute_proto("bad", &mixed),
            Err(ExportError::UnsupportedType(_))
        ));
    }
}
