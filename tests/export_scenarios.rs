//! End-to-end exports through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use trace2onnx::graph::AttrValue;
use trace2onnx::io::{check_model, load_model_from_bytes, ModelInfo};
use trace2onnx::prelude::*;
use trace2onnx::symbolic::SymbolicFn;
use trace2onnx::tensor::proto_to_tensor;

fn float_input(shape: &[usize]) -> Tensor {
    let len = shape.iter().product();
    Tensor::from_vec_f32(shape, vec![0.5; len]).unwrap()
}

fn graph_of(model: &ModelProto) -> &GraphProto {
    model.graph.as_ref().unwrap()
}

/// Every node input is a graph input, an initializer or an earlier output
fn assert_wired(graph: &GraphProto) {
    let mut defined: Vec<&str> = graph.input_names();
    defined.extend(graph.initializer.iter().map(|t| t.name.as_str()));
    for node in &graph.node {
        for input in node.input.iter().filter(|i| !i.is_empty()) {
            assert!(
                defined.contains(&input.as_str()),
                "{} reads undefined value {}",
                node.name,
                input
            );
        }
        defined.extend(node.output.iter().map(String::as_str));
    }
}

fn identity_module() -> TracedModule {
    let mut b = GraphBuilder::new("Identity");
    b.self_input("Identity");
    let x = b.tensor_input("x.1", ScalarType::Float, &[2, 3]);
    b.output(x);
    let (name, graph) = b.finish();
    TracedModule::new(&name, graph).with_outputs(vec![float_input(&[2, 3])])
}

#[test]
fn identity_model_passes_its_input_through() {
    let mut out = Vec::new();
    let outputs = export(&identity_module(), &[float_input(&[2, 3])], &mut out, ExportOptions::default())
        .unwrap();
    assert_eq!(outputs.len(), 1);

    let model = load_model_from_bytes(&out).unwrap();
    let graph = graph_of(&model);
    assert_eq!(graph.input.len(), 1);
    assert_eq!(graph.output.len(), 1);
    assert!(graph.initializer.is_empty());
    assert_eq!(graph.node.len(), 1);
    assert_eq!(graph.node[0].op_type, "Identity");
    assert_eq!(graph.node[0].input[0], graph.input[0].name);
    assert_eq!(graph.node[0].output[0], graph.output[0].name);
    assert_eq!(graph.input[0].get_shape(), Some(vec![2, 3]));
    assert!(check_model(&model).is_ok());
}

fn conditional_module() -> TracedModule {
    let mut b = GraphBuilder::new("Gate");
    let x = b.tensor_input("x", ScalarType::Float, &[4]);
    let s = b.op("aten::sum", &[x], JitType::tensor_of(ScalarType::Float, &[]));
    let cond = b.op("aten::neg", &[s], JitType::tensor_of(ScalarType::Bool, &[]));
    let outs = b.if_else(
        cond,
        &[JitType::tensor_of(ScalarType::Float, &[4])],
        |b| vec![b.op("aten::relu", &[x], JitType::tensor_of(ScalarType::Float, &[4]))],
        |b| vec![b.op("aten::neg", &[x], JitType::tensor_of(ScalarType::Float, &[4]))],
    );
    b.output(outs[0]);
    let (name, graph) = b.finish();
    TracedModule::new(&name, graph).with_outputs(vec![float_input(&[4])])
}

fn registry_with_sum() -> SymbolicRegistry {
    let mut registry = SymbolicRegistry::with_default_ops();
    registry.register("sum", 7, |ctx, call| {
        Ok(vec![ctx.op("ReduceSum", &call.inputs[..1], &[("keepdims", AttrValue::Int(0))])])
    });
    registry
}

#[test]
fn conditional_becomes_single_if_with_two_branches() {
    let exported = Exporter::new(ExportOptions::default())
        .with_registry(registry_with_sum())
        .convert(conditional_module(), &[float_input(&[4])])
        .unwrap();
    let graph = graph_of(&exported.model);

    let ifs: Vec<&NodeProto> = graph.nodes_of_type("If").collect();
    assert_eq!(ifs.len(), 1);
    let node = ifs[0];
    assert_eq!(node.attribute.len(), 2);

    let then_branch = node.get_attribute_graph("then_branch").unwrap();
    let else_branch = node.get_attribute_graph("else_branch").unwrap();
    assert_eq!(then_branch.name, format!("{}_then_branch", node.name));
    assert_eq!(else_branch.name, format!("{}_else_branch", node.name));
    for branch in [then_branch, else_branch] {
        assert!(branch.input.is_empty());
        assert_eq!(branch.output.len(), node.output.len());
        assert_eq!(branch.node.len(), 1);
    }
    assert_eq!(then_branch.node[0].op_type, "Relu");
    assert_eq!(else_branch.node[0].op_type, "Neg");
    assert_eq!(graph.output[0].name, node.output[0]);

    assert_wired(graph);
    let info = ModelInfo::from_model(&exported.model);
    assert_eq!(info.subgraph_count, 2);
    assert!(check_model(&exported.model).is_ok());
}

fn scaled_module() -> TracedModule {
    let mut b = GraphBuilder::new("Scale");
    let this = b.self_input("Scale");
    let x = b.tensor_input("x", ScalarType::Float, &[3]);
    let w = b.get_attr(this, "weight", JitType::tensor_of(ScalarType::Float, &[3]));
    let nw = b.op("aten::neg", &[w], JitType::tensor_of(ScalarType::Float, &[3]));
    let y = b.op("aten::mul", &[x, nw], JitType::tensor_of(ScalarType::Float, &[3]));
    b.output(y);
    let (name, graph) = b.finish();
    let weight = Tensor::from_vec_f32(&[3], vec![1.0, 2.0, 3.0]).unwrap();
    TracedModule::new(&name, graph)
        .with_parameter("weight", weight)
        .with_outputs(vec![float_input(&[3])])
}

#[test]
fn parameter_only_subgraph_is_folded_into_an_initializer() {
    let exported = Exporter::new(ExportOptions::default())
        .convert(scaled_module(), &[float_input(&[3])])
        .unwrap();
    let graph = graph_of(&exported.model);

    assert_eq!(graph.input_names(), vec!["x"]);
    assert_eq!(graph.initializer.len(), 1);
    let folded = &graph.initializer[0];
    assert!(folded.name.starts_with("onnx::Neg_"), "{}", folded.name);
    assert!(graph.find_initializer("weight").is_none());

    let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
    assert_eq!(ops, vec!["Mul"]);
    assert_eq!(graph.node[0].input[1], folded.name);

    let value = proto_to_tensor(folded).unwrap();
    assert_eq!(value.to_f64_array().iter().copied().collect::<Vec<_>>(), vec![-1.0, -2.0, -3.0]);
    assert_wired(graph);
}

#[test]
fn parameters_stay_initializers_without_folding() {
    let options = ExportOptions::default().with_constant_folding(false);
    let exported = Exporter::new(options)
        .convert(scaled_module(), &[float_input(&[3])])
        .unwrap();
    let graph = graph_of(&exported.model);

    let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
    assert_eq!(ops, vec!["Neg", "Mul"]);
    assert_eq!(graph.initializer.len(), 1);
    assert_eq!(graph.initializer[0].name, "weight");
    assert_eq!(graph.node[0].input[0], "weight");
    assert_wired(graph);
}

/// Counts registry lookups while delegating to the default registry
struct CountingLookup {
    inner: SymbolicRegistry,
    calls: Arc<AtomicUsize>,
}

impl SymbolicLookup for CountingLookup {
    fn lookup(&self, op: &str, opset: i64) -> Option<SymbolicFn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(op, opset)
    }
}

#[test]
fn input_name_mismatch_fails_before_lowering() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = CountingLookup {
        inner: SymbolicRegistry::with_default_ops(),
        calls: Arc::clone(&calls),
    };
    let options = ExportOptions::default().with_input_names(["a", "b"]);
    let err = Exporter::new(options)
        .with_registry(registry)
        .convert(scaled_module(), &[float_input(&[3])])
        .unwrap_err();

    assert!(matches!(
        err,
        ExportError::NameCountMismatch {
            expected: 1,
            actual: 2
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

fn unknown_op_module() -> TracedModule {
    let mut b = GraphBuilder::new("Odd");
    let x = b.tensor_input("x", ScalarType::Float, &[2]);
    let y = b.op("aten::frobnicate", &[x], JitType::tensor_of(ScalarType::Float, &[2]));
    b.output(y);
    let (name, graph) = b.finish();
    TracedModule::new(&name, graph).with_outputs(vec![float_input(&[2])])
}

#[test]
fn unknown_operator_aborts_without_output() {
    let mut out = Vec::new();
    let err = export(&unknown_op_module(), &[float_input(&[2])], &mut out, ExportOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ExportError::SymbolicFunctionNotFound { ref kind, opset: 12 } if kind == "aten::frobnicate"
    ));
    assert!(out.is_empty());

    let path = std::env::temp_dir().join(format!("trace2onnx_unknown_{}.onnx", std::process::id()));
    let err = export_to_path(
        &unknown_op_module(),
        &[float_input(&[2])],
        &path,
        ExportOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ExportError::SymbolicFunctionNotFound { .. }));
    assert!(!path.exists());
}

#[test]
fn unknown_operator_falls_back_to_aten() {
    let options =
        ExportOptions::default().with_operator_export_type(OperatorExportType::OnnxAtenFallback);
    let exported = Exporter::new(options)
        .convert(unknown_op_module(), &[float_input(&[2])])
        .unwrap();
    let graph = graph_of(&exported.model);

    assert_eq!(graph.node.len(), 1);
    let node = &graph.node[0];
    assert_eq!(node.op_type, "ATen");
    assert_eq!(node.domain, "org.pytorch.aten");
    assert_eq!(node.get_attribute_string("operator"), Some("frobnicate"));
    assert!(exported
        .model
        .opset_import
        .iter()
        .any(|op| op.domain == "org.pytorch.aten"));
    assert!(check_model(&exported.model).is_ok());
}

#[test]
fn repeated_exports_are_identical() {
    let tracer = FnTracer::new(|inputs: &[Tensor], options: &TraceOptions| {
        assert_eq!(inputs.len(), 1);
        assert!(options.strict);
        Ok(conditional_module())
    });
    let exporter = Exporter::new(ExportOptions::default()).with_registry(registry_with_sum());
    let a = exporter.export(&tracer, &[float_input(&[4])]).unwrap();
    let b = exporter.export(&tracer, &[float_input(&[4])]).unwrap();
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());

    let graph = graph_of(&a.model);
    let mut names: Vec<&str> = graph.node.iter().map(|n| n.name.as_str()).collect();
    let total = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), total);
}

#[test]
fn missing_default_lowering_is_reported_by_kind() {
    let mut out = Vec::new();
    let err = export(&conditional_module(), &[float_input(&[4])], &mut out, ExportOptions::default())
        .unwrap_err();
    assert!(matches!(err, ExportError::SymbolicFunctionNotFound { ref kind, .. } if kind == "aten::sum"));
    assert!(out.is_empty());
}

#[test]
fn output_names_rename_graph_outputs() {
    let options = ExportOptions::default()
        .with_input_names(["features"])
        .with_output_names(["scaled"]);
    let exported = Exporter::new(options)
        .convert(scaled_module(), &[float_input(&[3])])
        .unwrap();
    let graph = graph_of(&exported.model);
    assert_eq!(graph.input_names(), vec!["features"]);
    assert_eq!(graph.output_names(), vec!["scaled"]);
    assert_eq!(graph.node[0].input[0], "features");
    assert_eq!(graph.node[0].output[0], "scaled");
}

#[test]
fn saved_model_round_trips_through_disk() {
    let path = std::env::temp_dir().join(format!("trace2onnx_identity_{}.onnx", std::process::id()));
    export_to_path(
        &identity_module(),
        &[float_input(&[2, 3])],
        &path,
        ExportOptions::default().with_opset(13),
    )
    .unwrap();

    let model = load_model(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(model.get_opset_version(), Some(13));
    assert_eq!(model.producer_name, "trace2onnx");
    assert_eq!(graph_of(&model).node.len(), 1);
}
