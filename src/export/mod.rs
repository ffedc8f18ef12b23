//! Traced graph to ONNX conversion
//!
//! An export runs one synchronous chain over a graph it owns exclusively:
//!
//! 1. trace the model (or take an already traced module)
//! 2. run the optimizer pipeline
//! 3. lower every node through the symbolic registry, branches first
//! 4. remove the replaced nodes
//! 5. fold constant subgraphs into initializers
//! 6. emit nodes, value infos and initializers
//! 7. validate the finished model
//!
//! Any failure aborts the export before a single byte is written.
//!
//! # Example
//!
//! ```ignore
//! use trace2onnx::export::{export_to_path, ExportOptions};
//!
//! let options = ExportOptions::default().with_input_names(["x"]);
//! let outputs = export_to_path(&traced, &[example], "model.onnx", options)?;
//! ```

pub mod constant_fold;
pub mod doc;
pub mod emitter;
pub mod lowering;
pub mod naming;
pub mod options;
pub mod type_proto;

pub use options::{DynamicAxes, ExportOptions, TrainingMode};

use std::io::Write;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::error::{ExportError, ExportResult};
use crate::eval::Evaluator;
use crate::export::doc::{DocLog, NodeDocs};
use crate::export::emitter::Emitter;
use crate::export::lowering::Dispatcher;
use crate::export::naming::ValueNames;
use crate::export::type_proto::{apply_dynamic_axes, apply_tensor_info, project};
use crate::graph::{NodeId, ProgramGraph, ValueId};
use crate::io::{model_to_bytes, save_model, OnnxChecker};
use crate::opset::{ir_version_for_opset, opset_imports, supports_constant_folding};
use crate::passes::common::self_input;
use crate::passes::{optimize, DeadCodeElimination, PassContext};
use crate::proto::extensions::{make_graph, make_value_info, printable_graph};
use crate::proto::{ModelProto, ValueInfoProto};
use crate::symbolic::SymbolicRegistry;
use crate::tensor::Tensor;
use crate::trace::TracedModule;
use crate::traits::{ModelValidator, NoValidation, SymbolicLookup, Tracer};

/// Producer name stamped into exported models
pub const PRODUCER_NAME: &str = "trace2onnx";

/// A finished, validated model plus the outputs of the example run
#[derive(Debug, Clone)]
pub struct ExportedModel {
    /// The ONNX model
    pub model: ModelProto,
    /// Outputs of the traced example run
    pub outputs: Vec<Tensor>,
}

impl ExportedModel {
    /// Encoded model
    pub fn to_bytes(&self) -> ExportResult<Vec<u8>> {
        model_to_bytes(&self.model)
    }

    /// Write the encoded model in one call
    pub fn write_to<W: Write>(&self, mut writer: W) -> ExportResult<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Atomically write the model to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ExportResult<()> {
        save_model(&self.model, path)
    }
}

/// Configured exporter
///
/// Holds the options, the lowering registry and the model validator. The
/// default registry is [`SymbolicRegistry::with_default_ops`]; the default
/// validator is [`OnnxChecker`] (or nothing when the checker is disabled).
pub struct Exporter {
    options: ExportOptions,
    registry: Box<dyn SymbolicLookup>,
    validator: Box<dyn ModelValidator>,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(ExportOptions::default())
    }
}

impl Exporter {
    /// Exporter with the default registry and validator
    pub fn new(options: ExportOptions) -> Self {
        let validator: Box<dyn ModelValidator> = if options.enable_checker {
            Box::new(OnnxChecker::from_options(&options))
        } else {
            Box::new(NoValidation)
        };
        Self {
            options,
            registry: Box::new(SymbolicRegistry::with_default_ops()),
            validator,
        }
    }

    /// Replace the lowering registry
    pub fn with_registry<R: SymbolicLookup + 'static>(mut self, registry: R) -> Self {
        self.registry = Box::new(registry);
        self
    }

    /// Replace the model validator
    pub fn with_validator<V: ModelValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Options of this exporter
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Trace `tracer` on `inputs` and convert the result
    pub fn export(&self, tracer: &dyn Tracer, inputs: &[Tensor]) -> ExportResult<ExportedModel> {
        self.options.validate()?;
        let module = tracer.trace(inputs, &self.options.trace_options())?;
        self.convert(module, inputs)
    }

    /// Convert an already traced module
    ///
    /// `inputs` are the example inputs the module was traced with; they
    /// provide the element types and sizes of the graph inputs.
    pub fn convert(&self, module: TracedModule, inputs: &[Tensor]) -> ExportResult<ExportedModel> {
        self.options.validate()?;
        module.check_outputs()?;
        let options = &self.options;
        let TracedModule {
            name,
            mut graph,
            outputs,
            state_dict,
        } = module;

        let mut log = DocLog::new(&name, options.verbose, options.keep_doc_strings());
        log.log("Inlined graph", || graph.to_string());
        let traced_text = options.verbose.then(|| graph.to_string());
        optimize(&mut graph, &PassContext::new(options))?;
        log.log("Optimized graph", || graph.to_string());
        if let Some(text) = traced_text {
            log.log("Original traced graph", || text);
        }
        log.log("State dict", || {
            state_dict
                .iter()
                .map(|(k, t)| format!("- {}: {:?} {:?}", k, t.scalar_type(), t.dims()))
                .collect::<Vec<_>>()
                .join("\n")
        });

        let self_value = self_input(&graph);
        let mut names = ValueNames::new();
        let mut docs = NodeDocs::default();
        {
            let mut dispatcher = Dispatcher::new(
                options,
                self.registry.as_ref(),
                &state_dict,
                self_value,
                &mut names,
                &mut docs,
                &mut log,
            );
            let root = graph.root();
            dispatcher.lower_block(&mut graph, root)?;
            dispatcher.apply_pending_moves(&mut graph)?;
        }
        sweep(&mut graph, "SymbolicLowering")?;

        let mut folded_nodes: FxHashSet<NodeId> = FxHashSet::default();
        if options.do_constant_folding && supports_constant_folding(options.opset_version) {
            let params: FxHashMap<ValueId, Tensor> = names
                .aliases()
                .filter_map(|(v, path)| state_dict.get(path).map(|t| (v, t.clone())))
                .collect();
            let folded = constant_fold::fold_constants(&mut graph, &params, &Evaluator::new())?;
            debug!("folded {} values", folded.len());
            let doc_target = if options.keep_doc_strings() {
                Some(&mut docs)
            } else {
                None
            };
            folded_nodes = constant_fold::materialize(&mut graph, &folded, doc_target)?;
            sweep(&mut graph, "ConstantFolding")?;
        }

        passthrough_outputs(&mut graph);
        log.log("ONNX graph", || graph.to_string());

        names.assign_boundary(
            &graph,
            self_value,
            options.input_names.as_deref(),
            options.output_names.as_deref(),
        )?;

        let keep = options.keep_doc_strings();
        let mut emitter = Emitter::new(
            &state_dict,
            self_value,
            &docs,
            &folded_nodes,
            keep,
            &mut names,
        );
        let nodes = emitter.emit_block(&graph, graph.root())?;

        let mut graph_inputs = Vec::new();
        let positional = graph
            .inputs()
            .iter()
            .copied()
            .filter(|&v| Some(v) != self_value);
        for (idx, value) in positional.enumerate() {
            if !graph.has_uses(value) {
                warn!("graph input {} is never used", graph.debug_name(value));
            }
            let mut info = boundary_info(&mut emitter, &graph, value, keep)?;
            if let Some(example) = inputs.get(idx) {
                apply_tensor_info(&mut info, example)?;
            }
            apply_axes(&mut info, options);
            graph_inputs.push(info);
        }

        let mut graph_outputs = Vec::new();
        for (idx, &value) in graph.outputs().iter().enumerate() {
            let mut info = boundary_info(&mut emitter, &graph, value, keep)?;
            if let Some(example) = outputs.get(idx) {
                apply_tensor_info(&mut info, example)?;
            }
            apply_axes(&mut info, options);
            graph_outputs.push(info);
        }

        let (initializers, domains) = emitter.finish();
        let mut onnx_graph = make_graph(&name, nodes, graph_inputs, graph_outputs, initializers, "");
        log.log("ONNX printable graph", || printable_graph(&onnx_graph));
        if keep {
            onnx_graph.doc_string = log.text().to_string();
        }

        let model = ModelProto {
            ir_version: ir_version_for_opset(options.opset_version),
            opset_import: opset_imports(
                options.opset_version,
                domains.iter().map(String::as_str),
                &options.custom_opsets,
            ),
            producer_name: PRODUCER_NAME.to_string(),
            producer_version: crate::VERSION.to_string(),
            graph: Some(onnx_graph),
            ..Default::default()
        };
        let model = self.validator.validate(model)?;
        Ok(ExportedModel { model, outputs })
    }
}

/// Remove replaced nodes and check the result
fn sweep(graph: &mut ProgramGraph, stage: &str) -> ExportResult<()> {
    DeadCodeElimination::allowing_side_effects().sweep_graph(graph)?;
    graph.lint().map_err(|detail| ExportError::StructuralLint {
        pass: stage.to_string(),
        detail,
    })
}

/// Route outputs that are graph inputs, or repeat an earlier output,
/// through an `Identity` so every boundary name is unique
fn passthrough_outputs(graph: &mut ProgramGraph) {
    let root = graph.root();
    let outputs = graph.outputs().to_vec();
    for (offset, &value) in outputs.iter().enumerate() {
        if !graph.is_graph_input(value) && !outputs[..offset].contains(&value) {
            continue;
        }
        let node = graph.create_node("onnx::Identity", &[value], 1);
        graph.append_node(root, node);
        let out = graph.node_outputs(node)[0];
        let ty = graph.value_type(value).clone();
        graph.set_type(out, ty);
        graph.set_block_output(root, offset, out);
    }
}

fn boundary_info(
    emitter: &mut Emitter<'_>,
    graph: &ProgramGraph,
    value: ValueId,
    keep_doc_strings: bool,
) -> ExportResult<ValueInfoProto> {
    let name = emitter.value_name(graph, value);
    let ty = project(graph.value_type(value))?;
    let doc = if keep_doc_strings {
        graph.value_to_string(value)
    } else {
        String::new()
    };
    Ok(make_value_info(&name, Some(ty), &doc))
}

fn apply_axes(info: &mut ValueInfoProto, options: &ExportOptions) {
    if let Some(axes) = options.dynamic_axes.get(&info.name) {
        let axes = axes.resolve(&info.name);
        apply_dynamic_axes(info, &axes);
    }
}

/// Trace, convert and write a model to `writer`
///
/// Returns the outputs of the example run. Nothing is written unless the
/// whole export succeeds.
pub fn export<W: Write>(
    tracer: &dyn Tracer,
    inputs: &[Tensor],
    writer: W,
    options: ExportOptions,
) -> ExportResult<Vec<Tensor>> {
    let exported = Exporter::new(options).export(tracer, inputs)?;
    exported.write_to(writer)?;
    Ok(exported.outputs)
}

/// Trace, convert and atomically save a model to `path`
pub fn export_to_path<P: AsRef<Path>>(
    tracer: &dyn Tracer,
    inputs: &[Tensor],
    path: P,
    options: ExportOptions,
) -> ExportResult<Vec<Tensor>> {
    let exported = Exporter::new(options).export(tracer, inputs)?;
    exported.save(path)?;
    Ok(exported.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, JitType};
    use crate::tensor::ScalarType;

    fn relu_module() -> TracedModule {
        let mut b = GraphBuilder::new("Net");
        b.self_input("Net");
        let x = b.tensor_input("x.1", ScalarType::Float, &[2, 3]);
        b.scope("Net/__module.act");
        let y = b.op("aten::relu", &[x], JitType::tensor_of(ScalarType::Float, &[2, 3]));
        b.output(y);
        let (name, graph) = b.finish();
        let example = Tensor::from_vec_f32(&[2, 3], vec![0.0; 6]).unwrap();
        TracedModule::new(&name, graph).with_outputs(vec![example])
    }

    fn example() -> Vec<Tensor> {
        vec![Tensor::from_vec_f32(&[2, 3], vec![0.0; 6]).unwrap()]
    }

    #[test]
    fn test_convert_envelope() {
        let exported = Exporter::default().convert(relu_module(), &example()).unwrap();
        let model = &exported.model;
        assert_eq!(model.ir_version, 7);
        assert_eq!(model.get_opset_version(), Some(12));
        assert_eq!(model.producer_name, PRODUCER_NAME);

        let graph = model.graph.as_ref().unwrap();
        assert_eq!(graph.name, "Net");
        assert_eq!(graph.node.len(), 1);
        assert_eq!(graph.node[0].op_type, "Relu");
        assert_eq!(graph.node[0].name, "Relu_1");
        assert_eq!(graph.input_names(), vec!["x.1"]);
        assert!(graph.output_names()[0].starts_with("act."));
        assert_eq!(graph.input[0].get_shape(), Some(vec![2, 3]));
        assert!(graph.node[0].doc_string.contains("## Original node"));
    }

    #[test]
    fn test_names_and_stripped_docs() {
        let options = ExportOptions::default()
            .with_input_names(["input"])
            .with_output_names(["output"])
            .with_strip_doc_string(true);
        let exported = Exporter::new(options).convert(relu_module(), &example()).unwrap();
        let graph = exported.model.graph.unwrap();
        assert_eq!(graph.input_names(), vec!["input"]);
        assert_eq!(graph.output_names(), vec!["output"]);
        assert_eq!(graph.node[0].input, vec!["input".to_string()]);
        assert!(graph.doc_string.is_empty());
        assert!(graph.node[0].doc_string.is_empty());
        assert!(graph.input[0].doc_string.is_empty());
    }

    #[test]
    fn test_verbose_doc_sections() {
        let options = ExportOptions::default().with_verbose(true);
        let exported = Exporter::new(options).convert(relu_module(), &example()).unwrap();
        let doc = exported.model.graph.unwrap().doc_string;
        assert!(doc.starts_with("\n# Model: Net\n"));
        for section in [
            "Inlined graph",
            "Optimized graph",
            "Original traced graph",
            "State dict",
            "ONNX graph",
            "ONNX printable graph",
        ] {
            assert!(doc.contains(&format!("## {}", section)), "missing {}", section);
        }
        assert!(doc.contains("## Converting node aten::relu"));
        assert!(doc.find("## Optimized graph") < doc.find("## Original traced graph"));
        assert!(doc.contains("\n## ONNX printable graph\ngraph Net (\n"));
    }

    #[test]
    fn test_identity_for_passthrough_output() {
        let mut b = GraphBuilder::new("Id");
        let x = b.tensor_input("x", ScalarType::Float, &[2, 3]);
        b.output(x);
        let (name, graph) = b.finish();
        let exported = Exporter::default()
            .convert(TracedModule::new(&name, graph), &example())
            .unwrap();
        let graph = exported.model.graph.unwrap();
        assert_eq!(graph.node.len(), 1);
        assert_eq!(graph.node[0].op_type, "Identity");
        assert_ne!(graph.input_names(), graph.output_names());
        assert!(graph.initializer.is_empty());
    }

    #[test]
    fn test_dynamic_axes() {
        let options = ExportOptions::default()
            .with_input_names(["x"])
            .with_dynamic_axes("x", DynamicAxes::Axes(vec![0]));
        let exported = Exporter::new(options).convert(relu_module(), &example()).unwrap();
        let graph = exported.model.graph.unwrap();
        assert_eq!(graph.input[0].get_shape(), Some(vec![-1, 3]));
        assert_eq!(
            graph.input[0].get_dim_params()[0].as_deref(),
            Some("x_dynamic_axes_1")
        );
    }

    #[test]
    fn test_rejected_opset() {
        let err = Exporter::new(ExportOptions::default().with_opset(3))
            .convert(relu_module(), &example())
            .unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedOpset { version: 3, .. }));
    }

    #[test]
    fn test_write_to_stream() {
        let mut out = Vec::new();
        let outputs = export(&relu_module(), &example(), &mut out, ExportOptions::default()).unwrap();
        assert_eq!(outputs.len(), 1);
        let model = crate::io::load_model_from_bytes(&out).unwrap();
        assert_eq!(model.graph.unwrap().node.len(), 1);
    }
}
