//! ONNX model validation
//!
//! Structural checks of an exported model plus a light shape inference
//! that fills `value_info` for intermediate values. [`OnnxChecker`] is the
//! default [`ModelValidator`] of the exporter.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::{ExportError, ExportResult};
use crate::export::ExportOptions;
use crate::proto::extensions::{make_dim_value, make_value_info};
use crate::proto::tensor_shape_proto::{dimension, Dimension};
use crate::proto::{
    type_proto, GraphProto, ModelProto, NodeProto, TensorProto, TensorShapeProto, TypeProto,
};
use crate::tensor::proto_to_tensor;
use crate::traits::ModelValidator;
use crate::{SUPPORTED_OPSET_MAX, SUPPORTED_OPSET_MIN};

/// Validation result with detailed issues
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the model is valid
    pub is_valid: bool,
    /// Critical issues
    pub errors: Vec<String>,
    /// Non-critical issues
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.is_valid = false;
    }

    /// Add a warning
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merge with another result
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.is_valid {
            self.is_valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validate an ONNX model
///
/// Checks the envelope (IR version, opset imports, graph) and every graph
/// recursively. Nested subgraphs may read any value visible in the
/// enclosing graph.
pub fn validate_model(model: &ModelProto) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if model.ir_version < 3 {
        result.add_error(format!("IR version {} is not supported", model.ir_version));
    }

    let domains: HashSet<&str> = model.opset_import.iter().map(|o| o.domain.as_str()).collect();
    match get_opset_version(model) {
        Some(v) if !is_opset_supported(v) => {
            result.add_error(format!("opset {} is not supported", v))
        }
        Some(_) => {}
        None => result.add_error("no opset import for the default domain"),
    }

    match &model.graph {
        Some(graph) => result.merge(validate_graph(graph, &HashSet::new(), &domains)),
        None => result.add_error("model does not contain a graph"),
    }

    result
}

/// Validate a graph whose enclosing graphs define `outer`
pub fn validate_graph(
    graph: &GraphProto,
    outer: &HashSet<String>,
    domains: &HashSet<&str>,
) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let mut known: HashSet<String> = outer.clone();
    let mut defined: HashSet<&str> = HashSet::new();

    for input in &graph.input {
        if input.name.is_empty() {
            result.add_error(format!("graph {}: input has empty name", graph.name));
        } else if !defined.insert(&input.name) {
            result.add_error(format!("graph {}: duplicate input {}", graph.name, input.name));
        }
        known.insert(input.name.clone());
    }

    for init in &graph.initializer {
        if init.name.is_empty() {
            result.add_error(format!("graph {}: initializer has empty name", graph.name));
        } else if !defined.insert(&init.name) && !graph.input.iter().any(|i| i.name == init.name) {
            result.add_error(format!(
                "graph {}: duplicate initializer {}",
                graph.name, init.name
            ));
        }
        known.insert(init.name.clone());
    }

    for node in &graph.node {
        let label = if node.name.is_empty() {
            node.op_type.as_str()
        } else {
            node.name.as_str()
        };
        if node.op_type.is_empty() {
            result.add_error(format!("node {} has empty op_type", label));
        }
        if !domains.contains(node.domain.as_str()) {
            result.add_error(format!(
                "node {}: domain {:?} is not imported",
                label, node.domain
            ));
        }
        for input in &node.input {
            if !input.is_empty() && !known.contains(input) {
                result.add_error(format!("node {}: input {} is not defined", label, input));
            }
        }
        if node.op_type == "If" && node.domain.is_empty() {
            result.merge(validate_if(node, &known, domains));
        }
        if node.output.is_empty() {
            result.add_warning(format!("node {} has no outputs", label));
        }
        for output in &node.output {
            if output.is_empty() {
                continue;
            }
            if !defined.insert(output) {
                result.add_error(format!("node {}: output {} is defined twice", label, output));
            }
            known.insert(output.clone());
        }
    }

    for output in &graph.output {
        if output.name.is_empty() {
            result.add_error(format!("graph {}: output has empty name", graph.name));
        } else if !known.contains(&output.name) {
            result.add_error(format!(
                "graph {}: output {} is not produced",
                graph.name, output.name
            ));
        }
    }

    let used = collect_used_tensors(graph);
    for init in &graph.initializer {
        if !used.contains(init.name.as_str()) {
            result.add_warning(format!("unused initializer {}", init.name));
        }
    }

    result
}

fn validate_if(node: &NodeProto, known: &HashSet<String>, domains: &HashSet<&str>) -> ValidationResult {
    let mut result = ValidationResult::valid();
    let mut output_counts = Vec::new();
    for branch in ["then_branch", "else_branch"] {
        match node.get_attribute_graph(branch) {
            Some(g) => {
                if !g.input.is_empty() {
                    result.add_error(format!("{}.{} declares inputs", node.name, branch));
                }
                output_counts.push(g.output.len());
                result.merge(validate_graph(g, known, domains));
            }
            None => result.add_error(format!("{} has no {}", node.name, branch)),
        }
    }
    if output_counts.iter().any(|&n| n != node.output.len()) {
        result.add_error(format!(
            "{}: branches return {:?} values for {} outputs",
            node.name,
            output_counts,
            node.output.len()
        ));
    }
    result
}

fn collect_used_tensors(graph: &GraphProto) -> HashSet<&str> {
    let mut used = HashSet::new();
    for node in &graph.node {
        used.extend(node.input.iter().filter(|i| !i.is_empty()).map(String::as_str));
        for sub in node.attribute.iter().filter_map(|a| a.g.as_ref()) {
            used.extend(collect_used_tensors(sub));
        }
    }
    used.extend(graph.output.iter().map(|o| o.name.as_str()));
    used
}

/// Check if an opset version is supported
pub fn is_opset_supported(version: i64) -> bool {
    (SUPPORTED_OPSET_MIN..=SUPPORTED_OPSET_MAX).contains(&version)
}

/// Opset version of the default domain
pub fn get_opset_version(model: &ModelProto) -> Option<i64> {
    model.get_opset_version()
}

/// Tensor type known during inference; `-1` marks an unknown dimension
#[derive(Debug, Clone, PartialEq)]
struct Inferred {
    elem_type: i32,
    shape: Option<Vec<i64>>,
}

impl Inferred {
    fn from_type(ty: &TypeProto) -> Option<Self> {
        match ty.value.as_ref()? {
            type_proto::Value::TensorType(t) => Some(Self {
                elem_type: t.elem_type,
                shape: t.shape.as_ref().map(|s| {
                    s.dim
                        .iter()
                        .map(|d| match d.value {
                            Some(dimension::Value::DimValue(v)) => v,
                            _ => -1,
                        })
                        .collect()
                }),
            }),
            _ => None,
        }
    }

    fn from_tensor(t: &TensorProto) -> Self {
        Self {
            elem_type: t.data_type,
            shape: Some(t.dims.clone()),
        }
    }

    fn to_type(&self) -> TypeProto {
        let shape = self.shape.as_ref().map(|dims| TensorShapeProto {
            dim: dims
                .iter()
                .map(|&d| if d >= 0 { make_dim_value(d) } else { Dimension::default() })
                .collect(),
        });
        TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: self.elem_type,
                shape,
            })),
            denotation: String::new(),
        }
    }
}

const ELEMENTWISE_UNARY: &[&str] = &[
    "Relu", "Neg", "Sigmoid", "Tanh", "Exp", "Log", "Sqrt", "Identity", "Softmax", "Dropout",
];
const ELEMENTWISE_BINARY: &[&str] = &["Add", "Sub", "Mul", "Div", "Pow"];

/// Structural checker with light shape inference
///
/// Mirrors the validation switches of the export options:
/// `shape_inference` fills `value_info`, `check_type` rejects mixed operand
/// types of elementwise ops, `data_prop` resolves `Reshape` targets from
/// constant shape inputs, and `strict_mode` turns every warning into an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnnxChecker {
    /// Infer intermediate value types
    pub shape_inference: bool,
    /// Reject mismatched operand types
    pub check_type: bool,
    /// Treat warnings as errors
    pub strict_mode: bool,
    /// Propagate constant shape data
    pub data_prop: bool,
}

impl Default for OnnxChecker {
    fn default() -> Self {
        Self {
            shape_inference: true,
            check_type: false,
            strict_mode: false,
            data_prop: true,
        }
    }
}

impl OnnxChecker {
    /// Checker with default switches
    pub fn new() -> Self {
        Self::default()
    }

    /// Checker configured from export options
    pub fn from_options(options: &ExportOptions) -> Self {
        Self {
            shape_inference: options.shape_inference,
            check_type: options.check_type,
            strict_mode: options.strict_mode,
            data_prop: options.data_prop,
        }
    }

    /// Infer root graph value types, returning inference warnings
    pub fn infer_shapes(&self, graph: &mut GraphProto) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let mut types: HashMap<String, Inferred> = HashMap::new();
        let mut constants: HashMap<String, Vec<i64>> = HashMap::new();

        for info in graph.input.iter().chain(&graph.value_info) {
            if let Some(t) = info.r#type.as_ref().and_then(Inferred::from_type) {
                types.insert(info.name.clone(), t);
            }
        }
        for init in &graph.initializer {
            types.insert(init.name.clone(), Inferred::from_tensor(init));
            if let Ok(t) = proto_to_tensor(init) {
                constants.insert(init.name.clone(), t.to_i64_vec());
            }
        }

        let boundary: HashSet<String> = graph
            .input
            .iter()
            .chain(&graph.output)
            .chain(&graph.value_info)
            .map(|v| v.name.clone())
            .collect();
        let mut inferred = Vec::new();

        for node in &graph.node {
            if node.op_type == "Constant" {
                if let Some(t) = node.get_attribute("value").and_then(|a| a.t.as_ref()) {
                    if let Some(out) = node.output.first() {
                        types.insert(out.clone(), Inferred::from_tensor(t));
                        if let Ok(tensor) = proto_to_tensor(t) {
                            constants.insert(out.clone(), tensor.to_i64_vec());
                        }
                        inferred.push(out.clone());
                    }
                }
                continue;
            }
            match self.infer_node(node, &types, &constants) {
                Ok(Some(t)) => {
                    if let Some(out) = node.output.first() {
                        types.insert(out.clone(), t);
                        inferred.push(out.clone());
                    }
                }
                Ok(None) => {}
                Err(msg) => result.add_error(msg),
            }
        }

        for name in inferred {
            if boundary.contains(&name) {
                continue;
            }
            if let Some(t) = types.get(&name) {
                graph.value_info.push(make_value_info(&name, Some(t.to_type()), ""));
            }
        }
        result
    }

    fn infer_node(
        &self,
        node: &NodeProto,
        types: &HashMap<String, Inferred>,
        constants: &HashMap<String, Vec<i64>>,
    ) -> Result<Option<Inferred>, String> {
        let input = |i: usize| node.input.get(i).and_then(|n| types.get(n));
        let op = node.op_type.as_str();

        if ELEMENTWISE_UNARY.contains(&op) {
            return Ok(input(0).cloned());
        }
        if ELEMENTWISE_BINARY.contains(&op) {
            let (a, b) = match (input(0), input(1)) {
                (Some(a), Some(b)) => (a, b),
                _ => return Ok(None),
            };
            if self.check_type && a.elem_type != b.elem_type {
                return Err(format!(
                    "node {}: operand types {} and {} differ",
                    node.name, a.elem_type, b.elem_type
                ));
            }
            let shape = match (&a.shape, &b.shape) {
                (Some(x), Some(y)) if x == y => Some(x.clone()),
                _ => None,
            };
            return Ok(Some(Inferred {
                elem_type: a.elem_type,
                shape,
            }));
        }
        if op == "Shape" {
            return Ok(input(0).map(|t| Inferred {
                elem_type: crate::proto::tensor_proto::DataType::Int64 as i32,
                shape: t.shape.as_ref().map(|s| vec![s.len() as i64]),
            }));
        }
        if op == "Reshape" && self.data_prop {
            let (x, target) = match (input(0), node.input.get(1).and_then(|n| constants.get(n))) {
                (Some(x), Some(target)) => (x, target),
                _ => return Ok(None),
            };
            return Ok(Some(Inferred {
                elem_type: x.elem_type,
                shape: x.shape.as_ref().and_then(|s| reshape_target(s, target)),
            }));
        }
        Ok(None)
    }
}

fn reshape_target(input: &[i64], target: &[i64]) -> Option<Vec<i64>> {
    if input.iter().any(|&d| d < 0) {
        return None;
    }
    let total: i64 = input.iter().product();
    let mut dims: Vec<i64> = target
        .iter()
        .enumerate()
        .map(|(i, &d)| if d == 0 { input.get(i).copied().unwrap_or(0) } else { d })
        .collect();
    let known: i64 = dims.iter().filter(|&&d| d >= 0).product();
    if let Some(slot) = dims.iter_mut().find(|d| **d < 0) {
        if known == 0 {
            return None;
        }
        *slot = total / known;
    }
    Some(dims)
}

impl ModelValidator for OnnxChecker {
    fn validate(&self, mut model: ModelProto) -> ExportResult<ModelProto> {
        let mut result = validate_model(&model);
        if result.is_valid && self.shape_inference {
            if let Some(graph) = model.graph.as_mut() {
                result.merge(self.infer_shapes(graph));
            }
        }
        if self.strict_mode {
            for warning in std::mem::take(&mut result.warnings) {
                result.add_error(warning);
            }
        }
        for warning in &result.warnings {
            warn!("{}", warning);
        }
        if result.is_valid {
            Ok(model)
        } else {
            Err(ExportError::Validation(result.errors.join("; ")))
        }
    }
}

/// Validate and fail on the first structural error
pub fn check_model(model: &ModelProto) -> ExportResult<()> {
    let result = validate_model(model);
    if result.is_valid {
        Ok(())
    } else {
        Err(ExportError::Validation(result.errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_opsetid, make_tensor_value_info};
    use crate::proto::tensor_proto::DataType;
    use crate::proto::{AttributeProto, ValueInfoProto};
    use crate::tensor::{tensor_to_proto, Tensor};

    fn node(op: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
        crate::proto::extensions::make_node(op, inputs, outputs, name)
    }

    fn model_of(graph: GraphProto) -> ModelProto {
        ModelProto {
            ir_version: 7,
            opset_import: vec![make_opsetid("", 12)],
            graph: Some(graph),
            ..Default::default()
        }
    }

    fn relu_graph() -> GraphProto {
        GraphProto {
            name: "test".to_string(),
            node: vec![
                node("Relu", "Relu_1", &["x"], &["h"]),
                node("Neg", "Neg_2", &["h"], &["y"]),
            ],
            input: vec![make_tensor_value_info("x", DataType::Float as i32, &[2, 3])],
            output: vec![ValueInfoProto {
                name: "y".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_valid_model() {
        let result = validate_model(&model_of(relu_graph()));
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn test_missing_graph_and_opset() {
        let result = validate_model(&ModelProto {
            ir_version: 7,
            ..Default::default()
        });
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("graph")));
        assert!(result.errors.iter().any(|e| e.contains("opset")));
    }

    #[test]
    fn test_undefined_input_and_duplicate_output() {
        let mut graph = relu_graph();
        graph.node.push(node("Relu", "Relu_3", &["missing"], &["h"]));
        let result = validate_model(&model_of(graph));
        assert!(result.errors.iter().any(|e| e.contains("missing")));
        assert!(result.errors.iter().any(|e| e.contains("defined twice")));
    }

    #[test]
    fn test_unimported_domain() {
        let mut graph = relu_graph();
        let mut aten = node("ATen", "ATen_3", &["y"], &["z"]);
        aten.domain = "org.pytorch.aten".to_string();
        graph.node.push(aten);
        let result = validate_model(&model_of(graph));
        assert!(result.errors.iter().any(|e| e.contains("not imported")));
    }

    #[test]
    fn test_branches_see_outer_scope() {
        let then_branch = GraphProto {
            name: "If_1_then_branch".to_string(),
            node: vec![node("Relu", "Relu_1", &["x"], &["a"])],
            output: vec![ValueInfoProto {
                name: "a".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut else_branch = then_branch.clone();
        else_branch.name = "If_1_else_branch".to_string();
        else_branch.node = vec![node("Neg", "Neg_1", &["x"], &["b"])];
        else_branch.output[0].name = "b".to_string();

        let mut cond = node("If", "If_1", &["c"], &["y"]);
        cond.attribute.push(AttributeProto::new_graph("then_branch", then_branch));
        cond.attribute.push(AttributeProto::new_graph("else_branch", else_branch.clone()));
        let mut graph = relu_graph();
        graph.node = vec![cond.clone()];
        graph.input.push(make_tensor_value_info("c", DataType::Bool as i32, &[]));
        assert!(validate_model(&model_of(graph.clone())).is_valid);

        cond.attribute.truncate(1);
        graph.node = vec![cond];
        let result = validate_model(&model_of(graph));
        assert!(result.errors.iter().any(|e| e.contains("else_branch")));
    }

    #[test]
    fn test_shape_inference_fills_value_info() {
        let model = OnnxChecker::new().validate(model_of(relu_graph())).unwrap();
        let graph = model.graph.unwrap();
        assert_eq!(graph.value_info.len(), 1);
        assert_eq!(graph.value_info[0].name, "h");
        assert_eq!(graph.value_info[0].get_shape(), Some(vec![2, 3]));
    }

    #[test]
    fn test_reshape_data_propagation() {
        let mut graph = relu_graph();
        graph
            .initializer
            .push(tensor_to_proto(&Tensor::vec_i64(&[-1]), "shape"));
        graph.node[1] = node("Reshape", "Reshape_2", &["h", "shape"], &["flat"]);
        graph.node.push(node("Neg", "Neg_3", &["flat"], &["y"]));
        let model = OnnxChecker::new().validate(model_of(graph)).unwrap();
        let graph = model.graph.unwrap();
        let flat = graph.value_info.iter().find(|v| v.name == "flat").unwrap();
        assert_eq!(flat.get_shape(), Some(vec![6]));
    }

    #[test]
    fn test_check_type_and_strict_mode() {
        let mut graph = relu_graph();
        graph.input.push(make_tensor_value_info("i", DataType::Int64 as i32, &[2, 3]));
        graph.node.push(node("Add", "Add_3", &["y", "i"], &["z"]));
        let checker = OnnxChecker {
            check_type: true,
            ..OnnxChecker::default()
        };
        assert!(matches!(
            checker.validate(model_of(graph)),
            Err(ExportError::Validation(_))
        ));

        let mut graph = relu_graph();
        graph
            .initializer
            .push(tensor_to_proto(&Tensor::scalar_f32(1.0), "unused"));
        assert!(OnnxChecker::new().validate(model_of(graph.clone())).is_ok());
        let strict = OnnxChecker {
            strict_mode: true,
            ..OnnxChecker::default()
        };
        assert!(strict.validate(model_of(graph)).is_err());
    }
}
