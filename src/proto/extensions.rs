//! Extension methods for ONNX protobuf types
//!
//! Provides constructors in the spirit of `onnx.helper` and a few accessors
//! used by the emitter, the checker and the tests.

use super::onnx::*;

// ============================================================================
// ModelProto extensions
// ============================================================================

impl ModelProto {
    /// Get the opset version for the default domain
    pub fn get_opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| op.domain.is_empty() || op.domain == "ai.onnx")
            .map(|op| op.version)
    }

    /// Get the opset version imported for a custom domain
    pub fn get_domain_version(&self, domain: &str) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| op.domain == domain)
            .map(|op| op.version)
    }
}

// ============================================================================
// GraphProto extensions
// ============================================================================

impl GraphProto {
    /// Find a node by name
    pub fn find_node(&self, name: &str) -> Option<&NodeProto> {
        self.node.iter().find(|n| n.name == name)
    }

    /// Nodes with the given op type, in graph order
    pub fn nodes_of_type<'a>(&'a self, op_type: &'a str) -> impl Iterator<Item = &'a NodeProto> {
        self.node.iter().filter(move |n| n.op_type == op_type)
    }

    /// Find an initializer by name
    pub fn find_initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializer.iter().find(|t| t.name == name)
    }

    /// Names of the graph inputs
    pub fn input_names(&self) -> Vec<&str> {
        self.input.iter().map(|v| v.name.as_str()).collect()
    }

    /// Names of the graph outputs
    pub fn output_names(&self) -> Vec<&str> {
        self.output.iter().map(|v| v.name.as_str()).collect()
    }
}

// ============================================================================
// NodeProto extensions
// ============================================================================

impl NodeProto {
    /// Get attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|attr| attr.name == name)
    }

    /// Get integer attribute value with default
    pub fn get_attribute_int(&self, name: &str, default: i64) -> i64 {
        self.get_attribute(name).map(|a| a.i).unwrap_or(default)
    }

    /// Get repeated int attribute
    pub fn get_attribute_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_attribute(name).map(|a| a.ints.as_slice())
    }

    /// Get string attribute value
    pub fn get_attribute_string(&self, name: &str) -> Option<&str> {
        self.get_attribute(name)
            .and_then(|a| std::str::from_utf8(&a.s).ok())
    }

    /// Get a graph-valued attribute (control-flow branches)
    pub fn get_attribute_graph(&self, name: &str) -> Option<&GraphProto> {
        self.get_attribute(name).and_then(|a| a.g.as_ref())
    }
}

// ============================================================================
// ValueInfoProto extensions
// ============================================================================

impl ValueInfoProto {
    /// Get the shape dimensions if available; symbolic or unknown dims are -1
    pub fn get_shape(&self) -> Option<Vec<i64>> {
        self.tensor_type().and_then(|tensor| {
            tensor.shape.as_ref().map(|s| {
                s.dim
                    .iter()
                    .map(|d| match &d.value {
                        Some(tensor_shape_proto::dimension::Value::DimValue(v)) => *v,
                        Some(tensor_shape_proto::dimension::Value::DimParam(_)) => -1,
                        None => -1,
                    })
                    .collect()
            })
        })
    }

    /// Get the symbolic dimension names, `None` for static or unknown dims
    pub fn get_dim_params(&self) -> Vec<Option<String>> {
        self.tensor_type()
            .and_then(|t| t.shape.as_ref())
            .map(|s| {
                s.dim
                    .iter()
                    .map(|d| match &d.value {
                        Some(tensor_shape_proto::dimension::Value::DimParam(p)) => Some(p.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get the element type if this is a tensor type
    pub fn get_elem_type(&self) -> Option<i32> {
        self.tensor_type().map(|t| t.elem_type)
    }

    fn tensor_type(&self) -> Option<&type_proto::Tensor> {
        self.r#type.as_ref().and_then(|t| match t.value.as_ref() {
            Some(type_proto::Value::TensorType(tensor)) => Some(tensor),
            _ => None,
        })
    }
}

// ============================================================================
// TensorProto extensions
// ============================================================================

impl TensorProto {
    /// Get the total number of elements
    pub fn num_elements(&self) -> usize {
        self.dims.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Get data type enum value
    pub fn data_type_enum(&self) -> tensor_proto::DataType {
        tensor_proto::DataType::try_from(self.data_type)
            .unwrap_or(tensor_proto::DataType::Undefined)
    }
}

// ============================================================================
// AttributeProto constructors
// ============================================================================

impl AttributeProto {
    fn named(name: &str, ty: attribute_proto::AttributeType) -> Self {
        Self {
            name: name.to_string(),
            r#type: ty as i32,
            ..Default::default()
        }
    }

    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            i: value,
            ..Self::named(name, attribute_proto::AttributeType::Int)
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            f: value,
            ..Self::named(name, attribute_proto::AttributeType::Float)
        }
    }

    /// Create a new string attribute
    pub fn new_string(name: &str, value: &str) -> Self {
        Self {
            s: value.as_bytes().to_vec(),
            ..Self::named(name, attribute_proto::AttributeType::String)
        }
    }

    /// Create a new tensor attribute
    pub fn new_tensor(name: &str, value: TensorProto) -> Self {
        Self {
            t: Some(value),
            ..Self::named(name, attribute_proto::AttributeType::Tensor)
        }
    }

    /// Create a new graph attribute
    pub fn new_graph(name: &str, value: GraphProto) -> Self {
        Self {
            g: Some(value),
            ..Self::named(name, attribute_proto::AttributeType::Graph)
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            ints: values,
            ..Self::named(name, attribute_proto::AttributeType::Ints)
        }
    }

    /// Create a new floats attribute
    pub fn new_floats(name: &str, values: Vec<f32>) -> Self {
        Self {
            floats: values,
            ..Self::named(name, attribute_proto::AttributeType::Floats)
        }
    }

    /// Create a new strings attribute
    pub fn new_strings(name: &str, values: &[String]) -> Self {
        Self {
            strings: values.iter().map(|s| s.as_bytes().to_vec()).collect(),
            ..Self::named(name, attribute_proto::AttributeType::Strings)
        }
    }

    /// Create a new tensors attribute
    pub fn new_tensors(name: &str, values: Vec<TensorProto>) -> Self {
        Self {
            tensors: values,
            ..Self::named(name, attribute_proto::AttributeType::Tensors)
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: &[i64]) -> ValueInfoProto {
    make_value_info(
        name,
        Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type,
                shape: Some(TensorShapeProto {
                    dim: shape.iter().map(|&d| make_dim_value(d)).collect(),
                }),
            })),
            denotation: String::new(),
        }),
        "",
    )
}

/// Create a ValueInfoProto with an optional type
pub fn make_value_info(name: &str, ty: Option<TypeProto>, doc_string: &str) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: ty,
        doc_string: doc_string.to_string(),
    }
}

/// Static dimension
pub fn make_dim_value(value: i64) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimValue(value)),
        denotation: String::new(),
    }
}

/// Symbolic dimension
pub fn make_dim_param(param: &str) -> tensor_shape_proto::Dimension {
    tensor_shape_proto::Dimension {
        value: Some(tensor_shape_proto::dimension::Value::DimParam(
            param.to_string(),
        )),
        denotation: String::new(),
    }
}

/// Create a new NodeProto
pub fn make_node(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeProto {
    NodeProto {
        op_type: op_type.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create a new GraphProto
pub fn make_graph(
    name: &str,
    nodes: Vec<NodeProto>,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    initializer: Vec<TensorProto>,
    doc_string: &str,
) -> GraphProto {
    GraphProto {
        node: nodes,
        name: name.to_string(),
        initializer,
        doc_string: doc_string.to_string(),
        input: inputs,
        output: outputs,
        value_info: Vec::new(),
    }
}

/// Create an opset import entry
pub fn make_opsetid(domain: &str, version: i64) -> OperatorSetIdProto {
    OperatorSetIdProto {
        domain: domain.to_string(),
        version,
    }
}

// ============================================================================
// Printing
// ============================================================================

fn printable_value_info(info: &ValueInfoProto) -> String {
    let elem = match info.get_elem_type() {
        Some(t) => tensor_proto::DataType::try_from(t).unwrap_or(tensor_proto::DataType::Undefined),
        None => return format!("%{}", info.name),
    };
    let dims: Vec<String> = info
        .get_dim_params()
        .into_iter()
        .zip(info.get_shape().unwrap_or_default())
        .map(|(param, size)| match param {
            Some(param) => param,
            None if size >= 0 => size.to_string(),
            None => "?".to_string(),
        })
        .collect();
    let elem = format!("{:?}", elem).to_uppercase();
    if dims.is_empty() {
        format!("%{}[{}]", info.name, elem)
    } else {
        format!("%{}[{}, {}]", info.name, elem, dims.join("x"))
    }
}

fn printable_attribute(attr: &AttributeProto) -> String {
    use attribute_proto::AttributeType;

    let ty = AttributeType::try_from(attr.r#type).unwrap_or(AttributeType::Undefined);
    let value = match ty {
        AttributeType::Float => attr.f.to_string(),
        AttributeType::Int => attr.i.to_string(),
        AttributeType::String => format!("'{}'", String::from_utf8_lossy(&attr.s)),
        AttributeType::Tensor => "<Tensor>".to_string(),
        AttributeType::Graph => match &attr.g {
            Some(g) => format!("<graph {}>", g.name),
            None => "<graph>".to_string(),
        },
        AttributeType::Floats => format!("{:?}", attr.floats),
        AttributeType::Ints => format!("{:?}", attr.ints),
        AttributeType::Strings => {
            let items: Vec<String> = attr
                .strings
                .iter()
                .map(|s| format!("'{}'", String::from_utf8_lossy(s)))
                .collect();
            format!("[{}]", items.join(", "))
        }
        AttributeType::Tensors => format!("<{} Tensors>", attr.tensors.len()),
        _ => format!("<{:?}>", ty),
    };
    format!("{} = {}", attr.name, value)
}

fn write_graph(out: &mut String, graph: &GraphProto) {
    let initializers: Vec<&str> = graph.initializer.iter().map(|t| t.name.as_str()).collect();
    let (inputs, optional): (Vec<&ValueInfoProto>, Vec<&ValueInfoProto>) = graph
        .input
        .iter()
        .partition(|i| !initializers.contains(&i.name.as_str()));
    let join = |infos: &[&ValueInfoProto]| {
        infos
            .iter()
            .map(|i| format!("  {}", printable_value_info(i)))
            .collect::<Vec<_>>()
            .join(",\n")
    };

    out.push_str(&format!("graph {} (\n{}\n)", graph.name, join(&inputs[..])));
    if !optional.is_empty() {
        out.push_str(&format!(" optional inputs with matching initializers (\n{}\n)", join(&optional[..])));
    }
    if !initializers.is_empty() {
        let names: Vec<String> = initializers.iter().map(|n| format!("  %{}", n)).collect();
        out.push_str(&format!(" initializers (\n{}\n)", names.join(",\n")));
    }
    out.push_str(" {\n");

    let mut subgraphs = Vec::new();
    for node in &graph.node {
        let outputs: Vec<String> = node.output.iter().map(|o| format!("%{}", o)).collect();
        let inputs: Vec<String> = node.input.iter().map(|i| format!("%{}", i)).collect();
        let attrs: Vec<String> = node.attribute.iter().map(printable_attribute).collect();
        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!("[{}]", attrs.join(", "))
        };
        out.push_str(&format!(
            "  {} = {}{}({})\n",
            outputs.join(", "),
            node.op_type,
            attrs,
            inputs.join(", ")
        ));
        subgraphs.extend(node.attribute.iter().filter_map(|a| a.g.as_ref()));
    }
    let returns: Vec<String> = graph.output.iter().map(|o| format!("%{}", o.name)).collect();
    out.push_str(&format!("  return {}\n}}", returns.join(", ")));

    for subgraph in subgraphs {
        out.push_str("\n\n");
        write_graph(out, subgraph);
    }
}

/// Human readable dump of a graph, in the layout of `onnx.helper.printable_graph`
///
/// Nested subgraphs are printed after the graph that owns them.
pub fn printable_graph(graph: &GraphProto) -> String {
    let mut out = String::new();
    write_graph(&mut out, graph);
    out
}
