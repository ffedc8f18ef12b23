//! ONNX model reader
//!
//! Load exported models back, mostly for inspection and tests.

use std::fs;
use std::path::Path;

use prost::Message;

use crate::error::{ExportError, ExportResult};
use crate::proto::{GraphProto, ModelProto};

/// Load an ONNX model from a file path
///
/// # Example
///
/// ```ignore
/// use trace2onnx::io::load_model;
///
/// let model = load_model("model.onnx")?;
/// println!("IR version: {}", model.ir_version);
/// ```
pub fn load_model<P: AsRef<Path>>(path: P) -> ExportResult<ModelProto> {
    let bytes = fs::read(path.as_ref())?;
    load_model_from_bytes(&bytes)
}

/// Decode an ONNX model from bytes
pub fn load_model_from_bytes(bytes: &[u8]) -> ExportResult<ModelProto> {
    Ok(ModelProto::decode(bytes)?)
}

/// Load only the graph of a model file
pub fn load_graph<P: AsRef<Path>>(path: P) -> ExportResult<GraphProto> {
    load_model(path)?
        .graph
        .ok_or_else(|| ExportError::InvalidGraph("model does not contain a graph".to_string()))
}

/// Summary of a model
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// IR version
    pub ir_version: i64,
    /// Producer name
    pub producer_name: String,
    /// Producer version
    pub producer_version: String,
    /// Opset imports as (domain, version)
    pub opsets: Vec<(String, i64)>,
    /// Graph name
    pub graph_name: String,
    /// Number of root nodes
    pub node_count: usize,
    /// Number of nested subgraphs
    pub subgraph_count: usize,
    /// Number of initializers
    pub initializer_count: usize,
    /// Input names
    pub inputs: Vec<String>,
    /// Output names
    pub outputs: Vec<String>,
}

fn count_subgraphs(graph: &GraphProto) -> usize {
    graph
        .node
        .iter()
        .flat_map(|n| n.attribute.iter())
        .filter_map(|a| a.g.as_ref())
        .map(|g| 1 + count_subgraphs(g))
        .sum()
}

impl ModelInfo {
    /// Extract the summary of a model
    pub fn from_model(model: &ModelProto) -> Self {
        let graph = model.graph.as_ref();

        Self {
            ir_version: model.ir_version,
            producer_name: model.producer_name.clone(),
            producer_version: model.producer_version.clone(),
            opsets: model
                .opset_import
                .iter()
                .map(|op| (op.domain.clone(), op.version))
                .collect(),
            graph_name: graph.map(|g| g.name.clone()).unwrap_or_default(),
            node_count: graph.map(|g| g.node.len()).unwrap_or(0),
            subgraph_count: graph.map(count_subgraphs).unwrap_or(0),
            initializer_count: graph.map(|g| g.initializer.len()).unwrap_or(0),
            inputs: graph
                .map(|g| g.input.iter().map(|i| i.name.clone()).collect())
                .unwrap_or_default(),
            outputs: graph
                .map(|g| g.output.iter().map(|o| o.name.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{AttributeProto, NodeProto, ValueInfoProto};

    fn create_test_model() -> ModelProto {
        let branch = GraphProto {
            name: "If_1_then_branch".to_string(),
            ..Default::default()
        };
        let mut cond = NodeProto {
            op_type: "If".to_string(),
            name: "If_1".to_string(),
            input: vec!["c".to_string()],
            output: vec!["y".to_string()],
            ..Default::default()
        };
        cond.attribute.push(AttributeProto::new_graph("then_branch", branch.clone()));
        cond.attribute.push(AttributeProto::new_graph("else_branch", branch));
        ModelProto {
            ir_version: 7,
            producer_name: "test".to_string(),
            producer_version: "1.0".to_string(),
            graph: Some(GraphProto {
                name: "test_graph".to_string(),
                node: vec![cond],
                input: vec![ValueInfoProto {
                    name: "c".to_string(),
                    ..Default::default()
                }],
                output: vec![ValueInfoProto {
                    name: "y".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_load_from_bytes() {
        let bytes = create_test_model().encode_to_vec();
        let loaded = load_model_from_bytes(&bytes).unwrap();
        assert_eq!(loaded.ir_version, 7);
        assert_eq!(loaded.producer_name, "test");
    }

    #[test]
    fn test_model_info() {
        let info = ModelInfo::from_model(&create_test_model());
        assert_eq!(info.graph_name, "test_graph");
        assert_eq!(info.node_count, 1);
        assert_eq!(info.subgraph_count, 2);
        assert_eq!(info.inputs, vec!["c"]);
        assert_eq!(info.outputs, vec!["y"]);
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(matches!(
            load_model_from_bytes(&[0xff, 0xff, 0xff]),
            Err(ExportError::ProtoDecode(_))
        ));
    }
}
