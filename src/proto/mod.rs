//! ONNX Protocol Buffer types
//!
//! This module exposes the prost message types of the ONNX schema.
//! Constructors and accessors used by the emitter live in the `extensions`
//! submodule.

/// ONNX protobuf types
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod onnx;

// Re-export commonly used types at module level
pub use onnx::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, StringStringEntryProto,
    TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

// Re-export submodules for nested types
pub use onnx::attribute_proto;
pub use onnx::tensor_proto;
pub use onnx::tensor_shape_proto;
pub use onnx::type_proto;

/// Extension methods for ONNX protobuf types
pub mod extensions;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_model_proto_default() {
        let model = ModelProto::default();
        assert_eq!(model.ir_version, 0);
        assert!(model.graph.is_none());
    }

    #[test]
    fn test_nested_type_survives_encoding() {
        let seq = TypeProto {
            value: Some(type_proto::Value::SequenceType(type_proto::Sequence {
                elem_type: Some(Box::new(TypeProto {
                    value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                        elem_type: tensor_proto::DataType::Float as i32,
                        shape: None,
                    })),
                    denotation: String::new(),
                })),
            })),
            denotation: "Tensor[]".to_string(),
        };

        let bytes = seq.encode_to_vec();
        let decoded = TypeProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, seq);
    }
}
