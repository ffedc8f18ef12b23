//! Tensor conversion utilities
//!
//! Convert between [`Tensor`] and ONNX `TensorProto`. Outgoing tensors always
//! use the typed data fields; incoming tensors may use either typed fields or
//! `raw_data`.

use ndarray::{ArrayD, IxDyn};

use crate::error::{ExportError, ExportResult};
use crate::proto::onnx::tensor_proto::DataType;
use crate::proto::TensorProto;

use super::dtype::{dtype_size, i32_to_dtype, ScalarType};
use super::shape::numel;
use super::Tensor;

/// Convert a tensor to a named `TensorProto`
///
/// int8/uint8/int16/bool payloads go into `int32_data` as the ONNX schema
/// requires.
pub fn tensor_to_proto(tensor: &Tensor, name: &str) -> TensorProto {
    let mut proto = TensorProto {
        dims: tensor.dims(),
        name: name.to_string(),
        ..Default::default()
    };

    match tensor {
        Tensor::Float(a) => {
            proto.data_type = DataType::Float as i32;
            proto.float_data = a.iter().copied().collect();
        }
        Tensor::Double(a) => {
            proto.data_type = DataType::Double as i32;
            proto.double_data = a.iter().copied().collect();
        }
        Tensor::Int64(a) => {
            proto.data_type = DataType::Int64 as i32;
            proto.int64_data = a.iter().copied().collect();
        }
        Tensor::Int32(a) => {
            proto.data_type = DataType::Int32 as i32;
            proto.int32_data = a.iter().copied().collect();
        }
        Tensor::Int16(a) => {
            proto.data_type = DataType::Int16 as i32;
            proto.int32_data = a.iter().map(|&v| i32::from(v)).collect();
        }
        Tensor::Int8(a) => {
            proto.data_type = DataType::Int8 as i32;
            proto.int32_data = a.iter().map(|&v| i32::from(v)).collect();
        }
        Tensor::UInt8(a) => {
            proto.data_type = DataType::Uint8 as i32;
            proto.int32_data = a.iter().map(|&v| i32::from(v)).collect();
        }
        Tensor::Bool(a) => {
            proto.data_type = DataType::Bool as i32;
            proto.int32_data = a.iter().map(|&v| i32::from(v)).collect();
        }
    }

    proto
}

/// Convert a `TensorProto` back into a tensor
pub fn proto_to_tensor(proto: &TensorProto) -> ExportResult<Tensor> {
    let dtype = i32_to_dtype(proto.data_type)?;
    let scalar_type = ScalarType::from_onnx(dtype)?;
    let shape: Vec<usize> = proto.dims.iter().map(|&d| d.max(0) as usize).collect();
    let expected_len = numel(&proto.dims);

    if !proto.raw_data.is_empty() {
        return decode_raw(&proto.raw_data, dtype, &shape, expected_len);
    }

    match dtype {
        DataType::Float => build(&shape, proto.float_data.clone()).map(Tensor::Float),
        DataType::Double => build(&shape, proto.double_data.clone()).map(Tensor::Double),
        DataType::Int64 => build(&shape, proto.int64_data.clone()).map(Tensor::Int64),
        DataType::Int32
        | DataType::Int16
        | DataType::Int8
        | DataType::Uint8
        | DataType::Bool => {
            let values: Vec<i64> = proto.int32_data.iter().map(|&v| i64::from(v)).collect();
            let array = build(&shape, values)?;
            Tensor::from_i64_array(array, scalar_type)
        }
        _ => Err(ExportError::InvalidDataType(proto.data_type)),
    }
}

// ============================================================================
// Internal helpers
// ============================================================================

fn build<T>(shape: &[usize], data: Vec<T>) -> ExportResult<ArrayD<T>> {
    let len = data.len();
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
        ExportError::InvalidGraph(format!(
            "Data length {} does not match shape {:?}",
            len, shape
        ))
    })
}

fn decode_raw(
    raw: &[u8],
    dtype: DataType,
    shape: &[usize],
    expected: usize,
) -> ExportResult<Tensor> {
    let elem_size = dtype_size(dtype)?;
    if raw.len() != expected * elem_size {
        return Err(ExportError::InvalidGraph(format!(
            "Raw data size {} does not match expected {} * {}",
            raw.len(),
            expected,
            elem_size
        )));
    }

    match dtype {
        DataType::Float => build(
            shape,
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
        .map(Tensor::Float),
        DataType::Double => build(
            shape,
            raw.chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
        )
        .map(Tensor::Double),
        DataType::Int64 => build(
            shape,
            raw.chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
        )
        .map(Tensor::Int64),
        DataType::Int32 => build(
            shape,
            raw.chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
        .map(Tensor::Int32),
        DataType::Uint8 => build(shape, raw.to_vec()).map(Tensor::UInt8),
        DataType::Int8 => build(shape, raw.iter().map(|&b| b as i8).collect()).map(Tensor::Int8),
        DataType::Bool => build(shape, raw.iter().map(|&b| b != 0).collect()).map(Tensor::Bool),
        _ => Err(ExportError::InvalidDataType(dtype as i32)),
    }
}
