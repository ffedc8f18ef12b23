//! Projection of program graph types onto ONNX `TypeProto`

use crate::error::{ExportError, ExportResult};
use crate::graph::{Dim, JitType, TensorType};
use crate::proto::extensions::{make_dim_param, make_dim_value};
use crate::proto::tensor_proto::DataType;
use crate::proto::tensor_shape_proto::Dimension;
use crate::proto::{type_proto, TensorShapeProto, TypeProto, ValueInfoProto};
use crate::tensor::Tensor;

fn tensor_type(elem_type: i32, shape: Option<TensorShapeProto>) -> TypeProto {
    TypeProto {
        value: Some(type_proto::Value::TensorType(type_proto::Tensor {
            elem_type,
            shape,
        })),
        denotation: String::new(),
    }
}

fn dimension(dim: &Dim) -> Dimension {
    match dim {
        Dim::Static(v) => make_dim_value(*v),
        Dim::Dynamic(Some(name)) => make_dim_param(name),
        Dim::Dynamic(None) => Dimension::default(),
    }
}

fn project_tensor(t: &TensorType) -> ExportResult<TypeProto> {
    let elem_type = match t.scalar_type {
        Some(st) => st.to_onnx()? as i32,
        None => DataType::Undefined as i32,
    };
    let shape = t.sizes.as_ref().map(|sizes| TensorShapeProto {
        dim: sizes.iter().map(dimension).collect(),
    });
    Ok(tensor_type(elem_type, shape))
}

/// ONNX type of a program graph type
///
/// Only `None`, lists, `int` and tensors have a counterpart. A tensor of
/// unknown rank gets no shape; unknown dimensions keep their symbolic name
/// when they have one. The denotation is the type's display string, except
/// for `None` which projects to an empty type.
pub fn project(ty: &JitType) -> ExportResult<TypeProto> {
    let mut proto = match ty {
        JitType::None => return Ok(TypeProto::default()),
        JitType::List(elem) => TypeProto {
            value: Some(type_proto::Value::SequenceType(type_proto::Sequence {
                elem_type: Some(Box::new(project(elem)?)),
            })),
            denotation: String::new(),
        },
        JitType::Int => tensor_type(
            DataType::Int64 as i32,
            Some(TensorShapeProto::default()),
        ),
        JitType::Tensor(t) => project_tensor(t)?,
        other => {
            return Err(ExportError::UnsupportedType(format!(
                "{} ({}) has no ONNX type",
                other,
                other.kind_name()
            )))
        }
    };
    proto.denotation = ty.to_string();
    Ok(proto)
}

/// Overwrite element type and sizes of a value info with those of an
/// example tensor
///
/// Dimensions that already carry a symbolic name keep it.
pub fn apply_tensor_info(info: &mut ValueInfoProto, tensor: &Tensor) -> ExportResult<()> {
    let elem_type = tensor.scalar_type().to_onnx()? as i32;
    let previous = info.get_dim_params();
    let dim = tensor
        .dims()
        .into_iter()
        .enumerate()
        .map(|(i, size)| match previous.get(i) {
            Some(Some(param)) => make_dim_param(param),
            _ => make_dim_value(size),
        })
        .collect();
    let denotation = info
        .r#type
        .as_ref()
        .map(|t| t.denotation.clone())
        .unwrap_or_default();
    let mut ty = tensor_type(elem_type, Some(TensorShapeProto { dim }));
    ty.denotation = denotation;
    info.r#type = Some(ty);
    Ok(())
}

/// Mark dimensions of a value info as symbolic
pub fn apply_dynamic_axes(info: &mut ValueInfoProto, axes: &[(i64, String)]) {
    let shape = match info.r#type.as_mut().and_then(|t| t.value.as_mut()) {
        Some(type_proto::Value::TensorType(type_proto::Tensor {
            shape: Some(shape), ..
        })) => shape,
        _ => return,
    };
    for (axis, name) in axes {
        let rank = shape.dim.len() as i64;
        let index = if *axis < 0 { axis + rank } else { *axis };
        if let Some(d) = usize::try_from(index).ok().and_then(|i| shape.dim.get_mut(i)) {
            *d = make_dim_param(name);
        }
    }
}
