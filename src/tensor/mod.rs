//! Literal tensors
//!
//! [`Tensor`] is the payload type used everywhere a concrete value appears:
//! parameters in a traced module's state dict, example inputs and outputs,
//! constant node attributes, and constant-folding results.
//!
//! - Scalar type table (`dtype`)
//! - Shape utilities (`shape`)
//! - Conversion to and from `TensorProto` (`convert`)

pub mod convert;
pub mod dtype;
pub mod shape;

use std::fmt;

use ndarray::{ArrayD, IxDyn};

use crate::error::{ExportError, ExportResult};

// Re-export commonly used items
pub use convert::{proto_to_tensor, tensor_to_proto};
pub use dtype::{dtype_size, i32_to_dtype, ScalarType};
pub use shape::{broadcast_shape, is_broadcastable, normalize_axis, numel};

/// Dense tensor with a dynamic shape
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// float32
    Float(ArrayD<f32>),
    /// float64
    Double(ArrayD<f64>),
    /// int8
    Int8(ArrayD<i8>),
    /// uint8
    UInt8(ArrayD<u8>),
    /// int16
    Int16(ArrayD<i16>),
    /// int32
    Int32(ArrayD<i32>),
    /// int64
    Int64(ArrayD<i64>),
    /// bool
    Bool(ArrayD<bool>),
}

/// Evaluate `$body` with `$a` bound to the inner array of any variant
macro_rules! with_array {
    ($t:expr, $a:ident => $body:expr) => {
        match $t {
            Tensor::Float($a) => $body,
            Tensor::Double($a) => $body,
            Tensor::Int8($a) => $body,
            Tensor::UInt8($a) => $body,
            Tensor::Int16($a) => $body,
            Tensor::Int32($a) => $body,
            Tensor::Int64($a) => $body,
            Tensor::Bool($a) => $body,
        }
    };
}

/// Rebuild the same variant from `$body`
macro_rules! map_array {
    ($t:expr, $a:ident => $body:expr) => {
        match $t {
            Tensor::Float($a) => Tensor::Float($body),
            Tensor::Double($a) => Tensor::Double($body),
            Tensor::Int8($a) => Tensor::Int8($body),
            Tensor::UInt8($a) => Tensor::UInt8($body),
            Tensor::Int16($a) => Tensor::Int16($body),
            Tensor::Int32($a) => Tensor::Int32($body),
            Tensor::Int64($a) => Tensor::Int64($body),
            Tensor::Bool($a) => Tensor::Bool($body),
        }
    };
}

impl Tensor {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Build a float tensor from a shape and row-major data
    pub fn from_vec_f32(shape: &[usize], data: Vec<f32>) -> ExportResult<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Tensor::Float)
            .map_err(|e| ExportError::Internal(e.to_string()))
    }

    /// Build an int64 tensor from a shape and row-major data
    pub fn from_vec_i64(shape: &[usize], data: Vec<i64>) -> ExportResult<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Tensor::Int64)
            .map_err(|e| ExportError::Internal(e.to_string()))
    }

    /// 1-D int64 tensor
    pub fn vec_i64(data: &[i64]) -> Self {
        Tensor::Int64(ndarray::Array1::from(data.to_vec()).into_dyn())
    }

    /// 0-d float tensor
    pub fn scalar_f32(value: f32) -> Self {
        Tensor::Float(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// 0-d double tensor
    pub fn scalar_f64(value: f64) -> Self {
        Tensor::Double(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// 0-d int64 tensor
    pub fn scalar_i64(value: i64) -> Self {
        Tensor::Int64(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// 0-d bool tensor
    pub fn scalar_bool(value: bool) -> Self {
        Tensor::Bool(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Zero-filled tensor of the given type
    pub fn zeros(scalar_type: ScalarType, shape: &[usize]) -> ExportResult<Self> {
        let values = ArrayD::<f64>::zeros(IxDyn(shape));
        Self::from_f64_array(values, scalar_type)
    }

    /// Convert an f64 array into a tensor of the given scalar type
    pub fn from_f64_array(values: ArrayD<f64>, scalar_type: ScalarType) -> ExportResult<Self> {
        Ok(match scalar_type {
            ScalarType::Float => Tensor::Float(values.mapv(|v| v as f32)),
            ScalarType::Double => Tensor::Double(values),
            ScalarType::Char => Tensor::Int8(values.mapv(|v| v as i8)),
            ScalarType::Byte => Tensor::UInt8(values.mapv(|v| v as u8)),
            ScalarType::Short => Tensor::Int16(values.mapv(|v| v as i16)),
            ScalarType::Int => Tensor::Int32(values.mapv(|v| v as i32)),
            ScalarType::Long => Tensor::Int64(values.mapv(|v| v as i64)),
            ScalarType::Bool => Tensor::Bool(values.mapv(|v| v != 0.0)),
            other => {
                return Err(ExportError::UnsupportedType(format!(
                    "cannot materialize {} tensor",
                    other
                )))
            }
        })
    }

    /// Convert an i64 array into a tensor of the given scalar type
    pub fn from_i64_array(values: ArrayD<i64>, scalar_type: ScalarType) -> ExportResult<Self> {
        Ok(match scalar_type {
            ScalarType::Long => Tensor::Int64(values),
            ScalarType::Int => Tensor::Int32(values.mapv(|v| v as i32)),
            ScalarType::Short => Tensor::Int16(values.mapv(|v| v as i16)),
            ScalarType::Char => Tensor::Int8(values.mapv(|v| v as i8)),
            ScalarType::Byte => Tensor::UInt8(values.mapv(|v| v as u8)),
            ScalarType::Bool => Tensor::Bool(values.mapv(|v| v != 0)),
            other => return Self::from_f64_array(values.mapv(|v| v as f64), other),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Element type
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Tensor::Float(_) => ScalarType::Float,
            Tensor::Double(_) => ScalarType::Double,
            Tensor::Int8(_) => ScalarType::Char,
            Tensor::UInt8(_) => ScalarType::Byte,
            Tensor::Int16(_) => ScalarType::Short,
            Tensor::Int32(_) => ScalarType::Int,
            Tensor::Int64(_) => ScalarType::Long,
            Tensor::Bool(_) => ScalarType::Bool,
        }
    }

    /// Shape as usize
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Shape as ONNX dims
    pub fn dims(&self) -> Vec<i64> {
        self.shape().iter().map(|&d| d as i64).collect()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        with_array!(self, a => a.len())
    }

    /// Check if this tensor is integral or bool
    pub fn is_integral(&self) -> bool {
        !self.scalar_type().is_floating_point()
    }

    /// All elements as f64, preserving shape
    pub fn to_f64_array(&self) -> ArrayD<f64> {
        match self {
            Tensor::Float(a) => a.mapv(f64::from),
            Tensor::Double(a) => a.clone(),
            Tensor::Int8(a) => a.mapv(f64::from),
            Tensor::UInt8(a) => a.mapv(f64::from),
            Tensor::Int16(a) => a.mapv(f64::from),
            Tensor::Int32(a) => a.mapv(f64::from),
            Tensor::Int64(a) => a.mapv(|v| v as f64),
            Tensor::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        }
    }

    /// All elements as i64, preserving shape (floats truncate)
    pub fn to_i64_array(&self) -> ArrayD<i64> {
        match self {
            Tensor::Float(a) => a.mapv(|v| v as i64),
            Tensor::Double(a) => a.mapv(|v| v as i64),
            Tensor::Int8(a) => a.mapv(i64::from),
            Tensor::UInt8(a) => a.mapv(i64::from),
            Tensor::Int16(a) => a.mapv(i64::from),
            Tensor::Int32(a) => a.mapv(i64::from),
            Tensor::Int64(a) => a.clone(),
            Tensor::Bool(a) => a.mapv(i64::from),
        }
    }

    /// Flattened elements as i64
    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.to_i64_array().iter().copied().collect()
    }

    /// The single element as i64, if the tensor has exactly one element
    pub fn item_i64(&self) -> Option<i64> {
        (self.numel() == 1).then(|| self.to_i64_array().iter().copied().next()).flatten()
    }

    /// The single element as f64, if the tensor has exactly one element
    pub fn item_f64(&self) -> Option<f64> {
        (self.numel() == 1).then(|| self.to_f64_array().iter().copied().next()).flatten()
    }

    // ========================================================================
    // Transformations
    // ========================================================================

    /// Convert to another scalar type
    pub fn cast(&self, scalar_type: ScalarType) -> ExportResult<Self> {
        if self.scalar_type() == scalar_type {
            return Ok(self.clone());
        }
        if self.is_integral() {
            Self::from_i64_array(self.to_i64_array(), scalar_type)
        } else {
            Self::from_f64_array(self.to_f64_array(), scalar_type)
        }
    }

    /// Reshape keeping the element order
    pub fn reshape(&self, shape: &[usize]) -> ExportResult<Self> {
        Ok(map_array!(self, a => reshape_array(a, shape)?))
    }
}

fn reshape_array<T: Clone>(a: &ArrayD<T>, shape: &[usize]) -> ExportResult<ArrayD<T>> {
    let data: Vec<T> = a.iter().cloned().collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| {
        ExportError::InvalidGraph(format!(
            "cannot reshape {:?} into {:?}: {}",
            a.shape(),
            shape,
            e
        ))
    })
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape().iter().map(|d| d.to_string()).collect();
        write!(f, "{}({})", self.scalar_type(), dims.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_constructors() {
        let t = Tensor::scalar_i64(3);
        assert_eq!(t.ndim(), 0);
        assert_eq!(t.numel(), 1);
        assert_eq!(t.item_i64(), Some(3));
        assert_eq!(t.scalar_type(), ScalarType::Long);
    }

    #[test]
    fn test_from_vec_shape_mismatch() {
        assert!(Tensor::from_vec_f32(&[2, 2], vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_cast() {
        let t = Tensor::from_vec_f32(&[3], vec![1.5, -2.0, 0.0]).unwrap();
        let l = t.cast(ScalarType::Long).unwrap();
        assert_eq!(l.to_i64_vec(), vec![1, -2, 0]);

        let b = t.cast(ScalarType::Bool).unwrap();
        assert_eq!(b.to_i64_vec(), vec![1, 1, 0]);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::vec_i64(&[1, 2, 3, 4, 5, 6]);
        let r = t.reshape(&[2, 3]).unwrap();
        assert_eq!(r.shape(), &[2, 3]);
        assert!(t.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_display() {
        let t = Tensor::from_vec_f32(&[2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(t.to_string(), "Float(2, 3)");
    }
}
