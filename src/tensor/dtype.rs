//! Scalar type table
//!
//! Maps the tracer's scalar types onto ONNX `TensorProto` data types.

use std::fmt;

use crate::error::{ExportError, ExportResult};
use crate::proto::onnx::tensor_proto::DataType;

/// Element type of a traced tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// uint8
    Byte,
    /// int8
    Char,
    /// int16
    Short,
    /// int32
    Int,
    /// int64
    Long,
    /// float16
    Half,
    /// float32
    Float,
    /// float64
    Double,
    /// complex64
    ComplexFloat,
    /// complex128
    ComplexDouble,
    /// bool
    Bool,
    /// bfloat16
    BFloat16,
    /// quantized int8
    QInt8,
    /// quantized uint8
    QUInt8,
    /// quantized int32
    QInt32,
}

impl ScalarType {
    /// ONNX element type for this scalar type
    ///
    /// Quantized types have no ONNX counterpart.
    pub fn to_onnx(self) -> ExportResult<DataType> {
        match self {
            ScalarType::Byte => Ok(DataType::Uint8),
            ScalarType::Char => Ok(DataType::Int8),
            ScalarType::Short => Ok(DataType::Int16),
            ScalarType::Int => Ok(DataType::Int32),
            ScalarType::Long => Ok(DataType::Int64),
            ScalarType::Half => Ok(DataType::Float16),
            ScalarType::Float => Ok(DataType::Float),
            ScalarType::Double => Ok(DataType::Double),
            ScalarType::ComplexFloat => Ok(DataType::Complex64),
            ScalarType::ComplexDouble => Ok(DataType::Complex128),
            ScalarType::Bool => Ok(DataType::Bool),
            ScalarType::BFloat16 => Ok(DataType::Bfloat16),
            ScalarType::QInt8 | ScalarType::QUInt8 | ScalarType::QInt32 => Err(
                ExportError::UnsupportedType(format!("scalar type {} has no ONNX mapping", self)),
            ),
        }
    }

    /// Scalar type for an ONNX element type
    pub fn from_onnx(dtype: DataType) -> ExportResult<Self> {
        match dtype {
            DataType::Uint8 => Ok(ScalarType::Byte),
            DataType::Int8 => Ok(ScalarType::Char),
            DataType::Int16 => Ok(ScalarType::Short),
            DataType::Int32 => Ok(ScalarType::Int),
            DataType::Int64 => Ok(ScalarType::Long),
            DataType::Float16 => Ok(ScalarType::Half),
            DataType::Float => Ok(ScalarType::Float),
            DataType::Double => Ok(ScalarType::Double),
            DataType::Complex64 => Ok(ScalarType::ComplexFloat),
            DataType::Complex128 => Ok(ScalarType::ComplexDouble),
            DataType::Bool => Ok(ScalarType::Bool),
            DataType::Bfloat16 => Ok(ScalarType::BFloat16),
            other => Err(ExportError::InvalidDataType(other as i32)),
        }
    }

    /// Check if this is a floating point type
    pub fn is_floating_point(self) -> bool {
        matches!(
            self,
            ScalarType::Half | ScalarType::Float | ScalarType::Double | ScalarType::BFloat16
        )
    }

    /// Check if this is an integral type (bool excluded)
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ScalarType::Byte
                | ScalarType::Char
                | ScalarType::Short
                | ScalarType::Int
                | ScalarType::Long
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::Byte => "Byte",
            ScalarType::Char => "Char",
            ScalarType::Short => "Short",
            ScalarType::Int => "Int",
            ScalarType::Long => "Long",
            ScalarType::Half => "Half",
            ScalarType::Float => "Float",
            ScalarType::Double => "Double",
            ScalarType::ComplexFloat => "ComplexFloat",
            ScalarType::ComplexDouble => "ComplexDouble",
            ScalarType::Bool => "Bool",
            ScalarType::BFloat16 => "BFloat16",
            ScalarType::QInt8 => "QInt8",
            ScalarType::QUInt8 => "QUInt8",
            ScalarType::QInt32 => "QInt32",
        };
        f.write_str(s)
    }
}

/// Size in bytes for each ONNX data type
pub fn dtype_size(dtype: DataType) -> ExportResult<usize> {
    match dtype {
        DataType::Float | DataType::Int32 | DataType::Uint32 => Ok(4),
        DataType::Uint8 | DataType::Int8 | DataType::Bool => Ok(1),
        DataType::Uint16 | DataType::Int16 | DataType::Float16 | DataType::Bfloat16 => Ok(2),
        DataType::Int64 | DataType::Double | DataType::Uint64 | DataType::Complex64 => Ok(8),
        DataType::Complex128 => Ok(16),
        DataType::Undefined | DataType::String => Err(ExportError::InvalidDataType(dtype as i32)),
    }
}

/// Convert i32 to DataType enum
pub fn i32_to_dtype(value: i32) -> ExportResult<DataType> {
    DataType::try_from(value).map_err(|_| ExportError::InvalidDataType(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_table() {
        assert_eq!(ScalarType::Float.to_onnx().unwrap(), DataType::Float);
        assert_eq!(ScalarType::Long.to_onnx().unwrap(), DataType::Int64);
        assert_eq!(ScalarType::Byte.to_onnx().unwrap(), DataType::Uint8);
        assert_eq!(ScalarType::Bool.to_onnx().unwrap(), DataType::Bool);
    }

    #[test]
    fn test_quantized_types_unsupported() {
        let err = ScalarType::QUInt8.to_onnx().unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedType(_)));
    }

    #[test]
    fn test_from_onnx() {
        assert_eq!(
            ScalarType::from_onnx(DataType::Double).unwrap(),
            ScalarType::Double
        );
        assert!(ScalarType::from_onnx(DataType::String).is_err());
    }

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size(DataType::Float).unwrap(), 4);
        assert_eq!(dtype_size(DataType::Int64).unwrap(), 8);
        assert_eq!(dtype_size(DataType::Uint8).unwrap(), 1);
        assert!(dtype_size(DataType::Undefined).is_err());
    }

    #[test]
    fn test_i32_to_dtype() {
        assert_eq!(i32_to_dtype(1).unwrap(), DataType::Float);
        assert_eq!(i32_to_dtype(7).unwrap(), DataType::Int64);
        assert!(i32_to_dtype(999).is_err());
    }

    #[test]
    fn test_type_classes() {
        assert!(ScalarType::Float.is_floating_point());
        assert!(!ScalarType::Long.is_floating_point());
        assert!(ScalarType::Int.is_integral());
        assert!(!ScalarType::Bool.is_integral());
    }
}
