//! Value types of the traced program graph
//!
//! Mirrors the tracer's type lattice closely enough for export: tensors with
//! optional scalar type and sizes, scalars, lists, tuples, the module object
//! (`Class`) and futures produced by `prim::fork`.

use std::fmt;

use crate::tensor::{ScalarType, Tensor};

/// A single tensor dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Known extent
    Static(i64),
    /// Unknown extent, optionally carrying a symbolic name
    Dynamic(Option<String>),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{}", v),
            Dim::Dynamic(Some(name)) => f.write_str(name),
            Dim::Dynamic(None) => f.write_str("*"),
        }
    }
}

/// Tensor type with optional element type and sizes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TensorType {
    /// Element type, `None` when the tracer could not infer it
    pub scalar_type: Option<ScalarType>,
    /// Sizes, `None` when the rank is unknown
    pub sizes: Option<Vec<Dim>>,
}

impl TensorType {
    /// Tensor type with nothing known
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Fully static tensor type
    pub fn new(scalar_type: ScalarType, sizes: &[i64]) -> Self {
        Self {
            scalar_type: Some(scalar_type),
            sizes: Some(sizes.iter().map(|&d| Dim::Static(d)).collect()),
        }
    }

    /// Type of a concrete tensor
    pub fn of(tensor: &Tensor) -> Self {
        Self::new(tensor.scalar_type(), &tensor.dims())
    }

    /// 0-d tensor of the given element type
    pub fn scalar(scalar_type: ScalarType) -> Self {
        Self::new(scalar_type, &[])
    }

    /// Rank, if known
    pub fn rank(&self) -> Option<usize> {
        self.sizes.as_ref().map(|s| s.len())
    }

    /// Sizes when every dimension is static
    pub fn static_sizes(&self) -> Option<Vec<i64>> {
        self.sizes.as_ref().and_then(|sizes| {
            sizes
                .iter()
                .map(|d| match d {
                    Dim::Static(v) => Some(*v),
                    Dim::Dynamic(_) => None,
                })
                .collect()
        })
    }
}

/// Type of a value in the program graph
#[derive(Debug, Clone, PartialEq)]
pub enum JitType {
    /// `NoneType`
    None,
    /// Tensor
    Tensor(TensorType),
    /// Homogeneous list
    List(Box<JitType>),
    /// Tuple
    Tuple(Vec<JitType>),
    /// Python int
    Int,
    /// Python float
    Float,
    /// Python bool
    Bool,
    /// Python str
    Str,
    /// Module object, by qualified name
    Class(String),
    /// Result of `prim::fork`
    Future(Box<JitType>),
}

impl JitType {
    /// Tensor type with nothing known
    pub fn tensor() -> Self {
        JitType::Tensor(TensorType::unknown())
    }

    /// Fully static tensor type
    pub fn tensor_of(scalar_type: ScalarType, sizes: &[i64]) -> Self {
        JitType::Tensor(TensorType::new(scalar_type, sizes))
    }

    /// List type
    pub fn list_of(elem: JitType) -> Self {
        JitType::List(Box::new(elem))
    }

    /// Type kind name as reported by the tracer
    pub fn kind_name(&self) -> &'static str {
        match self {
            JitType::None => "NoneType",
            JitType::Tensor(_) => "TensorType",
            JitType::List(_) => "ListType",
            JitType::Tuple(_) => "TupleType",
            JitType::Int => "IntType",
            JitType::Float => "FloatType",
            JitType::Bool => "BoolType",
            JitType::Str => "StringType",
            JitType::Class(_) => "ClassType",
            JitType::Future(_) => "FutureType",
        }
    }

    /// Tensor payload, if this is a tensor type
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            JitType::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Element type of a list
    pub fn element_type(&self) -> Option<&JitType> {
        match self {
            JitType::List(elem) => Some(elem),
            _ => None,
        }
    }

    /// Check for the module object type
    pub fn is_class(&self) -> bool {
        matches!(self, JitType::Class(_))
    }

    /// Check for a Python number type
    pub fn is_number(&self) -> bool {
        matches!(self, JitType::Int | JitType::Float | JitType::Bool)
    }

    /// Check for an integer-valued type: `int`, or an integral tensor
    pub fn is_integer_like(&self) -> bool {
        match self {
            JitType::Int => true,
            JitType::Tensor(t) => t.scalar_type.map(|s| s.is_integral()).unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Display for JitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitType::None => f.write_str("NoneType"),
            JitType::Tensor(t) => {
                match t.scalar_type {
                    Some(s) => write!(f, "{}", s)?,
                    None => f.write_str("Tensor")?,
                }
                if let Some(sizes) = &t.sizes {
                    let dims: Vec<String> = sizes.iter().map(|d| d.to_string()).collect();
                    write!(f, "({})", dims.join(", "))?;
                }
                Ok(())
            }
            JitType::List(elem) => write!(f, "{}[]", elem),
            JitType::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            JitType::Int => f.write_str("int"),
            JitType::Float => f.write_str("float"),
            JitType::Bool => f.write_str("bool"),
            JitType::Str => f.write_str("str"),
            JitType::Class(name) => write!(f, "__torch__.{}", name),
            JitType::Future(inner) => write!(f, "Future[{}]", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(JitType::tensor_of(ScalarType::Float, &[2, 3]).to_string(), "Float(2, 3)");
        assert_eq!(JitType::tensor().to_string(), "Tensor");
        assert_eq!(JitType::list_of(JitType::Int).to_string(), "int[]");

        let dynamic = JitType::Tensor(TensorType {
            scalar_type: Some(ScalarType::Float),
            sizes: Some(vec![Dim::Dynamic(Some("batch".into())), Dim::Static(3)]),
        });
        assert_eq!(dynamic.to_string(), "Float(batch, 3)");
    }

    #[test]
    fn test_static_sizes() {
        let t = TensorType::new(ScalarType::Long, &[4]);
        assert_eq!(t.static_sizes(), Some(vec![4]));

        let d = TensorType {
            scalar_type: None,
            sizes: Some(vec![Dim::Dynamic(None)]),
        };
        assert_eq!(d.static_sizes(), None);
        assert_eq!(d.rank(), Some(1));
    }

    #[test]
    fn test_integer_like() {
        assert!(JitType::Int.is_integer_like());
        assert!(JitType::tensor_of(ScalarType::Long, &[]).is_integer_like());
        assert!(!JitType::tensor_of(ScalarType::Float, &[]).is_integer_like());
        assert!(!JitType::tensor().is_integer_like());
    }
}
