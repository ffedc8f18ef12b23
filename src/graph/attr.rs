//! Node attributes
//!
//! Attributes are kept in insertion order so that emitted nodes list them the
//! way the tracer recorded them.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{ExportError, ExportResult};
use crate::tensor::Tensor;

/// Ordered attribute map of a node
pub type Attributes = IndexMap<String, AttrValue>;

/// Generic constant value (`ival` attributes and evaluator results)
#[derive(Debug, Clone, PartialEq)]
pub enum IValue {
    /// Python `None`
    None,
    /// bool
    Bool(bool),
    /// int
    Int(i64),
    /// float
    Float(f64),
    /// str
    Str(String),
    /// Tensor
    Tensor(Tensor),
    /// List of values
    List(Vec<IValue>),
}

impl IValue {
    /// Materialize as a tensor the way `torch.tensor(value)` would
    pub fn to_tensor(&self) -> ExportResult<Tensor> {
        match self {
            IValue::Bool(b) => Ok(Tensor::scalar_bool(*b)),
            IValue::Int(i) => Ok(Tensor::scalar_i64(*i)),
            IValue::Float(v) => Ok(Tensor::scalar_f32(*v as f32)),
            IValue::Tensor(t) => Ok(t.clone()),
            IValue::List(items) => {
                if items.iter().all(|i| matches!(i, IValue::Int(_))) {
                    let data: Vec<i64> = items.iter().filter_map(IValue::as_int).collect();
                    Ok(Tensor::vec_i64(&data))
                } else if items
                    .iter()
                    .all(|i| matches!(i, IValue::Int(_) | IValue::Float(_)))
                {
                    let data: Vec<f32> = items
                        .iter()
                        .filter_map(IValue::as_float)
                        .map(|v| v as f32)
                        .collect();
                    Tensor::from_vec_f32(&[data.len()], data)
                } else if items.iter().all(|i| matches!(i, IValue::Bool(_))) {
                    let data: Vec<i64> = items
                        .iter()
                        .map(|i| i64::from(matches!(i, IValue::Bool(true))))
                        .collect();
                    Tensor::from_i64_array(
                        ndarray::Array1::from(data).into_dyn(),
                        crate::tensor::ScalarType::Bool,
                    )
                } else {
                    Err(ExportError::UnsupportedType(format!(
                        "cannot build a tensor from {}",
                        self
                    )))
                }
            }
            IValue::None | IValue::Str(_) => Err(ExportError::UnsupportedType(format!(
                "cannot build a tensor from {}",
                self
            ))),
        }
    }

    /// Integer payload (bools count as 0/1, 1-element tensors are unwrapped)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            IValue::Int(i) => Some(*i),
            IValue::Bool(b) => Some(i64::from(*b)),
            IValue::Tensor(t) => t.item_i64(),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Option<f64> {
        match self {
            IValue::Float(v) => Some(*v),
            IValue::Int(i) => Some(*i as f64),
            IValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            IValue::Tensor(t) => t.item_f64(),
            _ => None,
        }
    }

    /// Integer list payload
    pub fn as_int_list(&self) -> Option<Vec<i64>> {
        match self {
            IValue::List(items) => items.iter().map(IValue::as_int).collect(),
            IValue::Tensor(t) if t.ndim() <= 1 && t.is_integral() => Some(t.to_i64_vec()),
            _ => None,
        }
    }
}

impl fmt::Display for IValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IValue::None => f.write_str("None"),
            IValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            IValue::Int(i) => write!(f, "{}", i),
            IValue::Float(v) => write!(f, "{:?}", v),
            IValue::Str(s) => write!(f, "\"{}\"", s),
            IValue::Tensor(t) => write!(f, "<Tensor {}>", t),
            IValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Attribute value of a node
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// `i`
    Int(i64),
    /// `f`
    Float(f64),
    /// `s`
    Str(String),
    /// `t`
    Tensor(Tensor),
    /// `is`
    Ints(Vec<i64>),
    /// `fs`
    Floats(Vec<f64>),
    /// `ss`
    Strings(Vec<String>),
    /// `ts`
    Tensors(Vec<Tensor>),
    /// `ival`, a generic constant (lists, None, nested values)
    IValue(IValue),
}

impl AttrValue {
    /// Attribute kind tag
    pub fn kind(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "i",
            AttrValue::Float(_) => "f",
            AttrValue::Str(_) => "s",
            AttrValue::Tensor(_) => "t",
            AttrValue::Ints(_) => "is",
            AttrValue::Floats(_) => "fs",
            AttrValue::Strings(_) => "ss",
            AttrValue::Tensors(_) => "ts",
            AttrValue::IValue(_) => "ival",
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer list payload
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Tensor payload
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            AttrValue::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// View the attribute as a generic constant
    pub fn to_ivalue(&self) -> IValue {
        match self {
            AttrValue::Int(v) => IValue::Int(*v),
            AttrValue::Float(v) => IValue::Float(*v),
            AttrValue::Str(s) => IValue::Str(s.clone()),
            AttrValue::Tensor(t) => IValue::Tensor(t.clone()),
            AttrValue::Ints(v) => IValue::List(v.iter().map(|&i| IValue::Int(i)).collect()),
            AttrValue::Floats(v) => IValue::List(v.iter().map(|&x| IValue::Float(x)).collect()),
            AttrValue::Strings(v) => IValue::List(v.iter().cloned().map(IValue::Str).collect()),
            AttrValue::Tensors(v) => IValue::List(v.iter().cloned().map(IValue::Tensor).collect()),
            AttrValue::IValue(i) => i.clone(),
        }
    }
}

impl From<IValue> for AttrValue {
    fn from(value: IValue) -> Self {
        match value {
            IValue::Int(v) => AttrValue::Int(v),
            IValue::Bool(b) => AttrValue::Int(i64::from(b)),
            IValue::Float(v) => AttrValue::Float(v),
            IValue::Str(s) => AttrValue::Str(s),
            IValue::Tensor(t) => AttrValue::Tensor(t),
            other => AttrValue::IValue(other),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{:?}", v),
            AttrValue::Str(s) => write!(f, "\"{}\"", s),
            AttrValue::Tensor(t) => write!(f, "<Tensor {}>", t),
            AttrValue::Ints(v) => write!(f, "{:?}", v),
            AttrValue::Floats(v) => write!(f, "{:?}", v),
            AttrValue::Strings(v) => write!(f, "{:?}", v),
            AttrValue::Tensors(v) => write!(f, "<{} tensors>", v.len()),
            AttrValue::IValue(i) => write!(f, "{}", i),
        }
    }
}
