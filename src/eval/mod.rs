//! Constant evaluation
//!
//! Shared by constant propagation (on `aten`/`prim` nodes before lowering)
//! and constant folding (on ONNX nodes after lowering). An operator the
//! evaluator does not know is never an error: it simply stays in the graph.

pub mod aten;
pub mod binary;
pub mod onnx;

use std::collections::HashSet;

use crate::error::ExportResult;
use crate::graph::{Attributes, IValue};
use crate::tensor::Tensor;

pub use aten::eval_aten_op;
pub use binary::{broadcast_binary, promote_types, BinaryOp};
pub use onnx::eval_onnx_op;

/// Evaluates nodes whose inputs are all known
///
/// Supported ONNX operators:
/// - Arithmetic: Add, Sub, Mul, Div, Pow, Neg, Sqrt, Relu
/// - Logic: Equal, Less, Greater, And, Or, Not
/// - Shape: Shape, Size, Reshape, Flatten, Transpose, Squeeze, Unsqueeze,
///   Concat, Gather
/// - Other: Cast, Identity, MatMul (2-d)
#[derive(Debug, Clone)]
pub struct Evaluator {
    onnx_ops: HashSet<&'static str>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Create an evaluator with the standard operator set
    pub fn new() -> Self {
        let onnx_ops = [
            "Add", "Sub", "Mul", "Div", "Pow", "Neg", "Sqrt", "Relu", "Equal", "Less", "Greater",
            "And", "Or", "Not", "Shape", "Size", "Reshape", "Flatten", "Transpose", "Squeeze",
            "Unsqueeze", "Concat", "Gather", "Cast", "Identity", "MatMul",
        ]
        .into_iter()
        .collect();
        Self { onnx_ops }
    }

    /// Whether an ONNX operator can be folded
    pub fn supports_onnx(&self, op: &str) -> bool {
        self.onnx_ops.contains(op)
    }

    /// Evaluate an ONNX operator
    pub fn eval_onnx(
        &self,
        op: &str,
        inputs: &[Tensor],
        attrs: &Attributes,
    ) -> ExportResult<Option<Vec<Tensor>>> {
        if !self.supports_onnx(op) {
            return Ok(None);
        }
        eval_onnx_op(op, inputs, attrs)
    }

    /// Evaluate an `aten`/`prim` node kind
    pub fn eval_aten(&self, kind: &str, inputs: &[IValue]) -> ExportResult<Option<IValue>> {
        eval_aten_op(kind, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_set() {
        let ev = Evaluator::new();
        assert!(ev.supports_onnx("Concat"));
        assert!(!ev.supports_onnx("Conv"));
    }

    #[test]
    fn test_eval_onnx_add() {
        let ev = Evaluator::new();
        let out = ev
            .eval_onnx(
                "Add",
                &[Tensor::scalar_i64(1), Tensor::scalar_i64(2)],
                &Attributes::new(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(out[0].item_i64(), Some(3));
    }

    #[test]
    fn test_eval_aten_list() {
        let ev = Evaluator::new();
        let out = ev
            .eval_aten("prim::ListConstruct", &[IValue::Int(1), IValue::Int(2)])
            .unwrap();
        assert_eq!(out.and_then(|v| v.as_int_list()), Some(vec![1, 2]));
    }
}
