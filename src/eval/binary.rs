//! Broadcasting elementwise arithmetic and comparisons

use ndarray::{ArrayD, IxDyn, Zip};

use crate::error::{ExportError, ExportResult};
use crate::tensor::{broadcast_shape, ScalarType, Tensor};

/// Elementwise binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// a + b
    Add,
    /// a - b
    Sub,
    /// a * b
    Mul,
    /// a / b (truncating for integers)
    Div,
    /// a ** b
    Pow,
    /// a == b
    Eq,
    /// a != b
    Ne,
    /// a < b
    Lt,
    /// a > b
    Gt,
    /// a <= b
    Le,
    /// a >= b
    Ge,
    /// a && b
    And,
    /// a || b
    Or,
}

impl BinaryOp {
    /// Whether the result is boolean
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow
        )
    }

    fn apply_f64(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            _ => f64::from(u8::from(self.test_f64(a, b))),
        }
    }

    fn apply_i64(self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).unwrap_or(0),
            BinaryOp::Pow => a.wrapping_pow(b.clamp(0, i64::from(u32::MAX)) as u32),
            _ => i64::from(self.test_f64(a as f64, b as f64)),
        }
    }

    fn test_f64(self, a: f64, b: f64) -> bool {
        match self {
            BinaryOp::Eq => a == b,
            BinaryOp::Ne => a != b,
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::Le => a <= b,
            BinaryOp::Ge => a >= b,
            BinaryOp::And => a != 0.0 && b != 0.0,
            BinaryOp::Or => a != 0.0 || b != 0.0,
            _ => false,
        }
    }
}

fn integral_rank(t: ScalarType) -> u8 {
    match t {
        ScalarType::Bool => 0,
        ScalarType::Byte => 1,
        ScalarType::Char => 2,
        ScalarType::Short => 3,
        ScalarType::Int => 4,
        _ => 5,
    }
}

/// Result element type of an arithmetic op between two tensors
///
/// A 0-d operand does not widen a tensor of the same category.
pub fn promote_types(a: &Tensor, b: &Tensor) -> ScalarType {
    let (ta, tb) = (a.scalar_type(), b.scalar_type());
    let same_category = ta.is_floating_point() == tb.is_floating_point();
    if same_category && a.ndim() == 0 && b.ndim() > 0 {
        return tb;
    }
    if same_category && b.ndim() == 0 && a.ndim() > 0 {
        return ta;
    }
    match (ta.is_floating_point(), tb.is_floating_point()) {
        (true, true) if ta == ScalarType::Double || tb == ScalarType::Double => {
            ScalarType::Double
        }
        (true, true) => ScalarType::Float,
        (true, false) => ta,
        (false, true) => tb,
        (false, false) if ta == ScalarType::Bool && tb == ScalarType::Bool => ScalarType::Long,
        (false, false) if integral_rank(ta) >= integral_rank(tb) => ta,
        (false, false) => tb,
    }
}

fn zip_with<T, U, F>(a: &ArrayD<T>, b: &ArrayD<T>, shape: &[usize], f: F) -> ExportResult<ArrayD<U>>
where
    T: Copy,
    F: Fn(T, T) -> U,
{
    let not_broadcastable = || {
        ExportError::InvalidGraph(format!(
            "shapes {:?} and {:?} do not broadcast",
            a.shape(),
            b.shape()
        ))
    };
    let av = a.broadcast(IxDyn(shape)).ok_or_else(not_broadcastable)?;
    let bv = b.broadcast(IxDyn(shape)).ok_or_else(not_broadcastable)?;
    Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
}

/// Apply `op` elementwise with numpy broadcasting
pub fn broadcast_binary(op: BinaryOp, a: &Tensor, b: &Tensor) -> ExportResult<Tensor> {
    let shape: Vec<usize> = broadcast_shape(&a.dims(), &b.dims())?
        .into_iter()
        .map(|d| d as usize)
        .collect();

    if op.is_predicate() {
        let x = a.to_f64_array();
        let y = b.to_f64_array();
        let out = zip_with(&x, &y, &shape, |p, q| op.test_f64(p, q))?;
        return Ok(Tensor::Bool(out));
    }

    let out_type = promote_types(a, b);
    if out_type.is_floating_point() {
        let x = a.to_f64_array();
        let y = b.to_f64_array();
        let out = zip_with(&x, &y, &shape, |p, q| op.apply_f64(p, q))?;
        Tensor::from_f64_array(out, out_type)
    } else {
        let x = a.to_i64_array();
        let y = b.to_i64_array();
        if op == BinaryOp::Div && y.iter().any(|&v| v == 0) {
            return Err(ExportError::InvalidGraph(
                "integer division by zero".to_string(),
            ));
        }
        let out = zip_with(&x, &y, &shape, |p, q| op.apply_i64(p, q))?;
        Tensor::from_i64_array(out, out_type)
    }
}
