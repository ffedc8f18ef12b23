//! Evaluation of `aten`/`prim` nodes whose inputs are all constants
//!
//! Python scalars follow Python semantics (`int / int` is a float, `//` is
//! not modelled); tensors follow broadcasting rules.

use crate::error::ExportResult;
use crate::graph::IValue;
use crate::tensor::{ScalarType, Tensor};

use super::binary::{broadcast_binary, BinaryOp};

fn binary_op(op: &str) -> Option<BinaryOp> {
    Some(match op {
        "add" => BinaryOp::Add,
        "sub" => BinaryOp::Sub,
        "mul" => BinaryOp::Mul,
        "div" => BinaryOp::Div,
        "pow" => BinaryOp::Pow,
        "eq" => BinaryOp::Eq,
        "ne" => BinaryOp::Ne,
        "lt" => BinaryOp::Lt,
        "gt" => BinaryOp::Gt,
        "le" => BinaryOp::Le,
        "ge" => BinaryOp::Ge,
        "__and__" => BinaryOp::And,
        "__or__" => BinaryOp::Or,
        _ => return None,
    })
}

fn scalar_binary(op: BinaryOp, a: &IValue, b: &IValue) -> Option<IValue> {
    let both_int = matches!(a, IValue::Int(_) | IValue::Bool(_))
        && matches!(b, IValue::Int(_) | IValue::Bool(_));
    if op.is_predicate() {
        let t = broadcast_binary(op, &a.to_tensor().ok()?, &b.to_tensor().ok()?).ok()?;
        return Some(IValue::Bool(t.item_i64()? != 0));
    }
    if both_int && op != BinaryOp::Div {
        let (x, y) = (a.as_int()?, b.as_int()?);
        return Some(IValue::Int(match op {
            BinaryOp::Add => x.wrapping_add(y),
            BinaryOp::Sub => x.wrapping_sub(y),
            BinaryOp::Mul => x.wrapping_mul(y),
            BinaryOp::Pow if y >= 0 => x.wrapping_pow(u32::try_from(y).ok()?),
            _ => return None,
        }));
    }
    let (x, y) = (a.as_float()?, b.as_float()?);
    Some(IValue::Float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Pow => x.powf(y),
        _ => return None,
    }))
}

fn tensor_binary(
    op: BinaryOp,
    a: &IValue,
    b: &IValue,
    alpha: Option<&IValue>,
) -> ExportResult<Option<IValue>> {
    let x = a.to_tensor()?;
    let mut y = b.to_tensor()?;
    if let Some(alpha) = alpha {
        match alpha.as_float() {
            Some(v) if v == 1.0 => {}
            Some(_) => y = broadcast_binary(BinaryOp::Mul, &y, &alpha.to_tensor()?)?,
            None => return Ok(None),
        }
    }
    let (x, y) = if op == BinaryOp::Div && x.is_integral() && y.is_integral() {
        (x.cast(ScalarType::Float)?, y.cast(ScalarType::Float)?)
    } else {
        (x, y)
    };
    Ok(Some(IValue::Tensor(broadcast_binary(op, &x, &y)?)))
}

/// Evaluate a node kind over constant inputs; `Ok(None)` when not handled
pub fn eval_aten_op(kind: &str, inputs: &[IValue]) -> ExportResult<Option<IValue>> {
    let (ns, op) = match kind.split_once("::") {
        Some(parts) => parts,
        None => return Ok(None),
    };
    if ns != "aten" && ns != "prim" {
        return Ok(None);
    }
    if inputs.iter().any(|v| matches!(v, IValue::None)) && op != "ListConstruct" {
        return Ok(None);
    }

    if let Some(bin) = binary_op(op) {
        let (a, b) = match (inputs.first(), inputs.get(1)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(None),
        };
        let any_tensor = matches!(a, IValue::Tensor(_)) || matches!(b, IValue::Tensor(_));
        if any_tensor {
            return tensor_binary(bin, a, b, inputs.get(2));
        }
        if inputs.len() > 2 {
            return Ok(None);
        }
        return Ok(scalar_binary(bin, a, b));
    }

    let first = inputs.first();
    let out = match (op, first) {
        ("neg", Some(IValue::Int(v))) => IValue::Int(-v),
        ("neg", Some(IValue::Float(v))) => IValue::Float(-v),
        ("neg", Some(IValue::Tensor(t))) => IValue::Tensor(broadcast_binary(
            BinaryOp::Mul,
            t,
            &Tensor::scalar_i64(-1).cast(t.scalar_type())?,
        )?),
        ("__not__", Some(IValue::Bool(b))) => IValue::Bool(!b),
        ("Int", Some(v)) => match v.as_int() {
            Some(i) => IValue::Int(i),
            None => return Ok(None),
        },
        ("Float", Some(v)) => match v.as_float() {
            Some(f) => IValue::Float(f),
            None => return Ok(None),
        },
        ("Bool", Some(v)) => match v.as_int() {
            Some(i) => IValue::Bool(i != 0),
            None => return Ok(None),
        },
        ("NumToTensor", Some(v @ (IValue::Int(_) | IValue::Float(_) | IValue::Bool(_)))) => {
            IValue::Tensor(v.to_tensor()?)
        }
        ("dim", Some(IValue::Tensor(t))) => IValue::Int(t.ndim() as i64),
        ("numel", Some(IValue::Tensor(t))) => IValue::Int(t.numel() as i64),
        ("size", Some(IValue::Tensor(t))) => match inputs.get(1).and_then(IValue::as_int) {
            Some(dim) => {
                let axis = crate::tensor::normalize_axis(dim, t.ndim())?;
                IValue::Int(t.shape()[axis] as i64)
            }
            None if inputs.len() == 1 => {
                IValue::List(t.dims().into_iter().map(IValue::Int).collect())
            }
            None => return Ok(None),
        },
        ("len", Some(IValue::List(items))) => IValue::Int(items.len() as i64),
        ("ListConstruct", _) => IValue::List(inputs.to_vec()),
        _ => return Ok(None),
    };
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_scalar_arithmetic() {
        let out = eval_aten_op("aten::add", &[IValue::Int(2), IValue::Int(3)]).unwrap();
        assert_eq!(out, Some(IValue::Int(5)));

        let out = eval_aten_op("aten::div", &[IValue::Int(3), IValue::Int(2)]).unwrap();
        assert_eq!(out, Some(IValue::Float(1.5)));

        let out = eval_aten_op("aten::gt", &[IValue::Int(3), IValue::Float(2.5)]).unwrap();
        assert_eq!(out, Some(IValue::Bool(true)));
    }

    #[test]
    fn test_tensor_add_with_alpha() {
        let x = IValue::Tensor(Tensor::vec_i64(&[1, 2]));
        let y = IValue::Tensor(Tensor::vec_i64(&[1, 1]));
        let out = eval_aten_op("aten::sub", &[x, y, IValue::Int(2)]).unwrap();
        match out {
            Some(IValue::Tensor(t)) => assert_eq!(t.to_i64_vec(), vec![-1, 0]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tensor_div_is_true_division() {
        let x = IValue::Tensor(Tensor::vec_i64(&[3]));
        let out = eval_aten_op("aten::div", &[x, IValue::Int(2)]).unwrap();
        match out {
            Some(IValue::Tensor(t)) => {
                assert_eq!(t.scalar_type(), ScalarType::Float);
                assert_eq!(t.item_f64(), Some(1.5));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_size_and_conversions() {
        let t = IValue::Tensor(Tensor::zeros(ScalarType::Float, &[2, 5]).unwrap());
        let out = eval_aten_op("aten::size", &[t, IValue::Int(-1)]).unwrap();
        assert_eq!(out, Some(IValue::Int(5)));

        let out = eval_aten_op("prim::NumToTensor", &[IValue::Int(4)]).unwrap();
        assert!(matches!(out, Some(IValue::Tensor(_))));

        let out = eval_aten_op("aten::Int", &[IValue::Tensor(Tensor::scalar_i64(9))]).unwrap();
        assert_eq!(out, Some(IValue::Int(9)));
    }

    #[test]
    fn test_unhandled() {
        assert_eq!(eval_aten_op("aten::conv2d", &[]).unwrap(), None);
        assert_eq!(eval_aten_op("onnx::Add", &[]).unwrap(), None);
        assert_eq!(
            eval_aten_op("aten::add", &[IValue::None, IValue::Int(1)]).unwrap(),
            None
        );
    }
}
