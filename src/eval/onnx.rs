//! Reference implementations of ONNX operators on literal tensors

use ndarray::{ArrayD, Axis, Ix2, IxDyn};

use crate::error::{ExportError, ExportResult};
use crate::graph::{AttrValue, Attributes};
use crate::tensor::{i32_to_dtype, normalize_axis, ScalarType, Tensor};

use super::binary::{broadcast_binary, BinaryOp};

/// Rebuild a tensor of the same element type from a layout transform
///
/// `$body` is expanded once over i64 elements and once over f64 elements.
macro_rules! relayout {
    ($t:expr, $a:ident => $body:expr) => {{
        let st = $t.scalar_type();
        if $t.is_integral() {
            let $a = $t.to_i64_array();
            Tensor::from_i64_array($body, st)
        } else {
            let $a = $t.to_f64_array();
            Tensor::from_f64_array($body, st)
        }
    }};
}

fn input<'a>(inputs: &'a [Tensor], i: usize, op: &str) -> ExportResult<&'a Tensor> {
    inputs
        .get(i)
        .ok_or_else(|| ExportError::InvalidGraph(format!("{} is missing input {}", op, i)))
}

fn int_attr(attrs: &Attributes, name: &str) -> Option<i64> {
    attrs.get(name).and_then(AttrValue::as_int)
}

fn ints_attr(attrs: &Attributes, name: &str) -> Option<Vec<i64>> {
    attrs.get(name).and_then(|a| match a {
        AttrValue::Ints(v) => Some(v.clone()),
        AttrValue::IValue(i) => i.as_int_list(),
        _ => None,
    })
}

fn unary_f64(t: &Tensor, f: impl Fn(f64) -> f64) -> ExportResult<Tensor> {
    let st = t.scalar_type();
    if t.is_integral() {
        let out = t.to_i64_array().mapv(|v| f(v as f64) as i64);
        Tensor::from_i64_array(out, st)
    } else {
        Tensor::from_f64_array(t.to_f64_array().mapv(f), st)
    }
}

fn transpose(t: &Tensor, perm: Option<Vec<i64>>) -> ExportResult<Tensor> {
    let ndim = t.ndim();
    let perm: Vec<usize> = match perm {
        Some(p) => p
            .iter()
            .map(|&a| normalize_axis(a, ndim))
            .collect::<ExportResult<_>>()?,
        None => (0..ndim).rev().collect(),
    };
    let mut sorted = perm.clone();
    sorted.sort_unstable();
    if sorted != (0..ndim).collect::<Vec<_>>() {
        return Err(ExportError::InvalidGraph(format!(
            "invalid permutation {:?} for rank {}",
            perm, ndim
        )));
    }
    relayout!(t, a => a.permuted_axes(IxDyn(&perm)).as_standard_layout().into_owned())
}

fn reshape(t: &Tensor, target: &[i64]) -> ExportResult<Tensor> {
    let mut shape: Vec<usize> = Vec::with_capacity(target.len());
    let mut infer = None;
    for (i, &d) in target.iter().enumerate() {
        match d {
            0 => shape.push(t.shape().get(i).copied().unwrap_or(0)),
            -1 if infer.is_none() => {
                infer = Some(i);
                shape.push(1);
            }
            d if d > 0 => shape.push(d as usize),
            _ => {
                return Err(ExportError::InvalidGraph(format!(
                    "invalid reshape target {:?}",
                    target
                )))
            }
        }
    }
    if let Some(i) = infer {
        let known: usize = shape.iter().product();
        if known == 0 || t.numel() % known != 0 {
            return Err(ExportError::InvalidGraph(format!(
                "cannot infer dimension of {:?} for {} elements",
                target,
                t.numel()
            )));
        }
        shape[i] = t.numel() / known;
    }
    t.reshape(&shape)
}

fn unsqueeze(t: &Tensor, axes: &[i64]) -> ExportResult<Tensor> {
    let out_rank = t.ndim() + axes.len();
    let mut axes: Vec<usize> = axes
        .iter()
        .map(|&a| normalize_axis(a, out_rank))
        .collect::<ExportResult<_>>()?;
    axes.sort_unstable();
    let mut shape = t.shape().to_vec();
    for a in axes {
        shape.insert(a.min(shape.len()), 1);
    }
    t.reshape(&shape)
}

fn squeeze(t: &Tensor, axes: Option<Vec<i64>>) -> ExportResult<Tensor> {
    let ndim = t.ndim();
    let axes: Vec<usize> = match axes {
        Some(axes) => axes
            .iter()
            .map(|&a| normalize_axis(a, ndim))
            .collect::<ExportResult<_>>()?,
        None => (0..ndim).filter(|&i| t.shape()[i] == 1).collect(),
    };
    let shape: Vec<usize> = t
        .shape()
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect();
    t.reshape(&shape)
}

fn concat(inputs: &[Tensor], axis: i64) -> ExportResult<Tensor> {
    let first = input(inputs, 0, "Concat")?;
    let axis = Axis(normalize_axis(axis, first.ndim())?);
    let st = first.scalar_type();
    let failed = |e: ndarray::ShapeError| ExportError::InvalidGraph(format!("Concat: {}", e));
    if inputs.iter().all(Tensor::is_integral) {
        let arrays: Vec<ArrayD<i64>> = inputs.iter().map(Tensor::to_i64_array).collect();
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        Tensor::from_i64_array(ndarray::concatenate(axis, &views).map_err(failed)?, st)
    } else {
        let arrays: Vec<ArrayD<f64>> = inputs.iter().map(Tensor::to_f64_array).collect();
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        Tensor::from_f64_array(ndarray::concatenate(axis, &views).map_err(failed)?, st)
    }
}

fn gather(data: &Tensor, indices: &Tensor, axis: i64) -> ExportResult<Tensor> {
    let axis = normalize_axis(axis, data.ndim())?;
    let extent = data.shape()[axis] as i64;
    let flat: Vec<usize> = indices
        .to_i64_vec()
        .into_iter()
        .map(|i| {
            let j = if i < 0 { i + extent } else { i };
            if (0..extent).contains(&j) {
                Ok(j as usize)
            } else {
                Err(ExportError::InvalidGraph(format!(
                    "Gather index {} out of range for extent {}",
                    i, extent
                )))
            }
        })
        .collect::<ExportResult<_>>()?;

    let mut shape: Vec<usize> = data.shape()[..axis].to_vec();
    shape.extend_from_slice(indices.shape());
    shape.extend_from_slice(&data.shape()[axis + 1..]);

    let selected = relayout!(data, a => a.select(Axis(axis), &flat))?;
    selected.reshape(&shape)
}

fn matmul(a: &Tensor, b: &Tensor) -> ExportResult<Option<Tensor>> {
    if a.ndim() != 2 || b.ndim() != 2 {
        return Ok(None);
    }
    let st = if a.is_integral() && b.is_integral() {
        ScalarType::Long
    } else if a.scalar_type() == ScalarType::Double || b.scalar_type() == ScalarType::Double {
        ScalarType::Double
    } else {
        ScalarType::Float
    };
    let x = a
        .to_f64_array()
        .into_dimensionality::<Ix2>()
        .map_err(|e| ExportError::Internal(e.to_string()))?;
    let y = b
        .to_f64_array()
        .into_dimensionality::<Ix2>()
        .map_err(|e| ExportError::Internal(e.to_string()))?;
    if x.ncols() != y.nrows() {
        return Err(ExportError::InvalidGraph(format!(
            "MatMul shapes {:?} and {:?} do not align",
            a.shape(),
            b.shape()
        )));
    }
    Tensor::from_f64_array(x.dot(&y).into_dyn(), st).map(Some)
}

/// Evaluate one ONNX operator; `Ok(None)` when the case is not handled
pub fn eval_onnx_op(
    op: &str,
    inputs: &[Tensor],
    attrs: &Attributes,
) -> ExportResult<Option<Vec<Tensor>>> {
    let binary = |op_kind: BinaryOp| -> ExportResult<Option<Vec<Tensor>>> {
        let a = input(inputs, 0, op)?;
        let b = input(inputs, 1, op)?;
        Ok(Some(vec![broadcast_binary(op_kind, a, b)?]))
    };

    let out = match op {
        "Add" => return binary(BinaryOp::Add),
        "Sub" => return binary(BinaryOp::Sub),
        "Mul" => return binary(BinaryOp::Mul),
        "Div" => return binary(BinaryOp::Div),
        "Pow" => return binary(BinaryOp::Pow),
        "Equal" => return binary(BinaryOp::Eq),
        "Less" => return binary(BinaryOp::Lt),
        "Greater" => return binary(BinaryOp::Gt),
        "And" => return binary(BinaryOp::And),
        "Or" => return binary(BinaryOp::Or),
        "Neg" => unary_f64(input(inputs, 0, op)?, |v| -v)?,
        "Sqrt" => unary_f64(input(inputs, 0, op)?, f64::sqrt)?,
        "Relu" => unary_f64(input(inputs, 0, op)?, |v| v.max(0.0))?,
        "Not" => {
            let t = input(inputs, 0, op)?;
            Tensor::Bool(t.to_i64_array().mapv(|v| v == 0))
        }
        "Identity" => input(inputs, 0, op)?.clone(),
        "Shape" => Tensor::vec_i64(&input(inputs, 0, op)?.dims()),
        "Size" => Tensor::scalar_i64(input(inputs, 0, op)?.numel() as i64),
        "Cast" => {
            let to = int_attr(attrs, "to")
                .ok_or_else(|| ExportError::InvalidGraph("Cast without 'to'".to_string()))?;
            let dtype = i32_to_dtype(to as i32)?;
            input(inputs, 0, op)?.cast(ScalarType::from_onnx(dtype)?)?
        }
        "Transpose" => transpose(input(inputs, 0, op)?, ints_attr(attrs, "perm"))?,
        "Reshape" => {
            let target = input(inputs, 1, op)?.to_i64_vec();
            reshape(input(inputs, 0, op)?, &target)?
        }
        "Flatten" => {
            let t = input(inputs, 0, op)?;
            let rank = t.ndim() as i64;
            let axis = int_attr(attrs, "axis").unwrap_or(1);
            let axis = if axis < 0 { axis + rank } else { axis };
            if !(0..=rank).contains(&axis) {
                return Err(ExportError::InvalidGraph(format!(
                    "Flatten axis {} out of range for rank {}",
                    axis, rank
                )));
            }
            let axis = axis as usize;
            let outer: usize = t.shape()[..axis].iter().product();
            let inner: usize = t.shape()[axis..].iter().product();
            t.reshape(&[outer, inner])?
        }
        "Unsqueeze" => {
            let axes = match inputs.get(1) {
                Some(axes) => axes.to_i64_vec(),
                None => ints_attr(attrs, "axes").ok_or_else(|| {
                    ExportError::InvalidGraph("Unsqueeze without axes".to_string())
                })?,
            };
            unsqueeze(input(inputs, 0, op)?, &axes)?
        }
        "Squeeze" => {
            let axes = match inputs.get(1) {
                Some(axes) => Some(axes.to_i64_vec()),
                None => ints_attr(attrs, "axes"),
            };
            squeeze(input(inputs, 0, op)?, axes)?
        }
        "Concat" => concat(inputs, int_attr(attrs, "axis").unwrap_or(0))?,
        "Gather" => gather(
            input(inputs, 0, op)?,
            input(inputs, 1, op)?,
            int_attr(attrs, "axis").unwrap_or(0),
        )?,
        "MatMul" => match matmul(input(inputs, 0, op)?, input(inputs, 1, op)?)? {
            Some(t) => t,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(vec![out]))
}
