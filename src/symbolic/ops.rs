//! Built-in lowerings
//!
//! Covers the operators a traced MLP or small convolution-free model is made
//! of. Scalars reach these functions as 0-d tensors because number types
//! are erased before lowering; optional arguments may be the `None`
//! constant.

use crate::error::{ExportError, ExportResult};
use crate::graph::{AttrValue, IValue, ValueId};
use crate::proto::tensor_proto::DataType;
use crate::tensor::{normalize_axis, ScalarType, Tensor};

use super::{SymbolicCall, SymbolicContext, SymbolicRegistry};

type Outputs = ExportResult<Vec<ValueId>>;

const UNARY: &[(&str, &str)] = &[
    ("neg", "Neg"),
    ("relu", "Relu"),
    ("sigmoid", "Sigmoid"),
    ("tanh", "Tanh"),
    ("exp", "Exp"),
    ("log", "Log"),
    ("sqrt", "Sqrt"),
];

const BINARY: &[(&str, &str)] = &[
    ("mul", "Mul"),
    ("div", "Div"),
    ("matmul", "MatMul"),
    ("mm", "MatMul"),
    ("gt", "Greater"),
    ("lt", "Less"),
    ("eq", "Equal"),
];

const IDENTITY: &[&str] = &["clone", "detach", "contiguous"];

fn arg(call: &SymbolicCall, index: usize) -> ExportResult<ValueId> {
    call.input(index).ok_or_else(|| {
        ExportError::InvalidGraph(format!("{} is missing argument {}", call.kind, index))
    })
}

/// Argument `index` unless absent or `None`
fn optional_arg(ctx: &SymbolicContext<'_>, call: &SymbolicCall, index: usize) -> Option<ValueId> {
    call.input(index).filter(|&v| !ctx.is_none(v))
}

fn const_int_arg(ctx: &SymbolicContext<'_>, call: &SymbolicCall, index: usize) -> ExportResult<i64> {
    let value = arg(call, index)?;
    ctx.constant_int(value).ok_or_else(|| {
        ExportError::UnsupportedType(format!(
            "{}: argument {} must be a constant integer",
            call.kind, index
        ))
    })
}

fn ints(values: Vec<i64>) -> AttrValue {
    AttrValue::Ints(values)
}

/// Tracer scalar type codes
fn scalar_type_from_code(code: i64) -> Option<ScalarType> {
    Some(match code {
        0 => ScalarType::Byte,
        1 => ScalarType::Char,
        2 => ScalarType::Short,
        3 => ScalarType::Int,
        4 => ScalarType::Long,
        5 => ScalarType::Half,
        6 => ScalarType::Float,
        7 => ScalarType::Double,
        11 => ScalarType::Bool,
        15 => ScalarType::BFloat16,
        _ => return None,
    })
}

fn cast(ctx: &mut SymbolicContext<'_>, x: ValueId, to: DataType) -> ValueId {
    ctx.op("Cast", &[x], &[("to", AttrValue::Int(to as i64))])
}

/// `Unsqueeze`, with axes as an attribute before opset 13 and as an input
/// from 13 on
pub fn unsqueeze(ctx: &mut SymbolicContext<'_>, x: ValueId, axes: &[i64]) -> ValueId {
    if ctx.opset() >= 13 {
        let axes = ctx.constant_ints(axes);
        ctx.op("Unsqueeze", &[x, axes], &[])
    } else {
        ctx.op("Unsqueeze", &[x], &[("axes", ints(axes.to_vec()))])
    }
}

/// `Squeeze`, optionally restricted to `axes`
pub fn squeeze(ctx: &mut SymbolicContext<'_>, x: ValueId, axes: Option<&[i64]>) -> ValueId {
    match axes {
        None => ctx.op("Squeeze", &[x], &[]),
        Some(axes) if ctx.opset() >= 13 => {
            let axes = ctx.constant_ints(axes);
            ctx.op("Squeeze", &[x, axes], &[])
        }
        Some(axes) => ctx.op("Squeeze", &[x], &[("axes", ints(axes.to_vec()))]),
    }
}

/// `Split` along `axis` into pieces of the given sizes
pub fn split(ctx: &mut SymbolicContext<'_>, x: ValueId, sizes: &[i64], axis: i64) -> Vec<ValueId> {
    let n = sizes.len();
    if ctx.opset() >= 13 {
        let sizes = ctx.constant_ints(sizes);
        ctx.op_multi("Split", &[x, sizes], &[("axis", AttrValue::Int(axis))], n)
    } else {
        ctx.op_multi(
            "Split",
            &[x],
            &[("axis", AttrValue::Int(axis)), ("split", ints(sizes.to_vec()))],
            n,
        )
    }
}

/// Extent of `x` along `dim`, when static
fn static_extent(ctx: &SymbolicContext<'_>, x: ValueId, dim: i64) -> Option<i64> {
    let sizes = ctx.static_sizes(x)?;
    let axis = normalize_axis(dim, sizes.len()).ok()?;
    Some(sizes[axis])
}

/// Sizes of `torch.split(x, size)` for an extent
fn even_split(extent: i64, size: i64) -> Vec<i64> {
    if size <= 0 || extent <= 0 {
        return vec![extent.max(0)];
    }
    let mut sizes = vec![size; (extent / size) as usize];
    if extent % size != 0 {
        sizes.push(extent % size);
    }
    sizes
}

fn unknown_extent(call: &SymbolicCall) -> ExportError {
    ExportError::UnsupportedType(format!(
        "{}: splitting a dimension of unknown size",
        call.kind
    ))
}

fn lower_arithmetic(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall, onnx: &str) -> Outputs {
    let a = arg(call, 0)?;
    let mut b = arg(call, 1)?;
    if let Some(alpha) = optional_arg(ctx, call, 2) {
        if ctx.constant_float(alpha) != Some(1.0) {
            b = ctx.op("Mul", &[b, alpha], &[]);
        }
    }
    Ok(vec![ctx.op(onnx, &[a, b], &[])])
}

fn lower_addmm(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let c = arg(call, 0)?;
    let a = arg(call, 1)?;
    let b = arg(call, 2)?;
    let scale = |index: usize| {
        optional_arg(ctx, call, index)
            .and_then(|v| ctx.constant_float(v))
            .unwrap_or(1.0)
    };
    let (beta, alpha) = (scale(3), scale(4));
    Ok(vec![ctx.op(
        "Gemm",
        &[a, b, c],
        &[
            ("alpha", AttrValue::Float(alpha)),
            ("beta", AttrValue::Float(beta)),
        ],
    )])
}

fn lower_linear(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let w = arg(call, 1)?;
    let bias = optional_arg(ctx, call, 2);
    if let (Some(2), Some(b)) = (ctx.rank(x), bias) {
        return Ok(vec![ctx.op(
            "Gemm",
            &[x, w, b],
            &[("transB", AttrValue::Int(1))],
        )]);
    }
    let wt = ctx.op("Transpose", &[w], &[("perm", ints(vec![1, 0]))]);
    let y = ctx.op("MatMul", &[x, wt], &[]);
    Ok(vec![match bias {
        Some(b) => ctx.op("Add", &[y, b], &[]),
        None => y,
    }])
}

fn lower_t(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    Ok(vec![match ctx.rank(x) {
        Some(r) if r < 2 => x,
        Some(_) => ctx.op("Transpose", &[x], &[("perm", ints(vec![1, 0]))]),
        None => ctx.op("Transpose", &[x], &[]),
    }])
}

fn lower_transpose(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let rank = ctx.rank(x).ok_or_else(|| {
        ExportError::UnsupportedType("transpose of a tensor with unknown rank".to_string())
    })?;
    let d0 = normalize_axis(const_int_arg(ctx, call, 1)?, rank)?;
    let d1 = normalize_axis(const_int_arg(ctx, call, 2)?, rank)?;
    if d0 == d1 {
        return Ok(vec![x]);
    }
    let mut perm: Vec<i64> = (0..rank as i64).collect();
    perm.swap(d0, d1);
    Ok(vec![ctx.op("Transpose", &[x], &[("perm", ints(perm))])])
}

fn lower_reshape(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let shape = arg(call, 1)?;
    Ok(vec![ctx.op("Reshape", &[x, shape], &[])])
}

fn lower_flatten(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let start = match call.input(1) {
        Some(_) => const_int_arg(ctx, call, 1)?,
        None => 0,
    };
    let end = match call.input(2) {
        Some(_) => const_int_arg(ctx, call, 2)?,
        None => -1,
    };
    let rank = ctx.rank(x);
    let to_end = end == -1 || rank.map(|r| end == r as i64 - 1).unwrap_or(false);

    if start == 0 && to_end {
        let shape = ctx.constant_ints(&[-1]);
        return Ok(vec![ctx.op("Reshape", &[x, shape], &[])]);
    }
    if start == 1 && to_end {
        return Ok(vec![ctx.op("Flatten", &[x], &[("axis", AttrValue::Int(1))])]);
    }
    let sizes = ctx.static_sizes(x).ok_or_else(|| {
        ExportError::UnsupportedType(format!(
            "flatten({}, {}) of a tensor with unknown sizes",
            start, end
        ))
    })?;
    let s = normalize_axis(start, sizes.len())?;
    let e = normalize_axis(end, sizes.len())?;
    let mut shape: Vec<i64> = sizes[..s].to_vec();
    shape.push(sizes[s..=e].iter().product());
    shape.extend_from_slice(&sizes[e + 1..]);
    let shape = ctx.constant_ints(&shape);
    Ok(vec![ctx.op("Reshape", &[x, shape], &[])])
}

fn lower_unsqueeze(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let mut dim = const_int_arg(ctx, call, 1)?;
    if dim < 0 {
        if let Some(rank) = ctx.rank(x) {
            dim += rank as i64 + 1;
        }
    }
    Ok(vec![unsqueeze(ctx, x, &[dim])])
}

fn lower_squeeze(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    if optional_arg(ctx, call, 1).is_none() {
        return Ok(vec![squeeze(ctx, x, None)]);
    }
    let dim = const_int_arg(ctx, call, 1)?;
    // squeezing a dimension that is not 1 is a no-op
    if matches!(static_extent(ctx, x, dim), Some(extent) if extent != 1) {
        return Ok(vec![x]);
    }
    Ok(vec![squeeze(ctx, x, Some(&[dim]))])
}

fn softmax_input(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> ExportResult<ValueId> {
    let x = arg(call, 0)?;
    match optional_arg(ctx, call, 2) {
        Some(dtype) => {
            let code = ctx.constant_int(dtype).ok_or_else(|| {
                ExportError::UnsupportedType("softmax with a non-constant dtype".to_string())
            })?;
            let st = scalar_type_from_code(code).ok_or_else(|| {
                ExportError::UnsupportedType(format!("scalar type code {}", code))
            })?;
            Ok(cast(ctx, x, st.to_onnx()?))
        }
        None => Ok(x),
    }
}

fn lower_softmax_v13(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let dim = const_int_arg(ctx, call, 1)?;
    let x = softmax_input(ctx, call)?;
    Ok(vec![ctx.op("Softmax", &[x], &[("axis", AttrValue::Int(dim))])])
}

/// Before opset 13 `Softmax` coerces its input to 2-d around `axis`, so a
/// softmax over an inner dimension is moved to the last one first
fn lower_softmax_v7(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let dim = const_int_arg(ctx, call, 1)?;
    let x = softmax_input(ctx, call)?;
    let rank = match ctx.rank(x) {
        Some(rank) => rank,
        None if dim == -1 => {
            return Ok(vec![ctx.op("Softmax", &[x], &[("axis", AttrValue::Int(-1))])])
        }
        None => {
            return Err(ExportError::UnsupportedType(
                "softmax over an inner dimension of unknown rank".to_string(),
            ))
        }
    };
    let axis = normalize_axis(dim, rank)?;
    let last = rank.saturating_sub(1);
    if axis == last {
        return Ok(vec![ctx.op("Softmax", &[x], &[("axis", AttrValue::Int(last as i64))])]);
    }
    let mut perm: Vec<i64> = (0..rank as i64).collect();
    perm.swap(axis, last);
    let moved = ctx.op("Transpose", &[x], &[("perm", ints(perm.clone()))]);
    let y = ctx.op("Softmax", &[moved], &[("axis", AttrValue::Int(last as i64))]);
    Ok(vec![ctx.op("Transpose", &[y], &[("perm", ints(perm))])])
}

fn lower_size(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let shape = ctx.op("Shape", &[x], &[]);
    if optional_arg(ctx, call, 1).is_none() {
        return Ok(vec![shape]);
    }
    let mut dim = const_int_arg(ctx, call, 1)?;
    if let (true, Some(rank)) = (dim < 0, ctx.rank(x)) {
        dim += rank as i64;
    }
    let index = ctx.constant(Tensor::scalar_i64(dim));
    Ok(vec![ctx.op("Gather", &[shape, index], &[("axis", AttrValue::Int(0))])])
}

fn lower_cat(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let list = arg(call, 0)?;
    let dim = const_int_arg(ctx, call, 1)?;
    let axis = [("axis", AttrValue::Int(dim))];
    if ctx.producer_kind(list) == Some("onnx::SequenceConstruct") {
        let parts = ctx.producer_inputs(list);
        return Ok(vec![ctx.op("Concat", &parts, &axis)]);
    }
    if ctx.opset() >= 11 {
        return Ok(vec![ctx.op("ConcatFromSequence", &[list], &axis)]);
    }
    Err(ExportError::UnsupportedType(
        "cat of a dynamic list before opset 11".to_string(),
    ))
}

fn lower_split(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let size_arg = arg(call, 1)?;
    let dim = const_int_arg(ctx, call, 2)?;

    let sizes = match ctx.constant_value(size_arg) {
        Some(IValue::Tensor(t)) if t.ndim() == 1 => t.to_i64_vec(),
        Some(IValue::List(_)) => ctx.constant_int_list(size_arg).unwrap_or_default(),
        Some(v) => {
            let size = v.as_int().ok_or_else(|| unknown_extent(call))?;
            let extent = static_extent(ctx, x, dim).ok_or_else(|| unknown_extent(call))?;
            even_split(extent, size)
        }
        None => return Err(unknown_extent(call)),
    };

    match call.int_attr("_outputs") {
        Some(_) => Ok(split(ctx, x, &sizes, dim)),
        None if ctx.opset() >= 11 => {
            let sizes = ctx.constant_ints(&sizes);
            Ok(vec![ctx.op(
                "SplitToSequence",
                &[x, sizes],
                &[("axis", AttrValue::Int(dim))],
            )])
        }
        None => Err(ExportError::UnsupportedType(format!(
            "{} into a list before opset 11",
            call.kind
        ))),
    }
}

fn lower_unbind(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let dim = match call.input(1) {
        Some(_) => const_int_arg(ctx, call, 1)?,
        None => 0,
    };
    let n = call.int_attr("_outputs").ok_or_else(|| {
        ExportError::UnsupportedType("unbind into a list".to_string())
    })?;
    let pieces = split(ctx, x, &vec![1; n as usize], dim);
    Ok(pieces
        .into_iter()
        .map(|p| squeeze(ctx, p, Some(&[dim])))
        .collect())
}

fn lower_constant_chunk(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let chunks = call.int_attr("chunks").unwrap_or(1);
    let dim = call.int_attr("dim").unwrap_or(0);
    let extent = static_extent(ctx, x, dim).ok_or_else(|| unknown_extent(call))?;
    let size = (extent + chunks - 1) / chunks.max(1);
    Ok(split(ctx, x, &even_split(extent, size), dim))
}

fn lower_list_unpack(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let list = arg(call, 0)?;
    if ctx.producer_kind(list) == Some("onnx::SequenceConstruct") {
        let items = ctx.producer_inputs(list);
        if items.len() == call.num_outputs {
            return Ok(items);
        }
    }
    Ok((0..call.num_outputs)
        .map(|i| {
            let index = ctx.constant(Tensor::scalar_i64(i as i64));
            ctx.op("SequenceAt", &[list, index], &[])
        })
        .collect())
}

fn lower_dropout(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    let ratio = arg(call, 1)?;
    let train = optional_arg(ctx, call, 2).and_then(|t| ctx.constant_int(t));
    if train == Some(0) {
        return Ok(vec![x]);
    }
    if ctx.opset() >= 12 {
        let training = ctx.constant(Tensor::scalar_bool(true));
        return Ok(vec![ctx.op_multi("Dropout", &[x, ratio, training], &[], 2)[0]]);
    }
    let p = ctx.constant_float(ratio).unwrap_or(0.5);
    Ok(vec![ctx.op_multi("Dropout", &[x], &[("ratio", AttrValue::Float(p))], 2)[0]])
}

fn lower_cast_float(ctx: &mut SymbolicContext<'_>, call: &SymbolicCall) -> Outputs {
    let x = arg(call, 0)?;
    Ok(vec![cast(ctx, x, DataType::Float)])
}

/// Register every built-in lowering
pub fn register_default_ops(registry: &mut SymbolicRegistry) {
    for &(op, onnx) in UNARY {
        registry.register(op, 7, move |ctx, call| {
            let x = arg(call, 0)?;
            Ok(vec![ctx.op(onnx, &[x], &[])])
        });
    }
    for &(op, onnx) in BINARY {
        registry.register(op, 7, move |ctx, call| {
            let a = arg(call, 0)?;
            let b = arg(call, 1)?;
            Ok(vec![ctx.op(onnx, &[a, b], &[])])
        });
    }
    for &op in IDENTITY {
        registry.register(op, 7, |_ctx, call| Ok(vec![arg(call, 0)?]));
    }
    registry.register("add", 7, |ctx, call| lower_arithmetic(ctx, call, "Add"));
    registry.register("sub", 7, |ctx, call| lower_arithmetic(ctx, call, "Sub"));
    registry.register("addmm", 7, lower_addmm);
    registry.register("linear", 7, lower_linear);
    registry.register("t", 7, lower_t);
    registry.register("transpose", 7, lower_transpose);
    registry.register("view", 7, lower_reshape);
    registry.register("reshape", 7, lower_reshape);
    registry.register("flatten", 7, lower_flatten);
    registry.register("unsqueeze", 7, lower_unsqueeze);
    registry.register("squeeze", 7, lower_squeeze);
    registry.register("softmax", 7, lower_softmax_v7);
    registry.register("softmax", 13, lower_softmax_v13);
    registry.register("size", 7, lower_size);
    registry.register("cat", 7, lower_cat);
    registry.register("split", 7, lower_split);
    registry.register("split_with_sizes", 7, lower_split);
    registry.register("unbind", 7, lower_unbind);
    registry.register("prim_ConstantChunk", 7, lower_constant_chunk);
    registry.register("prim_ListUnpack", 7, lower_list_unpack);
    registry.register("dropout", 7, lower_dropout);
    registry.register("feature_dropout", 7, lower_dropout);
    registry.register("_cast_Float", 7, lower_cast_float);
}
