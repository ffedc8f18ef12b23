//! Shape utilities
//!
//! Broadcasting and axis helpers shared by the evaluator and the checker's
//! shape inference.

use crate::error::{ExportError, ExportResult};

/// Calculate total number of elements from shape
pub fn numel(shape: &[i64]) -> usize {
    shape.iter().map(|&d| d.max(0) as usize).product()
}

fn dim_from_right(shape: &[i64], i: usize) -> i64 {
    if i < shape.len() {
        shape[shape.len() - 1 - i]
    } else {
        1
    }
}

/// Check if two shapes are broadcastable
pub fn is_broadcastable(shape_a: &[i64], shape_b: &[i64]) -> bool {
    let max_len = shape_a.len().max(shape_b.len());

    (0..max_len).all(|i| {
        let dim_a = dim_from_right(shape_a, i);
        let dim_b = dim_from_right(shape_b, i);
        // Unknown dims are considered broadcastable
        dim_a < 0 || dim_b < 0 || dim_a == dim_b || dim_a == 1 || dim_b == 1
    })
}

/// Compute broadcast output shape
pub fn broadcast_shape(shape_a: &[i64], shape_b: &[i64]) -> ExportResult<Vec<i64>> {
    if !is_broadcastable(shape_a, shape_b) {
        return Err(ExportError::InvalidGraph(format!(
            "Shapes {:?} and {:?} are not broadcastable",
            shape_a, shape_b
        )));
    }

    let max_len = shape_a.len().max(shape_b.len());
    let mut result = vec![0i64; max_len];

    for i in 0..max_len {
        let dim_a = dim_from_right(shape_a, i);
        let dim_b = dim_from_right(shape_b, i);

        let out_dim = if dim_a < 0 {
            if dim_b == 1 {
                dim_a
            } else {
                dim_b
            }
        } else if dim_b < 0 {
            if dim_a == 1 {
                dim_b
            } else {
                dim_a
            }
        } else {
            dim_a.max(dim_b)
        };

        result[max_len - 1 - i] = out_dim;
    }

    Ok(result)
}

/// Normalize axis to positive index
pub fn normalize_axis(axis: i64, ndim: usize) -> ExportResult<usize> {
    let ndim_i64 = ndim as i64;
    let normalized = if axis < 0 { axis + ndim_i64 } else { axis };

    if normalized < 0 || normalized >= ndim_i64 {
        return Err(ExportError::InvalidGraph(format!(
            "Axis {} out of bounds for ndim {}",
            axis, ndim
        )));
    }

    Ok(normalized as usize)
}
