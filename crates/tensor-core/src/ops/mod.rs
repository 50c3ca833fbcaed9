// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference tensor kernels.
//!
//! Every kernel takes its inputs by reference and returns a freshly
//! allocated [`Tensor`](crate::Tensor). Arithmetic is carried out in `f64`
//! and stored back in the input's element type; layout kernels move raw
//! element bytes and never decode values, so integer payloads survive
//! untouched.

mod binary_op;
mod conv_op;
mod layer_norm_op;
mod layout_op;
mod matmul_op;
mod pool_op;
mod reduce_op;
mod softmax_op;
mod unary_op;

pub use binary_op::{binary, compare, where_select, BinaryOp, CompareOp};
pub use conv_op::{conv, ConvParams};
pub use layer_norm_op::{batch_norm, layer_norm};
pub use layout_op::{concat, expand, gather, reshape_target, slice, slice_axis, transpose, SliceAxis};
pub use matmul_op::{gemm, matmul, GemmParams};
pub use pool_op::{average_pool, global_average_pool, max_pool, PoolParams};
pub use reduce_op::{reduce, ReduceKind};
pub use softmax_op::softmax;
pub use unary_op::{unary, UnaryOp};

use crate::{Shape, TensorError};

/// Resolves a possibly negative axis against `rank`.
pub fn normalize_axis(op: &'static str, axis: i64, rank: usize) -> Result<usize, TensorError> {
    let r = rank as i64;
    let resolved = if axis < 0 { axis + r } else { axis };
    if resolved < 0 || resolved >= r.max(1) {
        return Err(TensorError::InvalidArgument {
            op,
            detail: format!("axis {axis} out of range for rank {rank}"),
        });
    }
    Ok(resolved as usize)
}

/// Walks `dims` in row-major order and returns, for each position, the
/// offset obtained by summing `counter[i] * strides[i]`.
pub(crate) fn strided_indices(dims: &[usize], strides: &[usize]) -> Vec<usize> {
    let n: usize = dims.iter().product();
    let mut out = Vec::with_capacity(n);
    let mut counter = vec![0usize; dims.len()];
    let mut offset = 0usize;
    for _ in 0..n {
        out.push(offset);
        for axis in (0..dims.len()).rev() {
            counter[axis] += 1;
            offset += strides[axis];
            if counter[axis] < dims[axis] {
                break;
            }
            offset -= strides[axis] * dims[axis];
            counter[axis] = 0;
        }
    }
    out
}

/// For every flat position of `out`, the flat position of `input` that
/// feeds it under numpy broadcasting. `out` must be a broadcast of `input`.
pub(crate) fn broadcast_indices(input: &Shape, out: &Shape) -> Vec<usize> {
    strided_indices(out.dims(), &input.broadcast_strides(out))
}

/// Normalised 2-D sliding window. One-dimensional operators are lifted to
/// two dimensions with a unit height so both share a single kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window2d {
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    /// `[top, left, bottom, right]`.
    pub pads: [usize; 4],
}

impl Window2d {
    pub fn new(
        op: &'static str,
        kernel: &[usize],
        strides: &[usize],
        pads: &[usize],
        dilations: &[usize],
    ) -> Result<Self, TensorError> {
        let spatial = kernel.len();
        let or_ones = |v: &[usize]| -> Vec<usize> {
            if v.is_empty() {
                vec![1; spatial]
            } else {
                v.to_vec()
            }
        };
        let strides = or_ones(strides);
        let dilations = or_ones(dilations);
        let pads = if pads.is_empty() {
            vec![0; spatial * 2]
        } else {
            pads.to_vec()
        };
        if strides.len() != spatial || dilations.len() != spatial || pads.len() != spatial * 2 {
            return Err(TensorError::InvalidArgument {
                op,
                detail: format!(
                    "attribute lengths disagree with {spatial} spatial dimension(s)"
                ),
            });
        }
        if strides.contains(&0) || dilations.contains(&0) {
            return Err(TensorError::InvalidArgument {
                op,
                detail: "strides and dilations must be positive".into(),
            });
        }
        match spatial {
            1 => Ok(Self {
                kernel: [1, kernel[0]],
                strides: [1, strides[0]],
                dilations: [1, dilations[0]],
                pads: [0, pads[0], 0, pads[1]],
            }),
            2 => Ok(Self {
                kernel: [kernel[0], kernel[1]],
                strides: [strides[0], strides[1]],
                dilations: [dilations[0], dilations[1]],
                pads: [pads[0], pads[1], pads[2], pads[3]],
            }),
            other => Err(TensorError::InvalidArgument {
                op,
                detail: format!("{other} spatial dimensions are not supported"),
            }),
        }
    }
}

/// Views an `[N, C, L]` or `[N, C, H, W]` shape as `[N, C, H, W]`.
pub(crate) fn as_nchw(op: &'static str, shape: &Shape) -> Result<[usize; 4], TensorError> {
    match shape.dims() {
        [n, c, l] => Ok([*n, *c, 1, *l]),
        [n, c, h, w] => Ok([*n, *c, *h, *w]),
        _ => Err(TensorError::InvalidArgument {
            op,
            detail: format!("expected a rank 3 or 4 input, got {shape}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis("t", -1, 3).unwrap(), 2);
        assert_eq!(normalize_axis("t", 0, 3).unwrap(), 0);
        assert!(normalize_axis("t", 3, 3).is_err());
        assert!(normalize_axis("t", -4, 3).is_err());
    }

    #[test]
    fn test_broadcast_indices_row() {
        let idx = broadcast_indices(&Shape::vector(3), &Shape::matrix(2, 3));
        assert_eq!(idx, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_broadcast_indices_column() {
        let idx = broadcast_indices(&Shape::matrix(2, 1), &Shape::matrix(2, 3));
        assert_eq!(idx, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_window_lifts_1d() {
        let w = Window2d::new("conv", &[3], &[2], &[1, 1], &[]).unwrap();
        assert_eq!(w.kernel, [1, 3]);
        assert_eq!(w.strides, [1, 2]);
        assert_eq!(w.pads, [0, 1, 0, 1]);
    }
}
