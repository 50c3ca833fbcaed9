// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Data movement kernels: transpose, concat, slice, gather, expand and
//! reshape target resolution.
//!
//! These operate on raw element bytes so any dtype passes through exactly.

use super::{broadcast_indices, normalize_axis, strided_indices};
use crate::{Shape, Tensor, TensorError};

/// Builds a tensor of `shape` whose k-th element is element `idx[k]` of
/// `input`.
fn take_elements(input: &Tensor, idx: &[usize], shape: Shape) -> Result<Tensor, TensorError> {
    let width = input.dtype().size_bytes();
    let src = input.as_bytes();
    let mut data = Vec::with_capacity(idx.len() * width);
    for &i in idx {
        data.extend_from_slice(&src[i * width..(i + 1) * width]);
    }
    Tensor::from_bytes(shape, input.dtype(), data)
}

/// Permutes the dimensions of `input`. An empty `perm` reverses them.
pub fn transpose(input: &Tensor, perm: &[usize]) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    let rank = dims.len();
    let perm: Vec<usize> = if perm.is_empty() {
        (0..rank).rev().collect()
    } else {
        perm.to_vec()
    };
    let mut seen = vec![false; rank];
    let valid = perm.len() == rank
        && perm.iter().all(|&p| p < rank && !std::mem::replace(&mut seen[p], true));
    if !valid {
        return Err(TensorError::InvalidArgument {
            op: "transpose",
            detail: format!("{perm:?} is not a permutation of rank {rank}"),
        });
    }

    let strides = input.shape().strides();
    let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let out_strides: Vec<usize> = perm.iter().map(|&p| strides[p]).collect();
    let idx = strided_indices(&out_dims, &out_strides);
    take_elements(input, &idx, Shape::new(out_dims))
}

/// Concatenates tensors along `axis`.
pub fn concat(inputs: &[&Tensor], axis: i64) -> Result<Tensor, TensorError> {
    let Some(first) = inputs.first() else {
        return Err(TensorError::InvalidArgument {
            op: "concat",
            detail: "no inputs".into(),
        });
    };
    let rank = first.shape().rank();
    if rank == 0 {
        return Err(TensorError::InvalidArgument {
            op: "concat",
            detail: "cannot concatenate scalars".into(),
        });
    }
    let axis = normalize_axis("concat", axis, rank)?;
    let mut out_dims = first.shape().dims().to_vec();
    out_dims[axis] = 0;
    for t in inputs {
        let compatible = t.dtype() == first.dtype()
            && t.shape().rank() == rank
            && t
                .shape()
                .dims()
                .iter()
                .zip(first.shape().dims())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(TensorError::ShapeMismatch {
                op: "concat",
                lhs: first.shape().clone(),
                rhs: t.shape().clone(),
            });
        }
        out_dims[axis] += t.shape().dims()[axis];
    }

    let outer: usize = out_dims[..axis].iter().product();
    let inner: usize = out_dims[axis + 1..].iter().product();
    let width = first.dtype().size_bytes();
    let total: usize = out_dims.iter().product::<usize>() * width;
    let mut data = Vec::with_capacity(total);
    for o in 0..outer {
        for t in inputs {
            let chunk = t.shape().dims()[axis] * inner * width;
            data.extend_from_slice(&t.as_bytes()[o * chunk..(o + 1) * chunk]);
        }
    }
    Tensor::from_bytes(Shape::new(out_dims), first.dtype(), data)
}

/// A resolved slice along one axis: `len` elements starting at `start`,
/// `step` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAxis {
    pub start: i64,
    pub step: i64,
    pub len: usize,
}

/// Resolves `start`, `end` and `step` against a dimension of size `dim`,
/// clamping out-of-range bounds the way numpy does.
pub fn slice_axis(dim: usize, start: i64, end: i64, step: i64) -> Result<SliceAxis, TensorError> {
    if step == 0 {
        return Err(TensorError::InvalidArgument {
            op: "slice",
            detail: "step must be non-zero".into(),
        });
    }
    if dim == 0 {
        return Ok(SliceAxis { start: 0, step, len: 0 });
    }
    let d = dim as i64;
    let wrap = |v: i64| if v < 0 { v.saturating_add(d) } else { v };
    let (start, end) = if step > 0 {
        (wrap(start).clamp(0, d), wrap(end).clamp(0, d))
    } else {
        (wrap(start).clamp(0, d - 1), wrap(end).clamp(-1, d - 1))
    };
    let len = if step > 0 && end > start {
        (end - start + step - 1) / step
    } else if step < 0 && start > end {
        (start - end - step - 1) / -step
    } else {
        0
    };
    Ok(SliceAxis {
        start,
        step,
        len: len as usize,
    })
}

/// Extracts a strided sub-tensor. Empty `axes` means `0..starts.len()`,
/// empty `steps` means unit steps.
pub fn slice(
    input: &Tensor,
    starts: &[i64],
    ends: &[i64],
    axes: &[i64],
    steps: &[i64],
) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    let rank = dims.len();
    if starts.len() != ends.len()
        || (!axes.is_empty() && axes.len() != starts.len())
        || (!steps.is_empty() && steps.len() != starts.len())
    {
        return Err(TensorError::InvalidArgument {
            op: "slice",
            detail: "starts, ends, axes and steps must have equal lengths".into(),
        });
    }

    let mut per_axis: Vec<Vec<usize>> = dims.iter().map(|&d| (0..d).collect()).collect();
    for k in 0..starts.len() {
        let axis = match axes.get(k) {
            Some(&a) => normalize_axis("slice", a, rank)?,
            None => k,
        };
        if axis >= rank {
            return Err(TensorError::InvalidArgument {
                op: "slice",
                detail: format!("axis {axis} out of range for rank {rank}"),
            });
        }
        let step = steps.get(k).copied().unwrap_or(1);
        let r = slice_axis(dims[axis], starts[k], ends[k], step)?;
        per_axis[axis] = (0..r.len)
            .map(|i| (r.start + i as i64 * r.step) as usize)
            .collect();
    }

    let strides = input.shape().strides();
    let mut offsets = vec![0usize];
    for (axis, picks) in per_axis.iter().enumerate() {
        let stride = strides[axis];
        offsets = offsets
            .iter()
            .flat_map(|&base| picks.iter().map(move |&i| base + i * stride))
            .collect();
    }
    let out_dims = per_axis.iter().map(Vec::len).collect();
    take_elements(input, &offsets, Shape::new(out_dims))
}

/// Gathers slices of `input` along `axis` selected by integer `indices`.
/// Negative indices count from the end.
pub fn gather(input: &Tensor, indices: &Tensor, axis: i64) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    if dims.is_empty() {
        return Err(TensorError::InvalidArgument {
            op: "gather",
            detail: "cannot gather from a scalar".into(),
        });
    }
    let axis = normalize_axis("gather", axis, dims.len())?;
    let dim = dims[axis];
    let idx = indices
        .to_i64_vec()
        .into_iter()
        .map(|i| {
            let r = if i < 0 { i + dim as i64 } else { i };
            if r < 0 || r >= dim as i64 {
                Err(TensorError::InvalidArgument {
                    op: "gather",
                    detail: format!("index {i} out of range for dimension {dim}"),
                })
            } else {
                Ok(r as usize)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis + 1..].iter().product();
    let width = input.dtype().size_bytes();
    let chunk = inner * width;
    let src = input.as_bytes();
    let mut data = Vec::with_capacity(outer * idx.len() * chunk);
    for o in 0..outer {
        for &i in &idx {
            let start = (o * dim + i) * chunk;
            data.extend_from_slice(&src[start..start + chunk]);
        }
    }

    let mut out_dims = dims[..axis].to_vec();
    out_dims.extend_from_slice(indices.shape().dims());
    out_dims.extend_from_slice(&dims[axis + 1..]);
    Tensor::from_bytes(Shape::new(out_dims), input.dtype(), data)
}

/// Broadcasts `input` against `shape` (bidirectionally, as numpy does).
pub fn expand(input: &Tensor, shape: &Shape) -> Result<Tensor, TensorError> {
    let out = input
        .shape()
        .broadcast(shape)
        .ok_or_else(|| TensorError::ShapeMismatch {
            op: "expand",
            lhs: input.shape().clone(),
            rhs: shape.clone(),
        })?;
    let idx = broadcast_indices(input.shape(), &out);
    take_elements(input, &idx, out)
}

/// Resolves a Reshape target against a concrete input shape. `0` copies the
/// input dimension at the same position unless `allow_zero` is set, and a
/// single `-1` is inferred from the remaining element count.
pub fn reshape_target(input: &Shape, target: &[i64], allow_zero: bool) -> Result<Shape, TensorError> {
    let bad = |detail: String| TensorError::InvalidArgument {
        op: "reshape",
        detail,
    };
    let mut dims = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &t) in target.iter().enumerate() {
        match t {
            0 if !allow_zero => {
                let d = input
                    .dim(i)
                    .ok_or_else(|| bad(format!("0 at position {i} has no input dimension")))?;
                dims.push(d);
            }
            -1 => {
                if infer_at.replace(i).is_some() {
                    return Err(bad("more than one -1 in target".into()));
                }
                dims.push(1);
            }
            t if t < 0 => return Err(bad(format!("invalid target dimension {t}"))),
            t => dims.push(t as usize),
        }
    }
    if let Some(i) = infer_at {
        let known: usize = dims.iter().product();
        let total = input.num_elements();
        if known == 0 || total % known != 0 {
            return Err(bad(format!("cannot infer -1 for {input} into {target:?}")));
        }
        dims[i] = total / known;
    }
    let out = Shape::new(dims);
    if out.num_elements() != input.num_elements() {
        return Err(TensorError::ShapeMismatch {
            op: "reshape",
            lhs: input.clone(),
            rhs: out,
        });
    }
    Ok(out)
}
