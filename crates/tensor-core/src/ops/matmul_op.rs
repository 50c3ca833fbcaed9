// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication and general matrix multiply (Gemm).

use super::broadcast_indices;
use crate::{Shape, Tensor, TensorError};

/// Performs numpy-style matrix multiplication: `output = lhs @ rhs`.
///
/// 1-D operands are promoted (a leading or trailing unit dimension is
/// inserted and removed again afterwards) and leading batch dimensions
/// broadcast against each other.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if the inner dimensions differ
/// or the batch dimensions do not broadcast.
pub fn matmul(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, TensorError> {
    let mismatch = || TensorError::ShapeMismatch {
        op: "matmul",
        lhs: lhs.shape().clone(),
        rhs: rhs.shape().clone(),
    };
    if lhs.shape().rank() == 0 || rhs.shape().rank() == 0 {
        return Err(mismatch());
    }

    let lhs_vec = lhs.shape().rank() == 1;
    let rhs_vec = rhs.shape().rank() == 1;
    let mut a_dims = lhs.shape().dims().to_vec();
    let mut b_dims = rhs.shape().dims().to_vec();
    if lhs_vec {
        a_dims.insert(0, 1);
    }
    if rhs_vec {
        b_dims.push(1);
    }

    let (m, k) = (a_dims[a_dims.len() - 2], a_dims[a_dims.len() - 1]);
    let (k2, n) = (b_dims[b_dims.len() - 2], b_dims[b_dims.len() - 1]);
    if k != k2 {
        return Err(mismatch());
    }

    let batch_a = Shape::new(a_dims[..a_dims.len() - 2].to_vec());
    let batch_b = Shape::new(b_dims[..b_dims.len() - 2].to_vec());
    let batch = batch_a.broadcast(&batch_b).ok_or_else(mismatch)?;

    let a = lhs.to_f64_vec();
    let b = rhs.to_f64_vec();
    let ia = broadcast_indices(&batch_a, &batch);
    let ib = broadcast_indices(&batch_b, &batch);
    let mut c = vec![0.0f64; batch.num_elements() * m * n];

    for (bi, (&xa, &xb)) in ia.iter().zip(&ib).enumerate() {
        matmul_f64(
            &a[xa * m * k..(xa + 1) * m * k],
            &b[xb * k * n..(xb + 1) * k * n],
            &mut c[bi * m * n..(bi + 1) * m * n],
            m,
            k,
            n,
        );
    }

    let mut out_dims = batch.dims().to_vec();
    if !lhs_vec {
        out_dims.push(m);
    }
    if !rhs_vec {
        out_dims.push(n);
    }
    Tensor::from_f64(Shape::new(out_dims), lhs.dtype(), &c)
}

/// Attributes of a Gemm: `Y = alpha * A' * B' + beta * C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmParams {
    pub alpha: f64,
    pub beta: f64,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl Default for GemmParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false,
        }
    }
}

/// General matrix multiply on 2-D operands. `c`, when present, is
/// broadcast to the `[M, N]` result.
pub fn gemm(
    a: &Tensor,
    b: &Tensor,
    c: Option<&Tensor>,
    params: &GemmParams,
) -> Result<Tensor, TensorError> {
    let mismatch = |rhs: &Tensor| TensorError::ShapeMismatch {
        op: "gemm",
        lhs: a.shape().clone(),
        rhs: rhs.shape().clone(),
    };
    let (&[ar, ac], &[br, bc]) = (a.shape().dims(), b.shape().dims()) else {
        return Err(mismatch(b));
    };
    let (m, k) = if params.trans_a { (ac, ar) } else { (ar, ac) };
    let (k2, n) = if params.trans_b { (bc, br) } else { (br, bc) };
    if k != k2 {
        return Err(mismatch(b));
    }

    let av = a.to_f64_vec();
    let bv = b.to_f64_vec();
    let a_at = |i: usize, p: usize| {
        if params.trans_a {
            av[p * ac + i]
        } else {
            av[i * ac + p]
        }
    };
    let b_at = |p: usize, j: usize| {
        if params.trans_b {
            bv[j * bc + p]
        } else {
            bv[p * bc + j]
        }
    };

    let out_shape = Shape::matrix(m, n);
    let bias = match c {
        Some(c) => {
            let fits = c
                .shape()
                .broadcast(&out_shape)
                .is_some_and(|s| s == out_shape);
            if !fits {
                return Err(mismatch(c));
            }
            let idx = broadcast_indices(c.shape(), &out_shape);
            let cv = c.to_f64_vec();
            Some(idx.into_iter().map(|i| cv[i]).collect::<Vec<_>>())
        }
        None => None,
    };

    let mut y = vec![0.0f64; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for p in 0..k {
                acc += a_at(i, p) * b_at(p, j);
            }
            let mut v = params.alpha * acc;
            if let Some(bias) = &bias {
                v += params.beta * bias[i * n + j];
            }
            y[i * n + j] = v;
        }
    }
    Tensor::from_f64(out_shape, a.dtype(), &y)
}

/// Portable f64 matrix multiplication using ikj loop order so the inner
/// loop walks a row of `b` and a row of `c` sequentially.
fn matmul_f64(a: &[f64], b: &[f64], c: &mut [f64], m: usize, k: usize, n: usize) {
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            let c_row = &mut c[i * n..(i + 1) * n];
            let b_row = &b[p * n..(p + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
}
