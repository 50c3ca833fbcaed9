// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcasting element-wise binary kernels.

use super::broadcast_indices;
use crate::{DType, Shape, Tensor, TensorError};

/// Arithmetic operators supported by [`binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
        }
    }

    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    /// Integer arithmetic wraps like a fixed-width register. Division
    /// truncates toward zero; `None` for a zero divisor.
    #[inline]
    fn apply_int(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            BinaryOp::Div => (b != 0).then(|| a.wrapping_div(b)),
            BinaryOp::Pow => Some(match u32::try_from(b) {
                Ok(e) => a.wrapping_pow(e),
                Err(_) if b < 0 => match a {
                    1 => 1,
                    -1 => if b % 2 == 0 { 1 } else { -1 },
                    _ => 0,
                },
                Err(_) => 0,
            }),
        }
    }
}

/// Comparison operators supported by [`compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    Less,
    Greater,
}

fn broadcast_shape(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<Shape, TensorError> {
    lhs.broadcast(rhs).ok_or_else(|| TensorError::ShapeMismatch {
        op,
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    })
}

/// Applies `op` element-wise with numpy broadcasting.
///
/// The result takes the element type of `lhs`. Integer tensors are computed
/// in `i64`; integer division truncates toward zero.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if the shapes do not broadcast and
/// [`TensorError::InvalidArgument`] for an integer division by zero.
pub fn binary(op: BinaryOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, TensorError> {
    let out_shape = broadcast_shape(op.name(), lhs.shape(), rhs.shape())?;
    let ia = broadcast_indices(lhs.shape(), &out_shape);
    let ib = broadcast_indices(rhs.shape(), &out_shape);

    if lhs.dtype().is_integer() && rhs.dtype().is_integer() {
        let a = lhs.to_i64_vec();
        let b = rhs.to_i64_vec();
        let values = ia
            .iter()
            .zip(&ib)
            .map(|(&i, &j)| {
                op.apply_int(a[i], b[j]).ok_or_else(|| TensorError::InvalidArgument {
                    op: op.name(),
                    detail: "integer division by zero".into(),
                })
            })
            .collect::<Result<Vec<i64>, _>>()?;
        return Tensor::from_integers(out_shape, lhs.dtype(), &values);
    }

    let a = lhs.to_f64_vec();
    let b = rhs.to_f64_vec();
    let integer = lhs.dtype().is_integer();
    let values: Vec<f64> = ia
        .iter()
        .zip(&ib)
        .map(|(&i, &j)| {
            let v = op.apply(a[i], b[j]);
            if integer { v.trunc() } else { v }
        })
        .collect();
    Tensor::from_f64(out_shape, lhs.dtype(), &values)
}

/// Compares two tensors element-wise, producing a `Bool` tensor.
pub fn compare(op: CompareOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, TensorError> {
    let out_shape = broadcast_shape("compare", lhs.shape(), rhs.shape())?;
    let a = lhs.to_f64_vec();
    let b = rhs.to_f64_vec();
    let ia = broadcast_indices(lhs.shape(), &out_shape);
    let ib = broadcast_indices(rhs.shape(), &out_shape);

    let values: Vec<f64> = ia
        .iter()
        .zip(&ib)
        .map(|(&i, &j)| {
            let hit = match op {
                CompareOp::Equal => a[i] == b[j],
                CompareOp::Less => a[i] < b[j],
                CompareOp::Greater => a[i] > b[j],
            };
            f64::from(u8::from(hit))
        })
        .collect();
    Tensor::from_f64(out_shape, DType::Bool, &values)
}

/// Selects from `x` where `cond` is true and from `y` elsewhere, with
/// three-way broadcasting.
pub fn where_select(cond: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor, TensorError> {
    let xy = broadcast_shape("where", x.shape(), y.shape())?;
    let out_shape = broadcast_shape("where", cond.shape(), &xy)?;
    let c = cond.to_f64_vec();
    let xv = x.to_f64_vec();
    let yv = y.to_f64_vec();
    let ic = broadcast_indices(cond.shape(), &out_shape);
    let ix = broadcast_indices(x.shape(), &out_shape);
    let iy = broadcast_indices(y.shape(), &out_shape);

    let values: Vec<f64> = (0..out_shape.num_elements())
        .map(|k| if c[ic[k]] != 0.0 { xv[ix[k]] } else { yv[iy[k]] })
        .collect();
    Tensor::from_f64(out_shape, x.dtype(), &values)
}
