// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sum and mean reductions.

use super::normalize_axis;
use crate::{Shape, Tensor, TensorError};

/// Reduction applied by [`reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Mean,
}

/// Reduces `input` over `axes` (all axes when empty).
pub fn reduce(
    input: &Tensor,
    kind: ReduceKind,
    axes: &[i64],
    keepdims: bool,
) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    let rank = dims.len();
    let mut reduced = vec![axes.is_empty(); rank];
    for &a in axes {
        reduced[normalize_axis("reduce", a, rank)?] = true;
    }

    let out_full: Vec<usize> = dims
        .iter()
        .zip(&reduced)
        .map(|(&d, &r)| if r { 1 } else { d })
        .collect();
    let out_len: usize = out_full.iter().product();
    let out_strides = Shape::new(out_full.clone()).strides();
    let count: usize = dims
        .iter()
        .zip(&reduced)
        .filter(|&(_, &r)| r)
        .map(|(&d, _)| d)
        .product();

    let x = input.to_f64_vec();
    let mut acc = vec![0.0f64; out_len];
    let mut counter = vec![0usize; rank];
    for &v in &x {
        let target: usize = (0..rank)
            .filter(|&i| !reduced[i])
            .map(|i| counter[i] * out_strides[i])
            .sum();
        acc[target] += v;
        for axis in (0..rank).rev() {
            counter[axis] += 1;
            if counter[axis] < dims[axis] {
                break;
            }
            counter[axis] = 0;
        }
    }
    if kind == ReduceKind::Mean && count > 0 {
        let inv = 1.0 / count as f64;
        acc.iter_mut().for_each(|v| *v *= inv);
    }

    let out_dims = if keepdims {
        out_full
    } else {
        dims.iter()
            .zip(&reduced)
            .filter(|&(_, &r)| !r)
            .map(|(&d, _)| d)
            .collect()
    };
    Tensor::from_f64(Shape::new(out_dims), input.dtype(), &acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tensor {
        Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn test_reduce_sum_axis1() {
        let out = reduce(&sample(), ReduceKind::Sum, &[1], false).unwrap();
        assert_eq!(out.shape(), &Shape::vector(2));
        assert_eq!(out.to_f32_vec(), vec![6.0, 15.0]);
    }

    #[test]
    fn test_reduce_mean_axis0_keepdims() {
        let out = reduce(&sample(), ReduceKind::Mean, &[0], true).unwrap();
        assert_eq!(out.shape(), &Shape::matrix(1, 3));
        assert_eq!(out.to_f32_vec(), vec![2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_reduce_all() {
        let out = reduce(&sample(), ReduceKind::Mean, &[], false).unwrap();
        assert_eq!(out.shape().rank(), 0);
        assert_eq!(out.to_f32_vec(), vec![3.5]);
    }

    #[test]
    fn test_reduce_negative_axis() {
        let out = reduce(&sample(), ReduceKind::Sum, &[-1], true).unwrap();
        assert_eq!(out.shape(), &Shape::matrix(2, 1));
    }
}
