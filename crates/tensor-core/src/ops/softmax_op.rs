// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax activation operation.

use super::normalize_axis;
use crate::{Tensor, TensorError};

/// Computes softmax along `axis`: `output[i] = exp(x[i] - max) / sum(exp(x - max))`.
///
/// Uses the numerically stable variant that subtracts the maximum value
/// before exponentiation to prevent overflow.
///
/// # Errors
/// Returns [`TensorError::InvalidArgument`] if `axis` is out of range.
pub fn softmax(input: &Tensor, axis: i64) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    if dims.is_empty() {
        // Softmax of a single value is 1.0.
        return Tensor::from_f64(input.shape().clone(), input.dtype(), &[1.0]);
    }
    let axis = normalize_axis("softmax", axis, dims.len())?;
    let len = dims[axis];
    let inner: usize = dims[axis + 1..].iter().product();
    let outer: usize = dims[..axis].iter().product();

    let mut x = input.to_f64_vec();
    if len == 0 {
        return Tensor::from_f64(input.shape().clone(), input.dtype(), &x);
    }
    for o in 0..outer {
        for i in 0..inner {
            let at = |j: usize| o * len * inner + j * inner + i;
            let max_val = (0..len).map(|j| x[at(j)]).fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for j in 0..len {
                let e = (x[at(j)] - max_val).exp();
                x[at(j)] = e;
                sum += e;
            }
            let inv_sum = 1.0 / sum;
            for j in 0..len {
                x[at(j)] *= inv_sum;
            }
        }
    }
    Tensor::from_f64(input.shape().clone(), input.dtype(), &x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shape;

    fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_softmax_uniform() {
        let input = Tensor::from_f32(Shape::vector(4), &[1.0; 4]).unwrap();
        let out = softmax(&input, -1).unwrap();
        for &v in &out.to_f32_vec() {
            assert!(approx_eq(v, 0.25, 1e-6));
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let input = Tensor::from_f32(Shape::matrix(2, 3), &[1.0, 2.0, 3.0, -1.0, 0.0, 1.0]).unwrap();
        let out = softmax(&input, 1).unwrap().to_f32_vec();
        for row in out.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!(approx_eq(sum, 1.0, 1e-5), "row sum = {sum}");
        }
    }

    #[test]
    fn test_softmax_large_values_stable() {
        let input = Tensor::from_f32(Shape::vector(3), &[1000.0, 1001.0, 1002.0]).unwrap();
        let out = softmax(&input, 0).unwrap().to_f32_vec();
        let sum: f32 = out.iter().sum();
        assert!(approx_eq(sum, 1.0, 1e-5));
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn test_softmax_axis_zero_of_matrix() {
        let input = Tensor::from_f32(Shape::matrix(2, 2), &[0.0, 5.0, 0.0, 5.0]).unwrap();
        let out = softmax(&input, 0).unwrap().to_f32_vec();
        // Each column holds two equal values.
        for v in out {
            assert!(approx_eq(v, 0.5, 1e-6));
        }
    }
}
