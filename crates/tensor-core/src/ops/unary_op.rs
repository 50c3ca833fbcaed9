// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise activation and math kernels.

use crate::{Tensor, TensorError};

/// Coefficient `sqrt(2/π)`.
const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;

/// Cubic coefficient in the tanh approximation of GELU.
const GELU_COEFF: f64 = 0.044715;

/// Element-wise operators supported by [`unary`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Relu,
    /// Leaky ReLU with the given negative slope.
    LeakyRelu(f64),
    Sigmoid,
    Tanh,
    /// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
    Gelu,
    /// GELU using the tanh approximation from GPT-2.
    GeluTanh,
    Erf,
    Exp,
    Log,
    Sqrt,
    Neg,
    Abs,
    Reciprocal,
    /// Clamp into `[min, max]`.
    Clip(f64, f64),
}

impl UnaryOp {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::LeakyRelu(alpha) => {
                if x >= 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Gelu => 0.5 * x * (1.0 + erf(x / std::f64::consts::SQRT_2)),
            UnaryOp::GeluTanh => {
                let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
                0.5 * x * (1.0 + inner.tanh())
            }
            UnaryOp::Erf => erf(x),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Reciprocal => 1.0 / x,
            UnaryOp::Clip(lo, hi) => x.max(lo).min(hi),
        }
    }
}

/// Applies `op` to every element, keeping shape and element type.
///
/// # Errors
/// Never fails for well-formed tensors; the `Result` mirrors the other
/// kernels so callers can treat them uniformly.
pub fn unary(op: UnaryOp, input: &Tensor) -> Result<Tensor, TensorError> {
    let values: Vec<f64> = input.to_f64_vec().into_iter().map(|x| op.apply(x)).collect();
    Tensor::from_f64(input.shape().clone(), input.dtype(), &values)
}

/// Error function, Abramowitz and Stegun formula 7.1.26 (|error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape};

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_gelu_zero() {
        assert!(approx_eq(UnaryOp::Gelu.apply(0.0), 0.0, 1e-9));
        assert!(approx_eq(UnaryOp::GeluTanh.apply(0.0), 0.0, 1e-9));
    }

    #[test]
    fn test_gelu_positive() {
        // GELU(x) ≈ x for large positive x.
        let y = UnaryOp::Gelu.apply(3.0);
        assert!((y - 3.0).abs() < 0.01, "GELU(3.0) should be ≈ 3.0, got {y}");
    }

    #[test]
    fn test_gelu_variants_agree() {
        for x in [-2.0, -0.5, 0.7, 1.5] {
            assert!(approx_eq(UnaryOp::Gelu.apply(x), UnaryOp::GeluTanh.apply(x), 1e-3));
        }
    }

    #[test]
    fn test_erf_known_values() {
        assert!(approx_eq(erf(0.0), 0.0, 1e-7));
        assert!(approx_eq(erf(1.0), 0.842_700_79, 1e-6));
        assert!(approx_eq(erf(-1.0), -0.842_700_79, 1e-6));
    }

    #[test]
    fn test_relu_tensor() {
        let t = Tensor::from_f32(Shape::vector(4), &[-1.0, 0.0, 2.0, -3.5]).unwrap();
        let out = unary(UnaryOp::Relu, &t).unwrap();
        assert_eq!(out.to_f32_vec(), vec![0.0, 0.0, 2.0, 0.0]);
        assert_eq!(out.dtype(), DType::F32);
    }

    #[test]
    fn test_clip_and_sigmoid() {
        assert_eq!(UnaryOp::Clip(0.0, 6.0).apply(7.0), 6.0);
        assert_eq!(UnaryOp::Clip(0.0, 6.0).apply(-1.0), 0.0);
        assert!(approx_eq(UnaryOp::Sigmoid.apply(0.0), 0.5, 1e-12));
    }
}
