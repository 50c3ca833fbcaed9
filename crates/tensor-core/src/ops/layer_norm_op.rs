// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer and batch normalisation.

use super::{broadcast_indices, normalize_axis};
use crate::{Shape, Tensor, TensorError};

/// Applies layer normalisation over every dimension from `axis` onwards:
///
/// `y = (x - mean) / sqrt(var + epsilon) * scale + bias`
///
/// `scale` and `bias` broadcast against the normalised trailing shape.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] if `scale` or `bias` does not
/// broadcast to the normalised shape.
pub fn layer_norm(
    input: &Tensor,
    scale: &Tensor,
    bias: Option<&Tensor>,
    axis: i64,
    epsilon: f64,
) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    let axis = normalize_axis("layer_norm", axis, dims.len())?;
    let norm_shape = Shape::new(dims[axis..].to_vec());
    let inner = norm_shape.num_elements();
    if inner == 0 {
        return Ok(input.clone());
    }
    let outer = input.num_elements() / inner;

    let expand = |t: &Tensor| -> Result<Vec<f64>, TensorError> {
        match t.shape().broadcast(&norm_shape) {
            Some(s) if s == norm_shape => {
                let v = t.to_f64_vec();
                Ok(broadcast_indices(t.shape(), &norm_shape)
                    .into_iter()
                    .map(|i| v[i])
                    .collect())
            }
            _ => Err(TensorError::ShapeMismatch {
                op: "layer_norm",
                lhs: norm_shape.clone(),
                rhs: t.shape().clone(),
            }),
        }
    };
    let gamma = expand(scale)?;
    let beta = match bias {
        Some(b) => expand(b)?,
        None => vec![0.0; inner],
    };

    let mut x = input.to_f64_vec();
    for row in x.chunks_mut(inner).take(outer) {
        let n = inner as f64;
        let mean = row.iter().sum::<f64>() / n;
        let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let inv_std = 1.0 / (var + epsilon).sqrt();
        for (j, v) in row.iter_mut().enumerate() {
            *v = (*v - mean) * inv_std * gamma[j] + beta[j];
        }
    }
    Tensor::from_f64(input.shape().clone(), input.dtype(), &x)
}

/// Inference-mode batch normalisation over channel dimension 1:
///
/// `y = (x - mean[c]) / sqrt(var[c] + epsilon) * scale[c] + bias[c]`
pub fn batch_norm(
    input: &Tensor,
    scale: &Tensor,
    bias: &Tensor,
    mean: &Tensor,
    var: &Tensor,
    epsilon: f64,
) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    if dims.len() < 2 {
        return Err(TensorError::InvalidArgument {
            op: "batch_norm",
            detail: format!("expected rank >= 2, got {}", input.shape()),
        });
    }
    let channels = dims[1];
    for t in [scale, bias, mean, var] {
        if t.num_elements() != channels {
            return Err(TensorError::ShapeMismatch {
                op: "batch_norm",
                lhs: Shape::vector(channels),
                rhs: t.shape().clone(),
            });
        }
    }
    let spatial: usize = dims[2..].iter().product();
    let (s, b, m, v) = (
        scale.to_f64_vec(),
        bias.to_f64_vec(),
        mean.to_f64_vec(),
        var.to_f64_vec(),
    );

    let mut x = input.to_f64_vec();
    for (k, value) in x.iter_mut().enumerate() {
        let c = (k / spatial.max(1)) % channels;
        *value = (*value - m[c]) / (v[c] + epsilon).sqrt() * s[c] + b[c];
    }
    Tensor::from_f64(input.shape().clone(), input.dtype(), &x)
}
