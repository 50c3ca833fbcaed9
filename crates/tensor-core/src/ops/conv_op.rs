// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Grouped 1-D and 2-D convolution.

use super::{as_nchw, Window2d};
use crate::{Shape, Tensor, TensorError};

/// Convolution attributes. Empty vectors take their defaults (unit
/// strides and dilations, zero padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvParams {
    pub strides: Vec<usize>,
    /// All begin pads followed by all end pads.
    pub pads: Vec<usize>,
    pub dilations: Vec<usize>,
    pub group: usize,
}

impl Default for ConvParams {
    fn default() -> Self {
        Self {
            strides: Vec::new(),
            pads: Vec::new(),
            dilations: Vec::new(),
            group: 1,
        }
    }
}

/// Convolves `input` (`[N, C, L]` or `[N, C, H, W]`) with `weight`
/// (`[M, C / group, kL]` or `[M, C / group, kH, kW]`), adding `bias`
/// (`[M]`) when present.
///
/// # Errors
/// Returns [`TensorError::ShapeMismatch`] when channel counts disagree and
/// [`TensorError::InvalidArgument`] for malformed attributes.
pub fn conv(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    params: &ConvParams,
) -> Result<Tensor, TensorError> {
    let spatial = input.shape().rank().saturating_sub(2);
    if weight.shape().rank() != input.shape().rank() {
        return Err(TensorError::ShapeMismatch {
            op: "conv",
            lhs: input.shape().clone(),
            rhs: weight.shape().clone(),
        });
    }
    let [n, c, h, w] = as_nchw("conv", input.shape())?;
    let [m, cg, kh, kw] = as_nchw("conv", weight.shape())?;
    let group = params.group.max(1);
    if cg * group != c || m % group != 0 {
        return Err(TensorError::ShapeMismatch {
            op: "conv",
            lhs: input.shape().clone(),
            rhs: weight.shape().clone(),
        });
    }

    let kernel = &weight.shape().dims()[2..];
    let win = Window2d::new(
        "conv",
        kernel,
        &params.strides,
        &params.pads,
        &params.dilations,
    )?;
    debug_assert_eq!(win.kernel, [kh, kw]);
    let oh = out_len(h, kh, win.strides[0], win.dilations[0], win.pads[0], win.pads[2])?;
    let ow = out_len(w, kw, win.strides[1], win.dilations[1], win.pads[1], win.pads[3])?;

    let x = input.to_f64_vec();
    let wt = weight.to_f64_vec();
    let b = match bias {
        Some(b) if b.num_elements() == m => b.to_f64_vec(),
        Some(b) => {
            return Err(TensorError::ShapeMismatch {
                op: "conv (bias)",
                lhs: Shape::vector(m),
                rhs: b.shape().clone(),
            })
        }
        None => vec![0.0; m],
    };

    let m_per_group = m / group;
    let mut y = vec![0.0f64; n * m * oh * ow];
    for ni in 0..n {
        for mi in 0..m {
            let g = mi / m_per_group;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = b[mi];
                    for ci in 0..cg {
                        let cin = g * cg + ci;
                        for ky in 0..kh {
                            let iy = (oy * win.strides[0] + ky * win.dilations[0]) as isize
                                - win.pads[0] as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * win.strides[1] + kx * win.dilations[1]) as isize
                                    - win.pads[1] as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                let xv = x[((ni * c + cin) * h + iy as usize) * w + ix as usize];
                                let wv = wt[((mi * cg + ci) * kh + ky) * kw + kx];
                                acc += xv * wv;
                            }
                        }
                    }
                    y[((ni * m + mi) * oh + oy) * ow + ox] = acc;
                }
            }
        }
    }

    let out_shape = if spatial == 1 {
        Shape::new(vec![n, m, ow])
    } else {
        Shape::new(vec![n, m, oh, ow])
    };
    Tensor::from_f64(out_shape, input.dtype(), &y)
}

/// Output length of a dilated, padded sliding window.
pub(crate) fn out_len(
    input: usize,
    kernel: usize,
    stride: usize,
    dilation: usize,
    pad_begin: usize,
    pad_end: usize,
) -> Result<usize, TensorError> {
    let effective = dilation * (kernel.saturating_sub(1)) + 1;
    let padded = input + pad_begin + pad_end;
    if padded < effective {
        return Err(TensorError::InvalidArgument {
            op: "conv",
            detail: format!("kernel extent {effective} exceeds padded input {padded}"),
        });
    }
    Ok((padded - effective) / stride + 1)
}
