// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Max, average and global average pooling.

use super::{as_nchw, Window2d};
use crate::{Shape, Tensor, TensorError};

/// Pooling attributes. Empty `strides` / `pads` take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolParams {
    pub kernel_shape: Vec<usize>,
    pub strides: Vec<usize>,
    /// All begin pads followed by all end pads.
    pub pads: Vec<usize>,
    pub ceil_mode: bool,
    /// Average pooling only: count padded cells in the divisor.
    pub count_include_pad: bool,
}

impl PoolParams {
    /// Output spatial lengths for the given input spatial lengths.
    pub fn output_dims(&self, spatial: &[usize]) -> Result<Vec<usize>, TensorError> {
        let rank = self.kernel_shape.len();
        if spatial.len() != rank {
            return Err(TensorError::InvalidArgument {
                op: "pool",
                detail: format!("kernel rank {rank} vs input spatial rank {}", spatial.len()),
            });
        }
        (0..rank)
            .map(|i| {
                let s = self.strides.get(i).copied().unwrap_or(1);
                let pb = self.pads.get(i).copied().unwrap_or(0);
                let pe = self.pads.get(i + rank).copied().unwrap_or(0);
                pooled_len(spatial[i], self.kernel_shape[i], s, pb, pe, self.ceil_mode)
            })
            .collect()
    }
}

fn pooled_len(
    input: usize,
    kernel: usize,
    stride: usize,
    pad_begin: usize,
    pad_end: usize,
    ceil_mode: bool,
) -> Result<usize, TensorError> {
    let padded = input + pad_begin + pad_end;
    if kernel == 0 || stride == 0 || padded < kernel {
        return Err(TensorError::InvalidArgument {
            op: "pool",
            detail: format!("kernel {kernel} / stride {stride} invalid for padded input {padded}"),
        });
    }
    let span = padded - kernel;
    let mut out = if ceil_mode {
        span.div_ceil(stride) + 1
    } else {
        span / stride + 1
    };
    // The last window must start inside the input or its leading pad.
    if ceil_mode && (out - 1) * stride >= input + pad_begin {
        out -= 1;
    }
    Ok(out)
}

#[derive(Clone, Copy)]
enum PoolKind {
    Max,
    Average { count_include_pad: bool },
}

fn pool(
    op: &'static str,
    kind: PoolKind,
    input: &Tensor,
    params: &PoolParams,
) -> Result<Tensor, TensorError> {
    let [n, c, h, w] = as_nchw(op, input.shape())?;
    let spatial_in = &input.shape().dims()[2..];
    let out_spatial = params.output_dims(spatial_in)?;
    let win = Window2d::new(op, &params.kernel_shape, &params.strides, &params.pads, &[])?;
    let (oh, ow) = match out_spatial.as_slice() {
        [l] => (1, *l),
        [a, b] => (*a, *b),
        _ => {
            return Err(TensorError::InvalidArgument {
                op,
                detail: format!("unsupported pooling rank for {}", input.shape()),
            })
        }
    };

    let x = input.to_f64_vec();
    let mut y = Vec::with_capacity(n * c * oh * ow);
    for plane in 0..n * c {
        let base = plane * h * w;
        for oy in 0..oh {
            for ox in 0..ow {
                let y0 = (oy * win.strides[0]) as isize - win.pads[0] as isize;
                let x0 = (ox * win.strides[1]) as isize - win.pads[1] as isize;
                // Window clipped to the padded extent (for the divisor) and
                // to the real input (for the values).
                let y_end_pad = (y0 + win.kernel[0] as isize).min((h + win.pads[2]) as isize);
                let x_end_pad = (x0 + win.kernel[1] as isize).min((w + win.pads[3]) as isize);
                let (ys, ye) = (y0.max(0), y_end_pad.min(h as isize));
                let (xs, xe) = (x0.max(0), x_end_pad.min(w as isize));

                let mut max = f64::NEG_INFINITY;
                let mut sum = 0.0;
                let mut valid = 0usize;
                for iy in ys..ye {
                    for ix in xs..xe {
                        let v = x[base + iy as usize * w + ix as usize];
                        max = max.max(v);
                        sum += v;
                        valid += 1;
                    }
                }
                let value = match kind {
                    PoolKind::Max => max,
                    PoolKind::Average { count_include_pad } => {
                        let divisor = if count_include_pad {
                            ((y_end_pad - y0) * (x_end_pad - x0)).max(1) as f64
                        } else {
                            valid.max(1) as f64
                        };
                        sum / divisor
                    }
                };
                y.push(value);
            }
        }
    }

    let mut out_dims = vec![n, c];
    out_dims.extend(out_spatial);
    Tensor::from_f64(Shape::new(out_dims), input.dtype(), &y)
}

/// Max pooling over 1-D or 2-D spatial windows.
pub fn max_pool(input: &Tensor, params: &PoolParams) -> Result<Tensor, TensorError> {
    pool("max_pool", PoolKind::Max, input, params)
}

/// Average pooling over 1-D or 2-D spatial windows.
pub fn average_pool(input: &Tensor, params: &PoolParams) -> Result<Tensor, TensorError> {
    pool(
        "average_pool",
        PoolKind::Average {
            count_include_pad: params.count_include_pad,
        },
        input,
        params,
    )
}

/// Averages every spatial position of each `[N, C]` plane, keeping the
/// spatial dimensions as 1.
pub fn global_average_pool(input: &Tensor) -> Result<Tensor, TensorError> {
    let dims = input.shape().dims();
    if dims.len() < 3 {
        return Err(TensorError::InvalidArgument {
            op: "global_average_pool",
            detail: format!("expected rank >= 3, got {}", input.shape()),
        });
    }
    let planes = dims[0] * dims[1];
    let area: usize = dims[2..].iter().product();
    let x = input.to_f64_vec();
    let y: Vec<f64> = (0..planes)
        .map(|p| x[p * area..(p + 1) * area].iter().sum::<f64>() / area.max(1) as f64)
        .collect();
    let mut out_dims = vec![dims[0], dims[1]];
    out_dims.extend(std::iter::repeat(1).take(dims.len() - 2));
    Tensor::from_f64(Shape::new(out_dims), input.dtype(), &y)
}
