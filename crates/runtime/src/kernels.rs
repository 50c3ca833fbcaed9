// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The kernel rule table: one reference implementation per [`OpKind`].
//!
//! A kernel decodes the node's attributes, calls into
//! [`tensor_core::ops`] and returns one tensor per declared output.
//! Supporting a new operator means adding an arm to [`kernel_for`].

use model_ir::{Node, OpKind};
use tensor_core::ops::{
    self, BinaryOp, CompareOp, ConvParams, GemmParams, PoolParams, ReduceKind, UnaryOp,
};
use tensor_core::{DType, Shape, Tensor, TensorError};

/// Signature shared by every kernel. `inputs[i]` is `None` for an omitted
/// optional input.
pub type KernelFn = fn(&Node, &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError>;

/// Looks up the kernel for `op`. Control flow (`If`) has no kernel; the
/// executor evaluates it directly.
pub fn kernel_for(op: OpKind) -> Option<KernelFn> {
    let k: KernelFn = match op {
        OpKind::Add => |n, i| binary(n, i, BinaryOp::Add),
        OpKind::Sub => |n, i| binary(n, i, BinaryOp::Sub),
        OpKind::Mul => |n, i| binary(n, i, BinaryOp::Mul),
        OpKind::Div => |n, i| binary(n, i, BinaryOp::Div),
        OpKind::Pow => |n, i| binary(n, i, BinaryOp::Pow),
        OpKind::Equal => |n, i| compare(n, i, CompareOp::Equal),
        OpKind::Less => |n, i| compare(n, i, CompareOp::Less),
        OpKind::Greater => |n, i| compare(n, i, CompareOp::Greater),
        OpKind::Where => where_select,
        OpKind::Neg => |n, i| unary(n, i, UnaryOp::Neg),
        OpKind::Abs => |n, i| unary(n, i, UnaryOp::Abs),
        OpKind::Sqrt => |n, i| unary(n, i, UnaryOp::Sqrt),
        OpKind::Exp => |n, i| unary(n, i, UnaryOp::Exp),
        OpKind::Log => |n, i| unary(n, i, UnaryOp::Log),
        OpKind::Reciprocal => |n, i| unary(n, i, UnaryOp::Reciprocal),
        OpKind::Relu => |n, i| unary(n, i, UnaryOp::Relu),
        OpKind::Sigmoid => |n, i| unary(n, i, UnaryOp::Sigmoid),
        OpKind::Tanh => |n, i| unary(n, i, UnaryOp::Tanh),
        OpKind::Erf => |n, i| unary(n, i, UnaryOp::Erf),
        OpKind::LeakyRelu => leaky_relu,
        OpKind::Gelu => gelu,
        OpKind::Clip => clip,
        OpKind::Softmax => softmax,
        OpKind::MatMul => matmul,
        OpKind::Gemm => gemm,
        OpKind::Conv => conv,
        OpKind::MaxPool => |n, i| pool(n, i, false),
        OpKind::AveragePool => |n, i| pool(n, i, true),
        OpKind::GlobalAveragePool => |n, i| one(ops::global_average_pool(input(n, i, 0)?)),
        OpKind::BatchNormalization => batch_norm,
        OpKind::LayerNormalization => layer_norm,
        OpKind::Reshape => reshape,
        OpKind::Flatten => flatten,
        OpKind::Transpose => transpose,
        OpKind::Concat => concat,
        OpKind::Squeeze => squeeze,
        OpKind::Unsqueeze => unsqueeze,
        OpKind::Gather => gather,
        OpKind::Slice => slice,
        OpKind::Expand => expand,
        OpKind::Shape => shape,
        OpKind::Cast => cast,
        OpKind::Identity => |n, i| Ok(vec![input(n, i, 0)?.clone()]),
        OpKind::Dropout => dropout,
        OpKind::Constant => constant,
        OpKind::ReduceMean => |n, i| reduce(n, i, ReduceKind::Mean),
        OpKind::ReduceSum => |n, i| reduce(n, i, ReduceKind::Sum),
        OpKind::If => return None,
    };
    Some(k)
}

// ── Argument helpers ───────────────────────────────────────────────

fn bad(node: &Node, detail: impl Into<String>) -> TensorError {
    TensorError::InvalidArgument {
        op: node.op.as_str(),
        detail: detail.into(),
    }
}

fn input<'a>(node: &Node, inputs: &[Option<&'a Tensor>], index: usize) -> Result<&'a Tensor, TensorError> {
    inputs
        .get(index)
        .copied()
        .flatten()
        .ok_or_else(|| bad(node, format!("missing required input {index}")))
}

fn optional<'a>(inputs: &[Option<&'a Tensor>], index: usize) -> Option<&'a Tensor> {
    inputs.get(index).copied().flatten()
}

fn one(result: Result<Tensor, TensorError>) -> Result<Vec<Tensor>, TensorError> {
    result.map(|t| vec![t])
}

/// Integer list taken from input `index` when present, else from attribute
/// `key` (older opsets carry axes and slice bounds as attributes).
fn ints_from(node: &Node, inputs: &[Option<&Tensor>], index: usize, key: &str) -> Option<Vec<i64>> {
    optional(inputs, index)
        .map(Tensor::to_i64_vec)
        .or_else(|| node.attr_ints(key).map(<[i64]>::to_vec))
}

fn usizes(node: &Node, key: &str) -> Result<Vec<usize>, TensorError> {
    node.attr_ints(key)
        .unwrap_or(&[])
        .iter()
        .map(|&v| usize::try_from(v).map_err(|_| bad(node, format!("negative value in '{key}'"))))
        .collect()
}

fn static_shape(node: &Node, values: &[i64]) -> Result<Shape, TensorError> {
    values
        .iter()
        .map(|&v| usize::try_from(v).map_err(|_| bad(node, format!("invalid dimension {v}"))))
        .collect::<Result<Vec<_>, _>>()
        .map(Shape::new)
}

/// Explicit `[begin.., end..]` pads for the node's `auto_pad` mode, or the
/// `pads` attribute when `auto_pad` is absent or `NOTSET`.
pub fn resolve_pads(
    node: &Node,
    spatial: &[usize],
    kernel: &[usize],
    strides: &[usize],
    dilations: &[usize],
) -> Result<Vec<usize>, TensorError> {
    let mode = node.attr_string("auto_pad").unwrap_or("NOTSET");
    let rank = spatial.len();
    match mode {
        "NOTSET" | "" => usizes(node, "pads"),
        "VALID" => Ok(vec![0; rank * 2]),
        "SAME_UPPER" | "SAME_LOWER" => {
            let mut begin = Vec::with_capacity(rank);
            let mut end = Vec::with_capacity(rank);
            for i in 0..rank {
                let s = strides.get(i).copied().unwrap_or(1).max(1);
                let d = dilations.get(i).copied().unwrap_or(1).max(1);
                let k = kernel.get(i).copied().unwrap_or(1);
                let out = spatial[i].div_ceil(s);
                let needed = (out.saturating_sub(1)) * s + (k.saturating_sub(1)) * d + 1;
                let total = needed.saturating_sub(spatial[i]);
                let small = total / 2;
                if mode == "SAME_UPPER" {
                    begin.push(small);
                    end.push(total - small);
                } else {
                    begin.push(total - small);
                    end.push(small);
                }
            }
            begin.extend(end);
            Ok(begin)
        }
        other => Err(bad(node, format!("unknown auto_pad '{other}'"))),
    }
}

// ── Elementwise ────────────────────────────────────────────────────

fn binary(node: &Node, inputs: &[Option<&Tensor>], op: BinaryOp) -> Result<Vec<Tensor>, TensorError> {
    one(ops::binary(op, input(node, inputs, 0)?, input(node, inputs, 1)?))
}

fn compare(node: &Node, inputs: &[Option<&Tensor>], op: CompareOp) -> Result<Vec<Tensor>, TensorError> {
    one(ops::compare(op, input(node, inputs, 0)?, input(node, inputs, 1)?))
}

fn where_select(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::where_select(
        input(node, inputs, 0)?,
        input(node, inputs, 1)?,
        input(node, inputs, 2)?,
    ))
}

fn unary(node: &Node, inputs: &[Option<&Tensor>], op: UnaryOp) -> Result<Vec<Tensor>, TensorError> {
    one(ops::unary(op, input(node, inputs, 0)?))
}

fn leaky_relu(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let alpha = node.attr_float("alpha").unwrap_or(0.01);
    unary(node, inputs, UnaryOp::LeakyRelu(alpha))
}

fn gelu(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let op = match node.attr_string("approximate") {
        Some("tanh") => UnaryOp::GeluTanh,
        _ => UnaryOp::Gelu,
    };
    unary(node, inputs, op)
}

fn clip(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let bound = |index: usize, key: &str, default: f64| {
        optional(inputs, index)
            .and_then(|t| t.get_f64(0))
            .or_else(|| node.attr_float(key))
            .unwrap_or(default)
    };
    let lo = bound(1, "min", f64::NEG_INFINITY);
    let hi = bound(2, "max", f64::INFINITY);
    unary(node, inputs, UnaryOp::Clip(lo, hi))
}

fn softmax(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::softmax(input(node, inputs, 0)?, node.attr_int("axis").unwrap_or(-1)))
}

// ── Linear algebra ─────────────────────────────────────────────────

fn matmul(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::matmul(input(node, inputs, 0)?, input(node, inputs, 1)?))
}

/// Gemm attributes with their defaults.
pub fn gemm_params(node: &Node) -> GemmParams {
    GemmParams {
        alpha: node.attr_float("alpha").unwrap_or(1.0),
        beta: node.attr_float("beta").unwrap_or(1.0),
        trans_a: node.attr_int("transA").unwrap_or(0) != 0,
        trans_b: node.attr_int("transB").unwrap_or(0) != 0,
    }
}

fn gemm(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::gemm(
        input(node, inputs, 0)?,
        input(node, inputs, 1)?,
        optional(inputs, 2),
        &gemm_params(node),
    ))
}

fn conv(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let w = input(node, inputs, 1)?;
    let spatial = x.shape().dims().get(2..).unwrap_or(&[]).to_vec();
    let kernel = match usizes(node, "kernel_shape")? {
        k if k.is_empty() => w.shape().dims().get(2..).unwrap_or(&[]).to_vec(),
        k => k,
    };
    let strides = usizes(node, "strides")?;
    let dilations = usizes(node, "dilations")?;
    let pads = resolve_pads(node, &spatial, &kernel, &strides, &dilations)?;
    let params = ConvParams {
        strides,
        pads,
        dilations,
        group: node.attr_int("group").unwrap_or(1).max(1) as usize,
    };
    one(ops::conv(x, w, optional(inputs, 2), &params))
}

fn pool(node: &Node, inputs: &[Option<&Tensor>], average: bool) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let spatial = x.shape().dims().get(2..).unwrap_or(&[]).to_vec();
    let kernel_shape = usizes(node, "kernel_shape")?;
    if kernel_shape.is_empty() {
        return Err(bad(node, "missing 'kernel_shape'"));
    }
    let strides = usizes(node, "strides")?;
    let pads = resolve_pads(node, &spatial, &kernel_shape, &strides, &[])?;
    let params = PoolParams {
        kernel_shape,
        strides,
        pads,
        ceil_mode: node.attr_int("ceil_mode").unwrap_or(0) != 0,
        count_include_pad: node.attr_int("count_include_pad").unwrap_or(0) != 0,
    };
    if average {
        one(ops::average_pool(x, &params))
    } else {
        one(ops::max_pool(x, &params))
    }
}

fn batch_norm(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::batch_norm(
        input(node, inputs, 0)?,
        input(node, inputs, 1)?,
        input(node, inputs, 2)?,
        input(node, inputs, 3)?,
        input(node, inputs, 4)?,
        node.attr_float("epsilon").unwrap_or(1e-5),
    ))
}

fn layer_norm(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::layer_norm(
        input(node, inputs, 0)?,
        input(node, inputs, 1)?,
        optional(inputs, 2),
        node.attr_int("axis").unwrap_or(-1),
        node.attr_float("epsilon").unwrap_or(1e-5),
    ))
}

// ── Layout ─────────────────────────────────────────────────────────

fn reshape(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let target = input(node, inputs, 1)?.to_i64_vec();
    let allow_zero = node.attr_int("allowzero").unwrap_or(0) != 0;
    let shape = ops::reshape_target(x.shape(), &target, allow_zero)?;
    one(x.reshaped(shape))
}

/// Resolves Flatten's `axis`, which may equal the rank.
pub fn flatten_axis(node: &Node, rank: usize) -> Result<usize, TensorError> {
    let axis = node.attr_int("axis").unwrap_or(1);
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved > rank as i64 {
        return Err(bad(node, format!("axis {axis} out of range for rank {rank}")));
    }
    Ok(resolved as usize)
}

fn flatten(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let dims = x.shape().dims();
    let axis = flatten_axis(node, dims.len())?;
    let outer: usize = dims[..axis].iter().product();
    let inner: usize = dims[axis..].iter().product();
    one(x.reshaped(Shape::matrix(outer, inner)))
}

fn transpose(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::transpose(input(node, inputs, 0)?, &usizes(node, "perm")?))
}

fn concat(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let parts = (0..inputs.len())
        .map(|i| input(node, inputs, i))
        .collect::<Result<Vec<_>, _>>()?;
    let axis = node
        .attr_int("axis")
        .ok_or_else(|| bad(node, "missing 'axis'"))?;
    one(ops::concat(&parts, axis))
}

fn squeeze(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let dims = x.shape().dims();
    let axes = ints_from(node, inputs, 1, "axes").unwrap_or_default();
    let mut drop = vec![false; dims.len()];
    if axes.is_empty() {
        for (i, &d) in dims.iter().enumerate() {
            drop[i] = d == 1;
        }
    } else {
        for a in axes {
            let a = ops::normalize_axis("squeeze", a, dims.len())?;
            if dims[a] != 1 {
                return Err(bad(node, format!("cannot squeeze axis {a} of size {}", dims[a])));
            }
            drop[a] = true;
        }
    }
    let kept = dims
        .iter()
        .zip(&drop)
        .filter(|&(_, &d)| !d)
        .map(|(&v, _)| v)
        .collect();
    one(x.reshaped(Shape::new(kept)))
}

/// Layout of Unsqueeze's output for an input of `rank`: `true` marks an
/// inserted unit axis.
pub fn unsqueeze_layout(node: &Node, axes: &[i64], rank: usize) -> Result<Vec<bool>, TensorError> {
    let out_rank = rank + axes.len();
    let mut inserted = vec![false; out_rank];
    for &a in axes {
        let a = ops::normalize_axis("unsqueeze", a, out_rank)?;
        if std::mem::replace(&mut inserted[a], true) {
            return Err(bad(node, format!("duplicate axis {a}")));
        }
    }
    Ok(inserted)
}

fn unsqueeze(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let axes = ints_from(node, inputs, 1, "axes").ok_or_else(|| bad(node, "missing axes"))?;
    let layout = unsqueeze_layout(node, &axes, x.shape().rank())?;
    let mut src = x.shape().dims().iter();
    let dims = layout
        .iter()
        .map(|&ins| if ins { 1 } else { src.next().copied().unwrap_or(1) })
        .collect();
    one(x.reshaped(Shape::new(dims)))
}

fn gather(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(ops::gather(
        input(node, inputs, 0)?,
        input(node, inputs, 1)?,
        node.attr_int("axis").unwrap_or(0),
    ))
}

fn slice(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let starts = ints_from(node, inputs, 1, "starts").ok_or_else(|| bad(node, "missing starts"))?;
    let ends = ints_from(node, inputs, 2, "ends").ok_or_else(|| bad(node, "missing ends"))?;
    let axes = ints_from(node, inputs, 3, "axes").unwrap_or_default();
    let steps = ints_from(node, inputs, 4, "steps").unwrap_or_default();
    one(ops::slice(x, &starts, &ends, &axes, &steps))
}

fn expand(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let target = static_shape(node, &input(node, inputs, 1)?.to_i64_vec())?;
    one(ops::expand(x, &target))
}

/// The `[start, end)` window of dimensions selected by a Shape node.
pub fn shape_window(node: &Node, rank: usize) -> (usize, usize) {
    let r = rank as i64;
    let clamp = |v: i64| (if v < 0 { v + r } else { v }).clamp(0, r) as usize;
    let start = clamp(node.attr_int("start").unwrap_or(0));
    let end = clamp(node.attr_int("end").unwrap_or(r));
    (start, end.max(start))
}

fn shape(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let (start, end) = shape_window(node, x.shape().rank());
    let dims: Vec<i64> = x.shape().dims()[start..end].iter().map(|&d| d as i64).collect();
    one(Tensor::from_i64(Shape::vector(dims.len()), &dims))
}

fn cast(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let to = node
        .attr_dtype("to")
        .ok_or_else(|| bad(node, "missing or unknown 'to'"))?;
    Ok(vec![input(node, inputs, 0)?.cast(to)])
}

fn dropout(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let mut out = vec![x.clone()];
    if node.outputs.len() > 1 {
        let ones = vec![1.0; x.num_elements()];
        out.push(Tensor::from_f64(x.shape().clone(), DType::Bool, &ones)?);
    }
    Ok(out)
}

/// The tensor a Constant node produces.
pub fn constant_value(node: &Node) -> Result<Tensor, TensorError> {
    if let Some(t) = node.attr_tensor("value") {
        return Ok(t.clone());
    }
    if let Some(v) = node.attr_int("value_int") {
        return Tensor::from_i64(Shape::scalar(), &[v]);
    }
    if let Some(v) = node.attr_ints("value_ints") {
        return Tensor::from_i64(Shape::vector(v.len()), v);
    }
    if let Some(v) = node.attr_float("value_float") {
        return Ok(Tensor::scalar(DType::F32, v));
    }
    if let Some(v) = node.attr_floats("value_floats") {
        return Tensor::from_f64(Shape::vector(v.len()), DType::F32, v);
    }
    Err(bad(node, "no value attribute"))
}

fn constant(node: &Node, _inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, TensorError> {
    one(constant_value(node))
}

fn reduce(node: &Node, inputs: &[Option<&Tensor>], kind: ReduceKind) -> Result<Vec<Tensor>, TensorError> {
    let x = input(node, inputs, 0)?;
    let axes = ints_from(node, inputs, 1, "axes").unwrap_or_default();
    if axes.is_empty() && node.attr_int("noop_with_empty_axes").unwrap_or(0) != 0 {
        return Ok(vec![x.clone()]);
    }
    let keepdims = node.attr_int("keepdims").unwrap_or(1) != 0;
    one(ops::reduce(x, kind, &axes, keepdims))
}
