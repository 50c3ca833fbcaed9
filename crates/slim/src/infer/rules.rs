// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-operator inference rules.
//!
//! A rule returns one entry per node output, in order. `None` (or a
//! missing trailing entry) means "nothing new is known"; the driver then
//! keeps the previous value info. An `Err` is a contradiction between the
//! node's inputs and attributes and aborts inference.

use super::{infer_graph, Scope};
use model_ir::{Graph, Node, OpKind, ValueInfo};
use runtime::kernels;
use tensor_core::{ops, DType, Dim, DynShape, Tensor};

type Outputs = Result<Vec<Option<ValueInfo>>, String>;

/// Computes the output value infos of one node.
pub type InferFn = fn(&Node, &Scope<'_>) -> Result<Vec<Option<ValueInfo>>, String>;

/// The inference rule for `op`.
pub fn rule_for(op: OpKind) -> InferFn {
    use OpKind::*;
    match op {
        Add | Sub | Mul | Div | Pow => broadcast_binary,
        Equal | Less | Greater => compare,
        Where => where_select,
        Neg | Abs | Sqrt | Exp | Log | Reciprocal | Relu | LeakyRelu | Sigmoid | Tanh | Gelu | Erf | Clip
        | Softmax | Identity | BatchNormalization | LayerNormalization => same_as_input,
        Dropout => dropout,
        MatMul => matmul,
        Gemm => gemm,
        Conv => conv,
        MaxPool | AveragePool => pool,
        GlobalAveragePool => global_pool,
        Reshape => reshape,
        Flatten => flatten,
        Transpose => transpose,
        Concat => concat,
        Squeeze => squeeze,
        Unsqueeze => unsqueeze,
        Gather => gather,
        Slice => slice,
        Expand => expand,
        Shape => shape,
        Cast => cast,
        Constant => constant,
        ReduceMean | ReduceSum => reduce,
        If => if_branches,
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn one(dtype: Option<DType>, shape: Option<DynShape>) -> Outputs {
    Ok(vec![Some(ValueInfo { dtype, shape })])
}

fn arg(node: &Node, index: usize) -> &str {
    node.input(index).unwrap_or("")
}

fn axis(a: i64, rank: usize) -> Result<usize, String> {
    ops::normalize_axis("infer", a, rank).map_err(|e| e.to_string())
}

/// An integer list that may come from a constant input or an attribute.
enum Ints {
    Absent,
    Known(Vec<i64>),
    /// Supplied by a non-constant tensor.
    Dynamic,
}

fn ints(node: &Node, scope: &Scope<'_>, index: usize, key: &str) -> Ints {
    match node.input(index) {
        Some(name) => match scope.constant(name) {
            Some(t) => Ints::Known(t.to_i64_vec()),
            None => Ints::Dynamic,
        },
        None => match node.attr_ints(key) {
            Some(v) => Ints::Known(v.to_vec()),
            None => Ints::Absent,
        },
    }
}

/// Length of a rank-1 tensor whose shape is known statically.
fn static_len(scope: &Scope<'_>, name: &str) -> Option<usize> {
    match scope.shape(name)?.dims() {
        [d] => d.fixed(),
        _ => None,
    }
}

fn broadcast_all(node: &Node, scope: &Scope<'_>, indices: &[usize]) -> Result<Option<DynShape>, String> {
    let mut acc: Option<DynShape> = None;
    for &i in indices {
        let Some(s) = scope.shape(arg(node, i)) else {
            return Ok(None);
        };
        acc = Some(match acc {
            None => s,
            Some(a) => a
                .broadcast(&s)
                .map_err(|d| format!("cannot broadcast {a} with {s} (dimension {d})"))?,
        });
    }
    Ok(acc)
}

/// Merges two views of a dimension that must be equal.
fn unify(a: &Dim, b: &Dim) -> Result<Dim, String> {
    match (a, b) {
        (Dim::Fixed(x), Dim::Fixed(y)) if x != y => Err(format!("dimension {x} does not match {y}")),
        (Dim::Fixed(x), _) | (_, Dim::Fixed(x)) => Ok(Dim::Fixed(*x)),
        (Dim::Symbolic(x), Dim::Symbolic(y)) if x == y => Ok(a.clone()),
        (Dim::Symbolic(_), Dim::Unknown) => Ok(a.clone()),
        (Dim::Unknown, Dim::Symbolic(_)) => Ok(b.clone()),
        _ => Ok(Dim::Unknown),
    }
}

/// Product of dimensions; a lone non-unit dimension is kept as is.
fn product(dims: &[Dim]) -> Dim {
    let rest: Vec<&Dim> = dims.iter().filter(|d| **d != Dim::Fixed(1)).collect();
    match rest.as_slice() {
        [] => Dim::Fixed(1),
        [d] => (*d).clone(),
        _ => rest
            .iter()
            .map(|d| d.fixed())
            .product::<Option<usize>>()
            .map_or(Dim::Unknown, Dim::Fixed),
    }
}

// ── Elementwise ────────────────────────────────────────────────────

fn broadcast_binary(node: &Node, scope: &Scope<'_>) -> Outputs {
    let dtype = scope.dtype(arg(node, 0)).or_else(|| scope.dtype(arg(node, 1)));
    one(dtype, broadcast_all(node, scope, &[0, 1])?)
}

fn compare(node: &Node, scope: &Scope<'_>) -> Outputs {
    one(Some(DType::Bool), broadcast_all(node, scope, &[0, 1])?)
}

fn where_select(node: &Node, scope: &Scope<'_>) -> Outputs {
    let dtype = scope.dtype(arg(node, 1)).or_else(|| scope.dtype(arg(node, 2)));
    one(dtype, broadcast_all(node, scope, &[0, 1, 2])?)
}

fn same_as_input(node: &Node, scope: &Scope<'_>) -> Outputs {
    Ok(vec![scope.info(arg(node, 0))])
}

fn dropout(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = scope.info(arg(node, 0));
    let mask = ValueInfo {
        dtype: Some(DType::Bool),
        shape: x.as_ref().and_then(|i| i.shape.clone()),
    };
    Ok(vec![x, Some(mask)])
}

// ── Linear algebra ─────────────────────────────────────────────────

fn matmul(node: &Node, scope: &Scope<'_>) -> Outputs {
    let (a, b) = (arg(node, 0), arg(node, 1));
    let dtype = scope.dtype(a).or_else(|| scope.dtype(b));
    let (Some(sa), Some(sb)) = (scope.shape(a), scope.shape(b)) else {
        return one(dtype, None);
    };
    if sa.rank() == 0 || sb.rank() == 0 {
        return Err(format!("MatMul operands must not be scalars ({sa} @ {sb})"));
    }
    let mut da = sa.dims().to_vec();
    let mut db = sb.dims().to_vec();
    let a_vector = da.len() == 1;
    let b_vector = db.len() == 1;
    if a_vector {
        da.insert(0, Dim::Fixed(1));
    }
    if b_vector {
        db.push(Dim::Fixed(1));
    }
    let (ra, rb) = (da.len(), db.len());
    unify(&da[ra - 1], &db[rb - 2]).map_err(|_| format!("inner dimensions differ: {sa} @ {sb}"))?;
    let batch = DynShape::new(da[..ra - 2].to_vec())
        .broadcast(&DynShape::new(db[..rb - 2].to_vec()))
        .map_err(|d| format!("batch dimensions of {sa} and {sb} do not broadcast (dimension {d})"))?;
    let mut out = batch.dims().to_vec();
    if !a_vector {
        out.push(da[ra - 2].clone());
    }
    if !b_vector {
        out.push(db[rb - 1].clone());
    }
    one(dtype, Some(DynShape::new(out)))
}

fn gemm(node: &Node, scope: &Scope<'_>) -> Outputs {
    let (a, b) = (arg(node, 0), arg(node, 1));
    let dtype = scope.dtype(a).or_else(|| scope.dtype(b));
    let (Some(sa), Some(sb)) = (scope.shape(a), scope.shape(b)) else {
        return one(dtype, None);
    };
    let ([ar, ac], [br, bc]) = (sa.dims(), sb.dims()) else {
        return Err(format!("Gemm expects 2-D operands, got {sa} and {sb}"));
    };
    let params = kernels::gemm_params(node);
    let (m, k) = if params.trans_a { (ac, ar) } else { (ar, ac) };
    let (k2, n) = if params.trans_b { (bc, br) } else { (br, bc) };
    unify(k, k2).map_err(|_| format!("inner dimensions differ: {sa} x {sb}"))?;
    let out = DynShape::new(vec![m.clone(), n.clone()]);
    if let Some(c) = node.input(2).and_then(|c| scope.shape(c)) {
        out.broadcast(&c)
            .map_err(|_| format!("bias {c} does not broadcast to {out}"))?;
    }
    one(dtype, Some(out))
}

// ── Convolution and pooling ────────────────────────────────────────

/// Sliding-window attributes shared by Conv and the pools.
struct Window {
    strides: Vec<usize>,
    dilations: Vec<usize>,
    pads: Vec<usize>,
    auto_pad: String,
    ceil_mode: bool,
}

impl Window {
    fn from_node(node: &Node, spatial: usize) -> Result<Self, String> {
        let list = |key: &str, default: usize, len: usize| -> Result<Vec<usize>, String> {
            match node.attr_ints(key) {
                Some(v) => v
                    .iter()
                    .map(|&x| usize::try_from(x).map_err(|_| format!("negative value in '{key}'")))
                    .collect(),
                None => Ok(vec![default; len]),
            }
        };
        let auto_pad = node.attr_string("auto_pad").unwrap_or("NOTSET").to_owned();
        if !matches!(auto_pad.as_str(), "NOTSET" | "" | "VALID" | "SAME_UPPER" | "SAME_LOWER") {
            return Err(format!("unknown auto_pad '{auto_pad}'"));
        }
        Ok(Self {
            strides: list("strides", 1, spatial)?,
            dilations: list("dilations", 1, spatial)?,
            pads: list("pads", 0, spatial * 2)?,
            auto_pad,
            ceil_mode: node.attr_int("ceil_mode").unwrap_or(0) != 0,
        })
    }

    /// Output length along spatial axis `i`:
    /// `floor((in + pad_begin + pad_end - dilation * (k - 1) - 1) / stride) + 1`.
    fn output(&self, i: usize, input: &Dim, kernel: Option<usize>) -> Result<Dim, String> {
        let Some(n) = input.fixed() else {
            return Ok(Dim::Unknown);
        };
        let s = self.strides.get(i).copied().unwrap_or(1).max(1);
        if self.auto_pad.starts_with("SAME") {
            return Ok(Dim::Fixed(n.div_ceil(s)));
        }
        let Some(k) = kernel else {
            return Ok(Dim::Unknown);
        };
        let d = self.dilations.get(i).copied().unwrap_or(1).max(1);
        let spatial = self.pads.len() / 2;
        let (pb, pe) = if self.auto_pad == "VALID" {
            (0, 0)
        } else {
            (
                self.pads.get(i).copied().unwrap_or(0),
                self.pads.get(i + spatial).copied().unwrap_or(0),
            )
        };
        let effective = d * k.saturating_sub(1) + 1;
        let padded = n + pb + pe;
        if k == 0 || padded < effective {
            return Err(format!(
                "kernel {k} (dilation {d}) does not fit padded length {padded} on spatial axis {i}"
            ));
        }
        let span = padded - effective;
        let mut out = if self.ceil_mode {
            span.div_ceil(s) + 1
        } else {
            span / s + 1
        };
        if self.ceil_mode && (out - 1) * s >= n + pb {
            out -= 1;
        }
        Ok(Dim::Fixed(out))
    }
}

fn conv(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    if sx.rank() < 3 {
        return Err(format!("Conv input must have rank >= 3, got {sx}"));
    }
    let spatial = sx.rank() - 2;
    let sw = scope.shape(arg(node, 1));
    if let Some(sw) = &sw {
        if sw.rank() != sx.rank() {
            return Err(format!("weight {sw} does not match input {sx}"));
        }
    }
    let group = node.attr_int("group").unwrap_or(1).max(1) as usize;
    let per_group = sw.as_ref().and_then(|w| w.dims()[1].fixed());
    if let (Some(c), Some(cg)) = (sx.dims()[1].fixed(), per_group) {
        if cg * group != c {
            return Err(format!(
                "input has {c} channels but the weight expects {} ({cg} x group {group})",
                cg * group
            ));
        }
    }
    let kernel: Vec<Option<usize>> = match node.attr_ints("kernel_shape") {
        Some(k) => k.iter().map(|&v| usize::try_from(v).ok()).collect(),
        None => match &sw {
            Some(w) => w.dims()[2..].iter().map(Dim::fixed).collect(),
            None => vec![None; spatial],
        },
    };
    let window = Window::from_node(node, spatial)?;
    let mut out = vec![
        sx.dims()[0].clone(),
        sw.as_ref().map_or(Dim::Unknown, |w| w.dims()[0].clone()),
    ];
    for i in 0..spatial {
        out.push(window.output(i, &sx.dims()[i + 2], kernel.get(i).copied().flatten())?);
    }
    one(dtype, Some(DynShape::new(out)))
}

fn pool(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let kernel = node
        .attr_ints("kernel_shape")
        .ok_or_else(|| "missing 'kernel_shape'".to_string())?;
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    if sx.rank() != kernel.len() + 2 {
        return Err(format!("kernel_shape {kernel:?} does not match input {sx}"));
    }
    let window = Window::from_node(node, kernel.len())?;
    let mut out = sx.dims()[..2].to_vec();
    for (i, &k) in kernel.iter().enumerate() {
        out.push(window.output(i, &sx.dims()[i + 2], usize::try_from(k).ok())?);
    }
    let out = DynShape::new(out);
    let indices = ValueInfo::new(DType::I64, Some(out.clone()));
    Ok(vec![Some(ValueInfo { dtype, shape: Some(out) }), Some(indices)])
}

fn global_pool(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let shape = match scope.shape(x) {
        Some(s) if s.rank() < 3 => return Err(format!("GlobalAveragePool input must have rank >= 3, got {s}")),
        Some(s) => {
            let mut dims = s.dims()[..2].to_vec();
            dims.resize(s.rank(), Dim::Fixed(1));
            Some(DynShape::new(dims))
        }
        None => None,
    };
    one(scope.dtype(x), shape)
}

// ── Layout ─────────────────────────────────────────────────────────

fn reshape(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let sx = scope.shape(x);
    let allow_zero = node.attr_int("allowzero").unwrap_or(0) != 0;
    let Some(target) = node.input(1).and_then(|t| scope.constant(t)).map(Tensor::to_i64_vec) else {
        return one(dtype, static_len(scope, arg(node, 1)).map(DynShape::unknown));
    };
    if let Some(st) = sx.as_ref().and_then(DynShape::to_static) {
        let out = ops::reshape_target(&st, &target, allow_zero).map_err(|e| e.to_string())?;
        return one(dtype, Some(DynShape::from(&out)));
    }
    let mut dims = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &t) in target.iter().enumerate() {
        match t {
            0 if !allow_zero => dims.push(
                sx.as_ref()
                    .and_then(|s| s.dims().get(i).cloned())
                    .unwrap_or(Dim::Unknown),
            ),
            -1 => {
                if infer_at.replace(i).is_some() {
                    return Err(format!("more than one -1 in target {target:?}"));
                }
                dims.push(Dim::Unknown);
            }
            t if t < 0 => return Err(format!("invalid target dimension {t}")),
            t => dims.push(Dim::Fixed(t as usize)),
        }
    }
    if let (Some(i), Some(sx)) = (infer_at, &sx) {
        dims[i] = remaining(sx.dims(), &dims, i);
    }
    one(dtype, Some(DynShape::new(dims)))
}

/// The dimension a `-1` at position `skip` of `target` stands for, when the
/// symbolic parts of `input` and `target` cancel out.
fn remaining(input: &[Dim], target: &[Dim], skip: usize) -> Dim {
    let mut pool: Vec<&Dim> = input.iter().collect();
    let mut known = 1usize;
    for (j, d) in target.iter().enumerate() {
        if j == skip {
            continue;
        }
        match d {
            Dim::Fixed(n) => known *= n,
            Dim::Symbolic(_) => match pool.iter().position(|p| *p == d) {
                Some(p) => {
                    pool.swap_remove(p);
                }
                None => return Dim::Unknown,
            },
            Dim::Unknown => return Dim::Unknown,
        }
    }
    let total: Option<usize> = pool.iter().map(|d| d.fixed()).product();
    match total {
        Some(total) if known > 0 && total % known == 0 => Dim::Fixed(total / known),
        _ => Dim::Unknown,
    }
}

fn flatten(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let shape = match scope.shape(x) {
        Some(s) => {
            let axis = kernels::flatten_axis(node, s.rank()).map_err(|e| e.to_string())?;
            let (outer, inner) = s.dims().split_at(axis);
            Some(DynShape::new(vec![product(outer), product(inner)]))
        }
        None => None,
    };
    one(scope.dtype(x), shape)
}

fn transpose(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    let rank = sx.rank();
    let perm: Vec<usize> = match node.attr_ints("perm") {
        Some(p) => p.iter().map(|&a| axis(a, rank)).collect::<Result<_, _>>()?,
        None => (0..rank).rev().collect(),
    };
    let mut seen = vec![false; rank];
    if perm.len() != rank || perm.iter().any(|&p| std::mem::replace(&mut seen[p], true)) {
        return Err(format!("perm {perm:?} is not a permutation of rank {rank}"));
    }
    one(dtype, Some(DynShape::new(perm.iter().map(|&p| sx.dims()[p].clone()).collect())))
}

fn concat(node: &Node, scope: &Scope<'_>) -> Outputs {
    let a = node.attr_int("axis").ok_or_else(|| "missing 'axis'".to_string())?;
    let dtype = node.present_inputs().find_map(|i| scope.dtype(i));
    let shapes: Vec<Option<DynShape>> = node.present_inputs().map(|i| scope.shape(i)).collect();
    let Some(first) = shapes.iter().flatten().next() else {
        return one(dtype, None);
    };
    let rank = first.rank();
    let ax = axis(a, rank)?;
    let mut dims = first.dims().to_vec();
    let mut total = Some(0usize);
    for s in &shapes {
        let Some(s) = s else {
            total = None;
            continue;
        };
        if s.rank() != rank {
            return Err(format!("cannot concatenate {first} with {s}"));
        }
        for (j, d) in s.dims().iter().enumerate() {
            if j == ax {
                total = total.zip(d.fixed()).map(|(t, n)| t + n);
            } else {
                dims[j] = unify(&dims[j], d).map_err(|e| format!("cannot concatenate {first} with {s}: {e}"))?;
            }
        }
    }
    dims[ax] = total.map_or(Dim::Unknown, Dim::Fixed);
    one(dtype, Some(DynShape::new(dims)))
}

fn squeeze(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    let rank = sx.rank();
    let axes = match ints(node, scope, 1, "axes") {
        Ints::Known(axes) if !axes.is_empty() => axes,
        Ints::Dynamic => return one(dtype, None),
        _ => {
            if !sx.is_static() {
                return one(dtype, None);
            }
            let kept = sx.dims().iter().filter(|d| **d != Dim::Fixed(1)).cloned().collect();
            return one(dtype, Some(DynShape::new(kept)));
        }
    };
    let mut drop = vec![false; rank];
    for a in axes {
        let a = axis(a, rank)?;
        if let Some(n) = sx.dims()[a].fixed().filter(|&n| n != 1) {
            return Err(format!("cannot squeeze axis {a} of size {n}"));
        }
        drop[a] = true;
    }
    let kept = sx
        .dims()
        .iter()
        .zip(&drop)
        .filter(|&(_, &d)| !d)
        .map(|(d, _)| d.clone())
        .collect();
    one(dtype, Some(DynShape::new(kept)))
}

fn unsqueeze(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    match ints(node, scope, 1, "axes") {
        Ints::Known(axes) => {
            let layout = kernels::unsqueeze_layout(node, &axes, sx.rank()).map_err(|e| e.to_string())?;
            let mut src = sx.dims().iter();
            let dims = layout
                .iter()
                .map(|&inserted| {
                    if inserted {
                        Dim::Fixed(1)
                    } else {
                        src.next().cloned().unwrap_or(Dim::Unknown)
                    }
                })
                .collect();
            one(dtype, Some(DynShape::new(dims)))
        }
        Ints::Dynamic => one(
            dtype,
            static_len(scope, arg(node, 1)).map(|k| DynShape::unknown(sx.rank() + k)),
        ),
        Ints::Absent => Err("missing axes".into()),
    }
}

fn gather(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let (Some(sx), Some(si)) = (scope.shape(x), scope.shape(arg(node, 1))) else {
        return one(dtype, None);
    };
    if sx.rank() == 0 {
        return Err("cannot gather from a scalar".into());
    }
    let ax = axis(node.attr_int("axis").unwrap_or(0), sx.rank())?;
    let mut dims = sx.dims()[..ax].to_vec();
    dims.extend_from_slice(si.dims());
    dims.extend_from_slice(&sx.dims()[ax + 1..]);
    one(dtype, Some(DynShape::new(dims)))
}

fn slice(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    let rank = sx.rank();
    let known = |index: usize, key: &str| match ints(node, scope, index, key) {
        Ints::Known(v) => Some(Some(v)),
        Ints::Absent => Some(None),
        Ints::Dynamic => None,
    };
    let (Some(Some(starts)), Some(Some(ends)), Some(axes), Some(steps)) =
        (known(1, "starts"), known(2, "ends"), known(3, "axes"), known(4, "steps"))
    else {
        return one(dtype, Some(DynShape::unknown(rank)));
    };
    let axes = axes.unwrap_or_default();
    let steps = steps.unwrap_or_default();
    if starts.len() != ends.len()
        || (!axes.is_empty() && axes.len() != starts.len())
        || (!steps.is_empty() && steps.len() != starts.len())
    {
        return Err("starts, ends, axes and steps must have equal lengths".into());
    }
    let mut dims = sx.dims().to_vec();
    for k in 0..starts.len() {
        let ax = match axes.get(k) {
            Some(&a) => axis(a, rank)?,
            None if k < rank => k,
            None => return Err(format!("more slice bounds than the rank {rank}")),
        };
        let step = steps.get(k).copied().unwrap_or(1);
        dims[ax] = match dims[ax].fixed() {
            Some(n) => Dim::Fixed(
                ops::slice_axis(n, starts[k], ends[k], step)
                    .map_err(|e| e.to_string())?
                    .len,
            ),
            None if starts[k] == 0 && step == 1 && ends[k] >= i32::MAX as i64 => dims[ax].clone(),
            None => Dim::Unknown,
        };
    }
    one(dtype, Some(DynShape::new(dims)))
}

fn expand(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let sx = scope.shape(x);
    let Some(target) = node.input(1).and_then(|t| scope.constant(t)) else {
        let shape = sx
            .zip(static_len(scope, arg(node, 1)))
            .map(|(s, r)| DynShape::unknown(r.max(s.rank())));
        return one(dtype, shape);
    };
    let dims = target
        .to_i64_vec()
        .into_iter()
        .map(|d| usize::try_from(d).map_err(|_| format!("invalid target dimension {d}")))
        .collect::<Result<Vec<_>, _>>()?;
    let target = DynShape::fixed(&dims);
    let shape = match sx {
        Some(s) => Some(
            s.broadcast(&target)
                .map_err(|d| format!("cannot expand {s} to {target} (dimension {d})"))?,
        ),
        None => None,
    };
    one(dtype, shape)
}

fn shape(node: &Node, scope: &Scope<'_>) -> Outputs {
    let len = match scope.shape(arg(node, 0)) {
        Some(s) => {
            let (start, end) = kernels::shape_window(node, s.rank());
            Dim::Fixed(end - start)
        }
        None => Dim::Unknown,
    };
    one(Some(DType::I64), Some(DynShape::new(vec![len])))
}

fn cast(node: &Node, scope: &Scope<'_>) -> Outputs {
    let to = node
        .attr_dtype("to")
        .ok_or_else(|| "missing or unknown 'to'".to_string())?;
    one(Some(to), scope.shape(arg(node, 0)))
}

fn constant(node: &Node, _scope: &Scope<'_>) -> Outputs {
    let value = kernels::constant_value(node).map_err(|e| e.to_string())?;
    Ok(vec![Some(ValueInfo::of_tensor(&value))])
}

fn reduce(node: &Node, scope: &Scope<'_>) -> Outputs {
    let x = arg(node, 0);
    let dtype = scope.dtype(x);
    let keepdims = node.attr_int("keepdims").unwrap_or(1) != 0;
    let Some(sx) = scope.shape(x) else {
        return one(dtype, None);
    };
    let rank = sx.rank();
    let axes = match ints(node, scope, 1, "axes") {
        Ints::Known(axes) if !axes.is_empty() => axes,
        Ints::Dynamic if keepdims => return one(dtype, Some(DynShape::unknown(rank))),
        Ints::Dynamic => return one(dtype, None),
        _ if node.attr_int("noop_with_empty_axes").unwrap_or(0) != 0 => return one(dtype, Some(sx)),
        _ => (0..rank as i64).collect(),
    };
    let mut reduced = vec![false; rank];
    for a in axes {
        reduced[axis(a, rank)?] = true;
    }
    let dims = sx
        .dims()
        .iter()
        .zip(&reduced)
        .filter_map(|(d, &r)| match (r, keepdims) {
            (true, true) => Some(Dim::Fixed(1)),
            (true, false) => None,
            (false, _) => Some(d.clone()),
        })
        .collect();
    one(dtype, Some(DynShape::new(dims)))
}

// ── Control flow ───────────────────────────────────────────────────

fn if_branches(node: &Node, scope: &Scope<'_>) -> Outputs {
    let branch = |key: &str| {
        node.attr_graph(key)
            .ok_or_else(|| format!("missing '{key}'"))
            .and_then(|g| branch_outputs(g, scope))
    };
    let (then_out, else_out) = (branch("then_branch")?, branch("else_branch")?);
    if then_out.len() != else_out.len() || then_out.len() != node.outputs.len() {
        return Err(format!(
            "branches produce {} and {} outputs for {} declared",
            then_out.len(),
            else_out.len(),
            node.outputs.len()
        ));
    }
    Ok(then_out.into_iter().zip(else_out).map(|(a, b)| merge_branches(a, b)).collect())
}

fn branch_outputs(graph: &Graph, parent: &Scope<'_>) -> Result<Vec<Option<ValueInfo>>, String> {
    let inferred = infer_graph(graph, Some(parent)).map_err(|e| e.to_string())?;
    let mut scope = Scope::new(graph, Some(parent));
    scope.values = inferred.values;
    Ok(graph.outputs().iter().map(|o| scope.info(o)).collect())
}

/// What both branches agree on.
fn merge_branches(a: Option<ValueInfo>, b: Option<ValueInfo>) -> Option<ValueInfo> {
    let (a, b) = (a?, b?);
    let dtype = a.dtype.filter(|d| b.dtype == Some(*d));
    let shape = match (a.shape, b.shape) {
        (Some(x), Some(y)) if x.rank() == y.rank() => Some(DynShape::new(
            x.dims()
                .iter()
                .zip(y.dims())
                .map(|(p, q)| if p == q { p.clone() } else { Dim::Unknown })
                .collect(),
        )),
        _ => None,
    };
    (dtype.is_some() || shape.is_some()).then_some(ValueInfo { dtype, shape })
}
