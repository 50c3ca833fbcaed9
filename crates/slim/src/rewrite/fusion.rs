// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Multi-node fusion patterns.
//!
//! Every pattern is rooted at its first node and requires the intermediate
//! tensor to have a single consumer, so the fused node can take over the
//! last node's outputs unchanged.
//!
//! ```text
//! conv_bn          Conv(x, W, b) → BatchNormalization     ⇒ Conv(x, W', b')
//! gemm_bn          Gemm(a, B, C) → BatchNormalization     ⇒ Gemm(a, B', C')
//! matmul_add       MatMul(x, W) → Add(·, bias)            ⇒ Gemm(x, W, bias)
//! reshape_chain    Reshape(x, s1) → Reshape(·, s2)        ⇒ Reshape(x, s2)
//! transpose_chain  Transpose(x, p1) → Transpose(·, p2)    ⇒ Transpose(x, p1∘p2)
//! ```

use super::{sole_consumer, Rewrite, RewriteRule};
use model_ir::{Attribute, Graph, Node, NodeId, OpKind};
use tensor_core::{Shape, Tensor};

/// The node consuming `root`'s first output, if it alone does and has the
/// expected operator.
fn next_node<'g>(graph: &'g Graph, root: &Node, op: OpKind) -> Option<(NodeId, &'g Node)> {
    let out = root.outputs.first().filter(|o| !o.is_empty())?;
    let (id, next) = sole_consumer(graph, out)?;
    (next.op == op && next.input(0) == Some(out.as_str())).then_some((id, next))
}

/// Per-channel `scale / sqrt(var + eps)` and `bias - mean * factor` of an
/// inference-mode batch norm with `channels` channels.
struct BnFold {
    factor: Vec<f64>,
    shift: Vec<f64>,
}

impl BnFold {
    fn of(graph: &Graph, bn: &Node, channels: usize) -> Option<Self> {
        let training = bn.attr_int("training_mode").unwrap_or(0) != 0;
        if training || bn.outputs.iter().skip(1).any(|o| !o.is_empty()) {
            return None;
        }
        let param = |i: usize| {
            let t = graph.constant(bn.input(i)?)?;
            let v = t.to_f64_vec();
            (t.dtype().is_float() && v.len() == channels).then_some(v)
        };
        let (scale, bias, mean, var) = (param(1)?, param(2)?, param(3)?, param(4)?);
        let eps = bn.attr_float("epsilon").unwrap_or(1e-5);
        let factor: Vec<f64> = scale.iter().zip(&var).map(|(s, v)| s / (v + eps).sqrt()).collect();
        let shift = (0..channels).map(|c| bias[c] - mean[c] * factor[c]).collect();
        Some(Self { factor, shift })
    }

    /// The folded bias for a producer bias `b`: `b * factor + shift`.
    fn bias(&self, b: &[f64]) -> Vec<f64> {
        b.iter()
            .zip(&self.factor)
            .zip(&self.shift)
            .map(|((b, f), s)| b * f + s)
            .collect()
    }
}

/// A float constant at `name`, or `None`.
fn float_constant<'g>(graph: &'g Graph, name: &str) -> Option<&'g Tensor> {
    graph.constant(name).filter(|t| t.dtype().is_float())
}

fn fused_node(template: &Node, op: OpKind, inputs: Vec<String>, outputs: &[String]) -> Node {
    let mut node = Node::new(template.name.clone(), op, inputs, outputs.to_vec());
    node.attributes = template.attributes.clone();
    node
}

// ── conv_bn ────────────────────────────────────────────────────────

/// Folds a `BatchNormalization` into the weights and bias of the `Conv`
/// feeding it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvBn;

impl RewriteRule for ConvBn {
    fn name(&self) -> &str {
        "conv_bn"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let conv = graph.node(id)?;
        if conv.op != OpKind::Conv {
            return None;
        }
        let (bn_id, bn) = next_node(graph, conv, OpKind::BatchNormalization)?;
        let (x, w_name) = (conv.input(0)?, conv.input(1)?);
        let w = float_constant(graph, w_name)?;
        let m = *w.shape().dims().first()?;
        let fold = BnFold::of(graph, bn, m)?;

        let b = match conv.input(2) {
            Some(name) => {
                let v = float_constant(graph, name)?.to_f64_vec();
                (v.len() == m).then_some(v)?
            }
            None => vec![0.0; m],
        };
        let per_channel = w.num_elements() / m.max(1);
        let weights: Vec<f64> = w
            .to_f64_vec()
            .iter()
            .enumerate()
            .map(|(i, v)| v * fold.factor[i / per_channel.max(1)])
            .collect();

        let new_w = graph.unique_name(&format!("{w_name}_bn"));
        let new_b = graph.unique_name(&format!("{}_bn_bias", conv.name));
        let conv_node = fused_node(
            conv,
            OpKind::Conv,
            vec![x.to_owned(), new_w.clone(), new_b.clone()],
            &bn.outputs[..1],
        );
        Some(Rewrite {
            remove: vec![id, bn_id],
            add: vec![conv_node],
            initializers: vec![
                (new_w, Tensor::from_f64(w.shape().clone(), w.dtype(), &weights).ok()?),
                (new_b, Tensor::from_f64(Shape::vector(m), w.dtype(), &fold.bias(&b)).ok()?),
            ],
            ..Rewrite::default()
        })
    }
}

// ── gemm_bn ────────────────────────────────────────────────────────

/// Folds a `BatchNormalization` over `[M, N]` into the `Gemm` producing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GemmBn;

impl RewriteRule for GemmBn {
    fn name(&self) -> &str {
        "gemm_bn"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let gemm = graph.node(id)?;
        if gemm.op != OpKind::Gemm {
            return None;
        }
        let (bn_id, bn) = next_node(graph, gemm, OpKind::BatchNormalization)?;
        let (a, b_name) = (gemm.input(0)?, gemm.input(1)?);
        let b = float_constant(graph, b_name)?;
        let &[rows, cols] = b.shape().dims() else {
            return None;
        };
        let trans_b = gemm.attr_int("transB").unwrap_or(0) != 0;
        let n = if trans_b { rows } else { cols };
        let fold = BnFold::of(graph, bn, n)?;

        let beta = gemm.attr_float("beta").unwrap_or(1.0);
        let c = match gemm.input(2) {
            Some(name) => {
                let t = float_constant(graph, name)?;
                let v = t.to_f64_vec();
                match t.shape().dims() {
                    [] | [1] | [1, 1] => vec![v[0]; n],
                    [len] | [1, len] if *len == n => v,
                    _ => return None,
                }
            }
            None => vec![0.0; n],
        };
        let scaled_c: Vec<f64> = c.iter().map(|v| v * beta).collect();

        let weights: Vec<f64> = b
            .to_f64_vec()
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let channel = if trans_b { i / cols } else { i % cols };
                v * fold.factor[channel]
            })
            .collect();

        let new_b = graph.unique_name(&format!("{b_name}_bn"));
        let new_c = graph.unique_name(&format!("{}_bn_bias", gemm.name));
        let mut node = fused_node(
            gemm,
            OpKind::Gemm,
            vec![a.to_owned(), new_b.clone(), new_c.clone()],
            &bn.outputs[..1],
        );
        node.attributes.insert("beta".into(), Attribute::Float(1.0));
        Some(Rewrite {
            remove: vec![id, bn_id],
            add: vec![node],
            initializers: vec![
                (new_b, Tensor::from_f64(b.shape().clone(), b.dtype(), &weights).ok()?),
                (new_c, Tensor::from_f64(Shape::vector(n), b.dtype(), &fold.bias(&scaled_c)).ok()?),
            ],
            ..Rewrite::default()
        })
    }
}

// ── matmul_add ─────────────────────────────────────────────────────

/// Turns a 2-D `MatMul` by a constant followed by a bias `Add` into `Gemm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMulAdd;

impl RewriteRule for MatMulAdd {
    fn name(&self) -> &str {
        "matmul_add"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let matmul = graph.node(id)?;
        if matmul.op != OpKind::MatMul {
            return None;
        }
        let (x, w_name) = (matmul.input(0)?, matmul.input(1)?);
        if graph.shape_of(x)?.rank() != 2 {
            return None;
        }
        let w = graph.constant(w_name)?;
        let &[_, n] = w.shape().dims() else {
            return None;
        };

        let product = matmul.outputs.first()?;
        let (add_id, add) = sole_consumer(graph, product)?;
        if add.op != OpKind::Add {
            return None;
        }
        let bias = match (add.input(0)?, add.input(1)?) {
            (p, other) | (other, p) if p == product.as_str() && other != product.as_str() => other,
            _ => return None,
        };
        let c = graph.constant(bias)?;
        let fits = match c.shape().dims() {
            [] | [1] => true,
            [len] | [1, len] => *len == n,
            _ => false,
        };
        if !fits || c.dtype() != w.dtype() {
            return None;
        }

        let node = Node::new(
            matmul.name.clone(),
            OpKind::Gemm,
            vec![x.to_owned(), w_name.to_owned(), bias.to_owned()],
            add.outputs[..1].to_vec(),
        );
        Some(Rewrite {
            remove: vec![id, add_id],
            add: vec![node],
            ..Rewrite::default()
        })
    }
}

// ── reshape_chain ──────────────────────────────────────────────────

/// Collapses two consecutive `Reshape`s into the second one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReshapeChain;

impl RewriteRule for ReshapeChain {
    fn name(&self) -> &str {
        "reshape_chain"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let first = graph.node(id)?;
        if first.op != OpKind::Reshape {
            return None;
        }
        let (second_id, second) = next_node(graph, first, OpKind::Reshape)?;
        let target = second.input(1)?;
        // A 0 copies a dimension of the intermediate, which the first
        // reshape defines.
        let allow_zero = second.attr_int("allowzero").unwrap_or(0) != 0;
        let copies_dim = graph.constant(target)?.to_i64_vec().contains(&0);
        if copies_dim && !allow_zero {
            return None;
        }
        let node = fused_node(
            second,
            OpKind::Reshape,
            vec![first.input(0)?.to_owned(), target.to_owned()],
            &second.outputs,
        );
        Some(Rewrite {
            remove: vec![id, second_id],
            add: vec![node],
            ..Rewrite::default()
        })
    }
}

// ── transpose_chain ────────────────────────────────────────────────

/// Composes two consecutive `Transpose`s into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransposeChain;

/// The permutation of a `Transpose` over `rank` dimensions (reversal when
/// absent).
fn permutation(node: &Node, rank: Option<usize>) -> Option<Vec<i64>> {
    match node.attr_ints("perm") {
        Some(perm) => Some(perm.to_vec()),
        None => Some((0..rank? as i64).rev().collect()),
    }
}

impl RewriteRule for TransposeChain {
    fn name(&self) -> &str {
        "transpose_chain"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let first = graph.node(id)?;
        if first.op != OpKind::Transpose {
            return None;
        }
        let (second_id, second) = next_node(graph, first, OpKind::Transpose)?;
        let x = first.input(0)?;
        let rank = graph.shape_of(x).map(|s| s.rank());
        let p1 = permutation(first, rank)?;
        let p2 = permutation(second, Some(p1.len()))?;
        if p2.len() != p1.len() {
            return None;
        }
        let composed = p2
            .iter()
            .map(|&i| usize::try_from(i).ok().and_then(|i| p1.get(i).copied()))
            .collect::<Option<Vec<_>>>()?;

        let node = Node::new(
            first.name.clone(),
            OpKind::Transpose,
            vec![x.to_owned()],
            second.outputs.clone(),
        )
        .with_attr("perm", Attribute::Ints(composed));
        Some(Rewrite {
            remove: vec![id, second_id],
            add: vec![node],
            ..Rewrite::default()
        })
    }
}
