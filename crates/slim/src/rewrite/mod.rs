// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`RewriteRule`] trait, the rule catalog and the worklist engine.
//!
//! Rules, in priority order:
//!
//! | Rule | Effect |
//! |---|---|
//! | [`ConstantFold`] | node with constant inputs becomes an initializer |
//! | [`IdentityElimination`] | no-op node is bypassed |
//! | [`ConvBn`], [`GemmBn`] | batch norm folded into the preceding weights |
//! | [`MatMulAdd`] | `MatMul` + bias becomes `Gemm` |
//! | [`ReshapeChain`], [`TransposeChain`] | two layout ops become one |
//!
//! Dead code is swept by [`dce::eliminate_dead_nodes`] between passes.

pub mod constant_fold;
pub mod dce;
mod engine;
pub mod fusion;
pub mod identity;

pub use constant_fold::ConstantFold;
pub use engine::{RewriteEngine, RewriteStats};
pub use fusion::{ConvBn, GemmBn, MatMulAdd, ReshapeChain, TransposeChain};
pub use identity::IdentityElimination;

use model_ir::{Graph, Node, NodeId};
use tensor_core::Tensor;

/// Names of the fusion patterns that can be skipped.
pub const FUSION_PATTERNS: &[&str] = &["conv_bn", "gemm_bn", "matmul_add", "reshape_chain", "transpose_chain"];

/// A local edit produced by a rule and applied by the engine.
///
/// Applied in this order: `rebind`, then `remove` / `add` / `initializers`
/// as one [`Graph::replace_nodes`] call, then `rename`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rewrite {
    pub remove: Vec<NodeId>,
    pub add: Vec<Node>,
    pub initializers: Vec<(String, Tensor)>,
    /// `(old, new)`: every use of `old` is redirected to `new`.
    pub rebind: Vec<(String, String)>,
    /// `(old, new)`: `old` is renamed to `new` everywhere.
    pub rename: Vec<(String, String)>,
}

/// A rewrite rule.
///
/// Rules only look at the graph; the engine owns every mutation. A rule
/// that cannot compute its replacement (for example because a constant has
/// an unexpected shape) simply does not match.
pub trait RewriteRule: Send + Sync {
    /// Name used in statistics and `skip_fusion_patterns`.
    fn name(&self) -> &str;

    /// The rewrite for the pattern rooted at `id`, if it matches.
    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite>;

    /// Whether the engine may evaluate this rule for a whole batch in
    /// parallel before applying any rewrite of the pass.
    fn batch_parallel(&self) -> bool {
        false
    }
}

/// The node consuming `tensor` when it is its only user and not a graph
/// output.
pub(crate) fn sole_consumer<'g>(graph: &'g Graph, tensor: &str) -> Option<(NodeId, &'g Node)> {
    if graph.is_output(tensor) {
        return None;
    }
    match graph.consumers(tensor) {
        &[id] => graph.node(id).map(|n| (id, n)),
        _ => None,
    }
}
