// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Worklist-driven application of the rule catalog.
//!
//! ```text
//! worklist = all nodes (topological order)
//! sweep dead code
//! while worklist not empty and passes < max_passes:
//!     batch = drain worklist (topological order)
//!     evaluate batch-parallel rules for the whole batch (rayon)
//!     for node in batch:
//!         first matching rule fires → apply, enqueue neighbours
//!     sweep dead code
//! ```

use super::{
    dce, ConstantFold, ConvBn, GemmBn, IdentityElimination, MatMulAdd, ReshapeChain, Rewrite, RewriteRule,
    TransposeChain,
};
use crate::{SlimConfig, SlimError};
use model_ir::{Graph, NodeId, Producer};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Outcome of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub passes: usize,
    /// Rewrites applied, per rule name.
    pub applied: BTreeMap<String, usize>,
    /// Nodes removed by dead-code sweeps.
    pub dead_nodes: usize,
    /// Nodes still queued when the pass limit was hit; zero on convergence.
    pub pending: usize,
}

impl RewriteStats {
    pub fn converged(&self) -> bool {
        self.pending == 0
    }

    pub fn total_applied(&self) -> usize {
        self.applied.values().sum()
    }
}

/// Applies an ordered rule catalog to a fixed point.
pub struct RewriteEngine {
    rules: Vec<Box<dyn RewriteRule>>,
    max_passes: usize,
}

impl RewriteEngine {
    /// An engine without rules.
    pub fn new(max_passes: usize) -> Self {
        Self {
            rules: Vec::new(),
            max_passes: max_passes.max(1),
        }
    }

    /// Appends a rule at the lowest priority.
    pub fn with_rule(mut self, rule: Box<dyn RewriteRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// The standard catalog, minus whatever `config` disables.
    pub fn from_config(config: &SlimConfig) -> Self {
        let mut engine = Self::new(config.max_passes);
        if !config.no_constant_folding {
            engine = engine.with_rule(Box::new(ConstantFold::new(config.fold_size_limit)));
        }
        engine = engine.with_rule(Box::new(IdentityElimination));
        let fusions: [Box<dyn RewriteRule>; 5] = [
            Box::new(ConvBn),
            Box::new(GemmBn),
            Box::new(MatMulAdd),
            Box::new(ReshapeChain),
            Box::new(TransposeChain),
        ];
        for rule in fusions {
            if !config.skip_fusion_patterns.iter().any(|p| p == rule.name()) {
                engine = engine.with_rule(rule);
            }
        }
        engine
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Rewrites `graph` until no rule matches or the pass limit is reached.
    ///
    /// Hitting the limit is not an error: the graph holds every rewrite
    /// applied so far and [`RewriteStats::pending`] is non-zero.
    ///
    /// # Errors
    /// Structural errors from applying a rewrite. The graph may then be
    /// partially rewritten; callers run the engine on a scratch copy.
    pub fn run(&self, graph: &mut Graph) -> Result<RewriteStats, SlimError> {
        let start = Instant::now();
        let mut stats = RewriteStats {
            dead_nodes: dce::eliminate_dead_nodes(graph)?,
            ..RewriteStats::default()
        };
        let mut worklist: HashSet<NodeId> = graph.topological_order()?.into_iter().collect();

        while !worklist.is_empty() && stats.passes < self.max_passes {
            stats.passes += 1;
            let batch: Vec<NodeId> = graph
                .topological_order()?
                .into_iter()
                .filter(|id| worklist.contains(id))
                .collect();
            worklist.clear();

            let mut precomputed: Vec<Option<Vec<Option<Rewrite>>>> = {
                let snapshot: &Graph = graph;
                self.rules
                    .iter()
                    .map(|rule| {
                        rule.batch_parallel()
                            .then(|| batch.par_iter().map(|&id| rule.rewrite(snapshot, id)).collect())
                    })
                    .collect()
            };

            let mut touched: HashSet<NodeId> = HashSet::new();
            for (slot, &id) in batch.iter().enumerate() {
                if graph.node(id).is_none() {
                    continue;
                }
                for (r, rule) in self.rules.iter().enumerate() {
                    let ready = precomputed[r].as_mut().map(|results| results[slot].take());
                    let rewrite = match ready {
                        Some(result) if !touched.contains(&id) => result,
                        _ => rule.rewrite(graph, id),
                    };
                    let Some(rewrite) = rewrite else { continue };
                    let node_name = graph.node(id).map(|n| n.name.clone()).unwrap_or_default();
                    let (affected, enqueue) = apply(graph, rewrite)?;
                    tracing::debug!(rule = rule.name(), node = %node_name, "rewrite applied");
                    *stats.applied.entry(rule.name().to_owned()).or_default() += 1;
                    touched.extend(affected);
                    worklist.extend(enqueue);
                    break;
                }
            }

            stats.dead_nodes += dce::eliminate_dead_nodes(graph)?;
            worklist.retain(|&id| graph.node(id).is_some());
        }

        stats.pending = worklist.len();
        if stats.converged() {
            tracing::info!(
                passes = stats.passes,
                rewrites = stats.total_applied(),
                dead_nodes = stats.dead_nodes,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "rewrites converged"
            );
        } else {
            tracing::warn!(
                passes = stats.passes,
                pending = stats.pending,
                "rewrites stopped at the pass limit"
            );
        }
        Ok(stats)
    }
}

/// Applies one rewrite. Returns the nodes whose inputs or existence changed
/// and the nodes to revisit next pass.
fn apply(graph: &mut Graph, rewrite: Rewrite) -> Result<(Vec<NodeId>, Vec<NodeId>), SlimError> {
    let Rewrite {
        remove,
        add,
        initializers,
        rebind,
        rename,
    } = rewrite;

    let mut names: Vec<String> = Vec::new();
    for (old, new) in &rebind {
        graph.replace_tensor_uses(old, new);
        names.push(new.clone());
    }
    names.extend(initializers.iter().map(|(name, _)| name.clone()));
    names.extend(add.iter().flat_map(|n| n.outputs.iter().cloned()));
    let inputs: Vec<String> = add
        .iter()
        .flat_map(|n| n.present_inputs().map(str::to_owned))
        .collect();

    let added = graph.replace_nodes(&remove, add, initializers)?;
    for (old, new) in &rename {
        graph.rename_tensor(old, new)?;
        names.push(new.clone());
    }

    let mut affected: Vec<NodeId> = remove;
    let mut enqueue: Vec<NodeId> = added.clone();
    for name in names.iter().filter(|n| !n.is_empty()) {
        affected.extend_from_slice(graph.consumers(name));
        enqueue.extend_from_slice(graph.consumers(name));
    }
    for name in &inputs {
        if let Some(Producer::Node { id, .. }) = graph.producer(name) {
            enqueue.push(id);
        }
    }
    affected.extend_from_slice(&added);
    Ok((affected, enqueue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Attribute, Node, OpKind, ValueInfo};
    use tensor_core::{DType, DynShape, Shape, Tensor};

    fn s(v: &str) -> String {
        v.to_string()
    }

    /// x -> Relu -> Identity -> Transpose(1,0) -> Transpose(1,0) -> Add(zero) -> y
    fn noisy() -> Graph {
        let mut g = Graph::new("noisy");
        g.add_input("x", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[2, 3]))));
        g.add_initializer("zero", Tensor::zeros(Shape::vector(3), DType::F32))
            .unwrap();
        g.add_node(Node::new("relu", OpKind::Relu, vec![s("x")], vec![s("r")]))
            .unwrap();
        g.add_node(Node::new("id", OpKind::Identity, vec![s("r")], vec![s("a")]))
            .unwrap();
        for (name, i, o) in [("t1", "a", "b"), ("t2", "b", "c")] {
            g.add_node(
                Node::new(name, OpKind::Transpose, vec![s(i)], vec![s(o)])
                    .with_attr("perm", Attribute::Ints(vec![1, 0])),
            )
            .unwrap();
        }
        g.add_node(Node::new("add", OpKind::Add, vec![s("c"), s("zero")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        crate::infer::infer_shapes(&mut g).unwrap();
        g
    }

    #[test]
    fn test_reaches_fixed_point() {
        let mut g = noisy();
        let stats = RewriteEngine::from_config(&SlimConfig::default())
            .run(&mut g)
            .unwrap();
        assert!(stats.converged());
        assert_eq!(g.num_nodes(), 1, "{g}");
        // The graph output keeps its name; Relu now produces it.
        assert_eq!(g.outputs(), &[s("y")]);
        let (_, relu) = g.producer_node("y").unwrap();
        assert_eq!(relu.op, OpKind::Relu);
        assert_eq!(stats.applied["transpose_chain"], 1);
        assert!(stats.applied["identity_elimination"] >= 3);
        assert!(g.initializers().is_empty());
    }

    #[test]
    fn test_pass_limit_reports_pending() {
        let mut g = noisy();
        let stats = RewriteEngine::from_config(&SlimConfig {
            max_passes: 1,
            ..SlimConfig::default()
        })
        .run(&mut g)
        .unwrap();
        assert_eq!(stats.passes, 1);
        assert!(!stats.converged());
        assert!(stats.pending > 0);
        // Work done in the first pass is kept.
        assert_eq!(g.num_nodes(), 2, "{g}");
    }

    #[test]
    fn test_skipped_pattern_is_not_registered() {
        let engine = RewriteEngine::from_config(&SlimConfig {
            skip_fusion_patterns: vec![s("transpose_chain")],
            no_constant_folding: true,
            ..SlimConfig::default()
        });
        let names = engine.rule_names();
        assert!(!names.contains(&"transpose_chain"));
        assert!(!names.contains(&"constant_folding"));
        assert!(names.contains(&"conv_bn"));
    }
}
