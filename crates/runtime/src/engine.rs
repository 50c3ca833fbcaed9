// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The reference executor.
//!
//! ```text
//! Executor::new(&graph)      resolves the topological order and checks
//!     │                      every node has a kernel
//!     ▼
//! Executor::run(feeds)       evaluates nodes in order; `If` recursively
//!     │                      runs the selected branch with the outer
//!     ▼                      scope visible
//!   graph outputs
//! ```
//!
//! The executor is a correctness oracle for constant folding and
//! validation, not a fast runtime: every intermediate is kept until the run
//! finishes.

use crate::kernels::kernel_for;
use crate::RuntimeError;
use model_ir::{Graph, Node, NodeId, OpKind};
use std::collections::HashMap;
use std::time::Instant;
use tensor_core::Tensor;

/// Named tensors fed to or returned from a run.
pub type TensorMap = HashMap<String, Tensor>;

/// Evaluates a single node on concrete inputs.
///
/// `inputs[i]` is `None` for an omitted optional input. Returns one tensor
/// per declared output.
///
/// # Errors
/// [`RuntimeError::UnsupportedOp`] for `If` (branches need a scope; use
/// [`Executor`]) and [`RuntimeError::Execution`] when the kernel fails.
pub fn eval_node(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>, RuntimeError> {
    let kernel = kernel_for(node.op).ok_or_else(|| RuntimeError::UnsupportedOp {
        node: node.name.clone(),
        op: node.op,
    })?;
    kernel(node, inputs).map_err(|source| RuntimeError::Execution {
        node: node.name.clone(),
        op: node.op,
        source,
    })
}

/// Values visible while running one (sub-)graph.
struct Scope<'a> {
    graph: &'a Graph,
    local: TensorMap,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn get(&self, name: &str) -> Option<&Tensor> {
        self.local
            .get(name)
            .or_else(|| self.graph.initializer(name))
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }
}

/// Runs a graph on concrete inputs.
#[derive(Debug)]
pub struct Executor<'g> {
    graph: &'g Graph,
    order: Vec<NodeId>,
}

impl<'g> Executor<'g> {
    /// Prepares `graph` for execution.
    ///
    /// # Errors
    /// [`RuntimeError::Model`] if the graph is cyclic.
    pub fn new(graph: &'g Graph) -> Result<Self, RuntimeError> {
        let order = graph.topological_order()?;
        Ok(Self { graph, order })
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Runs the graph and returns every declared output.
    ///
    /// Graph inputs backed by an initializer may be omitted from `feeds`;
    /// the initializer then acts as the default value.
    pub fn run(&self, feeds: &TensorMap) -> Result<TensorMap, RuntimeError> {
        let start = Instant::now();
        let mut local = TensorMap::with_capacity(feeds.len() + self.order.len());
        for name in self.graph.inputs() {
            match feeds.get(name) {
                Some(t) => {
                    local.insert(name.clone(), t.clone());
                }
                None if self.graph.initializer(name).is_some() => {}
                None => return Err(RuntimeError::MissingInput { name: name.clone() }),
            }
        }
        let scope = run_graph(self.graph, &self.order, local, None)?;
        let outputs = collect_outputs(&scope)?;
        tracing::debug!(
            graph = %self.graph.name,
            nodes = self.order.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "graph executed"
        );
        Ok(self.graph.outputs().iter().cloned().zip(outputs).collect())
    }
}

fn collect_outputs(scope: &Scope<'_>) -> Result<Vec<Tensor>, RuntimeError> {
    scope
        .graph
        .outputs()
        .iter()
        .map(|name| {
            scope.get(name).cloned().ok_or_else(|| RuntimeError::MissingValue {
                node: format!("<{} outputs>", scope.graph.name),
                tensor: name.clone(),
            })
        })
        .collect()
}

fn run_graph<'a>(
    graph: &'a Graph,
    order: &[NodeId],
    local: TensorMap,
    parent: Option<&'a Scope<'a>>,
) -> Result<Scope<'a>, RuntimeError> {
    let mut scope = Scope {
        graph,
        local,
        parent,
    };
    for &id in order {
        let Some(node) = graph.node(id) else { continue };
        let outputs = {
            let inputs = node
                .inputs
                .iter()
                .map(|name| {
                    if name.is_empty() {
                        return Ok(None);
                    }
                    scope.get(name).map(Some).ok_or_else(|| RuntimeError::MissingValue {
                        node: node.name.clone(),
                        tensor: name.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if node.op == OpKind::If {
                run_if(node, &inputs, &scope)?
            } else {
                eval_node(node, &inputs)?
            }
        };
        for (name, value) in node.outputs.iter().zip(outputs) {
            if !name.is_empty() {
                scope.local.insert(name.clone(), value);
            }
        }
    }
    Ok(scope)
}

fn run_if(node: &Node, inputs: &[Option<&Tensor>], scope: &Scope<'_>) -> Result<Vec<Tensor>, RuntimeError> {
    let exec_err = |detail: String| RuntimeError::Execution {
        node: node.name.clone(),
        op: node.op,
        source: tensor_core::TensorError::InvalidArgument { op: "If", detail },
    };
    let cond = inputs
        .first()
        .copied()
        .flatten()
        .and_then(|c| c.get_f64(0))
        .ok_or_else(|| exec_err("missing condition".into()))?;
    let key = if cond != 0.0 { "then_branch" } else { "else_branch" };
    let branch = node
        .attr_graph(key)
        .ok_or_else(|| exec_err(format!("missing '{key}'")))?;
    let order = branch.topological_order()?;
    let inner = run_graph(branch, &order, TensorMap::new(), Some(scope))?;
    collect_outputs(&inner)
}
