// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Producer/consumer index and topological order of a [`Graph`].
//!
//! The index is derived data: it is never persisted, and the owning graph
//! drops it on every structural mutation and rebuilds it on the next query.

use crate::{Graph, NodeId};
use std::collections::HashMap;

/// Where a tensor comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    /// Output `output` of node `id`.
    Node { id: NodeId, output: usize },
    /// A declared graph input.
    GraphInput,
    /// A constant initializer.
    Initializer,
}

/// Cached topology of one graph (sub-graphs keep their own).
#[derive(Debug, Clone)]
pub struct TopologyIndex {
    producers: HashMap<String, Producer>,
    consumers: HashMap<String, Vec<NodeId>>,
    /// Topological order, or the name of a node on a cycle.
    order: Result<Vec<NodeId>, String>,
}

impl TopologyIndex {
    pub(crate) fn build(graph: &Graph) -> Self {
        let mut producers = HashMap::new();
        for name in graph.initializers().keys() {
            producers.insert(name.clone(), Producer::Initializer);
        }
        // Inputs shadow initializers of the same name (defaults that may be
        // overridden at run time are not constants).
        for name in graph.inputs() {
            producers.insert(name.clone(), Producer::GraphInput);
        }
        for (id, node) in graph.nodes() {
            for (output, name) in node.outputs.iter().enumerate() {
                if !name.is_empty() {
                    producers.insert(name.clone(), Producer::Node { id, output });
                }
            }
        }

        let mut consumers: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (id, node) in graph.nodes() {
            let implicit = node.implicit_inputs();
            let used = node
                .present_inputs()
                .map(str::to_owned)
                .chain(implicit.into_iter());
            let entry = deps.entry(id).or_default();
            for name in used {
                if let Some(Producer::Node { id: p, .. }) = producers.get(&name) {
                    entry.push(*p);
                }
                let list = consumers.entry(name).or_default();
                if list.last() != Some(&id) {
                    list.push(id);
                }
            }
        }

        let order = topo_sort(graph, &deps);
        Self {
            producers,
            consumers,
            order,
        }
    }

    /// Producer of `name`, if the tensor is defined in this graph.
    pub fn producer(&self, name: &str) -> Option<Producer> {
        self.producers.get(name).copied()
    }

    /// Nodes consuming `name` (explicitly or from inside a sub-graph), in
    /// arena order.
    pub fn consumers(&self, name: &str) -> &[NodeId] {
        self.consumers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order, or the name of a node on a cycle.
    pub fn order(&self) -> Result<&[NodeId], &str> {
        match &self.order {
            Ok(order) => Ok(order),
            Err(node) => Err(node),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Iterative three-colour DFS. Reaching a grey node again is a back edge,
/// hence a cycle.
fn topo_sort(graph: &Graph, deps: &HashMap<NodeId, Vec<NodeId>>) -> Result<Vec<NodeId>, String> {
    let ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
    let mut color: HashMap<NodeId, Color> = ids.iter().map(|&id| (id, Color::White)).collect();
    let mut order = Vec::with_capacity(ids.len());
    let none = Vec::new();

    for &root in &ids {
        if color[&root] != Color::White {
            continue;
        }
        color.insert(root, Color::Grey);
        let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let node_deps = deps.get(&node).unwrap_or(&none);
            if next < node_deps.len() {
                top.1 += 1;
                let dep = node_deps[next];
                match color.get(&dep).copied().unwrap_or(Color::Black) {
                    Color::White => {
                        color.insert(dep, Color::Grey);
                        stack.push((dep, 0));
                    }
                    Color::Grey => {
                        let name = graph
                            .node(dep)
                            .map(|n| n.name.clone())
                            .unwrap_or_else(|| dep.to_string());
                        return Err(name);
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(node, Color::Black);
                order.push(node);
                stack.pop();
            }
        }
    }
    Ok(order)
}
