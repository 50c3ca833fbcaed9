// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Redefinition of a graph's inputs and outputs.
//!
//! ```text
//! validate names            every name must exist; nothing changes otherwise
//!     │
//! kept set                  walk back from the outputs, stop at new inputs
//!     │
//! rebuild                   kept nodes, new inputs (current info, bound shapes),
//!     │                     old inputs still in use, used initializers
//! re-infer                  propagate the new input shapes
//! ```
//!
//! The graph is rebuilt from scratch and swapped in only when every step
//! succeeds.

use crate::{infer, ShapeBinding, SlimError};
use model_ir::{Graph, NodeId, ValueInfo};
use std::collections::{BTreeSet, HashSet};
use tensor_core::DynShape;

/// What a boundary change did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryReport {
    pub removed_nodes: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Makes `inputs` the graph inputs and `outputs` the graph outputs, keeping
/// only the nodes between them, then applies `shapes` to the inputs.
///
/// An empty `inputs` or `outputs` keeps the current ones. Graph inputs
/// outside `inputs` that kept nodes still read stay declared; those no
/// longer read are dropped. A new input that lies downstream of a new output
/// only cuts the paths running through it.
///
/// # Errors
/// [`SlimError::UnknownTensor`] for a name the graph does not define or a
/// binding that names no graph input, [`SlimError::ShapeConflict`] if the
/// bound shapes contradict the graph. The graph is untouched on error.
pub fn apply_boundary(
    graph: &mut Graph,
    inputs: &[String],
    outputs: &[String],
    shapes: &[ShapeBinding],
) -> Result<BoundaryReport, SlimError> {
    for name in inputs.iter().chain(outputs) {
        if !graph.defines(name) {
            return Err(SlimError::UnknownTensor { name: name.clone() });
        }
    }
    let outputs: Vec<String> = if outputs.is_empty() {
        graph.outputs().to_vec()
    } else {
        outputs.to_vec()
    };
    let cut: BTreeSet<&str> = inputs.iter().map(String::as_str).collect();

    // Backward liveness from the outputs, stopping at the cut.
    let order = graph.topological_order()?;
    let mut live: HashSet<String> = outputs.iter().cloned().collect();
    let mut kept: Vec<NodeId> = Vec::new();
    for &id in order.iter().rev() {
        let Some(node) = graph.node(id) else { continue };
        let needed = node
            .outputs
            .iter()
            .any(|o| !o.is_empty() && live.contains(o) && !cut.contains(o.as_str()));
        if needed {
            live.extend(node.present_inputs().map(str::to_owned));
            live.extend(node.implicit_inputs());
            kept.push(id);
        }
    }
    kept.reverse();

    let mut new_inputs: Vec<String> = inputs.to_vec();
    for name in graph.inputs() {
        if live.contains(name) && !new_inputs.contains(name) {
            new_inputs.push(name.clone());
        }
    }
    for binding in shapes {
        if !new_inputs.contains(&binding.name) {
            return Err(SlimError::UnknownTensor {
                name: binding.name.clone(),
            });
        }
    }

    let mut scratch = Graph::new(graph.name.clone());
    for (name, info) in graph.value_infos() {
        scratch.set_value_info(name.clone(), info.clone());
    }
    for &id in &kept {
        let Some(node) = graph.node(id) else { continue };
        let mut node = node.clone();
        // A kept node may still produce a tensor that is now fed from outside.
        for out in node.outputs.iter_mut().filter(|o| cut.contains(o.as_str())) {
            *out = graph.unique_name(&format!("{out}_detached"));
        }
        scratch.add_node(node)?;
    }
    for (name, tensor) in graph.initializers() {
        if live.contains(name) && !cut.contains(name.as_str()) {
            scratch.add_initializer(name.clone(), tensor.clone())?;
        }
    }
    for name in &new_inputs {
        let mut info = current_info(graph, name);
        if let Some(binding) = shapes.iter().find(|b| &b.name == name) {
            info.shape = Some(DynShape::fixed(&binding.dims));
        }
        scratch.add_input(name.clone(), info);
    }
    scratch.set_outputs(outputs.clone());

    if !shapes.is_empty() {
        forget_intermediate_shapes(&mut scratch);
    }
    scratch.prune_unused_values();
    scratch.check()?;
    infer::infer_shapes(&mut scratch)?;

    let report = BoundaryReport {
        removed_nodes: graph.num_nodes() - scratch.num_nodes(),
        inputs: scratch.inputs().to_vec(),
        outputs,
    };
    tracing::info!(
        removed_nodes = report.removed_nodes,
        inputs = ?report.inputs,
        outputs = ?report.outputs,
        "boundary applied"
    );
    *graph = scratch;
    Ok(report)
}

fn current_info(graph: &Graph, name: &str) -> ValueInfo {
    graph
        .value_info(name)
        .cloned()
        .or_else(|| graph.initializer(name).map(ValueInfo::of_tensor))
        .unwrap_or_default()
}

/// Drops the declared shapes of node outputs, keeping their types, so the
/// next inference derives them from the bound inputs alone.
fn forget_intermediate_shapes(graph: &mut Graph) {
    let produced: Vec<String> = graph
        .nodes()
        .flat_map(|(_, n)| n.outputs.iter().filter(|o| !o.is_empty()).cloned())
        .collect();
    for name in produced {
        if let Some(info) = graph.value_info(&name) {
            let info = ValueInfo {
                dtype: info.dtype,
                shape: None,
            };
            graph.set_value_info(name, info);
        }
    }
}
