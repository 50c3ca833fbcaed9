// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Dead-code elimination.

use crate::SlimError;
use model_ir::{Graph, NodeId};
use std::collections::HashSet;

/// Removes every node that contributes to no graph output, then drops the
/// initializers and value infos left unused. Returns the number of nodes
/// removed.
///
/// Names a node's `If` branches read from the enclosing scope count as
/// uses, so producers feeding a branch stay alive.
pub fn eliminate_dead_nodes(graph: &mut Graph) -> Result<usize, SlimError> {
    let order = graph.topological_order()?;
    let mut live: HashSet<String> = graph.outputs().iter().cloned().collect();
    let mut dead: Vec<NodeId> = Vec::new();

    for &id in order.iter().rev() {
        let Some(node) = graph.node(id) else { continue };
        if node.outputs.iter().any(|o| !o.is_empty() && live.contains(o)) {
            live.extend(node.present_inputs().map(str::to_owned));
            live.extend(node.implicit_inputs());
        } else {
            dead.push(id);
        }
    }

    if !dead.is_empty() {
        graph.replace_nodes(&dead, Vec::new(), Vec::new())?;
    }
    let pruned = graph.prune_unused_values();
    if !dead.is_empty() || pruned > 0 {
        tracing::trace!(nodes = dead.len(), values = pruned, "dead code removed");
    }
    Ok(dead.len())
}
