// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Floating-point precision conversion.
//!
//! Every f32 / f16 / bf16 value other than the target becomes the target
//! type: initializers (values converted), declared value types, `Cast`
//! targets, `Constant` payloads, and the same inside `If` branches. f64 and
//! integer values are left alone.
//!
//! With `keep_io_types`, graph inputs and outputs keep their declared types
//! and `Cast` nodes at the boundary convert to and from the target.

use crate::{SlimError, TargetDType};
use model_ir::{Attribute, Graph, Node, OpKind, ValueInfo};
use runtime::kernels;
use std::collections::HashSet;
use tensor_core::{DType, Tensor};

/// What a precision conversion did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecisionReport {
    pub initializers: usize,
    pub values: usize,
    pub casts_inserted: usize,
    /// Finite constant values clamped to the target's range.
    pub saturated: usize,
}

/// Whether `op` can compute in `dtype`.
pub fn supports(op: OpKind, dtype: DType) -> bool {
    !matches!(
        (op, dtype),
        (
            OpKind::Conv | OpKind::MaxPool | OpKind::AveragePool | OpKind::GlobalAveragePool,
            DType::BF16
        )
    )
}

fn is_source(dtype: DType, target: DType) -> bool {
    matches!(dtype, DType::F32 | DType::F16 | DType::BF16) && dtype != target
}

/// Converts the graph's floating values to `target`.
///
/// # Errors
/// [`SlimError::UnsupportedPrecision`] for the first node (including those in
/// `If` branches, in topological order) whose operator cannot run in the
/// target type, or when the converted graph no longer infers. The graph is
/// untouched on error.
pub fn convert_precision(
    graph: &mut Graph,
    target: TargetDType,
    keep_io_types: bool,
) -> Result<PrecisionReport, SlimError> {
    let dtype = target.dtype();
    check_support(graph, dtype)?;

    let mut scratch = graph.clone();
    // A tensor that is both an input and an output is listed once.
    let boundary: Vec<(String, DType)> = {
        let mut seen = HashSet::new();
        scratch
            .inputs()
            .iter()
            .chain(scratch.outputs())
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| {
                let d = scratch.dtype_of(name)?;
                is_source(d, dtype).then(|| (name.clone(), d))
            })
            .collect()
    };

    let mut report = PrecisionReport::default();
    convert_graph(&mut scratch, dtype, &mut report)?;
    if keep_io_types {
        report.casts_inserted = restore_io_types(&mut scratch, dtype, &boundary)?;
    }
    if let Err(err) = crate::infer::infer_shapes(&mut scratch) {
        return Err(match err {
            SlimError::ShapeConflict { node, detail } => {
                match scratch.find_node(&node).and_then(|id| scratch.node(id)) {
                    Some(n) => {
                        tracing::debug!(node = %node, %detail, "converted graph does not infer");
                        SlimError::UnsupportedPrecision { node, op: n.op, dtype }
                    }
                    None => SlimError::ShapeConflict { node, detail },
                }
            }
            other => other,
        });
    }
    if report.saturated > 0 {
        tracing::warn!(
            dtype = %dtype,
            count = report.saturated,
            "constant values out of range were clamped"
        );
    }

    tracing::info!(
        dtype = %dtype,
        initializers = report.initializers,
        values = report.values,
        casts = report.casts_inserted,
        "precision converted"
    );
    *graph = scratch;
    Ok(report)
}

fn check_support(graph: &Graph, dtype: DType) -> Result<(), SlimError> {
    for id in graph.topological_order()? {
        let Some(node) = graph.node(id) else { continue };
        let computes_float = node
            .input(0)
            .and_then(|x| graph.dtype_of(x))
            .map_or(true, |d| d.is_float() && d != DType::F64);
        if computes_float && !supports(node.op, dtype) {
            return Err(SlimError::UnsupportedPrecision {
                node: node.name.clone(),
                op: node.op,
                dtype,
            });
        }
        for branch in node.subgraphs() {
            check_support(branch, dtype)?;
        }
    }
    Ok(())
}

fn convert_graph(graph: &mut Graph, dtype: DType, report: &mut PrecisionReport) -> Result<(), SlimError> {
    let tensors: Vec<String> = graph
        .initializers()
        .iter()
        .filter(|(_, t)| is_source(t.dtype(), dtype))
        .map(|(name, _)| name.clone())
        .collect();
    for name in tensors {
        if let Some(t) = graph.initializer(&name).map(|t| narrow(t, dtype, report)) {
            graph.add_initializer(name, t)?;
            report.initializers += 1;
        }
    }

    let values: Vec<(String, ValueInfo)> = graph
        .value_infos()
        .iter()
        .filter(|(_, info)| info.dtype.is_some_and(|d| is_source(d, dtype)))
        .map(|(name, info)| {
            let info = ValueInfo {
                dtype: Some(dtype),
                shape: info.shape.clone(),
            };
            (name.clone(), info)
        })
        .collect();
    report.values += values.len();
    for (name, info) in values {
        graph.set_value_info(name, info);
    }

    let ids: Vec<_> = graph.nodes().map(|(id, _)| id).collect();
    for id in ids {
        let Some(node) = graph.node_mut(id) else { continue };
        convert_node(node, dtype, report)?;
    }
    Ok(())
}

fn convert_node(node: &mut Node, dtype: DType, report: &mut PrecisionReport) -> Result<(), SlimError> {
    match node.op {
        OpKind::Cast => {
            if node.attr_dtype("to").is_some_and(|to| is_source(to, dtype)) {
                node.set_attr_dtype("to", dtype);
            }
        }
        OpKind::Constant => {
            let value = kernels::constant_value(node).map_err(|source| runtime::RuntimeError::Execution {
                node: node.name.clone(),
                op: node.op,
                source,
            })?;
            if is_source(value.dtype(), dtype) {
                node.attributes.clear();
                node.attributes
                    .insert("value".into(), Attribute::Tensor(narrow(&value, dtype, report)));
            }
        }
        _ => {}
    }
    for branch in node.subgraphs_mut() {
        convert_graph(branch, dtype, report)?;
    }
    Ok(())
}

fn narrow(t: &Tensor, dtype: DType, report: &mut PrecisionReport) -> Tensor {
    let (converted, clamped) = t.cast_saturating(dtype);
    report.saturated += clamped;
    converted
}

/// Gives the boundary tensors back their original types, with `Cast` nodes
/// converting between them and the target. Returns the casts inserted.
fn restore_io_types(graph: &mut Graph, dtype: DType, boundary: &[(String, DType)]) -> Result<usize, SlimError> {
    let mut casts = 0;
    let outputs = graph.outputs().to_vec();

    for (name, original) in boundary {
        if !graph.is_output(name) || graph.is_input(name) {
            continue;
        }
        // The producer writes an internal name; a Cast restores the output.
        let internal = graph.unique_name(&format!("{name}_{dtype}"));
        graph.rename_tensor(name, &internal)?;
        graph.set_outputs(outputs.clone());
        let shape = graph.shape_of(&internal);
        graph.add_node(cast_node(&format!("{name}/Cast"), &internal, name, *original))?;
        graph.set_value_info(name.clone(), ValueInfo::new(*original, shape));
        casts += 1;
    }

    for (name, original) in boundary {
        if !graph.is_input(name) {
            continue;
        }
        let internal = graph.unique_name(&format!("{name}_{dtype}"));
        graph.replace_tensor_uses(name, &internal);
        graph.set_outputs(outputs.clone());
        let shape = graph.shape_of(name);
        graph.add_node(cast_node(&format!("{name}/Cast"), name, &internal, dtype))?;
        graph.set_value_info(internal, ValueInfo::new(dtype, shape.clone()));
        graph.set_value_info(name.clone(), ValueInfo::new(*original, shape));
        casts += 1;
    }
    Ok(casts)
}

fn cast_node(name: &str, input: &str, output: &str, to: DType) -> Node {
    let mut node = Node::new(name, OpKind::Cast, vec![input.to_owned()], vec![output.to_owned()]);
    node.set_attr_dtype("to", to);
    node
}
