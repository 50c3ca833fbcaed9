// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model summaries and the before/after comparison table.

use model_ir::{Graph, ValueInfo};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tensor_core::{DType, DynShape};

/// Name, type and shape of one graph input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSummary {
    pub name: String,
    pub dtype: Option<DType>,
    /// `None` when the rank is unknown.
    pub shape: Option<DynShape>,
}

impl TensorSummary {
    fn of(graph: &Graph, name: &str) -> Self {
        let info = graph
            .value_info(name)
            .cloned()
            .or_else(|| graph.initializer(name).map(ValueInfo::of_tensor))
            .unwrap_or_default();
        Self {
            name: name.to_owned(),
            dtype: info.dtype,
            shape: info.shape,
        }
    }
}

impl fmt::Display for TensorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = ValueInfo {
            dtype: self.dtype,
            shape: self.shape.clone(),
        };
        write!(f, "{}: {info}", self.name)
    }
}

/// Structural statistics of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSummary {
    pub name: String,
    pub input_info: Vec<TensorSummary>,
    pub output_info: Vec<TensorSummary>,
    pub input_maps: BTreeMap<String, TensorSummary>,
    pub output_maps: BTreeMap<String, TensorSummary>,
    /// Node count per operator, `If` branches included.
    pub op_type_counts: BTreeMap<String, usize>,
    pub num_nodes: usize,
    pub num_initializers: usize,
    pub initializer_bytes: usize,
}

/// Summarizes `graph`.
pub fn summarize(graph: &Graph) -> ModelSummary {
    let input_info: Vec<TensorSummary> = graph.inputs().iter().map(|n| TensorSummary::of(graph, n)).collect();
    let output_info: Vec<TensorSummary> = graph.outputs().iter().map(|n| TensorSummary::of(graph, n)).collect();
    let by_name = |info: &[TensorSummary]| info.iter().map(|t| (t.name.clone(), t.clone())).collect();

    let mut summary = ModelSummary {
        name: graph.name.clone(),
        input_maps: by_name(&input_info),
        output_maps: by_name(&output_info),
        input_info,
        output_info,
        ..ModelSummary::default()
    };
    count(graph, &mut summary);
    summary
}

fn count(graph: &Graph, summary: &mut ModelSummary) {
    summary.num_initializers += graph.initializers().len();
    summary.initializer_bytes += graph.initializer_bytes();
    for (_, node) in graph.nodes() {
        summary.num_nodes += 1;
        *summary.op_type_counts.entry(node.op.to_string()).or_default() += 1;
        for branch in node.subgraphs() {
            count(branch, summary);
        }
    }
}

fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.2} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Model: {}", self.name)?;
        for t in &self.input_info {
            writeln!(f, "  Input   {t}")?;
        }
        for t in &self.output_info {
            writeln!(f, "  Output  {t}")?;
        }
        writeln!(f)?;
        writeln!(f, "  {:<28} {:>8}", "Operator", "Count")?;
        writeln!(f, "  {}", "-".repeat(37))?;
        for (op, n) in &self.op_type_counts {
            writeln!(f, "  {op:<28} {n:>8}")?;
        }
        writeln!(f, "  {}", "-".repeat(37))?;
        writeln!(f, "  {:<28} {:>8}", "Nodes", self.num_nodes)?;
        writeln!(f, "  {:<28} {:>8}", "Initializers", self.num_initializers)?;
        write!(f, "  {:<28} {:>8}", "Model size", format_bytes(self.initializer_bytes))
    }
}

/// Renders a two-column table of `before` against `after`.
///
/// Operators present in either model get a row; a count that changed is
/// marked with `*`.
pub fn compare(before: &ModelSummary, after: &ModelSummary) -> String {
    let mut out = String::new();
    let rule = "-".repeat(28 * 3 + 2);
    let mut row = |label: &str, a: String, b: String| {
        let _ = writeln!(out, "  {label:<28} {a:<28} {b:<28}");
    };

    row("", "Original Model".into(), "Slimmed Model".into());
    let io = |list: &[TensorSummary], name: &str| {
        list.iter()
            .find(|t| t.name == name)
            .map(|t| {
                let info = ValueInfo {
                    dtype: t.dtype,
                    shape: t.shape.clone(),
                };
                info.to_string()
            })
            .unwrap_or_else(|| "-".into())
    };
    let mut names: Vec<&str> = before.input_info.iter().map(|t| t.name.as_str()).collect();
    names.extend(after.input_info.iter().map(|t| t.name.as_str()).filter(|n| !before.input_maps.contains_key(*n)));
    for name in names {
        row(&format!("Input: {name}"), io(&before.input_info, name), io(&after.input_info, name));
    }
    let mut names: Vec<&str> = before.output_info.iter().map(|t| t.name.as_str()).collect();
    names.extend(after.output_info.iter().map(|t| t.name.as_str()).filter(|n| !before.output_maps.contains_key(*n)));
    for name in names {
        row(&format!("Output: {name}"), io(&before.output_info, name), io(&after.output_info, name));
    }

    let mut ops: Vec<&String> = before.op_type_counts.keys().chain(after.op_type_counts.keys()).collect();
    ops.sort();
    ops.dedup();
    for op in ops {
        let a = before.op_type_counts.get(op).copied().unwrap_or(0);
        let b = after.op_type_counts.get(op).copied().unwrap_or(0);
        let mark = if a != b { " *" } else { "" };
        row(op, a.to_string(), format!("{b}{mark}"));
    }
    row("Nodes", before.num_nodes.to_string(), after.num_nodes.to_string());
    row(
        "Model size",
        format_bytes(before.initializer_bytes),
        format_bytes(after.initializer_bytes),
    );
    format!("  {rule}\n{out}  {rule}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Node, OpKind};
    use tensor_core::{Dim, Shape, Tensor};

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn graph() -> Graph {
        let mut g = Graph::new("tiny");
        g.add_input(
            "x",
            ValueInfo::new(DType::F32, Some(DynShape::new(vec![Dim::Unknown, Dim::Fixed(3)]))),
        );
        g.add_initializer("k", Tensor::zeros(Shape::vector(3), DType::F32)).unwrap();
        g.add_node(Node::new("add", OpKind::Add, vec![s("x"), s("k")], vec![s("a")]))
            .unwrap();
        g.add_node(Node::new("relu1", OpKind::Relu, vec![s("a")], vec![s("b")]))
            .unwrap();
        g.add_node(Node::new("relu2", OpKind::Relu, vec![s("b")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        g
    }

    #[test]
    fn test_summarize_counts() {
        let summary = summarize(&graph());
        assert_eq!(summary.num_nodes, 3);
        assert_eq!(summary.op_type_counts["Relu"], 2);
        assert_eq!(summary.op_type_counts["Add"], 1);
        assert_eq!(summary.num_initializers, 1);
        assert_eq!(summary.initializer_bytes, 12);
        assert_eq!(summary.input_info[0].dtype, Some(DType::F32));
        assert_eq!(summary.input_maps["x"].shape.as_ref().map(|s| s.rank()), Some(2));
        // The output was never inferred.
        assert_eq!(summary.output_maps["y"].dtype, None);
        assert!(summary.to_string().contains("Relu"));
    }

    #[test]
    fn test_compare_marks_changes() {
        let before = summarize(&graph());
        let mut g = graph();
        let relu2 = g.find_node("relu2").unwrap();
        let relu1 = g.find_node("relu1").unwrap();
        g.replace_nodes(
            &[relu1, relu2],
            vec![Node::new("relu", OpKind::Relu, vec![s("a")], vec![s("y")])],
            vec![],
        )
        .unwrap();
        let after = summarize(&g);

        let table = compare(&before, &after);
        assert!(table.contains("Original Model"));
        assert!(table.contains("Input: x"));
        let relu_row = table.lines().find(|l| l.trim_start().starts_with("Relu")).unwrap();
        assert!(relu_row.contains("1 *"), "{relu_row}");
        let add_row = table.lines().find(|l| l.trim_start().starts_with("Add")).unwrap();
        assert!(!add_row.contains('*'));
    }
}
