// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Constant folding.
//!
//! A node folds when every input it reads is a constant, or when it is a
//! `Shape` of a fully static tensor. The node is evaluated with the
//! reference kernels and each output becomes an initializer of the same
//! name. Results above the size limit stay as nodes.

use super::{Rewrite, RewriteRule};
use model_ir::{Graph, Node, NodeId, OpKind};
use runtime::kernels;
use tensor_core::{Shape, Tensor};

/// Folds nodes whose value is known before run time.
#[derive(Debug, Clone)]
pub struct ConstantFold {
    /// Largest folded output, in elements.
    size_limit: usize,
}

impl ConstantFold {
    pub fn new(size_limit: usize) -> Self {
        Self { size_limit }
    }

    fn evaluate(&self, graph: &Graph, node: &Node) -> Option<Vec<Tensor>> {
        if node.op == OpKind::Shape {
            if let Some(folded) = static_shape(graph, node) {
                return Some(vec![folded]);
            }
        }
        let inputs = node
            .inputs
            .iter()
            .map(|name| if name.is_empty() { Some(None) } else { graph.constant(name).map(Some) })
            .collect::<Option<Vec<_>>>()?;

        // Skip evaluation when the declared result is already too large.
        let declared_too_large = node.outputs.iter().any(|o| {
            graph
                .shape_of(o)
                .and_then(|s| s.num_elements())
                .is_some_and(|n| n > self.size_limit)
        });
        if declared_too_large {
            return None;
        }

        match runtime::eval_node(node, &inputs) {
            Ok(outputs) => Some(outputs),
            Err(err) => {
                tracing::debug!(node = %node.name, %err, "constant evaluation failed; node kept");
                None
            }
        }
    }
}

/// The value of a `Shape` node whose input shape is fully static.
fn static_shape(graph: &Graph, node: &Node) -> Option<Tensor> {
    let shape = graph.shape_of(node.input(0)?)?.to_static()?;
    let (start, end) = kernels::shape_window(node, shape.rank());
    let dims: Vec<i64> = shape.dims()[start..end].iter().map(|&d| d as i64).collect();
    Tensor::from_i64(Shape::vector(dims.len()), &dims).ok()
}

impl RewriteRule for ConstantFold {
    fn name(&self) -> &str {
        "constant_folding"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let node = graph.node(id)?;
        if !node.op.is_foldable() {
            return None;
        }
        let outputs = self.evaluate(graph, node)?;
        if outputs.iter().any(|t| t.num_elements() > self.size_limit) {
            return None;
        }
        let initializers = node
            .outputs
            .iter()
            .zip(outputs)
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, t)| (name.clone(), t))
            .collect();
        Some(Rewrite {
            remove: vec![id],
            initializers,
            ..Rewrite::default()
        })
    }

    fn batch_parallel(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Attribute, ValueInfo};
    use tensor_core::{DType, Dim, DynShape};

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn scalar_graph() -> Graph {
        let mut g = Graph::new("two_plus_three");
        g.add_initializer("two", Tensor::scalar(DType::F32, 2.0)).unwrap();
        g.add_initializer("three", Tensor::scalar(DType::F32, 3.0)).unwrap();
        g.add_node(Node::new("add", OpKind::Add, vec![s("two"), s("three")], vec![s("five")]))
            .unwrap();
        g.set_outputs(vec![s("five")]);
        g
    }

    #[test]
    fn test_two_plus_three() {
        let g = scalar_graph();
        let id = g.find_node("add").unwrap();
        let rewrite = ConstantFold::new(16).rewrite(&g, id).unwrap();
        assert_eq!(rewrite.remove, vec![id]);
        let (name, value) = &rewrite.initializers[0];
        assert_eq!(name, "five");
        assert_eq!(value.to_f32_vec(), vec![5.0]);
    }

    #[test]
    fn test_int64_sentinel_folds_exactly() {
        let mut g = Graph::new("sentinel");
        g.add_initializer("end", Tensor::from_i64(Shape::scalar(), &[i64::MAX - 10]).unwrap())
            .unwrap();
        g.add_initializer("one", Tensor::from_i64(Shape::scalar(), &[1]).unwrap())
            .unwrap();
        g.add_node(Node::new("sub", OpKind::Sub, vec![s("end"), s("one")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        let id = g.find_node("sub").unwrap();
        let rewrite = ConstantFold::new(16).rewrite(&g, id).unwrap();
        assert_eq!(rewrite.initializers[0].1.to_i64_vec(), vec![i64::MAX - 11]);
    }

    #[test]
    fn test_integer_division_by_zero_is_kept() {
        let mut g = Graph::new("div0");
        g.add_initializer("a", Tensor::from_i64(Shape::vector(1), &[7]).unwrap())
            .unwrap();
        g.add_initializer("b", Tensor::from_i64(Shape::vector(1), &[0]).unwrap())
            .unwrap();
        g.add_node(Node::new("div", OpKind::Div, vec![s("a"), s("b")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        let id = g.find_node("div").unwrap();
        assert!(ConstantFold::new(16).rewrite(&g, id).is_none());
    }

    #[test]
    fn test_overridable_input_is_not_constant() {
        let mut g = scalar_graph();
        g.add_input("two", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[]))));
        let id = g.find_node("add").unwrap();
        assert!(ConstantFold::new(16).rewrite(&g, id).is_none());
    }

    #[test]
    fn test_size_limit() {
        let mut g = Graph::new("big");
        g.add_initializer("x", Tensor::zeros(Shape::vector(1), DType::F32)).unwrap();
        g.add_initializer("t", Tensor::from_i64(Shape::vector(2), &[64, 64]).unwrap())
            .unwrap();
        g.add_node(Node::new("e", OpKind::Expand, vec![s("x"), s("t")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        let id = g.find_node("e").unwrap();
        assert!(ConstantFold::new(1000).rewrite(&g, id).is_none());
        assert!(ConstantFold::new(4096).rewrite(&g, id).is_some());
    }

    #[test]
    fn test_shape_of_static_tensor() {
        let mut g = Graph::new("shape");
        g.add_input(
            "x",
            ValueInfo::new(DType::F32, Some(DynShape::fixed(&[1, 3, 224, 224]))),
        );
        g.add_node(
            Node::new("shape", OpKind::Shape, vec![s("x")], vec![s("dims")])
                .with_attr("start", Attribute::Int(1)),
        )
        .unwrap();
        g.set_outputs(vec![s("dims")]);
        let id = g.find_node("shape").unwrap();
        let rewrite = ConstantFold::new(16).rewrite(&g, id).unwrap();
        assert_eq!(rewrite.initializers[0].1.to_i64_vec(), vec![3, 224, 224]);

        g.add_input(
            "x",
            ValueInfo::new(DType::F32, Some(DynShape::new(vec![Dim::Symbolic("N".into()), Dim::Fixed(3)]))),
        );
        assert!(ConstantFold::new(16).rewrite(&g, id).is_none());
    }

    #[test]
    fn test_constant_node_and_if_are_handled() {
        let mut g = Graph::new("k");
        g.add_node(
            Node::new("k", OpKind::Constant, vec![], vec![s("k")])
                .with_attr("value_floats", Attribute::Floats(vec![1.0, 2.0])),
        )
        .unwrap();
        g.add_node(Node::new("if", OpKind::If, vec![s("k")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("k"), s("y")]);
        let fold = ConstantFold::new(16);
        let k = g.find_node("k").unwrap();
        assert_eq!(fold.rewrite(&g, k).unwrap().initializers[0].1.to_f32_vec(), vec![1.0, 2.0]);
        let branch = g.find_node("if").unwrap();
        assert!(fold.rewrite(&g, branch).is_none());
    }
}
