// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Removal of nodes that pass their data input through unchanged.

use super::{Rewrite, RewriteRule};
use model_ir::{Graph, Node, NodeId, OpKind, Producer};
use tensor_core::{ops, DynShape, Shape};

/// Bypasses no-op nodes: `Identity`, inference `Dropout`, same-type `Cast`,
/// same-shape `Reshape` / `Expand`, identity `Transpose`, and arithmetic
/// with a neutral constant (`x + 0`, `x - 0`, `x * 1`, `x / 1`).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityElimination;

impl RewriteRule for IdentityElimination {
    fn name(&self) -> &str {
        "identity_elimination"
    }

    fn rewrite(&self, graph: &Graph, id: NodeId) -> Option<Rewrite> {
        let node = graph.node(id)?;
        let data = passthrough_input(graph, node)?;
        let out = node.outputs.first().filter(|o| !o.is_empty())?;
        if !graph.is_output(out) {
            return Some(Rewrite {
                remove: vec![id],
                rebind: vec![(out.clone(), data.to_owned())],
                ..Rewrite::default()
            });
        }
        // A graph output keeps its name: the data input takes it over, which
        // is only safe for a private intermediate.
        let private = matches!(graph.producer(data), Some(Producer::Node { .. }))
            && graph.consumers(data).len() == 1
            && !graph.is_output(data);
        private.then(|| Rewrite {
            remove: vec![id],
            rebind: vec![(out.clone(), data.to_owned())],
            rename: vec![(data.to_owned(), out.clone())],
            ..Rewrite::default()
        })
    }
}

/// The input `node` forwards unchanged, if it is a no-op.
fn passthrough_input<'n>(graph: &Graph, node: &'n Node) -> Option<&'n str> {
    let x = node.input(0)?;
    let forwards = match node.op {
        OpKind::Identity => true,
        OpKind::Dropout => {
            // `training_mode` (input 2) must be absent or a constant false.
            let inference = match node.input(2) {
                Some(flag) => graph.constant(flag).is_some_and(|t| t.all_equal(0.0)),
                None => true,
            };
            inference
                && node
                    .outputs
                    .iter()
                    .skip(1)
                    .all(|mask| mask.is_empty() || (graph.consumers(mask).is_empty() && !graph.is_output(mask)))
        }
        OpKind::Cast => node.attr_dtype("to").is_some() && node.attr_dtype("to") == graph.dtype_of(x),
        OpKind::Reshape => {
            let input = static_shape(graph, x)?;
            let target = graph.constant(node.input(1)?)?.to_i64_vec();
            let allow_zero = node.attr_int("allowzero").unwrap_or(0) != 0;
            ops::reshape_target(&input, &target, allow_zero).ok()? == input
        }
        OpKind::Expand => {
            let input = static_shape(graph, x)?;
            let target = graph.constant(node.input(1)?)?.to_i64_vec();
            let target = target
                .iter()
                .map(|&d| usize::try_from(d).ok())
                .collect::<Option<Vec<_>>>()?;
            input.broadcast(&Shape::new(target)).as_ref() == Some(&input)
        }
        OpKind::Transpose => match node.attr_ints("perm") {
            Some(perm) => perm.iter().enumerate().all(|(i, &p)| p == i as i64),
            None => graph.shape_of(x).is_some_and(|s| s.rank() <= 1),
        },
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
            return neutral_operand(graph, node);
        }
        _ => false,
    };
    forwards.then_some(x)
}

fn static_shape(graph: &Graph, name: &str) -> Option<Shape> {
    graph.shape_of(name)?.to_static()
}

/// The data input of `x + 0`, `0 + x`, `x - 0`, `x * 1`, `1 * x` or `x / 1`,
/// provided the neutral constant does not change the result's shape or type.
fn neutral_operand<'n>(graph: &Graph, node: &'n Node) -> Option<&'n str> {
    let (neutral, commutes) = match node.op {
        OpKind::Add => (0.0, true),
        OpKind::Sub => (0.0, false),
        OpKind::Mul => (1.0, true),
        OpKind::Div => (1.0, false),
        _ => return None,
    };
    let (a, b) = (node.input(0)?, node.input(1)?);
    let is_neutral = |name: &str| graph.constant(name).is_some_and(|t| t.all_equal(neutral));
    let (data, constant) = if is_neutral(b) {
        (a, b)
    } else if commutes && is_neutral(a) {
        (b, a)
    } else {
        return None;
    };

    let c = graph.constant(constant)?;
    if graph.dtype_of(data) != Some(c.dtype()) {
        return None;
    }
    let shape = graph.shape_of(data)?;
    let result = shape.broadcast(&DynShape::from(c.shape())).ok()?;
    (result == shape).then_some(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Attribute, ValueInfo};
    use tensor_core::{DType, Dim, Tensor};

    fn s(v: &str) -> String {
        v.to_string()
    }

    /// x -> Relu -> r -> <node> -> y -> Neg -> out
    fn around(node: Node, x_shape: DynShape, consts: &[(&str, Tensor)]) -> (Graph, NodeId) {
        let mut g = Graph::new("t");
        g.add_input("x", ValueInfo::new(DType::F32, Some(x_shape.clone())));
        for (name, t) in consts {
            g.add_initializer(*name, t.clone()).unwrap();
        }
        g.add_node(Node::new("relu", OpKind::Relu, vec![s("x")], vec![s("r")]))
            .unwrap();
        g.set_value_info("r", ValueInfo::new(DType::F32, Some(x_shape)));
        let id = g.add_node(node).unwrap();
        g.add_node(Node::new("neg", OpKind::Neg, vec![s("y")], vec![s("out")]))
            .unwrap();
        g.set_outputs(vec![s("out")]);
        (g, id)
    }

    fn eliminated(node: Node, x_shape: DynShape, consts: &[(&str, Tensor)]) -> bool {
        let (g, id) = around(node, x_shape, consts);
        IdentityElimination.rewrite(&g, id).is_some()
    }

    #[test]
    fn test_identity_and_cast() {
        let shape = DynShape::fixed(&[2, 3]);
        assert!(eliminated(
            Node::new("id", OpKind::Identity, vec![s("r")], vec![s("y")]),
            shape.clone(),
            &[]
        ));
        let cast = |to: i64| {
            Node::new("cast", OpKind::Cast, vec![s("r")], vec![s("y")]).with_attr("to", Attribute::Int(to))
        };
        assert!(eliminated(cast(1), shape.clone(), &[]));
        assert!(!eliminated(cast(10), shape, &[]));
    }

    #[test]
    fn test_dropout_with_used_mask_is_kept() {
        let shape = DynShape::fixed(&[4]);
        assert!(eliminated(
            Node::new("drop", OpKind::Dropout, vec![s("r")], vec![s("y"), s("")]),
            shape.clone(),
            &[]
        ));
        let (mut g, id) = around(
            Node::new("drop", OpKind::Dropout, vec![s("r")], vec![s("y"), s("mask")]),
            shape,
            &[],
        );
        g.set_outputs(vec![s("out"), s("mask")]);
        assert!(IdentityElimination.rewrite(&g, id).is_none());
    }

    #[test]
    fn test_dropout_in_training_mode_is_kept() {
        let shape = DynShape::fixed(&[4]);
        let drop = Node::new(
            "drop",
            OpKind::Dropout,
            vec![s("r"), s("ratio"), s("training")],
            vec![s("y")],
        );
        let ratio = || Tensor::scalar(DType::F32, 0.5);
        assert!(!eliminated(
            drop.clone(),
            shape.clone(),
            &[("ratio", ratio()), ("training", Tensor::scalar(DType::Bool, 1.0))]
        ));
        assert!(eliminated(
            drop,
            shape,
            &[("ratio", ratio()), ("training", Tensor::scalar(DType::Bool, 0.0))]
        ));
    }

    #[test]
    fn test_reshape_and_expand_to_same_shape() {
        let shape = DynShape::fixed(&[2, 3]);
        let same = Tensor::from_i64(Shape::vector(2), &[2, -1]).unwrap();
        let other = Tensor::from_i64(Shape::vector(2), &[3, 2]).unwrap();
        let reshape = Node::new("reshape", OpKind::Reshape, vec![s("r"), s("t")], vec![s("y")]);
        assert!(eliminated(reshape.clone(), shape.clone(), &[("t", same)]));
        assert!(!eliminated(reshape, shape.clone(), &[("t", other)]));

        let expand = Node::new("expand", OpKind::Expand, vec![s("r"), s("t")], vec![s("y")]);
        let ones = Tensor::from_i64(Shape::vector(1), &[1]).unwrap();
        let wider = Tensor::from_i64(Shape::vector(3), &[4, 2, 3]).unwrap();
        assert!(eliminated(expand.clone(), shape.clone(), &[("t", ones)]));
        assert!(!eliminated(expand, shape, &[("t", wider)]));
    }

    #[test]
    fn test_neutral_arithmetic() {
        let shape = DynShape::new(vec![Dim::Symbolic("N".into()), Dim::Fixed(3)]);
        let zero = Tensor::zeros(Shape::vector(3), DType::F32);
        let one = Tensor::from_f32(Shape::vector(1), &[1.0]).unwrap();
        let bin = |op: OpKind, a: &str, b: &str| Node::new("bin", op, vec![s(a), s(b)], vec![s("y")]);

        assert!(eliminated(bin(OpKind::Add, "k", "r"), shape.clone(), &[("k", zero.clone())]));
        assert!(eliminated(bin(OpKind::Sub, "r", "k"), shape.clone(), &[("k", zero.clone())]));
        assert!(!eliminated(bin(OpKind::Sub, "k", "r"), shape.clone(), &[("k", zero)]));
        assert!(eliminated(bin(OpKind::Mul, "one", "r"), shape.clone(), &[("one", one.clone())]));
        assert!(!eliminated(bin(OpKind::Div, "one", "r"), shape.clone(), &[("one", one)]));

        // Broadcasting against a larger constant changes the shape.
        let wide = Tensor::zeros(Shape::matrix(4, 3), DType::F32);
        assert!(!eliminated(bin(OpKind::Add, "r", "k"), shape.clone(), &[("k", wide)]));
        // So does a constant of another type.
        let zero64 = Tensor::zeros(Shape::vector(3), DType::F64);
        assert!(!eliminated(bin(OpKind::Add, "r", "k"), shape, &[("k", zero64)]));
    }

    #[test]
    fn test_graph_output_takes_over_name() {
        let (mut g, id) = around(
            Node::new("id", OpKind::Identity, vec![s("r")], vec![s("y")]),
            DynShape::fixed(&[2]),
            &[],
        );
        let neg = g.find_node("neg").unwrap();
        g.replace_nodes(&[neg], vec![], vec![]).unwrap_err();
        g.set_outputs(vec![s("y")]);
        g.replace_nodes(&[neg], vec![], vec![]).unwrap();
        let rewrite = IdentityElimination.rewrite(&g, id).unwrap();
        assert_eq!(rewrite.rename, vec![(s("r"), s("y"))]);

        // A graph input cannot be renamed, so the node stays.
        let mut g = Graph::new("passthrough");
        g.add_input("x", ValueInfo::new(DType::F32, None));
        let id = g
            .add_node(Node::new("id", OpKind::Identity, vec![s("x")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        assert!(IdentityElimination.rewrite(&g, id).is_none());
    }
}
