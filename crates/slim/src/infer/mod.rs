// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Static shape and element-type propagation.
//!
//! Inference walks the graph in topological order and asks the rule for
//! each node's [`OpKind`] (see [`rule_for`]) for its output value infos.
//! Results are gathered in a scratch map, together with the results for
//! every `If` branch, and written back only after every node in every
//! graph succeeded. A failed run leaves the graph untouched.
//!
//! Rules are conservative: an output whose rank cannot be determined keeps
//! whatever value info it had before, and dimensions the rule cannot pin
//! down borrow the previously declared dimension when the ranks agree.

mod rules;

pub use rules::{rule_for, InferFn};

use crate::SlimError;
use model_ir::{Attribute, Graph, NodeId, OpKind, ValueInfo};
use std::collections::HashMap;
use tensor_core::{DType, Dim, DynShape, Tensor};

/// Value infos visible while inferring one (sub-)graph.
pub struct Scope<'a> {
    graph: &'a Graph,
    values: HashMap<String, ValueInfo>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    fn new(graph: &'a Graph, parent: Option<&'a Scope<'a>>) -> Self {
        Self {
            graph,
            values: HashMap::new(),
            parent,
        }
    }

    /// The best known value info for `name`.
    pub fn info(&self, name: &str) -> Option<ValueInfo> {
        if name.is_empty() {
            return None;
        }
        if let Some(info) = self.values.get(name) {
            return Some(info.clone());
        }
        if self.graph.defines(name) || self.parent.is_none() {
            return self.declared(name);
        }
        self.parent
            .and_then(|p| p.info(name))
            .or_else(|| self.declared(name))
    }

    fn declared(&self, name: &str) -> Option<ValueInfo> {
        self.graph
            .value_info(name)
            .cloned()
            .or_else(|| self.graph.initializer(name).map(ValueInfo::of_tensor))
    }

    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.info(name).and_then(|i| i.dtype)
    }

    pub fn shape(&self, name: &str) -> Option<DynShape> {
        self.info(name).and_then(|i| i.shape)
    }

    /// The constant value of `name` when it is an initializer of this graph
    /// or of an enclosing one.
    pub fn constant(&self, name: &str) -> Option<&Tensor> {
        if name.is_empty() {
            return None;
        }
        match self.graph.constant(name) {
            Some(t) => Some(t),
            None if self.graph.defines(name) => None,
            None => self.parent.and_then(|p| p.constant(name)),
        }
    }
}

/// Inferred value infos for one graph and, recursively, its `If` branches.
#[derive(Debug, Default)]
struct Inferred {
    values: HashMap<String, ValueInfo>,
    branches: Vec<(NodeId, String, Inferred)>,
}

impl Inferred {
    /// Writes the results into `graph`. Returns how many value infos changed.
    fn commit(self, graph: &mut Graph) -> usize {
        let mut changed = 0;
        for (name, info) in self.values {
            if graph.value_info(&name) != Some(&info) {
                graph.set_value_info(name, info);
                changed += 1;
            }
        }
        for (id, key, inner) in self.branches {
            if let Some(Attribute::Graph(branch)) = graph.node_mut(id).and_then(|n| n.attributes.get_mut(&key)) {
                changed += inner.commit(branch);
            }
        }
        changed
    }
}

/// Infers value infos for every node output in `graph`, including nested
/// sub-graphs. Graph inputs and initializers keep their declared infos.
///
/// Returns the number of value infos that changed.
///
/// # Errors
/// [`SlimError::ShapeConflict`] naming the first node whose inputs
/// contradict each other, or [`SlimError::Model`] for a cyclic graph. The
/// graph is unchanged on error.
pub fn infer_shapes(graph: &mut Graph) -> Result<usize, SlimError> {
    let inferred = infer_graph(graph, None)?;
    let changed = inferred.commit(graph);
    tracing::debug!(graph = %graph.name, changed, "shape inference committed");
    Ok(changed)
}

fn infer_graph(graph: &Graph, parent: Option<&Scope<'_>>) -> Result<Inferred, SlimError> {
    let order = graph.topological_order()?;
    let mut scope = Scope::new(graph, parent);
    for &id in &order {
        let Some(node) = graph.node(id) else { continue };
        let rule = rule_for(node.op);
        let results = rule(node, &scope).map_err(|detail| SlimError::ShapeConflict {
            node: node.name.clone(),
            detail,
        })?;
        let mut results = results.into_iter();
        for name in &node.outputs {
            let inferred = results.next().flatten();
            if name.is_empty() {
                continue;
            }
            let previous = graph.value_info(name);
            if let Some(info) = refine(inferred, previous) {
                scope.values.insert(name.clone(), info);
            }
        }
    }

    let mut branches = Vec::new();
    for &id in &order {
        let Some(node) = graph.node(id) else { continue };
        if node.op != OpKind::If {
            continue;
        }
        for (key, attr) in &node.attributes {
            if let Attribute::Graph(branch) = attr {
                branches.push((id, key.clone(), infer_graph(branch, Some(&scope))?));
            }
        }
    }
    Ok(Inferred {
        values: scope.values,
        branches,
    })
}

/// Combines a fresh result with the previously recorded value info.
fn refine(inferred: Option<ValueInfo>, previous: Option<&ValueInfo>) -> Option<ValueInfo> {
    let Some(mut info) = inferred else {
        return previous.cloned();
    };
    let Some(previous) = previous else {
        return Some(info);
    };
    if info.dtype.is_none() {
        info.dtype = previous.dtype;
    }
    info.shape = match (info.shape.take(), &previous.shape) {
        (None, prev) => prev.clone(),
        (Some(new), Some(prev)) if new.rank() == prev.rank() => Some(DynShape::new(
            new.dims()
                .iter()
                .zip(prev.dims())
                .map(|(n, p)| if *n == Dim::Unknown { p.clone() } else { n.clone() })
                .collect(),
        )),
        (Some(new), _) => Some(new),
    };
    Some(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::Node;
    use tensor_core::Shape;

    fn s(v: &str) -> String {
        v.to_string()
    }

    fn sym(name: &str) -> Dim {
        Dim::Symbolic(name.into())
    }

    fn conv_graph() -> Graph {
        let mut g = Graph::new("conv");
        g.add_input(
            "x",
            ValueInfo::new(
                DType::F32,
                Some(DynShape::new(vec![sym("N"), Dim::Fixed(3), Dim::Fixed(32), Dim::Fixed(32)])),
            ),
        );
        g.add_initializer("w", Tensor::zeros(Shape::new(vec![8, 3, 3, 3]), DType::F32))
            .unwrap();
        g.add_initializer("target", Tensor::from_i64(Shape::vector(2), &[0, -1]).unwrap())
            .unwrap();
        g.add_node(
            Node::new("conv", OpKind::Conv, vec![s("x"), s("w")], vec![s("c")])
                .with_attr("strides", Attribute::Ints(vec![2, 2]))
                .with_attr("pads", Attribute::Ints(vec![1, 1, 1, 1])),
        )
        .unwrap();
        g.add_node(Node::new("relu", OpKind::Relu, vec![s("c")], vec![s("r")]))
            .unwrap();
        g.add_node(Node::new("reshape", OpKind::Reshape, vec![s("r"), s("target")], vec![s("y")]))
            .unwrap();
        g.set_outputs(vec![s("y")]);
        g
    }

    #[test]
    fn test_propagates_through_chain() {
        let mut g = conv_graph();
        assert!(infer_shapes(&mut g).unwrap() > 0);
        let c = g.shape_of("c").unwrap();
        assert_eq!(
            c,
            DynShape::new(vec![sym("N"), Dim::Fixed(8), Dim::Fixed(16), Dim::Fixed(16)])
        );
        assert_eq!(g.shape_of("r"), Some(c));
        assert_eq!(
            g.shape_of("y"),
            Some(DynShape::new(vec![sym("N"), Dim::Fixed(8 * 16 * 16)]))
        );
        assert_eq!(g.dtype_of("y"), Some(DType::F32));
    }

    #[test]
    fn test_idempotent() {
        let mut g = conv_graph();
        infer_shapes(&mut g).unwrap();
        let once = g.clone();
        assert_eq!(infer_shapes(&mut g).unwrap(), 0);
        assert_eq!(g, once);
    }

    #[test]
    fn test_conflict_leaves_graph_untouched() {
        let mut g = conv_graph();
        g.add_initializer("bad", Tensor::zeros(Shape::vector(5), DType::F32))
            .unwrap();
        g.add_node(Node::new("add", OpKind::Add, vec![s("y"), s("bad")], vec![s("z")]))
            .unwrap();
        g.set_outputs(vec![s("z")]);
        let before = g.clone();
        let err = infer_shapes(&mut g).unwrap_err();
        assert!(matches!(&err, SlimError::ShapeConflict { node, .. } if node == "add"), "{err}");
        assert_eq!(g, before);
    }

    #[test]
    fn test_unknown_rank_keeps_previous_info() {
        let mut g = Graph::new("opaque");
        g.add_input("x", ValueInfo::new(DType::F32, None));
        g.add_input("t", ValueInfo::new(DType::I64, None));
        g.add_node(Node::new("reshape", OpKind::Reshape, vec![s("x"), s("t")], vec![s("y")]))
            .unwrap();
        g.set_value_info("y", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[2, 2]))));
        g.set_outputs(vec![s("y")]);
        infer_shapes(&mut g).unwrap();
        assert_eq!(g.shape_of("y"), Some(DynShape::fixed(&[2, 2])));
    }

    #[test]
    fn test_if_branches_see_outer_values() {
        let mut then_g = Graph::new("then");
        then_g
            .add_node(Node::new("neg", OpKind::Neg, vec![s("x")], vec![s("t_out")]))
            .unwrap();
        then_g.set_outputs(vec![s("t_out")]);
        let mut else_g = Graph::new("else");
        else_g
            .add_node(Node::new("id", OpKind::Identity, vec![s("x")], vec![s("e_out")]))
            .unwrap();
        else_g.set_outputs(vec![s("e_out")]);

        let mut g = Graph::new("branchy");
        g.add_input("x", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[4]))));
        g.add_input("c", ValueInfo::new(DType::Bool, Some(DynShape::fixed(&[]))));
        g.add_node(
            Node::new("if", OpKind::If, vec![s("c")], vec![s("y")])
                .with_attr("then_branch", Attribute::Graph(Box::new(then_g)))
                .with_attr("else_branch", Attribute::Graph(Box::new(else_g))),
        )
        .unwrap();
        g.set_outputs(vec![s("y")]);

        infer_shapes(&mut g).unwrap();
        assert_eq!(g.shape_of("y"), Some(DynShape::fixed(&[4])));
        let (_, node) = g.producer_node("y").unwrap();
        let then_g = node.attr_graph("then_branch").unwrap();
        assert_eq!(then_g.shape_of("t_out"), Some(DynShape::fixed(&[4])));
    }

    #[test]
    fn test_refine_borrows_declared_dims() {
        let prev = ValueInfo::new(DType::F32, Some(DynShape::new(vec![sym("B"), Dim::Fixed(3)])));
        let fresh = ValueInfo {
            dtype: None,
            shape: Some(DynShape::new(vec![Dim::Unknown, Dim::Fixed(3)])),
        };
        assert_eq!(refine(Some(fresh), Some(&prev)), Some(prev.clone()));
        assert_eq!(refine(None, Some(&prev)), Some(prev));
        assert_eq!(refine(None, None), None);
    }
}
