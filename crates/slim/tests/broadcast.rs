// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Property tests: inferred broadcast shapes agree with execution.

use model_ir::{Graph, Node, OpKind, ValueInfo};
use proptest::prelude::*;
use runtime::{Executor, TensorMap};
use slim::infer::infer_shapes;
use tensor_core::{DType, Dim, DynShape, Shape, Tensor};

/// Two broadcast-compatible shapes: each aligned dimension is either shared
/// or 1 on one side, and `b` may drop leading dimensions.
fn compatible_shapes() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (prop::collection::vec((1usize..4, 0u8..3), 0..4), 0usize..3).prop_map(|(dims, drop)| {
        let a: Vec<usize> = dims.iter().map(|&(d, side)| if side == 1 { 1 } else { d }).collect();
        let b: Vec<usize> = dims.iter().map(|&(d, side)| if side == 2 { 1 } else { d }).collect();
        let drop = drop.min(b.len());
        (a, b[drop..].to_vec())
    })
}

fn dim() -> impl Strategy<Value = Dim> {
    prop_oneof![
        (1usize..4).prop_map(Dim::Fixed),
        prop_oneof![Just("N"), Just("M")].prop_map(|s| Dim::Symbolic(s.into())),
        Just(Dim::Unknown),
    ]
}

fn add_graph(a: &[usize], b: &[usize]) -> Graph {
    let mut g = Graph::new("add");
    g.add_input("a", ValueInfo::new(DType::F32, Some(DynShape::fixed(a))));
    g.add_input("b", ValueInfo::new(DType::F32, Some(DynShape::fixed(b))));
    g.add_node(Node::new("add", OpKind::Add, vec!["a".into(), "b".into()], vec!["y".into()]))
        .unwrap();
    g.set_outputs(vec!["y".into()]);
    g
}

proptest! {
    #[test]
    fn inferred_add_shape_matches_execution((a, b) in compatible_shapes()) {
        let mut g = add_graph(&a, &b);
        infer_shapes(&mut g).unwrap();

        let feeds = TensorMap::from([
            ("a".to_string(), Tensor::zeros(Shape::new(a.clone()), DType::F32)),
            ("b".to_string(), Tensor::zeros(Shape::new(b.clone()), DType::F32)),
        ]);
        let out = Executor::new(&g).unwrap().run(&feeds).unwrap();
        prop_assert_eq!(g.shape_of("y"), Some(DynShape::fixed(out["y"].shape().dims())));
        prop_assert_eq!(g.dtype_of("y"), Some(DType::F32));
    }

    #[test]
    fn declared_broadcast_is_symmetric(
        a in prop::collection::vec(dim(), 0..4),
        b in prop::collection::vec(dim(), 0..4),
    ) {
        let (a, b) = (DynShape::new(a), DynShape::new(b));
        let ab = a.broadcast(&b);
        let ba = b.broadcast(&a);
        prop_assert_eq!(ab.is_ok(), ba.is_ok());
        if let (Ok(ab), Ok(ba)) = (ab, ba) {
            prop_assert_eq!(ab.rank(), a.rank().max(b.rank()));
            prop_assert_eq!(ab, ba);
        }
    }

    #[test]
    fn incompatible_static_dims_are_a_conflict(d in 2usize..5, e in 2usize..5) {
        prop_assume!(d != e);
        let mut g = add_graph(&[d], &[e]);
        prop_assert!(infer_shapes(&mut g).is_err());
    }
}
