// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: persistence → execution → validation.
//!
//! These exercise model-ir and runtime together on small convolutional
//! graphs written to disk and read back.

use model_ir::{load, save, Attribute, Graph, Node, OpKind, SaveOptions, ValueInfo};
use runtime::{inputs, validate, Executor, InputBinding, TensorMap, Tolerance};
use tensor_core::{DType, Dim, DynShape, Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn s(v: &str) -> String {
    v.to_string()
}

/// input[N,3,8,8] → Conv(4, 3x3, pad 1) → BatchNorm → Relu → MaxPool(2)
/// → Flatten → output[N,64]
fn conv_net() -> Graph {
    let mut g = Graph::new("conv_net");
    g.add_input(
        "input",
        ValueInfo::new(
            DType::F32,
            Some(DynShape::new(vec![
                Dim::Symbolic("N".into()),
                Dim::Fixed(3),
                Dim::Fixed(8),
                Dim::Fixed(8),
            ])),
        ),
    );
    let w: Vec<f32> = (0..4 * 3 * 3 * 3).map(|i| ((i % 5) as f32 - 2.0) * 0.1).collect();
    g.add_initializer("conv.w", Tensor::from_f32(Shape::new(vec![4, 3, 3, 3]), &w).unwrap())
        .unwrap();
    g.add_initializer("conv.b", Tensor::from_f32(Shape::vector(4), &[0.1, 0.0, -0.1, 0.2]).unwrap())
        .unwrap();
    for (name, vals) in [
        ("bn.scale", [1.0, 0.5, 2.0, 1.5]),
        ("bn.bias", [0.0, 0.1, -0.2, 0.3]),
        ("bn.mean", [0.05, -0.1, 0.0, 0.2]),
        ("bn.var", [1.0, 0.8, 1.2, 0.5]),
    ] {
        g.add_initializer(name, Tensor::from_f32(Shape::vector(4), &vals).unwrap())
            .unwrap();
    }
    g.add_node(
        Node::new(
            "/conv/Conv",
            OpKind::Conv,
            vec![s("input"), s("conv.w"), s("conv.b")],
            vec![s("/conv/Conv_output_0")],
        )
        .with_attr("pads", Attribute::Ints(vec![1, 1, 1, 1])),
    )
    .unwrap();
    g.add_node(Node::new(
        "/bn/BatchNormalization",
        OpKind::BatchNormalization,
        vec![
            s("/conv/Conv_output_0"),
            s("bn.scale"),
            s("bn.bias"),
            s("bn.mean"),
            s("bn.var"),
        ],
        vec![s("/bn/BatchNormalization_output_0")],
    ))
    .unwrap();
    g.add_node(Node::new(
        "/Relu",
        OpKind::Relu,
        vec![s("/bn/BatchNormalization_output_0")],
        vec![s("/Relu_output_0")],
    ))
    .unwrap();
    g.add_node(
        Node::new("/pool/MaxPool", OpKind::MaxPool, vec![s("/Relu_output_0")], vec![s("/pool/MaxPool_output_0")])
            .with_attr("kernel_shape", Attribute::Ints(vec![2, 2]))
            .with_attr("strides", Attribute::Ints(vec![2, 2])),
    )
    .unwrap();
    g.add_node(Node::new(
        "/Flatten",
        OpKind::Flatten,
        vec![s("/pool/MaxPool_output_0")],
        vec![s("output")],
    ))
    .unwrap();
    g.set_outputs(vec![s("output")]);
    g
}

// ── Tests ──────────────────────────────────────────────────────

#[test]
fn test_conv_net_runs_with_random_inputs() {
    let g = conv_net();
    let feeds = inputs::random_inputs(&g, 3).unwrap();
    assert_eq!(feeds["input"].shape().dims(), &[1, 3, 8, 8]);
    let out = Executor::new(&g).unwrap().run(&feeds).unwrap();
    assert_eq!(out["output"].shape().dims(), &[1, 64]);
    assert!(out["output"].to_f64_vec().iter().all(|v| *v >= 0.0));
}

#[test]
fn test_saved_model_is_equivalent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conv_net.json");
    let g = conv_net();
    save(
        &g,
        &path,
        &SaveOptions {
            external_data_threshold: Some(64),
        },
    )
    .unwrap();
    let back = load(&path).unwrap();

    let feeds = inputs::random_inputs(&g, 11).unwrap();
    let report = validate(&g, &back, &feeds, Tolerance::default()).unwrap();
    assert!(report.is_equivalent(), "{report}");
    assert_eq!(report.compared, vec![s("output")]);
}

#[test]
fn test_fp16_copy_within_half_tolerance() {
    let g = conv_net();
    let mut half = g.clone();
    let names: Vec<String> = half.initializers().keys().cloned().collect();
    for name in names {
        let t = half.initializer(&name).unwrap().cast(DType::F16);
        half.add_initializer(name, t).unwrap();
    }
    let feeds = inputs::random_inputs(&g, 5).unwrap();
    let tol = Tolerance::default().for_dtype(DType::F16);
    let report = validate(&g, &half, &feeds, tol).unwrap();
    assert!(report.is_equivalent(), "{report}");
}

#[test]
fn test_npy_binding_overrides_random() {
    use ndarray_npy::WriteNpyExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.npy");
    let arr = ndarray::ArrayD::<f32>::ones(vec![2, 3, 8, 8]);
    arr.write_npy(std::fs::File::create(&path).unwrap()).unwrap();

    let g = conv_net();
    let binding: InputBinding = format!("input:{}", path.display()).parse().unwrap();
    let feeds = inputs::sample_inputs(&g, &[binding], 0).unwrap();
    assert_eq!(feeds["input"].shape().dims(), &[2, 3, 8, 8]);

    let out: TensorMap = Executor::new(&g).unwrap().run(&feeds).unwrap();
    assert_eq!(out["output"].shape().dims(), &[2, 64]);
    // Identical batch rows give identical results.
    let v = out["output"].to_f64_vec();
    assert_eq!(v[..64], v[64..]);
}
