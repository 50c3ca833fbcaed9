// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: the full `slim` pipeline on small convolutional
//! graphs, in memory and through files.

use model_ir::{load, Attribute, Graph, Node, OpKind, ValueInfo};
use slim::{slim, ModelSource, SlimConfig, SlimError, Warning};
use std::collections::HashSet;
use tensor_core::{DType, Dim, DynShape, Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn s(v: &str) -> String {
    v.to_string()
}

fn floats(shape: Shape, seed: usize) -> Tensor {
    let n = shape.num_elements();
    let values: Vec<f32> = (0..n).map(|i| (((i * 7 + seed) % 11) as f32 - 5.0) * 0.05).collect();
    Tensor::from_f32(shape, &values).unwrap()
}

/// input[N,3,H,W] → Conv(4, 3x3, pad 1) → BatchNorm → Relu → Identity
/// → MaxPool(2) → Flatten → MatMul + bias → output
fn conv_net(hw: usize) -> Graph {
    let mut g = Graph::new("conv_net");
    g.add_input(
        "input",
        ValueInfo::new(
            DType::F32,
            Some(DynShape::new(vec![
                Dim::Unknown,
                Dim::Fixed(3),
                Dim::Fixed(hw),
                Dim::Fixed(hw),
            ])),
        ),
    );
    let flat = 4 * (hw / 2) * (hw / 2);
    g.add_initializer("conv.w", floats(Shape::new(vec![4, 3, 3, 3]), 1)).unwrap();
    g.add_initializer("conv.b", floats(Shape::vector(4), 2)).unwrap();
    g.add_initializer("bn.scale", Tensor::from_f32(Shape::vector(4), &[1.0, 0.5, 2.0, 1.5]).unwrap())
        .unwrap();
    g.add_initializer("bn.bias", floats(Shape::vector(4), 3)).unwrap();
    g.add_initializer("bn.mean", floats(Shape::vector(4), 4)).unwrap();
    g.add_initializer("bn.var", Tensor::from_f32(Shape::vector(4), &[1.0, 0.8, 1.2, 0.5]).unwrap())
        .unwrap();
    g.add_initializer("fc.w", floats(Shape::matrix(flat, 5), 5)).unwrap();
    g.add_initializer("fc.b", floats(Shape::vector(5), 6)).unwrap();

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
    g.add_node(Node::new(
        "/Identity",
        OpKind::Identity,
        vec![s("/Relu_output_0")],
        vec![s("/Identity_output_0")],
    ))
    .unwrap();
    g.add_node(
        Node::new(
            "/pool/MaxPool",
            OpKind::MaxPool,
            vec![s("/Identity_output_0")],
            vec![s("/pool/MaxPool_output_0")],
        )
        .with_attr("kernel_shape", Attribute::Ints(vec![2, 2]))
        .with_attr("strides", Attribute::Ints(vec![2, 2])),
    )
    .unwrap();
    g.add_node(Node::new(
        "/Flatten",
        OpKind::Flatten,
        vec![s("/pool/MaxPool_output_0")],
        vec![s("/Flatten_output_0")],
    ))
    .unwrap();
    g.add_node(Node::new(
        "/fc/MatMul",
        OpKind::MatMul,
        vec![s("/Flatten_output_0"), s("fc.w")],
        vec![s("/fc/MatMul_output_0")],
    ))
    .unwrap();
    g.add_node(Node::new(
        "/fc/Add",
        OpKind::Add,
        vec![s("/fc/MatMul_output_0"), s("fc.b")],
        vec![s("output")],
    ))
    .unwrap();
    g.set_outputs(vec![s("output")]);
    g
}

fn run(graph: Graph, config: &SlimConfig) -> slim::SlimOutcome {
    slim(ModelSource::Graph(graph), None, config).unwrap()
}

fn checked() -> SlimConfig {
    SlimConfig {
        model_check: true,
        ..SlimConfig::default()
    }
}

// ── Rewrites ───────────────────────────────────────────────────

#[test]
fn test_default_pipeline_fuses_and_stays_equivalent() {
    let outcome = run(conv_net(8), &checked());
    let counts = &outcome.summary.op_type_counts;
    assert_eq!(counts.get("BatchNormalization"), None);
    assert_eq!(counts.get("Identity"), None);
    assert_eq!(counts.get("MatMul"), None);
    assert_eq!(counts["Gemm"], 1);
    assert_eq!(outcome.summary.num_nodes, 5);
    assert_eq!(outcome.report.before.num_nodes, 8);

    let validation = outcome.report.validation.as_ref().unwrap();
    assert!(validation.is_equivalent(), "{validation}");
    assert!(outcome.report.warnings.is_empty());
    let stats = outcome.report.rewrite.as_ref().unwrap();
    assert!(stats.converged());
    assert_eq!(stats.applied["conv_bn"], 1);
    assert_eq!(stats.applied["matmul_add"], 1);
}

#[test]
fn test_each_rewrite_class_alone_is_equivalent() {
    let all = ["conv_bn", "gemm_bn", "matmul_add", "reshape_chain", "transpose_chain"];
    for keep in all {
        let config = SlimConfig {
            skip_fusion_patterns: all.iter().filter(|p| **p != keep).map(|p| s(p)).collect(),
            ..checked()
        };
        let outcome = run(conv_net(6), &config);
        let validation = outcome.report.validation.unwrap();
        assert!(validation.is_equivalent(), "{keep}: {validation}");
    }
}

#[test]
fn test_pipeline_is_idempotent() {
    let first = run(conv_net(8), &SlimConfig::default());
    let second = run(first.graph.clone(), &SlimConfig::default());
    assert_eq!(second.summary.num_nodes, first.summary.num_nodes);
    assert_eq!(second.summary.num_initializers, first.summary.num_initializers);
    assert_eq!(second.report.rewrite.unwrap().total_applied(), 0);
    assert_eq!(second.graph, first.graph);
}

#[test]
fn test_constant_addition_folds_to_five() {
    let mut g = Graph::new("fold");
    g.add_input("x", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[1]))));
    g.add_initializer("two", Tensor::scalar(DType::F32, 2.0)).unwrap();
    g.add_initializer("three", Tensor::scalar(DType::F32, 3.0)).unwrap();
    g.add_node(Node::new("sum", OpKind::Add, vec![s("two"), s("three")], vec![s("five")]))
        .unwrap();
    g.add_node(Node::new("add", OpKind::Add, vec![s("x"), s("five")], vec![s("y")]))
        .unwrap();
    g.set_outputs(vec![s("y")]);

    let outcome = run(g, &checked());
    assert_eq!(outcome.summary.num_nodes, 1);
    assert_eq!(outcome.graph.initializer("five").unwrap().to_f32_vec(), vec![5.0]);
    assert!(outcome.graph.initializer("two").is_none());
    assert!(outcome.report.validation.unwrap().is_equivalent());
}

#[test]
fn test_disabled_folding_keeps_constant_nodes() {
    let mut g = Graph::new("fold");
    g.add_input("x", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[1]))));
    g.add_initializer("two", Tensor::scalar(DType::F32, 2.0)).unwrap();
    g.add_node(Node::new("sq", OpKind::Mul, vec![s("two"), s("two")], vec![s("four")]))
        .unwrap();
    g.add_node(Node::new("add", OpKind::Add, vec![s("x"), s("four")], vec![s("y")]))
        .unwrap();
    g.set_outputs(vec![s("y")]);
    let config = SlimConfig {
        no_constant_folding: true,
        ..SlimConfig::default()
    };
    assert_eq!(run(g, &config).summary.num_nodes, 2);
}

#[test]
fn test_pass_limit_is_a_warning() {
    let config = SlimConfig {
        max_passes: 1,
        ..SlimConfig::default()
    };
    let outcome = run(conv_net(8), &config);
    assert!(matches!(
        outcome.report.warnings.as_slice(),
        [Warning::NonConvergence { passes: 1, .. }]
    ));
}

// ── Boundary ───────────────────────────────────────────────────

#[test]
fn test_sole_output_keeps_only_its_ancestors() {
    let config = SlimConfig {
        outputs: vec![s("/Flatten_output_0")],
        ..checked()
    };
    let outcome = run(conv_net(8), &config);
    let g = &outcome.graph;
    assert_eq!(g.outputs(), &[s("/Flatten_output_0")]);

    let mut needed: HashSet<String> = g.outputs().iter().cloned().collect();
    let order = g.topological_order().unwrap();
    for &id in order.iter().rev() {
        let node = g.node(id).unwrap();
        assert!(
            node.outputs.iter().any(|o| needed.contains(o)),
            "node '{}' does not reach the output",
            node.name
        );
        needed.extend(node.present_inputs().map(str::to_owned));
    }
    assert!(g.initializer("fc.w").is_none());
    assert!(outcome.report.validation.unwrap().is_equivalent());
}

#[test]
fn test_new_input_removes_its_producers() {
    let config = SlimConfig {
        inputs: vec![s("/Flatten_output_0")],
        ..SlimConfig::default()
    };
    let outcome = run(conv_net(8), &config);
    let g = &outcome.graph;
    assert_eq!(g.inputs(), &[s("/Flatten_output_0")]);
    assert!(g.producer_node("/Flatten_output_0").is_none());
    assert!(!outcome.summary.op_type_counts.contains_key("Conv"));
    assert_eq!(outcome.summary.input_info[0].dtype, Some(DType::F32));
}

#[test]
fn test_input_shape_override() {
    let config = SlimConfig {
        input_shapes: vec![s("input:1,3,224,224")],
        ..SlimConfig::default()
    };
    let outcome = run(conv_net(224), &config);
    assert_eq!(
        outcome.summary.input_maps["input"].shape,
        Some(DynShape::fixed(&[1, 3, 224, 224]))
    );
    assert_eq!(outcome.summary.output_maps["output"].shape, Some(DynShape::fixed(&[1, 5])));
    assert_eq!(
        outcome.graph.shape_of("/Flatten_output_0"),
        Some(DynShape::fixed(&[1, 4 * 112 * 112]))
    );
}

#[test]
fn test_unknown_boundary_name_is_an_error() {
    let config = SlimConfig {
        outputs: vec![s("/does/not/exist")],
        ..SlimConfig::default()
    };
    let err = slim(ModelSource::Graph(conv_net(8)), None, &config).unwrap_err();
    assert!(matches!(err, SlimError::UnknownTensor { name } if name == "/does/not/exist"));
}

// ── Precision ──────────────────────────────────────────────────

#[test]
fn test_fp16_then_fp32() {
    let fp16 = SlimConfig {
        dtype: Some(s("fp16")),
        ..checked()
    };
    let half = run(conv_net(8), &fp16);
    assert_eq!(half.summary.input_info[0].dtype, Some(DType::F16));
    assert_eq!(half.summary.output_info[0].dtype, Some(DType::F16));
    assert!(half.report.validation.as_ref().unwrap().is_equivalent());
    assert!(half.graph.initializers().values().all(|t| t.dtype() == DType::F16));

    let fp32 = SlimConfig {
        dtype: Some(s("fp32")),
        ..SlimConfig::default()
    };
    let full = run(half.graph.clone(), &fp32);
    assert_eq!(full.summary.input_info[0].dtype, Some(DType::F32));
    for (name, t) in full.graph.initializers() {
        assert_eq!(t.dtype(), DType::F32);
        let original = half.graph.initializer(name).unwrap().cast(DType::F32);
        assert_eq!(t.to_f32_vec(), original.to_f32_vec());
    }
}

#[test]
fn test_keep_io_types() {
    let config = SlimConfig {
        dtype: Some(s("fp16")),
        keep_io_types: true,
        ..checked()
    };
    let outcome = run(conv_net(8), &config);
    assert_eq!(outcome.summary.input_info[0].dtype, Some(DType::F32));
    assert_eq!(outcome.summary.output_info[0].dtype, Some(DType::F32));
    assert_eq!(outcome.summary.op_type_counts["Cast"], 2);
    assert!(outcome.report.validation.unwrap().is_equivalent());
}

#[test]
fn test_bf16_rejected_for_conv() {
    let config = SlimConfig {
        dtype: Some(s("bf16")),
        ..SlimConfig::default()
    };
    let err = slim(ModelSource::Graph(conv_net(8)), None, &config).unwrap_err();
    // The fused conv sits in a later arena slot than the pool; the report
    // still names the first offender in execution order.
    assert!(
        matches!(&err, SlimError::UnsupportedPrecision { node, op: OpKind::Conv, .. } if node == "/conv/Conv"),
        "{err}"
    );
}

// ── Files ──────────────────────────────────────────────────────

#[test]
fn test_inspect_only_summarizes() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never.json");
    let config = SlimConfig {
        inspect: true,
        ..SlimConfig::default()
    };
    let outcome = slim(ModelSource::Graph(conv_net(8)), Some(&out), &config).unwrap();
    assert_eq!(outcome.summary.num_nodes, 8);
    assert!(outcome.report.rewrite.is_none());
    assert!(!out.exists());
}

#[test]
fn test_save_inline_and_external() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("model.json");
    model_ir::save(&conv_net(8), &source, &model_ir::SaveOptions::default()).unwrap();

    let inline = dir.path().join("inline.json");
    let external = dir.path().join("external.json");
    let outcome = slim(ModelSource::from(source.as_path()), Some(&inline), &SlimConfig::default()).unwrap();
    let config = SlimConfig {
        save_as_external_data: true,
        external_data_threshold: 64,
        ..SlimConfig::default()
    };
    let report = slim(ModelSource::from(source.clone()), Some(&external), &config)
        .unwrap()
        .report;
    let saved = report.saved.unwrap();
    assert!(saved.external_tensors > 0);
    assert!(model_ir::external_data_path(&external).exists());

    let inline_len = std::fs::metadata(&inline).unwrap().len();
    let external_len = std::fs::metadata(&external).unwrap().len();
    assert!(external_len < inline_len);

    assert_eq!(load(&inline).unwrap(), outcome.graph);
    assert_eq!(load(&external).unwrap(), outcome.graph);
}

#[test]
fn test_config_file_drives_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slim.toml");
    std::fs::write(
        &path,
        "outputs = [\"/Flatten_output_0\"]\nskip_fusion_patterns = [\"conv_bn\"]\n",
    )
    .unwrap();
    let config = SlimConfig::from_file(&path).unwrap();
    let outcome = run(conv_net(8), &config);
    assert_eq!(outcome.summary.op_type_counts["BatchNormalization"], 1);
    assert_eq!(outcome.graph.outputs(), &[s("/Flatten_output_0")]);
}
