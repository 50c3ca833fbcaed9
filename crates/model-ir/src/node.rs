// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph nodes and their attributes.
//!
//! A [`Node`] refers to tensors by name only. The owning [`Graph`] holds the
//! tensor data and declared types; the node holds the operator, its ordered
//! inputs and outputs, and a sorted attribute map.

use crate::{Graph, OpKind};
use std::collections::{BTreeMap, BTreeSet};
use tensor_core::{DType, Tensor};

/// Stable handle to a node inside a [`Graph`]'s arena.
///
/// Handles stay valid across unrelated insertions and removals; a handle
/// to a removed node resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    String(String),
    Tensor(Tensor),
    /// A nested sub-graph (the branches of `If`).
    Graph(Box<Graph>),
}

/// A single operator application.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique, human-readable node name (e.g. `"/layer1/Conv"`).
    pub name: String,
    pub op: OpKind,
    /// Input tensor names; an empty string marks an omitted optional input.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    /// Creates a node without attributes.
    pub fn new(
        name: impl Into<String>,
        op: OpKind,
        inputs: Vec<String>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            op,
            inputs,
            outputs,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Returns input `index` unless it is absent or omitted.
    pub fn input(&self, index: usize) -> Option<&str> {
        self.inputs
            .get(index)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Iterates over the non-omitted inputs.
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(String::as_str).filter(|s| !s.is_empty())
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Attribute::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_float(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key) {
            Some(Attribute::Float(v)) => Some(*v),
            Some(Attribute::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attributes.get(key) {
            Some(Attribute::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_floats(&self, key: &str) -> Option<&[f64]> {
        match self.attributes.get(key) {
            Some(Attribute::Floats(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Attribute::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_tensor(&self, key: &str) -> Option<&Tensor> {
        match self.attributes.get(key) {
            Some(Attribute::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    pub fn attr_graph(&self, key: &str) -> Option<&Graph> {
        match self.attributes.get(key) {
            Some(Attribute::Graph(g)) => Some(g),
            _ => None,
        }
    }

    /// Element type held by a dtype-valued attribute such as `Cast.to`.
    /// Accepts ONNX `TensorProto` codes as well as dtype names.
    pub fn attr_dtype(&self, key: &str) -> Option<DType> {
        match self.attributes.get(key)? {
            Attribute::Int(code) => dtype_from_code(*code),
            Attribute::String(s) => DType::from_str_loose(s),
            _ => None,
        }
    }

    /// Sets a dtype-valued attribute, keeping the encoding already in use.
    pub fn set_attr_dtype(&mut self, key: &str, dtype: DType) {
        let value = match self.attributes.get(key) {
            Some(Attribute::Int(_)) => Attribute::Int(dtype_code(dtype)),
            _ => Attribute::String(dtype.as_str().to_owned()),
        };
        self.attributes.insert(key.to_owned(), value);
    }

    /// Iterates over every nested sub-graph.
    pub fn subgraphs(&self) -> impl Iterator<Item = &Graph> {
        self.attributes.values().filter_map(|a| match a {
            Attribute::Graph(g) => Some(g.as_ref()),
            _ => None,
        })
    }

    /// Mutable access to every nested sub-graph.
    pub fn subgraphs_mut(&mut self) -> impl Iterator<Item = &mut Graph> {
        self.attributes.values_mut().filter_map(|a| match a {
            Attribute::Graph(g) => Some(g.as_mut()),
            _ => None,
        })
    }

    /// Outer-scope tensor names referenced from inside nested sub-graphs.
    pub fn implicit_inputs(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for g in self.subgraphs() {
            g.collect_outer_refs(&mut out);
        }
        out
    }
}

const DTYPE_CODES: &[(i64, DType)] = &[
    (1, DType::F32),
    (2, DType::U8),
    (3, DType::I8),
    (6, DType::I32),
    (7, DType::I64),
    (9, DType::Bool),
    (10, DType::F16),
    (11, DType::F64),
    (16, DType::BF16),
];

fn dtype_from_code(code: i64) -> Option<DType> {
    DTYPE_CODES.iter().find(|(c, _)| *c == code).map(|&(_, d)| d)
}

fn dtype_code(dtype: DType) -> i64 {
    DTYPE_CODES
        .iter()
        .find(|(_, d)| *d == dtype)
        .map(|&(c, _)| c)
        .unwrap_or(0)
}
