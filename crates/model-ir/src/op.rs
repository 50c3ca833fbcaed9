// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The closed set of operator kinds a graph may contain.
//!
//! Operator names follow the conventional ONNX spelling so model files stay
//! readable (`"MatMul"`, `"BatchNormalization"`, ...). Anything outside this
//! enumeration is rejected at load time with
//! [`ModelError::UnsupportedOp`](crate::ModelError::UnsupportedOp).

/// The computation a [`crate::Node`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    // Elementwise binary / ternary
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Equal,
    Less,
    Greater,
    Where,
    // Elementwise unary
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Reciprocal,
    Relu,
    LeakyRelu,
    Sigmoid,
    Tanh,
    Gelu,
    Erf,
    Clip,
    Softmax,
    // Linear algebra and convolution
    MatMul,
    Gemm,
    Conv,
    MaxPool,
    AveragePool,
    GlobalAveragePool,
    BatchNormalization,
    LayerNormalization,
    // Layout
    Reshape,
    Flatten,
    Transpose,
    Concat,
    Squeeze,
    Unsqueeze,
    Gather,
    Slice,
    Expand,
    Shape,
    // Type and plumbing
    Cast,
    Identity,
    Dropout,
    Constant,
    // Reductions
    ReduceMean,
    ReduceSum,
    // Control flow
    If,
}

impl OpKind {
    /// Every operator kind, in declaration order.
    pub const ALL: &'static [OpKind] = &[
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Pow,
        Self::Equal,
        Self::Less,
        Self::Greater,
        Self::Where,
        Self::Neg,
        Self::Abs,
        Self::Sqrt,
        Self::Exp,
        Self::Log,
        Self::Reciprocal,
        Self::Relu,
        Self::LeakyRelu,
        Self::Sigmoid,
        Self::Tanh,
        Self::Gelu,
        Self::Erf,
        Self::Clip,
        Self::Softmax,
        Self::MatMul,
        Self::Gemm,
        Self::Conv,
        Self::MaxPool,
        Self::AveragePool,
        Self::GlobalAveragePool,
        Self::BatchNormalization,
        Self::LayerNormalization,
        Self::Reshape,
        Self::Flatten,
        Self::Transpose,
        Self::Concat,
        Self::Squeeze,
        Self::Unsqueeze,
        Self::Gather,
        Self::Slice,
        Self::Expand,
        Self::Shape,
        Self::Cast,
        Self::Identity,
        Self::Dropout,
        Self::Constant,
        Self::ReduceMean,
        Self::ReduceSum,
        Self::If,
    ];

    /// Returns the canonical operator name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Pow => "Pow",
            Self::Equal => "Equal",
            Self::Less => "Less",
            Self::Greater => "Greater",
            Self::Where => "Where",
            Self::Neg => "Neg",
            Self::Abs => "Abs",
            Self::Sqrt => "Sqrt",
            Self::Exp => "Exp",
            Self::Log => "Log",
            Self::Reciprocal => "Reciprocal",
            Self::Relu => "Relu",
            Self::LeakyRelu => "LeakyRelu",
            Self::Sigmoid => "Sigmoid",
            Self::Tanh => "Tanh",
            Self::Gelu => "Gelu",
            Self::Erf => "Erf",
            Self::Clip => "Clip",
            Self::Softmax => "Softmax",
            Self::MatMul => "MatMul",
            Self::Gemm => "Gemm",
            Self::Conv => "Conv",
            Self::MaxPool => "MaxPool",
            Self::AveragePool => "AveragePool",
            Self::GlobalAveragePool => "GlobalAveragePool",
            Self::BatchNormalization => "BatchNormalization",
            Self::LayerNormalization => "LayerNormalization",
            Self::Reshape => "Reshape",
            Self::Flatten => "Flatten",
            Self::Transpose => "Transpose",
            Self::Concat => "Concat",
            Self::Squeeze => "Squeeze",
            Self::Unsqueeze => "Unsqueeze",
            Self::Gather => "Gather",
            Self::Slice => "Slice",
            Self::Expand => "Expand",
            Self::Shape => "Shape",
            Self::Cast => "Cast",
            Self::Identity => "Identity",
            Self::Dropout => "Dropout",
            Self::Constant => "Constant",
            Self::ReduceMean => "ReduceMean",
            Self::ReduceSum => "ReduceSum",
            Self::If => "If",
        }
    }

    /// Parses an operator name case-insensitively.
    ///
    /// Accepts the canonical spelling plus a few common aliases
    /// (`"batchnorm"`, `"layernorm"`, `"linear"` for Gemm).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "batchnorm" | "batch_norm" => return Some(Self::BatchNormalization),
            "layernorm" | "layer_norm" => return Some(Self::LayerNormalization),
            "linear" => return Some(Self::Gemm),
            "avgpool" => return Some(Self::AveragePool),
            _ => {}
        }
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str().eq_ignore_ascii_case(&lower))
    }

    /// Broadcasting elementwise operators with two inputs.
    pub fn is_elementwise_binary(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Pow
                | Self::Equal
                | Self::Less
                | Self::Greater
        )
    }

    /// Whether evaluating the node at build time gives the same result as
    /// evaluating it at inference time. Control flow is excluded because
    /// branches are evaluated lazily.
    pub fn is_foldable(self) -> bool {
        !matches!(self, Self::If)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
