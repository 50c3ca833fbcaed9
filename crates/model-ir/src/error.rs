// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction, mutation and persistence.

/// Errors that can occur when working with a [`crate::Graph`].
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The graph contains a dependency cycle through the named node.
    #[error("graph contains a cycle through node '{node}'")]
    Cycle { node: String },

    /// Removing a node would leave a consumer of one of its outputs dangling.
    #[error("cannot remove node '{node}': output '{tensor}' is still used by {consumer}")]
    DanglingReference {
        node: String,
        tensor: String,
        consumer: String,
    },

    /// A tensor name is already produced, declared as an input, or held as
    /// an initializer.
    #[error("tensor '{name}' is already defined")]
    DuplicateTensor { name: String },

    /// A referenced tensor does not exist in the graph.
    #[error("unknown tensor '{name}'")]
    UnknownTensor { name: String },

    /// A node handle no longer refers to a live node.
    #[error("unknown node handle #{0}")]
    UnknownNode(usize),

    /// The model file could not be read or written.
    #[error("model file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The model JSON is malformed.
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),

    /// External tensor data is missing, truncated or malformed.
    #[error("external data error: {0}")]
    ExternalData(String),

    /// The model uses an operator this tool does not know.
    #[error("unsupported operator '{op}'")]
    UnsupportedOp { op: String },

    /// A stored tensor payload does not match its declared shape and dtype.
    #[error("invalid tensor '{name}': {source}")]
    InvalidTensor {
        name: String,
        #[source]
        source: tensor_core::TensorError,
    },
}
