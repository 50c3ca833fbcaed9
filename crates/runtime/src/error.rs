// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph execution and validation.

use model_ir::OpKind;

/// Errors that can occur while executing or validating a graph.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A kernel failed while evaluating a node.
    #[error("execution error in node '{node}' ({op}): {source}")]
    Execution {
        node: String,
        op: OpKind,
        #[source]
        source: tensor_core::TensorError,
    },

    /// The executor has no kernel for this operator.
    #[error("no reference kernel for operator {op} (node '{node}')")]
    UnsupportedOp { node: String, op: OpKind },

    /// A graph input was neither supplied nor backed by a default.
    #[error("no value supplied for graph input '{name}'")]
    MissingInput { name: String },

    /// A node consumed a tensor that has not been computed.
    #[error("node '{node}' reads '{tensor}' which has no value")]
    MissingValue { node: String, tensor: String },

    /// A sample input file could not be read or does not match the graph.
    #[error("sample input '{name}': {detail}")]
    InputSource { name: String, detail: String },

    /// The graph itself is malformed.
    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),

    /// File-system error while reading sample inputs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
