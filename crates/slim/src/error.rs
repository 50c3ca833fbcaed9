// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error and warning types for the simplification pipeline.

use model_ir::{ModelError, OpKind};
use runtime::{RuntimeError, ValidationReport};
use std::fmt;
use tensor_core::DType;

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum SlimError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A boundary name or shape binding does not name a tensor in the graph.
    #[error("unknown tensor '{name}'")]
    UnknownTensor { name: String },

    /// Inferred shapes or types contradict each other at a node.
    #[error("shape conflict at node '{node}': {detail}")]
    ShapeConflict { node: String, detail: String },

    /// A node cannot compute in the requested precision.
    #[error("node '{node}' ({op}) does not support {dtype}")]
    UnsupportedPrecision { node: String, op: OpKind, dtype: DType },

    #[error("configuration error: {0}")]
    Config(String),

    /// Validation failed and strict checking was requested.
    #[error("rewritten model is not equivalent: {0}")]
    Mismatch(ValidationReport),
}

/// Non-fatal conditions collected in the pipeline report.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The rewrite engine stopped at its pass limit with work still queued.
    NonConvergence { passes: usize, pending: usize },
    /// Validation found outputs outside tolerance.
    Mismatch(ValidationReport),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NonConvergence { passes, pending } => write!(
                f,
                "rewrites did not converge after {passes} passes ({pending} node(s) still queued)"
            ),
            Warning::Mismatch(report) => write!(f, "model check: {report}"),
        }
    }
}
