// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Errors raised by tensor construction and the reference kernels.

use crate::Shape;

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// Raw bytes handed to a constructor do not cover `shape × dtype`.
    #[error("tensor data is {actual} bytes, shape and dtype need {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Operand shapes cannot be combined (broadcast, contraction, concat).
    #[error("{op}: cannot combine shapes {lhs} and {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// An operator argument (axis, permutation, attribute) is out of range.
    #[error("invalid argument for {op}: {detail}")]
    InvalidArgument { op: &'static str, detail: String },
}
