// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor values and reference kernels used by the graph-slim pipeline.
//!
//! This crate provides:
//! - [`Tensor`]: an owned, n-dimensional, little-endian byte-backed tensor.
//! - [`Shape`]: a concrete shape; [`DynShape`] / [`Dim`]: a declared shape
//!   that may contain symbolic or unknown dimensions.
//! - [`DType`]: supported element data types (f32, f16, bf16, f64, integers, bool).
//! - Reference kernels in [`ops`]: broadcasting arithmetic, matmul/gemm,
//!   convolution, pooling, normalisation, layout and reduction ops.
//!
//! Kernels favour clarity over speed: they exist so the simplifier can
//! fold constants and the validator can compare two graphs, not to serve
//! production inference.

mod dtype;
mod error;
pub mod ops;
mod shape;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::{Dim, DynShape, Shape};
pub use tensor::Tensor;
