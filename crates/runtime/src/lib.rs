// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! A reference CPU interpreter for [`model_ir::Graph`]s, used as the oracle
//! behind constant folding and equivalence checking.
//!
//! - [`kernels`]: the `OpKind → KernelFn` rule table over
//!   [`tensor_core::ops`].
//! - [`Executor`]: runs a whole graph in topological order, including
//!   `If` branches; [`eval_node`] evaluates a single node.
//! - [`inputs`]: sample inputs: random (seeded), `.npy` or
//!   `.safetensors`.
//! - [`validate()`]: runs two graphs side by side on rayon workers and
//!   reports per-output [`Mismatch`]es.
//!
//! # Example
//! ```no_run
//! use runtime::{inputs, validate, Tolerance};
//! # fn demo(before: &model_ir::Graph, after: &model_ir::Graph) -> Result<(), runtime::RuntimeError> {
//! let feeds = inputs::random_inputs(before, inputs::DEFAULT_SEED)?;
//! let report = validate(before, after, &feeds, Tolerance::default())?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
pub mod inputs;
pub mod kernels;
pub mod validate;

pub use engine::{eval_node, Executor, TensorMap};
pub use error::RuntimeError;
pub use inputs::InputBinding;
pub use validate::{validate, Mismatch, Tolerance, ValidationReport};
