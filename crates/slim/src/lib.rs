// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # slim
//!
//! Simplification of static computation graphs into smaller, equivalent
//! ones.
//!
//! - [`infer`]: shape and type propagation through a per-op rule table.
//! - [`rewrite`]: constant folding, no-op elimination and fusions, applied
//!   by a worklist engine until nothing changes.
//! - [`boundary`]: new graph inputs and outputs, fixed input shapes.
//! - [`precision`]: conversion to fp16, bf16 or fp32.
//! - [`summary`]: op counts and sizes, before/after tables.
//! - [`slim()`]: all of the above, driven by a [`SlimConfig`].
//!
//! # Example
//! ```no_run
//! use slim::{slim, ModelSource, SlimConfig};
//! use std::path::Path;
//!
//! # fn demo() -> Result<(), slim::SlimError> {
//! let config = SlimConfig {
//!     input_shapes: vec!["input:1,3,224,224".into()],
//!     dtype: Some("fp16".into()),
//!     ..SlimConfig::default()
//! };
//! let outcome = slim(
//!     ModelSource::from(Path::new("model.json")),
//!     Some(Path::new("model.slim.json")),
//!     &config,
//! )?;
//! println!("{}", slim::summary::compare(&outcome.report.before, &outcome.summary));
//! # Ok(())
//! # }
//! ```

pub mod boundary;
mod config;
mod error;
pub mod infer;
mod pipeline;
pub mod precision;
pub mod rewrite;
pub mod summary;

pub use config::{ShapeBinding, SlimConfig, TargetDType};
pub use error::{SlimError, Warning};
pub use pipeline::{slim, ModelSource, SlimOutcome, SlimReport};
pub use summary::{summarize, ModelSummary, TensorSummary};
