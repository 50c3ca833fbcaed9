// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The in-memory graph that graph-slim reads, rewrites and writes back.
//!
//! - [`Graph`]: a node arena plus named tensors: graph inputs, outputs,
//!   constant initializers and declared [`ValueInfo`]s. Graphs nest through
//!   [`Attribute::Graph`] (the branches of `If`).
//! - [`Node`] / [`OpKind`]: one operator application over named tensors.
//! - [`TopologyIndex`]: cached producer/consumer lookups and topological
//!   order, rebuilt lazily after every mutation.
//! - [`load`] / [`save`]: the JSON model format, with optional external
//!   data for large tensors.
//!
//! # Example
//! ```no_run
//! use model_ir::{load, save, SaveOptions};
//! use std::path::Path;
//!
//! let graph = load(Path::new("model.json")).unwrap();
//! println!("{graph}");
//! save(&graph, Path::new("copy.json"), &SaveOptions::default()).unwrap();
//! ```

mod error;
pub mod graph;
mod loader;
pub mod manifest;
mod node;
mod op;
pub mod topology;

pub use error::ModelError;
pub use graph::{Graph, ValueInfo};
pub use loader::{external_data_path, load, save, SaveOptions, SaveReport};
pub use manifest::ModelFile;
pub use node::{Attribute, Node, NodeId};
pub use op::OpKind;
pub use topology::{Producer, TopologyIndex};
