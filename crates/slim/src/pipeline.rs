// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The end-to-end `slim` pipeline.
//!
//! ```text
//! load ─▶ infer ─▶ boundary ─▶ rewrite ─▶ precision ─▶ infer ─▶ check ─▶ save
//!                  (if asked)  (to fixed   (if asked)           (if asked)
//!                               point)
//! ```
//!
//! Every stage edits a scratch copy and swaps it in on success, so an error
//! never leaves a half-transformed graph behind.

use crate::boundary::{apply_boundary, BoundaryReport};
use crate::precision::{convert_precision, PrecisionReport};
use crate::rewrite::{RewriteEngine, RewriteStats};
use crate::summary::{summarize, ModelSummary};
use crate::{infer, SlimConfig, SlimError, Warning};
use model_ir::{Graph, SaveOptions, SaveReport};
use runtime::{inputs, ValidationReport};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Where the model comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Path(PathBuf),
    Graph(Graph),
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        ModelSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        ModelSource::Path(path)
    }
}

impl From<Graph> for ModelSource {
    fn from(graph: Graph) -> Self {
        ModelSource::Graph(graph)
    }
}

/// What each stage did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlimReport {
    /// Summary of the model as loaded.
    pub before: ModelSummary,
    pub boundary: Option<BoundaryReport>,
    pub rewrite: Option<RewriteStats>,
    pub precision: Option<PrecisionReport>,
    pub validation: Option<ValidationReport>,
    pub saved: Option<SaveReport>,
    pub warnings: Vec<Warning>,
}

/// Result of a [`slim`] run.
#[derive(Debug, Clone)]
pub struct SlimOutcome {
    pub graph: Graph,
    pub summary: ModelSummary,
    pub report: SlimReport,
}

/// Simplifies `model` according to `config` and writes it to `output` when
/// given.
///
/// With [`SlimConfig::inspect`] the model is only summarized.
///
/// # Errors
/// Configuration, load, structural and save errors abort the run. A failed
/// model check is an error only with [`SlimConfig::model_check_strict`];
/// otherwise it is reported as a [`Warning`], as is hitting the rewrite pass
/// limit.
pub fn slim(model: ModelSource, output: Option<&Path>, config: &SlimConfig) -> Result<SlimOutcome, SlimError> {
    config.validate()?;
    let start = Instant::now();
    let mut graph = match model {
        ModelSource::Path(path) => model_ir::load(&path)?,
        ModelSource::Graph(graph) => graph,
    };
    let mut report = SlimReport {
        before: summarize(&graph),
        ..SlimReport::default()
    };
    if config.inspect {
        return Ok(SlimOutcome {
            summary: report.before.clone(),
            graph,
            report,
        });
    }

    if !config.no_shape_infer {
        infer::infer_shapes(&mut graph)?;
    }

    let bindings = config.shape_bindings()?;
    if !config.inputs.is_empty() || !config.outputs.is_empty() || !bindings.is_empty() {
        report.boundary = Some(apply_boundary(&mut graph, &config.inputs, &config.outputs, &bindings)?);
    }
    let reference = config.model_check.then(|| graph.clone());

    let mut scratch = graph.clone();
    let stats = RewriteEngine::from_config(config).run(&mut scratch)?;
    graph = scratch;
    if !stats.converged() {
        report.warnings.push(Warning::NonConvergence {
            passes: stats.passes,
            pending: stats.pending,
        });
    }
    report.rewrite = Some(stats);

    let target = config.target_dtype()?;
    if let Some(target) = target {
        report.precision = Some(convert_precision(&mut graph, target, config.keep_io_types)?);
    }
    if !config.no_shape_infer {
        infer::infer_shapes(&mut graph)?;
    }

    if let Some(reference) = reference {
        let feeds = inputs::sample_inputs(&reference, &config.check_bindings()?, config.seed)?;
        let tolerance = match target {
            Some(t) => config.tolerance().for_dtype(t.dtype()),
            None => config.tolerance(),
        };
        let validation = runtime::validate(&reference, &graph, &feeds, tolerance)?;
        if !validation.is_equivalent() {
            if config.model_check_strict {
                return Err(SlimError::Mismatch(validation));
            }
            report.warnings.push(Warning::Mismatch(validation.clone()));
        }
        report.validation = Some(validation);
    }

    if let Some(path) = output {
        let options = SaveOptions {
            external_data_threshold: config
                .save_as_external_data
                .then_some(config.external_data_threshold),
        };
        report.saved = Some(model_ir::save(&graph, path, &options)?);
    }

    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    let summary = summarize(&graph);
    tracing::info!(
        nodes_before = report.before.num_nodes,
        nodes_after = summary.num_nodes,
        bytes_before = report.before.initializer_bytes,
        bytes_after = summary.initializer_bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "slim finished"
    );
    Ok(SlimOutcome { graph, summary, report })
}
