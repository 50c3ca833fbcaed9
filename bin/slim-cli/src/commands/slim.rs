// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-slim slim`: run the simplification pipeline on one model.
//!
//! Settings come from the optional `-c` TOML file first; every flag given
//! on the command line then overrides the matching key.

use slim::{ModelSource, SlimConfig};
use std::path::{Path, PathBuf};

#[derive(clap::Args, Debug, Default)]
pub struct SlimArgs {
    /// Input model file.
    pub input: PathBuf,

    /// Where to write the simplified model; nothing is written without it.
    pub output: Option<PathBuf>,

    /// Fix input shapes, e.g. `input:1,3,224,224`.
    #[arg(long, num_args = 1..)]
    pub input_shapes: Vec<String>,

    /// Tensors that become the new graph inputs.
    #[arg(long, num_args = 1..)]
    pub inputs: Vec<String>,

    /// Tensors that become the new graph outputs.
    #[arg(long, num_args = 1..)]
    pub outputs: Vec<String>,

    /// Convert floating values to `fp16`, `bf16` or `fp32`.
    #[arg(long)]
    pub dtype: Option<String>,

    /// Keep graph inputs and outputs in their original precision.
    #[arg(long)]
    pub keep_io_types: bool,

    /// Store large initializers in a `<output>.data` file.
    #[arg(long)]
    pub save_as_external_data: bool,

    /// Compare the result with the input model on sample inputs.
    #[arg(long)]
    pub model_check: bool,

    /// Sample inputs for the model check, `name:path.npy` or `name:path.safetensors`.
    #[arg(long, num_args = 1..)]
    pub model_check_inputs: Vec<String>,

    /// Fail when the model check finds a mismatch.
    #[arg(long)]
    pub model_check_strict: bool,

    /// Fusion patterns to leave alone.
    #[arg(long, num_args = 1..)]
    pub skip_fusion_patterns: Vec<String>,

    #[arg(long)]
    pub no_constant_folding: bool,

    #[arg(long)]
    pub no_shape_infer: bool,

    /// Upper bound on rewrite passes.
    #[arg(long)]
    pub max_passes: Option<usize>,
}

impl SlimArgs {
    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, config: &mut SlimConfig) {
        let lists = [
            (&self.input_shapes, &mut config.input_shapes),
            (&self.inputs, &mut config.inputs),
            (&self.outputs, &mut config.outputs),
            (&self.model_check_inputs, &mut config.model_check_inputs),
            (&self.skip_fusion_patterns, &mut config.skip_fusion_patterns),
        ];
        for (given, target) in lists {
            if !given.is_empty() {
                *target = given.clone();
            }
        }
        if self.dtype.is_some() {
            config.dtype = self.dtype.clone();
        }
        if let Some(n) = self.max_passes {
            config.max_passes = n;
        }
        config.keep_io_types |= self.keep_io_types;
        config.save_as_external_data |= self.save_as_external_data;
        config.model_check |= self.model_check || self.model_check_strict;
        config.model_check_strict |= self.model_check_strict;
        config.no_constant_folding |= self.no_constant_folding;
        config.no_shape_infer |= self.no_shape_infer;
    }
}

pub fn execute(args: SlimArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    super::banner("graph-slim · Simplifier");

    let mut config = match config_path {
        Some(path) => SlimConfig::from_file(path)?,
        None => SlimConfig::default(),
    };
    args.apply(&mut config);
    tracing::debug!(?config, "effective configuration");

    let outcome = slim::slim(ModelSource::from(args.input.as_path()), args.output.as_deref(), &config)
        .map_err(|e| anyhow::anyhow!("failed to slim '{}': {e}", args.input.display()))?;

    println!("{}", slim::summary::compare(&outcome.report.before, &outcome.summary));
    println!();

    if let Some(stats) = &outcome.report.rewrite {
        println!("  Rewrites ({} passes):", stats.passes);
        for (rule, n) in &stats.applied {
            println!("   {rule:<24} {n:>6}");
        }
        println!("   {:<24} {:>6}", "dead nodes", stats.dead_nodes);
        println!();
    }
    if let Some(validation) = &outcome.report.validation {
        println!("  Model check: {validation}");
    }
    for warning in &outcome.report.warnings {
        println!("  Warning: {warning}");
    }
    if let (Some(path), Some(saved)) = (&args.output, &outcome.report.saved) {
        println!(
            "  Saved {} ({:.2} KB model, {:.2} KB external in {} tensor(s))",
            path.display(),
            saved.model_bytes as f64 / 1024.0,
            saved.external_bytes as f64 / 1024.0,
            saved.external_tensors,
        );
    }
    println!();
    Ok(())
}
