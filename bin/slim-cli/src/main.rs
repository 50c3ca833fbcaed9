// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-slim
//!
//! Command-line interface for the graph simplifier.
//!
//! ## Usage
//! ```bash
//! # Simplify, fixing the batch dimension
//! graph-slim slim model.json model.slim.json --input-shapes input:1,3,224,224
//!
//! # Cut the graph and convert to fp16, checking the result
//! graph-slim slim model.json head.json --outputs /Flatten_output_0 --dtype fp16 --model-check
//!
//! # Print inputs, outputs and op counts
//! graph-slim inspect model.json
//! ```

mod commands;

use clap::{Parser, Subcommand};
use commands::slim::SlimArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "graph-slim",
    about = "Simplify static computation graphs into smaller equivalent ones",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file; command-line flags override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simplify a model and optionally write the result.
    Slim(SlimArgs),

    /// Summarize a model without changing it.
    Inspect {
        /// Path to the model file.
        model: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Slim(args) => commands::slim::execute(args, cli.config.as_deref()),
        Commands::Inspect { model } => commands::inspect::execute(&model),
    }
}
