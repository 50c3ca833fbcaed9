// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `graph-slim inspect`: print a model's inputs, outputs, op counts and size.

use slim::{ModelSource, SlimConfig};
use std::path::Path;

pub fn execute(model: &Path) -> anyhow::Result<()> {
    super::banner("graph-slim · Model Inspector");

    let config = SlimConfig {
        inspect: true,
        ..SlimConfig::default()
    };
    let outcome = slim::slim(ModelSource::from(model), None, &config)
        .map_err(|e| anyhow::anyhow!("failed to inspect '{}': {e}", model.display()))?;

    println!("{}", outcome.summary);
    println!();
    Ok(())
}
