// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline configuration loaded from TOML files or built programmatically.
//!
//! # TOML Format
//! ```toml
//! input_shapes = ["input:1,3,224,224"]
//! outputs = ["/Flatten_output_0"]
//! dtype = "fp16"
//! keep_io_types = true
//! save_as_external_data = true
//! model_check = true
//! model_check_inputs = ["input:sample.npy"]
//! skip_fusion_patterns = ["matmul_add"]
//! max_passes = 16
//! ```
//!
//! Every key is optional; missing keys take the [`Default`] values.

use crate::rewrite::FUSION_PATTERNS;
use crate::SlimError;
use runtime::{inputs::DEFAULT_SEED, InputBinding, Tolerance};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tensor_core::DType;

/// Options for one [`slim`](crate::slim) run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SlimConfig {
    /// Input shape overrides, `name:d0,d1,...`.
    pub input_shapes: Vec<String>,
    /// Tensors that become the new graph inputs.
    pub inputs: Vec<String>,
    /// Tensors that become the new graph outputs.
    pub outputs: Vec<String>,
    /// Target floating precision: `"fp16"`, `"bf16"` or `"fp32"`.
    pub dtype: Option<String>,
    /// Keep graph inputs and outputs in their original precision.
    pub keep_io_types: bool,
    pub save_as_external_data: bool,
    /// Initializers larger than this many bytes go to the external blob.
    pub external_data_threshold: usize,
    /// Compare the result against the input model on sample inputs.
    pub model_check: bool,
    /// Sample inputs for the model check, `name:path` (`.npy` or `.safetensors`).
    pub model_check_inputs: Vec<String>,
    /// Fail instead of warning when the model check finds a mismatch.
    pub model_check_strict: bool,
    pub rtol: f64,
    pub atol: f64,
    /// Seed for randomly generated check inputs.
    pub seed: u64,
    pub no_shape_infer: bool,
    pub no_constant_folding: bool,
    /// Fusion patterns to leave alone (see [`FUSION_PATTERNS`]).
    pub skip_fusion_patterns: Vec<String>,
    /// Upper bound on rewrite passes.
    pub max_passes: usize,
    /// Largest constant-folding result, in elements.
    pub fold_size_limit: usize,
    /// Only summarize the model; no rewriting and no output file.
    pub inspect: bool,
}

impl SlimConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SlimError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SlimError::Config(format!("cannot read config '{}': {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SlimError> {
        toml::from_str(toml_str).map_err(|e| SlimError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, SlimError> {
        toml::to_string_pretty(self).map_err(|e| SlimError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses [`input_shapes`](Self::input_shapes).
    pub fn shape_bindings(&self) -> Result<Vec<ShapeBinding>, SlimError> {
        self.input_shapes.iter().map(|s| s.parse()).collect()
    }

    /// Parses [`dtype`](Self::dtype).
    pub fn target_dtype(&self) -> Result<Option<TargetDType>, SlimError> {
        self.dtype.as_deref().map(str::parse).transpose()
    }

    /// Parses [`model_check_inputs`](Self::model_check_inputs).
    pub fn check_bindings(&self) -> Result<Vec<InputBinding>, SlimError> {
        self.model_check_inputs
            .iter()
            .map(|s| s.parse::<InputBinding>().map_err(SlimError::from))
            .collect()
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.rtol, self.atol)
    }

    /// Checks every field that needs parsing or has a restricted range.
    pub fn validate(&self) -> Result<(), SlimError> {
        self.shape_bindings()?;
        self.target_dtype()?;
        self.check_bindings()?;
        if let Some(bad) = self
            .skip_fusion_patterns
            .iter()
            .find(|p| !FUSION_PATTERNS.contains(&p.as_str()))
        {
            return Err(SlimError::Config(format!(
                "unknown fusion pattern '{bad}'; expected one of: {}",
                FUSION_PATTERNS.join(", ")
            )));
        }
        if self.max_passes == 0 {
            return Err(SlimError::Config("max_passes must be at least 1".into()));
        }
        if !(self.rtol >= 0.0 && self.atol >= 0.0) {
            return Err(SlimError::Config(format!(
                "tolerances must be non-negative (rtol {}, atol {})",
                self.rtol, self.atol
            )));
        }
        Ok(())
    }
}

impl Default for SlimConfig {
    fn default() -> Self {
        let tol = Tolerance::default();
        Self {
            input_shapes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dtype: None,
            keep_io_types: false,
            save_as_external_data: false,
            external_data_threshold: 1024,
            model_check: false,
            model_check_inputs: Vec::new(),
            model_check_strict: false,
            rtol: tol.rtol,
            atol: tol.atol,
            seed: DEFAULT_SEED,
            no_shape_infer: false,
            no_constant_folding: false,
            skip_fusion_patterns: Vec::new(),
            max_passes: 32,
            fold_size_limit: 1 << 22,
            inspect: false,
        }
    }
}

/// A fixed shape for one graph input, parsed from `name:d0,d1,...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeBinding {
    pub name: String,
    pub dims: Vec<usize>,
}

impl FromStr for ShapeBinding {
    type Err = SlimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |detail: &str| SlimError::Config(format!("invalid shape binding '{s}': {detail}"));
        let (name, dims) = s.rsplit_once(':').ok_or_else(|| bad("expected name:d0,d1,..."))?;
        if name.is_empty() {
            return Err(bad("empty tensor name"));
        }
        let dims = if dims.trim().is_empty() {
            Vec::new()
        } else {
            dims.split(',')
                .map(|d| d.trim().parse::<usize>().map_err(|_| bad("dimensions must be non-negative integers")))
                .collect::<Result<_, _>>()?
        };
        Ok(Self {
            name: name.to_owned(),
            dims,
        })
    }
}

impl fmt::Display for ShapeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "{}:{}", self.name, dims.join(","))
    }
}

/// Floating precision a model can be converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDType {
    Fp16,
    Bf16,
    Fp32,
}

impl TargetDType {
    pub fn dtype(self) -> DType {
        match self {
            TargetDType::Fp16 => DType::F16,
            TargetDType::Bf16 => DType::BF16,
            TargetDType::Fp32 => DType::F32,
        }
    }
}

impl FromStr for TargetDType {
    type Err = SlimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fp16" | "f16" | "float16" => Ok(TargetDType::Fp16),
            "bf16" | "bfloat16" => Ok(TargetDType::Bf16),
            "fp32" | "f32" | "float32" => Ok(TargetDType::Fp32),
            other => Err(SlimError::Config(format!(
                "unknown dtype '{other}'; expected 'fp16', 'bf16' or 'fp32'"
            ))),
        }
    }
}

impl fmt::Display for TargetDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetDType::Fp16 => "fp16",
            TargetDType::Bf16 => "bf16",
            TargetDType::Fp32 => "fp32",
        })
    }
}
