// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sample inputs for validation runs.
//!
//! Inputs come from files bound on the command line (`name:path`, `.npy` or
//! `.safetensors`) or are generated from the graph's declared input types:
//!
//! | dtype | values |
//! |---|---|
//! | floats | uniform in `[0, 1)` |
//! | integers | uniform in `{0, 1}` |
//! | bool | random |
//!
//! Symbolic and unknown dimensions are bound to 1.

use crate::{RuntimeError, TensorMap};
use model_ir::Graph;
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyExt, ReadableElement};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tensor_core::{DType, Dim, Shape, Tensor};

/// Default seed for generated inputs.
pub const DEFAULT_SEED: u64 = 0x5117;

/// A `name:path` binding of a graph input to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: String,
    pub path: PathBuf,
}

impl FromStr for InputBinding {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split at the first ':' so Windows-style paths keep their drive.
        match s.split_once(':') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(Self {
                name: name.to_owned(),
                path: PathBuf::from(path),
            }),
            _ => Err(RuntimeError::InputSource {
                name: s.to_owned(),
                detail: "expected 'name:path'".into(),
            }),
        }
    }
}

/// Generates a random tensor for every graph input that has no default.
///
/// # Errors
/// [`RuntimeError::InputSource`] if an input's rank is unknown.
pub fn random_inputs(graph: &Graph, seed: u64) -> Result<TensorMap, RuntimeError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = TensorMap::new();
    for name in graph.inputs() {
        if graph.initializer(name).is_some() {
            continue;
        }
        let dtype = graph.dtype_of(name).unwrap_or(DType::F32);
        let shape = graph.shape_of(name).ok_or_else(|| RuntimeError::InputSource {
            name: name.clone(),
            detail: "declared rank is unknown; supply the input from a file".into(),
        })?;
        let dims: Vec<usize> = shape
            .dims()
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => *n,
                _ => 1,
            })
            .collect();
        let shape = Shape::new(dims);
        let n = shape.num_elements();
        let values: Vec<f64> = if dtype.is_float() {
            (0..n).map(|_| rng.gen::<f64>()).collect()
        } else if dtype == DType::Bool {
            (0..n).map(|_| f64::from(u8::from(rng.gen::<bool>()))).collect()
        } else {
            (0..n).map(|_| f64::from(rng.gen_range(0u8..2))).collect()
        };
        let tensor = Tensor::from_f64(shape, dtype, &values).map_err(|e| RuntimeError::InputSource {
            name: name.clone(),
            detail: e.to_string(),
        })?;
        out.insert(name.clone(), tensor);
    }
    Ok(out)
}

/// Random inputs for `graph`, overridden by the bound files.
///
/// # Errors
/// [`RuntimeError::InputSource`] if a binding names something that is not a
/// graph input or its file cannot be decoded.
pub fn sample_inputs(
    graph: &Graph,
    bindings: &[InputBinding],
    seed: u64,
) -> Result<TensorMap, RuntimeError> {
    for b in bindings {
        if !graph.is_input(&b.name) {
            return Err(RuntimeError::InputSource {
                name: b.name.clone(),
                detail: "not a graph input".into(),
            });
        }
    }
    let mut feeds = random_inputs(graph, seed)?;
    for b in bindings {
        let tensor = load_tensor_file(&b.path, &b.name)?;
        tracing::debug!(input = %b.name, path = %b.path.display(), shape = %tensor.shape(), "loaded sample input");
        feeds.insert(b.name.clone(), tensor);
    }
    Ok(feeds)
}

/// Reads one tensor from a `.npy` or `.safetensors` file.
///
/// For safetensors the entry named `name` is used, or the only entry if the
/// file holds exactly one tensor.
pub fn load_tensor_file(path: &Path, name: &str) -> Result<Tensor, RuntimeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("npy") => load_npy(path, name),
        Some("safetensors") => load_safetensors(path, name),
        _ => Err(RuntimeError::InputSource {
            name: name.to_owned(),
            detail: format!("unsupported file type '{}'", path.display()),
        }),
    }
}

fn read_npy_as<T: ReadableElement>(path: &Path) -> Result<Option<ArrayD<T>>, RuntimeError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(ArrayD::<T>::read_npy(reader).ok())
}

fn from_values(name: &str, dims: &[usize], dtype: DType, values: Vec<f64>) -> Result<Tensor, RuntimeError> {
    Tensor::from_f64(Shape::new(dims.to_vec()), dtype, &values).map_err(|e| RuntimeError::InputSource {
        name: name.to_owned(),
        detail: e.to_string(),
    })
}

/// Tries the element types a model input plausibly has, most common first.
fn load_npy(path: &Path, name: &str) -> Result<Tensor, RuntimeError> {
    if let Some(a) = read_npy_as::<f32>(path)? {
        return from_values(name, a.shape(), DType::F32, a.iter().map(|&v| f64::from(v)).collect());
    }
    if let Some(a) = read_npy_as::<f64>(path)? {
        return from_values(name, a.shape(), DType::F64, a.iter().copied().collect());
    }
    if let Some(a) = read_npy_as::<i64>(path)? {
        let shape = Shape::new(a.shape().to_vec());
        let values: Vec<i64> = a.iter().copied().collect();
        return Tensor::from_i64(shape, &values).map_err(|e| RuntimeError::InputSource {
            name: name.to_owned(),
            detail: e.to_string(),
        });
    }
    if let Some(a) = read_npy_as::<i32>(path)? {
        return from_values(name, a.shape(), DType::I32, a.iter().map(|&v| f64::from(v)).collect());
    }
    if let Some(a) = read_npy_as::<u8>(path)? {
        return from_values(name, a.shape(), DType::U8, a.iter().map(|&v| f64::from(v)).collect());
    }
    if let Some(a) = read_npy_as::<bool>(path)? {
        return from_values(
            name,
            a.shape(),
            DType::Bool,
            a.iter().map(|&v| f64::from(u8::from(v))).collect(),
        );
    }
    Err(RuntimeError::InputSource {
        name: name.to_owned(),
        detail: format!("cannot read '{}' as f32, f64, i64, i32, u8 or bool", path.display()),
    })
}

fn convert_dtype(dtype: safetensors::Dtype) -> Option<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Some(DType::F32),
        S::F16 => Some(DType::F16),
        S::BF16 => Some(DType::BF16),
        S::F64 => Some(DType::F64),
        S::I64 => Some(DType::I64),
        S::I32 => Some(DType::I32),
        S::I8 => Some(DType::I8),
        S::U8 => Some(DType::U8),
        S::BOOL => Some(DType::Bool),
        _ => None,
    }
}

fn load_safetensors(path: &Path, name: &str) -> Result<Tensor, RuntimeError> {
    let fail = |detail: String| RuntimeError::InputSource {
        name: name.to_owned(),
        detail,
    };
    let file = File::open(path)?;
    // SAFETY: the file is opened read-only and only read for the duration
    // of this call.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let st = safetensors::SafeTensors::deserialize(&mmap)
        .map_err(|e| fail(format!("SafeTensors parse error: {e}")))?;

    let view = match st.tensor(name) {
        Ok(view) => view,
        Err(_) => {
            let mut all = st.tensors();
            if all.len() != 1 {
                return Err(fail(format!(
                    "'{}' has no tensor named '{name}' and holds {} tensors",
                    path.display(),
                    all.len()
                )));
            }
            all.remove(0).1
        }
    };
    let dtype = convert_dtype(view.dtype())
        .ok_or_else(|| fail(format!("unsupported safetensors dtype {:?}", view.dtype())))?;
    Tensor::from_bytes(Shape::new(view.shape().to_vec()), dtype, view.data().to_vec())
        .map_err(|e| fail(e.to_string()))
}
