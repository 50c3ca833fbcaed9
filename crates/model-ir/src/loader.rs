// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reading and writing graphs.
//!
//! A model on disk is:
//! - `<name>.json`: the graph document (see [`ModelFile`]).
//! - `<name>.json.data`: optional raw blob holding large tensor payloads,
//!   written when external data is enabled.
//!
//! The blob is memory-mapped on load so tensor bytes are copied straight
//! out of the page cache. Saves write temporary siblings first and rename
//! them into place, so a failed save never leaves a half-written model.

use crate::manifest::{
    AttributeFile, GraphFile, ModelFile, NodeFile, TensorData, TensorFile, FORMAT_TAG,
    FORMAT_VERSION,
};
use crate::{Attribute, Graph, ModelError, Node, OpKind};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tensor_core::{Shape, Tensor};

/// Options for [`save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// When set, tensors larger than this many bytes go to the external
    /// blob; `None` keeps everything inline.
    pub external_data_threshold: Option<usize>,
}

/// What [`save`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub model_bytes: u64,
    pub external_bytes: u64,
    pub external_tensors: usize,
}

/// Path of the external blob that accompanies `model_path`.
pub fn external_data_path(model_path: &Path) -> PathBuf {
    let mut name = model_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".data");
    model_path.with_file_name(name)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Loading ────────────────────────────────────────────────────────

/// Loads a graph from a model file.
///
/// # Errors
/// [`ModelError::Io`] / [`ModelError::Parse`] for unreadable documents,
/// [`ModelError::ExternalData`] for missing or truncated blobs,
/// [`ModelError::UnsupportedOp`] for unknown operators, and the graph
/// construction errors for inconsistent node definitions.
pub fn load(path: &Path) -> Result<Graph, ModelError> {
    let file = ModelFile::from_file(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut blobs = BlobCache::new(dir);
    let graph = build_graph(&file.graph, &mut blobs)?;
    graph.check()?;
    tracing::info!(path = %path.display(), "{}", graph.summary());
    Ok(graph)
}

/// Memory maps of the external blobs referenced by one model file.
struct BlobCache<'a> {
    dir: &'a Path,
    maps: HashMap<String, memmap2::Mmap>,
}

impl<'a> BlobCache<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            maps: HashMap::new(),
        }
    }

    fn read(&mut self, location: &str, offset: u64, length: u64) -> Result<Vec<u8>, ModelError> {
        if Path::new(location).components().count() != 1 {
            return Err(ModelError::ExternalData(format!(
                "location '{location}' must be a file next to the model"
            )));
        }
        if !self.maps.contains_key(location) {
            let path = self.dir.join(location);
            let file = File::open(&path).map_err(|e| {
                ModelError::ExternalData(format!("cannot open '{}': {e}", path.display()))
            })?;
            // SAFETY: the blob is opened read-only and only read during
            // this load; concurrent truncation by another process is
            // outside the supported contract.
            let mmap = unsafe { memmap2::Mmap::map(&file) }
                .map_err(|e| ModelError::ExternalData(format!("mmap failed: {e}")))?;
            self.maps.insert(location.to_owned(), mmap);
        }
        let map = self
            .maps
            .get(location)
            .ok_or_else(|| ModelError::ExternalData(format!("blob '{location}' not mapped")))?;

        let start = usize::try_from(offset)
            .map_err(|_| ModelError::ExternalData(format!("offset {offset} too large")))?;
        let len = usize::try_from(length)
            .map_err(|_| ModelError::ExternalData(format!("length {length} too large")))?;
        let end = start.checked_add(len).filter(|&e| e <= map.len()).ok_or_else(|| {
            ModelError::ExternalData(format!(
                "range {start}..{} exceeds '{location}' ({} bytes)",
                start.saturating_add(len),
                map.len()
            ))
        })?;
        Ok(map[start..end].to_vec())
    }
}

fn build_tensor(file: &TensorFile, blobs: &mut BlobCache<'_>) -> Result<Tensor, ModelError> {
    let bytes = match &file.data {
        TensorData::Inline { hex } => hex::decode(hex).map_err(|e| {
            ModelError::Parse(serde::de::Error::custom(format!(
                "tensor '{}' has invalid hex payload: {e}",
                file.name
            )))
        })?,
        TensorData::External {
            location,
            offset,
            length,
        } => blobs.read(location, *offset, *length)?,
    };
    Tensor::from_bytes(Shape::new(file.shape.clone()), file.dtype, bytes).map_err(|source| {
        ModelError::InvalidTensor {
            name: file.name.clone(),
            source,
        }
    })
}

fn build_graph(file: &GraphFile, blobs: &mut BlobCache<'_>) -> Result<Graph, ModelError> {
    let mut graph = Graph::new(file.name.clone());
    for name in &file.inputs {
        let info = file.value_info.get(name).cloned().unwrap_or_default();
        graph.add_input(name.clone(), info);
    }
    for (name, info) in &file.value_info {
        graph.set_value_info(name.clone(), info.clone());
    }
    for t in &file.initializers {
        let tensor = build_tensor(t, blobs)?;
        graph.add_initializer(t.name.clone(), tensor)?;
    }
    for n in &file.nodes {
        graph.add_node(build_node(n, blobs)?)?;
    }
    graph.set_outputs(file.outputs.clone());
    Ok(graph)
}

fn build_node(file: &NodeFile, blobs: &mut BlobCache<'_>) -> Result<Node, ModelError> {
    let op = OpKind::from_str_loose(&file.op).ok_or_else(|| ModelError::UnsupportedOp {
        op: file.op.clone(),
    })?;
    let mut node = Node::new(file.name.clone(), op, file.inputs.clone(), file.outputs.clone());
    for (key, attr) in &file.attributes {
        let value = match attr {
            AttributeFile::Int(v) => Attribute::Int(*v),
            AttributeFile::Float(v) => Attribute::Float(*v),
            AttributeFile::Ints(v) => Attribute::Ints(v.clone()),
            AttributeFile::Floats(v) => Attribute::Floats(v.clone()),
            AttributeFile::String(v) => Attribute::String(v.clone()),
            AttributeFile::Tensor(t) => Attribute::Tensor(build_tensor(t, blobs)?),
            AttributeFile::Graph(g) => Attribute::Graph(Box::new(build_graph(g, blobs)?)),
        };
        node.attributes.insert(key.clone(), value);
    }
    Ok(node)
}

// ── Saving ─────────────────────────────────────────────────────────

/// Appends externalised tensors to the blob being written.
struct BlobWriter {
    location: String,
    threshold: Option<usize>,
    out: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    offset: u64,
    tensors: usize,
}

impl BlobWriter {
    fn tensor_file(&mut self, name: &str, tensor: &Tensor) -> Result<TensorFile, ModelError> {
        let bytes = tensor.as_bytes();
        let external = self.threshold.is_some_and(|t| bytes.len() > t);
        let data = if external {
            if self.out.is_none() {
                self.out = Some(BufWriter::new(File::create(&self.tmp_path)?));
            }
            if let Some(out) = self.out.as_mut() {
                out.write_all(bytes)?;
            }
            let data = TensorData::External {
                location: self.location.clone(),
                offset: self.offset,
                length: bytes.len() as u64,
            };
            self.offset += bytes.len() as u64;
            self.tensors += 1;
            data
        } else {
            TensorData::Inline {
                hex: hex::encode(bytes),
            }
        };
        Ok(TensorFile {
            name: name.to_owned(),
            dtype: tensor.dtype(),
            shape: tensor.shape().dims().to_vec(),
            data,
        })
    }

    fn graph_file(&mut self, graph: &Graph) -> Result<GraphFile, ModelError> {
        let initializers = graph
            .initializers()
            .iter()
            .map(|(name, t)| self.tensor_file(name, t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut nodes = Vec::with_capacity(graph.num_nodes());
        let order = graph.topological_order()?;
        for id in order {
            let Some(node) = graph.node(id) else { continue };
            let mut attributes = std::collections::BTreeMap::new();
            for (key, attr) in &node.attributes {
                let value = match attr {
                    Attribute::Int(v) => AttributeFile::Int(*v),
                    Attribute::Float(v) => AttributeFile::Float(*v),
                    Attribute::Ints(v) => AttributeFile::Ints(v.clone()),
                    Attribute::Floats(v) => AttributeFile::Floats(v.clone()),
                    Attribute::String(v) => AttributeFile::String(v.clone()),
                    Attribute::Tensor(t) => AttributeFile::Tensor(self.tensor_file("", t)?),
                    Attribute::Graph(g) => AttributeFile::Graph(Box::new(self.graph_file(g)?)),
                };
                attributes.insert(key.clone(), value);
            }
            nodes.push(NodeFile {
                name: node.name.clone(),
                op: node.op.as_str().to_owned(),
                inputs: node.inputs.clone(),
                outputs: node.outputs.clone(),
                attributes,
            });
        }
        Ok(GraphFile {
            name: graph.name.clone(),
            inputs: graph.inputs().to_vec(),
            outputs: graph.outputs().to_vec(),
            value_info: graph.value_infos().clone(),
            initializers,
            nodes,
        })
    }
}

/// Writes `graph` to `path`, externalising large tensors if requested.
///
/// Nodes are written in topological order.
pub fn save(graph: &Graph, path: &Path, options: &SaveOptions) -> Result<SaveReport, ModelError> {
    let data_path = external_data_path(path);
    let location = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut blob = BlobWriter {
        location,
        threshold: options.external_data_threshold,
        out: None,
        tmp_path: temp_sibling(&data_path),
        offset: 0,
        tensors: 0,
    };

    let result = write_files(graph, path, &data_path, &mut blob);
    if result.is_err() {
        // Best effort: never leave temporaries behind.
        let _ = std::fs::remove_file(&blob.tmp_path);
        let _ = std::fs::remove_file(temp_sibling(path));
    }
    result
}

fn write_files(
    graph: &Graph,
    path: &Path,
    data_path: &Path,
    blob: &mut BlobWriter,
) -> Result<SaveReport, ModelError> {
    let doc = ModelFile {
        format: FORMAT_TAG.to_owned(),
        version: FORMAT_VERSION,
        graph: blob.graph_file(graph)?,
    };
    if let Some(mut out) = blob.out.take() {
        out.flush()?;
        out.get_ref().sync_all()?;
    }

    let tmp_model = temp_sibling(path);
    {
        let mut out = BufWriter::new(File::create(&tmp_model)?);
        serde_json::to_writer_pretty(&mut out, &doc)?;
        out.flush()?;
    }
    // The model is renamed last. A blob that no longer matches the model on
    // disk is removed rather than left beside it.
    if blob.tensors > 0 {
        std::fs::rename(&blob.tmp_path, data_path)?;
        if let Err(err) = std::fs::rename(&tmp_model, path) {
            let _ = std::fs::remove_file(data_path);
            return Err(err.into());
        }
    } else {
        std::fs::rename(&tmp_model, path)?;
        match std::fs::remove_file(data_path) {
            Ok(()) => tracing::debug!(path = %data_path.display(), "removed stale external data"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }

    let report = SaveReport {
        model_bytes: std::fs::metadata(path)?.len(),
        external_bytes: blob.offset,
        external_tensors: blob.tensors,
    };
    tracing::info!(
        path = %path.display(),
        model_bytes = report.model_bytes,
        external_bytes = report.external_bytes,
        external_tensors = report.external_tensors,
        "model saved"
    );
    Ok(report)
}
