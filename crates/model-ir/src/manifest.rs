// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON model file schema.
//!
//! A model file is a single JSON document. Tensor payloads are either
//! stored inline (hex-encoded little-endian bytes) or in a sibling raw
//! blob referenced by offset and length.
//!
//! # Format
//! ```json
//! {
//!   "format": "graph-slim",
//!   "version": 1,
//!   "graph": {
//!     "name": "resnet18",
//!     "inputs": ["input"],
//!     "outputs": ["output"],
//!     "value_info": { "input": { "dtype": "f32", "shape": ["N", 3, 224, 224] } },
//!     "initializers": [
//!       { "name": "fc.weight", "dtype": "f32", "shape": [1000, 512],
//!         "data": { "storage": "external", "location": "model.json.data",
//!                   "offset": 0, "length": 2048000 } }
//!     ],
//!     "nodes": [
//!       { "name": "/fc/Gemm", "op": "Gemm",
//!         "inputs": ["x", "fc.weight", "fc.bias"], "outputs": ["output"],
//!         "attributes": { "transB": { "type": "int", "value": 1 } } }
//!     ]
//!   }
//! }
//! ```

use crate::{ModelError, ValueInfo};
use std::collections::BTreeMap;
use std::path::Path;
use tensor_core::DType;

/// Value of the `format` field.
pub const FORMAT_TAG: &str = "graph-slim";

/// Current schema version.
pub const FORMAT_VERSION: u32 = 1;

/// Top-level model document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelFile {
    pub format: String,
    pub version: u32,
    pub graph: GraphFile,
}

/// Serialized graph (also used for nested `If` branches).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GraphFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub value_info: BTreeMap<String, ValueInfo>,
    #[serde(default)]
    pub initializers: Vec<TensorFile>,
    #[serde(default)]
    pub nodes: Vec<NodeFile>,
}

/// Serialized node. `op` stays a string here so an unknown operator is
/// reported as such rather than as a generic parse failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeFile {
    #[serde(default)]
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeFile>,
}

/// Serialized attribute value.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeFile {
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    String(String),
    Tensor(TensorFile),
    Graph(Box<GraphFile>),
}

/// Serialized tensor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TensorFile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

/// Where a tensor's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum TensorData {
    /// Hex-encoded little-endian bytes.
    Inline { hex: String },
    /// A byte range of a blob next to the model file.
    External {
        location: String,
        offset: u64,
        length: u64,
    },
}

impl ModelFile {
    /// Loads a model document from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a model document from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let file: Self = serde_json::from_str(json)?;
        file.validate()?;
        Ok(file)
    }

    /// Checks the format tag and version.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.format != FORMAT_TAG {
            return Err(ModelError::Parse(serde::de::Error::custom(format!(
                "unexpected format tag '{}'",
                self.format
            ))));
        }
        if self.version > FORMAT_VERSION {
            return Err(ModelError::Parse(serde::de::Error::custom(format!(
                "unsupported format version {}",
                self.version
            ))));
        }
        Ok(())
    }

    /// Returns `true` if any tensor (including nested ones) is stored
    /// externally.
    pub fn uses_external_data(&self) -> bool {
        fn graph_uses(g: &GraphFile) -> bool {
            g.initializers.iter().any(tensor_uses)
                || g.nodes
                    .iter()
                    .flat_map(|n| n.attributes.values())
                    .any(|a| match a {
                        AttributeFile::Tensor(t) => tensor_uses(t),
                        AttributeFile::Graph(g) => graph_uses(g),
                        _ => false,
                    })
        }
        fn tensor_uses(t: &TensorFile) -> bool {
            matches!(t.data, TensorData::External { .. })
        }
        graph_uses(&self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "format": "graph-slim",
            "version": 1,
            "graph": {
                "name": "tiny",
                "inputs": ["x"],
                "outputs": ["y"],
                "value_info": {
                    "x": { "dtype": "f32", "shape": ["N", 3, null] }
                },
                "initializers": [
                    { "name": "w", "dtype": "f32", "shape": [1],
                      "data": { "storage": "inline", "hex": "0000803f" } }
                ],
                "nodes": [
                    { "name": "mul", "op": "Mul", "inputs": ["x", "w"], "outputs": ["y"] },
                    { "name": "sm", "op": "Softmax", "inputs": ["y"], "outputs": ["z"],
                      "attributes": { "axis": { "type": "int", "value": -1 } } }
                ]
            }
        }"#
    }

    #[test]
    fn test_parse_model_file() {
        let m = ModelFile::from_json(sample_json()).unwrap();
        assert_eq!(m.graph.name, "tiny");
        assert_eq!(m.graph.nodes.len(), 2);
        assert_eq!(m.graph.initializers[0].dtype, DType::F32);
        assert!(!m.uses_external_data());
        let info = &m.graph.value_info["x"];
        let shape = info.shape.as_ref().unwrap();
        assert_eq!(shape.to_string(), "[N, 3, ?]");
    }

    #[test]
    fn test_attribute_tagging() {
        let m = ModelFile::from_json(sample_json()).unwrap();
        let attr = &m.graph.nodes[1].attributes["axis"];
        assert!(matches!(attr, AttributeFile::Int(-1)));
        let json = serde_json::to_string(attr).unwrap();
        assert_eq!(json, r#"{"type":"int","value":-1}"#);
    }

    #[test]
    fn test_reject_wrong_format() {
        let json = r#"{ "format": "other", "version": 1, "graph": {} }"#;
        assert!(ModelFile::from_json(json).is_err());
        let json = r#"{ "format": "graph-slim", "version": 99, "graph": {} }"#;
        assert!(ModelFile::from_json(json).is_err());
    }

    #[test]
    fn test_external_detection() {
        let mut m = ModelFile::from_json(sample_json()).unwrap();
        m.graph.initializers[0].data = TensorData::External {
            location: "m.json.data".into(),
            offset: 0,
            length: 4,
        };
        assert!(m.uses_external_data());
    }

    #[test]
    fn test_serde_roundtrip() {
        let m = ModelFile::from_json(sample_json()).unwrap();
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back = ModelFile::from_json(&json).unwrap();
        assert_eq!(back.graph.nodes.len(), m.graph.nodes.len());
        assert_eq!(back.graph.value_info, m.graph.value_info);
    }
}
