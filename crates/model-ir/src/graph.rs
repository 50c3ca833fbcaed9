// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The graph: a node arena plus the tensors flowing between nodes.
//!
//! # Ownership
//!
//! A [`Graph`] exclusively owns its nodes, initializers and declared value
//! types. Nodes live in an arena addressed by [`NodeId`]; removing a node
//! leaves a hole so other handles stay valid. Tensors are addressed by
//! name.
//!
//! # Topology
//!
//! Producer/consumer lookups and the topological order come from a
//! [`TopologyIndex`] cached in a `OnceLock`. Every structural mutation drops
//! the cache and the next query rebuilds it.

use crate::topology::{Producer, TopologyIndex};
use crate::{ModelError, Node, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use tensor_core::{DType, DynShape, Tensor};

/// Declared element type and shape of a tensor. Either may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValueInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DType>,
    /// `None` means the rank itself is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<DynShape>,
}

impl ValueInfo {
    pub fn new(dtype: DType, shape: Option<DynShape>) -> Self {
        Self {
            dtype: Some(dtype),
            shape,
        }
    }

    /// Value info describing a concrete tensor.
    pub fn of_tensor(tensor: &Tensor) -> Self {
        Self {
            dtype: Some(tensor.dtype()),
            shape: Some(DynShape::from(tensor.shape())),
        }
    }
}

impl fmt::Display for ValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dtype {
            Some(d) => write!(f, "{d}")?,
            None => f.write_str("?")?,
        }
        match &self.shape {
            Some(s) => write!(f, "{s}"),
            None => f.write_str("[*]"),
        }
    }
}

/// A static computation graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    nodes: Vec<Option<Node>>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    values: BTreeMap<String, ValueInfo>,
    initializers: BTreeMap<String, Tensor>,
    topology: OnceLock<TopologyIndex>,
}

/// Structural equality: live nodes are compared independently of their
/// arena slots, so a graph equals its saved-and-reloaded copy.
impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.values == other.values
            && self.initializers == other.initializers
            && self.num_nodes() == other.num_nodes()
            && self.sorted_nodes() == other.sorted_nodes()
    }
}

impl Graph {
    /// Creates an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn invalidate(&mut self) {
        self.topology.take();
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Iterates over live nodes in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
    }

    fn sorted_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes().map(|(_, n)| n).collect();
        nodes.sort_by(|a, b| (&a.name, &a.outputs).cmp(&(&b.name, &b.outputs)));
        nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access to a node. Drops the cached topology because the
    /// caller may rewire inputs or outputs.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.invalidate();
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Finds a node by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, n)| n.name == name)
            .map(|(id, _)| id)
    }

    /// Appends a node.
    ///
    /// # Errors
    /// [`ModelError::DuplicateTensor`] if one of its outputs is already a
    /// node output, graph input or initializer.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, ModelError> {
        let mut fresh = HashSet::new();
        for out in node.outputs.iter().filter(|o| !o.is_empty()) {
            if !fresh.insert(out.as_str()) || self.defines(out) {
                return Err(ModelError::DuplicateTensor { name: out.clone() });
            }
        }
        self.nodes.push(Some(node));
        self.invalidate();
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Removes a node and returns it.
    ///
    /// # Errors
    /// [`ModelError::DanglingReference`] if another node or a graph output
    /// still uses one of its outputs.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, ModelError> {
        let node = self.node(id).ok_or(ModelError::UnknownNode(id.0))?;
        for out in node.outputs.iter().filter(|o| !o.is_empty()) {
            if let Some(&user) = self.consumers(out).iter().find(|&&c| c != id) {
                let consumer = self
                    .node(user)
                    .map(|n| format!("node '{}'", n.name))
                    .unwrap_or_else(|| user.to_string());
                return Err(ModelError::DanglingReference {
                    node: node.name.clone(),
                    tensor: out.clone(),
                    consumer,
                });
            }
            if self.is_output(out) {
                return Err(ModelError::DanglingReference {
                    node: node.name.clone(),
                    tensor: out.clone(),
                    consumer: "the graph outputs".into(),
                });
            }
        }
        self.invalidate();
        self.nodes[id.0].take().ok_or(ModelError::UnknownNode(id.0))
    }

    /// Replaces the nodes `remove` with `nodes` and `constants` as a single
    /// edit. Returns the ids of the added nodes.
    ///
    /// A tensor produced by a removed node may keep its users only if one of
    /// the added nodes or constants defines it again.
    ///
    /// # Errors
    /// [`ModelError::UnknownNode`] for a dead id,
    /// [`ModelError::DuplicateTensor`] when an added name is defined outside
    /// the removed nodes, and [`ModelError::DanglingReference`] when a
    /// removed output is still used but not redefined. Nothing changes on
    /// error.
    pub fn replace_nodes(
        &mut self,
        remove: &[NodeId],
        nodes: Vec<Node>,
        constants: Vec<(String, Tensor)>,
    ) -> Result<Vec<NodeId>, ModelError> {
        let removed: HashSet<NodeId> = remove.iter().copied().collect();
        let mut released: HashMap<&str, &Node> = HashMap::new();
        for &id in remove {
            let node = self.node(id).ok_or(ModelError::UnknownNode(id.0))?;
            for out in node.outputs.iter().filter(|o| !o.is_empty()) {
                released.insert(out.as_str(), node);
            }
        }

        let mut fresh = HashSet::new();
        let added = nodes
            .iter()
            .flat_map(|n| n.outputs.iter().filter(|o| !o.is_empty()))
            .chain(constants.iter().map(|(name, _)| name));
        for name in added {
            let clashes = self.defines(name) && !released.contains_key(name.as_str());
            if !fresh.insert(name.as_str()) || clashes {
                return Err(ModelError::DuplicateTensor { name: name.clone() });
            }
        }

        for (&tensor, node) in &released {
            if fresh.contains(tensor) {
                continue;
            }
            let consumer = if self.is_output(tensor) {
                Some("the graph outputs".to_string())
            } else {
                self.consumers(tensor)
                    .iter()
                    .find(|&&c| !removed.contains(&c))
                    .map(|&c| match self.node(c) {
                        Some(n) => format!("node '{}'", n.name),
                        None => c.to_string(),
                    })
            };
            if let Some(consumer) = consumer {
                return Err(ModelError::DanglingReference {
                    node: node.name.clone(),
                    tensor: tensor.to_owned(),
                    consumer,
                });
            }
        }

        for id in remove {
            self.nodes[id.0] = None;
        }
        for (name, tensor) in constants {
            self.values.insert(name.clone(), ValueInfo::of_tensor(&tensor));
            self.initializers.insert(name, tensor);
        }
        let first = self.nodes.len();
        self.nodes.extend(nodes.into_iter().map(Some));
        self.invalidate();
        Ok((first..self.nodes.len()).map(NodeId).collect())
    }

    // ── Inputs / outputs ───────────────────────────────────────────

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn set_inputs(&mut self, inputs: Vec<String>) {
        self.inputs = inputs;
        self.invalidate();
    }

    pub fn set_outputs(&mut self, outputs: Vec<String>) {
        self.outputs = outputs;
        self.invalidate();
    }

    /// Declares a new graph input with its value info.
    pub fn add_input(&mut self, name: impl Into<String>, info: ValueInfo) {
        let name = name.into();
        self.values.insert(name.clone(), info);
        if !self.inputs.contains(&name) {
            self.inputs.push(name);
        }
        self.invalidate();
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    // ── Initializers ───────────────────────────────────────────────

    pub fn initializers(&self) -> &BTreeMap<String, Tensor> {
        &self.initializers
    }

    pub fn initializer(&self, name: &str) -> Option<&Tensor> {
        self.initializers.get(name)
    }

    /// Adds or replaces a constant tensor and records its value info.
    ///
    /// # Errors
    /// [`ModelError::DuplicateTensor`] if a node already produces `name`.
    pub fn add_initializer(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<(), ModelError> {
        let name = name.into();
        if self.produced_by_node(&name) {
            return Err(ModelError::DuplicateTensor { name });
        }
        self.values.insert(name.clone(), ValueInfo::of_tensor(&tensor));
        let existed = self.initializers.insert(name, tensor).is_some();
        if !existed {
            self.invalidate();
        }
        Ok(())
    }

    pub fn remove_initializer(&mut self, name: &str) -> Option<Tensor> {
        let removed = self.initializers.remove(name);
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    /// `true` when `name` is an initializer that is not overridable as a
    /// graph input.
    pub fn is_constant(&self, name: &str) -> bool {
        self.initializers.contains_key(name) && !self.is_input(name)
    }

    /// The constant value of `name`, if it is one.
    pub fn constant(&self, name: &str) -> Option<&Tensor> {
        if self.is_input(name) {
            None
        } else {
            self.initializers.get(name)
        }
    }

    /// Total payload size of all initializers.
    pub fn initializer_bytes(&self) -> usize {
        self.initializers.values().map(Tensor::size_bytes).sum()
    }

    // ── Value info ─────────────────────────────────────────────────

    pub fn value_info(&self, name: &str) -> Option<&ValueInfo> {
        self.values.get(name)
    }

    pub fn set_value_info(&mut self, name: impl Into<String>, info: ValueInfo) {
        self.values.insert(name.into(), info);
    }

    pub fn remove_value_info(&mut self, name: &str) -> Option<ValueInfo> {
        self.values.remove(name)
    }

    pub fn value_infos(&self) -> &BTreeMap<String, ValueInfo> {
        &self.values
    }

    /// Element type of `name` from its initializer or declared value info.
    pub fn dtype_of(&self, name: &str) -> Option<DType> {
        self.initializers
            .get(name)
            .map(Tensor::dtype)
            .or_else(|| self.values.get(name).and_then(|v| v.dtype))
    }

    /// Shape of `name` from its initializer or declared value info.
    pub fn shape_of(&self, name: &str) -> Option<DynShape> {
        self.initializers
            .get(name)
            .map(|t| DynShape::from(t.shape()))
            .or_else(|| self.values.get(name).and_then(|v| v.shape.clone()))
    }

    // ── Renaming ───────────────────────────────────────────────────

    /// Rebinds every use of `old` to `new`: node inputs, references from
    /// nested sub-graphs, and graph outputs. Producers are left alone.
    pub fn replace_tensor_uses(&mut self, old: &str, new: &str) {
        for node in self.nodes.iter_mut().flatten() {
            for input in node.inputs.iter_mut().filter(|i| i.as_str() == old) {
                *input = new.to_owned();
            }
            for sub in node.subgraphs_mut() {
                sub.replace_outer_ref(old, new);
            }
        }
        for output in self.outputs.iter_mut().filter(|o| o.as_str() == old) {
            *output = new.to_owned();
        }
        self.invalidate();
    }

    fn replace_outer_ref(&mut self, old: &str, new: &str) {
        if self.defines(old) {
            return;
        }
        self.replace_tensor_uses(old, new);
    }

    /// Renames a tensor everywhere, including its producer and value info.
    ///
    /// # Errors
    /// [`ModelError::UnknownTensor`] if `old` is not defined and
    /// [`ModelError::DuplicateTensor`] if `new` already is.
    pub fn rename_tensor(&mut self, old: &str, new: &str) -> Result<(), ModelError> {
        if old == new {
            return Ok(());
        }
        if !self.defines(old) {
            return Err(ModelError::UnknownTensor { name: old.into() });
        }
        if self.defines(new) {
            return Err(ModelError::DuplicateTensor { name: new.into() });
        }
        for node in self.nodes.iter_mut().flatten() {
            for out in node.outputs.iter_mut().filter(|o| o.as_str() == old) {
                *out = new.to_owned();
            }
        }
        for input in self.inputs.iter_mut().filter(|i| i.as_str() == old) {
            *input = new.to_owned();
        }
        if let Some(t) = self.initializers.remove(old) {
            self.initializers.insert(new.to_owned(), t);
        }
        if let Some(info) = self.values.remove(old) {
            self.values.insert(new.to_owned(), info);
        }
        self.replace_tensor_uses(old, new);
        Ok(())
    }

    // ── Topology ───────────────────────────────────────────────────

    /// The cached topology index, rebuilt if a mutation dropped it.
    pub fn topology(&self) -> &TopologyIndex {
        self.topology.get_or_init(|| TopologyIndex::build(self))
    }

    /// Nodes in dependency order.
    ///
    /// # Errors
    /// [`ModelError::Cycle`] naming a node on the cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, ModelError> {
        self.topology()
            .order()
            .map(<[NodeId]>::to_vec)
            .map_err(|node| ModelError::Cycle { node: node.into() })
    }

    pub fn producer(&self, name: &str) -> Option<Producer> {
        self.topology().producer(name)
    }

    pub fn consumers(&self, name: &str) -> &[NodeId] {
        self.topology().consumers(name)
    }

    /// The node producing `name`, if any.
    pub fn producer_node(&self, name: &str) -> Option<(NodeId, &Node)> {
        match self.producer(name)? {
            Producer::Node { id, .. } => self.node(id).map(|n| (id, n)),
            _ => None,
        }
    }

    /// `true` when `name` is a graph input, an initializer or a node output.
    pub fn defines(&self, name: &str) -> bool {
        self.is_input(name) || self.initializers.contains_key(name) || self.produced_by_node(name)
    }

    fn produced_by_node(&self, name: &str) -> bool {
        match self.topology.get() {
            Some(index) => matches!(index.producer(name), Some(Producer::Node { .. })),
            None => self.nodes().any(|(_, n)| n.outputs.iter().any(|o| o == name)),
        }
    }

    /// Checks that every consumed name and every graph output is defined
    /// and that the graph is acyclic.
    pub fn check(&self) -> Result<(), ModelError> {
        for (_, node) in self.nodes() {
            for name in node.present_inputs() {
                if !self.defines(name) {
                    return Err(ModelError::UnknownTensor { name: name.into() });
                }
            }
        }
        for name in &self.outputs {
            if !self.defines(name) {
                return Err(ModelError::UnknownTensor { name: name.clone() });
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Drops initializers nothing consumes and value infos for names that
    /// no longer appear anywhere. Returns how many entries were removed.
    pub fn prune_unused_values(&mut self) -> usize {
        let mut used: HashSet<String> = self.outputs.iter().cloned().collect();
        let mut live: HashSet<String> = self.inputs.iter().cloned().collect();
        for (_, node) in self.nodes() {
            used.extend(node.present_inputs().map(str::to_owned));
            used.extend(node.implicit_inputs());
            live.extend(node.outputs.iter().cloned());
        }

        let before = self.initializers.len() + self.values.len();
        let inputs = &self.inputs;
        self.initializers
            .retain(|name, _| used.contains(name) || inputs.contains(name));
        let initializers = &self.initializers;
        self.values.retain(|name, _| {
            used.contains(name) || live.contains(name) || initializers.contains_key(name)
        });
        let removed = before - (self.initializers.len() + self.values.len());
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    /// Returns `base` or `base_<n>`, whichever is the first name not used
    /// by any tensor or value info.
    pub fn unique_name(&self, base: &str) -> String {
        let taken = |n: &str| self.defines(n) || self.values.contains_key(n);
        if !taken(base) {
            return base.to_owned();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !taken(n))
            .unwrap_or_else(|| base.to_owned())
    }

    /// Collects names used inside this graph (or its own sub-graphs) that
    /// it does not define.
    pub(crate) fn collect_outer_refs(&self, out: &mut BTreeSet<String>) {
        for (_, node) in self.nodes() {
            for name in node.present_inputs() {
                if !self.defines(name) {
                    out.insert(name.to_owned());
                }
            }
            for name in node.implicit_inputs() {
                if !self.defines(&name) {
                    out.insert(name);
                }
            }
        }
        for name in &self.outputs {
            if !self.defines(name) {
                out.insert(name.clone());
            }
        }
    }

    /// One-line description used in logs.
    pub fn summary(&self) -> String {
        format!(
            "Graph '{}': {} nodes, {} initializers ({:.2} MB), {} inputs, {} outputs",
            self.name,
            self.num_nodes(),
            self.initializers.len(),
            self.initializer_bytes() as f64 / (1024.0 * 1024.0),
            self.inputs.len(),
            self.outputs.len(),
        )
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for (id, node) in self.nodes() {
            writeln!(
                f,
                "  {id} {} {}({}) -> {}",
                node.name,
                node.op,
                node.inputs.join(", "),
                node.outputs.join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attribute, OpKind};
    use tensor_core::Shape;

    fn s(v: &str) -> String {
        v.to_string()
    }

    /// x -> Relu -> a -> Neg -> b (output)
    fn chain() -> Graph {
        let mut g = Graph::new("chain");
        g.add_input("x", ValueInfo::new(DType::F32, Some(DynShape::fixed(&[2]))));
        g.add_node(Node::new("relu", OpKind::Relu, vec![s("x")], vec![s("a")]))
            .unwrap();
        g.add_node(Node::new("neg", OpKind::Neg, vec![s("a")], vec![s("b")]))
            .unwrap();
        g.set_outputs(vec![s("b")]);
        g
    }

    #[test]
    fn test_producer_and_consumers() {
        let g = chain();
        let relu = g.find_node("relu").unwrap();
        let neg = g.find_node("neg").unwrap();
        assert_eq!(g.producer("x"), Some(Producer::GraphInput));
        assert_eq!(g.producer("a"), Some(Producer::Node { id: relu, output: 0 }));
        assert_eq!(g.consumers("a"), &[neg]);
        assert!(g.consumers("b").is_empty());
        assert!(g.producer("nope").is_none());
    }

    #[test]
    fn test_topological_order_independent_of_insertion() {
        let mut g = Graph::new("rev");
        g.add_input("x", ValueInfo::default());
        g.add_node(Node::new("second", OpKind::Neg, vec![s("a")], vec![s("b")]))
            .unwrap();
        g.add_node(Node::new("first", OpKind::Relu, vec![s("x")], vec![s("a")]))
            .unwrap();
        let order = g.topological_order().unwrap();
        let names: Vec<_> = order.iter().map(|&id| g.node(id).unwrap().name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = Graph::new("cyc");
        g.add_node(Node::new("a", OpKind::Relu, vec![s("q")], vec![s("p")]))
            .unwrap();
        g.add_node(Node::new("b", OpKind::Relu, vec![s("p")], vec![s("q")]))
            .unwrap();
        assert!(matches!(g.topological_order(), Err(ModelError::Cycle { .. })));
    }

    #[test]
    fn test_add_node_duplicate_output() {
        let mut g = chain();
        let err = g
            .add_node(Node::new("dup", OpKind::Relu, vec![s("x")], vec![s("a")]))
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateTensor { name } if name == "a"));
        let err = g
            .add_node(Node::new("shadow", OpKind::Relu, vec![s("a")], vec![s("x")]))
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateTensor { .. }));
    }

    #[test]
    fn test_remove_node_dangling() {
        let mut g = chain();
        let relu = g.find_node("relu").unwrap();
        assert!(matches!(
            g.remove_node(relu),
            Err(ModelError::DanglingReference { .. })
        ));
        let neg = g.find_node("neg").unwrap();
        // "b" is a graph output.
        assert!(g.remove_node(neg).is_err());
        g.set_outputs(vec![s("a")]);
        let removed = g.remove_node(neg).unwrap();
        assert_eq!(removed.name, "neg");
        assert_eq!(g.num_nodes(), 1);
        assert!(g.node(neg).is_none());
        // The surviving handle still resolves.
        assert_eq!(g.node(relu).unwrap().name, "relu");
    }

    #[test]
    fn test_replace_nodes_as_one_edit() {
        let mut g = chain();
        let relu = g.find_node("relu").unwrap();
        let neg = g.find_node("neg").unwrap();
        // Both nodes collapse into one producing the same output.
        let ids = g
            .replace_nodes(
                &[relu, neg],
                vec![Node::new("fused", OpKind::Abs, vec![s("x")], vec![s("b")])],
                vec![],
            )
            .unwrap();
        assert_eq!(g.num_nodes(), 1);
        assert_eq!(g.producer("b"), Some(Producer::Node { id: ids[0], output: 0 }));
        assert!(g.node(relu).is_none());

        // A constant can stand in for a removed output.
        let mut g = chain();
        let relu = g.find_node("relu").unwrap();
        g.replace_nodes(&[relu], vec![], vec![(s("a"), Tensor::scalar(DType::F32, 1.0))])
            .unwrap();
        assert_eq!(g.producer("a"), Some(Producer::Initializer));
        g.check().unwrap();
    }

    #[test]
    fn test_replace_nodes_rejects_dangling() {
        let mut g = chain();
        let relu = g.find_node("relu").unwrap();
        let before = g.clone();
        assert!(matches!(
            g.replace_nodes(&[relu], vec![], vec![]),
            Err(ModelError::DanglingReference { consumer, .. }) if consumer == "node 'neg'"
        ));
        let clash = Node::new("clash", OpKind::Relu, vec![s("x")], vec![s("b")]);
        assert!(matches!(
            g.replace_nodes(&[relu], vec![clash], vec![]),
            Err(ModelError::DuplicateTensor { .. })
        ));
        assert_eq!(g, before);
    }

    #[test]
    fn test_replace_tensor_uses_rewires_outputs() {
        let mut g = chain();
        let neg = g.find_node("neg").unwrap();
        g.replace_tensor_uses("b", "a");
        assert_eq!(g.outputs(), &[s("a")]);
        g.remove_node(neg).unwrap();
        assert!(g.check().is_ok());
    }

    #[test]
    fn test_rename_tensor() {
        let mut g = chain();
        g.set_value_info("a", ValueInfo::new(DType::F32, None));
        g.rename_tensor("a", "renamed").unwrap();
        let neg = g.find_node("neg").unwrap();
        assert_eq!(g.node(neg).unwrap().inputs, vec![s("renamed")]);
        assert!(g.value_info("renamed").is_some());
        assert!(g.value_info("a").is_none());
        assert!(matches!(
            g.rename_tensor("renamed", "x"),
            Err(ModelError::DuplicateTensor { .. })
        ));
        assert!(matches!(
            g.rename_tensor("ghost", "y"),
            Err(ModelError::UnknownTensor { .. })
        ));
    }

    #[test]
    fn test_initializers_and_prune() {
        let mut g = chain();
        let w = Tensor::from_f32(Shape::vector(2), &[1.0, 2.0]).unwrap();
        g.add_initializer("w", w.clone()).unwrap();
        g.add_initializer("unused", w).unwrap();
        let relu = g.find_node("relu").unwrap();
        g.node_mut(relu).unwrap().inputs.push(s("w"));
        assert!(g.is_constant("w"));
        assert_eq!(g.initializer_bytes(), 16);

        let removed = g.prune_unused_values();
        assert!(removed >= 1);
        assert!(g.initializer("unused").is_none());
        assert!(g.initializer("w").is_some());
        assert!(matches!(
            g.add_initializer("a", Tensor::scalar(DType::F32, 0.0)),
            Err(ModelError::DuplicateTensor { .. })
        ));
    }

    #[test]
    fn test_implicit_consumer_is_indexed() {
        let mut g = chain();
        let mut branch = Graph::new("then");
        branch
            .add_node(Node::new("inner", OpKind::Identity, vec![s("a")], vec![s("t")]))
            .unwrap();
        branch.set_outputs(vec![s("t")]);
        let if_id = g
            .add_node(
                Node::new("if", OpKind::If, vec![s("x")], vec![s("y")])
                    .with_attr("then_branch", Attribute::Graph(Box::new(branch))),
            )
            .unwrap();
        assert!(g.consumers("a").contains(&if_id));

        // Rewiring reaches into the branch.
        g.replace_tensor_uses("a", "x");
        let inner = g.node(if_id).unwrap().attr_graph("then_branch").unwrap();
        let (_, n) = inner.nodes().next().unwrap();
        assert_eq!(n.inputs, vec![s("x")]);
    }

    #[test]
    fn test_unique_name() {
        let g = chain();
        assert_eq!(g.unique_name("fresh"), "fresh");
        assert_eq!(g.unique_name("a"), "a_1");
    }
}
