use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::graph::GraphDocument;
use crate::flow::nodes::{Node, NodeType, DEFAULT_EDGE_LABEL};
use crate::flow::value::FlowValue;

/// Flow 核心类型定义

/// 已编写的对话流图，节点按 id 建立索引
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct FlowGraph {
    pub id: String,
    pub version: u32,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub configuration: FlowConfiguration,
    index: HashMap<String, usize>,
}

impl FlowGraph {
    pub fn new(
        id: impl Into<String>,
        version: u32,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        configuration: FlowConfiguration,
    ) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(position);
        }
        Self {
            id: id.into(),
            version,
            nodes,
            edges,
            configuration,
            index,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        // nodes 是公开字段，索引可能已过期
        self.index
            .get(id)
            .and_then(|&position| self.nodes.get(position))
            .filter(|node| node.id == id)
            .or_else(|| self.nodes.iter().find(|node| node.id == id))
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// 从指定节点出发的边，保持编写顺序
    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Edge> + '_ {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |edge| edge.source == node_id)
    }

    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &Edge> + '_ {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |edge| edge.target == node_id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .iter()
            .filter(move |node| node.node_type() == node_type)
    }

    pub fn variables(&self) -> &[FlowVariable] {
        &self.configuration.variables
    }

    pub fn variable(&self, name: &str) -> Option<&FlowVariable> {
        self.configuration
            .variables
            .iter()
            .find(|variable| variable.name == name)
    }

    pub fn is_end_node(&self, id: &str) -> bool {
        self.configuration.end_node_ids.iter().any(|end| end == id)
    }
}

/// 图上的有向边
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
            animated: None,
            style: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_default(&self) -> bool {
        self.label.as_deref() == Some(DEFAULT_EDGE_LABEL)
    }
}

/// 流程级配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfiguration {
    pub start_node_id: String,
    #[serde(default)]
    pub end_node_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<FlowVariable>,
}

/// 声明的流程变量
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVariable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub variable_type: VariableType,
    #[serde(default)]
    pub default_value: FlowValue,
}

impl FlowVariable {
    pub fn new(name: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            name: name.into(),
            variable_type,
            default_value: FlowValue::Null,
        }
    }

    pub fn with_default(mut self, value: impl Into<FlowValue>) -> Self {
        self.default_value = value.into();
        self
    }
}

/// 变量类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[serde(alias = "string")]
    Text,
    Number,
    Boolean,
    List,
    Map,
    #[default]
    Any,
}
