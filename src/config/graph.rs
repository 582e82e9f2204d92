use crate::error::{ConvoFlowError, Result};
use crate::flow::nodes::{ActionNode, ConditionNode, Node, NodeKind, QuestionNode};
use crate::flow::types::{Edge, FlowConfiguration, FlowGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// 对话流图的 JSON 文档形式
///
/// 节点数据按 `type` 字段区分，`data` 保持原始 JSON，转换为 [`FlowGraph`] 时再做类型化
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub flow_configuration: FlowConfiguration,
}

fn default_version() -> u32 {
    1
}

/// 统一的图节点定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    /// 节点唯一标识
    pub id: String,

    /// 节点类型: start, question, condition, action, end
    #[serde(rename = "type")]
    pub node_type: String,

    /// 节点数据,根据类型不同而不同
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// 展示属性，引擎不解释
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
}

impl GraphDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConvoFlowError::InvalidDocument(format!("failed to parse graph: {e}")))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            ConvoFlowError::InvalidDocument(format!("failed to parse graph value: {e}"))
        })
    }

    /// 根据 ID 获取节点
    pub fn get_node(&self, node_id: &str) -> Option<&NodeDocument> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn into_graph(self) -> Result<FlowGraph> {
        FlowGraph::try_from(self)
    }
}

impl NodeDocument {
    fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let data = if self.data.is_null() {
            Value::Object(Default::default())
        } else {
            self.data.clone()
        };
        serde_json::from_value(data).map_err(|e| {
            ConvoFlowError::InvalidDocument(format!(
                "node `{}` ({}) has malformed data: {e}",
                self.id, self.node_type
            ))
        })
    }
}

impl TryFrom<NodeDocument> for Node {
    type Error = ConvoFlowError;

    fn try_from(document: NodeDocument) -> Result<Self> {
        let kind = match document.node_type.as_str() {
            "start" => NodeKind::Start,
            "end" => NodeKind::End,
            "question" => NodeKind::Question(document.decode::<QuestionNode>()?),
            "condition" => NodeKind::Condition(document.decode::<ConditionNode>()?),
            "action" => NodeKind::Action(document.decode::<ActionNode>()?),
            other => {
                return Err(ConvoFlowError::InvalidDocument(format!(
                    "node `{}` has unknown type `{other}`",
                    document.id
                )))
            }
        };
        Ok(Node {
            id: document.id,
            kind,
            position: document.position,
            style: document.style,
        })
    }
}

impl From<Node> for NodeDocument {
    fn from(node: Node) -> Self {
        let node_type = node.node_type().as_str().to_string();
        let data = match &node.kind {
            NodeKind::Start | NodeKind::End => Value::Null,
            NodeKind::Question(question) => serde_json::to_value(question).unwrap_or_default(),
            NodeKind::Condition(condition) => serde_json::to_value(condition).unwrap_or_default(),
            NodeKind::Action(action) => serde_json::to_value(action).unwrap_or_default(),
        };
        NodeDocument {
            id: node.id,
            node_type,
            data,
            position: node.position,
            style: node.style,
        }
    }
}

impl TryFrom<GraphDocument> for FlowGraph {
    type Error = ConvoFlowError;

    fn try_from(document: GraphDocument) -> Result<Self> {
        let nodes = document
            .nodes
            .into_iter()
            .map(Node::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(FlowGraph::new(
            document.id,
            document.version,
            nodes,
            document.edges,
            document.flow_configuration,
        ))
    }
}

impl From<FlowGraph> for GraphDocument {
    fn from(graph: FlowGraph) -> Self {
        GraphDocument {
            id: graph.id,
            version: graph.version,
            nodes: graph.nodes.into_iter().map(NodeDocument::from).collect(),
            edges: graph.edges,
            flow_configuration: graph.configuration,
        }
    }
}

/// 从 JSON 字符串加载类型化的流图
pub fn load_graph_from_str(json: &str) -> Result<FlowGraph> {
    GraphDocument::from_json(json)?.into_graph()
}

pub fn load_graph_from_value(value: Value) -> Result<FlowGraph> {
    GraphDocument::from_value(value)?.into_graph()
}

pub fn load_graph_from_file(path: impl AsRef<Path>) -> Result<FlowGraph> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConvoFlowError::InvalidDocument(format!("failed to read `{}`: {e}", path.display()))
    })?;
    load_graph_from_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::nodes::{ActionType, AnswerType, ConditionOperator};
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "id": "onboarding",
            "version": 3,
            "nodes": [
                {"id": "start", "type": "start", "position": {"x": 0, "y": 0}},
                {"id": "ask_age", "type": "question", "data": {
                    "field": "age", "expectedAnswerType": "number", "question": "How old are you?"
                }},
                {"id": "check", "type": "condition", "data": {
                    "conditions": [{"field": "age", "operator": "greater_than", "value": 18}]
                }},
                {"id": "notify", "type": "action", "data": {
                    "actions": [{"type": "teleport", "parameters": {"to": "mars"}}]
                }},
                {"id": "done", "type": "end"}
            ],
            "edges": [
                {"id": "e1", "source": "start", "target": "ask_age", "animated": true}
            ],
            "flowConfiguration": {
                "startNodeId": "start",
                "endNodeIds": ["done"],
                "variables": [{"name": "age", "type": "number"}]
            }
        })
    }

    #[test]
    fn typed_nodes_are_decoded_from_document() {
        let graph = load_graph_from_value(sample()).expect("document should load");
        assert_eq!(graph.version, 3);
        match &graph.node("ask_age").unwrap().kind {
            NodeKind::Question(question) => {
                assert_eq!(question.field, "age");
                assert_eq!(question.expected_answer_type, AnswerType::Number);
                assert_eq!(question.prompt.as_deref(), Some("How old are you?"));
            }
            other => panic!("expected question, got {other:?}"),
        }
        match &graph.node("check").unwrap().kind {
            NodeKind::Condition(condition) => {
                assert_eq!(condition.conditions[0].operator, ConditionOperator::GreaterThan);
            }
            other => panic!("expected condition, got {other:?}"),
        }
        match &graph.node("notify").unwrap().kind {
            NodeKind::Action(action) => assert_eq!(
                action.actions[0].action_type,
                ActionType::Unknown("teleport".into())
            ),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn unknown_node_type_is_a_document_error() {
        let mut doc = sample();
        doc["nodes"][4]["type"] = json!("portal");
        let error = load_graph_from_value(doc).unwrap_err();
        assert!(matches!(error, ConvoFlowError::InvalidDocument(_)));
    }

    #[test]
    fn graph_serializes_back_to_document_shape() {
        let graph = load_graph_from_value(sample()).unwrap();
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["nodes"][1]["type"], "question");
        assert_eq!(value["nodes"][1]["data"]["expectedAnswerType"], "number");
        assert_eq!(value["nodes"][0]["position"]["x"], 0);
        assert_eq!(value["flowConfiguration"]["startNodeId"], "start");
        let reparsed: FlowGraph = serde_json::from_value(value).unwrap();
        assert_eq!(reparsed, graph);
    }
}
