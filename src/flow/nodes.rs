use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::flow::value::FlowValue;

/// Flow 节点类型定义

/// 条件边上保留的兜底标签
pub const DEFAULT_EDGE_LABEL: &str = "default";

/// 选项数量上限
pub const MAX_CHOICES: usize = 20;

/// Flow 节点
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub position: Option<Value>,
    pub style: Option<Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: None,
            style: None,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// 节点类型标签
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Question,
    Condition,
    Action,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Question => "question",
            NodeType::Condition => "condition",
            NodeType::Action => "action",
            NodeType::End => "end",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点类型及其数据
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Start,
    Question(QuestionNode),
    Condition(ConditionNode),
    Action(ActionNode),
    End,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start => NodeType::Start,
            NodeKind::Question(_) => NodeType::Question,
            NodeKind::Condition(_) => NodeType::Condition,
            NodeKind::Action(_) => NodeType::Action,
            NodeKind::End => NodeType::End,
        }
    }
}

/// 问题节点
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionNode {
    pub field: String,
    pub expected_answer_type: AnswerType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, alias = "question", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// 期望的回答类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    Text,
    Number,
    Boolean,
    Choice,
    Email,
    Phone,
}

impl AnswerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerType::Text => "text",
            AnswerType::Number => "number",
            AnswerType::Boolean => "boolean",
            AnswerType::Choice => "choice",
            AnswerType::Email => "email",
            AnswerType::Phone => "phone",
        }
    }
}

/// 条件节点
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionNode {
    /// 第 `index` 个条件对应的分支键：有 label 用 label，否则用下标
    pub fn branch_key(&self, index: usize) -> Option<String> {
        self.conditions.get(index).map(|condition| {
            condition
                .label
                .clone()
                .unwrap_or_else(|| index.to_string())
        })
    }
}

/// 单个条件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: FlowValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: FlowValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// 条件运算符
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    Complete,
}

/// 动作节点
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// 参数表
pub type Parameters = BTreeMap<String, FlowValue>;

/// 单个动作
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            parameters: Parameters::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<FlowValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(FlowValue::as_str)
    }
}

/// 动作类型；未知名称保留下来交给校验器与引擎报告
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    SendMessage,
    StoreData,
    ApiCall,
    GenerateResponse,
    Redirect,
    Unknown(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::SendMessage => "send_message",
            ActionType::StoreData => "store_data",
            ActionType::ApiCall => "api_call",
            ActionType::GenerateResponse => "generate_response",
            ActionType::Redirect => "redirect",
            ActionType::Unknown(name) => name,
        }
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "send_message" => ActionType::SendMessage,
            "store_data" => ActionType::StoreData,
            "api_call" => ActionType::ApiCall,
            "generate_response" => ActionType::GenerateResponse,
            "redirect" => ActionType::Redirect,
            _ => ActionType::Unknown(value),
        }
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
