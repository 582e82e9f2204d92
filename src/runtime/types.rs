use serde::{Deserialize, Serialize};

use crate::flow::nodes::{AnswerType, NodeKind};
use crate::flow::types::FlowGraph;
use crate::flow::value::{interpolate, FlowValue, Variables};
use crate::state::{Session, SessionStatus};

/// 运行时类型定义

/// 停在问题节点时呈现给用户的提示
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub node_id: String,
    pub text: String,
    pub field: String,
    pub answer_type: AnswerType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

/// 单个动作的执行结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutput {
    Message {
        node_id: String,
        text: String,
    },
    Stored {
        node_id: String,
        keys: Vec<String>,
    },
    ApiResponse {
        node_id: String,
        status: u16,
        body: FlowValue,
    },
    Generated {
        node_id: String,
        text: String,
    },
    Redirect {
        node_id: String,
        target: String,
    },
}

impl ActionOutput {
    pub fn node_id(&self) -> &str {
        match self {
            ActionOutput::Message { node_id, .. }
            | ActionOutput::Stored { node_id, .. }
            | ActionOutput::ApiResponse { node_id, .. }
            | ActionOutput::Generated { node_id, .. }
            | ActionOutput::Redirect { node_id, .. } => node_id,
        }
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            ActionOutput::Redirect { target, .. } => Some(target),
            _ => None,
        }
    }

    /// 面向用户的文本（消息与生成结果）
    pub fn text(&self) -> Option<&str> {
        match self {
            ActionOutput::Message { text, .. } | ActionOutput::Generated { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }
}

/// 一次 step 之后的会话视图
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub session_id: String,
    pub current_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Prompt>,
    #[serde(default)]
    pub outputs: Vec<ActionOutput>,
    pub is_complete: bool,
    pub status: SessionStatus,
    #[serde(default)]
    pub variables: Variables,
}

impl StepResult {
    pub fn from_session(graph: &FlowGraph, session: &Session, outputs: Vec<ActionOutput>) -> Self {
        let prompt = if session.is_active() {
            graph
                .node(&session.current_node_id)
                .and_then(|node| match &node.kind {
                    NodeKind::Question(question) => Some(Prompt {
                        node_id: node.id.clone(),
                        text: question
                            .prompt
                            .as_deref()
                            .map(|template| interpolate(template, &session.variables))
                            .unwrap_or_else(|| question.field.clone()),
                        field: question.field.clone(),
                        answer_type: question.expected_answer_type,
                        choices: question.choices.clone(),
                    }),
                    _ => None,
                })
        } else {
            None
        };

        Self {
            session_id: session.id.clone(),
            current_node_id: session.current_node_id.clone(),
            prompt,
            outputs,
            is_complete: session.status == SessionStatus::Completed,
            status: session.status,
            variables: session.variables.clone(),
        }
    }
}
