use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::flow::types::FlowGraph;
use crate::flow::value::{FlowValue, Variables};

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => f.write_str("active"),
            SessionStatus::Completed => f.write_str("completed"),
            SessionStatus::Failed => f.write_str("failed"),
        }
    }
}

/// 会话历史中的一条记录，每处理一个节点追加一条
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "FlowValue::is_null")]
    pub output: FlowValue,
}

/// 一次对话执行；创建时固定 flowId 与 version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub flow_id: String,
    pub version: u32,
    pub current_node_id: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// 基于已发布的图创建会话，变量以非空默认值初始化
    pub fn new(graph: &FlowGraph, now: DateTime<Utc>) -> Self {
        let variables = graph
            .variables()
            .iter()
            .filter(|variable| !variable.default_value.is_null())
            .map(|variable| (variable.name.clone(), variable.default_value.clone()))
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: graph.id.clone(),
            version: graph.version,
            current_node_id: graph.configuration.start_node_id.clone(),
            variables,
            history: Vec::new(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn record(
        &mut self,
        node_id: &str,
        timestamp: DateTime<Utc>,
        input: Option<String>,
        output: FlowValue,
    ) {
        self.history.push(HistoryEntry {
            node_id: node_id.to_string(),
            timestamp,
            input,
            output,
        });
    }

    /// 历史中的节点序列
    pub fn transcript(&self) -> Vec<&str> {
        self.history
            .iter()
            .map(|entry| entry.node_id.as_str())
            .collect()
    }
}

/// 时钟，测试中可替换为固定时间以获得确定的历史
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 始终返回同一时刻的时钟
#[derive(Clone)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
