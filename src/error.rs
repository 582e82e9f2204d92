use thiserror::Error;

use crate::flow::validation::ValidationReport;

pub type Result<T> = std::result::Result<T, ConvoFlowError>;

#[derive(Debug, Error)]
pub enum ConvoFlowError {
    #[error("graph failed validation with {} error(s)", .0.errors().len())]
    Validation(ValidationReport),
    #[error("no condition matched on node `{node}` and no `default` edge exists")]
    NoMatchingCondition { node: String },
    #[error("unknown action type `{action_type}` on node `{node}`")]
    UnknownActionType { node: String, action_type: String },
    #[error("invalid answer for node `{node}`: {reason}")]
    InvalidAnswer { node: String, reason: String },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("action `{action_type}` failed on node `{node}`: {message}")]
    ActionFailed {
        node: String,
        action_type: String,
        message: String,
    },
    #[error("collaborator call on node `{node}` timed out after {timeout_ms}ms")]
    Timeout { node: String, timeout_ms: u64 },
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    #[error("session `{session}` is {status} and cannot be stepped")]
    TerminalSession { session: String, status: String },
    #[error("unknown node `{0}` in flow")]
    UnknownNode(String),
    #[error("node `{node}` has no outgoing edge to follow")]
    MissingEdge { node: String },
    #[error("flow `{flow}` version {version} not registered")]
    FlowNotRegistered { flow: String, version: u32 },
    #[error("flow `{flow}` version {version} is not newer than published version {latest}")]
    StaleVersion {
        flow: String,
        version: u32,
        latest: u32,
    },
    #[error("maximum transitions {0} exceeded in a single step")]
    MaxTransitionsExceeded(u32),
    #[error("invalid graph document: {0}")]
    InvalidDocument(String),
    #[error("session store error: {0}")]
    Store(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConvoFlowError {
    /// 稳定的错误码，供 API 层返回
    pub fn code(&self) -> &'static str {
        match self {
            ConvoFlowError::Validation(_) => "graph.validation_failed",
            ConvoFlowError::NoMatchingCondition { .. } => "flow.no_matching_condition",
            ConvoFlowError::UnknownActionType { .. } => "flow.unknown_action_type",
            ConvoFlowError::InvalidAnswer { .. } => "step.invalid_answer",
            ConvoFlowError::Provider(_) => "action.provider_error",
            ConvoFlowError::ActionFailed { .. } => "action.failed",
            ConvoFlowError::Timeout { .. } => "action.timeout",
            ConvoFlowError::SessionNotFound(_) => "session.not_found",
            ConvoFlowError::TerminalSession { .. } => "session.terminal",
            ConvoFlowError::UnknownNode(_) => "flow.unknown_node",
            ConvoFlowError::MissingEdge { .. } => "flow.missing_edge",
            ConvoFlowError::FlowNotRegistered { .. } => "graph.not_registered",
            ConvoFlowError::StaleVersion { .. } => "graph.stale_version",
            ConvoFlowError::MaxTransitionsExceeded(_) => "flow.max_transitions_exceeded",
            ConvoFlowError::InvalidDocument(_) => "graph.invalid_document",
            ConvoFlowError::Store(_) => "session.store_error",
            ConvoFlowError::Other(_) => "internal",
        }
    }

    /// 表示固定版本的图本身无法正确执行，会话将被标记为 failed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConvoFlowError::UnknownNode(_)
                | ConvoFlowError::MissingEdge { .. }
                | ConvoFlowError::UnknownActionType { .. }
                | ConvoFlowError::NoMatchingCondition { .. }
                | ConvoFlowError::MaxTransitionsExceeded(_)
        )
    }

    /// 调用方可以原样重试同一步
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConvoFlowError::InvalidAnswer { .. }
                | ConvoFlowError::Provider(_)
                | ConvoFlowError::ActionFailed { .. }
                | ConvoFlowError::Timeout { .. }
        )
    }
}
