pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod llm;
pub mod runtime;
pub mod state;
pub mod utils;

pub use api::{
    ErrorBody, ExecutionApi, StartSessionRequest, StartSessionResponse, StepRequest, StepResponse,
};
pub use config::{
    load_graph_from_file, load_graph_from_str, load_graph_from_value, EngineConfig, EnvConfig,
    GraphDocument, NodeDocument,
};
pub use error::{ConvoFlowError, Result};
pub use flow::{
    interpolate, Action, ActionNode, ActionType, AnswerType, Condition, ConditionNode,
    ConditionOperator, Diagnostic, DiagnosticLevel, Edge, FlowBuilder, FlowConfiguration,
    FlowGraph, FlowValue, FlowVariable, GraphRegistry, GraphSource, GraphValidator, Node,
    NodeKind, NodeType, QuestionNode, ValidationReport, VariableType, Variables,
};
pub use http::{DisabledHttpClient, DynHttpClient, HttpClient, HttpRequest, HttpResponse};
#[cfg(feature = "http-client")]
pub use http::ReqwestHttpClient;
pub use llm::{DynLlmClient, LlmClient, LlmRequest, LlmResponse, LocalEchoClient};
#[cfg(feature = "openai-client")]
pub use llm::OpenAiClient;
pub use runtime::{ActionDispatcher, ActionOutput, ExecutionEngine, Prompt, StepResult};
pub use state::{
    Clock, FixedClock, HistoryEntry, MemorySessionRepository, Session, SessionRepository,
    SessionStatus, SessionStore, SystemClock,
};
#[cfg(feature = "redis-store")]
pub use state::RedisSessionRepository;
pub use utils::{logging, validation};
