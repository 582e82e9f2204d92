// Flow 模块 - 对话流图定义、校验与发布

pub mod answers;
pub mod builder;
pub mod conditions;
pub mod nodes;
pub mod registry;
pub mod types;
pub mod validation;
pub mod value;

// 重新导出核心类型
pub use builder::FlowBuilder;
pub use nodes::{
    Action, ActionNode, ActionType, AnswerType, Condition, ConditionNode, ConditionOperator, Node,
    NodeKind, NodeType, Parameters, QuestionNode, DEFAULT_EDGE_LABEL, MAX_CHOICES,
};
pub use registry::{GraphRegistry, GraphSource};
pub use types::{Edge, FlowConfiguration, FlowGraph, FlowVariable, VariableType};
pub use validation::{Diagnostic, DiagnosticLevel, GraphValidator, ValidationReport};
pub use value::{interpolate, FlowValue, Variables};
