use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{ConvoFlowError, Result};
use crate::flow::answers::coerce_answer;
use crate::flow::conditions::select_branch;
use crate::flow::nodes::{ActionNode, ConditionNode, Node, NodeKind};
use crate::flow::registry::GraphSource;
use crate::flow::types::FlowGraph;
use crate::flow::value::FlowValue;
use crate::state::{Clock, Session, SessionStatus, SessionStore, SystemClock};

use super::dispatcher::ActionDispatcher;
use super::types::{ActionOutput, StepResult};

/// 对话流执行引擎
///
/// 每次 step 在会话副本上推进，结束时一次性写回存储；
/// 同一会话的 step 通过 [`SessionStore::lock`] 串行。
#[derive(Clone)]
pub struct ExecutionEngine {
    graphs: Arc<dyn GraphSource>,
    sessions: Arc<SessionStore>,
    dispatcher: ActionDispatcher,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl ExecutionEngine {
    pub fn new(graphs: Arc<dyn GraphSource>, sessions: Arc<SessionStore>) -> Self {
        Self {
            graphs,
            sessions,
            dispatcher: ActionDispatcher::default(),
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 读取会话的当前快照
    pub async fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions.get(session_id).await
    }

    /// 读取会话当前位置与待回答的提示，不推进
    pub async fn snapshot(&self, session_id: &str) -> Result<StepResult> {
        let session = self.sessions.get(session_id).await?;
        let graph = self
            .graphs
            .load_graph(&session.flow_id, session.version)
            .await?;
        Ok(StepResult::from_session(&graph, &session, Vec::new()))
    }

    /// 以最新发布版本开始会话
    pub async fn start_session(&self, flow_id: &str) -> Result<StepResult> {
        let (graph, session) = self.open_session(flow_id, None).await?;
        self.enter_session(&graph, session).await
    }

    /// 以指定版本开始会话，推进到第一个问题、动作或结束节点
    pub async fn start_session_at(&self, flow_id: &str, version: u32) -> Result<StepResult> {
        let (graph, session) = self.open_session(flow_id, Some(version)).await?;
        self.enter_session(&graph, session).await
    }

    /// 解析版本并分配会话 id，尚未写入存储
    pub(crate) async fn open_session(
        &self,
        flow_id: &str,
        version: Option<u32>,
    ) -> Result<(Arc<FlowGraph>, Session)> {
        let version = match version {
            Some(version) => version,
            None => self.graphs.latest_version(flow_id).await?,
        };
        let graph = self.graphs.load_graph(flow_id, version).await?;
        let session = Session::new(&graph, self.clock.now());
        Ok((graph, session))
    }

    /// 从入口节点推进新会话并首次写入
    #[instrument(skip_all, fields(session = %session.id, flow = %session.flow_id, version = session.version))]
    pub(crate) async fn enter_session(
        &self,
        graph: &FlowGraph,
        session: Session,
    ) -> Result<StepResult> {
        info!("session started");
        let _guard = self.sessions.lock(&session.id).await;
        self.run(graph, session, None, self.config.call_timeout())
            .await
    }

    /// 以配置的超时推进一步
    pub async fn step(&self, session_id: &str, input: Option<&str>) -> Result<StepResult> {
        self.step_with_timeout(session_id, input, self.config.call_timeout())
            .await
    }

    /// 推进一步，外部调用使用给定超时
    #[instrument(skip(self, input))]
    pub async fn step_with_timeout(
        &self,
        session_id: &str,
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<StepResult> {
        let _guard = self.sessions.lock(session_id).await;
        let session = self.sessions.get(session_id).await?;
        if session.status.is_terminal() {
            return Err(ConvoFlowError::TerminalSession {
                session: session.id,
                status: session.status.to_string(),
            });
        }
        let graph = self
            .graphs
            .load_graph(&session.flow_id, session.version)
            .await?;
        self.run(&graph, session, input.map(str::to_string), timeout)
            .await
    }

    /// 在副本上推进并按失败语义决定写回内容
    async fn run(
        &self,
        graph: &FlowGraph,
        stored: Session,
        input: Option<String>,
        timeout: Duration,
    ) -> Result<StepResult> {
        let mut working = stored.clone();
        let outcome = self
            .advance(graph, &mut working, input.clone(), timeout)
            .await;
        match outcome {
            Ok(outputs) => {
                working.updated_at = self.clock.now();
                if working.status == SessionStatus::Completed {
                    info!(session = %working.id, node = %working.current_node_id, "session completed");
                }
                self.sessions.put(working.clone()).await?;
                Ok(StepResult::from_session(graph, &working, outputs))
            }
            Err(err) if err.is_fatal() => {
                error!(session = %working.id, node = %working.current_node_id, code = err.code(), error = %err, "session failed");
                let now = self.clock.now();
                let node_id = working.current_node_id.clone();
                working.record(&node_id, now, input, failure_output(&err));
                working.status = SessionStatus::Failed;
                working.updated_at = now;
                self.sessions.put(working).await?;
                Err(err)
            }
            Err(
                err @ (ConvoFlowError::Provider(_) | ConvoFlowError::ActionFailed { .. }),
            ) => {
                warn!(session = %stored.id, node = %stored.current_node_id, code = err.code(), error = %err, "action failed");
                // 已提交动作的变量写入保留，节点位置不变
                let now = self.clock.now();
                let mut committed = stored;
                committed.variables = working.variables;
                let node_id = committed.current_node_id.clone();
                committed.record(&node_id, now, input, failure_output(&err));
                committed.updated_at = now;
                self.sessions.put(committed).await?;
                Err(err)
            }
            Err(err) => {
                if err.is_recoverable() {
                    warn!(session = %stored.id, node = %stored.current_node_id, code = err.code(), error = %err, "step rejected");
                }
                Err(err)
            }
        }
    }

    /// 处理入口节点，然后穿过 start/condition 节点，停在下一个问题、动作或结束节点
    async fn advance(
        &self,
        graph: &FlowGraph,
        session: &mut Session,
        mut input: Option<String>,
        timeout: Duration,
    ) -> Result<Vec<ActionOutput>> {
        let mut outputs = Vec::new();
        let mut transitions = 0u32;
        let mut entry = true;

        loop {
            let node = graph
                .node(&session.current_node_id)
                .ok_or_else(|| ConvoFlowError::UnknownNode(session.current_node_id.clone()))?;
            let now = self.clock.now();

            let next = match &node.kind {
                NodeKind::End => {
                    session.record(&node.id, now, None, FlowValue::Null);
                    session.status = SessionStatus::Completed;
                    break;
                }
                NodeKind::Question(_) | NodeKind::Action(_) if !entry => break,
                NodeKind::Start => {
                    session.record(&node.id, now, None, FlowValue::Null);
                    single_target(graph, node)?
                }
                NodeKind::Question(question) => {
                    let value = coerce_answer(question, input.as_deref()).map_err(|reason| {
                        ConvoFlowError::InvalidAnswer {
                            node: node.id.clone(),
                            reason,
                        }
                    })?;
                    session
                        .variables
                        .insert(question.field.clone(), value.clone());
                    session.record(&node.id, now, input.take(), value);
                    single_target(graph, node)?
                }
                NodeKind::Condition(condition) => {
                    let (branch, target) = route(graph, node, condition, session)?;
                    session.record(&node.id, now, None, FlowValue::String(branch));
                    target
                }
                NodeKind::Action(actions) => {
                    let (produced, redirect) =
                        self.run_actions(node, actions, session, timeout).await?;
                    let summary = serde_json::to_value(&produced)
                        .map(FlowValue::from)
                        .map_err(|e| ConvoFlowError::Other(e.into()))?;
                    session.record(&node.id, self.clock.now(), input.take(), summary);
                    outputs.extend(produced);
                    match redirect {
                        Some(target) => target,
                        None => single_target(graph, node)?,
                    }
                }
            };

            transitions += 1;
            if transitions > self.config.max_transitions {
                return Err(ConvoFlowError::MaxTransitionsExceeded(
                    self.config.max_transitions,
                ));
            }
            if !graph.contains_node(&next) {
                return Err(ConvoFlowError::UnknownNode(next));
            }
            debug!(session = %session.id, from = %node.id, to = %next, "transition");
            session.current_node_id = next;
            entry = false;
        }

        Ok(outputs)
    }

    /// 按顺序执行动作；redirect 之后的动作被跳过
    async fn run_actions(
        &self,
        node: &Node,
        actions: &ActionNode,
        session: &mut Session,
        timeout: Duration,
    ) -> Result<(Vec<ActionOutput>, Option<String>)> {
        let mut produced = Vec::with_capacity(actions.actions.len());
        for action in &actions.actions {
            let output = self
                .dispatcher
                .dispatch(&node.id, action, &mut session.variables, timeout)
                .await?;
            let redirect = output.redirect_target().map(str::to_string);
            produced.push(output);
            if redirect.is_some() {
                return Ok((produced, redirect));
            }
        }
        Ok((produced, None))
    }
}

/// start/question/action 节点只有一条出边
fn single_target(graph: &FlowGraph, node: &Node) -> Result<String> {
    graph
        .outgoing(&node.id)
        .next()
        .map(|edge| edge.target.clone())
        .ok_or_else(|| ConvoFlowError::MissingEdge {
            node: node.id.clone(),
        })
}

/// 首个成立的条件决定分支；否则走 default 边
fn route(
    graph: &FlowGraph,
    node: &Node,
    condition: &ConditionNode,
    session: &Session,
) -> Result<(String, String)> {
    let matched = select_branch(condition, &session.variables, graph.variables())
        .and_then(|index| condition.branch_key(index))
        .and_then(|key| {
            graph
                .outgoing(&node.id)
                .find(|edge| edge.label.as_deref() == Some(key.as_str()))
                .map(|edge| (key, edge.target.clone()))
        });
    if let Some(found) = matched {
        return Ok(found);
    }

    graph
        .outgoing(&node.id)
        .find(|edge| edge.is_default())
        .map(|edge| (crate::flow::nodes::DEFAULT_EDGE_LABEL.to_string(), edge.target.clone()))
        .ok_or_else(|| ConvoFlowError::NoMatchingCondition {
            node: node.id.clone(),
        })
}

fn failure_output(err: &ConvoFlowError) -> FlowValue {
    let mut failure = BTreeMap::new();
    failure.insert("error".to_string(), FlowValue::from(err.code()));
    failure.insert("message".to_string(), FlowValue::from(err.to_string()));
    FlowValue::Map(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::builder::FlowBuilder;
    use crate::flow::nodes::{Action, ActionType, AnswerType, Condition, ConditionOperator};
    use crate::flow::registry::GraphRegistry;
    use crate::flow::types::VariableType;

    fn engine_with(graph: FlowGraph) -> ExecutionEngine {
        let registry = GraphRegistry::new();
        registry.publish(graph).expect("graph should publish");
        ExecutionEngine::new(Arc::new(registry), Arc::new(SessionStore::in_memory()))
    }

    #[tokio::test]
    async fn start_stops_at_first_question() -> anyhow::Result<()> {
        let mut builder = FlowBuilder::new("greet");
        builder
            .declare_variable("name", VariableType::Text)
            .add_start("start")
            .add_question("ask", "name", AnswerType::Text)
            .add_end("done")
            .connect("start", "ask")
            .connect("ask", "done");
        let engine = engine_with(builder.build());

        let result = engine.start_session("greet").await?;
        assert_eq!(result.current_node_id, "ask");
        assert_eq!(result.prompt.map(|p| p.field), Some("name".to_string()));

        let result = engine.step(&result.session_id, Some("Ada")).await?;
        assert!(result.is_complete);
        let session = engine.session(&result.session_id).await?;
        assert_eq!(session.transcript(), vec!["start", "ask", "done"]);
        Ok(())
    }

    #[tokio::test]
    async fn condition_without_default_fails_session() -> anyhow::Result<()> {
        let mut builder = FlowBuilder::new("strict");
        builder
            .declare_variable("age", VariableType::Number)
            .add_start("start")
            .add_question("q", "age", AnswerType::Number)
            .add_condition(
                "c",
                vec![Condition::new("age", ConditionOperator::GreaterThan, 18.0.into())],
            )
            .add_end("adult")
            .connect("start", "q")
            .connect("q", "c")
            .connect_labeled("c", "adult", "0");
        let engine = engine_with(builder.build());

        let started = engine.start_session("strict").await?;
        let error = engine
            .step(&started.session_id, Some("12"))
            .await
            .unwrap_err();
        assert!(matches!(error, ConvoFlowError::NoMatchingCondition { .. }));

        let session = engine.session(&started.session_id).await?;
        assert_eq!(session.status, SessionStatus::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn action_node_waits_for_its_own_step() -> anyhow::Result<()> {
        let mut builder = FlowBuilder::new("notify");
        builder
            .add_start("start")
            .add_action(
                "hello",
                vec![Action::new(ActionType::SendMessage).with_param("message", "hi")],
            )
            .add_end("done")
            .connect("start", "hello")
            .connect("hello", "done");
        let engine = engine_with(builder.build());

        let started = engine.start_session("notify").await?;
        assert_eq!(started.current_node_id, "hello");
        assert!(started.outputs.is_empty());

        let result = engine.step(&started.session_id, None).await?;
        assert!(result.is_complete);
        assert_eq!(result.outputs[0].text(), Some("hi"));
        Ok(())
    }

    #[tokio::test]
    async fn transition_budget_is_enforced() -> anyhow::Result<()> {
        let mut builder = FlowBuilder::new("loop");
        builder
            .declare_variable("go", VariableType::Boolean)
            .add_start("start")
            .add_condition(
                "c1",
                vec![Condition::new("go", ConditionOperator::Exists, FlowValue::Null)],
            )
            .add_condition(
                "c2",
                vec![Condition::new("go", ConditionOperator::Exists, FlowValue::Null)],
            )
            .add_end("done")
            .connect("start", "c1")
            .connect_labeled("c1", "c2", "default")
            .connect_labeled("c1", "done", "0")
            .connect_labeled("c2", "c1", "default")
            .connect_labeled("c2", "done", "0");
        let registry = GraphRegistry::new();
        registry.publish(builder.build())?;
        let engine = ExecutionEngine::new(Arc::new(registry), Arc::new(SessionStore::in_memory()))
            .with_config(EngineConfig::default().with_max_transitions(16));

        let error = engine.start_session("loop").await.unwrap_err();
        assert!(matches!(error, ConvoFlowError::MaxTransitionsExceeded(16)));
        Ok(())
    }
}
