use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;

use convoflow::{
    Action, ActionDispatcher, ActionType, AnswerType, Condition, ConditionOperator,
    ConvoFlowError, ExecutionEngine, FixedClock, FlowBuilder, FlowGraph, FlowValue,
    GraphRegistry, HttpClient, HttpRequest, HttpResponse, LlmClient, LlmRequest, LlmResponse,
    LocalEchoClient, SessionStatus, SessionStore, VariableType,
};

struct StatusHttp {
    status: u16,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl HttpClient for StatusHttp {
    async fn call(&self, request: HttpRequest) -> convoflow::Result<HttpResponse> {
        self.calls.lock().push(request.url);
        Ok(HttpResponse {
            status: self.status,
            body: json!({"status": self.status}),
        })
    }
}

struct HungHttp;

#[async_trait]
impl HttpClient for HungHttp {
    async fn call(&self, _request: HttpRequest) -> convoflow::Result<HttpResponse> {
        std::future::pending::<()>().await;
        unreachable!("pending never resolves")
    }
}

/// 第一次调用很慢，之后立即返回
struct SlowOnceHttp {
    calls: Mutex<u32>,
}

#[async_trait]
impl HttpClient for SlowOnceHttp {
    async fn call(&self, _request: HttpRequest) -> convoflow::Result<HttpResponse> {
        let first = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls == 1
        };
        if first {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(HttpResponse {
            status: 200,
            body: json!({"ok": true}),
        })
    }
}

struct DownLlm;

#[async_trait]
impl LlmClient for DownLlm {
    async fn complete(&self, _request: LlmRequest) -> convoflow::Result<LlmResponse> {
        Err(ConvoFlowError::Provider("model overloaded".into()))
    }
}

/// start → Q(age) → C[age > 18 → A, default → B]
fn age_gate() -> FlowGraph {
    let mut builder = FlowBuilder::new("age-gate");
    builder
        .declare_variable("age", VariableType::Number)
        .add_start("start")
        .add_question("Q", "age", AnswerType::Number)
        .add_condition(
            "C",
            vec![Condition::new(
                "age",
                ConditionOperator::GreaterThan,
                FlowValue::Number(18.0),
            )],
        )
        .add_end("A")
        .add_end("B")
        .connect("start", "Q")
        .connect("Q", "C")
        .connect_labeled("C", "A", "0")
        .connect_labeled("C", "B", "default");
    builder.build()
}

fn engine(graph: FlowGraph) -> anyhow::Result<ExecutionEngine> {
    engine_with(graph, ActionDispatcher::default())
}

fn engine_with(graph: FlowGraph, dispatcher: ActionDispatcher) -> anyhow::Result<ExecutionEngine> {
    let registry = GraphRegistry::new();
    registry.publish(graph)?;
    Ok(
        ExecutionEngine::new(Arc::new(registry), Arc::new(SessionStore::in_memory()))
            .with_dispatcher(dispatcher),
    )
}

#[tokio::test]
async fn adult_answer_reaches_a() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    let started = engine.start_session("age-gate").await?;
    assert_eq!(started.current_node_id, "Q");
    assert!(!started.is_complete);

    let result = engine.step(&started.session_id, Some("25")).await?;
    assert!(result.is_complete);
    assert_eq!(result.current_node_id, "A");
    assert_eq!(result.variables.get("age"), Some(&FlowValue::Number(25.0)));

    let session = engine.session(&started.session_id).await?;
    assert_eq!(session.transcript(), vec!["start", "Q", "C", "A"]);
    assert_eq!(session.status, SessionStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn minor_answer_falls_back_to_default_edge() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    let started = engine.start_session("age-gate").await?;
    engine.step(&started.session_id, Some("15")).await?;

    let session = engine.session(&started.session_id).await?;
    assert_eq!(session.transcript(), vec!["start", "Q", "C", "B"]);
    Ok(())
}

#[tokio::test]
async fn invalid_answer_changes_nothing() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    let started = engine.start_session("age-gate").await?;
    let before = engine.session(&started.session_id).await?;

    let error = engine
        .step(&started.session_id, Some("abc"))
        .await
        .unwrap_err();
    assert!(matches!(error, ConvoFlowError::InvalidAnswer { ref node, .. } if node == "Q"));
    assert!(error.is_recoverable());

    // 会话保持原样，可以重新作答
    assert_eq!(engine.session(&started.session_id).await?, before);
    let result = engine.step(&started.session_id, Some("30")).await?;
    assert_eq!(result.current_node_id, "A");
    Ok(())
}

#[tokio::test]
async fn terminal_sessions_reject_steps() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    let started = engine.start_session("age-gate").await?;
    engine.step(&started.session_id, Some("40")).await?;
    let completed = engine.session(&started.session_id).await?;

    let error = engine
        .step(&started.session_id, Some("41"))
        .await
        .unwrap_err();
    assert!(matches!(error, ConvoFlowError::TerminalSession { .. }));
    assert_eq!(engine.session(&started.session_id).await?, completed);
    Ok(())
}

#[tokio::test]
async fn unknown_session_is_reported() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    let error = engine.step("missing", Some("1")).await.unwrap_err();
    assert_eq!(error.code(), "session.not_found");
    Ok(())
}

#[tokio::test]
async fn identical_inputs_produce_identical_history() -> anyhow::Result<()> {
    let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()));
    let engine = engine(age_gate())?.with_clock(clock);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let started = engine.start_session("age-gate").await?;
        engine.step(&started.session_id, Some("abc")).await.ok();
        engine.step(&started.session_id, Some("19")).await?;
        runs.push(engine.session(&started.session_id).await?);
    }
    assert_eq!(runs[0].history, runs[1].history);
    assert_eq!(runs[0].variables, runs[1].variables);
    assert_ne!(runs[0].id, runs[1].id);
    Ok(())
}

#[tokio::test]
async fn earliest_satisfied_condition_wins() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("tiers");
    builder
        .declare_variable("score", VariableType::Number)
        .add_start("start")
        .add_question("ask", "score", AnswerType::Number)
        .add_condition(
            "route",
            vec![
                Condition::new("score", ConditionOperator::GreaterThan, FlowValue::Number(10.0))
                    .with_label("silver"),
                Condition::new("score", ConditionOperator::GreaterThan, FlowValue::Number(50.0))
                    .with_label("gold"),
            ],
        )
        .add_end("silver_end")
        .add_end("gold_end")
        .add_end("bronze_end")
        .connect("start", "ask")
        .connect("ask", "route")
        .connect_labeled("route", "gold_end", "gold")
        .connect_labeled("route", "silver_end", "silver")
        .connect_labeled("route", "bronze_end", "default");
    let engine = engine(builder.build())?;

    let started = engine.start_session("tiers").await?;
    let result = engine.step(&started.session_id, Some("90")).await?;
    assert_eq!(result.current_node_id, "silver_end");

    let session = engine.session(&started.session_id).await?;
    let route = session
        .history
        .iter()
        .find(|entry| entry.node_id == "route")
        .map(|entry| entry.output.clone());
    assert_eq!(route, Some(FlowValue::from("silver")));
    Ok(())
}

#[tokio::test]
async fn failed_action_keeps_earlier_writes() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("sync");
    builder
        .add_start("start")
        .add_action(
            "push",
            vec![
                Action::new(ActionType::StoreData).with_param("x", 1i64),
                Action::new(ActionType::ApiCall).with_param("url", "https://crm.test/contacts"),
            ],
        )
        .add_end("done")
        .connect("start", "push")
        .connect("push", "done");
    let http = Arc::new(StatusHttp {
        status: 500,
        calls: Mutex::new(Vec::new()),
    });
    let engine = engine_with(
        builder.build(),
        ActionDispatcher::new(Arc::new(LocalEchoClient), http.clone()),
    )?;

    let started = engine.start_session("sync").await?;
    assert_eq!(started.current_node_id, "push");

    let error = engine.step(&started.session_id, None).await.unwrap_err();
    assert!(matches!(error, ConvoFlowError::ActionFailed { .. }));

    let session = engine.session(&started.session_id).await?;
    assert_eq!(session.current_node_id, "push");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.variables.get("x"), Some(&FlowValue::Number(1.0)));
    assert_eq!(session.transcript(), vec!["start", "push"]);
    assert_eq!(http.calls.lock().len(), 1);
    Ok(())
}

#[tokio::test]
async fn hung_collaborator_times_out_without_mutation() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("hang");
    builder
        .add_start("start")
        .add_action(
            "call",
            vec![
                Action::new(ActionType::StoreData).with_param("attempted", true),
                Action::new(ActionType::ApiCall).with_param("url", "https://slow.test"),
            ],
        )
        .add_end("done")
        .connect("start", "call")
        .connect("call", "done");
    let engine = engine_with(
        builder.build(),
        ActionDispatcher::new(Arc::new(LocalEchoClient), Arc::new(HungHttp)),
    )?;

    let started = engine.start_session("hang").await?;
    let before = engine.session(&started.session_id).await?;

    let error = engine
        .step_with_timeout(&started.session_id, None, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(error, ConvoFlowError::Timeout { timeout_ms: 50, .. }));
    assert_eq!(engine.session(&started.session_id).await?, before);
    Ok(())
}

#[tokio::test]
async fn cancelled_step_leaves_no_partial_writes() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("cancel");
    builder
        .add_start("start")
        .add_action(
            "sync",
            vec![
                Action::new(ActionType::StoreData).with_param("x", 1i64),
                Action::new(ActionType::ApiCall).with_param("url", "https://slow.test/sync"),
            ],
        )
        .add_end("done")
        .connect("start", "sync")
        .connect("sync", "done");
    let engine = engine_with(
        builder.build(),
        ActionDispatcher::new(
            Arc::new(LocalEchoClient),
            Arc::new(SlowOnceHttp {
                calls: Mutex::new(0),
            }),
        ),
    )?;

    let started = engine.start_session("cancel").await?;
    let before = engine.session(&started.session_id).await?;

    // 调用方放弃等待，step future 在 api_call 中途被丢弃
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        engine.step(&started.session_id, None),
    )
    .await;
    assert!(abandoned.is_err());

    let after = engine.session(&started.session_id).await?;
    assert_eq!(after, before);
    assert!(after.variables.get("x").is_none());
    assert_eq!(engine.sessions().active_locks(), 0);

    let retried = engine.step(&started.session_id, None).await?;
    assert!(retried.is_complete);
    assert_eq!(retried.variables.get("x"), Some(&FlowValue::Number(1.0)));
    Ok(())
}

#[tokio::test]
async fn finished_and_unknown_sessions_release_their_locks() -> anyhow::Result<()> {
    let engine = engine(age_gate())?;
    for i in 0..50 {
        let missing = engine.step(&format!("ghost-{i}"), Some("1")).await;
        assert!(matches!(missing, Err(ConvoFlowError::SessionNotFound(_))));
    }
    assert_eq!(engine.sessions().active_locks(), 0);

    let started = engine.start_session("age-gate").await?;
    assert!(engine.step(&started.session_id, Some("40")).await?.is_complete);
    assert_eq!(engine.sessions().active_locks(), 0);
    Ok(())
}

#[tokio::test]
async fn provider_error_is_recorded_once() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("reply");
    builder
        .add_start("start")
        .add_action(
            "answer",
            vec![Action::new(ActionType::GenerateResponse).with_param("prompt", "Say hello")],
        )
        .add_end("done")
        .connect("start", "answer")
        .connect("answer", "done");
    let engine = engine_with(
        builder.build(),
        ActionDispatcher::default().with_llm(Arc::new(DownLlm)),
    )?;

    let started = engine.start_session("reply").await?;
    let error = engine.step(&started.session_id, None).await.unwrap_err();
    assert_eq!(error.code(), "action.provider_error");

    let session = engine.session(&started.session_id).await?;
    assert!(session.is_active());
    assert_eq!(session.current_node_id, "answer");
    let last = session.history.last().map(|entry| entry.output.clone());
    let code = last
        .as_ref()
        .and_then(FlowValue::as_map)
        .and_then(|failure| failure.get("error"))
        .cloned();
    assert_eq!(code, Some(FlowValue::from("action.provider_error")));
    Ok(())
}

#[tokio::test]
async fn redirect_bypasses_edges_and_skips_remaining_actions() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("handoff");
    builder
        .declare_variable("reason", VariableType::Text)
        .add_start("start")
        .add_action(
            "triage",
            vec![
                Action::new(ActionType::SendMessage).with_param("message", "Routing you"),
                Action::new(ActionType::Redirect).with_param("target", "why"),
                Action::new(ActionType::SendMessage).with_param("message", "never sent"),
            ],
        )
        .add_question("why", "reason", AnswerType::Text)
        .add_end("fallback")
        .add_end("done")
        .connect("start", "triage")
        .connect("triage", "fallback")
        .connect("why", "done");
    let engine = engine(builder.build())?;

    let started = engine.start_session("handoff").await?;
    let result = engine.step(&started.session_id, None).await?;
    assert_eq!(result.current_node_id, "why");
    assert_eq!(result.outputs.len(), 2);
    assert_eq!(result.outputs[0].text(), Some("Routing you"));
    assert_eq!(result.prompt.map(|p| p.field), Some("reason".to_string()));
    Ok(())
}

#[tokio::test]
async fn sessions_stay_pinned_to_their_version() -> anyhow::Result<()> {
    let registry = Arc::new(GraphRegistry::new());
    registry.publish(age_gate())?;
    let engine = ExecutionEngine::new(registry.clone(), Arc::new(SessionStore::in_memory()));
    let pinned = engine.start_session("age-gate").await?;

    // v2 只有一个结束节点
    let mut builder = FlowBuilder::new("age-gate");
    builder
        .version(2)
        .declare_variable("age", VariableType::Number)
        .add_start("start")
        .add_question("Q", "age", AnswerType::Number)
        .add_end("Z")
        .connect("start", "Q")
        .connect("Q", "Z");
    registry.publish(builder.build())?;

    let result = engine.step(&pinned.session_id, Some("25")).await?;
    assert_eq!(result.current_node_id, "A");

    let fresh = engine.start_session("age-gate").await?;
    let result = engine.step(&fresh.session_id, Some("25")).await?;
    assert_eq!(result.current_node_id, "Z");
    assert_eq!(engine.session(&fresh.session_id).await?.version, 2);
    Ok(())
}

#[tokio::test]
async fn defaults_seed_variables_and_prompts_interpolate() -> anyhow::Result<()> {
    let mut builder = FlowBuilder::new("greeting");
    builder
        .add_variable(convoflow::FlowVariable::new("name", VariableType::Text).with_default("friend"))
        .declare_variable("mood", VariableType::Text)
        .add_start("start")
        .add_question_node(
            "ask",
            convoflow::QuestionNode {
                field: "mood".into(),
                expected_answer_type: AnswerType::Text,
                choices: Vec::new(),
                prompt: Some("How are you, {{name}}?".into()),
            },
        )
        .add_end("done")
        .connect("start", "ask")
        .connect("ask", "done");
    let engine = engine(builder.build())?;

    let started = engine.start_session("greeting").await?;
    assert_eq!(started.variables.get("name"), Some(&FlowValue::from("friend")));
    assert_eq!(
        started.prompt.map(|p| p.text),
        Some("How are you, friend?".to_string())
    );
    Ok(())
}
