use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tokio::time::{sleep, Duration};

use convoflow::{
    Action, ActionDispatcher, ActionType, ExecutionEngine, FlowBuilder, FlowGraph, GraphRegistry,
    HttpClient, HttpRequest, HttpResponse, LocalEchoClient, SessionStore,
};

/// 记录同时进行中的调用数
#[derive(Default)]
struct SlowHttp {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for SlowHttp {
    async fn call(&self, _request: HttpRequest) -> convoflow::Result<HttpResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        sleep(Duration::from_millis(40)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status: 200,
            body: json!({"ok": true}),
        })
    }
}

/// start → first(api_call) → second(api_call) → done
fn two_calls() -> FlowGraph {
    let call = || Action::new(ActionType::ApiCall).with_param("url", "https://slow.test/ping");
    let mut builder = FlowBuilder::new("pipeline");
    builder
        .add_start("start")
        .add_action("first", vec![call()])
        .add_action("second", vec![call()])
        .add_end("done")
        .connect("start", "first")
        .connect("first", "second")
        .connect("second", "done");
    builder.build()
}

fn engine(http: Arc<SlowHttp>) -> anyhow::Result<ExecutionEngine> {
    let registry = GraphRegistry::new();
    registry.publish(two_calls())?;
    Ok(
        ExecutionEngine::new(Arc::new(registry), Arc::new(SessionStore::in_memory()))
            .with_dispatcher(ActionDispatcher::new(Arc::new(LocalEchoClient), http)),
    )
}

#[tokio::test]
async fn steps_on_one_session_are_serialized() -> anyhow::Result<()> {
    let http = Arc::new(SlowHttp::default());
    let engine = engine(http.clone())?;
    let started = engine.start_session("pipeline").await?;

    let results = join_all((0..2).map(|_| engine.step(&started.session_id, None))).await;
    for result in &results {
        assert!(result.is_ok(), "{result:?}");
    }

    // 两次 step 依次处理 first 与 second，而不是重复执行同一节点
    assert_eq!(http.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(http.calls.load(Ordering::SeqCst), 2);
    let session = engine.session(&started.session_id).await?;
    assert_eq!(session.transcript(), vec!["start", "first", "second", "done"]);
    Ok(())
}

#[tokio::test]
async fn different_sessions_run_in_parallel() -> anyhow::Result<()> {
    let http = Arc::new(SlowHttp::default());
    let engine = engine(http.clone())?;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(engine.start_session("pipeline").await?.session_id);
    }

    let results = join_all(ids.iter().map(|id| engine.step(id, None))).await;
    for result in results {
        assert_eq!(result?.current_node_id, "second");
    }
    assert_eq!(http.max_in_flight.load(Ordering::SeqCst), 3);
    assert_eq!(engine.sessions().find_by_flow("pipeline").await?.len(), 3);
    Ok(())
}
