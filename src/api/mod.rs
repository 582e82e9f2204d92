//! 执行接口的请求/响应结构
//!
//! HTTP 路由不在本 crate 内；这里只定义传输对象，并把引擎错误映射为带错误码的响应体。

use serde::{Deserialize, Serialize};

use crate::error::ConvoFlowError;
use crate::flow::value::Variables;
use crate::runtime::{ActionOutput, ExecutionEngine, Prompt, StepResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub current_node_id: String,
    pub first_prompt: Option<Prompt>,
    #[serde(default)]
    pub outputs: Vec<ActionOutput>,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub session_id: String,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub current_node_id: String,
    pub prompt: Option<Prompt>,
    #[serde(default)]
    pub outputs: Vec<ActionOutput>,
    pub is_complete: bool,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// 错误响应体
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl From<&ConvoFlowError> for ErrorBody {
    fn from(err: &ConvoFlowError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl StartSessionResponse {
    fn failed(err: &ConvoFlowError) -> Self {
        Self {
            error: Some(ErrorBody::from(err)),
            ..Default::default()
        }
    }
}

impl From<StepResult> for StartSessionResponse {
    fn from(result: StepResult) -> Self {
        Self {
            session_id: result.session_id,
            current_node_id: result.current_node_id,
            first_prompt: result.prompt,
            outputs: result.outputs,
            is_complete: result.is_complete,
            error: None,
        }
    }
}

impl From<StepResult> for StepResponse {
    fn from(result: StepResult) -> Self {
        Self {
            current_node_id: result.current_node_id,
            prompt: result.prompt,
            outputs: result.outputs,
            is_complete: result.is_complete,
            variables: result.variables,
            error: None,
        }
    }
}

/// 面向传输层的执行入口，错误总是以响应体返回
#[derive(Clone)]
pub struct ExecutionApi {
    engine: ExecutionEngine,
}

impl ExecutionApi {
    pub fn new(engine: ExecutionEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub async fn start_session(&self, request: StartSessionRequest) -> StartSessionResponse {
        let (graph, session) = match self
            .engine
            .open_session(&request.flow_id, request.version)
            .await
        {
            Ok(opened) => opened,
            Err(err) => return StartSessionResponse::failed(&err),
        };
        let session_id = session.id.clone();
        match self.engine.enter_session(&graph, session).await {
            Ok(result) => result.into(),
            Err(err) => {
                let mut response = StartSessionResponse::failed(&err);
                // 已写入存储的失败会话仍返回 id，便于调用方查询
                if let Ok(snapshot) = self.engine.snapshot(&session_id).await {
                    response.session_id = snapshot.session_id;
                    response.current_node_id = snapshot.current_node_id;
                }
                response
            }
        }
    }

    pub async fn step(&self, request: StepRequest) -> StepResponse {
        match self
            .engine
            .step(&request.session_id, request.input.as_deref())
            .await
        {
            Ok(result) => result.into(),
            Err(err) => {
                // 失败时仍返回会话当前位置和提示，便于调用方重新提示
                let error = Some(ErrorBody::from(&err));
                match self.engine.snapshot(&request.session_id).await {
                    Ok(snapshot) => StepResponse {
                        error,
                        ..StepResponse::from(snapshot)
                    },
                    Err(_) => StepResponse {
                        error,
                        ..Default::default()
                    },
                }
            }
        }
    }
}
