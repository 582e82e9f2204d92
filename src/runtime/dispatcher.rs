use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ConvoFlowError, Result};
use crate::flow::nodes::{Action, ActionType};
use crate::flow::value::{interpolate, FlowValue, Variables};
use crate::http::{DisabledHttpClient, DynHttpClient, HttpRequest};
use crate::llm::{DynLlmClient, LlmRequest, LocalEchoClient};

use super::types::ActionOutput;

/// 动作执行器：按类型分派，外部调用统一受超时约束
#[derive(Clone)]
pub struct ActionDispatcher {
    llm: DynLlmClient,
    http: DynHttpClient,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LocalEchoClient), Arc::new(DisabledHttpClient))
    }
}

impl ActionDispatcher {
    pub fn new(llm: DynLlmClient, http: DynHttpClient) -> Self {
        Self { llm, http }
    }

    pub fn with_llm(mut self, llm: DynLlmClient) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_http(mut self, http: DynHttpClient) -> Self {
        self.http = http;
        self
    }

    /// 执行单个动作；只有成功时才写入变量
    pub async fn dispatch(
        &self,
        node_id: &str,
        action: &Action,
        variables: &mut Variables,
        timeout: Duration,
    ) -> Result<ActionOutput> {
        debug!(node = node_id, action = %action.action_type, "dispatching action");
        match &action.action_type {
            ActionType::SendMessage => {
                let template = required(node_id, action, "message")?;
                Ok(ActionOutput::Message {
                    node_id: node_id.to_string(),
                    text: interpolate(template, variables),
                })
            }
            ActionType::StoreData => {
                let rendered: Vec<(String, FlowValue)> = action
                    .parameters
                    .iter()
                    .map(|(key, value)| (key.clone(), render(value, variables)))
                    .collect();
                let keys = rendered.iter().map(|(key, _)| key.clone()).collect();
                variables.extend(rendered);
                Ok(ActionOutput::Stored {
                    node_id: node_id.to_string(),
                    keys,
                })
            }
            ActionType::ApiCall => self.api_call(node_id, action, variables, timeout).await,
            ActionType::GenerateResponse => {
                self.generate_response(node_id, action, variables, timeout)
                    .await
            }
            ActionType::Redirect => {
                let target = required(node_id, action, "target")?;
                Ok(ActionOutput::Redirect {
                    node_id: node_id.to_string(),
                    target: interpolate(target, variables),
                })
            }
            ActionType::Unknown(name) => Err(ConvoFlowError::UnknownActionType {
                node: node_id.to_string(),
                action_type: name.clone(),
            }),
        }
    }

    async fn api_call(
        &self,
        node_id: &str,
        action: &Action,
        variables: &mut Variables,
        timeout: Duration,
    ) -> Result<ActionOutput> {
        let url = interpolate(required(node_id, action, "url")?, variables);
        let method = action
            .param_str("method")
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let headers: BTreeMap<String, String> = action
            .parameters
            .get("headers")
            .and_then(FlowValue::as_map)
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, value)| (name.clone(), render(value, variables).to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let body = action
            .parameters
            .get("body")
            .map(|body| render(body, variables).to_json());

        let request = HttpRequest {
            url,
            method,
            body,
            headers,
        };
        let response = with_timeout(node_id, timeout, self.http.call(request))
            .await?
            .map_err(|e| failed(node_id, action, e.to_string()))?;
        if !response.is_success() {
            warn!(node = node_id, status = response.status, "api call returned error status");
            return Err(failed(
                node_id,
                action,
                format!("unexpected status {}", response.status),
            ));
        }

        let body = FlowValue::from(response.body);
        if let Some(name) = action.param_str("storeAs") {
            variables.insert(name.to_string(), body.clone());
        }
        Ok(ActionOutput::ApiResponse {
            node_id: node_id.to_string(),
            status: response.status,
            body,
        })
    }

    async fn generate_response(
        &self,
        node_id: &str,
        action: &Action,
        variables: &mut Variables,
        timeout: Duration,
    ) -> Result<ActionOutput> {
        let mut request = LlmRequest::new(interpolate(required(node_id, action, "prompt")?, variables));
        request.system = action
            .param_str("system")
            .map(|system| interpolate(system, variables));
        if let Some(config) = action.parameters.get("config").and_then(FlowValue::as_map) {
            request.model = config.get("model").and_then(FlowValue::as_str).map(str::to_string);
            if let Some(temperature) = config.get("temperature").and_then(FlowValue::as_f64) {
                request.temperature = temperature as f32;
            }
            request.max_tokens = config
                .get("maxTokens")
                .or_else(|| config.get("max_tokens"))
                .and_then(FlowValue::as_f64)
                .filter(|tokens| *tokens >= 1.0)
                .map(|tokens| tokens as u32);
        }

        let response = with_timeout(node_id, timeout, self.llm.complete(request))
            .await?
            .map_err(|e| match e {
                ConvoFlowError::Provider(message) => ConvoFlowError::Provider(message),
                other => ConvoFlowError::Provider(other.to_string()),
            })?;

        if let Some(name) = action.param_str("storeAs") {
            variables.insert(name.to_string(), FlowValue::from(response.content.clone()));
        }
        Ok(ActionOutput::Generated {
            node_id: node_id.to_string(),
            text: response.content,
        })
    }
}

async fn with_timeout<T>(
    node_id: &str,
    timeout: Duration,
    call: impl Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ConvoFlowError::Timeout {
            node: node_id.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
}

fn required<'a>(node_id: &str, action: &'a Action, key: &str) -> Result<&'a str> {
    action
        .param_str(key)
        .ok_or_else(|| failed(node_id, action, format!("missing parameter `{key}`")))
}

fn failed(node_id: &str, action: &Action, message: String) -> ConvoFlowError {
    ConvoFlowError::ActionFailed {
        node: node_id.to_string(),
        action_type: action.action_type.to_string(),
        message,
    }
}

/// 递归替换字符串中的 `{{var}}`
fn render(value: &FlowValue, variables: &Variables) -> FlowValue {
    match value {
        FlowValue::String(template) => FlowValue::String(interpolate(template, variables)),
        FlowValue::List(items) => {
            FlowValue::List(items.iter().map(|item| render(item, variables)).collect())
        }
        FlowValue::Map(entries) => FlowValue::Map(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), render(item, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}
