use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[cfg(feature = "http-client")]
mod reqwest_client;
#[cfg(feature = "http-client")]
pub use reqwest_client::ReqwestHttpClient;

/// 出站 HTTP 请求描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: None,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 出站 HTTP 协作者，只被 `api_call` 动作使用
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub type DynHttpClient = Arc<dyn HttpClient>;

/// 未配置 HTTP 协作者时使用，所有调用都失败
#[derive(Default, Clone)]
pub struct DisabledHttpClient;

#[async_trait]
impl HttpClient for DisabledHttpClient {
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        Err(crate::error::ConvoFlowError::Other(anyhow::anyhow!(
            "outbound http is disabled, refusing {} {}",
            request.method,
            request.url
        )))
    }
}
