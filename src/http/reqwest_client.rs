use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::{HttpClient, HttpRequest, HttpResponse};
use crate::error::{ConvoFlowError, Result};

/// 基于 reqwest 的出站 HTTP 客户端
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| ConvoFlowError::Other(e.into()))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ConvoFlowError::Other(e.into()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ConvoFlowError::Other(e.into()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(HttpResponse { status, body })
    }
}
