use async_trait::async_trait;

use super::client::LlmClient;
use super::types::{LlmRequest, LlmResponse};
use crate::error::Result;

/// 本地回显客户端，离线运行与测试使用
#[derive(Default, Clone)]
pub struct LocalEchoClient;

#[async_trait]
impl LlmClient for LocalEchoClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut content = String::new();
        if let Some(system) = &request.system {
            content.push_str(&format!("[System:{}] ", system.trim()));
        }
        content.push_str(&format!("[Echo] {}", request.user));
        Ok(LlmResponse {
            content,
            metadata: request.metadata,
        })
    }
}
