use crate::error::{ConvoFlowError, Result};
use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证变量名是否符合标识符语法
    pub fn validate_identifier(name: &str) -> Result<()> {
        if IDENTIFIER_PATTERN.is_match(name) {
            Ok(())
        } else {
            Err(ConvoFlowError::Other(anyhow!(
                "`{name}` is not a valid identifier"
            )))
        }
    }

    /// 验证 URL 格式
    pub fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ConvoFlowError::Other(anyhow!("url must not be empty")));
        }

        // 允许 `{{var}}` 模板出现在 http(s):// 之后
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConvoFlowError::Other(anyhow!(
                "url `{url}` must start with http:// or https://"
            )));
        }

        Ok(())
    }

    pub fn validate_http_method(method: &str) -> Result<()> {
        if HTTP_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
            Ok(())
        } else {
            Err(ConvoFlowError::Other(anyhow!(
                "unsupported http method `{method}`"
            )))
        }
    }

    /// 验证节点 ID
    pub fn validate_node_id(node_id: &str) -> Result<()> {
        if node_id.is_empty() {
            return Err(ConvoFlowError::Other(anyhow!("node id must not be empty")));
        }

        if !node_id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConvoFlowError::Other(anyhow!(
                "node id `{node_id}` may only contain letters, digits, `_` and `-`"
            )));
        }

        Ok(())
    }

    /// 验证温度参数
    pub fn validate_temperature(temperature: f64) -> Result<()> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConvoFlowError::Other(anyhow!(
                "temperature must be within 0.0..=2.0, got {temperature}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(ConfigValidator::validate_identifier("age").is_ok());
        assert!(ConfigValidator::validate_identifier("_user_2").is_ok());
        assert!(ConfigValidator::validate_identifier("2fast").is_err());
        assert!(ConfigValidator::validate_identifier("first-name").is_err());
        assert!(ConfigValidator::validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(ConfigValidator::validate_url("").is_err());
        assert!(ConfigValidator::validate_url("example.com").is_err());
        assert!(ConfigValidator::validate_url("http://example.com").is_ok());
        assert!(ConfigValidator::validate_url("https://example.com/{{id}}").is_ok());
    }

    #[test]
    fn test_validate_node_id() {
        assert!(ConfigValidator::validate_node_id("").is_err());
        assert!(ConfigValidator::validate_node_id("node-1").is_ok());
        assert!(ConfigValidator::validate_node_id("node_1").is_ok());
        assert!(ConfigValidator::validate_node_id("node@1").is_err());
    }

    #[test]
    fn test_validate_http_method() {
        assert!(ConfigValidator::validate_http_method("post").is_ok());
        assert!(ConfigValidator::validate_http_method("FETCH").is_err());
    }

    #[test]
    fn test_validate_temperature() {
        assert!(ConfigValidator::validate_temperature(-0.1).is_err());
        assert!(ConfigValidator::validate_temperature(0.0).is_ok());
        assert!(ConfigValidator::validate_temperature(2.0).is_ok());
        assert!(ConfigValidator::validate_temperature(2.1).is_err());
    }
}
