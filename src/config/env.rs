use crate::error::{ConvoFlowError, Result};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const MAX_TRANSITIONS_VAR: &str = "CONVOFLOW_MAX_TRANSITIONS";
pub const CALL_TIMEOUT_VAR: &str = "CONVOFLOW_CALL_TIMEOUT_MS";
pub const DEBUG_VAR: &str = "CONVOFLOW_DEBUG";

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key).map_err(|_| {
            ConvoFlowError::Other(anyhow!("environment variable `{}` is not set", key))
        })
    }

    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 读取并解析数值型环境变量，未设置时返回 None
    pub fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                ConvoFlowError::Other(anyhow!("environment variable `{}` is invalid: {}", key, e))
            }),
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var(DEBUG_VAR).is_ok()
    }
}

/// 执行引擎配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// 单次 step 内允许的最大转移次数
    #[serde(default = "default_max_transitions")]
    pub max_transitions: u32,
    /// 外部协作者调用的超时（毫秒）
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_transitions() -> u32 {
    256
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: default_max_transitions(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// 以默认值为基础，用环境变量覆盖
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(max) = EnvConfig::get_env_parsed::<u32>(MAX_TRANSITIONS_VAR)? {
            config.max_transitions = max;
        }
        if let Some(timeout) = EnvConfig::get_env_parsed::<u64>(CALL_TIMEOUT_VAR)? {
            config.call_timeout_ms = timeout;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_transitions(mut self, max_transitions: u32) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transitions == 0 {
            return Err(ConvoFlowError::Other(anyhow!("maxTransitions must be at least 1")));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConvoFlowError::Other(anyhow!("callTimeoutMs must be at least 1")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_partial_documents() {
        let config: EngineConfig = serde_json::from_str(r#"{"maxTransitions": 8}"#).unwrap();
        assert_eq!(config.max_transitions, 8);
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let config = EngineConfig::default().with_max_transitions(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_defaults() {
        env::set_var(MAX_TRANSITIONS_VAR, "32");
        env::set_var(CALL_TIMEOUT_VAR, "250");
        let config = EngineConfig::from_env().unwrap();
        env::remove_var(MAX_TRANSITIONS_VAR);
        env::remove_var(CALL_TIMEOUT_VAR);

        assert_eq!(config.max_transitions, 32);
        assert_eq!(config.call_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn unparsable_value_is_an_error() {
        assert!(EnvConfig::get_env_parsed::<u32>("CONVOFLOW_TEST_UNSET_VAR")
            .unwrap()
            .is_none());
        env::set_var("CONVOFLOW_TEST_BAD_NUMBER", "many");
        let result = EnvConfig::get_env_parsed::<u32>("CONVOFLOW_TEST_BAD_NUMBER");
        env::remove_var("CONVOFLOW_TEST_BAD_NUMBER");
        assert!(result.is_err());
    }
}
