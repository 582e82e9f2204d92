use std::env;

use crate::config::env::DEBUG_VAR;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - CONVOFLOW_DEBUG: 启用详细调试输出
    ///
    /// 使用示例：
    /// ```no_run
    /// use convoflow::logging::LoggingConfig;
    ///
    /// LoggingConfig::init();
    /// tracing::info!(flow = "age-gate", "engine ready");
    /// ```
    pub fn init() {
        let is_debug = Self::is_debug();

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Self::default_directives(is_debug)));

        let fmt_layer = if is_debug {
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
        } else {
            fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(false)
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();

        if is_debug {
            tracing::debug!("调试模式已启用");
        }
    }

    /// 未设置 RUST_LOG 时使用的过滤指令；引擎自身的日志比依赖多一级
    pub fn default_directives(is_debug: bool) -> &'static str {
        if is_debug {
            "convoflow=debug,info"
        } else {
            "convoflow=info,warn"
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug() -> bool {
        env::var(DEBUG_VAR).is_ok()
    }
}
