//! 日志初始化模块
//!
//! 提供 tracing 订阅器的统一初始化：`EnvFilter` 控制级别，
//! 输出格式由配置在 json（结构化，供日志采集）与 pretty（人类可读，
//! 本地开发）之间切换。

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 初始化全局 tracing 订阅器
///
/// 级别优先级：RUST_LOG 环境变量 > 配置文件 log_level > "info"。
/// 重复初始化（如测试中多次调用）不视为错误。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.log_format == "json" {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        info!(
            log_level = %config.log_level,
            log_format = %config.log_format,
            "Tracing initialized"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = ObservabilityConfig::default();
        // 第二次初始化不应 panic 或返回错误
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }
}
