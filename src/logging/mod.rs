use serde::Deserialize;
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志格式配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读格式
    Pretty,
    /// JSON 格式
    Json,
    /// 紧凑格式
    Compact,
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 存在时以其为准）
    pub level: Level,
    /// 输出格式
    pub format: LogFormat,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否显示线程ID
    pub show_thread_ids: bool,
    /// 终端颜色（JSON 格式忽略）
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: false,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            show_target: true,
            // 监控任务运行在独立线程上，开发时打开线程ID便于对照
            show_thread_ids: true,
            ansi: true,
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            show_target: false,
            show_thread_ids: false,
            ansi: false,
        }
    }

    /// 创建测试环境配置
    pub fn testing() -> Self {
        Self {
            level: Level::ERROR,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            ansi: false,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// 初始化日志系统
///
/// 全局 subscriber 只能安装一次，重复调用返回错误而不是 panic。
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = tracing_subscriber::registry().with(config.filter());

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(config.ansi);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(config.ansi);
            registry.with(fmt_layer).try_init()?;
        }
    }

    tracing::info!(
        level = ?config.level,
        format = ?config.format,
        "Logging system initialized"
    );

    Ok(())
}

/// 操作性能计时器
///
/// 注册表用它记录每次服务构造的耗时；未调用 `finish` 就被丢弃时不记录。
pub struct OperationTimer {
    start: Instant,
    operation: &'static str,
    subject: &'static str,
}

impl OperationTimer {
    /// 创建新的计时器
    pub fn new(operation: &'static str) -> Self {
        Self::for_subject(operation, "")
    }

    /// 创建针对某个对象（如服务类型名）的计时器
    pub fn for_subject(operation: &'static str, subject: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
            subject,
        }
    }

    /// 完成计时并记录日志
    pub fn finish(self) -> std::time::Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = self.operation,
            subject = self.subject,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
        duration
    }

    /// 获取当前经过时间
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LoggingConfig::development().level, Level::DEBUG);
        assert_eq!(LoggingConfig::production().format, LogFormat::Json);
        assert!(!LoggingConfig::testing().ansi);
        assert!(!LoggingConfig::production().ansi);
    }

    #[test]
    fn test_init_twice_is_an_error() {
        // 其他测试可能已经安装过 subscriber，因此第一次调用的结果不做断言
        let _ = init_logging(LoggingConfig::testing());
        assert!(init_logging(LoggingConfig::testing()).is_err());
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::for_subject("construct", "Database");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed() >= std::time::Duration::from_millis(5));
        assert!(timer.finish() >= std::time::Duration::from_millis(5));
    }
}
