//! 容器配置
//!
//! 支持从 TOML 文本或文件加载，缺省字段使用默认值：
//!
//! ```toml
//! max_resolution_depth = 32
//!
//! [logging]
//! level = "debug"
//! format = "compact"
//! ```

use crate::errors::ConfigError;
use crate::logging::{LogFormat, LoggingConfig};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// 默认的最大解析嵌套深度
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 64;

/// 容器配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// 单线程上解析嵌套的最大层数，超过后以 `ResolutionDepthExceeded` 失败
    pub max_resolution_depth: usize,
    /// 日志配置
    pub logging: LoggingSection,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            logging: LoggingSection::default(),
        }
    }
}

/// `[logging]` 段
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// trace / debug / info / warn / error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ContainerConfig {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ContainerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "container config loaded");
        Ok(config)
    }

    /// 校验字段取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_resolution_depth",
                reason: "must be greater than zero".to_string(),
            });
        }
        tracing::Level::from_str(&self.logging.level).map_err(|_| ConfigError::Invalid {
            field: "logging.level",
            reason: format!("unknown level '{}'", self.logging.level),
        })?;
        Ok(())
    }

    /// 转换为日志初始化参数
    pub fn logging_config(&self) -> Result<LoggingConfig, ConfigError> {
        let level = tracing::Level::from_str(&self.logging.level).map_err(|_| ConfigError::Invalid {
            field: "logging.level",
            reason: format!("unknown level '{}'", self.logging.level),
        })?;
        Ok(LoggingConfig {
            level,
            format: self.logging.format,
            ..LoggingConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_empty_document() {
        let config = ContainerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ContainerConfig::default());
        assert_eq!(config.max_resolution_depth, DEFAULT_MAX_RESOLUTION_DEPTH);
    }

    #[test]
    fn test_parse_full_document() {
        let config = ContainerConfig::from_toml_str(
            r#"
            max_resolution_depth = 8

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_resolution_depth, 8);
        assert_eq!(config.logging.format, LogFormat::Json);

        let logging = config.logging_config().unwrap();
        assert_eq!(logging.level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_validation_errors() {
        let err = ContainerConfig::from_toml_str("max_resolution_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_resolution_depth", .. }));

        let err = ContainerConfig::from_toml_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(err.to_string().contains("unknown level 'loud'"));

        let err = ContainerConfig::from_toml_str("max_resolution_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_resolution_depth = 3").unwrap();
        let config = ContainerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_resolution_depth, 3);

        let missing = ContainerConfig::load("/nonexistent/wirectx.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::FileRead(..)));
    }
}
