//! 错误类型
//!
//! - [`ContainerError`]：注册 / 解析阶段同步返回的错误
//! - [`ContextError`]：节点结算（取消、超时、自定义原因）后通过 `err()` 观察到的原因
//! - [`ConfigError`]：配置加载与校验错误

use crate::container::Lifetime;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 构造函数可返回的通用错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 依赖注入容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    /// 同一类型重复注册（注册表只追加，不覆盖）
    #[error("Service '{type_name}' is already registered")]
    DuplicateRegistration { type_name: &'static str },

    /// 服务未注册；`lifetime` 为 `Some(Scoped)` 时表示注册存在但作用域生命周期尚未实现
    #[error("Service '{type_name}' is not registered{}", scoped_hint(.lifetime))]
    NotRegistered {
        type_name: &'static str,
        lifetime: Option<Lifetime>,
    },

    /// 构造函数返回失败
    #[error("Failed to construct service '{type_name}': {source}")]
    ConstructionFailed {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    /// 构造出的实例与请求类型不符
    #[error("Type mismatch: expected '{expected}' in {context}")]
    TypeMismatch {
        expected: &'static str,
        context: &'static str,
    },

    /// 当前线程的解析栈中再次出现同一类型
    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<&'static str> },

    /// 解析嵌套层数超过配置上限
    #[error("Resolution depth {depth} exceeded while resolving '{type_name}'")]
    ResolutionDepthExceeded {
        depth: usize,
        type_name: &'static str,
    },
}

fn scoped_hint(lifetime: &Option<Lifetime>) -> &'static str {
    match lifetime {
        Some(Lifetime::Scoped) => " (scoped lifetime is not supported)",
        _ => "",
    }
}

impl ContainerError {
    /// 是否为未注册错误
    pub fn is_not_registered(&self) -> bool {
        matches!(self, ContainerError::NotRegistered { .. })
    }
}

/// 节点结算原因
///
/// 节点一旦结算，原因即固定；向子节点传播时原样复制，不重新推导。
#[derive(Clone)]
pub enum ContextError {
    /// 显式取消
    Canceled,
    /// 截止时间到期
    DeadlineExceeded,
    /// 调用方提供的自定义原因
    Custom(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl ContextError {
    /// 用任意错误构造自定义原因
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ContextError::Custom(Arc::new(err))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ContextError::Canceled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ContextError::DeadlineExceeded)
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Canceled => write!(f, "context canceled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
            ContextError::Custom(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Debug for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Canceled => f.write_str("Canceled"),
            ContextError::DeadlineExceeded => f.write_str("DeadlineExceeded"),
            ContextError::Custom(err) => f.debug_tuple("Custom").field(&err.to_string()).finish(),
        }
    }
}

impl std::error::Error for ContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContextError::Custom(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

// 自定义原因按 Arc 身份比较：同一个原因传播到子节点后仍然相等
impl PartialEq for ContextError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ContextError::Canceled, ContextError::Canceled) => true,
            (ContextError::DeadlineExceeded, ContextError::DeadlineExceeded) => true,
            (ContextError::Custom(a), ContextError::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
