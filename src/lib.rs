//! wirectx
//!
//! 类型化的服务容器（依赖注入，带生命周期策略）与可取消上下文树的组合：
//!
//! - [`Container`]：按类型注册 / 解析服务，同时也是传播树上的一个节点；
//! - [`Node`]：截止时间、完成信号、只结算一次的错误、派生时拷贝的值快照；
//! - [`Context`]：截止时间 / 完成信号 / 错误 / 值 四方法抽象。
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirectx::{BoxError, Container};
//!
//! struct Logger;
//!
//! let root = Container::new();
//! root.register_singleton(|_| Ok::<_, BoxError>(Logger)).unwrap();
//! let a = root.resolve::<Logger>().unwrap();
//! let b = root.resolve::<Logger>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod errors;
pub mod logging;

pub use config::ContainerConfig;
pub use container::{Container, ContainerStats, Lifetime, ServiceProvider, ServiceRegistry};
pub use context::{CancelHandle, Context, Done, Node, Value};
pub use errors::{BoxError, ConfigError, ContainerError, ContextError};

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
