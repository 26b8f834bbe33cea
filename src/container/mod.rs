//! 依赖注入容器
//!
//! [`Container`] 同时是服务注册表和传播树上的一个节点：
//! - 同一棵树上派生出的所有容器共享同一个 [`ServiceRegistry`]；
//! - 每次派生得到独立的 [`Node`]（截止时间、完成信号、错误、值快照）。
//!
//! 构造函数收到 `&Container`，既可以继续解析依赖，也可以读取上下文中的值和截止时间。

pub mod registry;

pub use registry::{ContainerStats, ServiceProvider, ServiceRegistry};

use crate::config::ContainerConfig;
use crate::context::{CancelHandle, Context, Done, Node, Value};
use crate::errors::{BoxError, ContainerError, ContextError};
use registry::FnServiceProvider;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 服务生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// 单例 - 注册表生命周期内只有一个实例
    Singleton,
    /// 瞬态 - 每次解析都创建新实例
    Transient,
    /// 作用域 - 可以注册，但尚未实现，解析时按未注册处理
    Scoped,
}

/// 服务容器
#[derive(Clone)]
pub struct Container {
    registry: Arc<ServiceRegistry>,
    node: Node,
}

impl Container {
    /// 创建根容器：空注册表 + 未结算的空节点
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// 按配置创建根容器
    pub fn with_config(config: ContainerConfig) -> Self {
        tracing::debug!(max_resolution_depth = config.max_resolution_depth, "container created");
        Self {
            registry: Arc::new(ServiceRegistry::new(config.max_resolution_depth)),
            node: Node::new(),
        }
    }

    fn derived(&self, node: Node) -> Self {
        Self {
            registry: self.registry.clone(),
            node,
        }
    }

    /// 共享的服务注册表
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// 本容器的传播节点
    pub fn node(&self) -> &Node {
        &self.node
    }

    // ===== 注册 / 解析 =====

    /// 注册服务
    pub fn register<T, F, E>(&self, constructor: F, lifetime: Lifetime) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        self.registry
            .register_provider(FnServiceProvider::new(constructor), lifetime)
    }

    /// 注册实现了 [`ServiceProvider`] 的提供者
    pub fn register_provider<P>(&self, provider: P, lifetime: Lifetime) -> Result<(), ContainerError>
    where
        P: ServiceProvider,
    {
        self.registry.register_provider(provider, lifetime)
    }

    /// 注册单例服务
    pub fn register_singleton<T, F, E>(&self, constructor: F) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        self.register(constructor, Lifetime::Singleton)
    }

    /// 注册瞬态服务
    pub fn register_transient<T, F, E>(&self, constructor: F) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        self.register(constructor, Lifetime::Transient)
    }

    /// 注册已构造好的实例（单例，无构造函数）
    pub fn register_instance<T>(&self, instance: T) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.registry.register_instance(instance)
    }

    /// 解析服务
    pub fn resolve<T>(&self) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.registry.resolve::<T>(self)
    }

    /// 检查服务是否已注册
    pub fn contains<T: 'static>(&self) -> bool {
        self.registry.contains::<T>()
    }

    /// 已注册服务数量
    pub fn service_count(&self) -> usize {
        self.registry.count()
    }

    /// 获取容器统计信息
    pub fn stats(&self) -> ContainerStats {
        self.registry.stats()
    }

    /// 重置统计信息
    pub fn reset_stats(&self) {
        self.registry.reset_stats()
    }

    // ===== 上下文 =====

    /// 本节点自己的截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline()
    }

    /// 完成信号
    pub fn done(&self) -> Done {
        self.node.done()
    }

    /// 结算原因；未结算时为 `None`
    pub fn err(&self) -> Option<ContextError> {
        self.node.err()
    }

    /// 按键读取上下文值
    pub fn value(&self, key: &str) -> Option<Value> {
        self.node.value(key)
    }

    /// 按键读取并向下转型
    pub fn value_as<V>(&self, key: &str) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.node.value_as(key)
    }

    /// 约定只在派生之前对根容器调用
    pub fn set_value<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.node.set_value(key, value)
    }

    /// 以 `Canceled` 结算，返回本次调用是否生效
    pub fn cancel(&self) -> bool {
        self.node.cancel()
    }

    /// 以指定原因结算；`None` 等同于 `cancel`
    pub fn cancel_with_error(&self, err: impl Into<Option<ContextError>>) -> bool {
        self.node.cancel_with_error(err)
    }

    /// 派生可取消的子容器，共享注册表
    pub fn with_cancel(&self) -> (Container, CancelHandle) {
        let (node, cancel) = self.node.with_cancel();
        (self.derived(node), cancel)
    }

    /// 派生带截止时间的子容器
    pub fn with_deadline(&self, deadline: Instant) -> (Container, CancelHandle) {
        let (node, cancel) = self.node.with_deadline(deadline);
        (self.derived(node), cancel)
    }

    /// 派生带超时的子容器
    pub fn with_timeout(&self, timeout: Duration) -> (Container, CancelHandle) {
        let (node, cancel) = self.node.with_timeout(timeout);
        (self.derived(node), cancel)
    }

    /// 派生携带额外键值的子容器
    pub fn with_value<V>(&self, key: impl Into<String>, value: V) -> Container
    where
        V: Any + Send + Sync,
    {
        self.derived(self.node.with_value(key, value))
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Context for Container {
    fn deadline(&self) -> Option<Instant> {
        self.node.deadline()
    }

    fn done(&self) -> Done {
        self.node.done()
    }

    fn err(&self) -> Option<ContextError> {
        self.node.err()
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.node.value(key)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.registry.count())
            .field("node", &self.node)
            .finish()
    }
}

/// 便捷的服务注册宏
#[macro_export]
macro_rules! register_service {
    ($container:expr, $type:ty, $factory:expr, singleton) => {
        $container.register_singleton(move |_| Ok::<$type, $crate::BoxError>($factory))
    };
    ($container:expr, $type:ty, $factory:expr, transient) => {
        $container.register_transient(move |_| Ok::<$type, $crate::BoxError>($factory))
    };
}
