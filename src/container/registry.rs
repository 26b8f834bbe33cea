//! 服务注册表
//!
//! 以 `TypeId` 为键保存服务描述符。注册表只追加：同一类型只能注册一次。
//! 单例通过描述符自己的初始化锁保证只构造一次，并发的首次解析会等待同一个实例。

use super::{Container, Lifetime};
use crate::errors::{BoxError, ContainerError};
use crate::logging::OperationTimer;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// 类型擦除后的服务实例
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

/// 服务提供者trait
///
/// 闭包注册会被包装成提供者；需要携带状态的构造逻辑也可以直接实现该 trait。
pub trait ServiceProvider: Send + Sync + 'static {
    type Service: Send + Sync + 'static;

    /// 创建服务实例，可通过 `container` 解析其他依赖或读取上下文值
    fn create(&self, container: &Container) -> Result<Self::Service, BoxError>;
}

/// 类型擦除的服务提供者
pub(crate) trait ErasedServiceProvider: Send + Sync {
    fn create_erased(&self, container: &Container) -> Result<Instance, BoxError>;
}

impl<P: ServiceProvider> ErasedServiceProvider for P {
    fn create_erased(&self, container: &Container) -> Result<Instance, BoxError> {
        let service = self.create(container)?;
        Ok(Arc::new(service))
    }
}

/// 函数式服务提供者
pub(crate) struct FnServiceProvider<F, T, E> {
    factory: F,
    _phantom: PhantomData<fn() -> (T, E)>,
}

impl<F, T, E> FnServiceProvider<F, T, E> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, E> ServiceProvider for FnServiceProvider<F, T, E>
where
    F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
    T: Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    type Service = T;

    fn create(&self, container: &Container) -> Result<T, BoxError> {
        (self.factory)(container).map_err(Into::into)
    }
}

/// 服务描述符：构造函数 + 生命周期 + 单例缓存
pub(crate) struct ServiceDescriptor {
    type_name: &'static str,
    provider: Option<Arc<dyn ErasedServiceProvider>>,
    lifetime: Lifetime,
    /// 单例缓存，一旦写入不再替换
    instance: RwLock<Option<Instance>>,
    /// 单例构造期间持有
    init: Mutex<()>,
}

impl ServiceDescriptor {
    fn with_provider(
        type_name: &'static str,
        provider: Arc<dyn ErasedServiceProvider>,
        lifetime: Lifetime,
    ) -> Self {
        Self {
            type_name,
            provider: Some(provider),
            lifetime,
            instance: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    fn with_instance(type_name: &'static str, instance: Instance) -> Self {
        Self {
            type_name,
            provider: None,
            lifetime: Lifetime::Singleton,
            instance: RwLock::new(Some(instance)),
            init: Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<Instance> {
        self.instance.read().clone()
    }
}

/// 容器统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStats {
    /// 总解析次数
    pub total_resolutions: u64,
    /// 单例缓存命中次数
    pub singleton_cache_hits: u64,
    /// 单例缓存未命中次数
    pub singleton_cache_misses: u64,
    /// 瞬态服务创建次数
    pub transient_creations: u64,
    /// 构造失败次数
    pub construction_failures: u64,
    /// 服务注册数量
    pub registered_services: usize,
    /// 已缓存的单例数量
    pub active_singletons: usize,
}

impl ContainerStats {
    /// 单例缓存命中率（0.0 ~ 1.0）
    pub fn hit_rate(&self) -> f64 {
        let total = self.singleton_cache_hits + self.singleton_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.singleton_cache_hits as f64 / total as f64
        }
    }

    /// 获取性能指标摘要
    pub fn performance_summary(&self) -> String {
        format!(
            "Container Performance: {} total resolutions, {:.1}% cache hit rate, {} registered services, {} active singletons",
            self.total_resolutions,
            self.hit_rate() * 100.0,
            self.registered_services,
            self.active_singletons
        )
    }
}

#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    transient_creations: AtomicU64,
    construction_failures: AtomicU64,
    active_singletons: AtomicUsize,
}

thread_local! {
    /// 当前线程正在解析的 (注册表, 类型) 栈
    static RESOLUTION_STACK: RefCell<Vec<(usize, TypeId, &'static str)>> = const { RefCell::new(Vec::new()) };
}

/// 解析栈守卫，析构时出栈（构造函数 panic 时同样出栈）
struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(
        registry: usize,
        type_id: TypeId,
        type_name: &'static str,
        max_depth: usize,
    ) -> Result<Self, ContainerError> {
        RESOLUTION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack
                .iter()
                .position(|(owner, id, _)| *owner == registry && *id == type_id)
            {
                let mut chain: Vec<&'static str> =
                    stack[pos..].iter().map(|(_, _, name)| *name).collect();
                chain.push(type_name);
                return Err(ContainerError::CircularDependency { chain });
            }
            if stack.len() >= max_depth {
                return Err(ContainerError::ResolutionDepthExceeded {
                    depth: stack.len(),
                    type_name,
                });
            }
            stack.push((registry, type_id, type_name));
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// 服务注册表，由同一棵树上的所有容器共享
pub struct ServiceRegistry {
    services: DashMap<TypeId, Arc<ServiceDescriptor>>,
    max_resolution_depth: usize,
    stats: InnerStats,
}

impl ServiceRegistry {
    pub(crate) fn new(max_resolution_depth: usize) -> Self {
        Self {
            services: DashMap::new(),
            max_resolution_depth,
            stats: InnerStats::default(),
        }
    }

    fn insert<T: 'static>(&self, descriptor: ServiceDescriptor) -> Result<(), ContainerError> {
        let type_name = descriptor.type_name;
        let lifetime = descriptor.lifetime;
        let cached = descriptor.instance.read().is_some();
        match self.services.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => {
                tracing::warn!(service = type_name, "duplicate registration rejected");
                Err(ContainerError::DuplicateRegistration { type_name })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(descriptor));
                if cached {
                    self.stats.active_singletons.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(service = type_name, lifetime = ?lifetime, "service registered");
                Ok(())
            }
        }
    }

    pub(crate) fn register_provider<P>(&self, provider: P, lifetime: Lifetime) -> Result<(), ContainerError>
    where
        P: ServiceProvider,
    {
        let descriptor = ServiceDescriptor::with_provider(
            type_name::<P::Service>(),
            Arc::new(provider),
            lifetime,
        );
        self.insert::<P::Service>(descriptor)
    }

    pub(crate) fn register_instance<T>(&self, instance: T) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.insert::<T>(ServiceDescriptor::with_instance(
            type_name::<T>(),
            Arc::new(instance),
        ))
    }

    pub(crate) fn resolve<T>(&self, container: &Container) -> Result<Arc<T>, ContainerError>
    where
        T: Send + Sync + 'static,
    {
        self.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

        let type_id = TypeId::of::<T>();
        let type_name = type_name::<T>();

        // 克隆出描述符后立即释放分片锁，构造函数可能递归解析
        let descriptor = self
            .services
            .get(&type_id)
            .map(|entry| entry.value().clone())
            .ok_or(ContainerError::NotRegistered {
                type_name,
                lifetime: None,
            })?;

        let instance = match descriptor.lifetime {
            Lifetime::Singleton => self.resolve_singleton(&descriptor, container, type_id)?,
            Lifetime::Transient => {
                let _guard = self.enter(type_id, type_name)?;
                let instance = self.construct(&descriptor, container)?;
                self.stats.transient_creations.fetch_add(1, Ordering::Relaxed);
                instance
            }
            Lifetime::Scoped => {
                return Err(ContainerError::NotRegistered {
                    type_name,
                    lifetime: Some(Lifetime::Scoped),
                })
            }
        };

        instance
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                expected: type_name,
                context: "service resolution",
            })
    }

    fn resolve_singleton(
        &self,
        descriptor: &ServiceDescriptor,
        container: &Container,
        type_id: TypeId,
    ) -> Result<Instance, ContainerError> {
        if let Some(cached) = descriptor.cached() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(service = descriptor.type_name, "singleton cache hit");
            return Ok(cached);
        }

        // 先入栈再拿初始化锁：同线程的循环依赖在这里失败，而不是在锁上自锁
        let _guard = self.enter(type_id, descriptor.type_name)?;
        let _init = descriptor.init.lock();

        // 等锁期间可能已被其他线程构造完成
        if let Some(cached) = descriptor.cached() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        let instance = self.construct(descriptor, container)?;
        *descriptor.instance.write() = Some(instance.clone());
        self.stats.active_singletons.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(service = descriptor.type_name, "singleton constructed");
        Ok(instance)
    }

    fn construct(
        &self,
        descriptor: &ServiceDescriptor,
        container: &Container,
    ) -> Result<Instance, ContainerError> {
        let provider = descriptor
            .provider
            .as_ref()
            .ok_or(ContainerError::NotRegistered {
                type_name: descriptor.type_name,
                lifetime: Some(descriptor.lifetime),
            })?;

        let timer = OperationTimer::for_subject("construct", descriptor.type_name);
        let instance = provider.create_erased(container).map_err(|source| {
            self.stats.construction_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(service = descriptor.type_name, error = %source, "service construction failed");
            ContainerError::ConstructionFailed {
                type_name: descriptor.type_name,
                source,
            }
        })?;
        timer.finish();
        Ok(instance)
    }

    fn enter(&self, type_id: TypeId, type_name: &'static str) -> Result<ResolutionGuard, ContainerError> {
        let registry = self as *const ServiceRegistry as usize;
        ResolutionGuard::enter(registry, type_id, type_name, self.max_resolution_depth).map_err(|err| {
            tracing::warn!(service = type_name, error = %err, "resolution aborted");
            err
        })
    }

    /// 检查类型是否已注册
    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// 已注册服务数量
    pub fn count(&self) -> usize {
        self.services.len()
    }

    /// 已注册类型的生命周期
    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.services
            .get(&TypeId::of::<T>())
            .map(|entry| entry.value().lifetime)
    }

    /// 已注册服务的类型名（已排序）
    pub fn registered_services(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .services
            .iter()
            .map(|entry| entry.value().type_name)
            .collect();
        names.sort_unstable();
        names
    }

    /// 统计快照
    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.stats.total_resolutions.load(Ordering::Relaxed),
            singleton_cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            singleton_cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            transient_creations: self.stats.transient_creations.load(Ordering::Relaxed),
            construction_failures: self.stats.construction_failures.load(Ordering::Relaxed),
            registered_services: self.count(),
            active_singletons: self.stats.active_singletons.load(Ordering::Relaxed),
        }
    }

    /// 清零计数器；注册数与已缓存单例数反映真实状态，不受影响
    pub fn reset_stats(&self) {
        self.stats.total_resolutions.store(0, Ordering::Relaxed);
        self.stats.cache_hits.store(0, Ordering::Relaxed);
        self.stats.cache_misses.store(0, Ordering::Relaxed);
        self.stats.transient_creations.store(0, Ordering::Relaxed);
        self.stats.construction_failures.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.registered_services())
            .field("max_resolution_depth", &self.max_resolution_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Debug)]
    struct TestService {
        id: usize,
    }

    struct TestServiceProvider {
        counter: Arc<AtomicUsize>,
    }

    impl ServiceProvider for TestServiceProvider {
        type Service = TestService;

        fn create(&self, _container: &Container) -> Result<TestService, BoxError> {
            Ok(TestService {
                id: self.counter.fetch_add(1, Ordering::SeqCst),
            })
        }
    }

    #[test]
    fn test_provider_trait_registration() {
        let container = Container::new();
        let counter = Arc::new(AtomicUsize::new(0));
        container
            .register_provider(
                TestServiceProvider {
                    counter: counter.clone(),
                },
                Lifetime::Transient,
            )
            .unwrap();

        let first = container.resolve::<TestService>().unwrap();
        let second = container.resolve::<TestService>().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(container.registry().lifetime_of::<TestService>(), Some(Lifetime::Transient));
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let container = Container::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        container
            .register_singleton(move |_| {
                thread::sleep(std::time::Duration::from_millis(20));
                Ok::<_, BoxError>(TestService {
                    id: counter_clone.fetch_add(1, Ordering::SeqCst),
                })
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                thread::spawn(move || container.resolve::<TestService>().unwrap())
            })
            .collect();
        let resolved: Vec<Arc<TestService>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(resolved.iter().all(|s| Arc::ptr_eq(s, &resolved[0])));

        let stats = container.stats();
        assert_eq!(stats.singleton_cache_misses, 1);
        assert_eq!(stats.singleton_cache_hits, 7);
        assert_eq!(stats.active_singletons, 1);
    }

    #[test]
    fn test_failed_singleton_is_retried() {
        let container = Container::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        container
            .register_singleton(move |_| {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BoxError::from("not ready"))
                } else {
                    Ok(TestService { id: 99 })
                }
            })
            .unwrap();

        let err = container.resolve::<TestService>().unwrap_err();
        assert!(matches!(err, ContainerError::ConstructionFailed { .. }));
        assert!(err.to_string().contains("not ready"));

        assert_eq!(container.resolve::<TestService>().unwrap().id, 99);
        assert_eq!(container.stats().construction_failures, 1);
    }

    #[derive(Debug)]
    struct Left;
    #[derive(Debug)]
    struct Right;

    #[test]
    fn test_cycle_fails_fast() {
        let container = Container::new();
        container
            .register_singleton(|c: &Container| c.resolve::<Right>().map(|_| Left))
            .unwrap();
        container
            .register_transient(|c: &Container| c.resolve::<Left>().map(|_| Right))
            .unwrap();

        let err = container.resolve::<Left>().unwrap_err();
        // 外层错误被构造失败包裹，内层是循环依赖
        let text = err.to_string();
        assert!(text.contains("Circular dependency detected"), "{text}");
        assert!(text.contains("Left"));

        // 守卫已出栈，同一线程后续解析不受影响
        assert!(container.resolve::<Left>().is_err());
        RESOLUTION_STACK.with(|stack| assert!(stack.borrow().is_empty()));
    }

    #[test]
    fn test_resolution_depth_limit() {
        let container = Container::with_config(crate::config::ContainerConfig {
            max_resolution_depth: 1,
            ..Default::default()
        });
        container
            .register_transient(|_| Ok::<_, BoxError>(TestService { id: 1 }))
            .unwrap();
        container
            .register_transient(|c: &Container| c.resolve::<TestService>().map(|s| s.id))
            .unwrap();

        assert!(container.resolve::<TestService>().is_ok());
        let err = container.resolve::<usize>().unwrap_err();
        assert!(err.to_string().contains("Resolution depth 1 exceeded"), "{err}");
    }

    #[test]
    fn test_stats_summary_and_reset() {
        let container = Container::new();
        container.register_instance(TestService { id: 5 }).unwrap();
        container.resolve::<TestService>().unwrap();
        container.resolve::<TestService>().unwrap();

        let stats = container.stats();
        assert_eq!(stats.total_resolutions, 2);
        assert_eq!(stats.singleton_cache_hits, 2);
        assert_eq!(stats.active_singletons, 1);
        assert_eq!(stats.hit_rate(), 1.0);
        assert!(stats.performance_summary().contains("100.0% cache hit rate"));

        container.reset_stats();
        let stats = container.stats();
        assert_eq!(stats.total_resolutions, 0);
        assert_eq!(stats.registered_services, 1);
        assert_eq!(stats.active_singletons, 1);
    }
}
