//! 传播节点
//!
//! 每个节点持有：可选截止时间、一次性完成信号、只结算一次的错误槽、
//! 键值快照以及指向父节点的非拥有引用。

use super::done::Done;
use super::Value;
use crate::errors::ContextError;
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::watch;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// 节点内部状态，被 [`Node`]、[`Done`]、[`CancelHandle`] 以及监控任务共享
pub(crate) struct NodeInner {
    id: u64,
    deadline: Option<Instant>,
    /// 错误槽：`None` 表示仍处于 Active
    reason: Mutex<Option<ContextError>>,
    /// 供 OS 线程阻塞等待
    settled: Condvar,
    /// 供异步任务等待；与错误槽在同一临界区内翻转为 `true`
    done_tx: watch::Sender<bool>,
    values: RwLock<HashMap<String, Value>>,
    parent: Option<Weak<NodeInner>>,
}

impl NodeInner {
    fn new(
        deadline: Option<Instant>,
        values: HashMap<String, Value>,
        parent: Option<Weak<NodeInner>>,
    ) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            deadline,
            reason: Mutex::new(None),
            settled: Condvar::new(),
            done_tx,
            values: RwLock::new(values),
            parent,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// 结算节点。只有第一次调用生效，返回值表示本次调用是否胜出。
    pub(crate) fn settle(&self, reason: ContextError) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.clone());
        self.done_tx.send_replace(true);
        self.settled.notify_all();
        drop(slot);

        tracing::debug!(node = self.id, reason = %reason, "context settled");
        true
    }

    pub(crate) fn reason(&self) -> Option<ContextError> {
        self.reason.lock().clone()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// 阻塞当前线程直到结算；`until` 为 `None` 时无限等待。返回是否已结算。
    pub(crate) fn wait_settled(&self, until: Option<Instant>) -> bool {
        let mut slot = self.reason.lock();
        while slot.is_none() {
            match until {
                Some(deadline) => {
                    if self.settled.wait_until(&mut slot, deadline).timed_out() {
                        return slot.is_some();
                    }
                }
                None => self.settled.wait(&mut slot),
            }
        }
        true
    }
}

/// 取消/值传播树上的一个节点
///
/// `Node` 是廉价可克隆的句柄，克隆体指向同一个节点。
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// 创建根节点：无截止时间、空快照、未结算
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NodeInner::new(None, HashMap::new(), None)),
        }
    }

    /// 以当前节点为父创建子节点：快照在此刻浅拷贝
    pub(crate) fn derive(&self, deadline: Option<Instant>, extra: Option<(String, Value)>) -> Node {
        let mut values = self.inner.values.read().clone();
        if let Some((key, value)) = extra {
            values.insert(key, value);
        }
        Self {
            inner: Arc::new(NodeInner::new(
                deadline,
                values,
                Some(Arc::downgrade(&self.inner)),
            )),
        }
    }

    /// 节点编号（仅用于日志关联）
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 本节点设置的截止时间；继承自父节点的截止时间不会出现在这里
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// 完成信号
    pub fn done(&self) -> Done {
        Done::new(self.inner.clone())
    }

    /// 未结算时为 `None`，结算后为首个生效的原因
    pub fn err(&self) -> Option<ContextError> {
        self.inner.reason()
    }

    /// 只查本节点快照，不向上查找
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.values.read().get(key).cloned()
    }

    /// 按具体类型读取值，类型不符时返回 `None`
    pub fn value_as<V>(&self, key: &str) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.value(key)?.downcast::<V>().ok()
    }

    /// 原地修改本节点快照。已派生的子节点不受影响。
    pub fn set_value<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        let key = key.into();
        tracing::trace!(node = self.inner.id, key = %key, "context value set");
        self.inner.values.write().insert(key, Arc::new(value));
    }

    /// 快照中的键（已排序）
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 以 `Canceled` 结算；已结算时无操作。返回本次调用是否生效。
    pub fn cancel(&self) -> bool {
        self.inner.settle(ContextError::Canceled)
    }

    /// 以自定义原因结算；传入 `None` 等同于 [`Node::cancel`]
    pub fn cancel_with_error(&self, err: impl Into<Option<ContextError>>) -> bool {
        self.inner
            .settle(err.into().unwrap_or(ContextError::Canceled))
    }

    /// 父节点（若仍存活）
    pub fn parent(&self) -> Option<Node> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Node { inner })
    }

    /// 是否已结算
    pub fn is_done(&self) -> bool {
        self.inner.is_settled()
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            node: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("deadline", &self.inner.deadline)
            .field("err", &self.inner.reason())
            .finish()
    }
}

/// 派生操作返回的取消句柄
///
/// 只持有弱引用，不会延长子节点的生命周期。
#[derive(Clone)]
pub struct CancelHandle {
    node: Weak<NodeInner>,
}

impl CancelHandle {
    /// 以 `Canceled` 结算对应节点；节点已结算或已释放时返回 `false`
    pub fn cancel(&self) -> bool {
        match self.node.upgrade() {
            Some(inner) => inner.settle(ContextError::Canceled),
            None => false,
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("node", &self.node.upgrade().map(|inner| inner.id))
            .finish()
    }
}
