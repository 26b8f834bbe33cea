//! 派生操作与监控任务
//!
//! 每次派生最多启动一个监控任务，等待 {子节点结算, 父节点结算, 截止时间到达}
//! 中最先发生的一个，然后立即退出。监控任务强引用父节点、弱引用子节点：
//! 子节点被释放时任务随之结束。

use super::node::{CancelHandle, Node, NodeInner};
use crate::errors::ContextError;
use lazy_static::lazy_static;
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;

lazy_static! {
    /// 监控任务专用运行时，与调用方所在的运行时无关
    static ref MONITOR_RUNTIME: Option<Runtime> = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("wirectx-monitor")
        .enable_time()
        .build()
        .map_err(|e| tracing::error!(error = %e, "failed to start monitor runtime"))
        .ok();
}

fn spawn_monitor<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match MONITOR_RUNTIME.as_ref() {
        Some(runtime) => {
            runtime.spawn(task);
        }
        None => tracing::error!("monitor runtime unavailable, parent propagation disabled"),
    }
}

async fn settled(rx: &mut watch::Receiver<bool>) {
    // 发送端被释放（节点已回收）同样视为结束
    let _ = rx.wait_for(|done| *done).await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}

impl Node {
    /// 派生可取消的子节点
    pub fn with_cancel(&self) -> (Node, CancelHandle) {
        let child = self.fork(None, None);
        let handle = child.cancel_handle();
        (child, handle)
    }

    /// 派生在 `deadline` 到达时以 `DeadlineExceeded` 结算的子节点
    pub fn with_deadline(&self, deadline: Instant) -> (Node, CancelHandle) {
        let child = self.fork(Some(deadline), None);
        let handle = child.cancel_handle();
        (child, handle)
    }

    /// `with_deadline(now + timeout)`；`now + timeout` 溢出时视为没有截止时间
    pub fn with_timeout(&self, timeout: Duration) -> (Node, CancelHandle) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// 派生携带额外键值的子节点；生命周期跟随父节点，不提供取消句柄
    pub fn with_value<V>(&self, key: impl Into<String>, value: V) -> Node
    where
        V: Any + Send + Sync,
    {
        let value: super::Value = Arc::new(value);
        self.fork(None, Some((key.into(), value)))
    }

    fn fork(&self, deadline: Option<Instant>, extra: Option<(String, super::Value)>) -> Node {
        let child = self.derive(deadline, extra);
        tracing::debug!(
            parent = self.id(),
            node = child.id(),
            deadline = ?deadline,
            "context forked"
        );

        // 父节点已结算或截止时间已过：同步结算，不启动任务
        if let Some(reason) = self.err() {
            child.inner.settle(reason);
            return child;
        }
        if matches!(deadline, Some(deadline) if deadline <= Instant::now()) {
            child.inner.settle(ContextError::DeadlineExceeded);
            return child;
        }

        link(self.inner.clone(), &child.inner, deadline);
        child
    }
}

/// 启动监控任务，把父节点的结算原因传给子节点
fn link(parent: Arc<NodeInner>, child: &Arc<NodeInner>, deadline: Option<Instant>) {
    // 在派生线程上订阅，避免任务启动前发生的结算被漏掉
    let mut parent_rx = parent.subscribe();
    let mut child_rx = child.subscribe();
    let child: Weak<NodeInner> = Arc::downgrade(child);

    spawn_monitor(async move {
        tokio::select! {
            _ = settled(&mut child_rx) => {}
            _ = settled(&mut parent_rx) => {
                if let (Some(reason), Some(child)) = (parent.reason(), child.upgrade()) {
                    if child.settle(reason) {
                        tracing::debug!(parent = parent.id(), node = child.id(), "parent settlement propagated");
                    }
                }
            }
            _ = sleep_until(deadline) => {
                if let Some(child) = child.upgrade() {
                    child.settle(ContextError::DeadlineExceeded);
                }
            }
        }
    });
}
