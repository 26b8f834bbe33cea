//! 完成信号

use super::node::NodeInner;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 节点的一次性完成信号
///
/// 节点结算时恰好完成一次。可以非阻塞查询、在异步任务中等待，
/// 也可以在普通线程上阻塞等待。
#[derive(Clone)]
pub struct Done {
    node: Arc<NodeInner>,
}

impl Done {
    pub(crate) fn new(node: Arc<NodeInner>) -> Self {
        Self { node }
    }

    /// 非阻塞查询
    pub fn is_done(&self) -> bool {
        self.node.is_settled()
    }

    /// 异步等待结算
    pub async fn wait(self) {
        let mut rx = self.node.subscribe();
        // 发送端由 NodeInner 持有，self.node 保证其存活
        let _ = rx.wait_for(|done| *done).await;
    }

    /// 阻塞当前线程直到结算；不要在单线程运行时的任务里调用
    pub fn wait_blocking(&self) {
        self.node.wait_settled(None);
    }

    /// 阻塞等待至多 `timeout`，返回是否已结算
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.node.wait_settled(Some(Instant::now() + timeout))
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("node", &self.node.id())
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Node;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_cancel() {
        let node = Node::new();
        let done = node.done();
        assert!(!done.is_done());

        let waiter = tokio::spawn({
            let done = done.clone();
            async move { done.wait().await }
        });
        node.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(done.is_done());
    }

    #[test]
    fn test_wait_timeout_expires_while_active() {
        let node = Node::new();
        assert!(!node.done().wait_timeout(Duration::from_millis(10)));
        node.cancel();
        assert!(node.done().wait_timeout(Duration::from_millis(10)));
    }
}
