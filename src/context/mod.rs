//! 取消 / 值传播树
//!
//! 节点状态机只有两态：Active → Settled(reason)。触发结算的事件包括显式取消、
//! 自定义原因取消、截止时间到达以及父节点结算的传播；首个事件生效，其余无操作。
//!
//! 值采用派生时拷贝的快照语义：子节点看到派生那一刻父节点的全部键值，
//! 之后父子双方的写入互不可见。

mod done;
mod fork;
mod node;

pub use done::Done;
pub use node::{CancelHandle, Node};

use crate::errors::ContextError;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

/// 快照中存放的值
pub type Value = Arc<dyn Any + Send + Sync>;

/// 可取消上下文的四方法抽象
///
/// [`Node`] 与 [`crate::Container`] 都实现了该 trait，
/// 只依赖截止时间 / 完成信号 / 错误 / 值的代码可以接收任意一方。
pub trait Context: Send + Sync {
    /// 截止时间（若本节点设置了）
    fn deadline(&self) -> Option<Instant>;

    /// 完成信号
    fn done(&self) -> Done;

    /// 结算原因
    fn err(&self) -> Option<ContextError>;

    /// 本节点快照中的值
    fn value(&self, key: &str) -> Option<Value>;
}

impl Context for Node {
    fn deadline(&self) -> Option<Instant> {
        Node::deadline(self)
    }

    fn done(&self) -> Done {
        Node::done(self)
    }

    fn err(&self) -> Option<ContextError> {
        Node::err(self)
    }

    fn value(&self, key: &str) -> Option<Value> {
        Node::value(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn describe(ctx: &dyn Context) -> (bool, bool, bool) {
        (
            ctx.deadline().is_some(),
            ctx.done().is_done(),
            ctx.value("request_id").is_some(),
        )
    }

    #[test]
    fn test_node_as_context() {
        let root = Node::new();
        root.set_value("request_id", 7u64);
        let (child, _cancel) = root.with_timeout(Duration::from_secs(60));

        assert_eq!(describe(&root), (false, false, true));
        assert_eq!(describe(&child), (true, false, true));

        root.cancel();
        assert!(Context::err(&root).is_some());
        assert!(child.done().wait_timeout(Duration::from_secs(2)));
    }
}
