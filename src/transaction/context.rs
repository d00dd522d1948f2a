//! 事务上下文
//!
//! [`PhysicalTransaction`] 对应一个连接上的工作单元；[`TransactionNode`]
//! 是逻辑句柄，多个节点可以共享同一个物理事务。

use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::core::error::{DaoError, DaoResult};
use crate::storage::{Connection, ConnectionSource};
use crate::transaction::types::*;

/// 物理事务
pub struct PhysicalTransaction {
    source: Arc<dyn ConnectionSource>,
    connection: Arc<dyn Connection>,
    closed: AtomicCell<bool>,
    stats: Arc<TransactionStats>,
}

impl PhysicalTransaction {
    pub fn open(source: Arc<dyn ConnectionSource>, stats: Arc<TransactionStats>) -> DaoResult<Self> {
        let connection = source.connection()?;
        debug!("开启物理事务: {}", source.name());
        Ok(Self {
            source,
            connection,
            closed: AtomicCell::new(false),
            stats,
        })
    }

    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        &self.source
    }

    pub fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        if self.closed.load() {
            return Err(DaoError::transaction_state(format!(
                "物理事务已结束: {}",
                self.source.name()
            )));
        }
        Ok(Arc::clone(&self.connection))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load()
    }

    /// 提交并关闭连接，已结束的物理事务忽略
    pub fn commit(&self) -> DaoResult<()> {
        if self.closed.swap(true) {
            return Ok(());
        }
        if let Err(e) = self.connection.commit() {
            warn!("物理事务提交失败，回滚: {}: {}", self.source.name(), e);
            if let Err(rollback_error) = self.connection.rollback() {
                warn!("回滚物理事务 {} 失败: {}", self.source.name(), rollback_error);
            }
            if let Err(close_error) = self.connection.close() {
                warn!("关闭连接 {} 失败: {}", self.source.name(), close_error);
            }
            self.stats.increment_physical_rollbacks();
            return Err(e);
        }
        self.connection.close()?;
        self.stats.increment_physical_commits();
        debug!("物理事务已提交: {}", self.source.name());
        Ok(())
    }

    /// 回滚并关闭连接，已结束的物理事务忽略
    pub fn rollback(&self) -> DaoResult<()> {
        if self.closed.swap(true) {
            return Ok(());
        }
        let result = self.connection.rollback();
        let closed = self.connection.close();
        result?;
        closed?;
        self.stats.increment_physical_rollbacks();
        debug!("物理事务已回滚: {}", self.source.name());
        Ok(())
    }
}

/// 逻辑事务节点
///
/// 子节点只弱引用父节点，树由根节点的 `children` 持有。
pub struct TransactionNode {
    pub id: TransactionId,
    pub(crate) owner: ThreadId,
    pub(crate) parent: Option<Weak<TransactionNode>>,
    pub(crate) physical: Arc<PhysicalTransaction>,
    pub(crate) children: Mutex<Vec<Arc<TransactionNode>>>,
    /// 仍打开的子事务，按创建顺序
    pub(crate) stack: Mutex<Vec<Arc<TransactionNode>>>,
    state: AtomicCell<TransactionState>,
}

impl TransactionNode {
    pub(crate) fn new(
        id: TransactionId,
        owner: ThreadId,
        parent: Option<Weak<TransactionNode>>,
        physical: Arc<PhysicalTransaction>,
    ) -> Self {
        Self {
            id,
            owner,
            parent,
            physical,
            children: Mutex::new(Vec::new()),
            stack: Mutex::new(Vec::new()),
            state: AtomicCell::new(TransactionState::Active),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state.load()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    pub(crate) fn parent(&self) -> Option<Arc<TransactionNode>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// 根节点；根已释放时返回仍存活的最上层节点
    pub fn root(self: &Arc<Self>) -> Arc<TransactionNode> {
        let mut node = Arc::clone(self);
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(DaoError::transaction_state(format!(
                "事务 {} 已关闭 ({})",
                self.id,
                self.state()
            )));
        }
        self.physical.connection()
    }

    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        self.physical.source()
    }

    /// 从 `from` 状态迁移，成功时返回 true
    pub(crate) fn transition(&self, from: TransactionState, to: TransactionState) -> bool {
        self.state.compare_exchange(from, to).is_ok()
    }

    /// 当前树中的所有节点，根在前
    pub(crate) fn subtree(self: &Arc<Self>) -> Vec<Arc<TransactionNode>> {
        let mut nodes = vec![Arc::clone(self)];
        let mut index = 0;
        while index < nodes.len() {
            let children = nodes[index].children.lock().clone();
            nodes.extend(children);
            index += 1;
        }
        nodes
    }

    /// 子树中除自身之外的不同物理事务
    pub(crate) fn child_physicals(self: &Arc<Self>) -> Vec<Arc<PhysicalTransaction>> {
        let mut physicals: Vec<Arc<PhysicalTransaction>> = Vec::new();
        for node in self.subtree().into_iter().skip(1) {
            if Arc::ptr_eq(&node.physical, &self.physical) {
                continue;
            }
            if !physicals.iter().any(|p| Arc::ptr_eq(p, &node.physical)) {
                physicals.push(Arc::clone(&node.physical));
            }
        }
        physicals
    }

    /// 查找子树中连接来源相同且未结束的物理事务
    pub(crate) fn find_physical(
        self: &Arc<Self>,
        source: &Arc<dyn ConnectionSource>,
    ) -> Option<Arc<PhysicalTransaction>> {
        self.subtree()
            .into_iter()
            .map(|node| Arc::clone(&node.physical))
            .find(|physical| {
                !physical.is_closed() && crate::storage::same_source(physical.source(), source)
            })
    }

    /// 栈中最内层仍打开的子事务
    pub(crate) fn innermost(self: &Arc<Self>) -> Option<Arc<TransactionNode>> {
        self.stack.lock().iter().rev().find(|n| !n.is_closed()).cloned()
    }

    pub(crate) fn remove_from_stack(&self, id: TransactionId) {
        self.stack.lock().retain(|n| n.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_mock::MockConnectionSource;

    #[test]
    fn test_physical_commit_once() {
        let mock = MockConnectionSource::new("main");
        let log = mock.log();
        let stats = Arc::new(TransactionStats::new());
        let physical = PhysicalTransaction::open(Arc::new(mock), Arc::clone(&stats)).unwrap();

        physical.commit().unwrap();
        physical.commit().unwrap();
        physical.rollback().unwrap();

        assert!(physical.is_closed());
        assert!(physical.connection().is_err());
        assert_eq!(log.commits(), 1);
        assert_eq!(log.rollbacks(), 0);
        assert_eq!(stats.snapshot().physical_commits, 1);
    }

    #[test]
    fn test_failed_commit_counts_rollback() {
        let mock = MockConnectionSource::new("main").with_failing_commit();
        let log = mock.log();
        let stats = Arc::new(TransactionStats::new());
        let physical = PhysicalTransaction::open(Arc::new(mock), Arc::clone(&stats)).unwrap();

        assert!(matches!(physical.commit(), Err(DaoError::Database(_))));
        assert!(physical.is_closed());
        physical.rollback().unwrap();

        assert_eq!(log.commits(), 0);
        assert_eq!(log.rollbacks(), 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.physical_commits, 0);
        assert_eq!(snapshot.physical_rollbacks, 1);
    }

    #[test]
    fn test_child_physicals_are_distinct() {
        let stats = Arc::new(TransactionStats::new());
        let main: Arc<dyn ConnectionSource> = Arc::new(MockConnectionSource::new("main"));
        let other: Arc<dyn ConnectionSource> = Arc::new(MockConnectionSource::new("other"));
        let owner = std::thread::current().id();

        let root_physical = Arc::new(PhysicalTransaction::open(Arc::clone(&main), Arc::clone(&stats)).unwrap());
        let other_physical = Arc::new(PhysicalTransaction::open(Arc::clone(&other), Arc::clone(&stats)).unwrap());
        let root = Arc::new(TransactionNode::new(1, owner, None, Arc::clone(&root_physical)));
        for (id, physical) in [(2, &root_physical), (3, &other_physical), (4, &other_physical)] {
            let child = Arc::new(TransactionNode::new(id, owner, Some(Arc::downgrade(&root)), Arc::clone(physical)));
            root.children.lock().push(child);
        }

        let physicals = root.child_physicals();
        assert_eq!(physicals.len(), 1);
        assert!(Arc::ptr_eq(&physicals[0], &other_physical));
        assert!(root.find_physical(&other).is_some());
        assert_eq!(root.subtree().len(), 4);
    }
}
