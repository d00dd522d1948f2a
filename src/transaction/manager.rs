//! 事务管理器
//!
//! 每个线程至多有一个根事务。根事务存在时，`new_or_existing_transaction`
//! 创建挂在根下的子事务：连接来源与树中某个未结束的物理事务相同则共享它，
//! 否则开启新的物理事务。子事务的提交推迟到根事务，任意节点的回滚立即回滚
//! 整棵树。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use log::{debug, warn};

use crate::core::error::{DaoError, DaoResult};
use crate::storage::{same_source, Connection, ConnectionSource};
use crate::transaction::context::{PhysicalTransaction, TransactionNode};
use crate::transaction::types::*;

struct ManagerInner {
    /// 线程到根事务
    roots: DashMap<ThreadId, Arc<TransactionNode>>,
    id_generator: AtomicU64,
    stats: Arc<TransactionStats>,
}

/// 事务管理器
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                roots: DashMap::new(),
                id_generator: AtomicU64::new(1),
                stats: Arc::new(TransactionStats::new()),
            }),
        }
    }

    /// 开启根事务，当前线程已有根事务时返回错误
    pub fn new_transaction(&self, source: Arc<dyn ConnectionSource>) -> DaoResult<Transaction> {
        let owner = thread::current().id();
        if let Some(root) = self.inner.roots.get(&owner) {
            return Err(DaoError::transaction_state(format!(
                "当前线程已有活动事务 {}",
                root.id
            )));
        }

        let physical = Arc::new(PhysicalTransaction::open(source, Arc::clone(&self.inner.stats))?);
        let node = Arc::new(TransactionNode::new(self.next_id(), owner, None, physical));
        self.inner.roots.insert(owner, Arc::clone(&node));
        self.inner.stats.increment_opened();
        debug!("开启根事务 {}", node.id);
        Ok(self.handle(node))
    }

    /// 没有根事务时开启根事务，否则开启子事务
    pub fn new_or_existing_transaction(&self, source: Arc<dyn ConnectionSource>) -> DaoResult<Transaction> {
        let owner = thread::current().id();
        let root = match self.inner.roots.get(&owner) {
            Some(root) => Arc::clone(root.value()),
            None => return self.new_transaction(source),
        };

        let physical = match root.find_physical(&source) {
            Some(physical) => physical,
            None => Arc::new(PhysicalTransaction::open(source, Arc::clone(&self.inner.stats))?),
        };
        let node = Arc::new(TransactionNode::new(
            self.next_id(),
            owner,
            Some(Arc::downgrade(&root)),
            physical,
        ));
        root.children.lock().push(Arc::clone(&node));
        root.stack.lock().push(Arc::clone(&node));
        self.inner.stats.increment_opened();
        debug!("开启子事务 {} (根事务 {})", node.id, root.id);
        Ok(self.handle(node))
    }

    pub fn is_transaction_active(&self) -> bool {
        self.inner
            .roots
            .get(&thread::current().id())
            .map(|root| !root.is_closed())
            .unwrap_or(false)
    }

    /// 当前线程最内层仍打开的事务
    pub fn current_transaction(&self) -> Option<TransactionRef> {
        let root = Arc::clone(self.inner.roots.get(&thread::current().id())?.value());
        if let Some(child) = root.innermost() {
            return Some(TransactionRef { node: child });
        }
        if root.is_closed() {
            return None;
        }
        Some(TransactionRef { node: root })
    }

    /// 当前线程事务树中与 `source` 对应的连接
    ///
    /// 最内层事务的连接来源相同时返回它的连接，否则在整棵树中查找未结束的
    /// 同源物理事务；都没有时返回 `None`。
    pub fn transaction_connection(
        &self,
        source: &Arc<dyn ConnectionSource>,
    ) -> DaoResult<Option<Arc<dyn Connection>>> {
        let Some(current) = self.current_transaction() else {
            return Ok(None);
        };
        if same_source(current.source(), source) {
            return current.connection().map(Some);
        }
        match current.node.root().find_physical(source) {
            Some(physical) => physical.connection().map(Some),
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> TransactionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn next_id(&self) -> TransactionId {
        self.inner.id_generator.fetch_add(1, Ordering::SeqCst)
    }

    fn handle(&self, node: Arc<TransactionNode>) -> Transaction {
        Transaction {
            node,
            manager: self.clone(),
        }
    }

    fn commit(&self, node: &Arc<TransactionNode>) -> DaoResult<()> {
        if !node.state().can_commit() {
            return Err(DaoError::transaction_state(format!(
                "事务 {} 无法提交 ({})",
                node.id,
                node.state()
            )));
        }

        let has_children = !node.children.lock().is_empty();
        if !node.is_root() && !has_children {
            if node.transition(TransactionState::Active, TransactionState::CommitPending) {
                self.inner.stats.decrement_active();
                self.inner.stats.increment_committed();
            }
            self.finish_child(node);
            debug!("子事务 {} 已提交，等待根事务提交", node.id);
            return Ok(());
        }

        let outcome = node
            .child_physicals()
            .iter()
            .try_for_each(|physical| physical.commit())
            .and_then(|_| node.physical.commit());
        if let Err(e) = outcome {
            warn!("事务 {} 提交失败，回滚整棵事务树: {}", node.id, e);
            if let Err(rollback_error) = self.rollback_tree(&node.root()) {
                warn!("事务 {} 回滚失败: {}", node.id, rollback_error);
            }
            return Err(e);
        }

        for descendant in node.subtree() {
            if descendant.transition(TransactionState::Active, TransactionState::Committed) {
                self.inner.stats.decrement_active();
                self.inner.stats.increment_committed();
            } else {
                descendant.transition(TransactionState::CommitPending, TransactionState::Committed);
            }
        }
        if node.is_root() {
            self.deregister(node);
        } else {
            self.finish_child(node);
        }
        debug!("事务 {} 已提交", node.id);
        Ok(())
    }

    fn rollback(&self, node: &Arc<TransactionNode>) -> DaoResult<()> {
        if node.is_closed() {
            return Err(DaoError::transaction_state(format!(
                "事务 {} 已关闭 ({})",
                node.id,
                node.state()
            )));
        }
        self.rollback_tree(&node.root())
    }

    /// 回滚整棵树中的所有物理事务
    fn rollback_tree(&self, root: &Arc<TransactionNode>) -> DaoResult<()> {
        let mut first_error = None;
        for physical in root.child_physicals() {
            if let Err(e) = physical.rollback() {
                warn!("回滚物理事务 {} 失败: {}", physical.source().name(), e);
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = root.physical.rollback() {
            warn!("回滚物理事务 {} 失败: {}", root.physical.source().name(), e);
            first_error.get_or_insert(e);
        }

        for node in root.subtree() {
            if node.transition(TransactionState::Active, TransactionState::RolledBack) {
                self.inner.stats.decrement_active();
                self.inner.stats.increment_rolled_back();
            } else if node.transition(TransactionState::CommitPending, TransactionState::RolledBack) {
                self.inner.stats.increment_rolled_back();
            }
        }
        self.deregister(root);
        debug!("事务树 {} 已回滚", root.id);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 关闭句柄，未提交时回滚；重复关闭无副作用
    fn close(&self, node: &Arc<TransactionNode>) -> DaoResult<()> {
        if node.is_closed() {
            self.finish_child(node);
            return Ok(());
        }
        debug!("事务 {} 未提交即关闭，执行回滚", node.id);
        self.rollback_tree(&node.root())
    }

    fn finish_child(&self, node: &Arc<TransactionNode>) {
        if let Some(parent) = node.parent() {
            parent.root().remove_from_stack(node.id);
        }
    }

    fn deregister(&self, root: &Arc<TransactionNode>) {
        self.inner
            .roots
            .remove_if(&root.owner, |_, registered| registered.id == root.id);
        root.stack.lock().clear();
        root.children.lock().clear();
    }
}

/// 当前事务的非所有权引用，释放时不关闭事务
#[derive(Clone)]
pub struct TransactionRef {
    node: Arc<TransactionNode>,
}

impl TransactionRef {
    pub fn id(&self) -> TransactionId {
        self.node.id
    }

    pub fn is_root(&self) -> bool {
        self.node.is_root()
    }

    pub fn state(&self) -> TransactionState {
        self.node.state()
    }

    pub fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        self.node.connection()
    }

    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        self.node.source()
    }
}

/// 事务句柄，释放时若仍打开则回滚
pub struct Transaction {
    node: Arc<TransactionNode>,
    manager: TransactionManager,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.node.id
    }

    pub fn is_root(&self) -> bool {
        self.node.is_root()
    }

    pub fn state(&self) -> TransactionState {
        self.node.state()
    }

    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }

    pub fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        self.node.connection()
    }

    pub fn source(&self) -> &Arc<dyn ConnectionSource> {
        self.node.source()
    }

    pub fn commit(&self) -> DaoResult<()> {
        self.manager.commit(&self.node)
    }

    pub fn rollback(&self) -> DaoResult<()> {
        self.manager.rollback(&self.node)
    }

    pub fn close(&self) -> DaoResult<()> {
        self.manager.close(&self.node)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(e) = self.manager.close(&self.node) {
            warn!("关闭事务 {} 失败: {}", self.node.id, e);
        }
    }
}
