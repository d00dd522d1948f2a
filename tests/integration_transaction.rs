//! 事务集成测试
//!
//! 测试范围:
//! - 查询管理器在嵌套事务中复用同一物理连接
//! - 内层回滚级联到整棵事务树
//! - 连接来源不匹配时回退到直接连接
//! - 线程之间的事务相互独立

mod common;

use std::sync::Arc;
use std::thread;

use common::{manager, RecordingSource};
use sqlweave::query::MapQueryFilter;
use sqlweave::storage::ConnectionSource;
use sqlweave::transaction::TransactionState;
use sqlweave::DaoError;

const QUERIES: &str = r##"
[queries.touch]
template = ["UPDATE items SET touched = 1 WHERE id = #{id}"]
"##;

fn touch(id: i64) -> MapQueryFilter {
    MapQueryFilter::new().with_value("id", id)
}

#[test]
fn test_nested_scopes_share_one_physical_transaction() {
    let recording = RecordingSource::new("main");
    let log = recording.log();
    let manager = manager(Arc::new(recording), QUERIES);

    let outer = manager.new_or_existing_transaction().unwrap();
    manager.execute_update("touch", &touch(1), &[]).unwrap();

    let inner = manager.new_or_existing_transaction().unwrap();
    manager.execute_update("touch", &touch(2), &[]).unwrap();
    inner.commit().unwrap();
    assert_eq!(inner.state(), TransactionState::CommitPending);
    assert_eq!(log.commits(), 0);

    manager.execute_update("touch", &touch(3), &[]).unwrap();
    outer.commit().unwrap();

    assert_eq!(log.opened(), 1);
    assert_eq!(log.commits(), 1);
    assert_eq!(log.rollbacks(), 0);
    let updates = log
        .statements()
        .iter()
        .filter(|(sql, _)| sql.starts_with("UPDATE"))
        .count();
    assert_eq!(updates, 3);
    assert!(!manager.is_transaction_active());
}

#[test]
fn test_inner_rollback_cascades() {
    let recording = RecordingSource::new("main");
    let log = recording.log();
    let manager = manager(Arc::new(recording), QUERIES);

    let outer = manager.new_or_existing_transaction().unwrap();
    let inner = manager.new_or_existing_transaction().unwrap();
    manager.execute_update("touch", &touch(1), &[]).unwrap();
    inner.rollback().unwrap();

    assert_eq!(log.rollbacks(), 1);
    assert_eq!(outer.state(), TransactionState::RolledBack);
    assert!(matches!(outer.commit(), Err(DaoError::TransactionState(_))));
    assert!(!manager.is_transaction_active());

    // 事务结束后的更新使用直接连接并立即提交
    manager.execute_update("touch", &touch(2), &[]).unwrap();
    assert_eq!(log.opened(), 2);
    assert_eq!(log.commits(), 1);
}

#[test]
fn test_transaction_on_other_source_is_not_used() {
    let main = RecordingSource::new("main");
    let main_log = main.log();
    let other = RecordingSource::new("other");
    let other_log = other.log();
    let manager = manager(Arc::new(main), QUERIES);

    let other: Arc<dyn ConnectionSource> = Arc::new(other);
    let root = manager.transactions().new_transaction(other).unwrap();
    manager.execute_update("touch", &touch(1), &[]).unwrap();

    assert_eq!(main_log.opened(), 1);
    assert_eq!(main_log.commits(), 1);
    assert_eq!(main_log.closed(), 1);
    assert!(other_log.statements().is_empty());

    root.commit().unwrap();
    assert_eq!(other_log.commits(), 1);
}

#[test]
fn test_threads_do_not_share_transactions() {
    let recording = RecordingSource::new("main");
    let log = recording.log();
    let manager = manager(Arc::new(recording), QUERIES);

    let root = manager.new_transaction().unwrap();
    manager.execute_update("touch", &touch(1), &[]).unwrap();

    let worker = manager.clone();
    let handle = thread::spawn(move || {
        assert!(!worker.is_transaction_active());
        worker.execute_update("touch", &touch(2), &[]).is_ok()
    });
    assert!(handle.join().unwrap());

    // 其他线程的更新自行提交，本线程的事务仍未提交
    assert_eq!(log.commits(), 1);
    assert!(manager.is_transaction_active());

    root.commit().unwrap();
    assert_eq!(log.commits(), 2);
    assert_eq!(log.opened(), 2);
}

#[test]
fn test_current_transaction_reports_innermost() {
    let manager = manager(Arc::new(RecordingSource::new("main")), QUERIES);
    assert!(manager.current_transaction().is_none());

    let root = manager.new_or_existing_transaction().unwrap();
    let child = manager.new_or_existing_transaction().unwrap();
    let current = manager.current_transaction().unwrap();
    assert_eq!(current.id(), child.id());
    assert!(!current.is_root());

    child.commit().unwrap();
    assert_eq!(manager.current_transaction().map(|t| t.id()), Some(root.id()));

    root.commit().unwrap();
    assert!(manager.current_transaction().is_none());
    assert!(matches!(root.connection(), Err(DaoError::TransactionState(_))));
}
