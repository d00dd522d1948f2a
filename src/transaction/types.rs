//! 事务管理类型定义

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// 事务句柄ID
pub type TransactionId = u64;

/// 事务句柄状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// 打开状态，可获取连接
    Active,
    /// 子事务已提交，物理提交推迟到根事务
    CommitPending,
    /// 已提交
    Committed,
    /// 已回滚
    RolledBack,
}

impl TransactionState {
    /// 检查是否可以提交
    pub fn can_commit(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    /// 检查句柄是否已关闭
    pub fn is_closed(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }

    /// 检查是否已结束（不会再有物理操作）
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::CommitPending => write!(f, "CommitPending"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// 事务统计信息
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// 打开的句柄总数
    pub opened: AtomicU64,
    /// 仍处于打开状态的句柄数
    pub active: AtomicU64,
    /// 成功提交的句柄数
    pub committed: AtomicU64,
    /// 以回滚结束的句柄数
    pub rolled_back: AtomicU64,
    /// 物理提交次数
    pub physical_commits: AtomicU64,
    /// 物理回滚次数
    pub physical_rollbacks: AtomicU64,
}

/// 统计信息快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStatsSnapshot {
    pub opened: u64,
    pub active: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub physical_commits: u64,
    pub physical_rollbacks: u64,
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_physical_commits(&self) {
        self.physical_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_physical_rollbacks(&self) {
        self.physical_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransactionStatsSnapshot {
        TransactionStatsSnapshot {
            opened: self.opened.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            physical_commits: self.physical_commits.load(Ordering::Relaxed),
            physical_rollbacks: self.physical_rollbacks.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(TransactionState::Active.can_commit());
        assert!(!TransactionState::Active.is_closed());
        assert!(TransactionState::CommitPending.is_closed());
        assert!(!TransactionState::CommitPending.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::RolledBack.is_terminal());
        assert!(!TransactionState::RolledBack.can_commit());
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = TransactionStats::new();
        stats.increment_opened();
        stats.increment_opened();
        stats.decrement_active();
        stats.increment_committed();
        stats.increment_physical_commits();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.opened, 2);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.physical_commits, 1);
        assert_eq!(snapshot.rolled_back, 0);
    }
}
