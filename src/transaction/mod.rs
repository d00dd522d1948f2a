//! 事务管理模块
//!
//! 提供按线程划分的嵌套事务：
//! - 每个线程至多一个根事务，子事务挂在根事务下
//! - 连接来源相同的子事务共享同一个物理事务
//! - 子事务的提交推迟到根事务，回滚立即作用于整棵树
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sqlweave::storage::{ConnectionSource, SqliteConnectionSource, SqliteOptions};
//! use sqlweave::transaction::TransactionManager;
//!
//! # fn main() -> sqlweave::DaoResult<()> {
//! let source: Arc<dyn ConnectionSource> =
//!     Arc::new(SqliteConnectionSource::new("app.db", SqliteOptions::default()));
//! let manager = TransactionManager::new();
//!
//! let outer = manager.new_or_existing_transaction(Arc::clone(&source))?;
//! let inner = manager.new_or_existing_transaction(source)?;
//! inner.commit()?; // 推迟到根事务
//! outer.commit()?; // 物理提交
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod manager;
pub mod types;

pub use context::{PhysicalTransaction, TransactionNode};
pub use manager::{Transaction, TransactionManager, TransactionRef};
pub use types::*;
