//! 连接层
//!
//! 执行层只依赖 [`Connection`] 与 [`ConnectionSource`] 两个接口。
//! 连接采用非自动提交语义：新连接即开启一个工作单元，提交或回滚结束当前
//! 工作单元并开启下一个，关闭时回滚未提交的工作。

pub mod sqlite;

#[cfg(test)]
pub(crate) mod test_mock;

use std::sync::Arc;

use crate::core::error::DaoResult;
use crate::core::value::{Value, ValueType};

pub use sqlite::{SqliteConnection, SqliteConnectionSource, SqliteOptions};

/// 绑定参数
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Value(Value),
    /// 带声明类型的空值
    Null(ValueType),
}

/// 结果行
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 按列标签取值，精确匹配优先，其次忽略大小写
    pub fn get_by_label(&self, label: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c == label)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(label)))?;
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// 行访问器的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowControl {
    Continue,
    Stop,
}

/// 数据库连接
pub trait Connection: Send + Sync {
    /// 执行更新语句，返回影响的行数
    fn execute(&self, sql: &str, params: &[SqlParam]) -> DaoResult<usize>;

    /// 执行不带参数的一条或多条语句
    fn execute_batch(&self, sql: &str) -> DaoResult<()>;

    /// 执行查询，逐行回调直到结果耗尽或回调返回 [`RowControl::Stop`]
    fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        visitor: &mut dyn FnMut(Row) -> DaoResult<RowControl>,
    ) -> DaoResult<()>;

    fn commit(&self) -> DaoResult<()>;

    fn rollback(&self) -> DaoResult<()>;

    /// 关闭连接，未提交的工作被回滚；重复关闭无副作用
    fn close(&self) -> DaoResult<()>;

    fn is_closed(&self) -> bool;
}

/// 连接来源
pub trait ConnectionSource: Send + Sync {
    fn name(&self) -> &str;

    fn connection(&self) -> DaoResult<Arc<dyn Connection>>;
}

/// 比较两个连接来源是否为同一实例
pub fn same_source(a: &Arc<dyn ConnectionSource>, b: &Arc<dyn ConnectionSource>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
