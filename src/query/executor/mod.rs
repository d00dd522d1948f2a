//! 查询执行
//!
//! [`QueryManager`] 为每次调用解析连接：当前线程的事务中有同源连接时使用
//! 事务的连接，否则直接从连接来源获取。事务持有的连接不会被执行层提交或关闭；
//! 直接获取的连接在调用结束时关闭。同一模板的并发执行由模板上的锁串行化。

pub mod digester;
pub mod reentrancy;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::config::EngineConfig;
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{convert, Value, ValueType};
use crate::query::filter::{BulkQueryFilter, QueryFilter};
use crate::query::source::QuerySource;
use crate::query::template::{QueryTemplate, RenderedQuery};
use crate::storage::{Connection, Row, RowControl};
use crate::transaction::{Transaction, TransactionManager, TransactionRef};

pub use digester::{DataDigester, Record, RecordDigester, RowView};

/// 本次调用使用的连接
enum ConnectionLease {
    /// 直接从连接来源获取，由执行层提交并关闭
    Direct(Arc<dyn Connection>),
    /// 由事务持有，提交和关闭交给事务
    Transactional(Arc<dyn Connection>),
}

impl ConnectionLease {
    fn connection(&self) -> &dyn Connection {
        match self {
            ConnectionLease::Direct(conn) | ConnectionLease::Transactional(conn) => conn.as_ref(),
        }
    }

    fn commit(&self) -> DaoResult<()> {
        match self {
            ConnectionLease::Direct(conn) => conn.commit(),
            ConnectionLease::Transactional(_) => Ok(()),
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let ConnectionLease::Direct(conn) = self {
            if let Err(e) = conn.close() {
                warn!("释放连接失败: {}", e);
            }
        }
    }
}

struct ManagerInner {
    source: Arc<dyn QuerySource>,
    transactions: TransactionManager,
    engine: EngineConfig,
}

/// 查询管理器
#[derive(Clone)]
pub struct QueryManager {
    inner: Arc<ManagerInner>,
}

impl QueryManager {
    pub fn new(source: Arc<dyn QuerySource>, transactions: TransactionManager) -> Self {
        Self::with_engine(source, transactions, EngineConfig::default())
    }

    pub fn with_engine(
        source: Arc<dyn QuerySource>,
        transactions: TransactionManager,
        engine: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                source,
                transactions,
                engine,
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn QuerySource> {
        &self.inner.source
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.inner.engine
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.inner.source.has_query(name)
    }

    pub fn query(&self, name: &str) -> DaoResult<Arc<QueryTemplate>> {
        self.inner
            .source
            .query(name)
            .ok_or_else(|| DaoError::NoSuchQuery(name.to_string()))
    }

    pub fn query_param(&self, name: &str, param: &str) -> DaoResult<Option<String>> {
        Ok(self.query(name)?.param(param).map(str::to_string))
    }

    /// 渲染后的 SQL 文本，占位符输出为 `?`
    pub fn query_text(&self, name: &str, filter: &dyn QueryFilter) -> DaoResult<String> {
        let _context = reentrancy::enter(self);
        self.query(name)?.render_text(filter)
    }

    pub fn render(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<RenderedQuery> {
        let _context = reentrancy::enter(self);
        self.query(name)?.render(filter, args)
    }

    fn lease(&self) -> DaoResult<ConnectionLease> {
        let source = self.inner.source.connection_source();
        if let Some(conn) = self.inner.transactions.transaction_connection(&source)? {
            return Ok(ConnectionLease::Transactional(conn));
        }
        Ok(ConnectionLease::Direct(source.connection()?))
    }

    fn failed(name: &str, sql: &str, e: DaoError) -> DaoError {
        error!("执行查询 {} 失败: {} [{}]", name, e, sql);
        e.with_query(name, sql)
    }

    /// 执行更新并提交，返回影响的行数
    pub fn execute_update(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<usize> {
        let _context = reentrancy::enter(self);
        let query = self.query(name)?;
        let _guard = query.lock();
        let rendered = query.render(filter, args)?;
        debug!("执行更新 {}: {} {:?}", name, rendered.sql, rendered.params);

        let lease = self.lease()?;
        let rows = lease
            .connection()
            .execute(&rendered.sql, &rendered.sql_params())
            .and_then(|rows| lease.commit().map(|_| rows))
            .map_err(|e| Self::failed(name, &rendered.sql, e))?;
        Ok(rows)
    }

    /// 批量更新，每 `commit_count` 行提交一次，结束时提交剩余的行
    ///
    /// 某一行失败时中止剩余的行，之前已提交的行保持有效。
    pub fn execute_bulk_updates<F: BulkQueryFilter>(&self, name: &str, filter: &mut F) -> DaoResult<usize> {
        let _context = reentrancy::enter(self);
        let query = self.query(name)?;
        let _guard = query.lock();
        let bulk = query.build_bulk(&*filter)?;
        let commit_count = filter.commit_count();
        debug!("批量更新 {}: {} (每 {} 行提交)", name, bulk.sql(), commit_count);

        let lease = self.lease()?;
        let conn = lease.connection();
        let mut executed = 0usize;
        let mut uncommitted = 0usize;
        while filter.next()? {
            let params = bulk.populate_params(&*filter)?;
            conn.execute(bulk.sql(), &params)
                .map_err(|e| Self::failed(name, bulk.sql(), e))?;
            executed += 1;
            uncommitted += 1;
            if commit_count > 0 && uncommitted as i64 >= commit_count {
                lease.commit().map_err(|e| Self::failed(name, bulk.sql(), e))?;
                uncommitted = 0;
            }
        }
        if uncommitted > 0 {
            lease.commit().map_err(|e| Self::failed(name, bulk.sql(), e))?;
        }
        debug!("批量更新 {} 完成: {} 行", name, executed);
        Ok(executed)
    }

    /// 执行 DDL；没有绑定参数时允许多条语句
    pub fn execute_ddl(&self, name: &str, filter: &dyn QueryFilter) -> DaoResult<()> {
        let _context = reentrancy::enter(self);
        let query = self.query(name)?;
        let _guard = query.lock();
        let rendered = query.render(filter, &[])?;
        debug!("执行 DDL {}: {}", name, rendered.sql);

        let lease = self.lease()?;
        let conn = lease.connection();
        let outcome = if rendered.params.is_empty() {
            conn.execute_batch(&rendered.sql)
        } else {
            conn.execute(&rendered.sql, &rendered.sql_params()).map(|_| ())
        };
        outcome
            .and_then(|_| lease.commit())
            .map_err(|e| Self::failed(name, &rendered.sql, e))
    }

    /// 逐行调用摘要器，摘要结果交给 `sink`；`sink` 返回 true 时停止遍历
    fn digest_rows<T, D>(
        &self,
        name: &str,
        filter: &dyn QueryFilter,
        args: &[Value],
        digester: &mut D,
        mut sink: impl FnMut(T) -> bool,
    ) -> DaoResult<()>
    where
        D: DataDigester<T> + ?Sized,
    {
        let _context = reentrancy::enter(self);
        let query = self.query(name)?;
        let _guard = query.lock();
        let rendered = query.render(filter, args)?;
        debug!("执行查询 {}: {} {:?}", name, rendered.sql, rendered.params);

        let lease = self.lease()?;
        let stop = Cell::new(false);
        let mut index = 0;
        let outcome = lease.connection().query(&rendered.sql, &rendered.sql_params(), &mut |row: Row| -> DaoResult<RowControl> {
            let view = RowView::new(&row, index, &query, filter, &stop);
            index += 1;
            let full = match digester.digest(&view)? {
                Some(item) => sink(item),
                None => false,
            };
            Ok(if stop.get() || full {
                RowControl::Stop
            } else {
                RowControl::Continue
            })
        });
        let finalized = digester.finalize();
        outcome.map_err(|e| Self::failed(name, &rendered.sql, e))?;
        finalized
    }

    fn fetch_rows<T, D>(
        &self,
        name: &str,
        filter: &dyn QueryFilter,
        args: &[Value],
        digester: &mut D,
        limit: Option<usize>,
    ) -> DaoResult<Vec<T>>
    where
        D: DataDigester<T> + ?Sized,
    {
        let mut results = Vec::new();
        self.digest_rows(name, filter, args, digester, |item| {
            results.push(item);
            limit.map(|limit| results.len() >= limit).unwrap_or(false)
        })?;
        Ok(results)
    }

    /// 用摘要器遍历结果，结果由摘要器自行保存，返回值被丢弃
    pub fn execute_fetch<T, D>(&self, name: &str, filter: &dyn QueryFilter, args: &[Value], digester: &mut D) -> DaoResult<()>
    where
        D: DataDigester<T> + ?Sized,
    {
        self.digest_rows(name, filter, args, digester, |_| false)
    }

    pub fn fetch_beans<T, D>(&self, name: &str, filter: &dyn QueryFilter, args: &[Value], digester: &mut D) -> DaoResult<Vec<T>>
    where
        D: DataDigester<T> + ?Sized,
    {
        self.fetch_rows(name, filter, args, digester, None)
    }

    /// 第一个摘要结果
    pub fn fetch_bean<T, D>(&self, name: &str, filter: &dyn QueryFilter, args: &[Value], digester: &mut D) -> DaoResult<Option<T>>
    where
        D: DataDigester<T> + ?Sized,
    {
        Ok(self.fetch_rows(name, filter, args, digester, Some(1))?.into_iter().next())
    }

    pub fn fetch_records(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Vec<Record>> {
        self.fetch_beans(name, filter, args, &mut RecordDigester::new())
    }

    pub fn fetch_record(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Option<Record>> {
        self.fetch_bean(name, filter, args, &mut RecordDigester::new())
    }

    /// 使用查询来源为该查询配置的摘要器
    pub fn fetch_values(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Vec<Value>> {
        let query = self.query(name)?;
        let mut digester = self
            .inner
            .source
            .data_digester(&query)
            .ok_or_else(|| DaoError::execution(format!("查询 {} 没有可用的摘要器", name)))?;
        self.fetch_beans(name, filter, args, &mut digester)
    }

    /// 第一行第一列，已应用列表达式；没有结果时为 `Value::Null`
    pub fn fetch_value(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Value> {
        let mut digester = FirstColumn;
        Ok(self
            .fetch_bean(name, filter, args, &mut digester)?
            .unwrap_or_default())
    }

    pub fn fetch_int(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Option<i64>> {
        let value = self.fetch_value(name, filter, args)?;
        if value.is_null() {
            return Ok(None);
        }
        convert(&value, ValueType::Int)
            .and_then(|v| v.as_int())
            .map(Some)
            .ok_or_else(|| DaoError::execution(format!("查询 {} 的结果不是整数: {}", name, value)))
    }

    pub fn fetch_string(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<Option<String>> {
        let value = self.fetch_value(name, filter, args)?;
        Ok(if value.is_null() {
            None
        } else {
            Some(value.to_string())
        })
    }

    /// 第一列的值列表，`limit` 限制返回的行数
    pub fn fetch_single_column_list(
        &self,
        name: &str,
        filter: &dyn QueryFilter,
        args: &[Value],
        limit: Option<usize>,
    ) -> DaoResult<Vec<Value>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }
        self.fetch_rows(name, filter, args, &mut FirstColumn, limit)
    }

    /// 以 `key_column` 为键、`value_column` 为值的映射，键为列值的文本
    pub fn fetch_map(
        &self,
        name: &str,
        filter: &dyn QueryFilter,
        args: &[Value],
        key_column: &str,
        value_column: &str,
    ) -> DaoResult<BTreeMap<String, Value>> {
        let mut digester = KeyValue {
            key: ColumnRef::Label(key_column),
            value: ColumnRef::Label(value_column),
        };
        self.collect_map(name, filter, args, &mut digester)
    }

    /// 以第一列为键、第二列为值的映射
    pub fn fetch_pairs(&self, name: &str, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<BTreeMap<String, Value>> {
        let mut digester = KeyValue {
            key: ColumnRef::Index(0),
            value: ColumnRef::Index(1),
        };
        self.collect_map(name, filter, args, &mut digester)
    }

    fn collect_map(
        &self,
        name: &str,
        filter: &dyn QueryFilter,
        args: &[Value],
        digester: &mut KeyValue<'_>,
    ) -> DaoResult<BTreeMap<String, Value>> {
        let mut map = BTreeMap::new();
        self.digest_rows(name, filter, args, digester, |(key, value)| {
            map.insert(key, value);
            false
        })?;
        Ok(map)
    }

    /// 开启根事务
    pub fn new_transaction(&self) -> DaoResult<Transaction> {
        self.inner
            .transactions
            .new_transaction(self.inner.source.connection_source())
    }

    pub fn new_or_existing_transaction(&self) -> DaoResult<Transaction> {
        self.inner
            .transactions
            .new_or_existing_transaction(self.inner.source.connection_source())
    }

    pub fn current_transaction(&self) -> Option<TransactionRef> {
        self.inner.transactions.current_transaction()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.inner.transactions.is_transaction_active()
    }
}

struct FirstColumn;

impl DataDigester<Value> for FirstColumn {
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<Value>> {
        if row.column_count() == 0 {
            return Ok(None);
        }
        row.column_value_at(0).map(Some)
    }
}

#[derive(Clone, Copy)]
enum ColumnRef<'a> {
    Label(&'a str),
    Index(usize),
}

impl ColumnRef<'_> {
    fn read(self, row: &RowView<'_>) -> DaoResult<Value> {
        match self {
            ColumnRef::Label(label) => row.column_value(label),
            ColumnRef::Index(index) => row.column_value_at(index),
        }
    }
}

struct KeyValue<'a> {
    key: ColumnRef<'a>,
    value: ColumnRef<'a>,
}

impl DataDigester<(String, Value)> for KeyValue<'_> {
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<(String, Value)>> {
        let key = self.key.read(row)?;
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some((key.to_string(), self.value.read(row)?)))
    }
}
