//! 测试用连接来源，记录语句与提交、回滚次数

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connection, ConnectionSource, Row, RowControl, SqlParam};
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::Value;

#[derive(Debug, Default)]
pub struct MockLog {
    pub statements: Mutex<Vec<(String, Vec<SqlParam>)>>,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub opened: AtomicUsize,
}

impl MockLog {
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.statements.lock().clone()
    }
}

pub struct MockConnectionSource {
    name: String,
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
    log: Arc<MockLog>,
    fail_commit: bool,
}

impl MockConnectionSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Arc::from(Vec::<String>::new()),
            rows: Vec::new(),
            log: Arc::new(MockLog::default()),
            fail_commit: false,
        }
    }

    /// 提交总是失败
    pub fn with_failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// 每次查询都返回的结果集
    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect::<Vec<_>>().into();
        self.rows = rows;
        self
    }

    pub fn log(&self) -> Arc<MockLog> {
        Arc::clone(&self.log)
    }
}

impl ConnectionSource for MockConnectionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            columns: Arc::clone(&self.columns),
            rows: self.rows.clone(),
            log: Arc::clone(&self.log),
            closed: Mutex::new(false),
            fail_commit: self.fail_commit,
        }))
    }
}

struct MockConnection {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
    log: Arc<MockLog>,
    closed: Mutex<bool>,
    fail_commit: bool,
}

impl MockConnection {
    fn ensure_open(&self) -> DaoResult<()> {
        if *self.closed.lock() {
            return Err(DaoError::Database("连接已关闭".to_string()));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str, params: &[SqlParam]) -> DaoResult<usize> {
        self.ensure_open()?;
        self.log
            .statements
            .lock()
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn execute_batch(&self, sql: &str) -> DaoResult<()> {
        self.execute(sql, &[]).map(|_| ())
    }

    fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        visitor: &mut dyn FnMut(Row) -> DaoResult<RowControl>,
    ) -> DaoResult<()> {
        self.ensure_open()?;
        self.log
            .statements
            .lock()
            .push((sql.to_string(), params.to_vec()));
        for values in &self.rows {
            let row = Row::new(Arc::clone(&self.columns), values.clone());
            if visitor(row)? == RowControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn commit(&self) -> DaoResult<()> {
        self.ensure_open()?;
        if self.fail_commit {
            return Err(DaoError::Database("提交失败".to_string()));
        }
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> DaoResult<()> {
        self.ensure_open()?;
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> DaoResult<()> {
        *self.closed.lock() = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}
