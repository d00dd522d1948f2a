//! 集成测试共享工具模块
//!
//! 提供记录语句的模拟连接来源、基于临时文件的 SQLite 环境以及查询管理器的构造函数

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use sqlweave::config::EngineConfig;
use sqlweave::expression::FunctionRegistry;
use sqlweave::query::{QueryManager, StaticQuerySource};
use sqlweave::storage::{
    Connection, ConnectionSource, Row, RowControl, SqlParam, SqliteConnectionSource, SqliteOptions,
};
use sqlweave::transaction::TransactionManager;
use sqlweave::{DaoError, DaoResult, Value};

pub fn registry() -> Arc<FunctionRegistry> {
    Arc::new(FunctionRegistry::with_builtins())
}

/// 模拟连接的调用记录
#[derive(Debug, Default)]
pub struct CallLog {
    statements: Mutex<Vec<(String, Vec<SqlParam>)>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl CallLog {
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.statements.lock().clone()
    }
}

/// 记录所有调用的连接来源，查询返回预设结果集
pub struct RecordingSource {
    name: String,
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
    log: Arc<CallLog>,
}

impl RecordingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Arc::from(Vec::<String>::new()),
            rows: Vec::new(),
            log: Arc::new(CallLog::default()),
        }
    }

    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect::<Vec<_>>().into();
        self.rows = rows;
        self
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }
}

impl ConnectionSource for RecordingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingConnection {
            columns: Arc::clone(&self.columns),
            rows: self.rows.clone(),
            log: Arc::clone(&self.log),
            closed: Mutex::new(false),
        }))
    }
}

struct RecordingConnection {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
    log: Arc<CallLog>,
    closed: Mutex<bool>,
}

impl RecordingConnection {
    fn record(&self, sql: &str, params: &[SqlParam]) -> DaoResult<()> {
        if *self.closed.lock() {
            return Err(DaoError::Database("connection closed".to_string()));
        }
        self.log.statements.lock().push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

impl Connection for RecordingConnection {
    fn execute(&self, sql: &str, params: &[SqlParam]) -> DaoResult<usize> {
        self.record(sql, params)?;
        Ok(1)
    }

    fn execute_batch(&self, sql: &str) -> DaoResult<()> {
        self.record(sql, &[])
    }

    fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        visitor: &mut dyn FnMut(Row) -> DaoResult<RowControl>,
    ) -> DaoResult<()> {
        self.record(sql, params)?;
        for values in &self.rows {
            if visitor(Row::new(Arc::clone(&self.columns), values.clone()))? == RowControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn commit(&self) -> DaoResult<()> {
        self.record("COMMIT", &[])?;
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> DaoResult<()> {
        self.record("ROLLBACK", &[])?;
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> DaoResult<()> {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.log.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

/// 临时目录中的 SQLite 数据库，随测试结束删除
pub struct SqliteFixture {
    pub dir: TempDir,
    pub source: Arc<SqliteConnectionSource>,
}

impl SqliteFixture {
    /// 创建数据库并执行建表脚本
    pub fn new(schema: &str) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let source = Arc::new(SqliteConnectionSource::new(
            dir.path().join("test.db"),
            SqliteOptions::default(),
        ));
        let connection = source.open()?;
        connection.execute_batch(schema)?;
        connection.commit()?;
        connection.close()?;
        Ok(Self { dir, source })
    }

    /// 在独立连接上执行计数查询
    pub fn count(&self, table: &str) -> i64 {
        let mut total = -1;
        let connection = self.source.open().expect("open connection");
        connection
            .query(
                &format!("SELECT COUNT(*) FROM {}", table),
                &[],
                &mut |row: Row| -> DaoResult<RowControl> {
                    total = row.get(0).and_then(Value::as_int).unwrap_or(-1);
                    Ok(RowControl::Stop)
                },
            )
            .expect("count query");
        connection.close().expect("close connection");
        total
    }
}

/// 由 TOML 查询定义构造查询管理器
pub fn manager(source: Arc<dyn ConnectionSource>, queries: &str) -> QueryManager {
    manager_with_engine(source, queries, EngineConfig::default())
}

pub fn manager_with_engine(
    source: Arc<dyn ConnectionSource>,
    queries: &str,
    engine: EngineConfig,
) -> QueryManager {
    let source = StaticQuerySource::from_toml_str(queries, source, registry())
        .expect("query definitions should compile");
    QueryManager::with_engine(Arc::new(source), TransactionManager::new(), engine)
}

/// 统计 SQL 中独立的 `?` 个数
pub fn question_marks(sql: &str) -> usize {
    sql.matches('?').count()
}
