//! SQLite 连接
//!
//! 每个连接打开后立即开启一个延迟事务，提交或回滚后再开启下一个，
//! 对外表现为关闭自动提交的连接。连接的所有操作都只需共享借用，
//! 因此同一线程在遍历结果集时可以在同一连接上执行嵌套查询。
//!
//! 路径为 `:memory:` 时，同一连接来源（及其克隆）的所有连接通过共享缓存
//! URI 打开同一个内存数据库，由来源持有的保活连接维持其生命周期。

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, OpenFlags};

use crate::config::MEMORY_DATABASE;

use super::{Connection, ConnectionSource, Row, RowControl, SqlParam};
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, DATETIME_FORMAT};

const BEGIN: &str = "BEGIN DEFERRED;";

#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            wal: true,
        }
    }
}

static MEMORY_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

/// 共享缓存的内存数据库
#[derive(Debug)]
struct SharedMemory {
    uri: String,
    keep_alive: Mutex<Option<rusqlite::Connection>>,
}

/// 按文件路径打开连接的连接来源
#[derive(Debug, Clone)]
pub struct SqliteConnectionSource {
    name: String,
    path: PathBuf,
    options: SqliteOptions,
    memory: Option<Arc<SharedMemory>>,
}

impl SqliteConnectionSource {
    pub fn new<P: AsRef<Path>>(path: P, options: SqliteOptions) -> Self {
        let path = path.as_ref().to_path_buf();
        let memory = (path.as_os_str() == MEMORY_DATABASE).then(|| {
            let id = MEMORY_DATABASE_ID.fetch_add(1, Ordering::SeqCst);
            Arc::new(SharedMemory {
                uri: format!("file:sqlweave-memory-{}?mode=memory&cache=shared", id),
                keep_alive: Mutex::new(None),
            })
        });
        Self {
            name: path.display().to_string(),
            path,
            options,
            memory,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_memory(&self) -> bool {
        self.memory.is_some()
    }

    fn connect(&self) -> DaoResult<rusqlite::Connection> {
        let Some(memory) = &self.memory else {
            let conn = rusqlite::Connection::open(&self.path)?;
            conn.busy_timeout(self.options.busy_timeout)?;
            if self.options.wal {
                conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
            }
            return Ok(conn);
        };

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut keep_alive = memory.keep_alive.lock();
        if keep_alive.is_none() {
            *keep_alive = Some(rusqlite::Connection::open_with_flags(&memory.uri, flags)?);
            debug!("创建共享内存数据库: {}", memory.uri);
        }
        let conn = rusqlite::Connection::open_with_flags(&memory.uri, flags)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        Ok(conn)
    }

    pub fn open(&self) -> DaoResult<SqliteConnection> {
        let conn = self.connect()?;
        conn.execute_batch(BEGIN)?;
        debug!("打开 SQLite 连接: {}", self.path.display());
        Ok(SqliteConnection {
            inner: ReentrantMutex::new(RefCell::new(Some(conn))),
        })
    }
}

impl ConnectionSource for SqliteConnectionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> DaoResult<Arc<dyn Connection>> {
        Ok(Arc::new(self.open()?))
    }
}

pub struct SqliteConnection {
    inner: ReentrantMutex<RefCell<Option<rusqlite::Connection>>>,
}

impl SqliteConnection {
    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> DaoResult<T>) -> DaoResult<T> {
        let guard = self.inner.lock();
        let cell = guard
            .try_borrow()
            .map_err(|_| DaoError::Database("连接正在关闭".to_string()))?;
        match cell.as_ref() {
            Some(conn) => f(conn),
            None => Err(DaoError::Database("连接已关闭".to_string())),
        }
    }
}

fn to_sqlite(param: &SqlParam) -> SqliteValue {
    match param {
        SqlParam::Null(_) => SqliteValue::Null,
        SqlParam::Value(value) => match value {
            Value::Null => SqliteValue::Null,
            Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
            Value::Int(i) => SqliteValue::Integer(*i),
            Value::Float(f) => SqliteValue::Real(*f),
            Value::String(s) => SqliteValue::Text(s.clone()),
            Value::DateTime(dt) => SqliteValue::Text(dt.format(DATETIME_FORMAT).to_string()),
            Value::Bytes(b) => SqliteValue::Blob(b.clone()),
            Value::List(_) | Value::Map(_) => {
                SqliteValue::Text(serde_json::to_string(value).unwrap_or_else(|_| value.to_string()))
            }
        },
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

impl Connection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[SqlParam]) -> DaoResult<usize> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            Ok(stmt.execute(params_from_iter(params.iter().map(to_sqlite)))?)
        })
    }

    fn execute_batch(&self, sql: &str) -> DaoResult<()> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
        visitor: &mut dyn FnMut(Row) -> DaoResult<RowControl>,
    ) -> DaoResult<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let columns: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into();
            let width = columns.len();

            let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite)))?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for index in 0..width {
                    values.push(from_sqlite(row.get_ref(index)?));
                }
                if visitor(Row::new(Arc::clone(&columns), values))? == RowControl::Stop {
                    break;
                }
            }
            Ok(())
        })
    }

    fn commit(&self) -> DaoResult<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT;")?;
            }
            conn.execute_batch(BEGIN)?;
            Ok(())
        })
    }

    fn rollback(&self) -> DaoResult<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK;")?;
            }
            conn.execute_batch(BEGIN)?;
            Ok(())
        })
    }

    fn close(&self) -> DaoResult<()> {
        let guard = self.inner.lock();
        let mut cell = guard
            .try_borrow_mut()
            .map_err(|_| DaoError::Database("连接仍在使用中，无法关闭".to_string()))?;
        if let Some(conn) = cell.take() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK;") {
                    warn!("关闭连接时回滚失败: {}", e);
                }
            }
            conn.close().map_err(|(_, e)| DaoError::from(e))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        let guard = self.inner.lock();
        let closed = guard.try_borrow().map(|cell| cell.is_none()).unwrap_or(false);
        closed
    }
}
