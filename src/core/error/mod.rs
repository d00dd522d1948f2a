//! 统一错误处理
//!
//! ## 设计
//!
//! 1. 编译期错误（语法、校验）与执行期错误分开，调用方可按 [`ErrorCategory`] 分支处理
//! 2. 外部错误（rusqlite、toml、io）使用自定义 `From` 实现转换为字符串，降低模块耦合
//! 3. `DaoResult<T>` 提供统一的返回类型

use std::fmt;

use thiserror::Error;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    Validation,
    Execution,
    Transaction,
    Database,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "syntax"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Transaction => write!(f, "transaction"),
            ErrorCategory::Database => write!(f, "database"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

/// 统一的错误类型
#[derive(Error, Debug, Clone)]
pub enum DaoError {
    #[error("语法错误: {message} (片段: {fragment})")]
    Syntax { message: String, fragment: String },

    #[error("校验错误: {0}")]
    Validation(String),

    #[error("执行错误: {0}")]
    Execution(String),

    #[error("函数调用失败: {function}({arguments}): {source}")]
    FunctionInvocation {
        function: String,
        arguments: String,
        source: Box<DaoError>,
    },

    #[error("事务状态错误: {0}")]
    TransactionState(String),

    #[error("查询 {query} 执行失败: {source}\nSQL: {sql}")]
    Query {
        query: String,
        sql: String,
        source: Box<DaoError>,
    },

    #[error("未找到查询: {0}")]
    NoSuchQuery(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(String),
}

impl DaoError {
    pub fn syntax(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        DaoError::Syntax {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DaoError::Validation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        DaoError::Execution(message.into())
    }

    pub fn transaction_state(message: impl Into<String>) -> Self {
        DaoError::TransactionState(message.into())
    }

    /// 附加查询名称和最终 SQL，已经附加过的错误保持不变
    pub fn with_query(self, query: &str, sql: &str) -> Self {
        match self {
            DaoError::Query { .. } => self,
            other => DaoError::Query {
                query: query.to_string(),
                sql: sql.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DaoError::Syntax { .. } => ErrorCategory::Syntax,
            DaoError::Validation(_) | DaoError::NoSuchQuery(_) => ErrorCategory::Validation,
            DaoError::Execution(_) | DaoError::FunctionInvocation { .. } => {
                ErrorCategory::Execution
            }
            DaoError::TransactionState(_) => ErrorCategory::Transaction,
            DaoError::Query { source, .. } => source.category(),
            DaoError::Database(_) => ErrorCategory::Database,
            DaoError::Config(_) | DaoError::Io(_) => ErrorCategory::Configuration,
        }
    }

    /// 剥离查询包装后的根因
    pub fn root_cause(&self) -> &DaoError {
        match self {
            DaoError::Query { source, .. } | DaoError::FunctionInvocation { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

/// 统一的结果类型
pub type DaoResult<T> = Result<T, DaoError>;

impl From<rusqlite::Error> for DaoError {
    fn from(err: rusqlite::Error) -> Self {
        DaoError::Database(err.to_string())
    }
}

impl From<std::io::Error> for DaoError {
    fn from(err: std::io::Error) -> Self {
        DaoError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DaoError {
    fn from(err: toml::de::Error) -> Self {
        DaoError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DaoError {
    fn from(err: toml::ser::Error) -> Self {
        DaoError::Config(err.to_string())
    }
}

impl From<regex::Error> for DaoError {
    fn from(err: regex::Error) -> Self {
        DaoError::Execution(format!("正则表达式无效: {}", err))
    }
}
