use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{DaoError, DaoResult};
use crate::query::filter::DEFAULT_NULL_STRING;
use crate::storage::SqliteOptions;

/// SQLite 内存数据库路径
pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub max_file_size: u64,
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "sqlweave".to_string(),
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_files: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 空值占位符内联时使用的文本
    pub null_string: String,
    /// 批量更新的提交间隔，小于等于 0 表示只在结束时提交
    pub commit_count: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            null_string: DEFAULT_NULL_STRING.to_string(),
            commit_count: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub busy_timeout_ms: u64,
    pub wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/sqlweave.db".to_string(),
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            busy_timeout: std::time::Duration::from_millis(self.busy_timeout_ms),
            wal: self.wal,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> DaoResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 加载配置文件，相对的数据库路径按配置文件所在目录解析
    pub fn load<P: AsRef<Path>>(path: P) -> DaoResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DaoError::Io(format!("无法读取配置文件 {}: {}", path.display(), e)))?;
        let mut config = Config::from_toml_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.database.path = Config::resolve_database_path(&config.database.path, base);
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> DaoResult<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> DaoResult<()> {
        if self.database.path.trim().is_empty() {
            return Err(DaoError::Config("database.path 不能为空".to_string()));
        }
        if self.log.max_files == 0 {
            return Err(DaoError::Config("log.max_files 必须大于 0".to_string()));
        }
        Ok(())
    }

    fn resolve_database_path(database_path: &str, base: &Path) -> String {
        if database_path == MEMORY_DATABASE {
            return database_path.to_string();
        }
        let path = PathBuf::from(database_path);
        if path.is_absolute() {
            return database_path.to_string();
        }
        base.join(path).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.engine.null_string, "NULL");
        assert_eq!(config.engine.commit_count, 0);
        assert!(config.database.wal);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml_str("[engine]\ncommit_count = 100\n").unwrap();
        assert_eq!(config.engine.commit_count, 100);
        assert_eq!(config.engine.null_string, "NULL");
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Config::from_toml_str("[database]\npath = \"\"\n"),
            Err(DaoError::Config(_))
        ));
        assert!(Config::from_toml_str("[engine]\ncommit_count = \"x\"\n").is_err());
    }

    #[test]
    fn test_config_load_save() {
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let path = dir.path().join("sqlweave.toml");

        let mut config = Config::default();
        config.database.path = "app.db".to_string();
        config.engine.null_string = "null".to_string();
        config.save(&path).expect("Failed to save config");

        let loaded = Config::load(&path).expect("Failed to load config");
        assert_eq!(loaded.engine, config.engine);
        assert_eq!(
            PathBuf::from(&loaded.database.path),
            dir.path().join("app.db")
        );
    }

    #[test]
    fn test_memory_database_path_kept() {
        let resolved = Config::resolve_database_path(MEMORY_DATABASE, Path::new("/etc"));
        assert_eq!(resolved, MEMORY_DATABASE);
        let resolved = Config::resolve_database_path("/var/db.sqlite", Path::new("/etc"));
        assert_eq!(resolved, "/var/db.sqlite");
    }
}
