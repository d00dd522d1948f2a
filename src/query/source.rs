//! 查询来源
//!
//! 查询定义可以从 TOML 文件加载：
//!
//! ```toml
//! [queries.findUsers]
//! template = [
//!     "SELECT * FROM users WHERE 1 = 1",
//!     { node = "name", body = [" AND name = #{name}"] },
//!     { node = "ids", attributes = { loopCollection = "true", loopDelimiter = ", " }, body = ["#{item}"] },
//! ]
//! columns = { NAME = "upper(#NAME)" }
//! params = { "#digester" = "record" }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::error::{DaoError, DaoResult};
use crate::core::value::Value;
use crate::expression::FunctionRegistry;
use crate::query::executor::digester::{DataDigester, RecordDigester};
use crate::query::template::QueryTemplate;
use crate::storage::ConnectionSource;

/// 选择数据摘要器的查询参数
pub const PARAM_DIGESTER: &str = "#digester";
pub const DEFAULT_DIGESTER: &str = "record";

/// 模板片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplatePart {
    Plain(String),
    Text {
        text: String,
    },
    Node {
        node: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default)]
        body: Vec<TemplatePart>,
    },
}

/// 查询定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    #[serde(default)]
    pub template: Vec<TemplatePart>,
    /// 参数名到缺省值
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// 列名到列表达式，列表达式允许参数引用和列引用
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// 查询定义文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFile {
    #[serde(default)]
    pub queries: BTreeMap<String, QueryDefinition>,
}

/// 数据摘要器工厂，每次查询创建一个新的摘要器
pub type DigesterFactory = Arc<dyn Fn() -> Box<dyn DataDigester<Value>> + Send + Sync>;

/// 查询来源
pub trait QuerySource: Send + Sync {
    fn query(&self, name: &str) -> Option<Arc<QueryTemplate>>;

    fn has_query(&self, name: &str) -> bool {
        self.query(name).is_some()
    }

    fn connection_source(&self) -> Arc<dyn ConnectionSource>;

    /// 查询未指定自定义摘要器时使用的摘要器
    fn data_digester(&self, query: &QueryTemplate) -> Option<Box<dyn DataDigester<Value>>>;

    fn query_names(&self) -> Vec<String>;
}

/// 静态查询来源，启动时加载全部查询
pub struct StaticQuerySource {
    queries: HashMap<String, Arc<QueryTemplate>>,
    connection_source: Arc<dyn ConnectionSource>,
    registry: Arc<FunctionRegistry>,
    digesters: HashMap<String, DigesterFactory>,
}

impl StaticQuerySource {
    pub fn new(connection_source: Arc<dyn ConnectionSource>, registry: Arc<FunctionRegistry>) -> Self {
        let mut digesters: HashMap<String, DigesterFactory> = HashMap::new();
        digesters.insert(
            DEFAULT_DIGESTER.to_string(),
            Arc::new(|| Box::new(RecordDigester::new()) as Box<dyn DataDigester<Value>>),
        );
        Self {
            queries: HashMap::new(),
            connection_source,
            registry,
            digesters,
        }
    }

    pub fn from_toml_str(
        content: &str,
        connection_source: Arc<dyn ConnectionSource>,
        registry: Arc<FunctionRegistry>,
    ) -> DaoResult<Self> {
        let file: QueryFile = toml::from_str(content)?;
        let mut source = Self::new(connection_source, registry);
        for (name, definition) in &file.queries {
            source.add_query(name, definition)?;
        }
        Ok(source)
    }

    pub fn load<P: AsRef<Path>>(
        path: P,
        connection_source: Arc<dyn ConnectionSource>,
        registry: Arc<FunctionRegistry>,
    ) -> DaoResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DaoError::Io(format!("无法读取查询文件 {}: {}", path.display(), e)))?;
        let source = Self::from_toml_str(&content, connection_source, registry)?;
        info!("从 {} 加载了 {} 个查询", path.display(), source.queries.len());
        Ok(source)
    }

    /// 编译并添加查询，同名查询被替换
    pub fn add_query(&mut self, name: &str, definition: &QueryDefinition) -> DaoResult<()> {
        let template = QueryTemplate::compile(name, definition, Arc::clone(&self.registry))?;
        self.queries.insert(name.to_string(), Arc::new(template));
        Ok(())
    }

    pub fn add_text_query(&mut self, name: &str, text: &str) -> DaoResult<()> {
        let template = QueryTemplate::from_text(name, text, Arc::clone(&self.registry))?;
        self.queries.insert(name.to_string(), Arc::new(template));
        Ok(())
    }

    pub fn register_digester<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn DataDigester<Value>> + Send + Sync + 'static,
    {
        self.digesters.insert(name.to_string(), Arc::new(factory));
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }
}

impl QuerySource for StaticQuerySource {
    fn query(&self, name: &str) -> Option<Arc<QueryTemplate>> {
        self.queries.get(name).cloned()
    }

    fn has_query(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    fn connection_source(&self) -> Arc<dyn ConnectionSource> {
        Arc::clone(&self.connection_source)
    }

    fn data_digester(&self, query: &QueryTemplate) -> Option<Box<dyn DataDigester<Value>>> {
        let name = query.param(PARAM_DIGESTER).unwrap_or(DEFAULT_DIGESTER);
        self.digesters.get(name).map(|factory| factory())
    }

    fn query_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queries.keys().cloned().collect();
        names.sort();
        names
    }
}
