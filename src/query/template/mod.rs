//! 查询模板
//!
//! 模板由查询定义编译而来，编译时解析并校验所有函数表达式，之后不可变，
//! 可被多个线程并发渲染；每次渲染都创建独立的 [`render::RenderState`]。

pub mod element;
pub mod parser;
pub mod render;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

pub use element::{ConditionalNode, Placeholder, TemplateElement};
pub use render::{BulkQuery, RenderedQuery};

use crate::core::error::{DaoError, DaoResult};
use crate::core::value::Value;
use crate::expression::{FunctionExpression, FunctionRegistry};
use crate::query::filter::{BulkQueryFilter, QueryFilter};
use crate::query::source::{QueryDefinition, TemplatePart};
use render::RenderState;

/// 编译后的查询模板
pub struct QueryTemplate {
    name: String,
    elements: Vec<TemplateElement>,
    params: BTreeMap<String, String>,
    columns: HashMap<String, FunctionExpression>,
    attributes: BTreeMap<String, String>,
    registry: Arc<FunctionRegistry>,
    /// 串行化同一模板的并发执行
    exec_lock: ReentrantMutex<()>,
}

impl QueryTemplate {
    pub fn compile(
        name: &str,
        definition: &QueryDefinition,
        registry: Arc<FunctionRegistry>,
    ) -> DaoResult<Self> {
        let elements = compile_parts(&definition.template, &registry)?;
        if elements.is_empty() {
            return Err(DaoError::validation(format!("查询 {} 的模板为空", name)));
        }

        let mut columns = HashMap::with_capacity(definition.columns.len());
        for (column, expression) in &definition.columns {
            let function = FunctionExpression::parse(expression, true, true)?;
            function.validate(&registry)?;
            columns.insert(column.clone(), function);
        }

        Ok(Self {
            name: name.to_string(),
            elements,
            params: definition.params.clone(),
            columns,
            attributes: definition.attributes.clone(),
            registry,
            exec_lock: ReentrantMutex::new(()),
        })
    }

    /// 由纯文本模板创建，不含条件节点
    pub fn from_text(name: &str, text: &str, registry: Arc<FunctionRegistry>) -> DaoResult<Self> {
        let definition = QueryDefinition {
            template: vec![TemplatePart::Plain(text.to_string())],
            ..Default::default()
        };
        Self::compile(name, &definition, registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self) -> &[TemplateElement] {
        &self.elements
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn column_expression(&self, column: &str) -> Option<&FunctionExpression> {
        self.columns.get(column)
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.exec_lock.lock()
    }

    /// 渲染为 SQL 文本和绑定参数
    pub fn render(&self, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<RenderedQuery> {
        let state = RenderState::run(&self.elements, &self.registry, filter, false)?;
        let phases = state.phases();
        let (sql, params) = state.into_sql(filter, args)?;
        Ok(RenderedQuery { sql, params, phases })
    }

    /// 仅渲染文本，所有占位符输出为 `?`
    pub fn render_text(&self, filter: &dyn QueryFilter) -> DaoResult<String> {
        RenderState::run(&self.elements, &self.registry, filter, false)?.into_text()
    }

    /// 构建批量执行语句，节点结构由过滤器在迭代前的状态决定
    pub fn build_bulk<F: BulkQueryFilter>(&self, filter: &F) -> DaoResult<BulkQuery> {
        RenderState::run(&self.elements, &self.registry, filter, true)?
            .into_bulk(&self.name, Arc::clone(&self.registry))
    }
}

impl std::fmt::Debug for QueryTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTemplate")
            .field("name", &self.name)
            .field("elements", &self.elements.len())
            .field("params", &self.params)
            .finish()
    }
}

fn compile_parts(parts: &[TemplatePart], registry: &FunctionRegistry) -> DaoResult<Vec<TemplateElement>> {
    let mut elements = Vec::new();
    for part in parts {
        match part {
            TemplatePart::Plain(text) | TemplatePart::Text { text } => {
                parser::tokenize(text, registry, &mut elements)?
            }
            TemplatePart::Node {
                node,
                attributes,
                body,
            } => {
                if node.trim().is_empty() {
                    return Err(DaoError::validation("条件节点名称不能为空"));
                }
                elements.push(TemplateElement::Node(ConditionalNode {
                    name: node.clone(),
                    attributes: attributes.clone(),
                    children: compile_parts(body, registry)?,
                }));
            }
        }
    }
    Ok(elements)
}
