//! 多阶段渲染
//!
//! 每个阶段遍历当前的片段列表，对条件节点调用过滤器；被推迟的节点在下一阶段
//! 以递增的阶段号重新求值，直到没有节点请求推迟为止。收敛后的片段列表再统一
//! 物化为 SQL 文本：非空占位符输出 `?` 并追加绑定参数，空值占位符内联为过滤器
//! 的空值文本且不追加参数，因此 `?` 的个数总等于绑定参数的个数。

use std::sync::{Arc, OnceLock};

use log::trace;
use regex::Regex;

use super::element::{ConditionalNode, Placeholder, TemplateElement};
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, ValueType};
use crate::expression::{FunctionExpression, FunctionRegistry};
use crate::query::filter::{
    BulkQueryFilter, ElementFilter, FilterDataProvider, FilterVerdict, QueryFilter,
};
use crate::storage::SqlParam;

static LINE_INDENT: OnceLock<Regex> = OnceLock::new();

/// 将换行后的空白折叠为单个换行
fn collapse_whitespace(sql: &str) -> DaoResult<String> {
    let pattern = match LINE_INDENT.get() {
        Some(pattern) => pattern,
        None => {
            let compiled = Regex::new(r"\n\s+")?;
            LINE_INDENT.get_or_init(|| compiled)
        }
    };
    Ok(pattern.replace_all(sql, "\n").into_owned())
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<Value>,
    /// 收敛所用的阶段数
    pub phases: usize,
}

impl RenderedQuery {
    pub fn sql_params(&self) -> Vec<SqlParam> {
        self.params.iter().cloned().map(SqlParam::Value).collect()
    }
}

enum Slot<'t> {
    Positional,
    Named(String),
    Function(&'t FunctionExpression),
    /// 集合作用域内已求值的占位符
    Value(Value),
}

enum Fragment<'t> {
    Text(String),
    Pending(&'t ConditionalNode),
    Slot(Slot<'t>),
}

fn inline_text(value: &Value, filter: &dyn QueryFilter) -> String {
    if value.is_null() {
        filter.null_string().to_string()
    } else {
        value.to_string()
    }
}

/// 单次渲染的工作状态，不在渲染之间共享
pub(crate) struct RenderState<'t> {
    phase: usize,
    bulk: bool,
    fragments: Vec<Fragment<'t>>,
    registry: &'t FunctionRegistry,
}

impl<'t> RenderState<'t> {
    /// 执行阶段循环直到收敛
    pub(crate) fn run(
        elements: &'t [TemplateElement],
        registry: &'t FunctionRegistry,
        filter: &dyn QueryFilter,
        bulk: bool,
    ) -> DaoResult<Self> {
        let mut state = Self {
            phase: 0,
            bulk,
            fragments: Vec::new(),
            registry,
        };

        let mut fragments = Vec::with_capacity(elements.len());
        state.expand(elements, filter, false, &mut fragments)?;
        state.fragments = fragments;

        while state
            .fragments
            .iter()
            .any(|f| matches!(f, Fragment::Pending(_)))
        {
            state.phase += 1;
            trace!("渲染阶段 {}", state.phase);

            let current = std::mem::take(&mut state.fragments);
            let mut next = Vec::with_capacity(current.len());
            for fragment in current {
                match fragment {
                    Fragment::Pending(node) => state.evaluate_node(node, filter, false, &mut next)?,
                    other => next.push(other),
                }
            }
            state.fragments = next;
        }

        Ok(state)
    }

    pub(crate) fn phases(&self) -> usize {
        self.phase + 1
    }

    fn expand(
        &self,
        elements: &'t [TemplateElement],
        filter: &dyn QueryFilter,
        scoped: bool,
        out: &mut Vec<Fragment<'t>>,
    ) -> DaoResult<()> {
        for element in elements {
            match element {
                TemplateElement::Text(text) => out.push(Fragment::Text(text.clone())),
                TemplateElement::Substitution(name) => {
                    if self.bulk {
                        return Err(DaoError::validation(format!(
                            "批量查询不支持值替换: ${{{}}}",
                            name
                        )));
                    }
                    let value = filter.property(name)?;
                    out.push(Fragment::Text(inline_text(&value, filter)));
                }
                TemplateElement::FunctionSubstitution(function) => {
                    if self.bulk {
                        return Err(DaoError::validation(format!(
                            "批量查询不支持函数值替换: ${{{}}}",
                            function
                        )));
                    }
                    let value = function.invoke(self.registry, &FilterDataProvider::new(filter))?;
                    out.push(Fragment::Text(inline_text(&value, filter)));
                }
                TemplateElement::Placeholder(placeholder) => {
                    let slot = match placeholder {
                        Placeholder::Positional if self.bulk => {
                            return Err(DaoError::validation("批量查询不支持位置参数 ?"));
                        }
                        Placeholder::Positional => Slot::Positional,
                        Placeholder::Named(name) if scoped => Slot::Value(filter.property(name)?),
                        Placeholder::Named(name) => Slot::Named(name.clone()),
                        Placeholder::Function(function) if scoped => Slot::Value(
                            function.invoke(self.registry, &FilterDataProvider::new(filter))?,
                        ),
                        Placeholder::Function(function) => Slot::Function(function),
                    };
                    out.push(Fragment::Slot(slot));
                }
                TemplateElement::Node(node) => self.evaluate_node(node, filter, scoped, out)?,
            }
        }
        Ok(())
    }

    fn evaluate_node(
        &self,
        node: &'t ConditionalNode,
        filter: &dyn QueryFilter,
        scoped: bool,
        out: &mut Vec<Fragment<'t>>,
    ) -> DaoResult<()> {
        let verdict = filter.accept(&node.name, &node.attributes, self.phase)?;
        trace!("节点 <{}> 阶段 {}: {:?}", node.name, self.phase, verdict);

        match verdict {
            FilterVerdict::Reject => {}
            FilterVerdict::Replace => {
                let text = filter.replace_string(&node.name, &node.attributes, self.phase)?;
                out.push(Fragment::Text(text));
            }
            FilterVerdict::Accept => self.expand(&node.children, filter, scoped, out)?,
            // 推迟的节点在之后的阶段以根过滤器求值
            FilterVerdict::NextPhase => out.push(Fragment::Pending(node)),
            FilterVerdict::ProcessCollection { items, delimiter } => {
                let delimiter = delimiter.replace("\\n", "\n");
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push(Fragment::Text(delimiter.clone()));
                    }
                    let element_filter = ElementFilter::new(item, filter);
                    self.expand(&node.children, &element_filter, true, out)?;
                }
            }
        }
        Ok(())
    }

    /// 物化为 SQL 文本和绑定参数，位置参数按最终文本中的顺序消费
    pub(crate) fn into_sql(self, filter: &dyn QueryFilter, args: &[Value]) -> DaoResult<(String, Vec<Value>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        let mut next_arg = 0;

        for fragment in self.fragments {
            let slot = match fragment {
                Fragment::Text(text) => {
                    sql.push_str(&text);
                    continue;
                }
                Fragment::Pending(node) => {
                    return Err(DaoError::execution(format!("节点 <{}> 未完成渲染", node.name)));
                }
                Fragment::Slot(slot) => slot,
            };

            let value = match slot {
                Slot::Positional => {
                    let value = args.get(next_arg).cloned().ok_or_else(|| {
                        DaoError::validation(format!("缺少第 {} 个位置参数", next_arg + 1))
                    })?;
                    next_arg += 1;
                    value
                }
                Slot::Named(name) => filter.property(&name)?,
                Slot::Function(function) => {
                    function.invoke(self.registry, &FilterDataProvider::new(filter))?
                }
                Slot::Value(value) => value,
            };

            if value.is_null() {
                sql.push_str(filter.null_string());
            } else {
                sql.push('?');
                params.push(value);
            }
        }

        Ok((collapse_whitespace(&sql)?, params))
    }

    /// 仅生成文本，所有占位符输出为 `?`
    pub(crate) fn into_text(self) -> DaoResult<String> {
        let mut sql = String::new();
        for fragment in self.fragments {
            match fragment {
                Fragment::Text(text) => sql.push_str(&text),
                Fragment::Slot(_) => sql.push('?'),
                Fragment::Pending(node) => {
                    return Err(DaoError::execution(format!("节点 <{}> 未完成渲染", node.name)));
                }
            }
        }
        collapse_whitespace(&sql)
    }

    pub(crate) fn into_bulk(self, query: &str, registry: Arc<FunctionRegistry>) -> DaoResult<BulkQuery> {
        let mut sql = String::new();
        let mut slots = Vec::new();

        for fragment in self.fragments {
            match fragment {
                Fragment::Text(text) => sql.push_str(&text),
                Fragment::Slot(slot) => {
                    sql.push('?');
                    slots.push(match slot {
                        Slot::Named(name) => BulkSlot::Named(name),
                        Slot::Function(function) => BulkSlot::Function(function.clone()),
                        Slot::Value(value) => BulkSlot::Value(value),
                        Slot::Positional => {
                            return Err(DaoError::validation("批量查询不支持位置参数 ?"));
                        }
                    });
                }
                Fragment::Pending(node) => {
                    return Err(DaoError::execution(format!("节点 <{}> 未完成渲染", node.name)));
                }
            }
        }

        Ok(BulkQuery {
            query: query.to_string(),
            sql: collapse_whitespace(&sql)?,
            slots,
            registry,
        })
    }
}

#[derive(Debug, Clone)]
enum BulkSlot {
    Named(String),
    Function(FunctionExpression),
    Value(Value),
}

/// 批量执行的查询：语句文本只生成一次，每行通过 [`BulkQuery::populate_params`] 取参数
#[derive(Debug, Clone)]
pub struct BulkQuery {
    query: String,
    sql: String,
    slots: Vec<BulkSlot>,
    registry: Arc<FunctionRegistry>,
}

impl BulkQuery {
    pub fn query_name(&self) -> &str {
        &self.query
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn param_count(&self) -> usize {
        self.slots.len()
    }

    /// 按过滤器当前行生成参数，空值转换为带声明类型的空值
    pub fn populate_params<F: BulkQueryFilter>(&self, filter: &F) -> DaoResult<Vec<SqlParam>> {
        let mut params = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let (value, declared) = match slot {
                BulkSlot::Named(name) => (filter.property(name)?, filter.param_type(name)),
                BulkSlot::Function(function) => (
                    function.invoke(&self.registry, &FilterDataProvider::new(filter))?,
                    function.return_type(&self.registry),
                ),
                BulkSlot::Value(value) => (value.clone(), value.value_type()),
            };
            params.push(if value.is_null() {
                SqlParam::Null(if declared == ValueType::Null {
                    ValueType::Any
                } else {
                    declared
                })
            } else {
                SqlParam::Value(value)
            });
        }
        Ok(params)
    }
}
