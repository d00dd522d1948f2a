//! 查询过滤器
//!
//! 渲染器在每个阶段对条件节点调用 [`QueryFilter::accept`]，根据返回的
//! [`FilterVerdict`] 决定节点的去留；占位符与替换的值同样由过滤器提供。

pub mod map_filter;

use std::collections::BTreeMap;

use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, ValueType};
use crate::expression::DataProvider;

pub use map_filter::{MapQueryFilter, RowsBulkFilter};

/// 默认的空值文本
pub const DEFAULT_NULL_STRING: &str = "NULL";

/// 节点属性
pub type NodeAttributes = BTreeMap<String, String>;

/// 过滤器对条件节点的裁决
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    /// 丢弃整个子树
    Reject,
    /// 以 [`QueryFilter::replace_string`] 的文本替换子树
    Replace,
    /// 在当前阶段展开子节点
    Accept,
    /// 推迟到下一阶段处理
    NextPhase,
    /// 对集合中的每个元素渲染一次子树，以分隔符连接
    ProcessCollection { items: Vec<Value>, delimiter: String },
}

/// 渲染过滤器
pub trait QueryFilter {
    fn accept(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<FilterVerdict>;

    fn replace_string(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<String> {
        let _ = (attributes, phase);
        Err(DaoError::execution(format!("过滤器未提供节点 {} 的替换文本", name)))
    }

    /// 属性值，不存在时为 `Value::Null`
    fn property(&self, name: &str) -> DaoResult<Value>;

    /// 函数参数引用 `@name` 的值
    fn function_property(&self, function: &str, name: &str) -> DaoResult<Value> {
        let _ = function;
        self.property(name)
    }

    fn null_string(&self) -> &str {
        DEFAULT_NULL_STRING
    }
}

/// 批量执行过滤器，每次 `next` 前进到下一行参数
pub trait BulkQueryFilter: QueryFilter {
    fn next(&mut self) -> DaoResult<bool>;

    /// 每执行多少行提交一次，小于等于 0 表示只在结束时提交
    fn commit_count(&self) -> i64 {
        0
    }

    /// 参数为空值时绑定的声明类型
    fn param_type(&self, name: &str) -> ValueType {
        let _ = name;
        ValueType::Any
    }
}

/// 将过滤器适配为函数求值的数据来源
pub struct FilterDataProvider<'a> {
    filter: &'a dyn QueryFilter,
}

impl<'a> FilterDataProvider<'a> {
    pub fn new(filter: &'a dyn QueryFilter) -> Self {
        Self { filter }
    }
}

impl DataProvider for FilterDataProvider<'_> {
    fn property(&self, function: &str, name: &str) -> DaoResult<Value> {
        self.filter.function_property(function, name)
    }
}

/// 集合元素过滤器
///
/// 元素为 Map 时按字段取值，名称 `item` 表示元素本身，其余属性回退到父过滤器。
pub struct ElementFilter<'a> {
    item: &'a Value,
    parent: &'a dyn QueryFilter,
}

impl<'a> ElementFilter<'a> {
    pub fn new(item: &'a Value, parent: &'a dyn QueryFilter) -> Self {
        Self { item, parent }
    }
}

pub const ELEMENT_SELF: &str = "item";

impl QueryFilter for ElementFilter<'_> {
    fn accept(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<FilterVerdict> {
        if name == map_filter::NODE_TABLE {
            return self.parent.accept(name, attributes, phase);
        }
        let value = self.property(name)?;
        map_filter::standard_verdict(name, &value, attributes, |other| self.property(other))
    }

    fn replace_string(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<String> {
        self.parent.replace_string(name, attributes, phase)
    }

    fn property(&self, name: &str) -> DaoResult<Value> {
        if let Value::Map(fields) = self.item {
            if let Some(value) = fields.get(name) {
                return Ok(value.clone());
            }
        }
        if name == ELEMENT_SELF {
            return Ok(self.item.clone());
        }
        self.parent.property(name)
    }

    fn function_property(&self, function: &str, name: &str) -> DaoResult<Value> {
        if let Value::Map(fields) = self.item {
            if let Some(value) = fields.get(name) {
                return Ok(value.clone());
            }
        }
        if name == ELEMENT_SELF {
            return Ok(self.item.clone());
        }
        self.parent.function_property(function, name)
    }

    fn null_string(&self) -> &str {
        self.parent.null_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_filter_lookup() {
        let parent = MapQueryFilter::new().with_value("status", "open");
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), Value::Int(3));
        let item = Value::Map(fields);
        let filter = ElementFilter::new(&item, &parent);

        assert_eq!(filter.property("id").unwrap(), Value::Int(3));
        assert_eq!(filter.property("status").unwrap(), Value::from("open"));
        assert_eq!(filter.property(ELEMENT_SELF).unwrap(), item);
        assert_eq!(filter.property("missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_element_filter_accept() {
        let parent = MapQueryFilter::new();
        let item = Value::from("x");
        let filter = ElementFilter::new(&item, &parent);
        let attrs = NodeAttributes::new();
        assert_eq!(filter.accept("item", &attrs, 0).unwrap(), FilterVerdict::Accept);
        assert_eq!(filter.accept("other", &attrs, 0).unwrap(), FilterVerdict::Reject);
    }
}
