//! 结果行摘要
//!
//! 查询结果逐行交给 [`DataDigester`]，摘要器通过 [`RowView`] 访问当前行、
//! 列表达式、过滤器属性以及查询参数，并可以请求提前结束遍历。

use std::cell::Cell;
use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::error::{DaoError, DaoResult};
use crate::core::value::Value;
use crate::expression::DataProvider;
use crate::query::filter::QueryFilter;
use crate::query::template::QueryTemplate;
use crate::storage::Row;

/// 数据摘要器
pub trait DataDigester<T> {
    /// 处理一行，返回 `None` 表示该行不产生结果
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<T>>;

    /// 遍历结束后调用，无论是否提前结束
    fn finalize(&mut self) -> DaoResult<()> {
        Ok(())
    }
}

impl<T, D: DataDigester<T> + ?Sized> DataDigester<T> for Box<D> {
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<T>> {
        (**self).digest(row)
    }

    fn finalize(&mut self) -> DaoResult<()> {
        (**self).finalize()
    }
}

/// 摘要器看到的当前行
pub struct RowView<'a> {
    row: &'a Row,
    index: usize,
    query: &'a QueryTemplate,
    filter: &'a dyn QueryFilter,
    stop: &'a Cell<bool>,
}

impl<'a> RowView<'a> {
    pub fn new(
        row: &'a Row,
        index: usize,
        query: &'a QueryTemplate,
        filter: &'a dyn QueryFilter,
        stop: &'a Cell<bool>,
    ) -> Self {
        Self {
            row,
            index,
            query,
            filter,
            stop,
        }
    }

    /// 行号，从 0 开始
    pub fn row_index(&self) -> usize {
        self.index
    }

    pub fn column_count(&self) -> usize {
        self.row.len()
    }

    pub fn column_names(&self) -> &[String] {
        self.row.columns()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.row.get(index)
    }

    pub fn value_by_label(&self, label: &str) -> Option<&Value> {
        self.row.get_by_label(label)
    }

    /// 列值，定义了列表达式时返回表达式的结果
    pub fn column_value(&self, label: &str) -> DaoResult<Value> {
        match self.query.column_expression(label) {
            Some(expression) => expression.invoke(self.query.registry(), self),
            None => Ok(self.value_by_label(label).cloned().unwrap_or_default()),
        }
    }

    /// 按位置取列值并应用列表达式
    pub fn column_value_at(&self, index: usize) -> DaoResult<Value> {
        match self.row.columns().get(index) {
            Some(label) => self.column_value(label),
            None => Err(DaoError::execution(format!(
                "列序号越界: {} (共 {} 列)",
                index,
                self.row.len()
            ))),
        }
    }

    pub fn property(&self, name: &str) -> DaoResult<Value> {
        self.filter.property(name)
    }

    pub fn filter(&self) -> &dyn QueryFilter {
        self.filter
    }

    pub fn query(&self) -> &QueryTemplate {
        self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.param(name)
    }

    pub fn query_attribute(&self, name: &str) -> Option<&str> {
        self.query.attribute(name)
    }

    /// 请求在本行之后停止遍历
    pub fn stop_processing(&self) {
        self.stop.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.get()
    }
}

impl DataProvider for RowView<'_> {
    fn property(&self, function: &str, name: &str) -> DaoResult<Value> {
        self.filter.function_property(function, name)
    }

    fn column(&self, function: &str, name: &str) -> DaoResult<Value> {
        self.value_by_label(name).cloned().ok_or_else(|| {
            DaoError::execution(format!("函数 {} 引用了不存在的列: #{}", function, name))
        })
    }
}

/// 按列顺序保存的一行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((column.into(), value.into()));
    }

    /// 按列名取值，精确匹配优先，其次忽略大小写
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .or_else(|| self.entries.iter().find(|(name, _)| name.eq_ignore_ascii_case(column)))
            .map(|(_, value)| value)
    }

    pub fn get_at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Map(self.entries.into_iter().collect::<BTreeMap<_, _>>())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// 把每行转换为 [`Record`]，列值经过列表达式
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDigester;

impl RecordDigester {
    pub fn new() -> Self {
        Self
    }

    fn record(row: &RowView<'_>) -> DaoResult<Record> {
        let mut record = Record::new();
        for (index, label) in row.column_names().iter().enumerate() {
            record.push(label.clone(), row.column_value_at(index)?);
        }
        Ok(record)
    }
}

impl DataDigester<Record> for RecordDigester {
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<Record>> {
        Self::record(row).map(Some)
    }
}

impl DataDigester<Value> for RecordDigester {
    fn digest(&mut self, row: &RowView<'_>) -> DaoResult<Option<Value>> {
        Self::record(row).map(|record| Some(record.into_value()))
    }
}
