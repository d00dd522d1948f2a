//! 基于名称到值映射的标准过滤器
//!
//! 节点的取舍由节点属性驱动：
//!
//! | 属性 | 含义 |
//! |---|---|
//! | `ifNull="true"` | 仅当属性为空时接受 |
//! | `loopCollection="true"` | 对列表属性逐元素渲染，分隔符取自 `loopDelimiter` |
//! | `otherParams="a,b"` | 任一列出的属性为空时拒绝 |
//! | `ifValue` / `ifNotValue` | 字符串相等判断 |
//! | `minTrimLen` / `maxTrimLen` | 去除首尾空白后的长度范围 |
//! | `minVal` / `maxVal` | 整数范围，非数值时接受 |
//! | `reqTables="t1,t2"` | 节点被接受时标记所需的表 |
//!
//! 名为 `TABLE` 的节点在第 0 阶段记录依赖并推迟，之后的阶段仅在表被标记为需要时接受。

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{BulkQueryFilter, FilterVerdict, NodeAttributes, QueryFilter, DEFAULT_NULL_STRING};
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, ValueType};

pub const ATTR_NULL_NODE: &str = "ifNull";
pub const ATTR_VALUE: &str = "ifValue";
pub const ATTR_NO_VALUE: &str = "ifNotValue";
pub const ATTR_MIN_TRIM_LEN: &str = "minTrimLen";
pub const ATTR_MAX_TRIM_LEN: &str = "maxTrimLen";
pub const ATTR_MIN_VALUE: &str = "minVal";
pub const ATTR_MAX_VALUE: &str = "maxVal";
pub const ATTR_OTHER_PARAMS: &str = "otherParams";
pub const ATTR_REQ_TABLES: &str = "reqTables";
pub const ATTR_LOOP_COLLECTION: &str = "loopCollection";
pub const ATTR_LOOP_DELIMITER: &str = "loopDelimiter";

pub const NODE_TABLE: &str = "TABLE";
pub const TABLE_ATTR_NAME: &str = "name";

fn is_true(attributes: &NodeAttributes, key: &str) -> bool {
    attributes
        .get(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn int_attribute(attributes: &NodeAttributes, key: &str) -> DaoResult<Option<i64>> {
    match attributes.get(key) {
        None => Ok(None),
        Some(text) => text.trim().parse::<i64>().map(Some).map_err(|_| {
            DaoError::validation(format!("属性 \"{}\" 的整数值无效: {}", key, text))
        }),
    }
}

/// 按节点属性计算裁决，`lookup` 用于 `otherParams` 中其他属性的取值
pub fn standard_verdict<F>(
    name: &str,
    value: &Value,
    attributes: &NodeAttributes,
    lookup: F,
) -> DaoResult<FilterVerdict>
where
    F: Fn(&str) -> DaoResult<Value>,
{
    if is_true(attributes, ATTR_NULL_NODE) {
        return Ok(if value.is_null() {
            FilterVerdict::Accept
        } else {
            FilterVerdict::Reject
        });
    }

    if value.is_null() {
        return Ok(FilterVerdict::Reject);
    }

    if is_true(attributes, ATTR_LOOP_COLLECTION) {
        return match value {
            Value::List(items) => Ok(FilterVerdict::ProcessCollection {
                items: items.clone(),
                delimiter: attributes.get(ATTR_LOOP_DELIMITER).cloned().unwrap_or_default(),
            }),
            other => Err(DaoError::execution(format!(
                "节点 \"{}\" 使用了 {} 属性，但其值不是集合: [类型: {}, 值: {}]",
                name,
                ATTR_LOOP_COLLECTION,
                other.value_type(),
                other
            ))),
        };
    }

    if let Some(others) = attributes.get(ATTR_OTHER_PARAMS) {
        for other in split_list(others) {
            if lookup(other)?.is_null() {
                return Ok(FilterVerdict::Reject);
            }
        }
    }

    let if_value = attributes.get(ATTR_VALUE);
    let if_not_value = attributes.get(ATTR_NO_VALUE);
    if if_value.is_some() || if_not_value.is_some() {
        let text = value.to_string();
        if let Some(expected) = if_value {
            return Ok(if *expected == text {
                FilterVerdict::Accept
            } else {
                FilterVerdict::Reject
            });
        }
        if if_not_value.map(|v| *v == text).unwrap_or(false) {
            return Ok(FilterVerdict::Reject);
        }
    }

    if let Value::String(text) = value {
        let trimmed = text.trim().chars().count() as i64;
        if let Some(min) = int_attribute(attributes, ATTR_MIN_TRIM_LEN)? {
            if trimmed < min {
                return Ok(FilterVerdict::Reject);
            }
        }
        if let Some(max) = int_attribute(attributes, ATTR_MAX_TRIM_LEN)? {
            if trimmed > max {
                return Ok(FilterVerdict::Reject);
            }
        }
    }

    let min = int_attribute(attributes, ATTR_MIN_VALUE)?;
    let max = int_attribute(attributes, ATTR_MAX_VALUE)?;
    if min.is_some() || max.is_some() {
        let number = match value {
            Value::Int(i) => *i,
            Value::Float(f) => *f as i64,
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => f as i64,
                Err(_) => return Ok(FilterVerdict::Accept),
            },
            _ => return Ok(FilterVerdict::Accept),
        };
        if min.map(|m| number < m).unwrap_or(false) || max.map(|m| number > m).unwrap_or(false) {
            return Ok(FilterVerdict::Reject);
        }
    }

    Ok(FilterVerdict::Accept)
}

/// 标准映射过滤器
#[derive(Debug, Clone)]
pub struct MapQueryFilter {
    values: HashMap<String, Value>,
    null_string: String,
    required_tables: RefCell<HashSet<String>>,
    table_dependencies: RefCell<HashMap<String, Vec<String>>>,
}

impl Default for MapQueryFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MapQueryFilter {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            null_string: DEFAULT_NULL_STRING.to_string(),
            required_tables: RefCell::new(HashSet::new()),
            table_dependencies: RefCell::new(HashMap::new()),
        }
    }

    pub fn from_map<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut filter = Self::new();
        for (name, value) in values {
            filter.values.insert(name.into(), value);
        }
        filter
    }

    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.add_value(name, value);
        self
    }

    pub fn with_null_string(mut self, null_string: &str) -> Self {
        self.null_string = null_string.to_string();
        self
    }

    pub fn add_value(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn set_null_string(&mut self, null_string: &str) {
        self.null_string = null_string.to_string();
    }

    /// 清除所有值和表依赖信息，空值文本恢复默认
    pub fn reset(&mut self) {
        self.values.clear();
        self.required_tables.borrow_mut().clear();
        self.table_dependencies.borrow_mut().clear();
        self.null_string = DEFAULT_NULL_STRING.to_string();
    }

    pub fn value(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    fn mark_required(&self, tables: &str) {
        let mut required = self.required_tables.borrow_mut();
        for table in split_list(tables) {
            required.insert(table.to_string());
        }
    }

    /// 表被直接标记或被某个已标记的表（传递地）依赖时视为需要
    fn is_table_required(&self, table: &str) -> bool {
        let required = self.required_tables.borrow();
        let dependencies = self.table_dependencies.borrow();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&str> = required.iter().map(String::as_str).collect();
        while let Some(current) = pending.pop() {
            if current == table {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(deps) = dependencies.get(current) {
                pending.extend(deps.iter().map(String::as_str));
            }
        }
        false
    }

    fn handle_table(&self, attributes: &NodeAttributes, phase: usize) -> DaoResult<FilterVerdict> {
        let table = attributes
            .get(TABLE_ATTR_NAME)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DaoError::validation("<TABLE> 节点缺少 name 属性"))?;

        if phase == 0 {
            if let Some(deps) = attributes.get(ATTR_REQ_TABLES) {
                let deps: Vec<String> = split_list(deps).map(String::from).collect();
                if !deps.is_empty() {
                    self.table_dependencies
                        .borrow_mut()
                        .insert(table.to_string(), deps);
                }
            }
            return Ok(FilterVerdict::NextPhase);
        }

        Ok(if self.is_table_required(table) {
            FilterVerdict::Accept
        } else {
            FilterVerdict::Reject
        })
    }
}

impl QueryFilter for MapQueryFilter {
    fn accept(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<FilterVerdict> {
        if name == NODE_TABLE {
            return self.handle_table(attributes, phase);
        }

        let verdict = standard_verdict(name, &self.value(name), attributes, |other| {
            Ok(self.value(other))
        })?;

        if verdict == FilterVerdict::Accept {
            if let Some(tables) = attributes.get(ATTR_REQ_TABLES) {
                self.mark_required(tables);
            }
        }
        Ok(verdict)
    }

    fn property(&self, name: &str) -> DaoResult<Value> {
        Ok(self.value(name))
    }

    fn null_string(&self) -> &str {
        &self.null_string
    }
}

/// 按行迭代的批量过滤器
///
/// 当前行中不存在的属性回退到基础过滤器。
#[derive(Debug, Clone)]
pub struct RowsBulkFilter {
    rows: Vec<BTreeMap<String, Value>>,
    cursor: Option<usize>,
    commit_count: i64,
    param_types: HashMap<String, ValueType>,
    base: MapQueryFilter,
}

impl RowsBulkFilter {
    pub fn new(rows: Vec<BTreeMap<String, Value>>) -> Self {
        Self {
            rows,
            cursor: None,
            commit_count: 0,
            param_types: HashMap::new(),
            base: MapQueryFilter::new(),
        }
    }

    pub fn with_commit_count(mut self, commit_count: i64) -> Self {
        self.commit_count = commit_count;
        self
    }

    pub fn with_param_type(mut self, name: &str, value_type: ValueType) -> Self {
        self.param_types.insert(name.to_string(), value_type);
        self
    }

    pub fn with_base(mut self, base: MapQueryFilter) -> Self {
        self.base = base;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn current(&self) -> Option<&BTreeMap<String, Value>> {
        self.cursor.and_then(|i| self.rows.get(i))
    }
}

impl QueryFilter for RowsBulkFilter {
    fn accept(&self, name: &str, attributes: &NodeAttributes, phase: usize) -> DaoResult<FilterVerdict> {
        if name == NODE_TABLE {
            return self.base.accept(name, attributes, phase);
        }
        let value = self.property(name)?;
        standard_verdict(name, &value, attributes, |other| self.property(other))
    }

    fn property(&self, name: &str) -> DaoResult<Value> {
        match self.current().and_then(|row| row.get(name)) {
            Some(value) => Ok(value.clone()),
            None => self.base.property(name),
        }
    }

    fn null_string(&self) -> &str {
        self.base.null_string()
    }
}

impl BulkQueryFilter for RowsBulkFilter {
    fn next(&mut self) -> DaoResult<bool> {
        let next = self.cursor.map(|i| i + 1).unwrap_or(0);
        self.cursor = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn commit_count(&self) -> i64 {
        self.commit_count
    }

    fn param_type(&self, name: &str) -> ValueType {
        self.param_types.get(name).copied().unwrap_or(ValueType::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> NodeAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_null_rules() {
        let filter = MapQueryFilter::new().with_value("name", "bob");
        assert_eq!(filter.accept("name", &attrs(&[]), 0).unwrap(), FilterVerdict::Accept);
        assert_eq!(filter.accept("age", &attrs(&[]), 0).unwrap(), FilterVerdict::Reject);
        assert_eq!(
            filter.accept("age", &attrs(&[(ATTR_NULL_NODE, "true")]), 0).unwrap(),
            FilterVerdict::Accept
        );
        assert_eq!(
            filter.accept("name", &attrs(&[(ATTR_NULL_NODE, "TRUE")]), 0).unwrap(),
            FilterVerdict::Reject
        );
    }

    #[test]
    fn test_value_rules() {
        let filter = MapQueryFilter::new()
            .with_value("status", "open")
            .with_value("code", "  ab ")
            .with_value("age", 30i64);

        assert_eq!(
            filter.accept("status", &attrs(&[(ATTR_VALUE, "open")]), 0).unwrap(),
            FilterVerdict::Accept
        );
        assert_eq!(
            filter.accept("status", &attrs(&[(ATTR_VALUE, "closed")]), 0).unwrap(),
            FilterVerdict::Reject
        );
        assert_eq!(
            filter.accept("status", &attrs(&[(ATTR_NO_VALUE, "open")]), 0).unwrap(),
            FilterVerdict::Reject
        );
        assert_eq!(
            filter.accept("code", &attrs(&[(ATTR_MIN_TRIM_LEN, "3")]), 0).unwrap(),
            FilterVerdict::Reject
        );
        assert_eq!(
            filter.accept("code", &attrs(&[(ATTR_MAX_TRIM_LEN, "2")]), 0).unwrap(),
            FilterVerdict::Accept
        );
        assert_eq!(
            filter.accept("age", &attrs(&[(ATTR_MIN_VALUE, "18"), (ATTR_MAX_VALUE, "25")]), 0).unwrap(),
            FilterVerdict::Reject
        );
        assert_eq!(
            filter.accept("status", &attrs(&[(ATTR_MIN_VALUE, "18")]), 0).unwrap(),
            FilterVerdict::Accept
        );
        assert!(filter.accept("age", &attrs(&[(ATTR_MIN_VALUE, "x")]), 0).is_err());
    }

    #[test]
    fn test_other_params() {
        let filter = MapQueryFilter::new().with_value("a", 1i64);
        assert_eq!(
            filter.accept("a", &attrs(&[(ATTR_OTHER_PARAMS, "b, ")]), 0).unwrap(),
            FilterVerdict::Reject
        );
        let filter = filter.with_value("b", 2i64);
        assert_eq!(
            filter.accept("a", &attrs(&[(ATTR_OTHER_PARAMS, "b")]), 0).unwrap(),
            FilterVerdict::Accept
        );
    }

    #[test]
    fn test_loop_collection() {
        let filter = MapQueryFilter::new()
            .with_value("ids", Value::List(vec![Value::Int(1), Value::Int(2)]))
            .with_value("one", 1i64);
        let loop_attrs = attrs(&[(ATTR_LOOP_COLLECTION, "true"), (ATTR_LOOP_DELIMITER, ",")]);
        match filter.accept("ids", &loop_attrs, 0).unwrap() {
            FilterVerdict::ProcessCollection { items, delimiter } => {
                assert_eq!(items.len(), 2);
                assert_eq!(delimiter, ",");
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert!(filter.accept("one", &loop_attrs, 0).is_err());
    }

    #[test]
    fn test_table_dependencies() {
        let filter = MapQueryFilter::new().with_value("dept", "eng");
        let emp = attrs(&[(TABLE_ATTR_NAME, "EMP"), (ATTR_REQ_TABLES, "PERSON")]);
        let dept = attrs(&[(TABLE_ATTR_NAME, "DEPT")]);
        let person = attrs(&[(TABLE_ATTR_NAME, "PERSON")]);

        assert_eq!(filter.accept(NODE_TABLE, &emp, 0).unwrap(), FilterVerdict::NextPhase);
        assert_eq!(filter.accept(NODE_TABLE, &dept, 0).unwrap(), FilterVerdict::NextPhase);
        assert_eq!(filter.accept(NODE_TABLE, &person, 0).unwrap(), FilterVerdict::NextPhase);
        assert_eq!(
            filter.accept("dept", &attrs(&[(ATTR_REQ_TABLES, "EMP")]), 0).unwrap(),
            FilterVerdict::Accept
        );

        assert_eq!(filter.accept(NODE_TABLE, &emp, 1).unwrap(), FilterVerdict::Accept);
        assert_eq!(filter.accept(NODE_TABLE, &person, 1).unwrap(), FilterVerdict::Accept);
        assert_eq!(filter.accept(NODE_TABLE, &dept, 1).unwrap(), FilterVerdict::Reject);
        assert!(filter.accept(NODE_TABLE, &attrs(&[]), 0).is_err());
    }

    #[test]
    fn test_rows_bulk_filter() {
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), Value::Int(1));
        let mut filter = RowsBulkFilter::new(vec![row.clone(), row])
            .with_commit_count(1)
            .with_param_type("name", ValueType::String)
            .with_base(MapQueryFilter::new().with_value("tenant", "t1"));

        assert_eq!(filter.property("id").unwrap(), Value::Null);
        assert!(filter.next().unwrap());
        assert_eq!(filter.property("id").unwrap(), Value::Int(1));
        assert_eq!(filter.property("tenant").unwrap(), Value::from("t1"));
        assert!(filter.next().unwrap());
        assert!(!filter.next().unwrap());
        assert!(!filter.next().unwrap());
        assert_eq!(filter.param_type("name"), ValueType::String);
        assert_eq!(filter.param_type("id"), ValueType::Any);
        assert_eq!(filter.commit_count(), 1);
    }
}
