//! 内置函数库
//!
//! 除特别说明外，第一个参数为空值时函数返回空值。

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use super::signature::{FunctionDefinition, FunctionSignature, FunctionSource};
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, ValueType};
use crate::query::executor::QueryManager;
use crate::query::filter::MapQueryFilter;

/// 日期函数的默认格式
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

/// `to_list` / `to_set` 的默认分隔符
pub const DEFAULT_DELIMITER: &str = r"\s";

/// 内置函数来源
pub struct BuiltinFunctions;

fn text(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        other => Some(other.to_string()),
    }
}

fn split(value: &str, delimiter: &str) -> DaoResult<Vec<String>> {
    let pattern = Regex::new(delimiter)?;
    let mut tokens: Vec<String> = pattern.split(value).map(str::to_string).collect();
    // 末尾的空串不计入结果
    while tokens.last().map(|t| t.is_empty()).unwrap_or(false) {
        tokens.pop();
    }
    Ok(tokens)
}

fn case_fn(name: &str, upper: bool) -> FunctionDefinition {
    FunctionDefinition::new(
        FunctionSignature::new(name, vec![ValueType::String], ValueType::String),
        move |args| {
            Ok(match text(args, 0) {
                Some(s) if upper => Value::String(s.to_uppercase()),
                Some(s) => Value::String(s.to_lowercase()),
                None => Value::Null,
            })
        },
    )
}

fn date_to_str(args: &[Value]) -> DaoResult<Value> {
    let Some(Value::DateTime(dt)) = args.first() else {
        return Ok(Value::Null);
    };
    let format = text(args, 1).unwrap_or(DEFAULT_DATE_FORMAT);
    let mut out = String::new();
    write!(out, "{}", dt.format(format))
        .map_err(|_| DaoError::execution(format!("无效的日期格式: {}", format)))?;
    Ok(Value::String(out))
}

fn str_to_date(args: &[Value]) -> DaoResult<Value> {
    let Some(value) = text(args, 0) else {
        return Ok(Value::Null);
    };
    let format = text(args, 1).unwrap_or(DEFAULT_DATE_FORMAT);
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(Value::DateTime)
        .ok_or_else(|| {
            DaoError::execution(format!("无效的日期字符串: {} (期望格式 {})", value, format))
        })
}

fn col_to_str(args: &[Value]) -> DaoResult<Value> {
    let items = match args.first() {
        Some(Value::List(items)) => items,
        _ => return Err(DaoError::execution("col_to_str 需要一个集合参数")),
    };
    let separator = text(args, 2).unwrap_or("");
    let mut out = String::from(text(args, 1).unwrap_or(""));
    let joined: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    out.push_str(&joined.join(separator));
    out.push_str(text(args, 3).unwrap_or(""));
    Ok(Value::String(out))
}

fn to_list(args: &[Value]) -> DaoResult<Value> {
    let Some(value) = args.first().and_then(to_text) else {
        return Ok(Value::Null);
    };
    let tokens = split(&value, text(args, 1).unwrap_or(DEFAULT_DELIMITER))?;
    Ok(Value::List(tokens.into_iter().map(Value::String).collect()))
}

fn to_set(args: &[Value]) -> DaoResult<Value> {
    let Some(value) = args.first().and_then(to_text) else {
        return Ok(Value::Null);
    };
    let tokens = split(&value, text(args, 1).unwrap_or(DEFAULT_DELIMITER))?;
    let unique: Vec<String> = if text(args, 2) == Some("sorted") {
        tokens.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
    } else {
        let mut seen = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
        seen
    };
    Ok(Value::List(unique.into_iter().map(Value::String).collect()))
}

fn regexp_rep(args: &[Value]) -> DaoResult<Value> {
    let Some(value) = text(args, 0) else {
        return Ok(Value::Null);
    };
    let pattern = Regex::new(text(args, 1).unwrap_or(""))?;
    let replacement = text(args, 2).unwrap_or("");
    Ok(Value::String(pattern.replace_all(value, replacement).into_owned()))
}

fn str_replace(args: &[Value]) -> DaoResult<Value> {
    let Some(value) = text(args, 0) else {
        return Ok(Value::Null);
    };
    let from = text(args, 1).unwrap_or("");
    if from.is_empty() {
        return Ok(Value::String(value.to_string()));
    }
    Ok(Value::String(value.replace(from, text(args, 2).unwrap_or(""))))
}

/// 第一个参数的文本等于第二个参数时返回第三个参数，否则返回第四个参数
fn decode(args: &[Value]) -> DaoResult<Value> {
    let otherwise = args.get(3).cloned().unwrap_or_default();
    let (Some(value), Some(expected)) = (args.first().and_then(to_text), text(args, 1)) else {
        return Ok(otherwise);
    };
    if value == expected {
        Ok(args.get(2).cloned().unwrap_or_default())
    } else {
        Ok(otherwise)
    }
}

fn add_int(args: &[Value]) -> DaoResult<Value> {
    let base = args
        .first()
        .and_then(Value::as_int)
        .ok_or_else(|| DaoError::execution("add_int 的第一个参数不能为空"))?;
    let delta = text(args, 1).unwrap_or("").trim();
    let delta: i64 = delta
        .parse()
        .map_err(|_| DaoError::execution(format!("add_int 的增量不是整数: {}", delta)))?;
    base.checked_add(delta)
        .map(Value::Int)
        .ok_or_else(|| DaoError::execution("add_int 结果溢出"))
}

/// 在当前执行上下文中运行另一个查询
fn query_result(args: &[Value]) -> DaoResult<Value> {
    let manager = QueryManager::current()
        .ok_or_else(|| DaoError::execution("query_result 只能在查询执行过程中调用"))?;
    let query = text(args, 0).ok_or_else(|| DaoError::execution("query_result 缺少查询名"))?;
    let mode = text(args, 1).ok_or_else(|| DaoError::execution("query_result 缺少执行方式"))?;

    let mut filter = MapQueryFilter::new().with_null_string(&manager.engine().null_string);
    for pair in [2, 4, 6] {
        if let (Some(name), Some(value)) = (text(args, pair), args.get(pair + 1)) {
            if !value.is_null() {
                filter.add_value(name, value.clone());
            }
        }
    }

    match mode {
        "fetch_int" => Ok(manager.fetch_int(query, &filter, &[])?.into()),
        "fetch_value" => manager.fetch_value(query, &filter, &[]),
        "fetch_record" => Ok(manager
            .fetch_record(query, &filter, &[])?
            .map(|record| record.into_value())
            .unwrap_or_default()),
        "fetch_records" => Ok(Value::List(
            manager
                .fetch_records(query, &filter, &[])?
                .into_iter()
                .map(|record| record.into_value())
                .collect(),
        )),
        "fetch_single_column_list" => Ok(Value::List(
            manager.fetch_single_column_list(query, &filter, &[], None)?,
        )),
        other => Err(DaoError::execution(format!(
            "不支持的执行方式: {} (查询 {})",
            other, query
        ))),
    }
}

impl FunctionSource for BuiltinFunctions {
    fn functions(&self) -> Vec<FunctionDefinition> {
        use ValueType::*;

        vec![
            case_fn("lower", false),
            case_fn("upper", true),
            FunctionDefinition::new(FunctionSignature::new("to_str", vec![Any], String), |args| {
                Ok(args.first().and_then(to_text).map(Value::String).unwrap_or_default())
            }),
            FunctionDefinition::new(
                FunctionSignature::new("date_to_str", vec![DateTime, String], String).with_min_arity(1),
                date_to_str,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("str_to_date", vec![String, String], DateTime).with_min_arity(1),
                str_to_date,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("col_to_str", vec![List, String, String, String], String)
                    .with_min_arity(1),
                col_to_str,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("to_list", vec![Any, String], List).with_min_arity(1),
                to_list,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("to_set", vec![Any, String, String], List).with_min_arity(1),
                to_set,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("regexp_rep", vec![String, String, String], String),
                regexp_rep,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("str_replace", vec![String, String, String], String),
                str_replace,
            ),
            FunctionDefinition::new(
                FunctionSignature::new("decode", vec![Any, String, Any, Any], Any).with_min_arity(3),
                decode,
            ),
            FunctionDefinition::new(FunctionSignature::new("add_int", vec![Int, String], Int), add_int),
            FunctionDefinition::new(
                FunctionSignature::new(
                    "query_result",
                    vec![String, String, String, Any, String, Any, String, Any],
                    Any,
                )
                .with_min_arity(2),
                query_result,
            ),
        ]
    }
}
