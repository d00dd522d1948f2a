use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

use super::{Value, ValueType, DATETIME_FORMAT};

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 按目标类型转换值
///
/// 返回 `None` 表示没有可用的转换，调用方随后检查直接可赋值性。
/// 空值可转换为任何类型。
pub fn convert(value: &Value, target: ValueType) -> Option<Value> {
    if value.is_null() || target == ValueType::Any {
        return Some(value.clone());
    }
    match (value, target) {
        (v, t) if v.value_type() == t => Some(v.clone()),

        (Value::Int(i), ValueType::Float) => Some(Value::Float(*i as f64)),
        (Value::Float(f), ValueType::Int) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Some(Value::Int(*f as i64))
            } else {
                None
            }
        }
        (Value::Int(i), ValueType::Bool) => match i {
            0 => Some(Value::Bool(false)),
            1 => Some(Value::Bool(true)),
            _ => None,
        },
        (Value::Bool(b), ValueType::Int) => Some(Value::Int(i64::from(*b))),

        (Value::String(s), ValueType::Int) => s.trim().parse::<i64>().ok().map(Value::Int),
        (Value::String(s), ValueType::Float) => s.trim().parse::<f64>().ok().map(Value::Float),
        (Value::String(s), ValueType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (Value::String(s), ValueType::DateTime) => parse_datetime(s).map(Value::DateTime),

        (Value::List(_) | Value::Map(_) | Value::Bytes(_), ValueType::String) => None,
        (v, ValueType::String) => Some(Value::String(v.to_string())),

        _ => None,
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(convert(&Value::Int(3), ValueType::Float), Some(Value::Float(3.0)));
        assert_eq!(convert(&Value::Float(3.0), ValueType::Int), Some(Value::Int(3)));
        assert_eq!(convert(&Value::Float(3.5), ValueType::Int), None);
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(convert(&Value::from(" 12 "), ValueType::Int), Some(Value::Int(12)));
        assert_eq!(convert(&Value::from("abc"), ValueType::Int), None);
        assert_eq!(convert(&Value::Int(5), ValueType::String), Some(Value::from("5")));
        assert!(matches!(
            convert(&Value::from("2024-03-01"), ValueType::DateTime),
            Some(Value::DateTime(_))
        ));
        assert_eq!(convert(&Value::List(vec![]), ValueType::String), None);
    }

    #[test]
    fn test_null_and_any() {
        assert_eq!(convert(&Value::Null, ValueType::Int), Some(Value::Null));
        let list = Value::List(vec![Value::Int(1)]);
        assert_eq!(convert(&list, ValueType::Any), Some(list.clone()));
    }
}
