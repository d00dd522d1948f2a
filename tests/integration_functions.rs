//! 函数表达式与函数注册表集成测试
//!
//! 测试范围:
//! - expression::parser - 参数种类、转义与括号匹配
//! - expression::functions - 自定义函数来源的注册与调用
//! - 模板中函数调用的编译期校验与运行期错误

mod common;

use std::sync::Arc;

use sqlweave::expression::functions::{FunctionDefinition, FunctionSource};
use sqlweave::expression::{Argument, FunctionExpression, FunctionRegistry, FunctionSignature};
use sqlweave::query::{MapQueryFilter, QueryTemplate};
use sqlweave::{DaoError, Value, ValueType};

// ==================== 解析 ====================

#[test]
fn test_parse_argument_kinds() {
    let expr = FunctionExpression::parse("f(@a,#b,g(1,2))", true, true).unwrap();
    assert_eq!(expr.name, "f");
    assert_eq!(expr.arguments.len(), 3);
    assert_eq!(expr.arguments[0], Argument::Param("a".to_string()));
    assert_eq!(expr.arguments[1], Argument::Column("b".to_string()));
    match &expr.arguments[2] {
        Argument::Function(nested) => {
            assert_eq!(nested.name, "g");
            assert_eq!(
                nested.arguments,
                vec![
                    Argument::Literal("1".to_string()),
                    Argument::Literal("2".to_string())
                ]
            );
        }
        other => panic!("unexpected argument: {:?}", other),
    }
}

#[test]
fn test_parse_escapes_and_balance() {
    let escaped = FunctionExpression::parse(r"f(a\,b)", true, true).unwrap();
    assert_eq!(escaped.arguments, vec![Argument::Literal("a,b".to_string())]);

    assert!(matches!(
        FunctionExpression::parse(r"f(a\,b", true, true),
        Err(DaoError::Syntax { .. })
    ));
    assert!(matches!(
        FunctionExpression::parse("f('a')", true, true),
        Err(DaoError::Syntax { .. })
    ));
    assert!(matches!(
        FunctionExpression::parse("f(#col)", true, false),
        Err(DaoError::Syntax { .. })
    ));
}

// ==================== 注册表 ====================

struct MaskFunctions;

impl FunctionSource for MaskFunctions {
    fn functions(&self) -> Vec<FunctionDefinition> {
        vec![FunctionDefinition::new(
            FunctionSignature::new("mask", vec![ValueType::String, ValueType::Int], ValueType::String)
                .with_min_arity(1),
            |args| {
                let Some(text) = args[0].as_str() else {
                    return Ok(Value::Null);
                };
                let keep = args[1].as_int().unwrap_or(4).max(0) as usize;
                let hidden = text.chars().count().saturating_sub(keep);
                let visible: String = text.chars().skip(hidden).collect();
                Ok(Value::String(format!("{}{}", "*".repeat(hidden), visible)))
            },
        )]
    }
}

struct EmptySource;

impl FunctionSource for EmptySource {
    fn functions(&self) -> Vec<FunctionDefinition> {
        Vec::new()
    }
}

fn registry_with_mask() -> Arc<FunctionRegistry> {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_source(&MaskFunctions).unwrap();
    Arc::new(registry)
}

#[test]
fn test_custom_function_source() {
    let registry = registry_with_mask();
    assert!(registry.is_valid_function("mask", 1));
    assert!(registry.is_valid_function("mask", 2));
    assert!(!registry.is_valid_function("mask", 3));
    assert!(registry.function_names().contains(&"lower"));

    let template = QueryTemplate::from_text(
        "q",
        "SELECT * FROM cards WHERE masked = #{mask(@card)} AND tail = #{mask(@card,2)}",
        registry,
    )
    .unwrap();
    let filter = MapQueryFilter::new().with_value("card", "12345678");
    let rendered = template.render(&filter, &[]).unwrap();
    assert_eq!(
        rendered.params,
        vec![Value::from("****5678"), Value::from("******78")]
    );
}

#[test]
fn test_invalid_registrations() {
    let mut registry = FunctionRegistry::new();
    assert!(matches!(
        registry.register_source(&EmptySource),
        Err(DaoError::Validation(_))
    ));
    let no_params = FunctionDefinition::new(
        FunctionSignature::new("now", Vec::new(), ValueType::DateTime),
        |_| Ok(Value::Null),
    );
    assert!(registry.register(no_params).is_err());
    assert!(registry.function_names().is_empty());
}

// ==================== 模板中的函数 ====================

#[test]
fn test_nested_builtins_in_template() {
    let template = QueryTemplate::from_text(
        "q",
        "SELECT '${upper(str_replace(@name,a,o))}' AS v, #{to_str(@n)} AS n",
        common::registry(),
    )
    .unwrap();
    let filter = MapQueryFilter::new()
        .with_value("name", "banana")
        .with_value("n", 7i64);
    let rendered = template.render(&filter, &[]).unwrap();
    assert_eq!(rendered.sql, "SELECT 'BONONO' AS v, ? AS n");
    assert_eq!(rendered.params, vec![Value::from("7")]);
}

#[test]
fn test_template_function_errors() {
    let registry = common::registry();
    assert!(matches!(
        QueryTemplate::from_text("q", "SELECT #{lower(#name)}", Arc::clone(&registry)),
        Err(DaoError::Syntax { .. })
    ));
    assert!(matches!(
        QueryTemplate::from_text("q", "SELECT #{str_replace(@a,b)}", Arc::clone(&registry)),
        Err(DaoError::Validation(_))
    ));

    let template =
        QueryTemplate::from_text("q", "SELECT #{add_int(@n,x)}", Arc::clone(&registry)).unwrap();
    let err = template
        .render(&MapQueryFilter::new().with_value("n", 1i64), &[])
        .unwrap_err();
    match err {
        DaoError::FunctionInvocation { function, .. } => assert_eq!(function, "add_int"),
        other => panic!("unexpected error: {:?}", other),
    }
}
