//! 函数表达式模块
//!
//! 模板中的 `${f(...)}`、`#{f(...)}` 以及列表达式都被解析为 [`FunctionExpression`]。
//! 表达式在编译模板时解析并校验一次，之后只读，可在多个渲染之间共享。

pub mod functions;
pub mod parser;

use std::fmt;

use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{Value, ValueType};

pub use functions::{FunctionRegistry, FunctionSignature};
pub use parser::{looks_like_call, ParseOptions, COLUMN_PREFIX, PARAM_PREFIX};

/// 函数参数
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// 字面值（已去除转义）
    Literal(String),
    /// 参数引用 `@name`
    Param(String),
    /// 列引用 `#name`
    Column(String),
    /// 嵌套函数调用
    Function(FunctionExpression),
}

/// 函数调用求值时的数据来源
///
/// 参数引用和列引用在调用时才解析，由渲染过滤器或结果行视图提供。
pub trait DataProvider {
    /// 解析参数引用，`function` 为正在求值的函数名
    fn property(&self, function: &str, name: &str) -> DaoResult<Value>;

    /// 解析列引用
    fn column(&self, function: &str, name: &str) -> DaoResult<Value> {
        let _ = function;
        Err(DaoError::execution(format!(
            "当前上下文不支持列引用: #{}",
            name
        )))
    }
}

/// 已解析的函数表达式
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpression {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub source: String,
}

impl FunctionExpression {
    pub fn parse(expr: &str, allow_params: bool, allow_columns: bool) -> DaoResult<Self> {
        parser::parse_expression(
            expr,
            ParseOptions {
                allow_params,
                allow_columns,
            },
        )
    }

    /// 由函数名和参数文本构造，对应模板中 `${name(args)}` 的两个捕获组
    pub fn parse_call(
        name: &str,
        args: &str,
        allow_params: bool,
        allow_columns: bool,
    ) -> DaoResult<Self> {
        Self::parse(&format!("{}({})", name, args), allow_params, allow_columns)
    }

    /// 递归校验函数是否已注册以及参数个数是否在 [min_arity, 声明参数个数] 内
    pub fn validate(&self, registry: &FunctionRegistry) -> DaoResult<()> {
        let signature = registry.signature(&self.name).ok_or_else(|| {
            DaoError::validation(format!("未注册的函数: {} (表达式: {})", self.name, self.source))
        })?;

        if !signature.check_arity(self.arguments.len()) {
            return Err(DaoError::validation(format!(
                "函数 {} 参数个数错误: 期望 {} 到 {} 个，实际 {} 个 (表达式: {})",
                self.name,
                signature.min_arity,
                signature.max_arity(),
                self.arguments.len(),
                self.source
            )));
        }

        for argument in &self.arguments {
            if let Argument::Function(nested) = argument {
                nested.validate(registry)?;
            }
        }
        Ok(())
    }

    /// 解析所有参数的值
    pub fn argument_values(
        &self,
        registry: &FunctionRegistry,
        provider: &dyn DataProvider,
    ) -> DaoResult<Vec<Value>> {
        self.arguments
            .iter()
            .map(|argument| match argument {
                Argument::Literal(text) => Ok(Value::String(text.clone())),
                Argument::Param(name) => provider.property(&self.name, name),
                Argument::Column(name) => provider.column(&self.name, name),
                Argument::Function(nested) => nested.invoke(registry, provider),
            })
            .collect()
    }

    pub fn invoke(
        &self,
        registry: &FunctionRegistry,
        provider: &dyn DataProvider,
    ) -> DaoResult<Value> {
        let values = self.argument_values(registry, provider)?;
        registry.evaluate(&self.name, values)
    }

    /// 声明的返回类型，未注册时为 `Any`
    pub fn return_type(&self, registry: &FunctionRegistry) -> ValueType {
        registry
            .signature(&self.name)
            .map(|s| s.return_type)
            .unwrap_or(ValueType::Any)
    }
}

impl fmt::Display for FunctionExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
