//! 函数注册表
//!
//! 提供函数的注册、查找和执行功能，内置函数位于 `builtin.rs`

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::signature::{FunctionBody, FunctionDefinition, FunctionSignature, FunctionSource};
use super::builtin::BuiltinFunctions;
use crate::core::error::{DaoError, DaoResult};
use crate::core::value::{convert, Value};

/// 已注册的函数
#[derive(Clone)]
pub struct RegisteredFunction {
    pub signature: FunctionSignature,
    pub body: Arc<FunctionBody>,
}

/// 函数注册表，启动时填充，之后只读
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含内置函数库的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // 内置函数签名固定，注册不会失败
        for definition in BuiltinFunctions.functions() {
            registry.insert(definition);
        }
        registry
    }

    /// 注册单个函数，函数至少需要一个参数
    pub fn register(&mut self, definition: FunctionDefinition) -> DaoResult<()> {
        if definition.signature.param_types.is_empty() {
            return Err(DaoError::validation(format!(
                "函数 {} 至少需要一个参数",
                definition.signature.name
            )));
        }
        self.insert(definition);
        Ok(())
    }

    /// 注册一个函数来源中的全部函数，来源中没有函数时返回错误
    pub fn register_source(&mut self, source: &dyn FunctionSource) -> DaoResult<()> {
        let definitions = source.functions();
        if definitions.is_empty() {
            return Err(DaoError::validation("函数来源中没有可注册的函数"));
        }
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(())
    }

    fn insert(&mut self, definition: FunctionDefinition) {
        debug!("注册函数: {}", definition.signature);
        self.functions.insert(
            definition.signature.name.clone(),
            RegisteredFunction {
                signature: definition.signature,
                body: definition.body,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name).map(|f| &f.signature)
    }

    /// 检查函数已注册且参数个数合法
    pub fn is_valid_function(&self, name: &str, arity: usize) -> bool {
        self.signature(name)
            .map(|s| s.check_arity(arity))
            .unwrap_or(false)
    }

    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// 执行函数
    ///
    /// 参数不足声明个数时以空值补齐；每个参数先尝试转换为声明类型，
    /// 再检查直接可赋值性，都不满足时返回执行错误。
    /// 函数体返回的错误会附加函数名和实际参数。
    pub fn evaluate(&self, name: &str, args: Vec<Value>) -> DaoResult<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| DaoError::validation(format!("未注册的函数: {}", name)))?;
        let signature = &function.signature;

        if args.len() > signature.max_arity() {
            return Err(DaoError::execution(format!(
                "函数 {} 最多接受 {} 个参数，实际 {} 个",
                name,
                signature.max_arity(),
                args.len()
            )));
        }

        let mut coerced = Vec::with_capacity(signature.max_arity());
        for (index, expected) in signature.param_types.iter().enumerate() {
            let value = args.get(index).cloned().unwrap_or(Value::Null);
            let converted = convert(&value, *expected).or_else(|| {
                if expected.compatible_with(&value.value_type()) {
                    Some(value.clone())
                } else {
                    None
                }
            });
            match converted {
                Some(v) => coerced.push(v),
                None => {
                    return Err(DaoError::execution(format!(
                        "函数 {} 第 {} 个参数类型不匹配: 期望 {}，实际 {} ({})",
                        name,
                        index + 1,
                        expected,
                        value.value_type(),
                        value
                    )))
                }
            }
        }

        (function.body)(&coerced).map_err(|err| DaoError::FunctionInvocation {
            function: name.to_string(),
            arguments: coerced
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            source: Box::new(err),
        })
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .finish()
    }
}
