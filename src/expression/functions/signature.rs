//! 函数签名
//!
//! 声明参数类型、返回类型以及最少参数个数，用于编译期校验和调用时的参数转换

use std::fmt;
use std::sync::Arc;

use crate::core::error::DaoResult;
use crate::core::value::{Value, ValueType};

/// 函数体
pub type FunctionBody = dyn Fn(&[Value]) -> DaoResult<Value> + Send + Sync;

/// 函数签名定义
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub name: String,
    pub param_types: Vec<ValueType>,
    pub return_type: ValueType,
    pub min_arity: usize,
}

impl FunctionSignature {
    /// 最少参数个数默认等于声明的参数个数
    pub fn new(name: &str, param_types: Vec<ValueType>, return_type: ValueType) -> Self {
        let min_arity = param_types.len();
        Self {
            name: name.to_string(),
            param_types,
            return_type,
            min_arity,
        }
    }

    /// 设置最少参数个数，超出声明个数时回退为声明个数
    pub fn with_min_arity(mut self, min_arity: usize) -> Self {
        self.min_arity = if min_arity > self.param_types.len() {
            self.param_types.len()
        } else {
            min_arity
        };
        self
    }

    pub fn max_arity(&self) -> usize {
        self.param_types.len()
    }

    pub fn check_arity(&self, arity: usize) -> bool {
        arity >= self.min_arity && arity <= self.max_arity()
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.param_types.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({}) -> {}", self.name, params.join(", "), self.return_type)
    }
}

/// 可注册的函数定义
#[derive(Clone)]
pub struct FunctionDefinition {
    pub signature: FunctionSignature,
    pub body: Arc<FunctionBody>,
}

impl FunctionDefinition {
    pub fn new<F>(signature: FunctionSignature, body: F) -> Self
    where
        F: Fn(&[Value]) -> DaoResult<Value> + Send + Sync + 'static,
    {
        Self {
            signature,
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("signature", &self.signature)
            .finish()
    }
}

/// 函数来源，启动时通过 [`super::FunctionRegistry::register_source`] 一次性注册
pub trait FunctionSource {
    fn functions(&self) -> Vec<FunctionDefinition>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_arity_clamp() {
        let sig = FunctionSignature::new("f", vec![ValueType::String, ValueType::Int], ValueType::String);
        assert_eq!(sig.min_arity, 2);
        assert_eq!(sig.clone().with_min_arity(1).min_arity, 1);
        assert_eq!(sig.with_min_arity(5).min_arity, 2);
    }

    #[test]
    fn test_check_arity() {
        let sig = FunctionSignature::new("f", vec![ValueType::Any; 3], ValueType::Any).with_min_arity(1);
        assert!(!sig.check_arity(0));
        assert!(sig.check_arity(1));
        assert!(sig.check_arity(3));
        assert!(!sig.check_arity(4));
        assert_eq!(sig.to_string(), "f(ANY, ANY, ANY) -> ANY");
    }
}
