//! 模板元素树

use std::fmt;

use crate::expression::FunctionExpression;
use crate::query::filter::NodeAttributes;

/// 绑定参数占位符
#[derive(Debug, Clone, PartialEq)]
pub enum Placeholder {
    /// `?`，按顺序消费调用方的位置参数
    Positional,
    /// `#{name}`
    Named(String),
    /// `#{f(...)}`，函数结果作为一个绑定值
    Function(FunctionExpression),
}

/// 条件节点
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalNode {
    pub name: String,
    pub attributes: NodeAttributes,
    pub children: Vec<TemplateElement>,
}

/// 模板元素
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateElement {
    Text(String),
    /// `${name}`，以文本内联
    Substitution(String),
    /// `${f(...)}`，函数结果以文本内联
    FunctionSubstitution(FunctionExpression),
    Placeholder(Placeholder),
    Node(ConditionalNode),
}

impl TemplateElement {
    /// 递归访问所有函数表达式
    pub fn for_each_function<'a>(&'a self, visit: &mut dyn FnMut(&'a FunctionExpression)) {
        match self {
            TemplateElement::FunctionSubstitution(f)
            | TemplateElement::Placeholder(Placeholder::Function(f)) => visit(f),
            TemplateElement::Node(node) => {
                for child in &node.children {
                    child.for_each_function(visit);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for TemplateElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateElement::Text(text) => write!(f, "{}", text),
            TemplateElement::Substitution(name) => write!(f, "${{{}}}", name),
            TemplateElement::FunctionSubstitution(func) => write!(f, "${{{}}}", func),
            TemplateElement::Placeholder(Placeholder::Positional) => write!(f, "?"),
            TemplateElement::Placeholder(Placeholder::Named(name)) => write!(f, "#{{{}}}", name),
            TemplateElement::Placeholder(Placeholder::Function(func)) => write!(f, "#{{{}}}", func),
            TemplateElement::Node(node) => write!(f, "<{}/>", node.name),
        }
    }
}
