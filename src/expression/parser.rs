//! Function expression parser
//!
//! Scans `name(arg1,arg2,...)` one character at a time. Arguments may be
//! literals, parameter references (`@name`), column references (`#name`) or
//! nested calls. A single regex cannot balance nested parentheses, so
//! closing parentheses are matched with an explicit depth counter.
//!
//! Scanning rules:
//! - `\` escapes the next character (a trailing `\` is dropped)
//! - unescaped `'` and `"` are rejected
//! - `(` must follow a function name
//! - a nested call may only be followed by whitespace and then `,` or the end

use crate::core::error::{DaoError, DaoResult};

use super::{Argument, FunctionExpression};

pub const PARAM_PREFIX: char = '@';
pub const COLUMN_PREFIX: char = '#';
pub const ESCAPE_CHAR: char = '\\';

/// Which reference kinds an expression may contain
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub allow_params: bool,
    pub allow_columns: bool,
}

pub fn parse_expression(expr: &str, options: ParseOptions) -> DaoResult<FunctionExpression> {
    let chars: Vec<char> = expr.trim().chars().collect();
    let source: String = chars.iter().collect();

    let open = chars
        .iter()
        .position(|c| *c == '(')
        .ok_or_else(|| DaoError::syntax("函数表达式缺少 '('", source.clone()))?;

    let name: String = chars[..open].iter().collect::<String>().trim().to_string();
    validate_name(&name, &source)?;

    let close = find_closing(&chars, open)
        .ok_or_else(|| DaoError::syntax("括号不匹配", source.clone()))?;

    if close != chars.len() - 1 {
        let trailing: String = chars[close + 1..].iter().collect();
        return Err(DaoError::syntax(
            format!("函数表达式后存在多余内容: {}", trailing),
            source,
        ));
    }

    let arguments = parse_arguments(&chars[open + 1..close], options, &source)?;

    Ok(FunctionExpression {
        name,
        arguments,
        source,
    })
}

/// Returns true when `text` looks like `name(...)` and can be handed to the parser
pub fn looks_like_call(text: &str) -> bool {
    let text = text.trim();
    match text.find('(') {
        Some(open) if open > 0 => {
            text.ends_with(')') && text[..open].trim().chars().all(is_name_char)
        }
        _ => false,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn validate_name(name: &str, source: &str) -> DaoResult<()> {
    if name.is_empty() {
        return Err(DaoError::syntax("'(' 之前缺少函数名", source));
    }
    if !name.chars().all(is_name_char) {
        return Err(DaoError::syntax(format!("无效的函数名: {}", name), source));
    }
    Ok(())
}

/// Index of the `)` matching the `(` at `open`, skipping escaped characters
fn find_closing(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            ESCAPE_CHAR => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

struct Token {
    text: String,
    escaped_start: bool,
}

impl Token {
    fn new() -> Self {
        Self {
            text: String::new(),
            escaped_start: false,
        }
    }

    fn push(&mut self, c: char, escaped: bool) {
        if self.text.trim().is_empty() && !c.is_whitespace() {
            self.escaped_start = escaped;
        }
        self.text.push(c);
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn parse_arguments(chars: &[char], options: ParseOptions, source: &str) -> DaoResult<Vec<Argument>> {
    let mut arguments = Vec::new();
    let mut token = Token::new();
    // false right after a nested call until the next comma
    let mut expecting = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ESCAPE_CHAR => {
                if let Some(next) = chars.get(i + 1) {
                    token.push(*next, true);
                }
                i += 2;
                continue;
            }
            '\'' | '"' => {
                return Err(DaoError::syntax("函数参数中不允许使用引号", source));
            }
            '(' => {
                let name = token.text.trim().to_string();
                if name.is_empty() {
                    return Err(DaoError::syntax("'(' 之前缺少函数名", source));
                }
                let close = find_closing(chars, i)
                    .ok_or_else(|| DaoError::syntax("括号不匹配", source))?;
                let nested: String = chars[i..=close].iter().collect();
                let expression = parse_expression(&format!("{}{}", name, nested), options)?;
                arguments.push(Argument::Function(expression));
                token = Token::new();

                i = close + 1;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                match chars.get(i) {
                    None => expecting = false,
                    Some(',') => {
                        expecting = true;
                        i += 1;
                    }
                    Some(other) => {
                        return Err(DaoError::syntax(
                            format!("嵌套函数之后只能跟 ',' ，实际为 '{}'", other),
                            source,
                        ));
                    }
                }
                continue;
            }
            ',' => {
                arguments.push(make_argument(&token, options, source)?);
                token = Token::new();
                expecting = true;
            }
            _ => {
                if !expecting && !c.is_whitespace() {
                    return Err(DaoError::syntax("嵌套函数之后缺少 ','", source));
                }
                token.push(c, false);
            }
        }
        i += 1;
    }

    // `f()` has no arguments, `f(a,)` has a trailing empty one
    if expecting && !(arguments.is_empty() && token.is_blank() && !token.escaped_start) {
        arguments.push(make_argument(&token, options, source)?);
    }

    Ok(arguments)
}

fn make_argument(token: &Token, options: ParseOptions, source: &str) -> DaoResult<Argument> {
    let text = token.text.trim();
    if token.escaped_start || text.chars().count() <= 1 {
        return Ok(Argument::Literal(text.to_string()));
    }

    if let Some(name) = text.strip_prefix(PARAM_PREFIX) {
        if !options.allow_params {
            return Err(DaoError::syntax("当前上下文不允许参数引用", source));
        }
        return Ok(Argument::Param(name.to_string()));
    }

    if let Some(name) = text.strip_prefix(COLUMN_PREFIX) {
        if !options.allow_columns {
            return Err(DaoError::syntax("当前上下文不允许列引用", source));
        }
        return Ok(Argument::Column(name.to_string()));
    }

    Ok(Argument::Literal(text.to_string()))
}
