//! Template text tokenizer
//!
//! Template text is split against five competing token patterns. At every
//! position the leftmost match across all patterns wins; a tie goes to the
//! pattern listed first. A single `?` is a positional placeholder and `??`
//! is an escape for one literal `?`, so `???` is a literal `?` followed by a
//! placeholder.

use std::sync::OnceLock;

use regex::Regex;

use super::element::{Placeholder, TemplateElement};
use crate::core::error::DaoResult;
use crate::expression::{FunctionExpression, FunctionRegistry};

const PARAM: usize = 0;
const PARAM_WITH_FUNCTION: usize = 1;
const QUEST: usize = 2;
const NAMED_QUEST: usize = 3;
const QUEST_WITH_FUNCTION: usize = 4;

const PATTERN_SOURCES: [&str; 5] = [
    r"\$\{(\w+)\}",
    r"\$\{(\w+)\(([^{}]*)\)\}",
    r"\?\??",
    r"#\{(\w+)\}",
    r"#\{(\w+)\(([^{}]*)\)\}",
];

static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn patterns() -> DaoResult<&'static [Regex]> {
    if let Some(compiled) = PATTERNS.get() {
        return Ok(compiled);
    }
    let compiled = PATTERN_SOURCES
        .iter()
        .map(|source| Regex::new(source))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PATTERNS.get_or_init(|| compiled))
}

struct Token {
    kind: usize,
    start: usize,
    end: usize,
    groups: [String; 2],
}

fn next_token(text: &str, from: usize) -> DaoResult<Option<Token>> {
    let mut best: Option<Token> = None;
    for (kind, pattern) in patterns()?.iter().enumerate() {
        let Some(caps) = pattern.captures_at(text, from) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if best.as_ref().map(|b| whole.start() < b.start).unwrap_or(true) {
            let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
            best = Some(Token {
                kind,
                start: whole.start(),
                end: whole.end(),
                groups: [group(1), group(2)],
            });
        }
    }
    Ok(best)
}

fn compile_function(
    name: &str,
    args: &str,
    registry: &FunctionRegistry,
) -> DaoResult<FunctionExpression> {
    let expression = FunctionExpression::parse_call(name, args, true, false)?;
    expression.validate(registry)?;
    Ok(expression)
}

fn flush_literal(literal: &mut String, out: &mut Vec<TemplateElement>) {
    if !literal.is_empty() {
        out.push(TemplateElement::Text(std::mem::take(literal)));
    }
}

/// Splits template text into elements, appending to `out`
pub fn tokenize(
    text: &str,
    registry: &FunctionRegistry,
    out: &mut Vec<TemplateElement>,
) -> DaoResult<()> {
    let mut literal = String::new();
    let mut position = 0;

    while let Some(token) = next_token(text, position)? {
        literal.push_str(&text[position..token.start]);
        let matched = &text[token.start..token.end];
        position = token.end;

        let element = match token.kind {
            PARAM => TemplateElement::Substitution(token.groups[0].clone()),
            PARAM_WITH_FUNCTION => TemplateElement::FunctionSubstitution(compile_function(
                &token.groups[0],
                &token.groups[1],
                registry,
            )?),
            QUEST if matched.len() > 1 => {
                literal.push('?');
                continue;
            }
            QUEST => TemplateElement::Placeholder(Placeholder::Positional),
            NAMED_QUEST => TemplateElement::Placeholder(Placeholder::Named(token.groups[0].clone())),
            QUEST_WITH_FUNCTION => TemplateElement::Placeholder(Placeholder::Function(
                compile_function(&token.groups[0], &token.groups[1], registry)?,
            )),
            _ => unreachable!("unknown token pattern"),
        };

        flush_literal(&mut literal, out);
        out.push(element);
    }

    literal.push_str(&text[position..]);
    flush_literal(&mut literal, out);
    Ok(())
}
