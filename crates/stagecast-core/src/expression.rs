// crates/stagecast-core/src/expression.rs
//
// The scene expression language: a string is compiled into a reactive binding
// over the scene's variables. Lexing and operator resolution follow the
// precedence ladder (unary tightest, ternary loosest); the first violation
// aborts the whole parse with a user error carrying the offending position —
// no partial binding is ever produced.
//
// Supported:
//   numbers, double-quoted strings (\n \" \\), identifiers, true/false,
//   animate(expr, duration, "easing"), sin(x), cos(x),
//   + - * / %  < <= > >=  == !=  && || !  ?:  and parentheses.

use crate::binding::{when, Binding, ToStringBinding};
use crate::error::CoreError;
use crate::tween::Tweener;

/// A parsed expression: a binding tagged with its result type.
#[derive(Clone)]
pub enum ExprValue {
    Number(Binding<f64>),
    Text(Binding<String>),
    Boolean(Binding<bool>),
}

impl std::fmt::Debug for ExprValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExprValue::{}", self.type_name())
    }
}

impl ExprValue {
    fn type_name(&self) -> &'static str {
        match self {
            ExprValue::Number(_) => "number",
            ExprValue::Text(_) => "string",
            ExprValue::Boolean(_) => "boolean",
        }
    }
}

/// Resolves identifiers to typed bindings. Unknown names fail the parse.
pub type VariableResolver<'a> = dyn Fn(&str) -> Result<ExprValue, CoreError> + 'a;

/// Compile `input` against `resolver`.
pub fn parse_expression(input: &str, resolver: &VariableResolver) -> Result<ExprValue, CoreError> {
    let chars: Vec<char> = input.chars().collect();
    let mut cursor = 0usize;
    let value = parse_expr(&mut cursor, &chars, input, resolver)?;

    skip_whitespace(&mut cursor, &chars);
    if cursor != chars.len() {
        return Err(user_error("Unexpected trailing input", cursor, input));
    }
    Ok(value)
}

/// Convenience: compile and require a numeric result.
pub fn parse_number_expression(
    input: &str,
    resolver: &VariableResolver,
) -> Result<Binding<f64>, CoreError> {
    require_number(parse_expression(input, resolver)?, input)
}

// ── Lexing helpers ────────────────────────────────────────────────────────────

fn user_error(msg: &str, cursor: usize, input: &str) -> CoreError {
    CoreError::User(format!("{msg} at index {cursor} in {input}"))
}

fn skip_whitespace(cursor: &mut usize, chars: &[char]) {
    while *cursor < chars.len() && matches!(chars[*cursor], ' ' | '\t') {
        *cursor += 1;
    }
}

fn next_non_whitespace(
    cursor: &mut usize,
    chars: &[char],
    input: &str,
    error_if_eof: &str,
) -> Result<char, CoreError> {
    skip_whitespace(cursor, chars);
    chars.get(*cursor).copied().ok_or_else(|| {
        CoreError::User(format!("Unexpected end of input ({error_if_eof}) in {input}"))
    })
}

fn parse_constant(cursor: &mut usize, chars: &[char], input: &str) -> Result<f64, CoreError> {
    let start = *cursor;
    while *cursor < chars.len() && (chars[*cursor].is_ascii_digit() || chars[*cursor] == '.') {
        *cursor += 1;
    }
    let text: String = chars[start..*cursor].iter().collect();
    text.parse::<f64>()
        .map_err(|_| user_error(&format!("{text} is not a number"), start, input))
}

fn parse_string_literal(cursor: &mut usize, chars: &[char], input: &str) -> Result<String, CoreError> {
    if chars.get(*cursor) != Some(&'"') {
        return Err(user_error("Expected \"", *cursor, input));
    }
    *cursor += 1;

    let mut literal = String::new();
    let mut escaping = false;

    while let Some(&ch) = chars.get(*cursor) {
        match ch {
            '\\' => {
                if escaping {
                    literal.push('\\');
                    escaping = false;
                } else {
                    escaping = true;
                }
            }
            '"' => {
                if escaping {
                    literal.push('"');
                    escaping = false;
                } else {
                    *cursor += 1;
                    return Ok(literal);
                }
            }
            'n' => {
                if escaping {
                    literal.push('\n');
                    escaping = false;
                } else {
                    literal.push('n');
                }
            }
            other => {
                literal.push(other);
                escaping = false;
            }
        }
        *cursor += 1;
    }

    Err(CoreError::User(format!(
        "Unexpected end of input (Expected closing \") in {input}"
    )))
}

fn is_identifier_char(ch: char, first: bool) -> bool {
    ch == '.' || ch == '_' || ch.is_ascii_alphabetic() || (!first && ch.is_ascii_digit())
}

// ── Operators ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpKind {
    Unary,
    Binary,
    Ternary,
}

#[derive(Clone, Debug)]
struct Op {
    characters: &'static str,
    precedence: i32,
    kind:       OpKind,
}

impl Op {
    fn new(characters: &'static str, precedence: i32, kind: OpKind) -> Self {
        Self { characters, precedence, kind }
    }
}

const MAX_PRECEDENCE: i32 = 15;

/// Operator lexer. Two-character operators are recognised greedily; a `-` or
/// `!` followed by an operand (no space) is unary.
fn parse_operator(cursor: &mut usize, chars: &[char], input: &str) -> Result<Op, CoreError> {
    const NONE: char = ' ';
    let mut first = NONE;

    while let Some(&ch) = chars.get(*cursor) {
        match ch {
            '+' => {
                *cursor += 1;
                return Ok(Op::new("+", 6, OpKind::Binary));
            }
            '*' => {
                *cursor += 1;
                return Ok(Op::new("*", 5, OpKind::Binary));
            }
            '/' => {
                *cursor += 1;
                return Ok(Op::new("/", 5, OpKind::Binary));
            }
            '%' => {
                *cursor += 1;
                return Ok(Op::new("%", 5, OpKind::Binary));
            }
            '?' => {
                *cursor += 1;
                return Ok(Op::new("?", 15, OpKind::Ternary));
            }
            ':' => {
                *cursor += 1;
                return Ok(Op::new(":", 15, OpKind::Ternary));
            }
            '-' | '!' | '<' | '>' => {
                if first == ch {
                    return Err(user_error(&format!("Did not expect {ch}"), *cursor, input));
                }
                first = ch;
                *cursor += 1;
            }
            '=' => match first {
                '=' => {
                    *cursor += 1;
                    return Ok(Op::new("==", 9, OpKind::Binary));
                }
                '!' => {
                    *cursor += 1;
                    return Ok(Op::new("!=", 9, OpKind::Binary));
                }
                '>' => {
                    *cursor += 1;
                    return Ok(Op::new(">=", 8, OpKind::Binary));
                }
                '<' => {
                    *cursor += 1;
                    return Ok(Op::new("<=", 8, OpKind::Binary));
                }
                NONE => {
                    *cursor += 1;
                    first = '=';
                }
                _ => return Err(user_error("Did not expect =", *cursor, input)),
            },
            '|' => match first {
                '|' => {
                    *cursor += 1;
                    return Ok(Op::new("||", 14, OpKind::Binary));
                }
                NONE => {
                    *cursor += 1;
                    first = '|';
                }
                _ => return Err(user_error("Did not expect |", *cursor, input)),
            },
            '&' => match first {
                '&' => {
                    *cursor += 1;
                    return Ok(Op::new("&&", 13, OpKind::Binary));
                }
                NONE => {
                    *cursor += 1;
                    first = '&';
                }
                _ => return Err(user_error("Did not expect &", *cursor, input)),
            },
            ' ' | '\t' => match first {
                '-' => return Ok(Op::new("-", 6, OpKind::Binary)),
                '!' => return Ok(Op::new("!", 3, OpKind::Unary)),
                '<' => return Ok(Op::new("<", 8, OpKind::Binary)),
                '>' => return Ok(Op::new(">", 8, OpKind::Binary)),
                _ => {
                    *cursor += 1;
                }
            },
            _ => {
                return match first {
                    '<' => Ok(Op::new("<", 8, OpKind::Binary)),
                    '>' => Ok(Op::new(">", 8, OpKind::Binary)),
                    '-' => Ok(Op::new("unary-", 3, OpKind::Unary)),
                    '!' => Ok(Op::new("!", 3, OpKind::Unary)),
                    _ => Err(user_error(
                        "Expected second character of operator",
                        *cursor,
                        input,
                    )),
                }
            }
        }
    }

    Err(CoreError::User(format!(
        "Unexpected end of input (Expected operator) in {input}"
    )))
}

// ── Typed operations ──────────────────────────────────────────────────────────

fn require_number(value: ExprValue, input: &str) -> Result<Binding<f64>, CoreError> {
    match value {
        ExprValue::Number(b) => Ok(b),
        other => Err(CoreError::User(format!(
            "Required a number but got a {} in {input}",
            other.type_name()
        ))),
    }
}

fn require_boolean(value: ExprValue, input: &str) -> Result<Binding<bool>, CoreError> {
    match value {
        ExprValue::Boolean(b) => Ok(b),
        other => Err(CoreError::User(format!(
            "Required a boolean but got a {} in {input}",
            other.type_name()
        ))),
    }
}

fn require_text(value: ExprValue, input: &str) -> Result<Binding<String>, CoreError> {
    match value {
        ExprValue::Text(b) => Ok(b),
        other => Err(CoreError::User(format!(
            "Required a string but got a {} in {input}",
            other.type_name()
        ))),
    }
}

fn stringify(value: &ExprValue) -> Binding<String> {
    match value {
        ExprValue::Number(b) => b.stringified(),
        ExprValue::Boolean(b) => b.stringified(),
        ExprValue::Text(b) => b.clone(),
    }
}

fn add(lhs: ExprValue, rhs: ExprValue) -> ExprValue {
    match (&lhs, &rhs) {
        (ExprValue::Number(l), ExprValue::Number(r)) => ExprValue::Number(l + r),
        (ExprValue::Text(l), ExprValue::Text(r)) => ExprValue::Text(l + r),
        // Any + with a string stringifies the other operand.
        _ => ExprValue::Text(&stringify(&lhs) + &stringify(&rhs)),
    }
}

fn equal(lhs: ExprValue, rhs: ExprValue, input: &str) -> Result<Binding<bool>, CoreError> {
    match (&lhs, &rhs) {
        (ExprValue::Number(l), ExprValue::Number(r)) => Ok(l.eq_binding(r)),
        (ExprValue::Text(l), ExprValue::Text(r)) => Ok(l.eq_binding(r)),
        _ => Ok(require_boolean(lhs, input)?.eq_binding(&require_boolean(rhs, input)?)),
    }
}

fn ternary(
    condition: ExprValue,
    true_value: ExprValue,
    false_value: ExprValue,
    input: &str,
) -> Result<ExprValue, CoreError> {
    let cond = require_boolean(condition, input)?;
    match (&true_value, &false_value) {
        (ExprValue::Number(t), ExprValue::Number(f)) => {
            Ok(ExprValue::Number(when(&cond).then(t).otherwise(f)))
        }
        (ExprValue::Text(t), ExprValue::Text(f)) => {
            Ok(ExprValue::Text(when(&cond).then(t).otherwise(f)))
        }
        (ExprValue::Boolean(_), ExprValue::Boolean(_)) => {
            let t = require_boolean(true_value, input)?;
            let f = require_boolean(false_value, input)?;
            Ok(ExprValue::Boolean(when(&cond).then(&t).otherwise(&f)))
        }
        _ => Err(CoreError::User(format!(
            "Ternary branches must have the same type in {input}"
        ))),
    }
}

// ── Functions ─────────────────────────────────────────────────────────────────

fn create_function(
    name: &str,
    params: Vec<ExprValue>,
    resolver: &VariableResolver,
    cursor: usize,
    input: &str,
) -> Result<ExprValue, CoreError> {
    match name {
        "animate" => {
            if params.len() != 3 {
                return Err(CoreError::User(
                    "animate() function requires three parameters: to_animate, duration, tweener"
                        .into(),
                ));
            }
            let mut params = params.into_iter();
            let to_animate = require_number(params.next().unwrap(), input)?;
            let frame_counter = require_number(resolver("frame")?, input)?;
            let duration = require_number(params.next().unwrap(), input)?;
            let tweener = require_text(params.next().unwrap(), input)?.transformed(|name| {
                Tweener::from_name(&name).unwrap_or_else(|_| {
                    log::warn!("[expression] unknown easing {name}, falling back to linear");
                    Tweener::linear()
                })
            });
            Ok(ExprValue::Number(to_animate.animated(
                &frame_counter,
                &duration,
                &tweener,
            )))
        }
        "sin" => {
            if params.len() != 1 {
                return Err(CoreError::User(
                    "sin() function requires one parameter: angle".into(),
                ));
            }
            let angle = require_number(params.into_iter().next().unwrap(), input)?;
            Ok(ExprValue::Number(angle.transformed(f64::sin)))
        }
        "cos" => {
            if params.len() != 1 {
                return Err(CoreError::User(
                    "cos() function requires one parameter: angle".into(),
                ));
            }
            let angle = require_number(params.into_iter().next().unwrap(), input)?;
            Ok(ExprValue::Number(angle.transformed(f64::cos)))
        }
        other => Err(user_error(
            &format!("{other}() is an unknown function"),
            cursor,
            input,
        )),
    }
}

fn parse_function(
    name: String,
    cursor: &mut usize,
    chars: &[char],
    input: &str,
    resolver: &VariableResolver,
) -> Result<ExprValue, CoreError> {
    if chars.get(*cursor) != Some(&'(') {
        return Err(user_error("Expected (", *cursor, input));
    }
    *cursor += 1;

    let mut params = Vec::new();

    while *cursor < chars.len() {
        params.push(parse_expr(cursor, chars, input, resolver)?);

        let next = next_non_whitespace(cursor, chars, input, "Expected , or )")?;
        if next == ')' {
            break;
        }
        if next != ',' {
            return Err(user_error("Expected ) or ,", *cursor, input));
        }
        *cursor += 1;
    }

    if next_non_whitespace(cursor, chars, input, "Expected , or )")? != ')' {
        return Err(user_error("Expected )", *cursor, input));
    }
    *cursor += 1;

    create_function(&name, params, resolver, *cursor, input)
}

fn parse_parenthesis(
    cursor: &mut usize,
    chars: &[char],
    input: &str,
    resolver: &VariableResolver,
) -> Result<ExprValue, CoreError> {
    if chars.get(*cursor) != Some(&'(') {
        return Err(user_error("Expected (", *cursor, input));
    }
    *cursor += 1;

    let expr = parse_expr(cursor, chars, input, resolver)?;

    if next_non_whitespace(cursor, chars, input, "Expected )")? != ')' {
        return Err(user_error("Expected )", *cursor, input));
    }
    *cursor += 1;

    Ok(expr)
}

// ── Token resolution ──────────────────────────────────────────────────────────

enum Token {
    Value(ExprValue),
    Operator(Op),
    FunctionName(String),
}

fn token_value(token: Token, input: &str) -> Result<ExprValue, CoreError> {
    match token {
        Token::Value(v) => Ok(v),
        _ => Err(CoreError::User(format!("Expected a value in {input}"))),
    }
}

fn resolve_operators(
    precedence: i32,
    tokens: &mut Vec<Token>,
    input: &str,
) -> Result<(), CoreError> {
    let mut i = 0usize;
    while i < tokens.len() {
        let op = match &tokens[i] {
            Token::Operator(op) if op.precedence == precedence => op.clone(),
            _ => {
                i += 1;
                continue;
            }
        };

        let missing = || CoreError::User(format!("Missing operand for {} in {input}", op.characters));

        match op.kind {
            OpKind::Unary => {
                if i + 1 >= tokens.len() {
                    return Err(missing());
                }
                let operand = token_value(tokens.remove(i + 1), input)?;
                tokens[i] = Token::Value(match op.characters {
                    "unary-" => ExprValue::Number(-&require_number(operand, input)?),
                    _ => ExprValue::Boolean(!&require_boolean(operand, input)?),
                });
            }
            OpKind::Binary => {
                if i == 0 || i + 1 >= tokens.len() {
                    return Err(missing());
                }
                let rhs = token_value(tokens.remove(i + 1), input)?;
                let lhs = token_value(tokens.remove(i - 1), input)?;
                i -= 1;

                let result = match op.characters {
                    "*" => ExprValue::Number(&require_number(lhs, input)? * &require_number(rhs, input)?),
                    "/" => ExprValue::Number(&require_number(lhs, input)? / &require_number(rhs, input)?),
                    "%" => ExprValue::Number(&require_number(lhs, input)? % &require_number(rhs, input)?),
                    "+" => add(lhs, rhs),
                    "-" => ExprValue::Number(&require_number(lhs, input)? - &require_number(rhs, input)?),
                    "<" => ExprValue::Boolean(require_number(lhs, input)?.lt(&require_number(rhs, input)?)),
                    "<=" => ExprValue::Boolean(require_number(lhs, input)?.le(&require_number(rhs, input)?)),
                    ">" => ExprValue::Boolean(require_number(lhs, input)?.gt(&require_number(rhs, input)?)),
                    ">=" => ExprValue::Boolean(require_number(lhs, input)?.ge(&require_number(rhs, input)?)),
                    "==" => ExprValue::Boolean(equal(lhs, rhs, input)?),
                    "!=" => ExprValue::Boolean(!&equal(lhs, rhs, input)?),
                    "&&" => ExprValue::Boolean(require_boolean(lhs, input)?.and(&require_boolean(rhs, input)?)),
                    "||" => ExprValue::Boolean(require_boolean(lhs, input)?.or(&require_boolean(rhs, input)?)),
                    other => {
                        return Err(CoreError::User(format!("Unknown operator {other} in {input}")))
                    }
                };
                tokens[i] = Token::Value(result);
            }
            OpKind::Ternary => {
                if op.characters == "?" {
                    if i == 0 || i + 3 >= tokens.len() {
                        return Err(missing());
                    }
                    match &tokens[i + 2] {
                        Token::Operator(colon) if colon.characters == ":" => {}
                        _ => {
                            return Err(CoreError::User(format!(
                                "Expected : as part of ternary expression in {input}"
                            )))
                        }
                    }

                    let false_value = token_value(tokens.remove(i + 3), input)?;
                    tokens.remove(i + 2);
                    let true_value = token_value(tokens.remove(i + 1), input)?;
                    let condition = token_value(tokens.remove(i - 1), input)?;
                    i -= 1;
                    tokens[i] =
                        Token::Value(ternary(condition, true_value, false_value, input)?);
                } else {
                    i += 1;
                    continue;
                }
            }
        }
    }
    Ok(())
}

fn parse_expr(
    cursor: &mut usize,
    chars: &[char],
    input: &str,
    resolver: &VariableResolver,
) -> Result<ExprValue, CoreError> {
    let mut tokens: Vec<Token> = Vec::new();

    while *cursor < chars.len() {
        let ch = next_non_whitespace(cursor, chars, input, "Expected expression")?;

        match ch {
            '0'..='9' => {
                let constant = parse_constant(cursor, chars, input)?;
                tokens.push(Token::Value(ExprValue::Number(Binding::new(constant))));
            }
            '+' | '-' | '*' | '/' | '%' | '<' | '>' | '!' | '=' | '|' | '&' | '?' | ':' => {
                tokens.push(Token::Operator(parse_operator(cursor, chars, input)?));
            }
            '"' => {
                let literal = parse_string_literal(cursor, chars, input)?;
                tokens.push(Token::Value(ExprValue::Text(Binding::new(literal))));
            }
            '(' => {
                if let Some(Token::FunctionName(_)) = tokens.last() {
                    let Some(Token::FunctionName(name)) = tokens.pop() else {
                        unreachable!()
                    };
                    tokens.push(Token::Value(parse_function(
                        name, cursor, chars, input, resolver,
                    )?));
                } else {
                    tokens.push(Token::Value(parse_parenthesis(cursor, chars, input, resolver)?));
                }
            }
            ')' | ',' => break,
            _ => {
                // Identifier: variable reference, reserved word, or a function
                // name when '(' follows.
                let start = *cursor;
                let mut first = true;
                while let Some(&c) = chars.get(*cursor) {
                    if !is_identifier_char(c, first) {
                        break;
                    }
                    first = false;
                    *cursor += 1;
                }
                let name: String = chars[start..*cursor].iter().collect();
                if name.is_empty() {
                    return Err(user_error("Expected expression", *cursor, input));
                }

                if chars.get(*cursor) == Some(&'(') {
                    tokens.push(Token::FunctionName(name));
                } else if name == "true" {
                    tokens.push(Token::Value(ExprValue::Boolean(Binding::new(true))));
                } else if name == "false" {
                    tokens.push(Token::Value(ExprValue::Boolean(Binding::new(false))));
                } else {
                    tokens.push(Token::Value(resolver(&name)?));
                }
            }
        }
    }

    if tokens.is_empty() {
        return Err(user_error("Expected expression", *cursor, input));
    }

    let mut precedence = 1;
    while tokens.len() > 1 {
        if precedence > MAX_PRECEDENCE {
            return Err(CoreError::User(format!(
                "Could not resolve expression {input}"
            )));
        }
        resolve_operators(precedence, &mut tokens, input)?;
        precedence += 1;
    }

    token_value(tokens.into_iter().next().unwrap(), input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver_with(
        vars: HashMap<String, ExprValue>,
    ) -> impl Fn(&str) -> Result<ExprValue, CoreError> {
        move |name: &str| {
            vars.get(name)
                .cloned()
                .ok_or_else(|| CoreError::User(format!("{name} not found")))
        }
    }

    fn empty_resolver() -> impl Fn(&str) -> Result<ExprValue, CoreError> {
        resolver_with(HashMap::new())
    }

    fn num(input: &str, resolver: &VariableResolver) -> f64 {
        parse_number_expression(input, resolver).unwrap().get()
    }

    #[test]
    fn arithmetic_precedence() {
        let r = empty_resolver();
        assert_eq!(num("1 + 2 * 3", &r), 7.0);
        assert_eq!(num("(1 + 2) * 3", &r), 9.0);
        assert_eq!(num("10 / 4", &r), 2.5);
        assert_eq!(num("7 % 3", &r), 1.0);
        assert_eq!(num("2 - -3", &r), 5.0);
    }

    #[test]
    fn comparisons_and_logic() {
        let r = empty_resolver();
        let parsed = parse_expression("1 < 2 && 3 >= 3", &r).unwrap();
        let ExprValue::Boolean(b) = parsed else { panic!("expected boolean") };
        assert!(b.get());

        let parsed = parse_expression("!true || 1 == 2", &r).unwrap();
        let ExprValue::Boolean(b) = parsed else { panic!("expected boolean") };
        assert!(!b.get());
    }

    #[test]
    fn ternary_requires_boolean_condition() {
        let r = empty_resolver();
        assert_eq!(num("1 < 2 ? 10 : 20", &r), 10.0);
        assert!(parse_expression("1 ? 10 : 20", &r).is_err());
    }

    #[test]
    fn string_literals_and_concat() {
        let r = empty_resolver();
        let parsed = parse_expression("\"a\\n\" + \"b\" + 1", &r).unwrap();
        let ExprValue::Text(s) = parsed else { panic!("expected string") };
        assert_eq!(s.get(), "a\nb1");
    }

    #[test]
    fn variables_resolve_and_react() {
        let mut vars = HashMap::new();
        let v = Binding::new(3.0);
        vars.insert("v".to_string(), ExprValue::Number(v.clone()));
        let r = resolver_with(vars);

        let result = parse_number_expression("v * 2 + 1", &r).unwrap();
        assert_eq!(result.get(), 7.0);
        v.set(5.0).unwrap();
        assert_eq!(result.get(), 11.0);
    }

    #[test]
    fn unknown_variable_fails_with_position_context() {
        let r = empty_resolver();
        let err = parse_expression("nope + 1", &r).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn animate_tweens_toward_its_operand() {
        let mut vars = HashMap::new();
        let v = Binding::new(3.0);
        let frame = Binding::new(0i64);
        vars.insert("v".to_string(), ExprValue::Number(v.clone()));
        vars.insert("frame".to_string(), ExprValue::Number(frame.as_f64()));
        let r = resolver_with(vars);

        let result =
            parse_number_expression("animate(v, 10, \"linear\") + 1", &r).unwrap();

        // Settled at the destination: v + 1.
        assert_eq!(result.get(), 4.0);
        for i in 1..=10 {
            frame.set(i).unwrap();
            assert_eq!(result.get(), 4.0);
        }

        // New destination: tween from the old value toward v + 1 = 6.
        v.set(5.0).unwrap();
        frame.set(11).unwrap();
        assert_eq!(result.get(), 4.0);
        frame.set(16).unwrap();
        let mid = result.get();
        assert!(mid > 4.0 && mid < 6.0, "mid was {mid}");
        for i in 17..=25 {
            frame.set(i).unwrap();
        }
        assert_eq!(result.get(), 6.0);
    }

    #[test]
    fn sin_and_cos() {
        let r = empty_resolver();
        assert!((num("sin(0)", &r)).abs() < 1e-12);
        assert!((num("cos(0)", &r) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn arithmetic_on_strings_is_rejected() {
        let r = empty_resolver();
        assert!(parse_expression("\"a\" * 2", &r).is_err());
    }

    #[test]
    fn unknown_function_is_rejected() {
        let r = empty_resolver();
        assert!(parse_expression("tan(1)", &r).is_err());
    }
}
