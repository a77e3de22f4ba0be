//! Expression host for headless clients
//!
//! Evaluates a small expression language: JSON-style literals, arithmetic
//! with the usual precedence, string concatenation with `+`, and named
//! globals. Statements may be separated by `;`; the value of the last one
//! is the result. Anything that is not a defined global fails with
//! `<name> is not defined`.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::dom::{ScriptError, ScriptHost};

/// Largest integer an `f64` represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Deepest allowed nesting of groups, literals and unary operators
const MAX_DEPTH: usize = 256;

/// [`ScriptHost`] backed by the expression evaluator
#[derive(Debug, Default, Clone)]
pub struct ExpressionHost {
    globals: BTreeMap<String, Value>,
}

impl ExpressionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` resolve to `value`
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }
}

impl ScriptHost for ExpressionHost {
    fn evaluate(&mut self, code: &str) -> Result<Value, ScriptError> {
        let tokens = tokenize(code)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            globals: &self.globals,
        };
        parser.program()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn tokenize(code: &str) -> Result<Vec<Token>, ScriptError> {
    let chars: Vec<char> = code.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text
                .parse()
                .map_err(|_| ScriptError::Syntax(format!("Invalid number '{}'", text)))?;
            tokens.push(Token::Number(number));
        } else if c == '"' || c == '\'' {
            let (text, next) = string_literal(&chars, i)?;
            tokens.push(Token::Str(text));
            i = next;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/%()[]{},:;".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(ScriptError::Syntax(format!("Unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

fn string_literal(chars: &[char], start: usize) -> Result<(String, usize), ScriptError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ScriptError::Syntax("Unterminated string".to_string()))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ScriptError::Syntax("Unterminated string".to_string()))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    globals: &'a BTreeMap<String, Value>,
}

impl Parser<'_> {
    fn program(&mut self) -> Result<Value, ScriptError> {
        let mut result = Value::Null;
        while self.peek().is_some() {
            if self.eat(';') {
                continue;
            }
            result = self.expression()?;
            if self.peek().is_some() && !self.eat(';') {
                return Err(self.unexpected());
            }
        }
        Ok(result)
    }

    fn expression(&mut self) -> Result<Value, ScriptError> {
        self.nested(Self::sum)
    }

    /// Run `parse` one nesting level deeper
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, ScriptError>,
    ) -> Result<Value, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(ScriptError::Syntax("Maximum nesting depth exceeded".to_string()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn sum(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.term()?;
        loop {
            if self.eat('+') {
                let right = self.term()?;
                left = add(left, right)?;
            } else if self.eat('-') {
                let right = self.term()?;
                left = arithmetic('-', &left, &right)?;
            } else {
                return Ok(left);
            }
        }
    }

    fn term(&mut self) -> Result<Value, ScriptError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct(c @ ('*' | '/' | '%'))) => *c,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = arithmetic(op, &left, &right)?;
        }
    }

    fn unary(&mut self) -> Result<Value, ScriptError> {
        self.nested(Self::prefixed)
    }

    fn prefixed(&mut self) -> Result<Value, ScriptError> {
        if self.eat('-') {
            let value = self.unary()?;
            return arithmetic('*', &Value::from(-1), &value);
        }
        if self.eat('+') {
            let value = self.unary()?;
            return number_value(to_number(&value)?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, ScriptError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ScriptError::Syntax("Unexpected end of input".to_string()))?;
        self.pos += 1;

        match token {
            Token::Number(n) => number_value(n),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => self.identifier(name),
            Token::Punct('(') => {
                let value = self.expression()?;
                self.expect(')')?;
                Ok(value)
            }
            Token::Punct('[') => self.array(),
            Token::Punct('{') => self.object(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn identifier(&mut self, name: String) -> Result<Value, ScriptError> {
        let value = match name.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" | "undefined" => Value::Null,
            _ => self
                .globals
                .get(&name)
                .cloned()
                .ok_or_else(|| ScriptError::NotDefined(name.clone()))?,
        };

        if self.eat('(') {
            return Err(ScriptError::Runtime(format!("{} is not a function", name)));
        }
        Ok(value)
    }

    fn array(&mut self) -> Result<Value, ScriptError> {
        let mut items = Vec::new();
        while !self.eat(']') {
            items.push(self.expression()?);
            if !self.eat(',') {
                self.expect(']')?;
                break;
            }
        }
        Ok(Value::Array(items))
    }

    fn object(&mut self) -> Result<Value, ScriptError> {
        let mut map = Map::new();
        while !self.eat('}') {
            let key = match self.tokens.get(self.pos).cloned() {
                Some(Token::Str(key)) | Some(Token::Ident(key)) => key,
                _ => return Err(self.unexpected()),
            };
            self.pos += 1;
            self.expect(':')?;
            map.insert(key, self.expression()?);
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        Ok(Value::Object(map))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: char) -> Result<(), ScriptError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ScriptError {
        match self.peek() {
            Some(Token::Punct(c)) => ScriptError::Syntax(format!("Unexpected token '{}'", c)),
            Some(Token::Ident(name)) => ScriptError::Syntax(format!("Unexpected identifier '{}'", name)),
            Some(_) => ScriptError::Syntax("Unexpected literal".to_string()),
            None => ScriptError::Syntax("Unexpected end of input".to_string()),
        }
    }
}

fn add(left: Value, right: Value) -> Result<Value, ScriptError> {
    match (&left, &right) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", display(&left), display(&right))))
        }
        _ => arithmetic('+', &left, &right),
    }
}

fn arithmetic(op: char, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let (a, b) = (to_number(left)?, to_number(right)?);
    let result = match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => a / b,
        '%' => a % b,
        _ => return Err(ScriptError::Syntax(format!("Unknown operator '{}'", op))),
    };
    number_value(result)
}

fn to_number(value: &Value) -> Result<f64, ScriptError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ScriptError::Runtime(format!("{} is not a number", n))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ScriptError::Runtime(format!("'{}' is not a number", s))),
        other => Err(ScriptError::Runtime(format!("{} is not a number", other))),
    }
}

/// Integral results become JSON integers
fn number_value(n: f64) -> Result<Value, ScriptError> {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::Runtime(format!("{} is not a finite number", n)))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(code: &str) -> Result<Value, ScriptError> {
        ExpressionHost::new().evaluate(code)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("2 + 2").unwrap(), json!(4));
        assert_eq!(eval("2 + 3 * 4").unwrap(), json!(14));
        assert_eq!(eval("(2 + 3) * 4").unwrap(), json!(20));
        assert_eq!(eval("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval("-3 + 1").unwrap(), json!(-2));
        assert_eq!(eval("10 % 4").unwrap(), json!(2));
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("'a' + \"b\"").unwrap(), json!("ab"));
        assert_eq!(eval("\"n=\" + 4").unwrap(), json!("n=4"));
        assert_eq!(eval("[1, 2, 1 + 2]").unwrap(), json!([1, 2, 3]));
        assert_eq!(eval("{\"a\": true, b: null}").unwrap(), json!({"a": true, "b": null}));
        assert_eq!(eval("").unwrap(), Value::Null);
    }

    #[test]
    fn test_statements_return_last_value() {
        assert_eq!(eval("1; 2; 3;").unwrap(), json!(3));
    }

    #[test]
    fn test_undefined_function() {
        let err = eval("undefinedFn()").unwrap_err();
        assert_eq!(err, ScriptError::NotDefined("undefinedFn".to_string()));
        assert_eq!(err.to_string(), "undefinedFn is not defined");
    }

    #[test]
    fn test_globals() {
        let mut host = ExpressionHost::new();
        host.define("count", json!(41));
        assert_eq!(host.evaluate("count + 1").unwrap(), json!(42));
        assert_eq!(
            host.evaluate("count()").unwrap_err().to_string(),
            "count is not a function"
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(eval("2 +"), Err(ScriptError::Syntax(_))));
        assert!(matches!(eval("'open"), Err(ScriptError::Syntax(_))));
        assert!(matches!(eval("1 2"), Err(ScriptError::Syntax(_))));
        assert!(matches!(eval("a = 1"), Err(ScriptError::Syntax(_))));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(
            eval(&deep).unwrap_err(),
            ScriptError::Syntax("Maximum nesting depth exceeded".to_string())
        );
        assert!(matches!(eval(&"-".repeat(10_000)), Err(ScriptError::Syntax(_))));
        assert!(matches!(eval(&"[".repeat(10_000)), Err(ScriptError::Syntax(_))));

        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(eval(&shallow).unwrap(), json!(1));
    }
}
