//! The matcher compiler and evaluator (spec.md §3.4, §4.5).
//!
//! A matcher expression (`m`, `m2`, ...) is compiled once into an [`Expr`]
//! tree and then evaluated once per candidate policy rule. Compilation
//! failures are fatal ([`MatcherError::Parse`]); evaluation failures
//! against one rule are not — the caller treats that rule as not matched
//! and carries on (spec.md §4.5's per-rule containment, see
//! [`crate::enforcer`]).
//!
//! Precedence, low to high: `?:` then `||` then `&&` then `==`/`!=`/`in`
//! (one tier, left-associative) then `<`/`<=`/`>`/`>=` then `+`/`-` then
//! `*`/`/`/`%` then unary `!`/`-` then calls/literals/parens.

use std::collections::HashMap;

use crate::error::MatcherError;
use crate::function::FunctionMap;
use crate::rbac::RoleManager;
use crate::value::Value;

/// A parsed matcher expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A dotted reference like `r.sub` or `p.act`.
    Var(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A compiled matcher: the raw source text plus its parsed expression tree.
#[derive(Debug, Clone)]
pub struct Matcher {
    raw: String,
    ast: Expr,
}

impl Matcher {
    /// Parse matcher source text.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::Parse`] on any syntax error.
    pub fn compile(raw: &str) -> Result<Self, MatcherError> {
        let tokens = lex(raw)?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let ast = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(MatcherError::Parse {
                reason: format!("unexpected trailing input at token {}", parser.pos),
            });
        }
        Ok(Self { raw: raw.to_owned(), ast })
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn ast(&self) -> &Expr {
        &self.ast
    }
}

/// Everything evaluation needs besides the AST itself.
pub struct EvalContext<'a> {
    /// `r.sub`, `p.obj`, ... bindings for the current request/rule pair.
    pub bindings: &'a HashMap<String, Value>,
    pub functions: &'a FunctionMap,
    /// Grouping ptype (`"g"`, `"g2"`, ...) to its role manager, so `g(...)`
    /// calls in a matcher bridge to [`RoleManager::has_link_with_functions`].
    pub role_managers: &'a HashMap<String, &'a RoleManager>,
}

/// Evaluate `expr` against `ctx`.
///
/// # Errors
///
/// Returns [`MatcherError`] for an unbound variable, an unknown function, a
/// type mismatch, or a role-hierarchy depth overflow while resolving a
/// `g(...)` call.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, MatcherError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => resolve_var(name, ctx.bindings),
        Expr::List(items) => {
            let values = items.iter().map(|e| evaluate(e, ctx)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(values))
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!evaluate(inner, ctx)?.as_bool().map_err(|reason| {
            MatcherError::TypeError { reason }
        })?)),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let v = evaluate(inner, ctx)?;
            match v {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(MatcherError::TypeError {
                    reason: format!("cannot negate {other:?}"),
                }),
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !evaluate(lhs, ctx)?.as_bool().map_err(|reason| MatcherError::TypeError { reason })? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(
                evaluate(rhs, ctx)?.as_bool().map_err(|reason| MatcherError::TypeError { reason })?,
            ))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if evaluate(lhs, ctx)?.as_bool().map_err(|reason| MatcherError::TypeError { reason })? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(
                evaluate(rhs, ctx)?.as_bool().map_err(|reason| MatcherError::TypeError { reason })?,
            ))
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, evaluate(lhs, ctx)?, evaluate(rhs, ctx)?),
        Expr::In(needle, haystack) => {
            let needle = evaluate(needle, ctx)?;
            let Value::List(items) = evaluate(haystack, ctx)? else {
                return Err(MatcherError::TypeError {
                    reason: "right-hand side of 'in' must be a list".to_owned(),
                });
            };
            Ok(Value::Bool(items.iter().any(|v| v.value_eq(&needle))))
        }
        Expr::Ternary(cond, then_branch, else_branch) => {
            if evaluate(cond, ctx)?.as_bool().map_err(|reason| MatcherError::TypeError { reason })? {
                evaluate(then_branch, ctx)
            } else {
                evaluate(else_branch, ctx)
            }
        }
        Expr::Call(name, arg_exprs) => eval_call(name, arg_exprs, ctx),
    }
}

/// Resolve a dotted variable reference against the bindings.
///
/// Most lookups are an exact hit (`"r.sub"` bound directly). When
/// `accept_json_request` is enabled a request field can be a JSON object,
/// in which case `"r.obj.nested.field"` resolves by finding the longest
/// bound prefix (`"r.obj"`) and walking the remaining path (`nested.field`)
/// through that object (spec.md §4.5's object indexing note).
fn resolve_var(name: &str, bindings: &HashMap<String, Value>) -> Result<Value, MatcherError> {
    if let Some(v) = bindings.get(name) {
        return Ok(v.clone());
    }
    let segments: Vec<&str> = name.split('.').collect();
    for split_at in (1..segments.len()).rev() {
        let prefix = segments[..split_at].join(".");
        if let Some(Value::Json(json)) = bindings.get(&prefix) {
            let mut cursor = json;
            for seg in &segments[split_at..] {
                match cursor.get(seg) {
                    Some(next) => cursor = next,
                    None => return Err(MatcherError::UnknownIdentifier { name: name.to_owned() }),
                }
            }
            return Ok(json_to_value(cursor));
        }
    }
    Err(MatcherError::UnknownIdentifier { name: name.to_owned() })
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        other => Value::Json(other.clone()),
    }
}

fn eval_binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, MatcherError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(lhs.value_eq(&rhs))),
        BinOp::Ne => Ok(Value::Bool(!lhs.value_eq(&rhs))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = lhs.partial_cmp_value(&rhs).ok_or_else(|| MatcherError::TypeError {
                reason: format!("{lhs:?} and {rhs:?} are not ordered"),
            })?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
                if op == BinOp::Add {
                    return Ok(Value::Str(format!("{a}{b}")));
                }
            }
            let (a, b) = (
                lhs.as_f64().ok_or_else(|| MatcherError::TypeError {
                    reason: format!("{lhs:?} is not numeric"),
                })?,
                rhs.as_f64().ok_or_else(|| MatcherError::TypeError {
                    reason: format!("{rhs:?} is not numeric"),
                })?,
            );
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(MatcherError::TypeError {
                            reason: "division by zero".to_owned(),
                        });
                    }
                    a / b
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return Err(MatcherError::TypeError {
                            reason: "modulo by zero".to_owned(),
                        });
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            if matches!(lhs, Value::Int(_)) && matches!(rhs, Value::Int(_)) && op != BinOp::Div {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        BinOp::And | BinOp::Or => unreachable!("short-circuited in evaluate()"),
    }
}

fn eval_call(name: &str, arg_exprs: &[Expr], ctx: &EvalContext<'_>) -> Result<Value, MatcherError> {
    let args = arg_exprs.iter().map(|e| evaluate(e, ctx)).collect::<Result<Vec<_>, _>>()?;

    if let Some(role_manager) = ctx.role_managers.get(name) {
        let name1 = args.first().map(Value::as_str_lossy).unwrap_or_default();
        let name2 = args.get(1).map(Value::as_str_lossy).unwrap_or_default();
        let domain = args.get(2).map(Value::as_str_lossy).unwrap_or_default();
        let linked = role_manager
            .has_link_with_functions(&name1, &name2, &domain, Some(ctx.functions))
            .map_err(|e| MatcherError::Evaluation {
                rule_index: 0,
                reason: e.to_string(),
            })?;
        return Ok(Value::Bool(linked));
    }

    let f = ctx.functions.get(name).ok_or_else(|| MatcherError::UnknownFunction { name: name.to_owned() })?;
    Ok(f(&args))
}

// --- Lexer -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    In,
    Symbol(&'static str),
}

fn lex(src: &str) -> Result<Vec<Token>, MatcherError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(MatcherError::Parse {
                        reason: "unterminated string literal".to_owned(),
                    });
                };
                if ch == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        s.push(next);
                        i += 2;
                        continue;
                    }
                }
                if ch == quote {
                    i += 1;
                    break;
                }
                s.push(ch);
                i += 1;
            }
            tokens.push(Token::Str(s));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !is_float)) {
                if chars[i] == '.' {
                    is_float = true;
                }
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if is_float {
                let value = text.parse::<f64>().map_err(|e| MatcherError::Parse { reason: e.to_string() })?;
                tokens.push(Token::Float(value));
            } else {
                let value = text.parse::<i64>().map_err(|e| MatcherError::Parse { reason: e.to_string() })?;
                tokens.push(Token::Int(value));
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric()
                    || chars[i] == '_'
                    || (chars[i] == '.' && chars.get(i + 1).is_some_and(|n| n.is_alphabetic() || *n == '_')))
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            match text.as_str() {
                "true" => tokens.push(Token::Bool(true)),
                "false" => tokens.push(Token::Bool(false)),
                "in" => tokens.push(Token::In),
                _ => tokens.push(Token::Ident(text)),
            }
            continue;
        }

        macro_rules! two_char {
            ($a:expr, $b:expr, $sym:expr) => {
                if chars.get(i + 1) == Some(&$b) {
                    tokens.push(Token::Symbol($sym));
                    i += 2;
                    continue;
                }
            };
        }
        match c {
            '&' => two_char!('&', '&', "&&"),
            '|' => two_char!('|', '|', "||"),
            '=' => two_char!('=', '=', "=="),
            '!' => two_char!('!', '=', "!="),
            '<' => two_char!('<', '=', "<="),
            '>' => two_char!('>', '=', ">="),
            _ => {}
        }
        let symbol = match c {
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            ',' => ",",
            '?' => "?",
            ':' => ":",
            '!' => "!",
            '<' => "<",
            '>' => ">",
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            '%' => "%",
            other => {
                return Err(MatcherError::Parse {
                    reason: format!("unexpected character '{other}'"),
                });
            }
        };
        tokens.push(Token::Symbol(symbol));
        i += 1;
    }
    Ok(tokens)
}

// --- Parser (precedence climbing) ------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if self.peek() == Some(&Token::Symbol(intern(sym))) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<(), MatcherError> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(MatcherError::Parse {
                reason: format!("expected '{sym}' at token {}", self.pos),
            })
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, MatcherError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, MatcherError> {
        let cond = self.parse_or()?;
        if self.eat_symbol("?") {
            let then_branch = self.parse_expr()?;
            self.expect_symbol(":")?;
            let else_branch = self.parse_expr()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(then_branch), Box::new(else_branch)));
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_and()?;
        while self.eat_symbol("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_equality()?;
        while self.eat_symbol("&&") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// `==`, `!=`, and `in` share one left-associative precedence tier.
    fn parse_equality(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_relational()?;
        loop {
            if self.eat_symbol("==") {
                let rhs = self.parse_relational()?;
                lhs = Expr::Binary(BinOp::Eq, Box::new(lhs), Box::new(rhs));
            } else if self.eat_symbol("!=") {
                let rhs = self.parse_relational()?;
                lhs = Expr::Binary(BinOp::Ne, Box::new(lhs), Box::new(rhs));
            } else if self.peek() == Some(&Token::In) {
                self.pos += 1;
                let rhs = self.parse_relational()?;
                lhs = Expr::In(Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_symbol("<=") {
                BinOp::Le
            } else if self.eat_symbol(">=") {
                BinOp::Ge
            } else if self.eat_symbol("<") {
                BinOp::Lt
            } else if self.eat_symbol(">") {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinOp::Add
            } else if self.eat_symbol("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinOp::Mul
            } else if self.eat_symbol("/") {
                BinOp::Div
            } else if self.eat_symbol("%") {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, MatcherError> {
        if self.eat_symbol("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_symbol("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, MatcherError> {
        match self.advance().cloned() {
            Some(Token::Bool(b)) => Ok(Expr::Bool(b)),
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Symbol("(")) => {
                let inner = self.parse_expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Some(Token::Symbol("[")) => {
                let mut items = Vec::new();
                if !self.eat_symbol("]") {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat_symbol(",") {
                            continue;
                        }
                        self.expect_symbol("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                if self.eat_symbol("(") {
                    let mut args = Vec::new();
                    if !self.eat_symbol(")") {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat_symbol(",") {
                                continue;
                            }
                            self.expect_symbol(")")?;
                            break;
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(MatcherError::Parse {
                reason: format!("unexpected token {other:?} at position {}", self.pos.saturating_sub(1)),
            }),
        }
    }
}

/// Symbols are matched by value, not identity; this just documents intent
/// at call sites (`eat_symbol("&&")` reads as "the `&&` token").
fn intern(s: &str) -> &'static str {
    match s {
        "&&" => "&&",
        "||" => "||",
        "==" => "==",
        "!=" => "!=",
        "<=" => "<=",
        ">=" => ">=",
        "(" => "(",
        ")" => ")",
        "[" => "[",
        "]" => "]",
        "," => ",",
        "?" => "?",
        ":" => ":",
        "!" => "!",
        "<" => "<",
        ">" => ">",
        "+" => "+",
        "-" => "-",
        "*" => "*",
        "/" => "/",
        "%" => "%",
        _ => "",
    }
}
