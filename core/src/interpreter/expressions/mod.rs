//! Expression and template evaluator
//!
//! The interpreter only talks to the [`Evaluator`] trait: `expand` for
//! instruction text, `eval_boolean` for conditions and `eval_any` for
//! assignments. [`ExprEvaluator`] is the default implementation, a small
//! PEST-based expression language over JSON values.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

use super::errors::EvalError;
use super::values::{self, is_truthy, number, to_number, to_text};

mod template;

pub use template::expand_placeholders;

/* ===================== Collaborator Interface ===================== */

/// Variable source an expression is evaluated against.
pub trait VarLookup {
    fn lookup(&self, name: &str) -> Option<JsonValue>;
}

impl VarLookup for HashMap<String, JsonValue> {
    fn lookup(&self, name: &str) -> Option<JsonValue> {
        self.get(name).cloned()
    }
}

impl VarLookup for Map<String, JsonValue> {
    fn lookup(&self, name: &str) -> Option<JsonValue> {
        self.get(name).cloned()
    }
}

/// The expression/template evaluator used to expand instruction text.
pub trait Evaluator: Send + Sync {
    /// Replace every `{{ expr }}` placeholder in `text`.
    fn expand(&self, text: &str, vars: &dyn VarLookup) -> Result<String, EvalError>;

    /// Evaluate `expr` and reduce it to a boolean.
    fn eval_boolean(&self, expr: &str, vars: &dyn VarLookup) -> Result<bool, EvalError>;

    /// Evaluate `expr` to a value.
    fn eval_any(&self, expr: &str, vars: &dyn VarLookup) -> Result<JsonValue, EvalError>;
}

/// Default evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn expand(&self, text: &str, vars: &dyn VarLookup) -> Result<String, EvalError> {
        expand_placeholders(text, |expr| self.eval_any(expr, vars))
    }

    fn eval_boolean(&self, expr: &str, vars: &dyn VarLookup) -> Result<bool, EvalError> {
        Ok(is_truthy(&self.eval_any(expr, vars)?))
    }

    fn eval_any(&self, expr: &str, vars: &dyn VarLookup) -> Result<JsonValue, EvalError> {
        let ast = parse_expression(expr)?;
        eval(&ast, vars)
    }
}

/* ===================== AST ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(JsonValue),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "interpreter/expressions/expr.pest"]
struct ExprParser;

/// Parse an expression string into an AST.
pub fn parse_expression(source: &str) -> Result<Expr, EvalError> {
    let mut pairs = ExprParser::parse(Rule::expression, source)
        .map_err(|e| EvalError::Syntax(e.to_string()))?;
    let expression = next_pair(&mut pairs, "expression")?;
    let mut inner = expression.into_inner();
    build(next_pair(&mut inner, "expression body")?)
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, EvalError> {
    pairs
        .next()
        .ok_or_else(|| EvalError::Syntax(format!("missing {}", what)))
}

fn build(pair: Pair<Rule>) -> Result<Expr, EvalError> {
    match pair.as_rule() {
        Rule::ternary_expr => {
            let mut inner = pair.into_inner();
            let condition = build(next_pair(&mut inner, "condition")?)?;
            match inner.next() {
                Some(consequent) => {
                    let consequent = build(consequent)?;
                    let alternate = build(next_pair(&mut inner, "alternate")?)?;
                    Ok(Expr::Ternary(
                        Box::new(condition),
                        Box::new(consequent),
                        Box::new(alternate),
                    ))
                }
                None => Ok(condition),
            }
        }
        Rule::logical_or_expr
        | Rule::logical_and_expr
        | Rule::equality_expr
        | Rule::comparison_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => build_binary(pair),
        Rule::unary_expr => {
            let mut ops = Vec::new();
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::op_not => ops.push(UnaryOp::Not),
                    Rule::op_neg => ops.push(UnaryOp::Neg),
                    _ => operand = Some(build(p)?),
                }
            }
            let mut expr = operand.ok_or_else(|| EvalError::Syntax("missing operand".into()))?;
            for op in ops.into_iter().rev() {
                expr = Expr::Unary(op, Box::new(expr));
            }
            Ok(expr)
        }
        Rule::postfix_expr => {
            let mut inner = pair.into_inner();
            let mut expr = build(next_pair(&mut inner, "operand")?)?;
            for suffix in inner {
                expr = match suffix.as_rule() {
                    Rule::member_access => {
                        let name = next_pair(&mut suffix.into_inner(), "member name")?;
                        Expr::Member(Box::new(expr), name.as_str().to_string())
                    }
                    _ => {
                        let index = next_pair(&mut suffix.into_inner(), "index")?;
                        Expr::Index(Box::new(expr), Box::new(build(index)?))
                    }
                };
            }
            Ok(expr)
        }
        Rule::array_literal => Ok(Expr::Array(
            pair.into_inner().map(build).collect::<Result<_, _>>()?,
        )),
        Rule::object_literal => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut inner = entry.into_inner();
                let key = next_pair(&mut inner, "object key")?;
                let key = match key.as_rule() {
                    Rule::string => string_literal(key)?,
                    _ => key.as_str().to_string(),
                };
                entries.push((key, build(next_pair(&mut inner, "object value")?)?));
            }
            Ok(Expr::Object(entries))
        }
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(|f| Expr::Lit(number(f)))
            .map_err(|e| EvalError::Syntax(e.to_string())),
        Rule::string => Ok(Expr::Lit(JsonValue::String(string_literal(pair)?))),
        Rule::kw_true => Ok(Expr::Lit(JsonValue::Bool(true))),
        Rule::kw_false => Ok(Expr::Lit(JsonValue::Bool(false))),
        Rule::kw_null => Ok(Expr::Lit(JsonValue::Null)),
        Rule::identifier => Ok(Expr::Ident(pair.as_str().to_string())),
        other => Err(EvalError::Syntax(format!("unexpected rule {:?}", other))),
    }
}

fn build_binary(pair: Pair<Rule>) -> Result<Expr, EvalError> {
    let mut inner = pair.into_inner();
    let mut left = build(next_pair(&mut inner, "left operand")?)?;
    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_rule() {
            Rule::op_or => BinaryOp::Or,
            Rule::op_and => BinaryOp::And,
            Rule::op_eq => BinaryOp::Eq,
            Rule::op_ne => BinaryOp::Ne,
            Rule::op_strict_eq => BinaryOp::StrictEq,
            Rule::op_strict_ne => BinaryOp::StrictNe,
            Rule::op_lt => BinaryOp::Lt,
            Rule::op_lte => BinaryOp::Lte,
            Rule::op_gt => BinaryOp::Gt,
            Rule::op_gte => BinaryOp::Gte,
            Rule::op_add => BinaryOp::Add,
            Rule::op_sub => BinaryOp::Sub,
            Rule::op_mul => BinaryOp::Mul,
            Rule::op_div => BinaryOp::Div,
            Rule::op_mod => BinaryOp::Mod,
            other => return Err(EvalError::Syntax(format!("expected operator, got {:?}", other))),
        };
        let right = build(next_pair(&mut inner, "right operand")?)?;
        left = Expr::Binary(op, Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn string_literal(pair: Pair<Rule>) -> Result<String, EvalError> {
    let raw = next_pair(&mut pair.into_inner(), "string body")?.as_str();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}

/* ===================== Evaluation ===================== */

/// Evaluate an AST against a variable source.
pub fn eval(expr: &Expr, vars: &dyn VarLookup) -> Result<JsonValue, EvalError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(name) => Ok(vars.lookup(name).unwrap_or(JsonValue::Null)),
        Expr::Member(object, property) => Ok(member(&eval(object, vars)?, property)),
        Expr::Index(object, index) => {
            let object = eval(object, vars)?;
            let index = eval(index, vars)?;
            Ok(member(&object, &to_text(&index)))
        }
        Expr::Array(items) => Ok(JsonValue::Array(
            items.iter().map(|e| eval(e, vars)).collect::<Result<_, _>>()?,
        )),
        Expr::Object(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), eval(value, vars)?);
            }
            Ok(JsonValue::Object(map))
        }
        Expr::Unary(UnaryOp::Not, operand) => Ok(JsonValue::Bool(!is_truthy(&eval(operand, vars)?))),
        Expr::Unary(UnaryOp::Neg, operand) => {
            let v = eval(operand, vars)?;
            to_number(&v)
                .map(|n| number(-n))
                .ok_or_else(|| EvalError::Type(format!("cannot negate {}", v)))
        }
        Expr::Ternary(condition, consequent, alternate) => {
            if is_truthy(&eval(condition, vars)?) {
                eval(consequent, vars)
            } else {
                eval(alternate, vars)
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let l = eval(left, vars)?;
            if is_truthy(&l) {
                eval(right, vars)
            } else {
                Ok(l)
            }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let l = eval(left, vars)?;
            if is_truthy(&l) {
                Ok(l)
            } else {
                eval(right, vars)
            }
        }
        Expr::Binary(op, left, right) => binary(*op, &eval(left, vars)?, &eval(right, vars)?),
    }
}

fn member(object: &JsonValue, property: &str) -> JsonValue {
    match (object, property) {
        (JsonValue::Array(items), "length") => number(items.len() as f64),
        (JsonValue::String(s), "length") => number(s.chars().count() as f64),
        _ => values::read_path(object, property).unwrap_or(JsonValue::Null),
    }
}

fn numeric_pair(l: &JsonValue, r: &JsonValue) -> Option<(f64, f64)> {
    if l.is_array() || l.is_object() || r.is_array() || r.is_object() {
        return None;
    }
    Some((to_number(l)?, to_number(r)?))
}

fn loose_eq(l: &JsonValue, r: &JsonValue) -> bool {
    match (l, r) {
        (JsonValue::Null, JsonValue::Null) => true,
        (JsonValue::Null, _) | (_, JsonValue::Null) => false,
        (JsonValue::String(a), JsonValue::String(b)) => a == b,
        _ => match numeric_pair(l, r) {
            Some((a, b)) => a == b,
            None => l == r,
        },
    }
}

fn strict_eq(l: &JsonValue, r: &JsonValue) -> bool {
    match (l, r) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn binary(op: BinaryOp, l: &JsonValue, r: &JsonValue) -> Result<JsonValue, EvalError> {
    let arithmetic = |f: fn(f64, f64) -> f64| -> Result<JsonValue, EvalError> {
        numeric_pair(l, r)
            .map(|(a, b)| number(f(a, b)))
            .ok_or_else(|| EvalError::Type(format!("{} and {} are not numbers", l, r)))
    };

    match op {
        BinaryOp::Add => Ok(match numeric_pair(l, r) {
            Some((a, b)) => number(a + b),
            None => JsonValue::String(format!("{}{}", to_text(l), to_text(r))),
        }),
        BinaryOp::Sub => arithmetic(|a, b| a - b),
        BinaryOp::Mul => arithmetic(|a, b| a * b),
        BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = numeric_pair(l, r)
                .ok_or_else(|| EvalError::Type(format!("{} and {} are not numbers", l, r)))?;
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(number(if op == BinaryOp::Div { a / b } else { a % b }))
        }
        BinaryOp::Eq => Ok(JsonValue::Bool(loose_eq(l, r))),
        BinaryOp::Ne => Ok(JsonValue::Bool(!loose_eq(l, r))),
        BinaryOp::StrictEq => Ok(JsonValue::Bool(strict_eq(l, r))),
        BinaryOp::StrictNe => Ok(JsonValue::Bool(!strict_eq(l, r))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = match numeric_pair(l, r) {
                Some((a, b)) => a.partial_cmp(&b),
                None => Some(to_text(l).cmp(&to_text(r))),
            };
            let Some(ordering) = ordering else {
                return Ok(JsonValue::Bool(false));
            };
            Ok(JsonValue::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Lte => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => Err(EvalError::Type("logical operators short-circuit".into())),
    }
}
