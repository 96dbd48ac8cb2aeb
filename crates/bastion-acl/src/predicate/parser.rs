//! Recursive-descent parser from tokens to [`Expr`].
//!
//! ```text
//! expr    := or
//! or      := and ( "or" and )*
//! and     := unary ( "and" unary )*
//! unary   := "not" unary | "(" expr ")" | atom
//! atom    := "true" | "false"
//!          | NAME "(" [ arg ( "," arg )* ] ")"
//!          | operand ( "=" | "!=" ) operand
//! arg     := [ NAME "=" ] value
//! value   := operand | "{" operand ( "," operand )* "}"
//! ```

use std::collections::BTreeMap;

use bastion_types::{Method, ResourceType};
use regex::Regex;

use super::expr::{Attribute, Expr, Operand, PathTemplate};
use super::lexer::{Spanned, Token, tokenize};
use crate::error::{AclError, Result};

/// Nesting limit for parentheses and `not` chains.
const MAX_DEPTH: usize = 64;

pub(crate) fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(AclError::invalid("empty predicate"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;

    if let Some(spanned) = parser.tokens.get(parser.pos) {
        return Err(AclError::invalid(format!(
            "unexpected {:?} at offset {}",
            spanned.token, spanned.offset
        )));
    }

    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

#[derive(Debug, Clone)]
enum ArgValue {
    Single(Operand),
    Array(Vec<Operand>),
}

impl ArgValue {
    fn into_operands(self) -> Vec<Operand> {
        match self {
            ArgValue::Single(operand) => vec![operand],
            ArgValue::Array(operands) => operands,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    positional: Vec<ArgValue>,
    named: BTreeMap<String, ArgValue>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |s| s.offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        let offset = self.offset();
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(AclError::invalid(format!(
                "expected {expected:?} but found {token:?} at offset {offset}"
            ))),
            None => Err(AclError::invalid(format!(
                "expected {expected:?} but the predicate ended"
            ))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_and()?];
        while self.at_keyword("or") {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_unary()?];
        while self.at_keyword("and") {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(AclError::invalid(format!(
                "predicate nesting exceeds {MAX_DEPTH} levels"
            )));
        }

        let result = if self.at_keyword("not") {
            self.pos += 1;
            self.parse_unary().map(|inner| Expr::Not(Box::new(inner)))
        } else if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or();
            inner.and_then(|expr| self.expect(&Token::RParen).map(|()| expr))
        } else {
            self.parse_atom()
        };

        self.depth -= 1;
        result
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.peek().cloned() {
            Some(Token::Word(word)) if self.peek_at(1) == Some(&Token::LParen) => {
                self.pos += 2;
                let args = self.parse_args()?;
                build_function(&word, args)
            }
            Some(Token::Word(word))
                if matches!(self.peek_at(1), Some(Token::Eq | Token::NotEq)) =>
            {
                self.pos += 1;
                let attribute = Attribute::from_name(&word).ok_or_else(|| {
                    AclError::invalid(format!("unknown attribute '{word}' at offset {offset}"))
                })?;
                self.parse_comparison(Operand::Attribute(attribute))
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("true") => {
                self.pos += 1;
                Ok(Expr::Const(true))
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("false") => {
                self.pos += 1;
                Ok(Expr::Const(false))
            }
            Some(Token::Attr(_) | Token::Str(_)) => {
                let left = self.parse_operand()?;
                self.parse_comparison(left)
            }
            Some(token) => Err(AclError::invalid(format!(
                "unexpected {token:?} at offset {offset}"
            ))),
            None => Err(AclError::invalid("unexpected end of predicate")),
        }
    }

    fn parse_comparison(&mut self, left: Operand) -> Result<Expr> {
        let offset = self.offset();
        let negate = match self.next() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => {
                return Err(AclError::invalid(format!(
                    "expected '=' or '!=' at offset {offset}"
                )));
            }
        };
        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            left,
            right,
            negate,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Str(value) | Token::Word(value)) => Ok(Operand::Literal(value)),
            Some(Token::Attr(reference)) => Attribute::from_reference(&reference)
                .map(Operand::Attribute)
                .ok_or_else(|| {
                    AclError::invalid(format!(
                        "unknown attribute '%{reference}' at offset {offset}"
                    ))
                }),
            Some(token) => Err(AclError::invalid(format!(
                "expected a value but found {token:?} at offset {offset}"
            ))),
            None => Err(AclError::invalid("expected a value but the predicate ended")),
        }
    }

    fn parse_value(&mut self) -> Result<ArgValue> {
        if self.peek() != Some(&Token::LBrace) {
            return self.parse_operand().map(ArgValue::Single);
        }

        self.pos += 1;
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RBrace) {
            self.pos += 1;
            return Ok(ArgValue::Array(items));
        }
        loop {
            items.push(self.parse_operand()?);
            let offset = self.offset();
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => break,
                _ => {
                    return Err(AclError::invalid(format!(
                        "expected ',' or '}}' at offset {offset}"
                    )));
                }
            }
        }
        Ok(ArgValue::Array(items))
    }

    fn parse_args(&mut self) -> Result<Args> {
        let mut args = Args::default();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }

        loop {
            let offset = self.offset();
            if let (Some(Token::Word(name)), Some(Token::Eq)) = (self.peek(), self.peek_at(1)) {
                let name = name.clone();
                self.pos += 2;
                let value = self.parse_value()?;
                if args.named.insert(name.clone(), value).is_some() {
                    return Err(AclError::invalid(format!(
                        "argument '{name}' given twice at offset {offset}"
                    )));
                }
            } else {
                if !args.named.is_empty() {
                    return Err(AclError::invalid(format!(
                        "positional argument after named argument at offset {offset}"
                    )));
                }
                args.positional.push(self.parse_value()?);
            }

            let offset = self.offset();
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => {
                    return Err(AclError::invalid(format!(
                        "expected ',' or ')' at offset {offset}"
                    )));
                }
            }
        }

        Ok(args)
    }
}

// ============================================================================
// Function binding
// ============================================================================

/// Collects every positional argument plus the named argument `keys`,
/// flattening arrays. Used by functions taking a single list of values.
fn list_arg(function: &str, args: Args, keys: &[&str]) -> Result<Vec<Operand>> {
    let mut operands: Vec<Operand> = args
        .positional
        .into_iter()
        .flat_map(ArgValue::into_operands)
        .collect();

    for (name, value) in args.named {
        if !keys.contains(&name.as_str()) {
            return Err(AclError::invalid(format!(
                "{function}() has no argument named '{name}'"
            )));
        }
        operands.extend(value.into_operands());
    }

    if operands.is_empty() {
        return Err(AclError::invalid(format!(
            "{function}() requires at least one value"
        )));
    }
    Ok(operands)
}

/// Binds positional and named arguments to parameter names.
fn bind(function: &str, args: Args, params: &[&str]) -> Result<BTreeMap<String, ArgValue>> {
    if args.positional.len() > params.len() {
        return Err(AclError::invalid(format!(
            "{function}() takes at most {} arguments",
            params.len()
        )));
    }

    let mut bound: BTreeMap<String, ArgValue> = params
        .iter()
        .zip(args.positional)
        .map(|(name, value)| ((*name).to_string(), value))
        .collect();

    for (name, value) in args.named {
        if !params.contains(&name.as_str()) {
            return Err(AclError::invalid(format!(
                "{function}() has no argument named '{name}'"
            )));
        }
        if bound.insert(name.clone(), value).is_some() {
            return Err(AclError::invalid(format!(
                "{function}() argument '{name}' given twice"
            )));
        }
    }

    Ok(bound)
}

fn literal(function: &str, operand: Operand) -> Result<String> {
    match operand {
        Operand::Literal(value) => Ok(value),
        Operand::Attribute(attribute) => Err(AclError::invalid(format!(
            "{function}() expects a literal, found attribute {attribute:?}"
        ))),
    }
}

fn literals(function: &str, operands: Vec<Operand>) -> Result<Vec<String>> {
    operands.into_iter().map(|o| literal(function, o)).collect()
}

fn single(function: &str, name: &str, value: Option<ArgValue>) -> Result<Operand> {
    match value {
        Some(ArgValue::Single(operand)) => Ok(operand),
        Some(ArgValue::Array(_)) => Err(AclError::invalid(format!(
            "{function}() argument '{name}' must be a single value"
        ))),
        None => Err(AclError::invalid(format!(
            "{function}() requires argument '{name}'"
        ))),
    }
}

fn build_function(name: &str, args: Args) -> Result<Expr> {
    match name {
        "method" => {
            let methods = literals(name, list_arg(name, args, &["value"])?)?
                .into_iter()
                .map(|m| {
                    let method: Method = m.parse().unwrap_or(Method::Other);
                    if method == Method::Other && !m.eq_ignore_ascii_case("OTHER") {
                        Err(AclError::invalid(format!("method() unknown verb '{m}'")))
                    } else {
                        Ok(method)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Method(methods))
        }
        "path" => Ok(Expr::Path(literals(
            name,
            list_arg(name, args, &["path", "value"])?,
        )?)),
        "path-prefix" => Ok(Expr::PathPrefix(literals(
            name,
            list_arg(name, args, &["path", "value"])?,
        )?)),
        "path-suffix" => Ok(Expr::PathSuffix(literals(
            name,
            list_arg(name, args, &["path", "value"])?,
        )?)),
        "path-template" => {
            let templates = literals(name, list_arg(name, args, &["value", "template"])?)?
                .iter()
                .map(|t| PathTemplate::parse(t).map_err(AclError::invalid))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::PathTemplate(templates))
        }
        "regex" => {
            let mut bound = bind(name, args, &["pattern", "value", "full-match"])?;
            let pattern = literal(name, single(name, "pattern", bound.remove("pattern"))?)?;
            let value = match bound.remove("value") {
                None => Operand::Attribute(Attribute::Path),
                some => single(name, "value", some)?,
            };
            let full_match = match bound.remove("full-match") {
                None => false,
                some => {
                    let flag = literal(name, single(name, "full-match", some)?)?;
                    flag.parse::<bool>().map_err(|_| {
                        AclError::invalid("regex() full-match must be true or false")
                    })?
                }
            };
            // Anchoring the whole alternation makes the engine look for a
            // complete match instead of stopping at the leftmost one.
            let source = if full_match {
                format!("^(?:{pattern})$")
            } else {
                pattern.clone()
            };
            let pattern = Regex::new(&source).map_err(|e| {
                AclError::invalid(format!("regex() invalid pattern '{pattern}': {e}"))
            })?;
            Ok(Expr::Regex { pattern, value })
        }
        "equals" => {
            let operands = list_arg(name, args, &["value"])?;
            if operands.len() < 2 {
                return Err(AclError::invalid("equals() requires at least two values"));
            }
            Ok(Expr::Equals(operands))
        }
        "contains" => {
            let mut bound = bind(name, args, &["value", "search"])?;
            let value = single(name, "value", bound.remove("value"))?;
            let search = bound
                .remove("search")
                .map(ArgValue::into_operands)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AclError::invalid("contains() requires argument 'search'"))?;
            Ok(Expr::Contains { value, search })
        }
        "exists" => Ok(Expr::Exists(list_arg(name, args, &["value"])?)),
        "authenticated" => {
            if !args.positional.is_empty() || !args.named.is_empty() {
                return Err(AclError::invalid("authenticated() takes no arguments"));
            }
            Ok(Expr::Authenticated)
        }
        "in" => {
            let mut bound = bind(name, args, &["value", "array"])?;
            let value = single(name, "value", bound.remove("value"))?;
            let array = bound
                .remove("array")
                .map(ArgValue::into_operands)
                .ok_or_else(|| AclError::invalid("in() requires argument 'array'"))?;
            Ok(Expr::In { value, array })
        }
        "roles" => Ok(Expr::Roles(literals(
            name,
            list_arg(name, args, &["value"])?,
        )?)),
        "qparams-contain" => Ok(Expr::QueryParamsContain(literals(
            name,
            list_arg(name, args, &["value"])?,
        )?)),
        "qparams-blacklist" => Ok(Expr::QueryParamsBlacklist(literals(
            name,
            list_arg(name, args, &["value"])?,
        )?)),
        "qparams-size" => {
            let mut bound = bind(name, args, &["max"])?;
            let max = literal(name, single(name, "max", bound.remove("max"))?)?;
            let max = max.parse::<usize>().map_err(|_| {
                AclError::invalid(format!("qparams-size() max must be a number, got '{max}'"))
            })?;
            Ok(Expr::QueryParamsSize(max))
        }
        "header" => {
            let mut bound = bind(name, args, &["name", "value"])?;
            let header = literal(name, single(name, "name", bound.remove("name"))?)?;
            let value = match bound.remove("value") {
                None => None,
                some => Some(single(name, "value", some)?),
            };
            Ok(Expr::Header {
                name: header,
                value,
            })
        }
        "resource-type" => {
            let types = literals(name, list_arg(name, args, &["value"])?)?;
            for t in &types {
                if t.parse::<ResourceType>().is_err() {
                    return Err(AclError::invalid(format!(
                        "resource-type() unknown type '{t}'"
                    )));
                }
            }
            Ok(Expr::ResourceType(types))
        }
        "handled-by" => Ok(Expr::HandledBy(literals(
            name,
            list_arg(name, args, &["value"])?,
        )?)),
        unknown => Err(AclError::invalid(format!(
            "unknown predicate function '{unknown}'"
        ))),
    }
}
