//! Expression parser using nom.
//!
//! Precedence, loosest first:
//!
//! ```text
//! ||  or
//! &&  and
//! ==  !=  eq  neq
//! <  <=  >  >=  lt  lte  gt  gte
//! +  -
//! *  /  %
//! !  not  -          (unary)
//! a.b  a[k]  a.m()   (postfix)
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{ExpressionError, ExpressionFailure};

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "eq", "neq", "lt", "lte", "gt", "gte", "true", "false", "null",
];

/// Parse a complete expression string.
pub fn parse_expression(source: &str) -> Result<Expr, ExpressionError> {
    let syntax = |rest: &str, message: &str| {
        ExpressionError::new(
            source,
            ExpressionFailure::Syntax {
                offset: source.len() - rest.len(),
                message: message.to_string(),
            },
        )
    };

    match terminated(or_expr, multispace0)(source) {
        Ok(("", expr)) => Ok(expr),
        Ok((rest, _)) => Err(syntax(rest, "unexpected trailing input")),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax(e.input, "expected an expression")),
        Err(nom::Err::Incomplete(_)) => Err(syntax("", "incomplete expression")),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

/// Identifier, keywords allowed (used after `.`).
fn ident_raw(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

/// Identifier that is not a reserved word.
fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, ident) = ident_raw(input)?;
    if KEYWORDS.contains(&ident) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, ident))
}

fn number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let parsed = if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
    } else {
        text.parse::<i64>().ok().map(Value::from)
    };
    match parsed {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(Error::new(input, ErrorKind::Digit))),
    }
}

/// `'…'` or `"…"` with backslash escapes.
fn string_literal(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };

    let mut out = String::new();
    let mut chars = input[1..].char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
        } else if c == quote {
            return Ok((&input[i + 2..], out));
        } else {
            out.push(c);
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn literal(input: &str) -> IResult<&str, Expr> {
    alt((
        value(Expr::Literal(Value::Null), keyword("null")),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        map(number, Expr::Literal),
        map(string_literal, |s| Expr::Literal(Value::String(s))),
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    alt((
        literal,
        delimited(
            pair(char('('), multispace0),
            or_expr,
            pair(multispace0, char(')')),
        ),
        map(identifier, |name: &str| Expr::Name(name.to_string())),
    ))(input)
}

fn member(input: &str) -> IResult<&str, &str> {
    preceded(tuple((multispace0, char('.'), multispace0)), ident_raw)(input)
}

fn call_args(input: &str) -> IResult<&str, Vec<Expr>> {
    delimited(
        pair(multispace0, char('(')),
        separated_list0(char(','), delimited(multispace0, or_expr, multispace0)),
        pair(multispace0, char(')')),
    )(input)
}

fn index_key(input: &str) -> IResult<&str, Expr> {
    delimited(
        pair(multispace0, char('[')),
        delimited(multispace0, or_expr, multispace0),
        char(']'),
    )(input)
}

fn postfix(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut expr) = primary(input)?;
    loop {
        if let Ok((rest, name)) = member(input) {
            match call_args(rest) {
                Ok((rest, args)) => {
                    expr = Expr::Call {
                        target: Box::new(expr),
                        method: name.to_string(),
                        args,
                    };
                    input = rest;
                }
                Err(nom::Err::Error(_)) => {
                    expr = Expr::Property(Box::new(expr), name.to_string());
                    input = rest;
                }
                Err(e) => return Err(e),
            }
            continue;
        }
        if let Ok((rest, key)) = index_key(input) {
            expr = Expr::Index(Box::new(expr), Box::new(key));
            input = rest;
            continue;
        }
        return Ok((input, expr));
    }
}

fn unary_op(input: &str) -> IResult<&str, UnaryOp> {
    alt((
        value(UnaryOp::Not, terminated(tag("!"), not(char('=')))),
        value(UnaryOp::Not, keyword("not")),
        value(UnaryOp::Neg, char('-')),
    ))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, op)) = unary_op(input) {
        let (rest, operand) = unary(rest)?;
        return Ok((rest, Expr::Unary(op, Box::new(operand))));
    }
    postfix(input)
}

fn fold_binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
) -> IResult<&'a str, Expr> {
    let (mut input, mut left) = operand(input)?;
    loop {
        match preceded(multispace0, operator)(input) {
            Ok((rest, op)) => {
                let (rest, right) = preceded(multispace0, operand)(rest)?;
                left = Expr::binary(left, op, right);
                input = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((input, left)),
            Err(e) => return Err(e),
        }
    }
}

fn or_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Or, tag("||")),
        value(BinaryOp::Or, keyword("or")),
    ))(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::And, tag("&&")),
        value(BinaryOp::And, keyword("and")),
    ))(input)
}

fn eq_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Eq, keyword("eq")),
        value(BinaryOp::Ne, keyword("neq")),
    ))(input)
}

fn cmp_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::Le, keyword("lte")),
        value(BinaryOp::Ge, keyword("gte")),
        value(BinaryOp::Lt, keyword("lt")),
        value(BinaryOp::Gt, keyword("gt")),
    ))(input)
}

fn add_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))(input)
}

fn mul_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Rem, char('%')),
    ))(input)
}

pub(crate) fn or_expr(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, and_expr, or_op)
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, equality, and_op)
}

fn equality(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, comparison, eq_op)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, additive, cmp_op)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, multiplicative, add_op)
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, unary, mul_op)
}
