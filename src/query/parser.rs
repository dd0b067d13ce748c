use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use crate::common::types::{LabelMatcher, MatchOp, Matchers};
use crate::query::ast::{BinaryOp, Expr, VectorSelector};
use crate::query::QueryError;

/// Parses a complete rule expression, e.g.
/// `node_cpu_usage{mode!="idle"} / node_cpu_capacity > 0.8`.
pub fn parse_expr(input: &str) -> Result<Expr, QueryError> {
    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(err) => Err(QueryError::Parse(format!("{:?}: {}", input, err))),
    }
}

/// Parses a bare series selector, the query surface for range reads.
pub fn parse_selector(input: &str) -> Result<VectorSelector, QueryError> {
    match all_consuming(delimited(multispace0, selector, multispace0))(input) {
        Ok((_, sel)) => Ok(sel),
        Err(err) => Err(QueryError::Parse(format!("{:?}: {}", input, err))),
    }
}

// expr := arith (cmp_op arith)?
fn expr(input: &str) -> IResult<&str, Expr> {
    let (rest, lhs) = arith(input)?;
    let (rest, tail) = opt(pair(ws(cmp_op), arith))(rest)?;
    Ok((rest, fold_binary(lhs, tail.into_iter().collect())))
}

// arith := term (('+'|'-') term)*
fn arith(input: &str) -> IResult<&str, Expr> {
    let (rest, lhs) = term(input)?;
    let (rest, tail) = many0(pair(ws(add_op), term))(rest)?;
    Ok((rest, fold_binary(lhs, tail)))
}

// term := factor (('*'|'/') factor)*
fn term(input: &str) -> IResult<&str, Expr> {
    let (rest, lhs) = factor(input)?;
    let (rest, tail) = many0(pair(ws(mul_op), factor))(rest)?;
    Ok((rest, fold_binary(lhs, tail)))
}

fn fold_binary(lhs: Expr, tail: Vec<(BinaryOp, Expr)>) -> Expr {
    tail.into_iter().fold(lhs, |lhs, (op, rhs)| Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

// A selector is tried before a number literal so that metric names with
// prefixes like "inf" or "nan" are not eaten by the float parser.
fn factor(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            delimited(ws(tag("(")), expr, ws(tag(")"))),
            map(selector, Expr::Selector),
            map(nom::number::complete::double, Expr::Number),
        )),
    )(input)
}

// selector := metric_identifier label_matchers? | label_matchers
fn selector(input: &str) -> IResult<&str, VectorSelector> {
    alt((
        map(
            pair(metric_identifier, opt(label_matchers)),
            |(metric, matchers)| VectorSelector {
                metric: Some(metric),
                matchers: matchers.unwrap_or_default(),
            },
        ),
        map(label_matchers, |matchers| VectorSelector {
            metric: None,
            matchers,
        }),
    ))(input)
}

fn label_matchers(input: &str) -> IResult<&str, Matchers> {
    map(
        delimited(
            ws(tag("{")),
            separated_list0(ws(tag(",")), label_matcher),
            pair(opt(ws(tag(","))), ws(tag("}"))),
        ),
        Matchers::new,
    )(input)
}

fn label_matcher(input: &str) -> IResult<&str, LabelMatcher> {
    map_res(
        tuple((ws(label_identifier), ws(match_op), ws(string_literal))),
        |(label, op, value)| LabelMatcher::new(label, op, value),
    )(input)
}

// [a-zA-Z_][a-zA-Z0-9_]*
fn label_identifier(input: &str) -> IResult<&str, String> {
    let (rest, m) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)?;
    Ok((rest, String::from(m)))
}

// [a-zA-Z_:][a-zA-Z0-9_:]*
fn metric_identifier(input: &str) -> IResult<&str, String> {
    let (rest, m) = recognize(pair(
        alt((alpha1, tag("_"), tag(":"))),
        many0(alt((alphanumeric1, tag("_"), tag(":")))),
    ))(input)?;
    Ok((rest, String::from(m)))
}

fn match_op(input: &str) -> IResult<&str, MatchOp> {
    let (rest, m) = alt((tag("=~"), tag("!~"), tag("!="), tag("=")))(input)?;
    let op = match m {
        "=" => MatchOp::Equal,
        "!=" => MatchOp::NotEqual,
        "=~" => MatchOp::RegexEqual,
        "!~" => MatchOp::RegexNotEqual,
        _ => unreachable!(),
    };
    Ok((rest, op))
}

fn cmp_op(input: &str) -> IResult<&str, BinaryOp> {
    let (rest, m) = alt((
        tag(">="),
        tag("<="),
        tag("=="),
        tag("!="),
        tag(">"),
        tag("<"),
    ))(input)?;
    let op = match m {
        ">" => BinaryOp::Gt,
        "<" => BinaryOp::Lt,
        ">=" => BinaryOp::Gte,
        "<=" => BinaryOp::Lte,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        _ => unreachable!(),
    };
    Ok((rest, op))
}

fn add_op(input: &str) -> IResult<&str, BinaryOp> {
    let (rest, m) = alt((tag("+"), tag("-")))(input)?;
    Ok((rest, if m == "+" { BinaryOp::Add } else { BinaryOp::Sub }))
}

fn mul_op(input: &str) -> IResult<&str, BinaryOp> {
    let (rest, m) = alt((tag("*"), tag("/")))(input)?;
    Ok((rest, if m == "*" { BinaryOp::Mul } else { BinaryOp::Div }))
}

// A double-quoted string with backslash escapes, decoded.
fn string_literal(input: &str) -> IResult<&str, String> {
    let mut chars = input.char_indices();
    if !matches!(chars.next(), Some((_, '"'))) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => {
                let value = enquote::unquote(&input[..=i]).map_err(|_| {
                    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped))
                })?;
                return Ok((&input[i + 1..], value));
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(multispace0, inner)
}
