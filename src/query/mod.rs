mod ast;
mod eval;
mod parser;

pub use ast::{BinaryOp, Expr, VectorSelector};
pub use eval::{eval_instant, InstantSample, InstantVector};
pub(crate) use eval::selector_matchers;
pub use parser::{parse_expr, parse_selector};

use thiserror::Error;

/// Errors from parsing or evaluating rule expressions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("comparison of two scalars has no series to select")]
    ScalarComparison,
}

pub type QueryResult<T> = Result<T, QueryError>;
