use std::time::Duration;

use ahash::AHashMap;

use crate::common::hash::hash_labels;
use crate::common::types::{Label, LabelMatcher, MatchOp, Matchers, Timestamp};
use crate::common::METRIC_NAME_LABEL;
use crate::query::ast::{BinaryOp, Expr, VectorSelector};
use crate::query::{QueryError, QueryResult};
use crate::storage::MetricStore;

/// One element of an instant vector: a labeled value at the evaluation
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantSample {
    pub labels: Vec<Label>,
    pub value: f64,
}

pub type InstantVector = Vec<InstantSample>;

enum Value {
    Scalar(f64),
    Vector(InstantVector),
}

/// Evaluates `expr` at `ts`. Each selector resolves a series to its most
/// recent sample within the lookback window; series silent for longer are
/// absent from the result.
///
/// A top-level scalar result is mapped onto a single unlabeled instance when
/// non-zero, so that constant expressions can still drive an alert.
pub fn eval_instant(
    store: &MetricStore,
    expr: &Expr,
    ts: Timestamp,
    lookback: Duration,
) -> QueryResult<InstantVector> {
    match eval(store, expr, ts, lookback)? {
        Value::Vector(v) => Ok(v),
        Value::Scalar(s) if s != 0.0 => Ok(vec![InstantSample {
            labels: vec![],
            value: s,
        }]),
        Value::Scalar(_) => Ok(vec![]),
    }
}

/// The effective matcher set of a selector: its label matchers plus an exact
/// `__name__` matcher when a metric name is present.
pub(crate) fn selector_matchers(selector: &VectorSelector) -> Matchers {
    let mut matchers = selector.matchers.0.clone();
    if let Some(metric) = &selector.metric {
        // metric names are literal, the regex path is never needed here
        matchers.push(
            LabelMatcher::new(METRIC_NAME_LABEL, MatchOp::Equal, metric.clone())
                .expect("literal matcher"),
        );
    }
    Matchers::new(matchers)
}

fn eval(store: &MetricStore, expr: &Expr, ts: Timestamp, lookback: Duration) -> QueryResult<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Scalar(*n)),
        Expr::Selector(sel) => {
            let matchers = selector_matchers(sel);
            let samples = store
                .latest(&matchers, ts, lookback)
                .into_iter()
                .map(|(labels, sample)| InstantSample {
                    labels,
                    value: sample.value,
                })
                .collect();
            Ok(Value::Vector(samples))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(store, lhs, ts, lookback)?;
            let rhs = eval(store, rhs, ts, lookback)?;
            eval_binary(*op, lhs, rhs)
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> QueryResult<Value> {
    match (lhs, rhs) {
        (Value::Scalar(l), Value::Scalar(r)) => {
            if op.is_comparison() {
                return Err(QueryError::ScalarComparison);
            }
            Ok(Value::Scalar(apply(op, l, r)?))
        }
        (Value::Vector(l), Value::Scalar(r)) => {
            if op.is_comparison() {
                let kept = l
                    .into_iter()
                    .filter(|s| compare(op, s.value, r))
                    .collect();
                return Ok(Value::Vector(kept));
            }
            let mut out = Vec::with_capacity(l.len());
            for s in l {
                out.push(InstantSample {
                    labels: drop_metric_name(s.labels),
                    value: apply(op, s.value, r)?,
                });
            }
            Ok(Value::Vector(out))
        }
        (Value::Scalar(l), Value::Vector(r)) => {
            if op.is_comparison() {
                let kept = r
                    .into_iter()
                    .filter(|s| compare(op, l, s.value))
                    .collect();
                return Ok(Value::Vector(kept));
            }
            let mut out = Vec::with_capacity(r.len());
            for s in r {
                out.push(InstantSample {
                    labels: drop_metric_name(s.labels),
                    value: apply(op, l, s.value)?,
                });
            }
            Ok(Value::Vector(out))
        }
        (Value::Vector(l), Value::Vector(r)) => {
            // one-to-one join on the label set with the metric name dropped
            let mut right: AHashMap<u64, f64> = AHashMap::with_capacity(r.len());
            for s in &r {
                let key = hash_labels(&strip_name(&s.labels));
                right.insert(key, s.value);
            }
            let mut out = Vec::with_capacity(l.len());
            for s in l {
                let stripped = strip_name(&s.labels);
                let Some(&rv) = right.get(&hash_labels(&stripped)) else {
                    continue;
                };
                if op.is_comparison() {
                    if compare(op, s.value, rv) {
                        out.push(s);
                    }
                } else {
                    out.push(InstantSample {
                        labels: stripped,
                        value: apply(op, s.value, rv)?,
                    });
                }
            }
            Ok(Value::Vector(out))
        }
    }
}

fn apply(op: BinaryOp, l: f64, r: f64) -> QueryResult<f64> {
    match op {
        BinaryOp::Add => Ok(l + r),
        BinaryOp::Sub => Ok(l - r),
        BinaryOp::Mul => Ok(l * r),
        BinaryOp::Div => {
            if r == 0.0 {
                Err(QueryError::DivisionByZero)
            } else {
                Ok(l / r)
            }
        }
        _ => unreachable!("comparison handled by caller"),
    }
}

fn compare(op: BinaryOp, l: f64, r: f64) -> bool {
    match op {
        BinaryOp::Gt => l > r,
        BinaryOp::Lt => l < r,
        BinaryOp::Gte => l >= r,
        BinaryOp::Lte => l <= r,
        BinaryOp::Eq => l == r,
        BinaryOp::Ne => l != r,
        _ => unreachable!("arithmetic handled by caller"),
    }
}

fn strip_name(labels: &[Label]) -> Vec<Label> {
    labels
        .iter()
        .filter(|l| l.name != METRIC_NAME_LABEL)
        .cloned()
        .collect()
}

fn drop_metric_name(labels: Vec<Label>) -> Vec<Label> {
    let mut labels = labels;
    labels.retain(|l| l.name != METRIC_NAME_LABEL);
    labels
}
