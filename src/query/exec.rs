//! Statement evaluation over a storage snapshot.
//!
//! Nested-loop joins, three-valued predicate logic (a null comparison is
//! unknown and filters the row out), stable ordering, then projection,
//! DISTINCT and OFFSET/LIMIT.

use super::{ColumnRef, CompareOp, Expr, Statement};
use crate::error::{BakeryError, BakeryResult};
use crate::storage::{Snapshot, Table};
use crate::value::{Params, Value};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Row indices into each FROM table; `None` for the null side of an outer join
type Joined = Vec<Option<usize>>;

struct Scope {
    tables: Vec<(String, Arc<Table>)>,
}

impl Scope {
    fn resolve(&self, column: &ColumnRef) -> BakeryResult<(usize, usize)> {
        let pos = self
            .tables
            .iter()
            .position(|(name, _)| *name == column.table)
            .ok_or_else(|| {
                BakeryError::InvalidQuery(format!(
                    "Table '{}' is not part of the FROM clause",
                    column.table
                ))
            })?;
        let idx = self.tables[pos].1.require_column(&column.column)?;
        Ok((pos, idx))
    }

    fn value(&self, column: &ColumnRef, row: &[Option<usize>]) -> BakeryResult<Value> {
        let (pos, idx) = self.resolve(column)?;
        Ok(match row.get(pos).copied().flatten() {
            Some(r) => self.tables[pos].1.rows()[r][idx].clone(),
            None => Value::Null,
        })
    }
}

struct Evaluator<'a> {
    params: &'a Params,
    patterns: HashMap<String, Regex>,
}

impl<'a> Evaluator<'a> {
    fn new(params: &'a Params) -> Self {
        Evaluator {
            params,
            patterns: HashMap::new(),
        }
    }

    /// Only a definite `true` keeps the row
    fn test(&mut self, expr: &Expr, scope: &Scope, row: &[Option<usize>]) -> BakeryResult<bool> {
        Ok(self.eval(expr, scope, row)? == Value::Bool(true))
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope, row: &[Option<usize>]) -> BakeryResult<Value> {
        match expr {
            Expr::Column(c) => scope.value(c, row),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Bind(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| BakeryError::UnboundParameter(name.clone())),
            Expr::Compare { op, left, right } => {
                let l = self.eval(left, scope, row)?;
                let r = self.eval(right, scope, row)?;
                Ok(match l.sql_cmp(&r) {
                    None => Value::Null,
                    Some(ord) => Value::Bool(match op {
                        CompareOp::Eq => ord == Ordering::Equal,
                        CompareOp::NotEq => ord != Ordering::Equal,
                        CompareOp::Lt => ord == Ordering::Less,
                        CompareOp::LtEq => ord != Ordering::Greater,
                        CompareOp::Gt => ord == Ordering::Greater,
                        CompareOp::GtEq => ord != Ordering::Less,
                    }),
                })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let value = self.eval(expr, scope, row)?;
                let pattern = self.eval(pattern, scope, row)?;
                let (Some(value), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
                    return Ok(Value::Null);
                };
                let matched = self.like_regex(pattern)?.is_match(value);
                Ok(Value::Bool(matched != *negated))
            }
            Expr::IsNull { expr, negated } => {
                let value = self.eval(expr, scope, row)?;
                Ok(Value::Bool(value.is_null() != *negated))
            }
            Expr::InValues { columns, rows } => {
                let mut probe = Vec::with_capacity(columns.len());
                for c in columns {
                    let v = scope.value(c, row)?;
                    if v.is_null() {
                        return Ok(Value::Null);
                    }
                    probe.push(v);
                }
                let found = rows.iter().any(|candidate| {
                    candidate.len() == probe.len()
                        && candidate
                            .iter()
                            .zip(&probe)
                            .all(|(a, b)| a.sql_cmp(b) == Some(Ordering::Equal))
                });
                Ok(Value::Bool(found))
            }
            Expr::InSubquery { .. } => Err(BakeryError::InvalidQuery(
                "IN subquery must be resolved before evaluation".to_string(),
            )),
            Expr::And(parts) => {
                let mut unknown = false;
                for p in parts {
                    match self.eval(p, scope, row)? {
                        Value::Bool(false) => return Ok(Value::Bool(false)),
                        Value::Bool(true) => {}
                        _ => unknown = true,
                    }
                }
                Ok(if unknown { Value::Null } else { Value::Bool(true) })
            }
            Expr::Or(parts) => {
                let mut unknown = false;
                for p in parts {
                    match self.eval(p, scope, row)? {
                        Value::Bool(true) => return Ok(Value::Bool(true)),
                        Value::Bool(false) => {}
                        _ => unknown = true,
                    }
                }
                Ok(if unknown { Value::Null } else { Value::Bool(false) })
            }
            Expr::Not(inner) => Ok(match self.eval(inner, scope, row)? {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            }),
        }
    }

    fn like_regex(&mut self, pattern: &str) -> BakeryResult<&Regex> {
        if !self.patterns.contains_key(pattern) {
            let mut re = String::with_capacity(pattern.len() + 8);
            re.push_str("(?s)^");
            for ch in pattern.chars() {
                match ch {
                    '%' => re.push_str(".*"),
                    '_' => re.push('.'),
                    c => re.push_str(&regex::escape(&c.to_string())),
                }
            }
            re.push('$');
            let compiled = Regex::new(&re)
                .map_err(|e| BakeryError::InvalidQuery(format!("bad LIKE pattern: {e}")))?;
            self.patterns.insert(pattern.to_string(), compiled);
        }
        self.patterns
            .get(pattern)
            .ok_or_else(|| BakeryError::InvalidQuery(format!("bad LIKE pattern: {pattern}")))
    }
}

/// Replace every `IN (SELECT ...)` with the literal tuples it selects
fn resolve_subqueries(expr: &Expr, snapshot: &Snapshot, params: &Params) -> BakeryResult<Expr> {
    Ok(match expr {
        Expr::InSubquery { columns, subquery } => Expr::InValues {
            columns: columns.clone(),
            rows: execute(subquery, snapshot, params)?,
        },
        Expr::And(parts) => Expr::And(
            parts
                .iter()
                .map(|p| resolve_subqueries(p, snapshot, params))
                .collect::<BakeryResult<_>>()?,
        ),
        Expr::Or(parts) => Expr::Or(
            parts
                .iter()
                .map(|p| resolve_subqueries(p, snapshot, params))
                .collect::<BakeryResult<_>>()?,
        ),
        Expr::Not(inner) => Expr::Not(Box::new(resolve_subqueries(inner, snapshot, params)?)),
        other => other.clone(),
    })
}

/// Evaluate `statement`, returning the selected values row by row
pub fn execute(
    statement: &Statement,
    snapshot: &Snapshot,
    params: &Params,
) -> BakeryResult<Vec<Vec<Value>>> {
    let mut scope = Scope { tables: Vec::new() };
    for name in statement.tables() {
        scope
            .tables
            .push((name.to_string(), Arc::clone(snapshot.table(name)?)));
    }

    let criterion = statement
        .criterion
        .as_ref()
        .map(|c| resolve_subqueries(c, snapshot, params))
        .transpose()?;

    // Surface bad column references even when no row reaches them
    for c in statement
        .columns
        .iter()
        .chain(statement.order_by.iter().map(|o| &o.column))
        .chain(criterion.iter().flat_map(|c| c.columns()))
    {
        scope.resolve(c)?;
    }

    let mut eval = Evaluator::new(params);

    let mut rows: Vec<Joined> = (0..scope.tables[0].1.len()).map(|r| vec![Some(r)]).collect();
    for (offset, join) in statement.joins.iter().enumerate() {
        let right_len = scope.tables[offset + 1].1.len();
        let mut next = Vec::new();
        for left in rows {
            let mut matched = false;
            for r in 0..right_len {
                let mut candidate = left.clone();
                candidate.push(Some(r));
                if eval.test(&join.on, &scope, &candidate)? {
                    next.push(candidate);
                    matched = true;
                }
            }
            if !matched && join.outer {
                let mut candidate = left;
                candidate.push(None);
                next.push(candidate);
            }
        }
        rows = next;
    }

    if let Some(criterion) = &criterion {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if eval.test(criterion, &scope, &row)? {
                kept.push(row);
            }
        }
        rows = kept;
    }

    if !statement.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = statement
                .order_by
                .iter()
                .map(|o| scope.value(&o.column, &row))
                .collect::<BakeryResult<Vec<_>>>()?;
            keyed.push((key, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), order) in a.iter().zip(b).zip(&statement.order_by) {
                let ord = x.cmp(y);
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    let mut projected = Vec::with_capacity(rows.len());
    for row in &rows {
        let values = statement
            .columns
            .iter()
            .map(|c| scope.value(c, row))
            .collect::<BakeryResult<Vec<_>>>()?;
        projected.push(values);
    }

    if statement.distinct {
        let mut seen = HashSet::new();
        projected.retain(|values| seen.insert(values.clone()));
    }

    // count(*) collapses before OFFSET/LIMIT, which then slice the single row
    if statement.count {
        let n = i64::try_from(projected.len()).unwrap_or(i64::MAX);
        projected = vec![vec![Value::Int64(n)]];
    }

    Ok(projected
        .into_iter()
        .skip(statement.offset.unwrap_or(0))
        .take(statement.limit.unwrap_or(usize::MAX))
        .collect())
}
