//! Predicate and ordering expressions.
//!
//! Expressions are plain data: they reference columns by `table.column`,
//! literal values, or named bind parameters whose values are supplied at
//! execution time. A compiled plan therefore never embeds parameter values.

use crate::value::Value;
use std::collections::HashSet;
use std::fmt;

/// A column qualified by its table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// Shorthand for [`ColumnRef::new`]
pub fn col(table: &str, column: &str) -> ColumnRef {
    ColumnRef::new(table, column)
}

impl ColumnRef {
    pub fn new(table: &str, column: &str) -> Self {
        ColumnRef {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn eq(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Eq, self.clone(), other)
    }

    pub fn ne(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::NotEq, self.clone(), other)
    }

    pub fn lt(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Lt, self.clone(), other)
    }

    pub fn le(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::LtEq, self.clone(), other)
    }

    pub fn gt(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Gt, self.clone(), other)
    }

    pub fn ge(&self, other: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::GtEq, self.clone(), other)
    }

    /// SQL LIKE with `%` and `_` wildcards
    pub fn like(&self, pattern: impl Into<Expr>) -> Expr {
        Expr::Like {
            expr: Box::new(Expr::Column(self.clone())),
            pattern: Box::new(pattern.into()),
            negated: false,
        }
    }

    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(Expr::Column(self.clone())),
            negated: false,
        }
    }

    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            expr: Box::new(Expr::Column(self.clone())),
            negated: true,
        }
    }

    pub fn asc(&self) -> OrderBy {
        OrderBy {
            column: self.clone(),
            descending: false,
        }
    }

    pub fn desc(&self) -> OrderBy {
        OrderBy {
            column: self.clone(),
            descending: true,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{op}")
    }
}

/// Boolean or scalar expression evaluated against a joined row
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    /// Named parameter, resolved from the bound params at execution
    Bind(String),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Tuple membership in the rows of a nested statement
    InSubquery {
        columns: Vec<ColumnRef>,
        subquery: Box<super::Statement>,
    },
    /// Tuple membership in a fixed list; subqueries resolve to this
    InValues {
        columns: Vec<ColumnRef>,
        rows: Vec<Vec<Value>>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn bind(name: &str) -> Self {
        Expr::Bind(name.to_string())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn compare(op: CompareOp, left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        }
    }

    /// Conjunction, flattening nested `And`s
    pub fn and(self, other: Expr) -> Self {
        let mut parts = match self {
            Expr::And(parts) => parts,
            e => vec![e],
        };
        match other {
            Expr::And(more) => parts.extend(more),
            e => parts.push(e),
        }
        Expr::And(parts)
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(vec![self, other])
    }

    /// Combine many predicates with AND; `None` when empty
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Rewrite `col = :name` into `col IS NULL` for every bind in `nones`.
    ///
    /// Identity lookups use this when a primary-key component is absent;
    /// the result has a different shape, so the caller must key it apart.
    pub fn adapt_to_null(&self, nones: &HashSet<String>) -> Expr {
        match self {
            Expr::Compare {
                op: CompareOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (other, Expr::Bind(name)) | (Expr::Bind(name), other)
                    if nones.contains(name) =>
                {
                    Expr::IsNull {
                        expr: Box::new(other.clone()),
                        negated: false,
                    }
                }
                _ => self.clone(),
            },
            Expr::And(parts) => Expr::And(parts.iter().map(|e| e.adapt_to_null(nones)).collect()),
            Expr::Or(parts) => Expr::Or(parts.iter().map(|e| e.adapt_to_null(nones)).collect()),
            Expr::Not(inner) => Expr::Not(Box::new(inner.adapt_to_null(nones))),
            _ => self.clone(),
        }
    }

    /// Names of every bind parameter referenced, in first-seen order
    pub fn binds(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_binds(&mut out);
        out
    }

    fn collect_binds(&self, out: &mut Vec<String>) {
        match self {
            Expr::Bind(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Compare { left, right, .. } => {
                left.collect_binds(out);
                right.collect_binds(out);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.collect_binds(out);
                pattern.collect_binds(out);
            }
            Expr::IsNull { expr, .. } | Expr::Not(expr) => expr.collect_binds(out),
            Expr::InSubquery { subquery, .. } => {
                if let Some(c) = &subquery.criterion {
                    c.collect_binds(out);
                }
            }
            Expr::And(parts) | Expr::Or(parts) => {
                for p in parts {
                    p.collect_binds(out);
                }
            }
            Expr::Column(_) | Expr::Literal(_) | Expr::InValues { .. } => {}
        }
    }

    /// Columns referenced directly (not inside subqueries)
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Compare { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
            Expr::IsNull { expr, .. } | Expr::Not(expr) => expr.collect_columns(out),
            Expr::InSubquery { columns, .. } | Expr::InValues { columns, .. } => {
                out.extend(columns.iter());
            }
            Expr::And(parts) | Expr::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            Expr::Literal(_) | Expr::Bind(_) => {}
        }
    }
}

fn write_tuple(f: &mut fmt::Formatter<'_>, columns: &[ColumnRef]) -> fmt::Result {
    if let [single] = columns {
        return write!(f, "{single}");
    }
    write!(f, "(")?;
    for (i, c) in columns.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{c}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Bind(name) => write!(f, ":{name}"),
            Expr::Compare { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}LIKE {pattern}")
            }
            Expr::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} IS {not}NULL")
            }
            Expr::InSubquery { columns, subquery } => {
                write_tuple(f, columns)?;
                write!(f, " IN ({subquery})")
            }
            Expr::InValues { columns, rows } => {
                write_tuple(f, columns)?;
                write!(f, " IN (<{} rows>)", rows.len())
            }
            Expr::And(parts) | Expr::Or(parts) => {
                let sep = if matches!(self, Expr::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    if matches!(p, Expr::And(_) | Expr::Or(_)) {
                        write!(f, "({p})")?;
                    } else {
                        write!(f, "{p}")?;
                    }
                }
                Ok(())
            }
            Expr::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

impl From<ColumnRef> for Expr {
    fn from(c: ColumnRef) -> Self {
        Expr::Column(c)
    }
}

impl From<&ColumnRef> for Expr {
    fn from(c: &ColumnRef) -> Self {
        Expr::Column(c.clone())
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Value::Int64(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Literal(Value::from(v))
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::string(s))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.column)
        } else {
            write!(f, "{}", self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens() {
        let e = col("users", "id")
            .eq(7)
            .and(col("users", "name").eq("jack"))
            .and(col("users", "id").gt(1));
        match e {
            Expr::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_adapt_to_null_rewrites_only_named_binds() {
        let clause = col("t", "a")
            .eq(Expr::bind("a"))
            .and(col("t", "b").eq(Expr::bind("b")));
        let nones: HashSet<String> = ["b".to_string()].into_iter().collect();

        let adapted = clause.adapt_to_null(&nones);
        assert_eq!(adapted.to_string(), "t.a = :a AND t.b IS NULL");
        assert_eq!(adapted.binds(), vec!["a".to_string()]);
        assert_eq!(clause.binds(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_display() {
        let e = col("users", "name")
            .like("%ed%")
            .or(col("users", "id").is_null());
        assert_eq!(e.to_string(), "users.name LIKE '%ed%' OR users.id IS NULL");
    }

    #[test]
    fn test_all_empty_is_none() {
        assert!(Expr::all(Vec::new()).is_none());
        assert_eq!(
            Expr::all(vec![col("t", "a").eq(1)]),
            Some(col("t", "a").eq(1))
        );
    }
}
