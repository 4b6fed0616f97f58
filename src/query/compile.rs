//! Query compilation: `Query` -> `Statement` + `QueryContext`.

use super::{ColumnRef, Expr, OrderBy, Projection, Query};
use crate::baked::CacheKey;
use crate::error::BakeryResult;
use crate::schema::Relationship;
use crate::session::{Record, Session};
use crate::strategies::{LoadPath, StrategyKey};
use std::fmt;
use std::sync::Arc;

/// One joined table
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub on: Expr,
    pub outer: bool,
}

/// A compiled SELECT over the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub table: String,
    pub joins: Vec<JoinClause>,
    pub criterion: Option<Expr>,
    pub columns: Vec<ColumnRef>,
    /// Collapse the result to a single `count(*)` row
    pub count: bool,
    pub distinct: bool,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub use_labels: bool,
}

impl Statement {
    /// Tables visible to column references, in FROM order
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.table.as_str())
            .chain(self.joins.iter().map(|j| j.table.as_str()))
            .collect()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.count {
            write!(f, "count(*) AS count_1")?;
        } else {
            for (i, c) in self.columns.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                if self.use_labels {
                    write!(f, "{c} AS {}_{}", c.table, c.column)?;
                } else {
                    write!(f, "{c}")?;
                }
            }
        }
        write!(f, " FROM {}", self.table)?;
        for join in &self.joins {
            let kind = if join.outer { "LEFT OUTER JOIN" } else { "JOIN" };
            write!(f, " {kind} {} ON {}", join.table, join.on)?;
        }
        if let Some(criterion) = &self.criterion {
            write!(f, " WHERE {criterion}")?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, o) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{o}")?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

/// Runs a nested eager-load query against a live session
pub trait NestedLoader: Send + Sync {
    fn load_all(&self) -> BakeryResult<Vec<Record>>;
}

/// Where the rows of a nested eager load come from
#[derive(Clone)]
pub enum SubquerySource {
    /// Freshly compiled nested query
    Query(Query),
    /// Baked under `cache_key`; `query` is session-detached
    Baked { cache_key: CacheKey, query: Query },
    /// Restored against a live session and parameter set
    Live(Arc<dyn NestedLoader>),
}

impl fmt::Debug for SubquerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubquerySource::Query(_) => write!(f, "Query(..)"),
            SubquerySource::Baked { cache_key, .. } => write!(f, "Baked({cache_key})"),
            SubquerySource::Live(_) => write!(f, "Live(..)"),
        }
    }
}

/// Nested eager load of one relationship path, emitted by the compiler
#[derive(Debug, Clone)]
pub struct SubqueryLoad {
    pub path: LoadPath,
    pub relationship: Arc<Relationship>,
    pub source: SubquerySource,
}

/// Compiled, executable form of a query.
///
/// Contexts stored in a plan cache have `session == None`; callers clone
/// before rebinding.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: Query,
    pub statement: Statement,
    pub session: Option<Session>,
    pub autoflush: bool,
    pub populate_existing: bool,
    pub subquery_loads: Vec<SubqueryLoad>,
}

impl QueryContext {
    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }
}

pub(super) fn compile(query: &Query) -> BakeryResult<QueryContext> {
    let statement = to_statement(query);
    let mut subquery_loads = Vec::new();
    if query.is_entity_query() {
        for rel in query.mapper().relationships() {
            let path = query.current_path.child(&rel.key);
            if query.effective_strategy(&path, rel.lazy) != StrategyKey::SUBQUERY {
                continue;
            }
            let nested = subquery_load_query(query, &statement, rel, path.clone())?;
            subquery_loads.push(SubqueryLoad {
                path,
                relationship: Arc::clone(rel),
                source: SubquerySource::Query(nested),
            });
        }
    }
    tracing::trace!(
        statement = %statement,
        subquery_loads = subquery_loads.len(),
        "query_compiled"
    );
    Ok(QueryContext {
        query: query.clone(),
        statement,
        session: query.session.clone(),
        autoflush: query.autoflush,
        populate_existing: query.populate_existing,
        subquery_loads,
    })
}

pub(super) fn to_statement(query: &Query) -> Statement {
    let mapper = query.mapper();
    let (columns, count) = match &query.projection {
        Projection::Entity => (mapper.column_refs(), false),
        Projection::Columns(columns) => (columns.clone(), false),
        Projection::Count => (Vec::new(), true),
        Projection::Keyed(keys) => {
            let mut columns = keys.clone();
            columns.extend(mapper.column_refs());
            (columns, false)
        }
    };
    Statement {
        table: mapper.table().to_string(),
        joins: query.joins.clone(),
        criterion: query.criterion.clone(),
        columns,
        count,
        distinct: false,
        order_by: query.order_by.clone(),
        limit: query.limit,
        offset: query.offset,
        use_labels: query.use_labels,
    }
}

/// Target rows for every parent row the outer statement selects, keyed by
/// the parent's join values
fn subquery_load_query(
    parent: &Query,
    parent_statement: &Statement,
    rel: &Arc<Relationship>,
    path: LoadPath,
) -> BakeryResult<Query> {
    let registry = parent.registry();
    let target = Arc::clone(registry.mapper(&rel.target)?);

    let mut inner = parent_statement.clone();
    inner.columns = rel
        .parent_columns()
        .iter()
        .map(|c| ColumnRef::new(rel.parent_table(), c))
        .collect();
    inner.count = false;
    inner.distinct = true;
    inner.use_labels = false;
    if inner.limit.is_none() && inner.offset.is_none() {
        inner.order_by.clear();
    }

    let key_columns = rel.key_columns();
    let mut nested = Query::new(Arc::clone(registry), target, parent.session.clone());
    if let Some((table, on)) = rel.secondary_join() {
        nested.joins.push(JoinClause {
            table,
            on,
            outer: false,
        });
    }
    nested.criterion = Some(Expr::InSubquery {
        columns: key_columns.clone(),
        subquery: Box::new(inner),
    });
    nested.order_by = key_columns.iter().map(ColumnRef::asc).collect();
    nested.order_by.extend(rel.order_by.iter().cloned());
    nested.projection = Projection::Keyed(key_columns);
    nested.current_path = path;
    nested.options = parent.options.clone();
    nested.populate_existing = parent.populate_existing;
    Ok(nested)
}
