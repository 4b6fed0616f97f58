//! # Query Builder
//!
//! `Query` is an immutable-by-value builder: every method consumes the query
//! and returns the modified one, which is exactly the shape a baked step
//! needs (`Fn(Query) -> BakeryResult<Query>`).
//!
//! ## Lifecycle
//!
//! 1. A session creates a query for an entity ([`Session::query`]).
//! 2. Builder methods add joins, criteria, ordering, slicing and options.
//! 3. [`Query::compile`] produces a [`QueryContext`]: the [`Statement`] plus
//!    nested eager-load descriptors ([`SubqueryLoad`]).
//! 4. [`Session::execute`] runs the context and builds records.
//!
//! Joins made through [`Query::join`] track a join point, so chained joins
//! continue from the last joined entity. That scratch state is only needed
//! while building and is dropped by [`Query::strip_compile_state`].

mod compile;
mod exec;
mod expr;

pub use compile::{JoinClause, NestedLoader, QueryContext, Statement, SubqueryLoad, SubquerySource};
pub use exec::execute;
pub use expr::{col, ColumnRef, CompareOp, Expr, OrderBy};

use crate::error::{BakeryError, BakeryResult};
use crate::schema::{Mapper, MapperRegistry, Relationship};
use crate::session::{Record, Session};
use crate::strategies::{LoadOption, LoadPath, StrategyKey};
use crate::value::{Params, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// What a query selects
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Full entities of the root mapper
    Entity,
    /// Plain column rows
    Columns(Vec<ColumnRef>),
    /// A single `count(*)` row
    Count,
    /// Entities prefixed by key columns; used by nested eager loads to
    /// group children under their parent
    Keyed(Vec<ColumnRef>),
}

#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<MapperRegistry>,
    mapper: Arc<Mapper>,
    pub(crate) session: Option<Session>,
    pub(crate) projection: Projection,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) criterion: Option<Expr>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) autoflush: bool,
    pub(crate) populate_existing: bool,
    pub(crate) invoke_all_eagers: bool,
    pub(crate) use_labels: bool,
    pub(crate) current_path: LoadPath,
    pub(crate) options: Vec<LoadOption>,
    // Build-time join scratch state
    joinpoint: Option<String>,
    joinpath: Vec<String>,
}

impl Query {
    pub fn new(registry: Arc<MapperRegistry>, mapper: Arc<Mapper>, session: Option<Session>) -> Self {
        Query {
            registry,
            mapper,
            session,
            projection: Projection::Entity,
            joins: Vec::new(),
            criterion: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            autoflush: true,
            populate_existing: false,
            invoke_all_eagers: true,
            use_labels: false,
            current_path: LoadPath::root(),
            options: Vec::new(),
            joinpoint: None,
            joinpath: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.registry
    }

    /// Root mapper
    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn criterion(&self) -> Option<&Expr> {
        self.criterion.as_ref()
    }

    pub fn current_path(&self) -> &LoadPath {
        &self.current_path
    }

    pub fn load_options(&self) -> &[LoadOption] {
        &self.options
    }

    pub fn is_entity_query(&self) -> bool {
        matches!(self.projection, Projection::Entity | Projection::Keyed(_))
    }

    /// Entity the next `join` starts from
    pub fn joinpoint(&self) -> &str {
        self.joinpoint.as_deref().unwrap_or(self.mapper.entity())
    }

    pub fn joinpath(&self) -> &[String] {
        &self.joinpath
    }

    /// AND `criterion` into the WHERE clause
    pub fn filter(mut self, criterion: Expr) -> Self {
        self.criterion = Some(match self.criterion.take() {
            Some(existing) => existing.and(criterion),
            None => criterion,
        });
        self
    }

    /// `root.column = value`
    pub fn filter_by(self, column: &str, value: impl Into<Expr>) -> Self {
        let c = self.mapper.c(column);
        self.filter(c.eq(value))
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn order_by_none(mut self) -> Self {
        self.order_by.clear();
        self
    }

    pub fn join(self, key: &str) -> BakeryResult<Self> {
        self.join_impl(key, false)
    }

    pub fn outerjoin(self, key: &str) -> BakeryResult<Self> {
        self.join_impl(key, true)
    }

    fn join_impl(mut self, key: &str, outer: bool) -> BakeryResult<Self> {
        let rel = Arc::clone(self.registry.relationship(self.joinpoint(), key)?);
        if let Some((table, on)) = rel.parent_secondary_join() {
            self.joins.push(JoinClause { table, on, outer });
            let (_, target_on) = rel.secondary_join().ok_or_else(|| {
                BakeryError::Configuration(format!(
                    "Relationship '{}' has no target join",
                    rel.qualified_name()
                ))
            })?;
            self.joins.push(JoinClause {
                table: rel.target_table().to_string(),
                on: target_on,
                outer,
            });
        } else {
            let on = rel.direct_join().ok_or_else(|| {
                BakeryError::Configuration(format!(
                    "Relationship '{}' has no join condition",
                    rel.qualified_name()
                ))
            })?;
            self.joins.push(JoinClause {
                table: rel.target_table().to_string(),
                on,
                outer,
            });
        }
        self.joinpath.push(rel.key.clone());
        self.joinpoint = Some(rel.target.clone());
        Ok(self)
    }

    /// Select the target of a many-to-many relationship through its
    /// association table, so the lazy clause can reference it
    pub fn select_from_secondary(mut self, rel: &Relationship) -> Self {
        if let Some((table, on)) = rel.secondary_join() {
            self.joins.push(JoinClause {
                table,
                on,
                outer: false,
            });
        }
        self
    }

    /// Rows `start..stop` of the current result, composing with any
    /// existing slice
    pub fn slice(mut self, start: usize, stop: usize) -> Self {
        let base = self.offset.unwrap_or(0);
        let mut len = stop.saturating_sub(start);
        if let Some(limit) = self.limit {
            len = len.min(limit.saturating_sub(start));
        }
        let offset = base + start;
        self.offset = (offset > 0).then_some(offset);
        self.limit = Some(len);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Select plain columns instead of entities
    pub fn with_entities(mut self, columns: &[ColumnRef]) -> Self {
        self.projection = Projection::Columns(columns.to_vec());
        self
    }

    /// Collapse to a single count row
    pub fn count(mut self) -> Self {
        self.projection = Projection::Count;
        self
    }

    pub fn keyed_by(mut self, columns: Vec<ColumnRef>) -> Self {
        self.projection = Projection::Keyed(columns);
        self
    }

    pub fn autoflush(mut self, enabled: bool) -> Self {
        self.autoflush = enabled;
        self
    }

    /// Overwrite already-loaded instances with freshly selected rows
    pub fn populate_existing(mut self) -> Self {
        self.populate_existing = true;
        self
    }

    /// Whether relationships configured as eager fire for this query.
    /// Explicit options still apply when disabled.
    pub fn invoke_all_eagers(mut self, enabled: bool) -> Self {
        self.invoke_all_eagers = enabled;
        self
    }

    pub fn use_labels(mut self, enabled: bool) -> Self {
        self.use_labels = enabled;
        self
    }

    pub fn with_current_path(mut self, path: LoadPath) -> Self {
        self.current_path = path;
        self
    }

    pub fn options(mut self, options: impl IntoIterator<Item = LoadOption>) -> Self {
        self.options.extend(options);
        self
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }

    /// Drop join-point bookkeeping only needed while building
    pub fn strip_compile_state(mut self) -> Self {
        self.joinpoint = None;
        self.joinpath.clear();
        self
    }

    /// Replace the criterion with the mapper's identity predicate.
    ///
    /// Primary-key binds named in `nones` become `IS NULL` tests.
    pub fn identity_criterion(mut self, nones: &HashSet<String>) -> BakeryResult<Self> {
        if self.criterion.is_some() || self.limit.is_some() || self.offset.is_some() {
            return Err(BakeryError::InvalidQuery(
                "get() being called on a Query with existing criterion".to_string(),
            ));
        }
        let clause = self.mapper.get_clause().ok_or_else(|| {
            BakeryError::Configuration(format!(
                "Mapper '{}' has no primary key",
                self.mapper.entity()
            ))
        })?;
        self.criterion = Some(clause.adapt_to_null(nones));
        self.order_by.clear();
        Ok(self)
    }

    /// Strategy for a relationship at `path`: an explicit option wins,
    /// then the relationship's configured strategy when eager loads are on
    pub fn effective_strategy(&self, path: &LoadPath, configured: StrategyKey) -> StrategyKey {
        if let Some(option) = self.options.iter().rev().find(|o| &o.path == path) {
            return option.strategy;
        }
        if self.invoke_all_eagers {
            configured
        } else {
            StrategyKey::SELECT
        }
    }

    pub fn compile(&self) -> BakeryResult<QueryContext> {
        compile::compile(self)
    }

    /// Compile and run against the bound session
    pub fn execute(&self, params: &Params) -> BakeryResult<Vec<Record>> {
        let session = self.session.as_ref().ok_or_else(|| {
            BakeryError::InvalidQuery("Query is not bound to a Session".to_string())
        })?;
        let context = self.compile()?;
        if context.autoflush && !context.populate_existing {
            session.autoflush()?;
        }
        session.execute(&context, params)
    }

    pub fn all(&self) -> BakeryResult<Vec<Record>> {
        self.execute(&Params::new())
    }

    /// Unbaked primary-key lookup, consulting the identity map first
    pub fn get(&self, ident: &[Value]) -> BakeryResult<Option<Record>> {
        let session = self.session.as_ref().ok_or_else(|| {
            BakeryError::InvalidQuery("Query is not bound to a Session".to_string())
        })?;
        let (nones, params) = identity_params(&self.mapper, ident)?;
        if nones.is_empty() {
            if let Some(instance) = session.identity_lookup(&self.mapper, ident) {
                return Ok(Some(Record::Entity(instance)));
            }
        }
        let query = self.clone().identity_criterion(&nones)?;
        let mut rows = query.execute(&params)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(BakeryError::MultipleResultsFound("get()".to_string())),
        }
    }
}

/// Bind names that are null, plus one param per primary-key column keyed by
/// its attribute name
pub fn identity_params(mapper: &Mapper, ident: &[Value]) -> BakeryResult<(HashSet<String>, Params)> {
    let pk = mapper.primary_key_columns();
    if ident.len() != pk.len() {
        return Err(BakeryError::InvalidQuery(format!(
            "Incorrect number of values in identifier formed from argument to get(); \
             primary key columns are {}",
            pk.join(", ")
        )));
    }
    let mut nones = HashSet::new();
    let mut params = Params::new();
    for (column, value) in pk.iter().zip(ident) {
        if value.is_null() {
            nones.insert(column.clone());
        }
        params.insert(column, value.clone());
    }
    Ok((nones, params))
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", compile::to_statement(self))
    }
}
