//! Relationship configuration between two mapped entities.

use crate::baked::PlanCache;
use crate::query::{col, ColumnRef, Expr, OrderBy};
use crate::strategies::StrategyKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// Association table linking the two sides of a many-to-many relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secondary {
    pub table: String,
    /// (parent column, secondary column)
    pub parent_pairs: Vec<(String, String)>,
    /// (target column, secondary column)
    pub target_pairs: Vec<(String, String)>,
}

impl Secondary {
    pub fn new(table: &str) -> Self {
        Secondary {
            table: table.to_string(),
            parent_pairs: Vec::new(),
            target_pairs: Vec::new(),
        }
    }

    pub fn parent(mut self, parent_column: &str, secondary_column: &str) -> Self {
        self.parent_pairs
            .push((parent_column.to_string(), secondary_column.to_string()));
        self
    }

    pub fn target(mut self, target_column: &str, secondary_column: &str) -> Self {
        self.target_pairs
            .push((target_column.to_string(), secondary_column.to_string()));
        self
    }
}

/// A mapped relationship from `parent` to `target`
#[derive(Debug, Clone)]
pub struct Relationship {
    pub key: String,
    pub parent: String,
    pub target: String,
    pub direction: Direction,
    /// (parent column, target column) pairs for direct joins
    pub pairs: Vec<(String, String)>,
    pub secondary: Option<Secondary>,
    pub order_by: Vec<OrderBy>,
    pub uselist: bool,
    /// Allow lazy loads of this relationship to use cached plans
    pub bake_queries: bool,
    pub lazy: StrategyKey,
    pub back_populates: Option<String>,
    // Filled in by MapperRegistry::configure
    pub(crate) parent_table: String,
    pub(crate) target_table: String,
    pub(crate) use_get: bool,
    pub(crate) compiled_cache: PlanCache,
}

impl Relationship {
    fn new(key: &str, parent: &str, target: &str, direction: Direction) -> Self {
        Relationship {
            key: key.to_string(),
            parent: parent.to_string(),
            target: target.to_string(),
            direction,
            pairs: Vec::new(),
            secondary: None,
            order_by: Vec::new(),
            uselist: direction != Direction::ManyToOne,
            bake_queries: true,
            lazy: StrategyKey::SELECT,
            back_populates: None,
            parent_table: String::new(),
            target_table: String::new(),
            use_get: false,
            compiled_cache: PlanCache::unbounded(),
        }
    }

    pub fn one_to_many(key: &str, parent: &str, target: &str) -> Self {
        Relationship::new(key, parent, target, Direction::OneToMany)
    }

    pub fn many_to_one(key: &str, parent: &str, target: &str) -> Self {
        Relationship::new(key, parent, target, Direction::ManyToOne)
    }

    pub fn many_to_many(key: &str, parent: &str, target: &str, secondary: Secondary) -> Self {
        let mut rel = Relationship::new(key, parent, target, Direction::ManyToMany);
        rel.secondary = Some(secondary);
        rel
    }

    /// Join condition `parent.parent_column = target.target_column`
    pub fn on(mut self, parent_column: &str, target_column: &str) -> Self {
        self.pairs
            .push((parent_column.to_string(), target_column.to_string()));
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn uselist(mut self, uselist: bool) -> Self {
        self.uselist = uselist;
        self
    }

    pub fn bake_queries(mut self, bake: bool) -> Self {
        self.bake_queries = bake;
        self
    }

    pub fn lazy(mut self, strategy: StrategyKey) -> Self {
        self.lazy = strategy;
        self
    }

    pub fn back_populates(mut self, key: &str) -> Self {
        self.back_populates = Some(key.to_string());
        self
    }

    /// `Parent.key`, used in log fields and cache discriminators
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.parent, self.key)
    }

    pub fn parent_table(&self) -> &str {
        &self.parent_table
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    /// Many-to-one whose target columns are exactly the target primary key,
    /// so a lazy load can be served by an identity lookup
    pub fn use_get(&self) -> bool {
        self.use_get
    }

    /// Relationship-scoped bakery used by baked lazy loads
    pub fn compiled_cache(&self) -> &PlanCache {
        &self.compiled_cache
    }

    /// Parent columns whose values drive a load of this relationship
    pub fn parent_columns(&self) -> Vec<String> {
        match &self.secondary {
            Some(sec) => sec.parent_pairs.iter().map(|(p, _)| p.clone()).collect(),
            None => self.pairs.iter().map(|(p, _)| p.clone()).collect(),
        }
    }

    /// Columns on the loaded side that hold the parent's values: target
    /// columns for direct joins, secondary columns for many-to-many
    pub fn key_columns(&self) -> Vec<ColumnRef> {
        match &self.secondary {
            Some(sec) => sec
                .parent_pairs
                .iter()
                .map(|(_, s)| col(&sec.table, s))
                .collect(),
            None => self
                .pairs
                .iter()
                .map(|(_, t)| col(&self.target_table, t))
                .collect(),
        }
    }

    /// ON clause joining the secondary table to the target
    pub fn secondary_join(&self) -> Option<(String, Expr)> {
        let sec = self.secondary.as_ref()?;
        let on = Expr::all(
            sec.target_pairs
                .iter()
                .map(|(t, s)| col(&self.target_table, t).eq(col(&sec.table, s))),
        )?;
        Some((sec.table.clone(), on))
    }

    /// ON clause joining the parent table directly to the target
    pub fn direct_join(&self) -> Option<Expr> {
        Expr::all(
            self.pairs
                .iter()
                .map(|(p, t)| col(&self.parent_table, p).eq(col(&self.target_table, t))),
        )
    }

    /// ON clause joining the parent table to the secondary table
    pub fn parent_secondary_join(&self) -> Option<(String, Expr)> {
        let sec = self.secondary.as_ref()?;
        let on = Expr::all(
            sec.parent_pairs
                .iter()
                .map(|(p, s)| col(&self.parent_table, p).eq(col(&sec.table, s))),
        )?;
        Some((sec.table.clone(), on))
    }
}
