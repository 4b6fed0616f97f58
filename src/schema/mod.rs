//! # Mapping Registry
//!
//! Declares which entity maps onto which table, its primary key, column
//! defaults and relationships. Mappers are registered up front and then
//! [`configured`](MapperRegistry::configure) once; configuration resolves
//! relationship tables, validates join columns and gives every relationship
//! its own plan cache. The configured registry is immutable and shared as
//! `Arc<MapperRegistry>`.
//!
//! ```ignore
//! let registry = MapperRegistry::new()
//!     .register(Mapper::new("User", "users").column("id").column("name").primary_key(&["id"])
//!         .relationship(Relationship::one_to_many("addresses", "User", "Address").on("id", "user_id")))
//!     .register(Mapper::new("Address", "addresses").column("id").column("user_id").primary_key(&["id"]))
//!     .configure()?;
//! ```

mod defaults;
mod mapper;
mod relationship;

pub use defaults::ColumnDefault;
pub use mapper::{ColumnProperty, IdentityKey, Mapper};
pub use relationship::{Direction, Relationship, Secondary};

use crate::baked::{bake_lazy_loaders, PlanCache};
use crate::config::Config;
use crate::error::{BakeryError, BakeryResult};
use crate::strategies::StrategyRegistry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// All mappers known to a session factory, plus the loader strategies
#[derive(Debug, Default)]
pub struct MapperRegistry {
    mappers: BTreeMap<String, Arc<Mapper>>,
    strategies: StrategyRegistry,
    configured: bool,
}

impl MapperRegistry {
    pub fn new() -> Self {
        MapperRegistry {
            mappers: BTreeMap::new(),
            strategies: StrategyRegistry::new(),
            configured: false,
        }
    }

    /// Add a mapper; a later mapper for the same entity replaces the earlier one
    pub fn register(mut self, mapper: Mapper) -> Self {
        self.mappers
            .insert(mapper.entity().to_string(), Arc::new(mapper));
        self
    }

    /// Configure with default settings
    pub fn configure(self) -> BakeryResult<Arc<Self>> {
        self.configure_with(&Config::default())
    }

    /// Resolve and validate every relationship, then freeze the registry.
    ///
    /// Relationship plan caches are sized by `cache.relationship_capacity`;
    /// `loading.bake_lazy_loaders` installs the baked lazy loader as the
    /// default `select` strategy.
    pub fn configure_with(mut self, config: &Config) -> BakeryResult<Arc<Self>> {
        let mut configured = BTreeMap::new();
        for (entity, mapper) in &self.mappers {
            let mut mapper = (**mapper).clone();
            if mapper.primary_key_columns().is_empty() {
                return Err(BakeryError::Configuration(format!(
                    "Mapper '{entity}' has no primary key"
                )));
            }
            for pk in mapper.primary_key_columns() {
                if !mapper.has_column(pk) {
                    return Err(BakeryError::UnknownColumn {
                        table: mapper.table().to_string(),
                        column: pk.clone(),
                    });
                }
            }

            let mut relationships = Vec::with_capacity(mapper.relationships.len());
            for rel in &mapper.relationships {
                let rel = self.resolve_relationship(&mapper, rel, config)?;
                relationships.push(Arc::new(rel));
            }
            mapper.relationships = relationships;
            configured.insert(entity.clone(), Arc::new(mapper));
        }
        self.mappers = configured;
        self.configured = true;

        if config.loading.bake_lazy_loaders {
            bake_lazy_loaders(&self.strategies);
        }

        tracing::info!(
            mappers = self.mappers.len(),
            relationships = self
                .mappers
                .values()
                .map(|m| m.relationships().len())
                .sum::<usize>(),
            bake_lazy_loaders = config.loading.bake_lazy_loaders,
            "mappers_configured"
        );
        Ok(Arc::new(self))
    }

    fn resolve_relationship(
        &self,
        parent: &Mapper,
        rel: &Relationship,
        config: &Config,
    ) -> BakeryResult<Relationship> {
        let target = self.mapper(&rel.target)?;
        let mut rel = rel.clone();
        rel.parent_table = parent.table().to_string();
        rel.target_table = target.table().to_string();

        let check = |mapper: &Mapper, column: &str| {
            if mapper.has_column(column) {
                Ok(())
            } else {
                Err(BakeryError::UnknownColumn {
                    table: mapper.table().to_string(),
                    column: column.to_string(),
                })
            }
        };

        match &rel.secondary {
            Some(sec) => {
                if sec.parent_pairs.is_empty() || sec.target_pairs.is_empty() {
                    return Err(BakeryError::Configuration(format!(
                        "Relationship '{}' has an incomplete secondary join",
                        rel.qualified_name()
                    )));
                }
                for (p, _) in &sec.parent_pairs {
                    check(parent, p)?;
                }
                for (t, _) in &sec.target_pairs {
                    check(target, t)?;
                }
            }
            None => {
                if rel.pairs.is_empty() {
                    return Err(BakeryError::Configuration(format!(
                        "Relationship '{}' has no join condition",
                        rel.qualified_name()
                    )));
                }
                for (p, t) in &rel.pairs {
                    check(parent, p)?;
                    check(target, t)?;
                }
            }
        }
        for order in &rel.order_by {
            if order.column.table != rel.target_table {
                return Err(BakeryError::Configuration(format!(
                    "Relationship '{}' orders by '{}', which is not on '{}'",
                    rel.qualified_name(),
                    order.column,
                    rel.target_table
                )));
            }
            check(target, &order.column.column)?;
        }

        rel.use_get = rel.direction == Direction::ManyToOne && rel.secondary.is_none() && {
            let targets: HashSet<&str> = rel.pairs.iter().map(|(_, t)| t.as_str()).collect();
            let pks: HashSet<&str> = target
                .primary_key_columns()
                .iter()
                .map(String::as_str)
                .collect();
            targets == pks
        };

        rel.compiled_cache = match config.cache.relationship_capacity {
            0 => PlanCache::unbounded(),
            n => PlanCache::lru(n),
        };
        Ok(rel)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn mapper(&self, entity: &str) -> BakeryResult<&Arc<Mapper>> {
        self.mappers
            .get(entity)
            .ok_or_else(|| BakeryError::UnknownEntity(entity.to_string()))
    }

    pub fn mapper_for_table(&self, table: &str) -> Option<&Arc<Mapper>> {
        self.mappers.values().find(|m| m.table() == table)
    }

    pub fn mappers(&self) -> impl Iterator<Item = &Arc<Mapper>> {
        self.mappers.values()
    }

    pub fn relationship(&self, entity: &str, key: &str) -> BakeryResult<&Arc<Relationship>> {
        self.mapper(entity)?.get_relationship(key)
    }

    /// Relationships on the target side that mirror `rel`
    pub fn reverse_properties(&self, rel: &Relationship) -> Vec<Arc<Relationship>> {
        let Ok(target) = self.mapper(&rel.target) else {
            return Vec::new();
        };
        target
            .relationships()
            .iter()
            .filter(|other| {
                other.target == rel.parent
                    && (other.back_populates.as_deref() == Some(rel.key.as_str())
                        || rel.back_populates.as_deref() == Some(other.key.as_str()))
            })
            .cloned()
            .collect()
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }
}
