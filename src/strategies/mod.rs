//! Relationship Loader Strategies
//!
//! A relationship names the strategy it loads with by [`StrategyKey`]; the
//! [`StrategyRegistry`] maps keys to implementations. Installing a different
//! implementation under an existing key (see
//! [`bake_lazy_loaders`](crate::baked::bake_lazy_loaders)) switches every
//! relationship configured with that key without touching mapper config.
//!
//! | Key | Strategy |
//! |-----|----------|
//! | `select` | [`LazyLoader`] (or the baked loader once installed) |
//! | `baked_select` | [`BakedLazyLoader`](crate::baked::BakedLazyLoader) |
//! | `subquery` | [`SubqueryLoader`], eager via a nested query |

mod lazy;
mod subquery;

pub use lazy::LazyLoader;
pub use subquery::SubqueryLoader;

pub(crate) use lazy::{finalize_load, identity_of, lazy_clause};

use crate::baked::BakedLazyLoader;
use crate::error::{BakeryError, BakeryResult};
use crate::schema::Relationship;
use crate::session::{Instance, Session};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name a loader strategy is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyKey(&'static str);

impl StrategyKey {
    pub const SELECT: StrategyKey = StrategyKey("select");
    pub const BAKED_SELECT: StrategyKey = StrategyKey("baked_select");
    pub const SUBQUERY: StrategyKey = StrategyKey("subquery");

    pub const fn custom(name: &'static str) -> Self {
        StrategyKey(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain of relationship keys from a query's root entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadPath(Vec<String>);

impl LoadPath {
    pub fn root() -> Self {
        LoadPath(Vec::new())
    }

    pub fn new(keys: &[&str]) -> Self {
        LoadPath(keys.iter().map(|k| (*k).to_string()).collect())
    }

    pub fn child(&self, key: &str) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.to_string());
        LoadPath(keys)
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for LoadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Per-query override of the strategy used for one relationship path.
///
/// Options travel with the instances a query loads, so lazy loads fired
/// from those instances see them too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadOption {
    pub path: LoadPath,
    pub strategy: StrategyKey,
}

impl LoadOption {
    pub fn new(path: LoadPath, strategy: StrategyKey) -> Self {
        LoadOption { path, strategy }
    }

    pub fn subqueryload(path: &[&str]) -> Self {
        LoadOption::new(LoadPath::new(path), StrategyKey::SUBQUERY)
    }

    pub fn lazyload(path: &[&str]) -> Self {
        LoadOption::new(LoadPath::new(path), StrategyKey::SELECT)
    }

    pub fn baked_lazyload(path: &[&str]) -> Self {
        LoadOption::new(LoadPath::new(path), StrategyKey::BAKED_SELECT)
    }
}

/// Loader flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Passive(u8);

impl Passive {
    pub const DEFAULT: Passive = Passive(0);
    /// Do not autoflush the session before emitting the load
    pub const NO_AUTOFLUSH: Passive = Passive(1);

    pub fn contains(self, other: Passive) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Passive) -> Passive {
        Passive(self.0 | other.0)
    }
}

/// Value of a loaded relationship attribute
#[derive(Debug, Clone)]
pub enum Loaded {
    Many(Vec<Instance>),
    One(Option<Instance>),
}

impl Loaded {
    /// Empty value matching the relationship's collection-ness
    pub fn empty(uselist: bool) -> Self {
        if uselist {
            Loaded::Many(Vec::new())
        } else {
            Loaded::One(None)
        }
    }

    pub fn instances(&self) -> Vec<Instance> {
        match self {
            Loaded::Many(items) => items.clone(),
            Loaded::One(item) => item.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Loaded::Many(items) => items.len(),
            Loaded::One(item) => usize::from(item.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_one(&self) -> Option<&Instance> {
        match self {
            Loaded::One(item) => item.as_ref(),
            Loaded::Many(items) => items.first(),
        }
    }
}

/// How a relationship attribute gets its value when first accessed
pub trait LoaderStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lazy strategies emit a query on attribute access
    fn is_lazy(&self) -> bool {
        true
    }

    fn load(
        &self,
        session: &Session,
        relationship: &Arc<Relationship>,
        state: &Instance,
        passive: Passive,
    ) -> BakeryResult<Loaded>;
}

/// Registration point for loader strategies.
///
/// Starts with `select`, `baked_select` and `subquery` registered.
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<StrategyKey, Arc<dyn LoaderStrategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let registry = StrategyRegistry {
            strategies: RwLock::new(HashMap::new()),
        };
        registry.register(StrategyKey::SELECT, Arc::new(LazyLoader));
        registry.register(StrategyKey::BAKED_SELECT, Arc::new(BakedLazyLoader));
        registry.register(StrategyKey::SUBQUERY, Arc::new(SubqueryLoader));
        registry
    }

    /// Install `strategy` under `key`, replacing any previous one
    pub fn register(&self, key: StrategyKey, strategy: Arc<dyn LoaderStrategy>) {
        tracing::debug!(key = %key, strategy = strategy.name(), "loader_strategy_registered");
        self.strategies.write().insert(key, strategy);
    }

    pub fn get(&self, key: StrategyKey) -> BakeryResult<Arc<dyn LoaderStrategy>> {
        self.strategies
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| BakeryError::Configuration(format!("no loader strategy '{key}'")))
    }

    pub fn contains(&self, key: StrategyKey) -> bool {
        self.strategies.read().contains_key(&key)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.strategies.read().keys().copied().collect();
        keys.sort();
        f.debug_struct("StrategyRegistry").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registrations() {
        let registry = StrategyRegistry::new();
        assert_eq!(registry.get(StrategyKey::SELECT).unwrap().name(), "select");
        assert_eq!(
            registry.get(StrategyKey::BAKED_SELECT).unwrap().name(),
            "baked_select"
        );
        assert!(!registry.get(StrategyKey::SUBQUERY).unwrap().is_lazy());
        assert!(registry.get(StrategyKey::custom("joined")).is_err());
    }

    #[test]
    fn test_register_replaces() {
        let registry = StrategyRegistry::new();
        registry.register(StrategyKey::SELECT, Arc::new(BakedLazyLoader));
        assert_eq!(
            registry.get(StrategyKey::SELECT).unwrap().name(),
            "baked_select"
        );
    }

    #[test]
    fn test_passive_flags() {
        let flags = Passive::DEFAULT.union(Passive::NO_AUTOFLUSH);
        assert!(flags.contains(Passive::NO_AUTOFLUSH));
        assert!(!Passive::DEFAULT.contains(Passive::NO_AUTOFLUSH));
    }

    #[test]
    fn test_load_path() {
        let path = LoadPath::root().child("orders").child("items");
        assert_eq!(path.to_string(), "orders.items");
        assert_eq!(path, LoadPath::new(&["orders", "items"]));
        assert_eq!(LoadOption::subqueryload(&["orders"]).strategy, StrategyKey::SUBQUERY);
    }
}
