//! Session: identity map, pending objects and statement execution
//!
//! A [`Session`] binds a [`Database`] to a configured [`MapperRegistry`].
//! Entity rows are materialized through the session's identity map, so a
//! given primary key maps to exactly one live [`Instance`] per session.
//!
//! ## Lifecycle of an instance
//!
//! 1. `new_instance()` builds a pending instance with column defaults applied
//! 2. `add()` queues it; `flush()` (or autoflush before a query) inserts it,
//!    assigning an integer primary key when absent, and moves it into the
//!    identity map
//! 3. Queries return the identity-mapped instance; `populate_existing`
//!    refreshes its row in place
//!
//! Sessions are cheap `Clone` handles. One session must not be driven from
//! several threads at once.

use crate::error::{BakeryError, BakeryResult};
use crate::query::{self, Projection, Query, QueryContext, SubquerySource};
use crate::schema::{IdentityKey, Mapper, MapperRegistry};
use crate::storage::Database;
use crate::strategies::{LoadOption, LoadPath, Loaded, Passive, StrategyKey};
use crate::value::{ColumnLabel, Params, Row, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Flush pending instances before queries that allow it
    pub autoflush: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions { autoflush: true }
    }
}

#[derive(Default)]
struct SessionState {
    identity_map: HashMap<IdentityKey, Instance>,
    pending: Vec<Instance>,
}

struct SessionInner {
    id: u64,
    database: Arc<Database>,
    registry: Arc<MapperRegistry>,
    options: SessionOptions,
    state: Mutex<SessionState>,
    executions: AtomicU64,
    flushes: AtomicU64,
}

#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    pub fn new(database: Arc<Database>, registry: Arc<MapperRegistry>) -> Self {
        Session::with_options(database, registry, SessionOptions::default())
    }

    pub fn with_options(
        database: Arc<Database>,
        registry: Arc<MapperRegistry>,
        options: SessionOptions,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = id, autoflush = options.autoflush, "session_opened");
        Session(Arc::new(SessionInner {
            id,
            database,
            registry,
            options,
            state: Mutex::new(SessionState::default()),
            executions: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.0.database
    }

    pub fn registry(&self) -> &Arc<MapperRegistry> {
        &self.0.registry
    }

    pub fn options(&self) -> SessionOptions {
        self.0.options
    }

    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Entity query rooted at `entity`
    pub fn query(&self, entity: &str) -> BakeryResult<Query> {
        let mapper = Arc::clone(self.0.registry.mapper(entity)?);
        Ok(Query::new(
            Arc::clone(&self.0.registry),
            mapper,
            Some(self.clone()),
        ))
    }

    /// Column query over `entity`'s table
    pub fn query_columns(&self, entity: &str, columns: &[&str]) -> BakeryResult<Query> {
        let query = self.query(entity)?;
        let mut refs = Vec::with_capacity(columns.len());
        for c in columns {
            if !query.mapper().has_column(c) {
                return Err(BakeryError::UnknownColumn {
                    table: query.mapper().table().to_string(),
                    column: (*c).to_string(),
                });
            }
            refs.push(query.mapper().c(c));
        }
        Ok(query.with_entities(&refs))
    }

    /// Run a compiled context and build its records.
    ///
    /// Entity rows go through the identity map; nested eager loads attached
    /// to the context populate the loaded parents.
    pub fn execute(&self, context: &QueryContext, params: &Params) -> BakeryResult<Vec<Record>> {
        let snapshot = self.0.database.snapshot();
        let rows = query::execute(&context.statement, &snapshot, params)?;
        self.0.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            session_id = self.0.id,
            rows = rows.len(),
            snapshot_version = snapshot.version,
            "statement_executed"
        );

        let query = &context.query;
        let records = match query.projection() {
            Projection::Count => {
                let label: Arc<[ColumnLabel]> = vec![ColumnLabel {
                    table: String::new(),
                    column: "count".to_string(),
                    label: "count_1".to_string(),
                }]
                .into();
                rows.into_iter()
                    .map(|values| Record::Row(Row::new(Arc::clone(&label), values)))
                    .collect()
            }
            Projection::Columns(columns) => {
                let labels: Arc<[ColumnLabel]> = columns
                    .iter()
                    .map(|c| ColumnLabel::new(&c.table, &c.column, context.statement.use_labels))
                    .collect();
                rows.into_iter()
                    .map(|values| Record::Row(Row::new(Arc::clone(&labels), values)))
                    .collect()
            }
            Projection::Entity => {
                let mut records = Vec::with_capacity(rows.len());
                for values in rows {
                    records.push(Record::Entity(self.instance_for(context, values)));
                }
                records
            }
            Projection::Keyed(keys) => {
                let mut records = Vec::with_capacity(rows.len());
                for mut values in rows {
                    let entity_values = values.split_off(keys.len().min(values.len()));
                    records.push(Record::Keyed {
                        key: values,
                        instance: self.instance_for(context, entity_values),
                    });
                }
                records
            }
        };

        if !context.subquery_loads.is_empty() && !records.is_empty() {
            self.populate_subquery_loads(context, &records, params)?;
        }
        Ok(records)
    }

    fn instance_for(&self, context: &QueryContext, values: Vec<Value>) -> Instance {
        let mapper = context.query.mapper();
        let key = mapper.identity_key(&values);
        let options = context.query.load_options();

        let existing = key
            .as_ref()
            .and_then(|k| self.0.state.lock().identity_map.get(k).cloned());
        let instance = match existing {
            Some(instance) => {
                if context.populate_existing {
                    instance.refresh(values);
                }
                instance
            }
            None => {
                let instance = Instance::new(Arc::clone(mapper), values, key.clone());
                if let Some(key) = key {
                    self.0
                        .state
                        .lock()
                        .identity_map
                        .insert(key, instance.clone());
                }
                instance
            }
        };
        if !options.is_empty() {
            instance.set_load_context(context.query.current_path().clone(), options.to_vec());
        }
        instance
    }

    fn populate_subquery_loads(
        &self,
        context: &QueryContext,
        records: &[Record],
        params: &Params,
    ) -> BakeryResult<()> {
        let mut parents: Vec<&Instance> = Vec::new();
        for instance in records.iter().filter_map(Record::instance) {
            if !parents.iter().any(|p| *p == instance) {
                parents.push(instance);
            }
        }

        for load in &context.subquery_loads {
            let children = match &load.source {
                SubquerySource::Query(query) | SubquerySource::Baked { query, .. } => query
                    .clone()
                    .with_session(Some(self.clone()))
                    .execute(params)?,
                SubquerySource::Live(loader) => loader.load_all()?,
            };

            let mut grouped: HashMap<Vec<Value>, Vec<Instance>> = HashMap::new();
            for record in children {
                if let Record::Keyed { key, instance } = record {
                    grouped.entry(key).or_default().push(instance);
                }
            }

            let rel = &load.relationship;
            let parent_columns = rel.parent_columns();
            for parent in &parents {
                let key: Vec<Value> = parent_columns
                    .iter()
                    .map(|c| parent.get(c).unwrap_or(Value::Null))
                    .collect();
                let children = grouped.get(&key).cloned().unwrap_or_default();
                let loaded = if rel.uselist {
                    Loaded::Many(children)
                } else {
                    Loaded::One(children.into_iter().next())
                };
                parent.set_loaded(&rel.key, loaded);
            }
            tracing::debug!(
                path = %load.path,
                parents = parents.len(),
                groups = grouped.len(),
                "subquery_load_populated"
            );
        }
        Ok(())
    }

    /// Flush pending instances if this session autoflushes
    pub fn autoflush(&self) -> BakeryResult<()> {
        if self.0.options.autoflush {
            self.flush()?;
        }
        Ok(())
    }

    /// Insert every pending instance; returns how many were written
    pub fn flush(&self) -> BakeryResult<usize> {
        let pending = std::mem::take(&mut self.0.state.lock().pending);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut next_ids: HashMap<String, i64> = HashMap::new();
        for (written, instance) in pending.iter().enumerate() {
            if let Err(e) = self.flush_one(instance, &mut next_ids) {
                // Unwritten instances stay pending
                let mut state = self.0.state.lock();
                let mut restored = pending[written..].to_vec();
                restored.append(&mut state.pending);
                state.pending = restored;
                return Err(e);
            }
        }
        self.0.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = self.0.id, instances = pending.len(), "session_flushed");
        Ok(pending.len())
    }

    fn flush_one(&self, instance: &Instance, next_ids: &mut HashMap<String, i64>) -> BakeryResult<()> {
        let mapper = Arc::clone(instance.mapper());
        let snapshot = self.0.database.snapshot();
        let table = snapshot.table(mapper.table())?;

        if let [pk] = mapper.primary_key_columns() {
            if instance.get(pk).is_none_or(|v| v.is_null()) {
                let next = match next_ids.get(mapper.table()) {
                    Some(n) => *n,
                    None => table.max_int(pk).unwrap_or(0) + 1,
                };
                next_ids.insert(mapper.table().to_string(), next + 1);
                instance.set(pk, Value::Int64(next))?;
            }
        }

        let values = instance.values();
        let key = mapper.identity_key(&values).ok_or_else(|| {
            BakeryError::InvalidQuery(format!(
                "Instance of '{}' has a NULL identity key",
                mapper.entity()
            ))
        })?;

        let mut row = vec![Value::Null; table.columns().len()];
        for (column, value) in mapper.columns().iter().zip(values) {
            let idx = table.require_column(&column.name)?;
            row[idx] = value;
        }
        self.0.database.insert(mapper.table(), vec![row])?;

        instance.mark_persistent(key.clone());
        self.0.state.lock().identity_map.insert(key, instance.clone());
        Ok(())
    }

    /// Queue an instance for the next flush
    pub fn add(&self, instance: &Instance) {
        if !instance.is_pending() {
            return;
        }
        let mut state = self.0.state.lock();
        if !state.pending.iter().any(|p| p == instance) {
            state.pending.push(instance.clone());
        }
    }

    /// New pending instance with column defaults applied to unset columns
    pub fn new_instance(&self, entity: &str, values: &[(&str, Value)]) -> BakeryResult<Instance> {
        let mapper = Arc::clone(self.0.registry.mapper(entity)?);
        for (name, _) in values {
            if !mapper.has_column(name) {
                return Err(BakeryError::UnknownColumn {
                    table: mapper.table().to_string(),
                    column: (*name).to_string(),
                });
            }
        }
        let mut row = Vec::with_capacity(mapper.columns().len());
        for column in mapper.columns() {
            let given = values
                .iter()
                .rev()
                .find(|(name, _)| *name == column.name)
                .map(|(_, v)| v.clone());
            let value = match (given, &column.default) {
                (Some(v), _) => v,
                (None, Some(default)) => default.pre_compute()?,
                (None, None) => Value::Null,
            };
            row.push(value);
        }
        Ok(Instance::new(mapper, row, None))
    }

    /// Instance already in the identity map for `ident`
    pub fn identity_lookup(&self, mapper: &Mapper, ident: &[Value]) -> Option<Instance> {
        let key = IdentityKey::new(mapper.entity(), ident.to_vec());
        self.0.state.lock().identity_map.get(&key).cloned()
    }

    pub fn identity_map_len(&self) -> usize {
        self.0.state.lock().identity_map.len()
    }

    pub fn pending_count(&self) -> usize {
        self.0.state.lock().pending.len()
    }

    /// Statements executed by this session
    pub fn execution_count(&self) -> u64 {
        self.0.executions.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.0.flushes.load(Ordering::Relaxed)
    }

    /// Forget every loaded instance
    pub fn expunge_all(&self) {
        let mut state = self.0.state.lock();
        state.identity_map.clear();
        state.pending.clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("Session")
            .field("id", &self.0.id)
            .field("autoflush", &self.0.options.autoflush)
            .field("identity_map", &state.identity_map.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

struct InstanceState {
    values: Vec<Value>,
    key: Option<IdentityKey>,
    loaded: HashMap<String, Loaded>,
    /// Set when the instance was loaded by a query carrying options
    load_path: Option<LoadPath>,
    load_options: Vec<LoadOption>,
}

struct InstanceInner {
    mapper: Arc<Mapper>,
    state: Mutex<InstanceState>,
}

/// A mapped entity instance. Clones share state; equality is identity.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

impl Instance {
    fn new(mapper: Arc<Mapper>, values: Vec<Value>, key: Option<IdentityKey>) -> Self {
        Instance(Arc::new(InstanceInner {
            mapper,
            state: Mutex::new(InstanceState {
                values,
                key,
                loaded: HashMap::new(),
                load_path: None,
                load_options: Vec::new(),
            }),
        }))
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.0.mapper
    }

    pub fn entity(&self) -> &str {
        self.0.mapper.entity()
    }

    pub fn get(&self, column: &str) -> Option<Value> {
        let idx = self
            .0
            .mapper
            .columns()
            .iter()
            .position(|c| c.name == column)?;
        self.0.state.lock().values.get(idx).cloned()
    }

    pub fn set(&self, column: &str, value: impl Into<Value>) -> BakeryResult<()> {
        let idx = self
            .0
            .mapper
            .columns()
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| BakeryError::UnknownColumn {
                table: self.0.mapper.table().to_string(),
                column: column.to_string(),
            })?;
        self.0.state.lock().values[idx] = value.into();
        Ok(())
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.state.lock().values.clone()
    }

    /// Column values as a labelled row
    pub fn row(&self, use_labels: bool) -> Row {
        Row::new(self.0.mapper.labels(use_labels), self.values())
    }

    pub fn key(&self) -> Option<IdentityKey> {
        self.0.state.lock().key.clone()
    }

    /// Not yet flushed
    pub fn is_pending(&self) -> bool {
        self.0.state.lock().key.is_none()
    }

    pub fn load_path(&self) -> Option<LoadPath> {
        self.0.state.lock().load_path.clone()
    }

    pub fn load_options(&self) -> Vec<LoadOption> {
        self.0.state.lock().load_options.clone()
    }

    pub fn loaded(&self, key: &str) -> Option<Loaded> {
        self.0.state.lock().loaded.get(key).cloned()
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.0.state.lock().loaded.contains_key(key)
    }

    pub fn set_loaded(&self, key: &str, value: Loaded) {
        self.0.state.lock().loaded.insert(key.to_string(), value);
    }

    /// Discard a loaded relationship so the next access reloads it
    pub fn expire(&self, key: &str) {
        self.0.state.lock().loaded.remove(key);
    }

    fn refresh(&self, values: Vec<Value>) {
        let mut state = self.0.state.lock();
        state.values = values;
        state.loaded.clear();
    }

    fn mark_persistent(&self, key: IdentityKey) {
        self.0.state.lock().key = Some(key);
    }

    fn set_load_context(&self, path: LoadPath, options: Vec<LoadOption>) {
        let mut state = self.0.state.lock();
        state.load_path = Some(path);
        state.load_options = options;
    }

    /// Value of relationship `key`, loading it on first access
    pub fn load(&self, session: &Session, key: &str) -> BakeryResult<Loaded> {
        self.load_with(session, key, Passive::DEFAULT)
    }

    pub fn load_with(&self, session: &Session, key: &str, passive: Passive) -> BakeryResult<Loaded> {
        if let Some(loaded) = self.loaded(key) {
            return Ok(loaded);
        }
        let rel = Arc::clone(self.0.mapper.get_relationship(key)?);

        let path = self.load_path().unwrap_or_default().child(key);
        let strategy_key = self
            .load_options()
            .iter()
            .rev()
            .find(|o| o.path == path)
            .map_or(rel.lazy, |o| o.strategy);
        // Eager strategies that did not populate this instance load lazily
        let strategy_key = if strategy_key == StrategyKey::SUBQUERY {
            StrategyKey::SELECT
        } else {
            strategy_key
        };

        let strategy = session.registry().strategies().get(strategy_key)?;
        tracing::trace!(
            relationship = %rel.qualified_name(),
            strategy = strategy.name(),
            pending = self.is_pending(),
            "relationship_load"
        );
        let loaded = strategy.load(session, &rel, self, passive)?;
        self.set_loaded(key, loaded.clone());
        Ok(loaded)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Instance {}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.entity(), self.row(false))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({self})")
    }
}

/// One result of an executed query
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Row(Row),
    Entity(Instance),
    /// Entity tagged with the key columns of a nested eager load
    Keyed { key: Vec<Value>, instance: Instance },
}

impl Record {
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Record::Row(_) => None,
            Record::Entity(instance) | Record::Keyed { instance, .. } => Some(instance),
        }
    }

    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Record::Row(_) => None,
            Record::Entity(instance) | Record::Keyed { instance, .. } => Some(instance),
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Record::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match self {
            Record::Row(row) => row.values().to_vec(),
            Record::Entity(instance) | Record::Keyed { instance, .. } => instance.values(),
        }
    }

    /// Column value by label or column name
    pub fn get(&self, column: &str) -> Option<Value> {
        match self {
            Record::Row(row) => row.get(column).cloned(),
            Record::Entity(instance) | Record::Keyed { instance, .. } => instance.get(column),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Row(row) => write!(f, "{row}"),
            Record::Entity(instance) | Record::Keyed { instance, .. } => write!(f, "{instance}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_identity_map_dedups_instances() {
        let session = fixtures::session();
        let a = session.query("User").unwrap().filter_by("id", 7).all().unwrap();
        let b = session.query("User").unwrap().all().unwrap();
        assert_eq!(a[0].instance(), b[0].instance());
        assert_eq!(session.identity_map_len(), 4);
    }

    #[test]
    fn test_populate_existing_refreshes_row() {
        let session = fixtures::session();
        let jack = session
            .query("User")
            .unwrap()
            .filter_by("id", 7)
            .all()
            .unwrap()
            .remove(0);
        jack.instance().unwrap().set("name", "changed").unwrap();

        session.query("User").unwrap().filter_by("id", 7).all().unwrap();
        assert_eq!(jack.get("name"), Some(Value::string("changed")));

        session
            .query("User")
            .unwrap()
            .filter_by("id", 7)
            .populate_existing()
            .all()
            .unwrap();
        assert_eq!(jack.get("name"), Some(Value::string("jack")));
    }

    #[test]
    fn test_flush_assigns_primary_key() {
        let session = fixtures::session();
        let user = session
            .new_instance("User", &[("name", Value::string("wendy"))])
            .unwrap();
        session.add(&user);
        assert!(user.is_pending());
        assert_eq!(session.pending_count(), 1);

        assert_eq!(session.flush().unwrap(), 1);
        assert!(!user.is_pending());
        assert_eq!(user.get("id"), Some(Value::Int64(11)));
        assert_eq!(session.identity_lookup(user.mapper(), &[Value::Int64(11)]), Some(user));
    }

    #[test]
    fn test_autoflush_before_query() {
        let session = fixtures::session();
        let user = session
            .new_instance("User", &[("name", Value::string("wendy"))])
            .unwrap();
        session.add(&user);
        let users = session.query("User").unwrap().all().unwrap();
        assert_eq!(users.len(), 5);
        assert_eq!(session.flush_count(), 1);
    }

    #[test]
    fn test_autoflush_disabled_by_session_option() {
        let db = fixtures::database();
        let session = Session::with_options(db, fixtures::registry(), SessionOptions { autoflush: false });
        let user = session
            .new_instance("User", &[("name", Value::string("wendy"))])
            .unwrap();
        session.add(&user);
        assert_eq!(session.query("User").unwrap().all().unwrap().len(), 4);
        assert_eq!(session.pending_count(), 1);
    }

    #[test]
    fn test_new_instance_defaults() {
        let session = fixtures::session();
        let address = session
            .new_instance("Address", &[("user_id", Value::Int64(7))])
            .unwrap();
        assert_eq!(
            address.get("email_address"),
            Some(Value::string("nobody@example.com"))
        );
        assert!(session
            .new_instance("Address", &[("zip", Value::Int64(1))])
            .is_err());
    }

    #[test]
    fn test_query_columns_labels() {
        let session = fixtures::session();
        let rows = session
            .query_columns("User", &["id", "name"])
            .unwrap()
            .use_labels(true)
            .order_by(crate::query::col("users", "id").asc())
            .all()
            .unwrap();
        let row = rows[0].as_row().unwrap();
        assert_eq!(row.get("users_name"), Some(&Value::string("jack")));
        assert_eq!(row.get("name"), Some(&Value::string("jack")));
    }
}
