use super::subquery::unbake_subquery_loaders;
use super::{BakedQuery, KeyArg, Step, StepId};
use crate::error::{BakeryError, BakeryResult};
use crate::query::{identity_params, NestedLoader, Query, QueryContext};
use crate::schema::Mapper;
use crate::session::{Record, Session};
use crate::value::{Params, Value};
use std::fmt;
use std::sync::Arc;

const FIRST_STEP: StepId = StepId::new("baked.first");
const LOAD_ON_IDENT_STEP: StepId = StepId::new("baked.load_on_ident");

/// A baked query bound to one session and one parameter set
#[derive(Debug, Clone)]
pub struct BakedResult {
    bq: BakedQuery,
    session: Session,
    params: Params,
}

fn valid_param_name(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl BakedResult {
    pub(crate) fn new(bq: BakedQuery, session: Session) -> Self {
        BakedResult {
            bq,
            session,
            params: Params::new(),
        }
    }

    /// Merge bind parameters; later values win for repeated keys.
    ///
    /// A key that is not a bind identifier is an `ArgumentError` and
    /// nothing is merged.
    pub fn with_params<I, K, V>(mut self, params: I) -> BakeryResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut merged = Params::new();
        for (key, value) in params {
            let key = key.as_ref();
            if !valid_param_name(key) {
                return Err(BakeryError::ArgumentError(format!(
                    "params() keys must be bind parameter names, got '{key}'"
                )));
            }
            merged.insert(key, value);
        }
        self.params.extend(&merged);
        Ok(self)
    }

    /// Bind a single parameter
    pub fn param(self, key: &str, value: impl Into<Value>) -> BakeryResult<Self> {
        self.with_params([(key, value.into())])
    }

    /// Merge already-validated params
    pub(crate) fn with_bound(mut self, params: &Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn baked_query(&self) -> &BakedQuery {
        &self.bq
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn as_query(&self) -> BakeryResult<Query> {
        self.bq.resolve_plan(&self.session)
    }

    /// Execute and return the records in order.
    ///
    /// Spoiled queries run their pipeline fresh. Otherwise the cached plan
    /// is used (compiled and stored on a miss), copied, rebound to this
    /// session with nested eager loads restored, and executed.
    pub fn iter(&self) -> BakeryResult<std::vec::IntoIter<Record>> {
        Ok(self.execute()?.into_iter())
    }

    fn execute(&self) -> BakeryResult<Vec<Record>> {
        if self.bq.is_spoiled() {
            tracing::trace!(
                cache_key = self.bq.cache_key().fingerprint(),
                "baked_query_spoiled_execute"
            );
            return self.as_query()?.execute(&self.params);
        }

        let plan = match self.bq.bakery().get(self.bq.cache_key()) {
            Some(plan) => plan,
            None => self.bq.materialize_and_cache(&self.session)?,
        };

        let mut context = QueryContext::clone(&plan).with_session(Some(self.session.clone()));
        unbake_subquery_loaders(&self.bq, &self.session, &mut context, &self.params);
        context.statement.use_labels = true;
        context.query = context.query.with_session(Some(self.session.clone()));

        if context.autoflush && !context.populate_existing {
            self.session.autoflush()?;
        }
        self.session.execute(&context, &self.params)
    }

    pub fn all(&self) -> BakeryResult<Vec<Record>> {
        self.execute()
    }

    /// First record, or `None`. Runs a forked pipeline limited to one row;
    /// the shared baked query is not modified.
    pub fn first(&self) -> BakeryResult<Option<Record>> {
        let bq = self
            .bq
            .with_criteria(Step::map(FIRST_STEP, |q| q.slice(0, 1)), &[]);
        let records = BakedResult {
            bq,
            session: self.session.clone(),
            params: self.params.clone(),
        }
        .execute()?;
        Ok(records.into_iter().next())
    }

    /// Exactly one record
    pub fn one(&self) -> BakeryResult<Record> {
        let mut records = self.execute()?;
        match records.len() {
            1 => Ok(records.remove(0)),
            0 => Err(BakeryError::NoResultFound("one()".to_string())),
            _ => Err(BakeryError::MultipleResultsFound("one()".to_string())),
        }
    }

    /// Primary-key lookup. The session's identity map is consulted first
    /// when no identity component is null.
    pub fn get(&self, ident: &[Value]) -> BakeryResult<Option<Record>> {
        let mapper = self.identity_mapper()?;
        if !ident.iter().any(Value::is_null) {
            if let Some(instance) = self.session.identity_lookup(&mapper, ident) {
                return Ok(Some(Record::Entity(instance)));
            }
        }
        self.load_identity(&mapper, ident)
    }

    /// Load by primary key from the database, bypassing the identity map
    pub fn load_on_ident(&self, ident: &[Value]) -> BakeryResult<Option<Record>> {
        let mapper = self.identity_mapper()?;
        self.load_identity(&mapper, ident)
    }

    fn identity_mapper(&self) -> BakeryResult<Arc<Mapper>> {
        let query = self.bq.steps().seed().apply(&self.session)?;
        Ok(Arc::clone(query.mapper()))
    }

    fn load_identity(&self, mapper: &Mapper, ident: &[Value]) -> BakeryResult<Option<Record>> {
        let (nones, params) = identity_params(mapper, ident)?;

        // Null components change the predicate shape, so they are keyed
        let null_flags: Vec<bool> = ident.iter().map(Value::is_null).collect();
        let setup = Step::new(LOAD_ON_IDENT_STEP, move |q: Query| q.identity_criterion(&nones));
        let bq = self.bq.with_criteria(setup, &[KeyArg::Flags(null_flags)]);

        let mut merged = self.params.clone();
        merged.extend(&params);
        let mut records = BakedResult {
            bq,
            session: self.session.clone(),
            params: merged,
        }
        .execute()?;

        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop()),
            _ => Err(BakeryError::MultipleResultsFound("get()".to_string())),
        }
    }
}

impl NestedLoader for BakedResult {
    fn load_all(&self) -> BakeryResult<Vec<Record>> {
        self.all()
    }
}

impl fmt::Display for BakedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_query() {
            Ok(query) => write!(f, "{query}"),
            Err(e) => write!(f, "<unresolved: {e}>"),
        }
    }
}
