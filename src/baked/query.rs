use super::subquery::bake_subquery_loaders;
use super::{BakedResult, CacheKey, KeyArg, PlanCache, Seed, Step, StepId, StepPipeline};
use crate::error::BakeryResult;
use crate::query::{Query, QueryContext};
use crate::session::Session;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

/// Plans staged by one bake, inserted together once every compile succeeded
pub(crate) type Staged = Vec<(CacheKey, Arc<QueryContext>)>;

/// A query-building pipeline whose compiled plan is cached by step identity.
///
/// ```ignore
/// let bakery = PlanCache::default();
/// let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
/// bq.add_criteria(Step::map("user.by_name", |q| q.filter_by("name", Expr::bind("name"))), &[]);
///
/// let jack = bq.for_session(&session).param("name", "jack")?.one()?;
/// ```
///
/// Cloning copies the pipeline, key, cache handle and spoiled flag; it
/// never copies cache contents.
#[derive(Debug, Clone)]
pub struct BakedQuery {
    pipeline: StepPipeline,
    cache_key: CacheKey,
    bakery: PlanCache,
    spoiled: bool,
}

impl BakedQuery {
    pub fn new(bakery: &PlanCache, seed: Seed) -> Self {
        BakedQuery::with_args(bakery, seed, &[])
    }

    /// Start a pipeline whose key begins with `args`
    pub fn with_args(bakery: &PlanCache, seed: Seed, args: &[KeyArg]) -> Self {
        let mut cache_key = CacheKey::from_args(args);
        cache_key.push_step(seed.id(), &[]);
        BakedQuery {
            pipeline: StepPipeline::new(seed),
            cache_key,
            bakery: bakery.clone(),
            spoiled: false,
        }
    }

    /// Pipeline of one seed returning `query`, keyed exactly as `cache_key`
    pub(crate) fn pinned(bakery: &PlanCache, cache_key: CacheKey, query: Query) -> Self {
        let seed = Seed::new(StepId::new("baked.pinned"), move |session: &Session| {
            Ok(query.clone().with_session(Some(session.clone())))
        });
        BakedQuery {
            pipeline: StepPipeline::new(seed),
            cache_key,
            bakery: bakery.clone(),
            spoiled: false,
        }
    }

    /// Append a step in place
    pub fn add_criteria(&mut self, step: Step, args: &[KeyArg]) -> &mut Self {
        self.cache_key.push_step(step.id(), args);
        self.pipeline.push(step);
        self
    }

    /// Copy with `step` appended; `self` is unchanged
    pub fn with_criteria(&self, step: Step, args: &[KeyArg]) -> BakedQuery {
        let mut forked = self.clone();
        forked.add_criteria(step, args);
        forked
    }

    /// Never use the plan cache for this instance again
    pub fn spoil(&mut self) -> &mut Self {
        if !self.spoiled {
            tracing::debug!(cache_key = self.cache_key.fingerprint(), "baked_query_spoiled");
        }
        self.spoiled = true;
        self
    }

    pub fn is_spoiled(&self) -> bool {
        self.spoiled
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    pub fn steps(&self) -> &StepPipeline {
        &self.pipeline
    }

    pub fn bakery(&self) -> &PlanCache {
        &self.bakery
    }

    pub fn for_session(&self, session: &Session) -> BakedResult {
        BakedResult::new(self.clone(), session.clone())
    }

    /// Run the whole pipeline against `session`; never touches the cache
    pub fn resolve_plan(&self, session: &Session) -> BakeryResult<Query> {
        self.pipeline.resolve(session)
    }

    /// Compile the pipeline (and any nested eager-load plans) and store the
    /// session-detached results. Nothing is stored when any compile fails.
    pub fn materialize_and_cache(&self, session: &Session) -> BakeryResult<Arc<QueryContext>> {
        let mut staged = Staged::new();
        let plan = self.bake(session, &mut staged)?;
        let entries = staged.len();
        for (key, context) in staged {
            self.bakery.insert(key, context);
        }
        tracing::debug!(
            cache_key = self.cache_key.fingerprint(),
            entries,
            "baked_query_materialized"
        );
        Ok(plan)
    }

    pub(crate) fn bake(&self, session: &Session, staged: &mut Staged) -> BakeryResult<Arc<QueryContext>> {
        let query = self.resolve_plan(session)?;
        let mut context = query.compile()?;
        self.bakery.record_compile();

        bake_subquery_loaders(self, session, &mut context, staged)?;

        context.session = None;
        context.query = context.query.with_session(None).strip_compile_state();
        let plan = Arc::new(context);
        staged.push((self.cache_key.clone(), Arc::clone(&plan)));
        Ok(plan)
    }
}

impl AddAssign<Step> for BakedQuery {
    fn add_assign(&mut self, step: Step) {
        self.add_criteria(step, &[]);
    }
}

impl Add<Step> for &BakedQuery {
    type Output = BakedQuery;

    fn add(self, step: Step) -> BakedQuery {
        self.with_criteria(step, &[])
    }
}
