//! Named build steps and the pipeline that runs them.

use crate::error::BakeryResult;
use crate::query::Query;
use crate::session::Session;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Stable identity of a build step. Two steps with the same id are assumed
/// to produce the same query shape; dynamically built steps that share an id
/// must add discriminator args or spoil the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(Cow<'static, str>);

impl StepId {
    pub const fn new(name: &'static str) -> Self {
        StepId(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for StepId {
    fn from(name: &'static str) -> Self {
        StepId(Cow::Borrowed(name))
    }
}

impl From<String> for StepId {
    fn from(name: String) -> Self {
        StepId(Cow::Owned(name))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SeedFn = dyn Fn(&Session) -> BakeryResult<Query> + Send + Sync;
type StepFn = dyn Fn(Query) -> BakeryResult<Query> + Send + Sync;

/// First step of a pipeline: builds the initial query from a session
#[derive(Clone)]
pub struct Seed {
    id: StepId,
    build: Arc<SeedFn>,
}

impl Seed {
    pub fn new(
        id: impl Into<StepId>,
        build: impl Fn(&Session) -> BakeryResult<Query> + Send + Sync + 'static,
    ) -> Self {
        Seed {
            id: id.into(),
            build: Arc::new(build),
        }
    }

    /// `session.query(entity)`, identified as `query:<entity>`
    pub fn entity(entity: &'static str) -> Self {
        Seed::new(format!("query:{entity}"), move |session| session.query(entity))
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn apply(&self, session: &Session) -> BakeryResult<Query> {
        (self.build)(session)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({})", self.id)
    }
}

/// A query transformation appended after the seed
#[derive(Clone)]
pub struct Step {
    id: StepId,
    build: Arc<StepFn>,
}

impl Step {
    pub fn new(
        id: impl Into<StepId>,
        build: impl Fn(Query) -> BakeryResult<Query> + Send + Sync + 'static,
    ) -> Self {
        Step {
            id: id.into(),
            build: Arc::new(build),
        }
    }

    /// Step that cannot fail
    pub fn map(id: impl Into<StepId>, build: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        Step::new(id, move |q| Ok(build(q)))
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn apply(&self, query: Query) -> BakeryResult<Query> {
        (self.build)(query)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({})", self.id)
    }
}

/// Seed plus ordered steps
#[derive(Debug, Clone)]
pub struct StepPipeline {
    seed: Seed,
    steps: Vec<Step>,
}

impl StepPipeline {
    pub fn new(seed: Seed) -> Self {
        StepPipeline {
            seed,
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of functions including the seed
    pub fn len(&self) -> usize {
        self.steps.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Run the seed against `session`, then every step in order
    pub fn resolve(&self, session: &Session) -> BakeryResult<Query> {
        let mut query = self.seed.apply(session)?;
        for step in &self.steps {
            query = step.apply(query)?;
        }
        tracing::trace!(seed = %self.seed.id, steps = self.steps.len(), "pipeline_resolved");
        Ok(query)
    }
}
