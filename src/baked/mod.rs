//! # Baked Queries
//!
//! Caches the compiled plan of a query-building pipeline so that repeated
//! executions of the same pipeline shape skip building and compiling.
//!
//! ## How a pipeline is keyed
//!
//! A [`BakedQuery`] is a [`Seed`] followed by [`Step`]s. Every seed and step
//! carries a [`StepId`] chosen by the caller; the [`CacheKey`] is those ids
//! in order, interleaved with any [`KeyArg`] discriminators passed when the
//! step was appended. Bound parameter values are never part of the key, so
//! one plan serves every parameter set.
//!
//! ```text
//! BakedQuery::with_args(bakery, seed, [a])   key: [a, seed]
//!   .add_criteria(filter, [])                key: [a, seed, filter]
//!   .add_criteria(by_pk, [Flags(f, t)])      key: [a, seed, filter, by_pk, (f, t)]
//! ```
//!
//! ## Execution
//!
//! [`BakedResult::all`] looks the key up in the [`PlanCache`]; on a miss
//! the pipeline is resolved, compiled, detached from the session and stored
//! together with the plans of its nested eager loads. The stored plan is
//! never mutated: each execution clones it, rebinds the session, restores
//! nested loads and runs it with the bound parameters.
//!
//! A [spoiled](BakedQuery::spoil) query skips the cache entirely and
//! rebuilds its pipeline on every execution.

mod cache;
mod key;
mod loader;
mod query;
mod result;
mod step;
mod subquery;

pub use cache::{CacheStats, PlanCache};
pub use key::{CacheKey, KeyArg, KeyPart};
pub use loader::{bake_lazy_loaders, unbake_lazy_loaders, BakedLazyLoader};
pub use query::BakedQuery;
pub use result::BakedResult;
pub use step::{Seed, Step, StepId, StepPipeline};
