//! # Bakery
//!
//! Plan caching for query-building pipelines. A query is described as a
//! seed plus a chain of identified steps; the compiled plan is cached by the
//! identities of those steps, so executing the same pipeline shape again
//! skips both building and compiling.
//!
//! ## Architecture
//!
//! ```text
//! BakedQuery (seed + steps, CacheKey)
//!     ↓ for_session + params
//! BakedResult ──hit──→ PlanCache ──→ QueryContext (session-detached plan)
//!     │ miss                              ↓ copy, rebind session
//!     ↓                               Session::execute
//! resolve pipeline → Query::compile → Statement → query::execute(Snapshot)
//!                         ↓
//!               nested subquery loads baked under key + path
//! ```
//!
//! Relationship lazy loads can run through the same machinery: with
//! `loading.bake_lazy_loaders` set, [`baked::BakedLazyLoader`] becomes the
//! default `select` strategy and every relationship caches its load plans.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bakery::baked::{BakedQuery, PlanCache, Seed, Step};
//! use bakery::query::{col, Expr};
//!
//! let bakery = PlanCache::default();
//! let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
//! bq.add_criteria(Step::map("user.by_name", |q| q.filter(col("users", "name").eq(Expr::bind("name")))), &[]);
//!
//! let ed = bq.for_session(&session).param("name", "ed")?.one()?;
//! ```

pub mod baked;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod logging;
pub mod query;
pub mod schema;
pub mod session;
pub mod storage;
pub mod strategies;
pub mod value;

pub use baked::{BakedQuery, BakedResult, CacheKey, KeyArg, PlanCache, Seed, Step, StepId};
pub use config::Config;
pub use error::{BakeryError, BakeryResult};
pub use query::Query;
pub use schema::{Mapper, MapperRegistry, Relationship};
pub use session::{Instance, Record, Session};
pub use storage::Database;
pub use value::{Params, Value};
