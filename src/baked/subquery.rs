//! Baking and restoring nested eager-load plans.
//!
//! A compiled plan lists its nested loads as typed [`SubqueryLoad`]
//! descriptors. Baking compiles each nested query under the parent key
//! extended by the load path, recursively; restoring turns each baked
//! descriptor back into a [`BakedResult`] bound to the live session and
//! parameter set.

use super::query::Staged;
use super::BakedQuery;
use crate::error::BakeryResult;
use crate::query::{QueryContext, SubqueryLoad, SubquerySource};
use crate::session::Session;
use crate::value::Params;
use std::sync::Arc;

pub(crate) fn bake_subquery_loaders(
    bq: &BakedQuery,
    session: &Session,
    context: &mut QueryContext,
    staged: &mut Staged,
) -> BakeryResult<()> {
    for load in &mut context.subquery_loads {
        let SubqueryLoad { path, source, .. } = load;
        let query = match source {
            SubquerySource::Query(query) => query.clone(),
            _ => continue,
        };
        let cache_key = bq.cache_key().with_path(path);
        BakedQuery::pinned(bq.bakery(), cache_key.clone(), query.clone()).bake(session, staged)?;
        tracing::debug!(
            path = %path,
            cache_key = cache_key.fingerprint(),
            "subquery_plan_baked"
        );
        *source = SubquerySource::Baked {
            cache_key,
            query: query.with_session(None).strip_compile_state(),
        };
    }
    Ok(())
}

pub(crate) fn unbake_subquery_loaders(
    bq: &BakedQuery,
    session: &Session,
    context: &mut QueryContext,
    params: &Params,
) {
    for load in &mut context.subquery_loads {
        let (cache_key, query) = match &load.source {
            SubquerySource::Baked { cache_key, query } => (cache_key.clone(), query.clone()),
            _ => continue,
        };
        let result = BakedQuery::pinned(bq.bakery(), cache_key, query)
            .for_session(session)
            .with_bound(params);
        load.source = SubquerySource::Live(Arc::new(result));
    }
}
