use super::{LazyLoader, LoaderStrategy, Loaded, Passive};
use crate::error::BakeryResult;
use crate::schema::Relationship;
use crate::session::{Instance, Session};
use std::sync::Arc;

/// Eager loading through a nested query emitted alongside the parent
/// query. The compiler does the work; an attribute the nested query did not
/// populate (the parent was pending, or loaded by another query) falls back
/// to a lazy load.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubqueryLoader;

impl LoaderStrategy for SubqueryLoader {
    fn name(&self) -> &'static str {
        "subquery"
    }

    fn is_lazy(&self) -> bool {
        false
    }

    fn load(
        &self,
        session: &Session,
        relationship: &Arc<Relationship>,
        state: &Instance,
        passive: Passive,
    ) -> BakeryResult<Loaded> {
        LazyLoader.load(session, relationship, state, passive)
    }
}
