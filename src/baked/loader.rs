use super::{BakedQuery, KeyArg, Seed, Step, StepId};
use crate::error::BakeryResult;
use crate::schema::{Direction, Relationship};
use crate::session::{Instance, Record, Session};
use crate::strategies::{
    finalize_load, identity_of, lazy_clause, LazyLoader, LoadOption, LoaderStrategy, Loaded,
    Passive, StrategyKey, StrategyRegistry,
};
use crate::value::Value;
use std::sync::Arc;

const SEED: StepId = StepId::new("baked_lazy.query");
const NO_EAGERS: StepId = StepId::new("baked_lazy.no_eagers");
const SECONDARY: StepId = StepId::new("baked_lazy.select_from_secondary");
const NO_AUTOFLUSH: StepId = StepId::new("baked_lazy.no_autoflush");
const CURRENT_PATH: StepId = StepId::new("baked_lazy.current_path");
const OPTIONS: StepId = StepId::new("baked_lazy.options");
const ORDER_BY: StepId = StepId::new("baked_lazy.order_by");
const REVERSE: StepId = StepId::new("baked_lazy.reverse_baked_lazyload");
const LAZY_CLAUSE: StepId = StepId::new("baked_lazy.lazy_clause");

/// Lazy loader that runs each relationship load through a baked query
/// cached on the relationship
#[derive(Debug, Default, Clone, Copy)]
pub struct BakedLazyLoader;

impl BakedLazyLoader {
    fn emit_lazyload(
        &self,
        session: &Session,
        rel: &Arc<Relationship>,
        state: &Instance,
        passive: Passive,
    ) -> BakeryResult<Loaded> {
        let target = rel.target.clone();
        let mut q = BakedQuery::new(
            rel.compiled_cache(),
            Seed::new(SEED, move |session: &Session| session.query(&target)),
        );
        q.add_criteria(
            Step::map(NO_EAGERS, |q| q.invoke_all_eagers(false)),
            &[KeyArg::Str(rel.qualified_name())],
        );

        if !rel.bake_queries {
            q.spoil();
        }

        if rel.secondary.is_some() {
            let rel = Arc::clone(rel);
            q.add_criteria(Step::map(SECONDARY, move |q| q.select_from_secondary(&rel)), &[]);
        }

        let pending = state.is_pending();
        if pending || passive.contains(Passive::NO_AUTOFLUSH) {
            q.add_criteria(Step::map(NO_AUTOFLUSH, |q| q.autoflush(false)), &[]);
        }

        if let Some(path) = state.load_path() {
            let path = path.child(&rel.key);
            q.spoil();
            q.add_criteria(
                Step::map(CURRENT_PATH, move |q| q.with_current_path(path.clone())),
                &[],
            );
        }

        let options = state.load_options();
        if !options.is_empty() {
            q.spoil();
            q.add_criteria(Step::map(OPTIONS, move |q| q.options(options.clone())), &[]);
        }

        if rel.use_get() {
            let ident = identity_of(session, rel, state)?;
            if ident.iter().any(Value::is_null) {
                return Ok(Loaded::One(None));
            }
            let record = q.for_session(session).get(&ident)?;
            return Ok(Loaded::One(record.and_then(Record::into_instance)));
        }

        if !rel.order_by.is_empty() {
            let order_by = rel.order_by.clone();
            q.add_criteria(
                Step::map(ORDER_BY, move |q| {
                    order_by.iter().cloned().fold(q, |q, o| q.order_by(o))
                }),
                &[],
            );
        }

        // Reverse many-to-ones configured as eager would reload the parent
        // this load starts from; keep them lazy
        let strategies = session.registry().strategies();
        for rev in session.registry().reverse_properties(rel) {
            let eager = strategies.get(rev.lazy).is_ok_and(|s| !s.is_lazy());
            if rev.direction == Direction::ManyToOne && rev.use_get() && eager {
                let key = rev.key.clone();
                q.add_criteria(
                    Step::map(REVERSE, move |q| {
                        let path = q.current_path().child(&key);
                        q.options([LoadOption::new(path, StrategyKey::BAKED_SELECT)])
                    }),
                    &[KeyArg::Str(rev.key.clone())],
                );
            }
        }

        let (clause, params) = lazy_clause(rel, state);
        if pending && params.has_null() {
            return Ok(Loaded::empty(rel.uselist));
        }
        q.add_criteria(Step::map(LAZY_CLAUSE, move |q| q.filter(clause.clone())), &[]);

        let records = q.for_session(session).with_bound(&params).all()?;
        Ok(finalize_load(rel, records))
    }
}

impl LoaderStrategy for BakedLazyLoader {
    fn name(&self) -> &'static str {
        "baked_select"
    }

    fn load(
        &self,
        session: &Session,
        relationship: &Arc<Relationship>,
        state: &Instance,
        passive: Passive,
    ) -> BakeryResult<Loaded> {
        self.emit_lazyload(session, relationship, state, passive)
    }
}

/// Install [`BakedLazyLoader`] as the default `select` strategy
pub fn bake_lazy_loaders(strategies: &StrategyRegistry) {
    strategies.register(StrategyKey::SELECT, Arc::new(BakedLazyLoader));
}

/// Restore the plain [`LazyLoader`] as the default `select` strategy
pub fn unbake_lazy_loaders(strategies: &StrategyRegistry) {
    strategies.register(StrategyKey::SELECT, Arc::new(LazyLoader));
}
