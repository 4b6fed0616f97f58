use super::{LoaderStrategy, Loaded, Passive};
use crate::error::BakeryResult;
use crate::query::{col, Expr};
use crate::schema::Relationship;
use crate::session::{Instance, Record, Session};
use crate::value::{Params, Value};
use std::sync::Arc;

/// Lazy-load predicate for `rel` from `state`: one bind per parent join
/// column, named `lazy_<column>`, compared against the target (or
/// association) table
pub(crate) fn lazy_clause(rel: &Relationship, state: &Instance) -> (Expr, Params) {
    let mut params = Params::new();
    let mut terms = Vec::new();
    let pairs: Vec<(String, String, String)> = match &rel.secondary {
        Some(sec) => sec
            .parent_pairs
            .iter()
            .map(|(p, s)| (p.clone(), sec.table.clone(), s.clone()))
            .collect(),
        None => rel
            .pairs
            .iter()
            .map(|(p, t)| (p.clone(), rel.target_table().to_string(), t.clone()))
            .collect(),
    };
    for (parent_column, table, column) in pairs {
        let bind = format!("lazy_{parent_column}");
        params.insert(&bind, state.get(&parent_column).unwrap_or(Value::Null));
        terms.push(col(&table, &column).eq(Expr::bind(&bind)));
    }
    let clause = Expr::all(terms).unwrap_or(Expr::Literal(Value::Bool(false)));
    (clause, params)
}

/// Target identity referenced by a many-to-one `use_get` relationship, in
/// target primary-key order
pub(crate) fn identity_of(
    session: &Session,
    rel: &Relationship,
    state: &Instance,
) -> BakeryResult<Vec<Value>> {
    let target = session.registry().mapper(&rel.target)?;
    Ok(target
        .primary_key_columns()
        .iter()
        .map(|pk| {
            rel.pairs
                .iter()
                .find(|(_, t)| t == pk)
                .and_then(|(p, _)| state.get(p))
                .unwrap_or(Value::Null)
        })
        .collect())
}

/// Shape loaded records for the relationship; scalar relationships keep
/// the first row and warn when more came back
pub(crate) fn finalize_load(rel: &Relationship, records: Vec<Record>) -> Loaded {
    let instances: Vec<Instance> = records.into_iter().filter_map(Record::into_instance).collect();
    if rel.uselist {
        return Loaded::Many(instances);
    }
    if instances.len() > 1 {
        tracing::warn!(
            relationship = %rel.qualified_name(),
            rows = instances.len(),
            "Multiple rows returned with uselist=False for lazily-loaded attribute"
        );
    }
    Loaded::One(instances.into_iter().next())
}

/// Emits a plain query per relationship access
#[derive(Debug, Default, Clone, Copy)]
pub struct LazyLoader;

impl LoaderStrategy for LazyLoader {
    fn name(&self) -> &'static str {
        "select"
    }

    fn load(
        &self,
        session: &Session,
        relationship: &Arc<Relationship>,
        state: &Instance,
        passive: Passive,
    ) -> BakeryResult<Loaded> {
        let rel = relationship.as_ref();
        let pending = state.is_pending();

        let mut q = session.query(&rel.target)?.invoke_all_eagers(false);
        if pending || passive.contains(Passive::NO_AUTOFLUSH) {
            q = q.autoflush(false);
        }
        if let Some(path) = state.load_path() {
            q = q
                .with_current_path(path.child(&rel.key))
                .options(state.load_options());
        }

        if rel.use_get() {
            let ident = identity_of(session, rel, state)?;
            if ident.iter().any(Value::is_null) {
                return Ok(Loaded::One(None));
            }
            return Ok(Loaded::One(q.get(&ident)?.and_then(Record::into_instance)));
        }

        q = q.select_from_secondary(rel);
        for order in &rel.order_by {
            q = q.order_by(order.clone());
        }

        let (clause, params) = lazy_clause(rel, state);
        if pending && params.has_null() {
            return Ok(Loaded::empty(rel.uselist));
        }
        let records = q.filter(clause).execute(&params)?;
        Ok(finalize_load(rel, records))
    }
}
