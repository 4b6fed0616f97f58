//! Baked query caching: keys, plan reuse, spoiling, forks and result helpers.

use bakery::baked::{BakedQuery, KeyArg, PlanCache, Seed, Step};
use bakery::fixtures;
use bakery::query::{col, Expr};
use bakery::{BakeryError, Record, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(|r| r.get("id")).collect()
}

fn names(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(|r| r.get("name")).collect()
}

fn ordered_users(bakery: &PlanCache) -> BakedQuery {
    let mut bq = BakedQuery::new(bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("users.order_by_id", |q| q.order_by(col("users", "id").asc())),
        &[],
    );
    bq
}

fn by_name(bakery: &PlanCache) -> BakedQuery {
    let mut bq = BakedQuery::new(bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("users.by_name", |q| {
            q.filter(col("users", "name").eq(Expr::bind("name")))
        }),
        &[],
    );
    bq
}

// ============================================================================
// Cache keys
// ============================================================================

#[test]
fn test_identical_pipelines_share_a_key() {
    let bakery = PlanCache::lru(10);
    assert_eq!(ordered_users(&bakery).cache_key(), ordered_users(&bakery).cache_key());
    assert_ne!(ordered_users(&bakery).cache_key(), by_name(&bakery).cache_key());
}

#[test]
fn test_step_order_changes_the_key() {
    let bakery = PlanCache::lru(10);
    let a = Step::map("a", |q| q.limit(3));
    let b = Step::map("b", |q| q.offset(1));

    let mut ab = BakedQuery::new(&bakery, Seed::entity("User"));
    ab.add_criteria(a.clone(), &[]).add_criteria(b.clone(), &[]);
    let mut ba = BakedQuery::new(&bakery, Seed::entity("User"));
    ba.add_criteria(b, &[]).add_criteria(a, &[]);

    assert_ne!(ab.cache_key(), ba.cache_key());
}

#[test]
fn test_step_args_discriminate() {
    let bakery = PlanCache::lru(10);
    let step = || Step::map("users.limit", |q| q.limit(2));
    let mut two = BakedQuery::new(&bakery, Seed::entity("User"));
    two.add_criteria(step(), &[KeyArg::Int(2)]);
    let mut three = BakedQuery::new(&bakery, Seed::entity("User"));
    three.add_criteria(step(), &[KeyArg::Int(3)]);
    assert_ne!(two.cache_key(), three.cache_key());
    assert_eq!(two.cache_key().to_string(), "[query:User, users.limit, 2]");
}

// ============================================================================
// Plan reuse
// ============================================================================

#[test]
fn test_second_execution_reuses_plan() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = ordered_users(&bakery);

    let first = bq.for_session(&session).all().unwrap();
    assert_eq!(
        ids(&first),
        vec![Value::Int64(7), Value::Int64(8), Value::Int64(9), Value::Int64(10)]
    );
    assert_eq!(bakery.len(), 1);
    assert_eq!(bakery.stats().compiles, 1);

    let second = bq.for_session(&session).all().unwrap();
    assert_eq!(ids(&first), ids(&second));

    let stats = bakery.stats();
    assert_eq!(stats.compiles, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_plan_is_shared_across_sessions() {
    let bakery = PlanCache::lru(10);
    let bq = ordered_users(&bakery);

    let a = bq.for_session(&fixtures::session()).all().unwrap();
    let b = bq.for_session(&fixtures::session()).all().unwrap();
    assert_eq!(ids(&a), ids(&b));
    assert_eq!(bakery.stats().compiles, 1);
}

#[test]
fn test_steps_run_once_until_spoiled() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = {
        let calls = Arc::clone(&calls);
        Step::map("users.counted", move |q| {
            calls.fetch_add(1, Ordering::SeqCst);
            q
        })
    };
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(counted, &[]);

    for _ in 0..3 {
        assert_eq!(bq.for_session(&session).all().unwrap().len(), 4);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    bq.spoil();
    for _ in 0..3 {
        assert_eq!(bq.for_session(&session).all().unwrap().len(), 4);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(bakery.len(), 1);
}

#[test]
fn test_spoiled_query_never_stores() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let mut bq = ordered_users(&bakery);
    bq.spoil();

    assert_eq!(bq.for_session(&session).all().unwrap().len(), 4);
    assert!(bakery.is_empty());
    assert_eq!(bakery.stats().misses, 0);
}

#[test]
fn test_params_are_not_part_of_the_key() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = by_name(&bakery);

    for (name, id) in [("jack", 7), ("ed", 8), ("fred", 9)] {
        let user = bq
            .for_session(&session)
            .param("name", name)
            .unwrap()
            .one()
            .unwrap();
        assert_eq!(user.get("id"), Some(Value::Int64(id)));
    }
    assert_eq!(bakery.len(), 1);
    assert_eq!(bakery.stats().compiles, 1);
}

#[test]
fn test_missing_param_is_reported() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let err = by_name(&bakery).for_session(&session).all().unwrap_err();
    assert_eq!(err, BakeryError::UnboundParameter("name".to_string()));
}

#[test]
fn test_initial_args_separate_entries() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    for tenant in ["a", "b", "a"] {
        let bq = BakedQuery::with_args(&bakery, Seed::entity("User"), &[KeyArg::from(tenant)]);
        bq.for_session(&session).all().unwrap();
    }
    assert_eq!(bakery.len(), 2);
    assert_eq!(bakery.stats().compiles, 2);
}

// ============================================================================
// Forks
// ============================================================================

#[test]
fn test_exclusive_branches() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let base = ordered_users(&bakery);

    let low = &base + Step::map("users.low_ids", |q| q.filter(col("users", "id").lt(9)));
    let high = &base + Step::map("users.high_ids", |q| q.filter(col("users", "id").ge(9)));

    assert_eq!(
        names(&low.for_session(&session).all().unwrap()),
        vec![Value::string("jack"), Value::string("ed")]
    );
    assert_eq!(
        names(&high.for_session(&session).all().unwrap()),
        vec![Value::string("fred"), Value::string("chuck")]
    );
    assert_eq!(base.for_session(&session).all().unwrap().len(), 4);
    assert_eq!(bakery.len(), 3);
}

#[test]
fn test_count_step() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let counted = &ordered_users(&bakery) + Step::map("users.count", |q| q.order_by_none().count());

    let rows = counted.for_session(&session).all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("count_1"), Some(Value::Int64(4)));
}

#[test]
fn test_first_on_count_returns_full_count() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let counted = &ordered_users(&bakery) + Step::map("users.count", |q| q.order_by_none().count());

    let row = counted.for_session(&session).first().unwrap().unwrap();
    assert_eq!(row.get("count_1"), Some(Value::Int64(4)));

    let skipped = &counted + Step::map("users.skip_one", |q| q.offset(1));
    assert!(skipped.for_session(&session).all().unwrap().is_empty());
}

#[test]
fn test_column_projection_uses_labels() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = BakedQuery::new(
        &bakery,
        Seed::new("users.names", |session: &bakery::Session| {
            session.query_columns("User", &["name"])
        }),
    );
    let rows = bq.for_session(&session).all().unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows[0].as_row().unwrap().get("users_name").is_some());
}

// ============================================================================
// first / one / get
// ============================================================================

#[test]
fn test_first_does_not_modify_the_query() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = ordered_users(&bakery);

    let first = bq.for_session(&session).first().unwrap().unwrap();
    assert_eq!(first.get("name"), Some(Value::string("jack")));
    assert_eq!(bq.steps().len(), 2);
    assert_eq!(bq.for_session(&session).all().unwrap().len(), 4);
    assert_eq!(bakery.len(), 2);
}

#[test]
fn test_first_on_empty_result() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let none = by_name(&bakery)
        .for_session(&session)
        .param("name", "nobody")
        .unwrap()
        .first()
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_one_errors() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();

    let err = by_name(&bakery)
        .for_session(&session)
        .param("name", "nobody")
        .unwrap()
        .one()
        .unwrap_err();
    assert!(matches!(err, BakeryError::NoResultFound(_)));

    let err = ordered_users(&bakery).for_session(&session).one().unwrap_err();
    assert!(matches!(err, BakeryError::MultipleResultsFound(_)));
}

#[test]
fn test_get_loads_by_primary_key() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = BakedQuery::new(&bakery, Seed::entity("User"));

    let ed = bq.for_session(&session).get(&[Value::Int64(8)]).unwrap().unwrap();
    assert_eq!(ed.get("name"), Some(Value::string("ed")));
    let fred = bq.for_session(&session).get(&[Value::Int64(9)]).unwrap().unwrap();
    assert_eq!(fred.get("name"), Some(Value::string("fred")));

    // One plan for every non-null identity
    assert_eq!(bakery.stats().compiles, 1);
    assert!(bq.for_session(&session).get(&[Value::Int64(99)]).unwrap().is_none());
}

#[test]
fn test_get_prefers_identity_map() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = BakedQuery::new(&bakery, Seed::entity("User"));

    let all = bq.for_session(&session).all().unwrap();
    let executed = session.execution_count();

    let jack = bq.for_session(&session).get(&[Value::Int64(7)]).unwrap().unwrap();
    assert_eq!(session.execution_count(), executed);
    assert_eq!(jack.instance(), all[0].instance());

    // load_on_ident always emits a statement
    bq.for_session(&session).load_on_ident(&[Value::Int64(7)]).unwrap();
    assert_eq!(session.execution_count(), executed + 1);
}

#[test]
fn test_get_null_identity_uses_separate_plan() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = BakedQuery::new(&bakery, Seed::entity("User"));

    bq.for_session(&session).get(&[Value::Int64(8)]).unwrap();
    assert!(bq.for_session(&session).get(&[Value::Null]).unwrap().is_none());
    assert_eq!(bakery.stats().compiles, 2);
    assert_eq!(bakery.len(), 2);
}

#[test]
fn test_get_rejects_filtered_query() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let err = by_name(&bakery)
        .for_session(&session)
        .get(&[Value::Int64(7)])
        .unwrap_err();
    assert!(matches!(err, BakeryError::InvalidQuery(_)));
}

#[test]
fn test_get_wrong_arity() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let bq = BakedQuery::new(&bakery, Seed::entity("User"));
    let err = bq
        .for_session(&session)
        .get(&[Value::Int64(7), Value::Int64(8)])
        .unwrap_err();
    assert!(matches!(err, BakeryError::InvalidQuery(_)));
}

// ============================================================================
// Session interaction
// ============================================================================

#[test]
fn test_autoflush_before_baked_execution() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let wendy = session
        .new_instance("User", &[("name", Value::string("wendy"))])
        .unwrap();
    session.add(&wendy);

    let users = ordered_users(&bakery).for_session(&session).all().unwrap();
    assert_eq!(users.len(), 5);
    assert_eq!(users[4].instance(), Some(&wendy));
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn test_no_autoflush_step() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let wendy = session
        .new_instance("User", &[("name", Value::string("wendy"))])
        .unwrap();
    session.add(&wendy);

    let bq = &ordered_users(&bakery) + Step::map("users.no_autoflush", |q| q.autoflush(false));
    assert_eq!(bq.for_session(&session).all().unwrap().len(), 4);
    assert_eq!(session.pending_count(), 1);
}

#[test]
fn test_step_error_propagates_and_caches_nothing() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(Step::new("users.bad_join", |q| q.join("nonexistent")), &[]);

    let err = bq.for_session(&session).all().unwrap_err();
    assert!(matches!(err, BakeryError::UnknownRelationship { .. }));
    assert!(bakery.is_empty());
}

#[test]
fn test_composite_identity_null_component() {
    use bakery::schema::{Mapper, MapperRegistry};

    let registry = MapperRegistry::new()
        .register(
            Mapper::new("OrderItem", "order_items")
                .column("order_id")
                .column("item_id")
                .primary_key(&["order_id", "item_id"]),
        )
        .configure()
        .unwrap();
    let session = bakery::Session::new(fixtures::database(), registry);
    let bakery = PlanCache::lru(10);
    let bq = BakedQuery::new(&bakery, Seed::entity("OrderItem"));

    let found = bq
        .for_session(&session)
        .get(&[Value::Int64(1), Value::Int64(2)])
        .unwrap();
    assert!(found.is_some());
    let missing = bq
        .for_session(&session)
        .get(&[Value::Int64(1), Value::Null])
        .unwrap();
    assert!(missing.is_none());

    // Two plans: equality for both columns, and IS NULL for item_id
    let statements: Vec<String> = bakery
        .keys()
        .iter()
        .map(|k| bakery.get(k).unwrap().statement.to_string())
        .collect();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("order_items.item_id = :item_id"), "{statements:?}");
    assert!(statements[1].contains("order_items.item_id IS NULL"), "{statements:?}");
    assert!(statements[1].contains("order_items.order_id = :order_id"), "{statements:?}");
}
