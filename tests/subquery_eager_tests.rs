//! Subquery eager loading, plain and through baked plans.

use bakery::baked::{BakedQuery, KeyPart, PlanCache, Seed, Step};
use bakery::config::Config;
use bakery::fixtures;
use bakery::query::{col, Expr};
use bakery::schema::{Mapper, MapperRegistry, Relationship};
use bakery::strategies::{LoadOption, StrategyKey};
use bakery::{Instance, Record, Session, Value};

fn ints(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|&i| Value::Int64(i)).collect()
}

fn loaded_ids(instance: &Instance, key: &str) -> Vec<Value> {
    instance
        .loaded(key)
        .map(|l| l.instances())
        .unwrap_or_default()
        .iter()
        .filter_map(|i| i.get("id"))
        .collect()
}

fn instances(records: &[Record]) -> Vec<Instance> {
    records.iter().filter_map(Record::instance).cloned().collect()
}

fn eager_orders_and_items(bakery: &PlanCache) -> BakedQuery {
    let mut bq = BakedQuery::new(bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("users.eager_orders_items", |q| {
            q.options([
                LoadOption::subqueryload(&["orders"]),
                LoadOption::subqueryload(&["orders", "items"]),
            ])
            .order_by(col("users", "id").asc())
        }),
        &[],
    );
    bq
}

fn assert_orders_and_items(users: &[Instance]) {
    assert_eq!(users.len(), 4);
    assert_eq!(loaded_ids(&users[0], "orders"), ints(&[1, 3, 5]));
    assert_eq!(loaded_ids(&users[1], "orders"), ints(&[]));
    assert_eq!(loaded_ids(&users[2], "orders"), ints(&[2, 4]));
    assert!(users[3].is_loaded("orders"));

    let jack_orders = users[0].loaded("orders").unwrap().instances();
    assert_eq!(loaded_ids(&jack_orders[0], "items"), ints(&[1, 2, 3]));
    assert_eq!(loaded_ids(&jack_orders[1], "items"), ints(&[3, 4, 5]));
    assert_eq!(loaded_ids(&jack_orders[2], "items"), ints(&[5]));
}

// ============================================================================
// Unbaked
// ============================================================================

#[test]
fn test_subqueryload_option_populates_collections() {
    let session = fixtures::session();
    let users = session
        .query("User")
        .unwrap()
        .options([LoadOption::subqueryload(&["addresses"])])
        .order_by(col("users", "id").asc())
        .all()
        .unwrap();
    let users = instances(&users);
    assert_eq!(session.execution_count(), 2);

    assert_eq!(loaded_ids(&users[0], "addresses"), ints(&[1]));
    assert_eq!(loaded_ids(&users[1], "addresses"), ints(&[2, 3, 4]));
    assert_eq!(loaded_ids(&users[2], "addresses"), ints(&[5]));
    assert_eq!(loaded_ids(&users[3], "addresses"), ints(&[]));

    // Already populated: no further statements
    users[1].load(&session, "addresses").unwrap();
    assert_eq!(session.execution_count(), 2);
}

#[test]
fn test_nested_subqueryload() {
    let session = fixtures::session();
    let bakery = PlanCache::lru(10);
    let mut bq = eager_orders_and_items(&bakery);
    bq.spoil();

    let users = instances(&bq.for_session(&session).all().unwrap());
    assert_orders_and_items(&users);
    assert_eq!(session.execution_count(), 3);
    assert!(bakery.is_empty());
}

#[test]
fn test_subquery_respects_parent_limit() {
    let session = fixtures::session();
    let users = session
        .query("User")
        .unwrap()
        .options([LoadOption::subqueryload(&["addresses"])])
        .order_by(col("users", "id").asc())
        .limit(2)
        .all()
        .unwrap();
    assert_eq!(users.len(), 2);

    // Only addresses of the two selected users were loaded
    let users = session.registry().mapper("User").unwrap();
    assert!(session.identity_lookup(users, &[Value::Int64(9)]).is_none());
    assert_eq!(session.identity_map_len(), 2 + 4);
}

#[test]
fn test_configured_subquery_strategy() {
    let registry = MapperRegistry::new()
        .register(
            Mapper::new("User", "users")
                .column("id")
                .column("name")
                .primary_key(&["id"])
                .relationship(
                    Relationship::one_to_many("addresses", "User", "Address")
                        .on("id", "user_id")
                        .order_by(col("addresses", "id").desc())
                        .lazy(StrategyKey::SUBQUERY),
                ),
        )
        .register(
            Mapper::new("Address", "addresses")
                .column("id")
                .column("user_id")
                .column("email_address")
                .primary_key(&["id"]),
        )
        .configure_with(&Config::default())
        .unwrap();
    let session = Session::new(fixtures::database(), registry);

    let ed = session
        .query("User")
        .unwrap()
        .filter_by("id", 8)
        .all()
        .unwrap();
    assert_eq!(loaded_ids(ed[0].instance().unwrap(), "addresses"), ints(&[4, 3, 2]));

    // lazyload() turns it off for one query
    session.expunge_all();
    let ed = session
        .query("User")
        .unwrap()
        .filter_by("id", 8)
        .options([LoadOption::lazyload(&["addresses"])])
        .all()
        .unwrap();
    let ed = ed[0].instance().unwrap();
    assert!(!ed.is_loaded("addresses"));
    assert_eq!(ed.load(&session, "addresses").unwrap().len(), 3);
}

#[test]
fn test_subquery_load_with_bound_params() {
    let session = fixtures::session();
    let bakery = PlanCache::lru(10);
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("users.by_name_eager", |q| {
            q.filter(col("users", "name").eq(Expr::bind("name")))
                .options([LoadOption::subqueryload(&["addresses"])])
        }),
        &[],
    );

    for (name, expected) in [("ed", vec![2, 3, 4]), ("fred", vec![5])] {
        let user = bq
            .for_session(&session)
            .param("name", name)
            .unwrap()
            .one()
            .unwrap();
        assert_eq!(loaded_ids(user.instance().unwrap(), "addresses"), ints(&expected));
    }
    assert_eq!(bakery.len(), 2);
    assert_eq!(bakery.stats().compiles, 2);
}

// ============================================================================
// Baked
// ============================================================================

#[test]
fn test_baked_subqueryload_caches_nested_plans() {
    let bakery = PlanCache::lru(10);
    let bq = eager_orders_and_items(&bakery);

    let session = fixtures::session();
    assert_orders_and_items(&instances(&bq.for_session(&session).all().unwrap()));
    assert_eq!(bakery.len(), 3);
    assert_eq!(bakery.stats().compiles, 3);

    let paths: Vec<String> = bakery
        .keys()
        .iter()
        .filter_map(|k| match k.parts().last() {
            Some(KeyPart::Path(path)) => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert!(paths.contains(&"orders".to_string()), "{paths:?}");
    assert!(paths.contains(&"orders.items".to_string()), "{paths:?}");

    // Every nested key extends the parent key
    for key in bakery.keys() {
        assert!(key.parts().starts_with(bq.cache_key().parts()));
    }
}

#[test]
fn test_baked_subqueryload_reuses_plans() {
    let bakery = PlanCache::lru(10);
    let bq = eager_orders_and_items(&bakery);

    for _ in 0..3 {
        let session = fixtures::session();
        assert_orders_and_items(&instances(&bq.for_session(&session).all().unwrap()));
        assert_eq!(session.execution_count(), 3);
    }
    assert_eq!(bakery.stats().compiles, 3);
    assert_eq!(bakery.len(), 3);
}

#[test]
fn test_cached_plan_is_not_bound_to_a_session() {
    let bakery = PlanCache::lru(10);
    let bq = eager_orders_and_items(&bakery);
    bq.for_session(&fixtures::session()).all().unwrap();

    for key in bakery.keys() {
        let plan = bakery.get(&key).unwrap();
        assert!(plan.session.is_none());
        assert!(plan.query.session().is_none());
    }
}

#[test]
fn test_failed_eager_pipeline_stores_nothing() {
    let bakery = PlanCache::lru(10);
    let session = fixtures::session();
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::new("users.eager_bad", |q| {
            q.options([LoadOption::subqueryload(&["orders"])])
                .join("nonexistent")
        }),
        &[],
    );
    assert!(bq.for_session(&session).all().is_err());
    assert!(bakery.is_empty());
}
