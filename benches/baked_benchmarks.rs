//! Baked vs. unbaked query benchmarks: lookups, step-heavy pipelines, lazy loads.

use bakery::baked::{BakedQuery, PlanCache, Seed, Step};
use bakery::config::Config;
use bakery::fixtures;
use bakery::query::{col, Expr};
use bakery::strategies::LoadOption;
use bakery::{Session, Value};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::time::Duration;

fn by_name_query(session: &Session, name: &str) -> Vec<bakery::Record> {
    session
        .query("User")
        .expect("mapper")
        .filter(col("users", "name").eq(Expr::bind("name")))
        .order_by(col("users", "id").asc())
        .execute(&bakery::Params::new().with("name", name))
        .expect("query")
}

fn bench_lookup(c: &mut Criterion) {
    let session = fixtures::session();
    let bakery = PlanCache::default();
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("bench.by_name", |q| {
            q.filter(col("users", "name").eq(Expr::bind("name")))
                .order_by(col("users", "id").asc())
        }),
        &[],
    );

    let mut group = c.benchmark_group("lookup_by_name");
    group.bench_function("unbaked", |b| {
        b.iter(|| black_box(by_name_query(&session, "ed")));
    });
    group.bench_function("baked", |b| {
        b.iter(|| {
            black_box(
                bq.for_session(&session)
                    .param("name", "ed")
                    .expect("param")
                    .all()
                    .expect("baked"),
            )
        });
    });
    group.finish();
}

fn bench_pipeline_length(c: &mut Criterion) {
    let session = fixtures::session();
    let mut group = c.benchmark_group("pipeline_length");

    for steps in [1usize, 8, 32] {
        let bakery = PlanCache::default();
        let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
        for i in 0..steps {
            bq.add_criteria(
                Step::map(format!("bench.step_{i}"), |q| {
                    q.filter(col("users", "id").ge(0)).order_by_none()
                }),
                &[],
            );
        }

        group.bench_with_input(BenchmarkId::new("baked", steps), &steps, |b, _| {
            b.iter(|| black_box(bq.for_session(&session).all().expect("baked")));
        });

        let mut spoiled = bq.clone();
        spoiled.spoil();
        group.bench_with_input(BenchmarkId::new("spoiled", steps), &steps, |b, _| {
            b.iter(|| black_box(spoiled.for_session(&session).all().expect("spoiled")));
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let bakery = PlanCache::default();
    let bq = BakedQuery::new(&bakery, Seed::entity("User"));

    let mut group = c.benchmark_group("get_by_pk");
    group.bench_function("baked_load_on_ident", |b| {
        let session = fixtures::session();
        b.iter(|| {
            black_box(
                bq.for_session(&session)
                    .load_on_ident(&[Value::Int64(8)])
                    .expect("get"),
            )
        });
    });
    group.bench_function("unbaked_identity_criterion", |b| {
        let session = fixtures::session();
        b.iter(|| {
            session.expunge_all();
            black_box(
                session
                    .query("User")
                    .expect("mapper")
                    .get(&[Value::Int64(8)])
                    .expect("get"),
            )
        });
    });
    group.finish();
}

fn bench_lazy_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("lazy_load_addresses");

    for baked in [false, true] {
        let mut config = Config::default();
        config.loading.bake_lazy_loaders = baked;
        let registry = fixtures::mappers().configure_with(&config).expect("registry");
        let session = Session::new(fixtures::database(), registry);
        let ed = session
            .query("User")
            .expect("mapper")
            .get(&[Value::Int64(8)])
            .expect("get")
            .and_then(bakery::Record::into_instance)
            .expect("ed");

        let name = if baked { "baked" } else { "select" };
        group.bench_function(name, |b| {
            b.iter(|| {
                ed.expire("addresses");
                black_box(ed.load(&session, "addresses").expect("load"))
            });
        });
    }
    group.finish();
}

fn bench_subquery_eager(c: &mut Criterion) {
    let session = fixtures::session();
    let bakery = PlanCache::default();
    let mut bq = BakedQuery::new(&bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("bench.eager", |q| {
            q.options([
                LoadOption::subqueryload(&["orders"]),
                LoadOption::subqueryload(&["orders", "items"]),
            ])
            .populate_existing()
        }),
        &[],
    );

    let mut group = c.benchmark_group("subquery_eager");
    group.bench_function("baked", |b| {
        b.iter(|| black_box(bq.for_session(&session).all().expect("baked")));
    });
    let mut spoiled = bq.clone();
    spoiled.spoil();
    group.bench_function("spoiled", |b| {
        b.iter(|| black_box(spoiled.for_session(&session).all().expect("spoiled")));
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1));
    targets = bench_lookup, bench_pipeline_length, bench_get, bench_lazy_load, bench_subquery_eager
}
criterion_main!(benches);
