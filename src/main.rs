//! # Bakery Demo
//!
//! Runs baked queries against the bundled sample schema and reports plan
//! cache statistics.
//!
//! ## Usage
//!
//! ```bash
//! # Look up every user by name through one cached plan
//! cargo run --bin bakery -- users --iterations 100
//!
//! # Walk User.addresses lazily with the baked lazy loader installed
//! cargo run --bin bakery -- lazy --baked
//!
//! # Load users with orders and items eagerly via nested subqueries
//! cargo run --bin bakery -- eager
//!
//! # Machine-readable cache statistics
//! cargo run --bin bakery -- --json users
//! ```

use bakery::baked::{BakedQuery, KeyArg, PlanCache, Seed, Step};
use bakery::config::Config;
use bakery::fixtures;
use bakery::logging::init_tracing;
use bakery::query::{col, Expr};
use bakery::session::Session;
use bakery::strategies::LoadOption;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bakery", about = "Baked query plan caching demo")]
struct Cli {
    /// Configuration file; defaults to bakery.toml in the working directory
    #[arg(long)]
    config: Option<String>,

    /// Print plan cache statistics as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repeated lookups of every user by name
    Users {
        #[arg(long, default_value_t = 10)]
        iterations: usize,
    },
    /// Lazy-load each user's addresses
    Lazy {
        /// Install the baked lazy loader for `select` relationships
        #[arg(long)]
        baked: bool,
    },
    /// Eager-load orders and their items with subqueries
    Eager,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load().unwrap_or_else(|_| Config::default()),
    };
    init_tracing(&config.logging);

    if let Command::Lazy { baked: true } = cli.command {
        config.loading.bake_lazy_loaders = true;
    }

    let registry = fixtures::mappers().configure_with(&config)?;
    let session = Session::new(fixtures::try_database()?, registry);
    let bakery = PlanCache::from_config(&config.cache);

    match cli.command {
        Command::Users { iterations } => run_users(&session, &bakery, iterations)?,
        Command::Lazy { .. } => run_lazy(&session, &bakery)?,
        Command::Eager => run_eager(&session, &bakery)?,
    }

    let stats = bakery.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        compiles = stats.compiles,
        size = stats.size,
        "bakery_stats"
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "plans: {}  hits: {}  misses: {}  compiles: {}  hit rate: {:.1}%",
        stats.size,
        stats.hits,
        stats.misses,
        stats.compiles,
        stats.hit_rate() * 100.0
    );
    Ok(())
}

fn by_name(bakery: &PlanCache) -> BakedQuery {
    let mut bq = BakedQuery::new(bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("demo.by_name", |q| {
            q.filter(col("users", "name").eq(Expr::bind("name")))
        }),
        &[],
    );
    bq
}

fn run_users(session: &Session, bakery: &PlanCache, iterations: usize) -> anyhow::Result<()> {
    let bq = by_name(bakery);
    for _ in 0..iterations {
        for name in ["jack", "ed", "fred", "chuck"] {
            bq.for_session(session).param("name", name)?.one()?;
        }
    }
    let ed = bq.for_session(session).param("name", "ed")?.one()?;
    println!("{ed}");
    Ok(())
}

fn run_lazy(session: &Session, bakery: &PlanCache) -> anyhow::Result<()> {
    let mut bq = BakedQuery::new(bakery, Seed::entity("User"));
    bq.add_criteria(
        Step::map("demo.order_by_id", |q| q.order_by(col("users", "id").asc())),
        &[],
    );
    for record in bq.for_session(session).all()? {
        let Some(user) = record.instance() else {
            continue;
        };
        let addresses = user.load(session, "addresses")?;
        println!("{user}: {} address(es)", addresses.len());
        for address in addresses.instances() {
            println!("    {address}");
        }
    }
    let rel = session.registry().relationship("User", "addresses")?;
    let stats = rel.compiled_cache().stats();
    info!(
        relationship = %rel.qualified_name(),
        plans = stats.size,
        hits = stats.hits,
        "relationship_cache_stats"
    );
    Ok(())
}

fn run_eager(session: &Session, bakery: &PlanCache) -> anyhow::Result<()> {
    let mut bq = BakedQuery::with_args(bakery, Seed::entity("User"), &[KeyArg::from("eager")]);
    bq.add_criteria(
        Step::map("demo.eager_orders", |q| {
            q.options([
                LoadOption::subqueryload(&["orders"]),
                LoadOption::subqueryload(&["orders", "items"]),
            ])
            .order_by(col("users", "id").asc())
        }),
        &[],
    );
    for record in bq.for_session(session).all()? {
        let Some(user) = record.instance() else {
            continue;
        };
        let orders = user.loaded("orders").map(|l| l.instances()).unwrap_or_default();
        println!("{user}: {} order(s)", orders.len());
        for order in orders {
            let items = order.loaded("items").map(|l| l.len()).unwrap_or(0);
            println!("    {order}: {items} item(s)");
        }
    }
    Ok(())
}
