//! Sample users / addresses / orders / items schema with seeded rows.
//!
//! Used by the demo binary, the benchmarks and the test suites. The
//! panicking shorthands (`registry`, `database`, `session`) sit behind the
//! default `fixtures` feature; the binary uses the `try_*` variants.
//!
//! ```text
//! User 1──* Address        (User.addresses ordered by addresses.id, Address.user)
//! User 1──* Order          (User.orders ordered by orders.id, Order.user)
//! Order *──* Item          (Order.items via order_items, ordered by items.id)
//! ```

use crate::error::BakeryResult;
use crate::query::col;
use crate::schema::{ColumnDefault, Mapper, MapperRegistry, Relationship, Secondary};
use crate::session::Session;
use crate::storage::Database;
use crate::value::Value;
use std::sync::Arc;

const USERS: &[(i64, &str)] = &[(7, "jack"), (8, "ed"), (9, "fred"), (10, "chuck")];

const ADDRESSES: &[(i64, i64, &str)] = &[
    (1, 7, "jack@bean.com"),
    (2, 8, "ed@wood.com"),
    (3, 8, "ed@bettyboop.com"),
    (4, 8, "ed@lala.com"),
    (5, 9, "fred@fred.com"),
];

const ORDERS: &[(i64, i64, &str, bool)] = &[
    (1, 7, "order 1", false),
    (2, 9, "order 2", false),
    (3, 7, "order 3", true),
    (4, 9, "order 4", false),
    (5, 7, "order 5", false),
];

const ITEMS: &[(i64, &str)] = &[
    (1, "item 1"),
    (2, "item 2"),
    (3, "item 3"),
    (4, "item 4"),
    (5, "item 5"),
];

const ORDER_ITEMS: &[(i64, i64)] = &[
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 1),
    (2, 2),
    (2, 3),
    (3, 3),
    (3, 4),
    (3, 5),
    (4, 1),
    (4, 5),
    (5, 5),
];

/// Unconfigured registry for the sample schema
pub fn mappers() -> MapperRegistry {
    MapperRegistry::new()
        .register(
            Mapper::new("User", "users")
                .column("id")
                .column("name")
                .primary_key(&["id"])
                .relationship(
                    Relationship::one_to_many("addresses", "User", "Address")
                        .on("id", "user_id")
                        .order_by(col("addresses", "id").asc())
                        .back_populates("user"),
                )
                .relationship(
                    Relationship::one_to_many("orders", "User", "Order")
                        .on("id", "user_id")
                        .order_by(col("orders", "id").asc())
                        .back_populates("user"),
                ),
        )
        .register(
            Mapper::new("Address", "addresses")
                .column("id")
                .column("user_id")
                .column_with_default(
                    "email_address",
                    ColumnDefault::Scalar(Value::string("nobody@example.com")),
                )
                .primary_key(&["id"])
                .relationship(
                    Relationship::many_to_one("user", "Address", "User")
                        .on("user_id", "id")
                        .back_populates("addresses"),
                ),
        )
        .register(
            Mapper::new("Order", "orders")
                .column("id")
                .column("user_id")
                .column("description")
                .column_with_default("isopen", ColumnDefault::Scalar(Value::Bool(false)))
                .primary_key(&["id"])
                .relationship(
                    Relationship::many_to_one("user", "Order", "User")
                        .on("user_id", "id")
                        .back_populates("orders"),
                )
                .relationship(
                    Relationship::many_to_many(
                        "items",
                        "Order",
                        "Item",
                        Secondary::new("order_items")
                            .parent("id", "order_id")
                            .target("id", "item_id"),
                    )
                    .order_by(col("items", "id").asc()),
                ),
        )
        .register(
            Mapper::new("Item", "items")
                .column("id")
                .column("description")
                .primary_key(&["id"]),
        )
}

/// Configured sample registry
pub fn try_registry() -> BakeryResult<Arc<MapperRegistry>> {
    mappers().configure()
}

/// Database holding the sample rows
pub fn try_database() -> BakeryResult<Arc<Database>> {
    let db = Database::new();
    db.create_table("users", &["id", "name"])?;
    db.create_table("addresses", &["id", "user_id", "email_address"])?;
    db.create_table("orders", &["id", "user_id", "description", "isopen"])?;
    db.create_table("items", &["id", "description"])?;
    db.create_table("order_items", &["order_id", "item_id"])?;

    db.insert(
        "users",
        USERS
            .iter()
            .map(|&(id, name)| vec![Value::Int64(id), Value::string(name)])
            .collect(),
    )?;
    db.insert(
        "addresses",
        ADDRESSES
            .iter()
            .map(|&(id, user_id, email)| {
                vec![Value::Int64(id), Value::Int64(user_id), Value::string(email)]
            })
            .collect(),
    )?;
    db.insert(
        "orders",
        ORDERS
            .iter()
            .map(|&(id, user_id, description, isopen)| {
                vec![
                    Value::Int64(id),
                    Value::Int64(user_id),
                    Value::string(description),
                    Value::Bool(isopen),
                ]
            })
            .collect(),
    )?;
    db.insert(
        "items",
        ITEMS
            .iter()
            .map(|&(id, description)| vec![Value::Int64(id), Value::string(description)])
            .collect(),
    )?;
    db.insert(
        "order_items",
        ORDER_ITEMS
            .iter()
            .map(|&(order_id, item_id)| vec![Value::Int64(order_id), Value::Int64(item_id)])
            .collect(),
    )?;
    Ok(Arc::new(db))
}

/// Fresh session over a fresh sample database
pub fn try_session() -> BakeryResult<Session> {
    Ok(Session::new(try_database()?, try_registry()?))
}

/// # Panics
///
/// Never for the bundled schema.
#[cfg(any(test, feature = "fixtures"))]
#[allow(clippy::expect_used)]
pub fn registry() -> Arc<MapperRegistry> {
    try_registry().expect("sample schema configures")
}

/// # Panics
///
/// Never for the bundled rows.
#[cfg(any(test, feature = "fixtures"))]
#[allow(clippy::expect_used)]
pub fn database() -> Arc<Database> {
    try_database().expect("sample rows insert")
}

/// # Panics
///
/// Never for the bundled schema and rows.
#[cfg(any(test, feature = "fixtures"))]
pub fn session() -> Session {
    Session::new(database(), registry())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallible_helpers_build_sample_data() {
        let session = try_session().unwrap();
        let users = session.query("User").unwrap().all().unwrap();
        assert_eq!(users.len(), USERS.len());
        assert!(try_registry().unwrap().mapper("Order").is_ok());
    }
}
