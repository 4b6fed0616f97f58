//! In-Memory Table Storage
//!
//! The data every session reads. Tables live in an immutable snapshot that
//! writers replace wholesale, so sessions on other threads always read a
//! consistent set of tables without holding a lock.
//!
//! ## Design
//!
//! - `Snapshot`: immutable map of Arc-wrapped tables, cloned in O(1)
//! - Writers serialize on a mutex, copy-on-write the touched table and
//!   publish a new snapshot atomically via `ArcSwap`
//! - Readers call [`Database::snapshot`] once per statement

use crate::error::{BakeryError, BakeryResult};
use crate::value::Value;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A table: column names plus rows in insertion order
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Table {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Resolve a column position or fail with `UnknownColumn`
    pub fn require_column(&self, column: &str) -> BakeryResult<usize> {
        self.column_index(column)
            .ok_or_else(|| BakeryError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// Largest integer in `column`, used to assign surrogate keys at flush
    pub fn max_int(&self, column: &str) -> Option<i64> {
        let idx = self.column_index(column)?;
        self.rows.iter().filter_map(|r| r[idx].as_i64()).max()
    }

    fn push(&mut self, row: Vec<Value>) -> BakeryResult<()> {
        if row.len() != self.columns.len() {
            return Err(BakeryError::InvalidQuery(format!(
                "table '{}' expects {} values, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }
}

/// Immutable point-in-time view of every table
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Monotonically increasing version number
    pub version: u64,
    tables: HashMap<String, Arc<Table>>,
}

impl Snapshot {
    pub fn table(&self, name: &str) -> BakeryResult<&Arc<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| BakeryError::UnknownTable(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared table storage, safe to hand to many sessions
pub struct Database {
    current: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
}

impl Database {
    pub fn new() -> Self {
        Database {
            current: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot; cheap to call
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    pub fn create_table(&self, name: &str, columns: &[&str]) -> BakeryResult<()> {
        self.write(|tables| {
            if tables.contains_key(name) {
                return Err(BakeryError::Configuration(format!(
                    "table '{name}' already exists"
                )));
            }
            tables.insert(name.to_string(), Arc::new(Table::new(name, columns)));
            Ok(())
        })
    }

    /// Append rows to a table. All rows are validated before any is visible.
    pub fn insert(&self, table: &str, rows: Vec<Vec<Value>>) -> BakeryResult<()> {
        self.write(|tables| {
            let existing = tables
                .get(table)
                .ok_or_else(|| BakeryError::UnknownTable(table.to_string()))?;
            let mut updated = Table::clone(existing);
            for row in rows {
                updated.push(row)?;
            }
            tables.insert(table.to_string(), Arc::new(updated));
            Ok(())
        })
    }

    fn write<F>(&self, f: F) -> BakeryResult<()>
    where
        F: FnOnce(&mut HashMap<String, Arc<Table>>) -> BakeryResult<()>,
    {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();
        let mut tables = current.tables.clone();
        f(&mut tables)?;
        self.current.store(Arc::new(Snapshot {
            version: current.version + 1,
            tables,
        }));
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_publishes_new_snapshot() {
        let db = Database::new();
        db.create_table("users", &["id", "name"]).unwrap();
        let before = db.snapshot();

        db.insert("users", vec![vec![Value::Int64(7), Value::string("jack")]])
            .unwrap();

        // Old snapshot is unaffected
        assert!(before.table("users").unwrap().is_empty());
        assert_eq!(db.snapshot().table("users").unwrap().len(), 1);
        assert!(db.version() > before.version);
    }

    #[test]
    fn test_insert_rejects_wrong_arity_atomically() {
        let db = Database::new();
        db.create_table("users", &["id", "name"]).unwrap();

        let err = db
            .insert(
                "users",
                vec![
                    vec![Value::Int64(7), Value::string("jack")],
                    vec![Value::Int64(8)],
                ],
            )
            .unwrap_err();
        assert!(matches!(err, BakeryError::InvalidQuery(_)));
        assert!(db.snapshot().table("users").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_table() {
        let db = Database::new();
        assert_eq!(
            db.insert("nope", vec![]).unwrap_err(),
            BakeryError::UnknownTable("nope".to_string())
        );
        assert!(db.create_table("t", &["a"]).is_ok());
        assert!(db.create_table("t", &["a"]).is_err());
    }

    #[test]
    fn test_max_int() {
        let db = Database::new();
        db.create_table("users", &["id"]).unwrap();
        assert_eq!(db.snapshot().table("users").unwrap().max_int("id"), None);
        db.insert("users", vec![vec![Value::Int64(3)], vec![Value::Int64(9)]])
            .unwrap();
        assert_eq!(db.snapshot().table("users").unwrap().max_int("id"), Some(9));
    }
}
