//! Entity mappers: table, columns, primary key and relationships.

use super::{ColumnDefault, Relationship};
use crate::error::{BakeryError, BakeryResult};
use crate::query::{col, ColumnRef, Expr};
use crate::value::{ColumnLabel, Value};
use std::fmt;
use std::sync::Arc;

/// A mapped column attribute
#[derive(Debug, Clone)]
pub struct ColumnProperty {
    pub name: String,
    pub default: Option<ColumnDefault>,
}

/// Identity of a persistent instance: entity plus primary-key values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub entity: String,
    pub values: Vec<Value>,
}

impl IdentityKey {
    pub fn new(entity: &str, values: Vec<Value>) -> Self {
        IdentityKey {
            entity: entity.to_string(),
            values,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.entity)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Maps an entity name onto a table
#[derive(Debug, Clone)]
pub struct Mapper {
    entity: String,
    table: String,
    columns: Vec<ColumnProperty>,
    primary_key: Vec<String>,
    pub(crate) relationships: Vec<Arc<Relationship>>,
}

impl Mapper {
    pub fn new(entity: &str, table: &str) -> Self {
        Mapper {
            entity: entity.to_string(),
            table: table.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str) -> Self {
        self.columns.push(ColumnProperty {
            name: name.to_string(),
            default: None,
        });
        self
    }

    pub fn column_with_default(mut self, name: &str, default: ColumnDefault) -> Self {
        self.columns.push(ColumnProperty {
            name: name.to_string(),
            default: Some(default),
        });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(Arc::new(relationship));
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnProperty] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Qualified reference to one of this mapper's columns
    pub fn c(&self, name: &str) -> ColumnRef {
        col(&self.table, name)
    }

    pub fn column_refs(&self) -> Vec<ColumnRef> {
        self.columns.iter().map(|c| col(&self.table, &c.name)).collect()
    }

    pub fn labels(&self, use_labels: bool) -> Arc<[ColumnLabel]> {
        self.columns
            .iter()
            .map(|c| ColumnLabel::new(&self.table, &c.name, use_labels))
            .collect()
    }

    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    pub fn relationships(&self) -> &[Arc<Relationship>] {
        &self.relationships
    }

    pub fn get_relationship(&self, key: &str) -> BakeryResult<&Arc<Relationship>> {
        self.relationships
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| BakeryError::UnknownRelationship {
                entity: self.entity.clone(),
                key: key.to_string(),
            })
    }

    /// Identity predicate template: `pk1 = :pk1 AND pk2 = :pk2`, with one
    /// bind per primary-key column named after the column attribute
    pub fn get_clause(&self) -> Option<Expr> {
        Expr::all(
            self.primary_key
                .iter()
                .map(|pk| col(&self.table, pk).eq(Expr::bind(pk))),
        )
    }

    /// Identity of a row in this mapper's column order; `None` while any
    /// primary-key component is null
    pub fn identity_key(&self, values: &[Value]) -> Option<IdentityKey> {
        let mut key = Vec::with_capacity(self.primary_key.len());
        for pk in &self.primary_key {
            let idx = self.columns.iter().position(|c| &c.name == pk)?;
            let v = values.get(idx)?;
            if v.is_null() {
                return None;
            }
            key.push(v.clone());
        }
        Some(IdentityKey::new(&self.entity, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Mapper {
        Mapper::new("User", "users")
            .column("id")
            .column("name")
            .primary_key(&["id"])
    }

    #[test]
    fn test_get_clause() {
        let clause = users().get_clause().unwrap();
        assert_eq!(clause.to_string(), "users.id = :id");
        assert_eq!(clause.binds(), vec!["id".to_string()]);
    }

    #[test]
    fn test_identity_key() {
        let m = users();
        assert_eq!(
            m.identity_key(&[Value::Int64(7), Value::string("jack")]),
            Some(IdentityKey::new("User", vec![Value::Int64(7)]))
        );
        assert_eq!(m.identity_key(&[Value::Null, Value::string("new")]), None);
    }

    #[test]
    fn test_unknown_relationship() {
        let err = users().get_relationship("addresses").unwrap_err();
        assert_eq!(
            err,
            BakeryError::UnknownRelationship {
                entity: "User".to_string(),
                key: "addresses".to_string()
            }
        );
    }
}
