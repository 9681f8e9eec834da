//! Schema registry: the static mapping from table name to its ordered column declarations.
//!
//! A [`TableSchema`] is the single source of column order. DDL generation, reader projection and
//! the COPY column list all go through [`TableSchema::column_names`], so they cannot diverge.

mod movies;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, EtlResult};
use crate::transform::TransformRegistry;
use crate::types::StorageType;

/// One declared column: name, target storage type and optional transform id.
///
/// A transform of `None` means the raw field is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            name: name.into(),
            storage_type,
            transform: None,
        }
    }

    /// Attach a transform id to this column.
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }
}

/// Ordered column declarations for one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn check(&self) -> EtlResult<()> {
        if self.name.trim().is_empty() {
            return Err(EtlError::config("table name must not be empty"));
        }
        if self.columns.is_empty() {
            return Err(EtlError::config(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(EtlError::config(format!(
                    "table '{}' has a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(EtlError::config(format!(
                    "table '{}' declares column '{}' more than once",
                    self.name, column.name
                )));
            }
        }
        Ok(())
    }
}

/// Immutable registry of declared tables, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting duplicate tables, duplicate columns and empty declarations.
    pub fn new(tables: Vec<TableSchema>) -> EtlResult<Self> {
        let mut seen = HashSet::new();
        for table in &tables {
            table.check()?;
            if !seen.insert(table.name.as_str()) {
                return Err(EtlError::config(format!(
                    "table '{}' is declared more than once",
                    table.name
                )));
            }
        }
        Ok(Self { tables })
    }

    /// The built-in movies dataset schema (`movies_metadata`, `ratings`, `links`).
    pub fn movies() -> Self {
        Self {
            tables: movies::tables(),
        }
    }

    /// Look up a declared table.
    pub fn lookup(&self, table: &str) -> EtlResult<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| EtlError::UnknownTable {
                table: table.to_string(),
            })
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }

    /// Declared tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    /// Declared table names in declaration order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Check that every referenced transform id is registered.
    ///
    /// Run once at startup, before any file or database I/O.
    pub fn validate(&self, transforms: &TransformRegistry) -> EtlResult<()> {
        for table in &self.tables {
            for column in &table.columns {
                if let Some(id) = &column.transform {
                    if !transforms.contains(id) {
                        return Err(EtlError::UnknownTransform {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            transform: id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn lookup_preserves_declaration_order() {
        let registry = SchemaRegistry::movies();
        assert_eq!(registry.table_names(), vec!["movies_metadata", "ratings", "links"]);

        let movies = registry.lookup("movies_metadata").unwrap();
        assert_eq!(
            movies.column_names(),
            vec!["genres", "imdb_id", "revenue", "budget", "release_date"]
        );
    }

    #[test]
    fn lookup_unknown_table_fails() {
        let err = SchemaRegistry::movies().lookup("credits").unwrap_err();
        assert!(matches!(err, EtlError::UnknownTable { ref table } if table == "credits"));
        assert_eq!(err.kind(), ErrorKind::ConfigurationFailure);
    }

    #[test]
    fn builtin_schema_references_only_registered_transforms() {
        SchemaRegistry::movies()
            .validate(&TransformRegistry::builtin())
            .unwrap();
    }

    #[test]
    fn validate_rejects_unknown_transform() {
        let registry = SchemaRegistry::new(vec![TableSchema::new(
            "t",
            vec![ColumnSpec::new("a", StorageType::Text).with_transform("rot13")],
        )])
        .unwrap();

        let err = registry.validate(&TransformRegistry::builtin()).unwrap_err();
        assert!(err.to_string().contains("unknown transform 'rot13'"));
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let dup_col = SchemaRegistry::new(vec![TableSchema::new(
            "t",
            vec![
                ColumnSpec::new("a", StorageType::Text),
                ColumnSpec::new("a", StorageType::BigInt),
            ],
        )]);
        assert!(dup_col.is_err());

        let t = TableSchema::new("t", vec![ColumnSpec::new("a", StorageType::Text)]);
        assert!(SchemaRegistry::new(vec![t.clone(), t]).is_err());

        assert!(SchemaRegistry::new(vec![TableSchema::new("empty", vec![])]).is_err());
    }
}
