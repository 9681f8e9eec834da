//! Table lifecycle: (re)creating target tables before a load so re-runs are idempotent.

pub mod ddl;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EtlError, EtlResult};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::store::{Store, Transaction};

/// How a table is prepared before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareMode {
    /// `DROP TABLE IF EXISTS` + `CREATE TABLE`.
    #[default]
    Recreate,
    /// `CREATE TABLE IF NOT EXISTS` + `TRUNCATE`.
    Truncate,
}

impl FromStr for PrepareMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recreate" => Ok(PrepareMode::Recreate),
            "truncate" => Ok(PrepareMode::Truncate),
            _ => Err(EtlError::config(format!(
                "unknown prepare mode '{s}'. Use 'recreate' or 'truncate'."
            ))),
        }
    }
}

impl fmt::Display for PrepareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareMode::Recreate => write!(f, "recreate"),
            PrepareMode::Truncate => write!(f, "truncate"),
        }
    }
}

/// Prepares declared tables in their own committed transaction.
pub struct TableLifecycle<'a> {
    store: &'a dyn Store,
    registry: &'a SchemaRegistry,
}

impl<'a> TableLifecycle<'a> {
    pub fn new(store: &'a dyn Store, registry: &'a SchemaRegistry) -> Self {
        Self { store, registry }
    }

    /// Prepare a declared table by name.
    pub fn prepare(&self, table: &str, mode: PrepareMode) -> EtlResult<()> {
        let schema = self.registry.lookup(table)?;
        self.prepare_schema(schema, mode)
    }

    /// Prepare `schema`; after commit the table exists, matches the declaration and is empty.
    pub fn prepare_schema(&self, schema: &TableSchema, mode: PrepareMode) -> EtlResult<()> {
        let mut conn = self.store.acquire()?;
        let mut tx = Transaction::begin(&mut *conn)?;
        match mode {
            PrepareMode::Recreate => {
                tx.drop_table(&schema.name)?;
                tx.create_table(schema, false)?;
            }
            PrepareMode::Truncate => {
                tx.create_table(schema, true)?;
                tx.truncate_table(&schema.name)?;
            }
        }
        tx.commit()?;
        info!(table = %schema.name, mode = %mode, "table prepared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::{CopyFormat, serialize_batch};
    use crate::store::MemoryStore;
    use crate::types::{RowBatch, Value};

    fn seed(store: &MemoryStore, registry: &SchemaRegistry) {
        let links = registry.lookup("links").unwrap();
        let batch = RowBatch::new(
            links.column_names().into(),
            vec![vec![Value::Int(1), Value::Text("0114709".into()), Value::Int(862)]],
            0,
        );
        let payload = serialize_batch(links, &batch, &CopyFormat::default()).unwrap();
        let mut conn = store.acquire().unwrap();
        conn.copy_in(&payload).unwrap();
    }

    #[test]
    fn recreate_and_truncate_leave_an_empty_table() {
        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        let lifecycle = TableLifecycle::new(&store, &registry);

        for mode in [PrepareMode::Recreate, PrepareMode::Truncate] {
            lifecycle.prepare("links", mode).unwrap();
            seed(&store, &registry);
            assert_eq!(store.table_rows("links").unwrap().len(), 1);
            lifecycle.prepare("links", mode).unwrap();
            assert!(store.table_rows("links").unwrap().is_empty());
        }
        assert_eq!(store.idle_connections(), 1);
    }

    #[test]
    fn truncate_creates_missing_table() {
        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        TableLifecycle::new(&store, &registry)
            .prepare("ratings", PrepareMode::Truncate)
            .unwrap();
        assert!(store.contains_table("ratings"));
    }

    #[test]
    fn unknown_table_is_rejected() {
        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        let err = TableLifecycle::new(&store, &registry)
            .prepare("credits", PrepareMode::Recreate)
            .unwrap_err();
        assert!(matches!(err, EtlError::UnknownTable { .. }));
        assert!(!store.contains_table("credits"));
    }

    #[test]
    fn parses_modes() {
        assert_eq!("TRUNCATE".parse::<PrepareMode>().unwrap(), PrepareMode::Truncate);
        assert!("replace".parse::<PrepareMode>().is_err());
    }
}
