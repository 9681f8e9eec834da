//! In-process store speaking the same COPY text format as PostgreSQL.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::copy::{CopyPayload, DATE_FORMAT, TIMESTAMP_FORMAT, decode_records};
use crate::error::{EtlError, EtlResult};
use crate::schema::TableSchema;
use crate::types::StorageType;

use super::semaphore::{Permit, Semaphore};
use super::{Connection, Store};

/// A stored row: one normalized text value (or null) per column.
pub type StoredRow = Vec<Option<String>>;

#[derive(Debug, Clone)]
struct MemTable {
    schema: TableSchema,
    rows: Vec<StoredRow>,
}

/// Make `copy_in` fail after a number of successful copies into one table.
#[derive(Debug, Clone)]
struct CopyFault {
    table: String,
    remaining: usize,
}

struct Shared {
    permits: Arc<Semaphore>,
    pool_size: usize,
    tables: Mutex<BTreeMap<String, MemTable>>,
    fault: Mutex<Option<CopyFault>>,
    commit_fault: Mutex<Option<String>>,
}

/// In-memory [`Store`].
///
/// Holds at most `pool_size` connections at once. Each connection stages its changes while a
/// transaction is open and publishes them on commit. `copy_in` decodes the payload and validates
/// every field against the column's storage type, normalizing it the way the server would print
/// it back (`DECIMAL(3, 1)` stores `4.0`, JSON is compacted, booleans become `t`/`f`).
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// # Panics
    ///
    /// Panics if `pool_size == 0`.
    pub fn new(pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        Self {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                tables: Mutex::new(BTreeMap::new()),
                fault: Mutex::new(None),
                commit_fault: Mutex::new(None),
            }),
        }
    }

    /// Committed rows of `table`, in insertion order.
    pub fn table_rows(&self, table: &str) -> Option<Vec<StoredRow>> {
        lock(&self.shared.tables).get(table).map(|t| t.rows.clone())
    }

    pub fn contains_table(&self, table: &str) -> bool {
        lock(&self.shared.tables).contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        lock(&self.shared.tables).keys().cloned().collect()
    }

    /// Connections not currently handed out.
    pub fn idle_connections(&self) -> usize {
        self.shared.permits.available()
    }

    /// Let `after` copies into `table` succeed, then fail every following copy into it as if the
    /// connection had been lost.
    pub fn fail_copy_after(&self, table: impl Into<String>, after: usize) {
        *lock(&self.shared.fault) = Some(CopyFault {
            table: table.into(),
            remaining: after,
        });
    }

    /// Fail every commit that would publish rows into `table`. The transaction is discarded.
    pub fn fail_commit(&self, table: impl Into<String>) {
        *lock(&self.shared.commit_fault) = Some(table.into());
    }

    pub fn clear_faults(&self) {
        *lock(&self.shared.fault) = None;
        *lock(&self.shared.commit_fault) = None;
    }
}

impl Store for MemoryStore {
    fn acquire(&self) -> EtlResult<Box<dyn Connection + '_>> {
        let (permit, waited) = self.shared.permits.acquire();
        if waited > Duration::ZERO {
            debug!(waited_ms = waited.as_millis() as u64, "waited for a free connection");
        }
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            staged: None,
            _permit: permit,
        }))
    }

    fn pool_size(&self) -> usize {
        self.shared.pool_size
    }
}

/// Connection handed out by [`MemoryStore`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    /// Tables touched by the open transaction; `None` entries were dropped.
    staged: Option<BTreeMap<String, Option<MemTable>>>,
    _permit: Permit,
}

impl MemoryConnection {
    /// Apply `f` to the current view of `table` (staged if a transaction is open).
    fn with_table<T>(
        &mut self,
        table: &str,
        f: impl FnOnce(&mut Option<MemTable>) -> EtlResult<T>,
    ) -> EtlResult<T> {
        match &mut self.staged {
            Some(staged) => {
                if !staged.contains_key(table) {
                    let current = lock(&self.shared.tables).get(table).cloned();
                    staged.insert(table.to_string(), current);
                }
                let slot = staged
                    .get_mut(table)
                    .ok_or_else(|| EtlError::store(format!("lost staged table \"{table}\"")))?;
                f(slot)
            }
            None => {
                let mut tables = lock(&self.shared.tables);
                let mut slot = tables.remove(table);
                let out = f(&mut slot);
                if let Some(t) = slot {
                    tables.insert(table.to_string(), t);
                }
                out
            }
        }
    }

    fn take_fault(&self, table: &str) -> EtlResult<()> {
        let mut fault = lock(&self.shared.fault);
        if let Some(f) = fault.as_mut().filter(|f| f.table == table) {
            if f.remaining == 0 {
                return Err(EtlError::store_critical(format!(
                    "connection lost during COPY into \"{table}\""
                )));
            }
            f.remaining -= 1;
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn begin(&mut self) -> EtlResult<()> {
        if self.staged.is_some() {
            return Err(EtlError::store("a transaction is already in progress"));
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    fn commit(&mut self) -> EtlResult<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| EtlError::store("no transaction in progress"))?;
        if let Some(table) = lock(&self.shared.commit_fault).as_deref() {
            if matches!(staged.get(table), Some(Some(t)) if !t.rows.is_empty()) {
                return Err(EtlError::store_critical(format!(
                    "connection lost while committing \"{table}\""
                )));
            }
        }
        let mut tables = lock(&self.shared.tables);
        for (name, table) in staged {
            match table {
                Some(t) => {
                    tables.insert(name, t);
                }
                None => {
                    tables.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> EtlResult<()> {
        self.staged = None;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn drop_table(&mut self, table: &str) -> EtlResult<()> {
        self.with_table(table, |slot| {
            *slot = None;
            Ok(())
        })
    }

    fn create_table(&mut self, schema: &TableSchema, if_not_exists: bool) -> EtlResult<()> {
        self.with_table(&schema.name, |slot| {
            if slot.is_some() {
                if if_not_exists {
                    return Ok(());
                }
                return Err(EtlError::store(format!("relation \"{}\" already exists", schema.name)));
            }
            *slot = Some(MemTable {
                schema: schema.clone(),
                rows: Vec::new(),
            });
            Ok(())
        })
    }

    fn truncate_table(&mut self, table: &str) -> EtlResult<()> {
        self.with_table(table, |slot| {
            let t = slot.as_mut().ok_or_else(|| missing_relation(table))?;
            t.rows.clear();
            Ok(())
        })
    }

    fn copy_in(&mut self, payload: &CopyPayload) -> EtlResult<u64> {
        self.take_fault(&payload.table)?;
        self.with_table(&payload.table, |slot| {
            let table = slot.as_mut().ok_or_else(|| missing_relation(&payload.table))?;

            let mut types = Vec::with_capacity(payload.columns.len());
            for column in payload.columns.iter() {
                let spec = table
                    .schema
                    .columns
                    .iter()
                    .find(|c| &c.name == column)
                    .ok_or_else(|| {
                        EtlError::store(format!(
                            "column \"{column}\" of relation \"{}\" does not exist",
                            payload.table
                        ))
                    })?;
                types.push((spec.name.as_str(), spec.storage_type));
            }
            if types.len() != table.schema.columns.len() {
                return Err(EtlError::store(format!(
                    "COPY into \"{}\" must name every column",
                    payload.table
                )));
            }

            let records = decode_records(&payload.data, &payload.format, types.len())?;
            let mut rows = Vec::with_capacity(records.len());
            for (line, record) in records.into_iter().enumerate() {
                let mut stored = Vec::with_capacity(types.len());
                for ((name, ty), field) in types.iter().zip(record) {
                    let value = match field {
                        Some(raw) => Some(normalize(*ty, &raw).map_err(|msg| {
                            EtlError::store(format!(
                                "COPY {}, line {}, column {name}: {msg}",
                                payload.table,
                                line + 1
                            ))
                        })?),
                        None => None,
                    };
                    stored.push(value);
                }
                // Reorder into table column order.
                let mut ordered = vec![None; table.schema.columns.len()];
                for ((name, _), value) in types.iter().zip(stored) {
                    if let Some(idx) = table.schema.index_of(name) {
                        ordered[idx] = value;
                    }
                }
                rows.push(ordered);
            }

            let n = rows.len() as u64;
            table.rows.extend(rows);
            Ok(n)
        })
    }

    fn copy_out(&mut self, schema: &TableSchema, out: &mut dyn Write) -> EtlResult<()> {
        let rows = self.with_table(&schema.name, |slot| {
            slot.as_ref()
                .map(|t| t.rows.clone())
                .ok_or_else(|| missing_relation(&schema.name))
        })?;

        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(schema.column_names())?;
        for row in rows {
            wtr.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn execute_script(&mut self, _sql: &str) -> EtlResult<()> {
        Err(EtlError::store("SQL scripts are not supported by the in-memory store"))
    }

    fn row_count(&mut self, table: &str) -> EtlResult<u64> {
        self.with_table(table, |slot| {
            slot.as_ref()
                .map(|t| t.rows.len() as u64)
                .ok_or_else(|| missing_relation(table))
        })
    }
}

fn missing_relation(table: &str) -> EtlError {
    EtlError::store(format!("relation \"{table}\" does not exist"))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validate a decoded field against its column type and return its canonical text.
fn normalize(ty: StorageType, raw: &str) -> Result<String, String> {
    let invalid = || format!("invalid input syntax for type {}: {raw:?}", ty.sql_name());
    match ty {
        StorageType::Text => {
            if raw.contains('\0') {
                return Err("invalid byte sequence 0x00".to_string());
            }
            Ok(raw.to_string())
        }
        StorageType::Json => serde_json::from_str::<serde_json::Value>(raw)
            .map(|v| v.to_string())
            .map_err(|_| invalid()),
        StorageType::SmallInt => raw.trim().parse::<i16>().map(|v| v.to_string()).map_err(|_| invalid()),
        StorageType::Integer => raw.trim().parse::<i32>().map(|v| v.to_string()).map_err(|_| invalid()),
        StorageType::BigInt => raw.trim().parse::<i64>().map(|v| v.to_string()).map_err(|_| invalid()),
        StorageType::Decimal { precision, scale } => {
            let v = raw.trim().parse::<f64>().map_err(|_| invalid())?;
            if !v.is_finite() {
                return Err(invalid());
            }
            let rendered = format!("{v:.prec$}", prec = usize::from(scale));
            let int_digits = rendered
                .trim_start_matches('-')
                .split('.')
                .next()
                .map(|s| s.trim_start_matches('0').len())
                .unwrap_or(0);
            if int_digits > usize::from(precision.saturating_sub(scale)) {
                return Err(format!("numeric field overflow for {}: {raw:?}", ty.sql_name()));
            }
            Ok(rendered)
        }
        StorageType::Timestamp => NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .map_err(|_| invalid()),
        StorageType::Date => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map(|d| d.format(DATE_FORMAT).to_string())
            .map_err(|_| invalid()),
        StorageType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Ok("t".to_string()),
            "f" | "false" | "no" | "off" | "0" => Ok("f".to_string()),
            _ => Err(invalid()),
        },
    }
}
