//! Connection and transaction seam between the load pipeline and the relational store.
//!
//! A [`Store`] is an explicitly constructed, bounded pool. Every unit of work acquires a
//! [`Connection`] with [`Store::acquire`] and drops it when done; dropping returns the connection
//! to the pool after rolling back anything left open, whether the work succeeded or failed.
//!
//! Two stores are provided:
//!
//! - [`PgStore`] (feature `postgres`): PostgreSQL through a `deadpool-postgres` pool.
//! - [`MemoryStore`]: an in-process store that speaks the same COPY text format, used by tests
//!   and by `--dry-run`.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod semaphore;

use std::io::Write;
use std::ops::{Deref, DerefMut};

use tracing::warn;

use crate::copy::CopyPayload;
use crate::error::EtlResult;
use crate::schema::TableSchema;

pub use memory::{MemoryConnection, MemoryStore, StoredRow};
#[cfg(feature = "postgres")]
pub use postgres::{PgConnection, PgStore};

/// A bounded pool of connections.
pub trait Store: Send + Sync {
    /// Acquire a connection, blocking until one is available.
    fn acquire(&self) -> EtlResult<Box<dyn Connection + '_>>;

    /// Maximum number of connections handed out at once.
    fn pool_size(&self) -> usize;
}

/// One pooled connection.
///
/// Statements run in autocommit mode unless a transaction has been opened with
/// [`Connection::begin`].
pub trait Connection: Send {
    fn begin(&mut self) -> EtlResult<()>;
    fn commit(&mut self) -> EtlResult<()>;
    fn rollback(&mut self) -> EtlResult<()>;
    fn in_transaction(&self) -> bool;

    /// `DROP TABLE IF EXISTS`.
    fn drop_table(&mut self, table: &str) -> EtlResult<()>;
    /// `CREATE TABLE [IF NOT EXISTS]` from the declared columns.
    fn create_table(&mut self, schema: &TableSchema, if_not_exists: bool) -> EtlResult<()>;
    fn truncate_table(&mut self, table: &str) -> EtlResult<()>;

    /// Bulk-load one serialized batch. Returns the number of rows the store accepted.
    fn copy_in(&mut self, payload: &CopyPayload) -> EtlResult<u64>;

    /// Write a table as CSV (with a header line) to `out`.
    fn copy_out(&mut self, schema: &TableSchema, out: &mut dyn Write) -> EtlResult<()>;

    /// Run one or more `;`-separated SQL statements.
    fn execute_script(&mut self, sql: &str) -> EtlResult<()>;

    fn row_count(&mut self, table: &str) -> EtlResult<u64>;
}

/// Scoped transaction on a borrowed connection.
///
/// Rolls back on drop unless [`Transaction::commit`] (or [`Transaction::rollback`]) was called.
pub struct Transaction<'c, C: Connection + ?Sized> {
    conn: &'c mut C,
    finished: bool,
}

impl<'c, C: Connection + ?Sized> Transaction<'c, C> {
    pub fn begin(conn: &'c mut C) -> EtlResult<Self> {
        conn.begin()?;
        Ok(Self { conn, finished: false })
    }

    pub fn commit(mut self) -> EtlResult<()> {
        self.finished = true;
        self.conn.commit()
    }

    pub fn rollback(mut self) -> EtlResult<()> {
        self.finished = true;
        self.conn.rollback()
    }
}

impl<C: Connection + ?Sized> Deref for Transaction<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

impl<C: Connection + ?Sized> DerefMut for Transaction<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
    }
}

impl<C: Connection + ?Sized> Drop for Transaction<'_, C> {
    fn drop(&mut self) {
        if !self.finished && self.conn.in_transaction() {
            if let Err(err) = self.conn.rollback() {
                warn!(error = %err, "rollback of abandoned transaction failed");
            }
        }
    }
}
