//! `rust-bulk-etl` loads delimited files into PostgreSQL tables through the bulk `COPY` protocol,
//! one declared [`schema::TableSchema`] at a time.
//!
//! The primary entrypoint is [`execution::LoadExecutor`]: it (re)creates the target table, reads
//! the source file in bounded chunks, coerces every column with its declared transform and copies
//! each chunk into a single per-table transaction. Either the whole file lands, or nothing does.
//!
//! ## What a load does
//!
//! 1. Resolve the table in the [`schema::SchemaRegistry`] and its transforms in the
//!    [`transform::TransformRegistry`] (unknown ids fail before any I/O).
//! 2. Pre-scan the file's line count for progress reporting.
//! 3. Prepare the table ([`lifecycle::PrepareMode::Recreate`] or `Truncate`) in its own transaction.
//! 4. For each chunk: read → transform (rayon) → serialize to COPY text → `COPY ... FROM STDIN`.
//! 5. Commit, or roll back on the first failing chunk.
//!
//! Field-level coercion failures never fail a load: the value becomes null and a warning is logged.
//!
//! ## Quick example: load into the in-memory store
//!
//! ```rust
//! use rust_bulk_etl::execution::{LoadExecutor, LoadOptions};
//! use rust_bulk_etl::schema::SchemaRegistry;
//! use rust_bulk_etl::store::MemoryStore;
//! use rust_bulk_etl::transform::TransformRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("links.csv");
//! std::fs::write(&path, "movieId,imdbId,tmdbId\n1,0114709,862.0\n2,0113497,\n")?;
//!
//! let store = MemoryStore::new(3);
//! let registry = SchemaRegistry::movies();
//! let transforms = TransformRegistry::builtin();
//! let executor = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default())?;
//!
//! let report = executor.load_table("links", &path)?;
//! assert_eq!(report.rows_written, 2);
//! assert_eq!(
//!     store.table_rows("links").unwrap()[0],
//!     vec![Some("1".to_string()), Some("0114709".to_string()), Some("862".to_string())]
//! );
//! # Ok(())
//! # }
//! ```
//!
//! With the `postgres` feature (on by default) the same executor runs against
//! [`store::PgStore`].
//!
//! ## Modules
//!
//! - [`schema`]: declared tables and their column order
//! - [`transform`]: per-value coercions registered by id
//! - [`ingestion`]: chunked CSV reading and source discovery
//! - [`processing`]: batch transformation
//! - [`copy`]: PostgreSQL text-format COPY serialization
//! - [`store`]: connection/transaction seam with PostgreSQL and in-memory implementations
//! - [`lifecycle`]: table (re)creation
//! - [`execution`]: the load state machine, progress and observers
//! - [`config`] / [`logging`]: configuration file and tracing setup for the binary

pub mod config;
pub mod copy;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod lifecycle;
pub mod logging;
pub mod processing;
pub mod schema;
pub mod store;
pub mod transform;
pub mod types;

pub use error::{ErrorKind, EtlError, EtlResult, Severity};
