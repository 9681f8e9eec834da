//! Source ingestion: chunked reading of delimited files and mapping files to tables.
//!
//! - [`ChunkedReader`] yields bounded [`crate::types::RowBatch`]es projected onto a table's
//!   declared columns, never holding more than one batch of the file in memory.
//! - [`count_data_lines`] is the raw line-count pre-scan used for progress totals.
//! - [`sources_for_tables`] / [`discover_sources`] map files to declared tables.

pub mod reader;
pub mod sources;

pub use reader::{ChunkedReader, ReaderOptions, count_data_lines};
pub use sources::{SOURCE_EXTENSION, SourceFile, discover_sources, sources_for_tables};
