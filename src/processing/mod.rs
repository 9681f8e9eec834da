//! Row transformation.
//!
//! The processing layer sits between the chunked reader and the bulk-load serializer. It takes
//! each [`crate::types::RowBatch`] by value and returns a new batch with every column that declares
//! a transform coerced, leaving the rest untouched.
//!
//! ```rust
//! use rust_bulk_etl::processing::{RowTransformer, TransformOptions, TransformPlan};
//! use rust_bulk_etl::schema::SchemaRegistry;
//! use rust_bulk_etl::transform::TransformRegistry;
//! use rust_bulk_etl::types::{RowBatch, Value};
//!
//! let registry = SchemaRegistry::movies();
//! let links = registry.lookup("links").unwrap();
//! let plan = TransformPlan::for_table(links, &TransformRegistry::builtin()).unwrap();
//! let transformer = RowTransformer::new(plan, &TransformOptions::default()).unwrap();
//!
//! let batch = RowBatch::new(
//!     links.column_names().into(),
//!     vec![vec![
//!         Value::Text("1".to_string()),
//!         Value::Text("0114709".to_string()),
//!         Value::Text("862.0".to_string()),
//!     ]],
//!     0,
//! );
//! let (out, stats) = transformer.transform(batch).unwrap();
//! assert_eq!(out.rows[0][2], Value::Int(862));
//! assert_eq!(stats.failures, 0);
//! ```

pub mod transformer;

pub use transformer::{RowTransformer, TransformOptions, TransformPlan, TransformStats};
