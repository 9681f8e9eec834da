//! Built-in declarations for the movies dataset.

use crate::types::StorageType;

use super::{ColumnSpec, TableSchema};

type Column = (&'static str, StorageType, Option<&'static str>);

const MOVIES_METADATA: &[Column] = &[
    ("genres", StorageType::Json, Some("json")),
    ("imdb_id", StorageType::Text, None),
    ("revenue", StorageType::BigInt, Some("int")),
    ("budget", StorageType::BigInt, Some("int")),
    ("release_date", StorageType::Date, Some("date")),
];

const RATINGS: &[Column] = &[
    ("userId", StorageType::Integer, Some("int")),
    ("movieId", StorageType::Integer, Some("int")),
    (
        "rating",
        StorageType::Decimal {
            precision: 3,
            scale: 1,
        },
        Some("float"),
    ),
    ("timestamp", StorageType::Timestamp, Some("epoch_timestamp")),
];

const LINKS: &[Column] = &[
    ("movieId", StorageType::Integer, Some("int")),
    ("imdbId", StorageType::Text, None),
    ("tmdbId", StorageType::Integer, Some("int")),
];

const TABLES: &[(&str, &[Column])] = &[
    ("movies_metadata", MOVIES_METADATA),
    ("ratings", RATINGS),
    ("links", LINKS),
];

pub(super) fn tables() -> Vec<TableSchema> {
    TABLES
        .iter()
        .map(|(name, columns)| {
            TableSchema::new(
                *name,
                columns
                    .iter()
                    .map(|(column, ty, transform)| ColumnSpec {
                        name: column.to_string(),
                        storage_type: *ty,
                        transform: transform.map(str::to_string),
                    })
                    .collect(),
            )
        })
        .collect()
}
