//! Mapping between source files and declared tables (file stem = table name).

use std::path::{Path, PathBuf};

use crate::error::{EtlError, EtlResult};
use crate::schema::SchemaRegistry;

/// Extension assumed for source files when resolving tables to paths.
pub const SOURCE_EXTENSION: &str = "csv";

/// A source file and the table it loads into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub table: String,
    pub path: PathBuf,
}

impl SourceFile {
    pub fn new(table: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
            path: path.into(),
        }
    }

    /// Derive the table name from a file stem.
    pub fn from_path(path: impl Into<PathBuf>) -> EtlResult<Self> {
        let path = path.into();
        let table = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EtlError::config(format!("cannot derive a table name from {}", path.display())))?
            .to_string();
        Ok(Self { table, path })
    }
}

/// Resolve tables to `<dir>/<table>.csv`.
///
/// An empty `tables` list selects every declared table, in declaration order. The files are not
/// opened here; a missing file surfaces when its load starts.
pub fn sources_for_tables(dir: &Path, registry: &SchemaRegistry, tables: &[String]) -> EtlResult<Vec<SourceFile>> {
    let names: Vec<&str> = if tables.is_empty() {
        registry.table_names()
    } else {
        tables.iter().map(String::as_str).collect()
    };

    names
        .into_iter()
        .map(|name| {
            let schema = registry.lookup(name)?;
            Ok(SourceFile::new(
                schema.name.clone(),
                dir.join(format!("{}.{SOURCE_EXTENSION}", schema.name)),
            ))
        })
        .collect()
}

/// Find source files in `dir` matching a glob `pattern` (e.g. `*.csv`).
///
/// Every match must correspond to a declared table. Results are ordered by table declaration
/// order.
pub fn discover_sources(dir: &Path, pattern: &str, registry: &SchemaRegistry) -> EtlResult<Vec<SourceFile>> {
    // The directory is matched literally; only `pattern` carries wildcards.
    let full = Path::new(&glob::Pattern::escape(&dir.to_string_lossy())).join(pattern);
    let paths = glob::glob(&full.to_string_lossy())
        .map_err(|e| EtlError::config(format!("invalid glob pattern '{pattern}': {e}")))?;

    let mut sources = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| EtlError::Io(e.into()))?;
        if !path.is_file() {
            continue;
        }
        let source = SourceFile::from_path(path)?;
        registry.lookup(&source.table)?;
        sources.push(source);
    }

    let order = registry.table_names();
    sources.sort_by_key(|s| order.iter().position(|t| *t == s.table));
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn resolves_all_declared_tables_by_default() {
        let registry = SchemaRegistry::movies();
        let sources = sources_for_tables(Path::new("data"), &registry, &[]).unwrap();
        assert_eq!(
            sources,
            vec![
                SourceFile::new("movies_metadata", "data/movies_metadata.csv"),
                SourceFile::new("ratings", "data/ratings.csv"),
                SourceFile::new("links", "data/links.csv"),
            ]
        );
    }

    #[test]
    fn unknown_requested_table_is_an_error() {
        let registry = SchemaRegistry::movies();
        let err = sources_for_tables(Path::new("data"), &registry, &["keywords".to_string()]).unwrap_err();
        assert!(matches!(err, EtlError::UnknownTable { .. }));
    }

    #[test]
    fn discovery_maps_stems_and_orders_by_declaration() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("links.csv"), "movieId,imdbId,tmdbId\n").unwrap();
        fs::write(dir.path().join("ratings.csv"), "userId,movieId,rating,timestamp\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = SchemaRegistry::movies();
        let sources = discover_sources(dir.path(), "*.csv", &registry).unwrap();
        assert_eq!(
            sources.iter().map(|s| s.table.as_str()).collect::<Vec<_>>(),
            vec!["ratings", "links"]
        );
    }

    #[test]
    fn discovery_treats_directory_name_literally() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data[1]");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("links.csv"), "movieId,imdbId,tmdbId\n").unwrap();

        let sources = discover_sources(&dir, "*.csv", &SchemaRegistry::movies()).unwrap();
        assert_eq!(sources, vec![SourceFile::new("links", dir.join("links.csv"))]);
    }

    #[test]
    fn discovery_rejects_undeclared_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("credits.csv"), "cast\n").unwrap();
        let err = discover_sources(dir.path(), "*.csv", &SchemaRegistry::movies()).unwrap_err();
        assert!(matches!(err, EtlError::UnknownTable { ref table } if table == "credits"));
    }
}
