use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rust_bulk_etl::execution::{FailurePolicy, LoadEvent, LoadExecutor, LoadObserver, LoadOptions, LoadState};
use rust_bulk_etl::ingestion::{ReaderOptions, sources_for_tables};
use rust_bulk_etl::lifecycle::PrepareMode;
use rust_bulk_etl::schema::SchemaRegistry;
use rust_bulk_etl::store::{MemoryStore, Store, StoredRow};
use rust_bulk_etl::transform::TransformRegistry;
use rust_bulk_etl::{ErrorKind, EtlError, Severity};

const FIXTURES: &str = "tests/fixtures";

fn row(values: &[Option<&str>]) -> StoredRow {
    values.iter().map(|v| v.map(str::to_string)).collect()
}

fn options(batch_size: usize) -> LoadOptions {
    LoadOptions {
        reader: ReaderOptions {
            batch_size,
            ..ReaderOptions::default()
        },
        ..LoadOptions::default()
    }
}

fn load_fixtures(store: &MemoryStore, options: LoadOptions) {
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let sources = sources_for_tables(Path::new(FIXTURES), &registry, &[]).unwrap();
    let executor = LoadExecutor::new(store, &registry, &transforms, options).unwrap();
    let summary = executor.run(&sources);
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.rows_written(), 5 + 7 + 11);
}

fn snapshot(store: &MemoryStore) -> Vec<(String, Vec<StoredRow>)> {
    store
        .table_names()
        .into_iter()
        .map(|t| {
            let rows = store.table_rows(&t).unwrap();
            (t, rows)
        })
        .collect()
}

fn write_links(dir: &Path, rows: usize) -> PathBuf {
    let mut text = String::from("movieId,imdbId,tmdbId\n");
    for i in 1..=rows {
        writeln!(text, "{i},{i:07},{}.0", i * 10).unwrap();
    }
    let path = dir.join("links.csv");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn loads_fixture_tables_with_coerced_values() {
    let store = MemoryStore::new(3);
    load_fixtures(&store, LoadOptions::default());

    let movies = store.table_rows("movies_metadata").unwrap();
    assert_eq!(movies.len(), 5);
    assert_eq!(
        movies[0],
        row(&[
            Some(r#"[{"id":16,"name":"Animation"},{"id":35,"name":"Comedy"}]"#),
            Some("tt0114709"),
            Some("373554033"),
            Some("30000000"),
            Some("1995-10-30"),
        ])
    );
    assert_eq!(movies[4], row(&[None, Some("tt0113041"), None, None, None]));

    let ratings = store.table_rows("ratings").unwrap();
    assert_eq!(ratings[0], row(&[Some("1"), Some("31"), Some("2.5"), Some("2009-12-14 02:52:24")]));
    assert_eq!(ratings[1][2].as_deref(), Some("3.0"));
    assert_eq!(ratings[5], row(&[Some("3"), Some("60"), None, Some("2011-02-28 02:54:35")]));
    assert_eq!(ratings[6], row(&[Some("7"), None, Some("4.5"), Some("1996-12-29 13:38:23")]));

    let links = store.table_rows("links").unwrap();
    assert_eq!(links.len(), 11);
    assert_eq!(links[0], row(&[Some("1"), Some("0114709"), Some("862")]));
    assert_eq!(links[10], row(&[Some("11"), Some("0113610"), None]));
}

#[test]
fn reruns_are_idempotent_in_both_prepare_modes() {
    for mode in [PrepareMode::Recreate, PrepareMode::Truncate] {
        let store = MemoryStore::new(2);
        let opts = LoadOptions {
            prepare_mode: mode,
            ..LoadOptions::default()
        };
        load_fixtures(&store, opts.clone());
        let first = snapshot(&store);
        load_fixtures(&store, opts);
        assert_eq!(snapshot(&store), first, "{mode}");
    }
}

#[test]
fn batch_size_does_not_change_the_result() {
    let reference = MemoryStore::new(1);
    load_fixtures(&reference, options(1_000));
    let expected = snapshot(&reference);

    for batch_size in [1, 2, 3, 5, 7] {
        let store = MemoryStore::new(1);
        load_fixtures(&store, options(batch_size));
        assert_eq!(snapshot(&store), expected, "batch_size={batch_size}");
    }
}

#[test]
fn lost_connection_mid_load_leaves_the_table_empty() {
    let store = MemoryStore::new(1);
    load_fixtures(&store, LoadOptions::default());
    assert_eq!(store.table_rows("links").unwrap().len(), 11);

    // Chunks 1 and 2 succeed, chunk 3 fails.
    store.fail_copy_after("links", 2);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let executor = LoadExecutor::new(&store, &registry, &transforms, options(4)).unwrap();
    let err = executor
        .load_table("links", &Path::new(FIXTURES).join("links.csv"))
        .unwrap_err();

    match &err {
        EtlError::Load { table, chunk, source } => {
            assert_eq!(table, "links");
            assert_eq!(*chunk, 3);
            assert!(source.to_string().contains("connection lost"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
    assert_eq!(err.severity(), Severity::Critical);
    assert!(store.table_rows("links").unwrap().is_empty());
    assert_eq!(store.idle_connections(), 1);
}

#[test]
fn store_rejection_rolls_back_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ratings.csv");
    // 123.4 does not fit DECIMAL(3, 1).
    fs::write(
        &path,
        "userId,movieId,rating,timestamp\n1,31,2.5,1260759144\n1,1029,3.0,1260759179\n1,1061,123.4,1260759182\n",
    )
    .unwrap();

    let store = MemoryStore::new(1);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let executor = LoadExecutor::new(&store, &registry, &transforms, options(2)).unwrap();
    let err = executor.load_table("ratings", &path).unwrap_err();

    assert!(matches!(err, EtlError::Load { chunk: 2, .. }), "{err:?}");
    assert_eq!(err.severity(), Severity::Error);
    assert!(err.to_string().contains("overflow"), "{err}");
    assert!(store.table_rows("ratings").unwrap().is_empty());
    assert_eq!(executor.metrics().snapshot().rows_written, 0);
}

#[derive(Default)]
struct ProgressRecorder {
    lines: Mutex<Vec<String>>,
    states: Mutex<Vec<LoadState>>,
}

impl LoadObserver for ProgressRecorder {
    fn on_event(&self, event: &LoadEvent) {
        match event {
            LoadEvent::ChunkLoaded { progress, .. } => {
                self.lines.lock().unwrap().push(format!("{:.2}", progress.percent()));
            }
            LoadEvent::StateChanged { to, .. } => self.states.lock().unwrap().push(*to),
            _ => {}
        }
    }
}

#[test]
fn progress_is_reported_per_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_links(dir.path(), 12_345);

    let store = MemoryStore::new(1);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let recorder = Arc::new(ProgressRecorder::default());
    let executor = LoadExecutor::new(&store, &registry, &transforms, options(5_000))
        .unwrap()
        .with_observer(recorder.clone());

    let report = executor.load_table("links", &path).unwrap();
    assert_eq!(report.rows_written, 12_345);
    assert_eq!(report.total_rows, 12_345);
    assert_eq!(report.chunks, 3);
    assert_eq!(*recorder.lines.lock().unwrap(), vec!["40.50", "81.00", "100.00"]);
    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![LoadState::TableReady, LoadState::Loading, LoadState::Committed]
    );
    assert_eq!(store.table_rows("links").unwrap().len(), 12_345);
}

#[test]
fn empty_source_commits_an_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_links(dir.path(), 0);

    let store = MemoryStore::new(1);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let executor = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default()).unwrap();
    let report = executor.load_table("links", &path).unwrap();

    assert_eq!(report.state, LoadState::Committed);
    assert_eq!(report.rows_written, 0);
    assert_eq!(report.chunks, 0);
    assert!(store.table_rows("links").unwrap().is_empty());
}

#[test]
fn reordered_source_columns_land_in_declared_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.csv");
    fs::write(&path, "tmdbId,notes,imdbId,movieId\n862.0,ignored,0114709,1\n").unwrap();

    let store = MemoryStore::new(1);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let executor = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default()).unwrap();
    executor.load_table("links", &path).unwrap();

    assert_eq!(
        store.table_rows("links").unwrap(),
        vec![row(&[Some("1"), Some("0114709"), Some("862")])]
    );
}

#[test]
fn delimiter_and_control_characters_survive_the_copy_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movies_metadata.csv");
    fs::write(
        &path,
        "genres,imdb_id,revenue,budget,release_date\n[],\"tt|01\\\\N\tx\ny\",1,2,1995-10-30\n[],\\N,1,2,1995-10-30\n",
    )
    .unwrap();

    let store = MemoryStore::new(1);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    let executor = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default()).unwrap();
    executor.load_table("movies_metadata", &path).unwrap();

    let rows = store.table_rows("movies_metadata").unwrap();
    assert_eq!(rows[0][1].as_deref(), Some("tt|01\\\\N\tx\ny"));
    // A literal `\N` in the source is text, not null.
    assert_eq!(rows[1][1].as_deref(), Some("\\N"));
}

#[test]
fn continue_policy_loads_the_remaining_tables() {
    let dir = tempfile::tempdir().unwrap();
    write_links(dir.path(), 3);
    let registry = SchemaRegistry::movies();
    let transforms = TransformRegistry::builtin();
    // ratings.csv and movies_metadata.csv are missing from `dir`.
    let sources = sources_for_tables(dir.path(), &registry, &[]).unwrap();

    let store = MemoryStore::new(1);
    let executor = LoadExecutor::new(
        &store,
        &registry,
        &transforms,
        LoadOptions {
            failure_policy: FailurePolicy::Continue,
            ..LoadOptions::default()
        },
    )
    .unwrap();
    let summary = executor.run(&sources);

    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].table, "links");
    assert_eq!(store.table_rows("links").unwrap().len(), 3);
    let metrics = executor.metrics().snapshot();
    assert_eq!(metrics.tables_committed, 1);
    assert_eq!(metrics.tables_failed, 2);
    assert_eq!(metrics.rows_written, 3);
}

#[test]
fn connections_are_returned_to_the_pool() {
    let store = MemoryStore::new(2);
    load_fixtures(&store, options(3));
    assert_eq!(store.idle_connections(), store.pool_size());
}

#[test]
fn export_writes_csv_with_header() {
    let store = MemoryStore::new(1);
    load_fixtures(&store, LoadOptions::default());
    let registry = SchemaRegistry::movies();

    let mut out = Vec::new();
    let mut conn = store.acquire().unwrap();
    conn.copy_out(registry.lookup("links").unwrap(), &mut out).unwrap();
    drop(conn);

    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("movieId,imdbId,tmdbId"));
    assert_eq!(lines.next(), Some("1,0114709,862"));
    assert_eq!(text.lines().count(), 12);
    assert!(text.ends_with("11,0113610,\n"));
}
