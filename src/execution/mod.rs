//! Load executor: the per-table state machine that drives read → transform → serialize → COPY.
//!
//! This module sits "above" [`crate::ingestion`], [`crate::processing`] and [`crate::copy`] and
//! provides:
//!
//! - all-or-nothing table loads (one transaction per table, rolled back on any chunk failure)
//! - per-chunk progress events and log lines
//! - real-time metrics + observer hooks for monitoring
//!
//! States per table: `NotStarted → TableReady → Loading → Committed`, or `Loading → Failed`.
//! Configuration problems (unknown table, unreadable file, missing column) fail in `NotStarted`,
//! before any database work.

mod observer;
mod progress;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use crate::copy::{CopyFormat, serialize_batch};
use crate::error::{EtlError, EtlResult, Severity};
use crate::ingestion::{ChunkedReader, ReaderOptions, SourceFile, count_data_lines};
use crate::lifecycle::{PrepareMode, TableLifecycle};
use crate::processing::{RowTransformer, TransformOptions, TransformPlan, TransformStats};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::store::{Connection, Store, Transaction};
use crate::transform::TransformRegistry;
use crate::types::RowBatch;

pub use observer::{CompositeObserver, FileObserver, LoadEvent, LoadMetrics, LoadMetricsSnapshot, LoadObserver};
pub use progress::ProgressCounter;

/// State of one table load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotStarted,
    TableReady,
    Loading,
    Committed,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::NotStarted => "NOT_STARTED",
            LoadState::TableReady => "TABLE_READY",
            LoadState::Loading => "LOADING",
            LoadState::Committed => "COMMITTED",
            LoadState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What [`LoadExecutor::run`] does after a table fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run at the first failed table.
    #[default]
    Stop,
    /// Record the failure and continue with the next table.
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stop" => Ok(FailurePolicy::Stop),
            "continue" => Ok(FailurePolicy::Continue),
            _ => Err(EtlError::config(format!(
                "unknown failure policy '{s}'. Use 'stop' or 'continue'."
            ))),
        }
    }
}

/// Configuration for the [`LoadExecutor`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub reader: ReaderOptions,
    pub copy: CopyFormat,
    pub transform: TransformOptions,
    pub prepare_mode: PrepareMode,
    pub failure_policy: FailurePolicy,
    /// Failures at or above this severity are also reported through [`LoadObserver::on_alert`].
    pub alert_at_or_above: Severity,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            reader: ReaderOptions::default(),
            copy: CopyFormat::default(),
            transform: TransformOptions::default(),
            prepare_mode: PrepareMode::default(),
            failure_policy: FailurePolicy::default(),
            alert_at_or_above: Severity::Critical,
        }
    }
}

impl LoadOptions {
    pub fn validate(&self) -> EtlResult<()> {
        self.reader.validate()?;
        self.copy.validate()?;
        if self.transform.num_threads == Some(0) {
            return Err(EtlError::config("num_threads must be > 0 when set"));
        }
        Ok(())
    }
}

/// Outcome of one successful table load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub table: String,
    pub state: LoadState,
    pub rows_written: u64,
    /// Pre-scan estimate.
    pub total_rows: u64,
    pub chunks: usize,
    pub transform_failures: u64,
    pub elapsed: Duration,
}

/// Outcome of [`LoadExecutor::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<LoadReport>,
    pub failures: Vec<(String, EtlError)>,
    /// Tables not attempted because an earlier table failed under [`FailurePolicy::Stop`].
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub fn rows_written(&self) -> u64 {
        self.reports.iter().map(|r| r.rows_written).sum()
    }

    /// Highest severity among failed tables.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.failures.iter().map(|(_, e)| e.severity()).max()
    }
}

/// Loads source files into declared tables through a [`Store`].
pub struct LoadExecutor<'a> {
    store: &'a dyn Store,
    registry: &'a SchemaRegistry,
    transforms: &'a TransformRegistry,
    options: LoadOptions,
    observer: Option<Arc<dyn LoadObserver>>,
    metrics: Arc<LoadMetrics>,
}

impl<'a> LoadExecutor<'a> {
    /// Validates the options and that every declared transform is registered, before any I/O.
    pub fn new(
        store: &'a dyn Store,
        registry: &'a SchemaRegistry,
        transforms: &'a TransformRegistry,
        options: LoadOptions,
    ) -> EtlResult<Self> {
        options.validate()?;
        registry.validate(transforms)?;
        Ok(Self {
            store,
            registry,
            transforms,
            options,
            observer: None,
            metrics: Arc::new(LoadMetrics::new()),
        })
    }

    /// Attach an observer for load events (metrics/logging/alerting).
    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time load metrics.
    pub fn metrics(&self) -> Arc<LoadMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load every source in order, honouring the failure policy.
    pub fn run(&self, sources: &[SourceFile]) -> RunSummary {
        let start = Instant::now();
        self.metrics.begin_run();

        let mut summary = RunSummary::default();
        for (idx, source) in sources.iter().enumerate() {
            match self.load_table(&source.table, &source.path) {
                Ok(report) => summary.reports.push(report),
                Err(err) => {
                    summary.failures.push((source.table.clone(), err));
                    if self.options.failure_policy == FailurePolicy::Stop {
                        summary.skipped = sources[idx + 1..].iter().map(|s| s.table.clone()).collect();
                        if !summary.skipped.is_empty() {
                            warn!(skipped = ?summary.skipped, "stopping after failed table");
                        }
                        break;
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        self.metrics.end_run(elapsed);
        let metrics = self.metrics.snapshot();
        info!(%metrics, "run finished");
        self.emit(LoadEvent::RunFinished { elapsed, metrics });
        summary
    }

    /// Prepare `table` and load `path` into it in one transaction.
    ///
    /// On error nothing from this load is visible in the table, and the error has been reported to
    /// the observer.
    pub fn load_table(&self, table: &str, path: &Path) -> EtlResult<LoadReport> {
        let span = info_span!("load_table", table);
        let _enter = span.enter();

        let result = self.load_table_inner(table, path);
        if let Err(err) = &result {
            self.report_failure(table, err);
        }
        result
    }

    fn load_table_inner(&self, table: &str, path: &Path) -> EtlResult<LoadReport> {
        let start = Instant::now();
        let schema = self.registry.lookup(table)?;

        // Everything that can fail without touching the database happens first.
        let plan = TransformPlan::for_table(schema, self.transforms)?;
        let transformer = RowTransformer::new(plan, &self.options.transform)?;
        let total_rows = count_data_lines(path, self.options.reader.has_headers)?;
        let reader = ChunkedReader::open(path, &schema.column_names(), &self.options.reader)?;
        info!(
            path = %path.display(),
            total_rows,
            batch_size = self.options.reader.batch_size,
            "starting load"
        );

        TableLifecycle::new(self.store, self.registry).prepare_schema(schema, self.options.prepare_mode)?;
        self.transition(table, LoadState::NotStarted, LoadState::TableReady);

        let mut conn = self.store.acquire()?;
        let mut tx = Transaction::begin(&mut *conn)?;
        self.transition(table, LoadState::TableReady, LoadState::Loading);

        let mut progress = ProgressCounter::new(total_rows);
        let mut chunks = 0usize;
        let mut transform_failures = 0u64;

        for batch in reader {
            let chunk = chunks + 1;
            match self.load_chunk(&mut *tx, schema, &transformer, batch) {
                Ok((rows, stats)) => {
                    chunks = chunk;
                    transform_failures += stats.failures;
                    progress.advance(rows);
                    self.metrics.on_chunk_loaded(rows, stats.failures);
                    info!(
                        table,
                        chunk,
                        rows_written = progress.rows_written(),
                        total_rows = progress.total_rows(),
                        percent = progress.percent(),
                        "{table} {progress} written"
                    );
                    self.emit(LoadEvent::ChunkLoaded {
                        table: table.to_string(),
                        chunk,
                        rows,
                        transform_failures: stats.failures,
                        progress,
                    });
                }
                Err(source) => {
                    return Err(self.abort(tx, table, chunk, progress.rows_written(), source));
                }
            }
        }

        if let Err(source) = tx.commit() {
            error!(table, chunks, error = %source, "commit failed, load rolled back");
            self.transition(table, LoadState::Loading, LoadState::Failed);
            self.metrics.on_table_failed(progress.rows_written());
            return Err(EtlError::Load {
                table: table.to_string(),
                chunk: chunks,
                source: Box::new(source),
            });
        }

        let elapsed = start.elapsed();
        self.transition(table, LoadState::Loading, LoadState::Committed);
        self.metrics.on_table_committed();
        info!(
            table,
            rows_written = progress.rows_written(),
            chunks,
            transform_failures,
            elapsed_ms = elapsed.as_millis() as u64,
            "load committed"
        );
        self.emit(LoadEvent::Committed {
            table: table.to_string(),
            rows_written: progress.rows_written(),
            elapsed,
        });

        Ok(LoadReport {
            table: table.to_string(),
            state: LoadState::Committed,
            rows_written: progress.rows_written(),
            total_rows,
            chunks,
            transform_failures,
            elapsed,
        })
    }

    /// Transform, serialize and copy one chunk into the open transaction.
    fn load_chunk<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        schema: &TableSchema,
        transformer: &RowTransformer,
        batch: EtlResult<RowBatch>,
    ) -> EtlResult<(u64, TransformStats)> {
        let (batch, stats) = transformer.transform(batch?)?;
        let payload = serialize_batch(schema, &batch, &self.options.copy)?;
        drop(batch);
        let rows = conn.copy_in(&payload)?;
        Ok((rows, stats))
    }

    /// Roll back the table's transaction and build the error to return.
    fn abort<C: Connection + ?Sized>(
        &self,
        tx: Transaction<'_, C>,
        table: &str,
        chunk: usize,
        rows_copied: u64,
        source: EtlError,
    ) -> EtlError {
        error!(table, chunk, error = %source, "chunk failed, rolling back");
        if let Err(rollback_err) = tx.rollback() {
            warn!(table, error = %rollback_err, "rollback failed; the connection is discarded");
        }
        self.transition(table, LoadState::Loading, LoadState::Failed);
        self.metrics.on_table_failed(rows_copied);
        EtlError::Load {
            table: table.to_string(),
            chunk,
            source: Box::new(source),
        }
    }

    fn transition(&self, table: &str, from: LoadState, to: LoadState) {
        info!(table, %from, %to, "state change");
        self.emit(LoadEvent::StateChanged {
            table: table.to_string(),
            from,
            to,
        });
    }

    fn report_failure(&self, table: &str, err: &EtlError) {
        let severity = err.severity();
        if !matches!(err, EtlError::Load { .. }) {
            // Failed before the chunk loop started; nothing was written.
            error!(table, kind = ?err.kind(), error = %err, "table load failed");
            self.metrics.on_table_failed(0);
        }
        self.emit(LoadEvent::Failed {
            table: table.to_string(),
            severity,
            message: err.to_string(),
        });
        if let Some(obs) = &self.observer {
            obs.on_failure(table, severity, err);
            if severity >= self.options.alert_at_or_above {
                obs.on_alert(table, severity, err);
            }
        }
    }

    fn emit(&self, event: LoadEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Resolve where each requested table's source file lives.
///
/// `glob` takes precedence over `tables`; with neither, every declared table is loaded from
/// `<data_dir>/<table>.csv`.
pub fn resolve_sources(
    data_dir: &Path,
    registry: &SchemaRegistry,
    tables: &[String],
    glob: Option<&str>,
) -> EtlResult<Vec<SourceFile>> {
    match glob {
        Some(pattern) => {
            let mut sources = crate::ingestion::discover_sources(data_dir, pattern, registry)?;
            if !tables.is_empty() {
                sources.retain(|s| tables.contains(&s.table));
            }
            Ok(sources)
        }
        None => crate::ingestion::sources_for_tables(data_dir, registry, tables),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    const LINKS: &str = "movieId,imdbId,tmdbId\n1,0114709,862.0\n2,0113497,8844.0\n3,0113228,\n";

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<LoadEvent>>,
        alerts: Mutex<Vec<Severity>>,
    }

    impl LoadObserver for Recorder {
        fn on_event(&self, event: &LoadEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_alert(&self, _table: &str, severity: Severity, _error: &EtlError) {
            self.alerts.lock().unwrap().push(severity);
        }
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

    #[test]
    fn state_machine_walks_to_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.csv");
        fs::write(&path, LINKS).unwrap();

        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let recorder = Arc::new(Recorder::default());
        let executor = LoadExecutor::new(&store, &registry, &transforms, options(2))
            .unwrap()
            .with_observer(recorder.clone());

        let report = executor.load_table("links", &path).unwrap();
        assert_eq!(report.state, LoadState::Committed);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.chunks, 2);

        let states: Vec<(LoadState, LoadState)> = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                LoadEvent::StateChanged { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                (LoadState::NotStarted, LoadState::TableReady),
                (LoadState::TableReady, LoadState::Loading),
                (LoadState::Loading, LoadState::Committed),
            ]
        );
        assert_eq!(
            store.table_rows("links").unwrap()[2],
            vec![Some("3".to_string()), Some("0113228".to_string()), None]
        );
        assert_eq!(store.idle_connections(), 1);
    }

    #[test]
    fn chunk_failure_rolls_back_and_reports_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.csv");
        fs::write(&path, LINKS).unwrap();

        let store = MemoryStore::new(1);
        store.fail_copy_after("links", 1);
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let recorder = Arc::new(Recorder::default());
        let executor = LoadExecutor::new(&store, &registry, &transforms, options(2))
            .unwrap()
            .with_observer(recorder.clone());

        let err = executor.load_table("links", &path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
        assert!(matches!(err, EtlError::Load { chunk: 2, .. }));
        assert!(store.table_rows("links").unwrap().is_empty());
        assert_eq!(store.idle_connections(), 1);
        assert_eq!(*recorder.alerts.lock().unwrap(), vec![Severity::Critical]);
        assert_eq!(executor.metrics().snapshot().rows_written, 0);
    }

    #[test]
    fn failed_commit_leaves_table_empty_and_reports_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.csv");
        fs::write(&path, LINKS).unwrap();

        let store = MemoryStore::new(1);
        store.fail_commit("links");
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let recorder = Arc::new(Recorder::default());
        let executor = LoadExecutor::new(&store, &registry, &transforms, options(2))
            .unwrap()
            .with_observer(recorder.clone());

        let err = executor.load_table("links", &path).unwrap_err();
        assert!(matches!(err, EtlError::Load { chunk: 2, .. }));
        assert_eq!(err.severity(), Severity::Critical);
        assert!(store.table_rows("links").unwrap().is_empty());
        assert_eq!(store.idle_connections(), 1);

        let last_state = recorder.events.lock().unwrap().iter().rev().find_map(|e| match e {
            LoadEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        });
        assert_eq!(last_state, Some(LoadState::Failed));
        assert_eq!(executor.metrics().snapshot().tables_failed, 1);

        store.clear_faults();
        executor.load_table("links", &path).unwrap();
        assert_eq!(store.table_rows("links").unwrap().len(), 3);
    }

    #[test]
    fn missing_file_fails_before_touching_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let executor = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default()).unwrap();

        let err = executor
            .load_table("links", &dir.path().join("links.csv"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationFailure);
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!store.contains_table("links"));
    }

    #[test]
    fn run_stops_or_continues_per_policy() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("links.csv"), LINKS).unwrap();
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let sources = vec![
            SourceFile::new("ratings", dir.path().join("ratings.csv")),
            SourceFile::new("links", dir.path().join("links.csv")),
        ];

        let store = MemoryStore::new(1);
        let stop = LoadExecutor::new(&store, &registry, &transforms, LoadOptions::default()).unwrap();
        let summary = stop.run(&sources);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.skipped, vec!["links".to_string()]);
        assert!(!summary.is_success());

        let store = MemoryStore::new(1);
        let cont = LoadExecutor::new(
            &store,
            &registry,
            &transforms,
            LoadOptions {
                failure_policy: FailurePolicy::Continue,
                ..LoadOptions::default()
            },
        )
        .unwrap();
        let summary = cont.run(&sources);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.rows_written(), 3);
        assert_eq!(summary.worst_severity(), Some(Severity::Critical));
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        let store = MemoryStore::new(1);
        let registry = SchemaRegistry::movies();
        let transforms = TransformRegistry::builtin();
        let err = LoadExecutor::new(&store, &registry, &transforms, options(0)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigurationFailure);

        let err = LoadExecutor::new(&store, &registry, &TransformRegistry::empty(), LoadOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, EtlError::UnknownTransform { .. }));
    }
}
