use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{EtlError, Severity};

use super::progress::ProgressCounter;
use super::LoadState;

/// Events emitted by the [`super::LoadExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    StateChanged {
        table: String,
        from: LoadState,
        to: LoadState,
    },
    /// A chunk was copied into the open transaction. Advisory only: nothing is durable until
    /// [`LoadEvent::Committed`].
    ChunkLoaded {
        table: String,
        chunk: usize,
        rows: u64,
        transform_failures: u64,
        progress: ProgressCounter,
    },
    Committed {
        table: String,
        rows_written: u64,
        elapsed: Duration,
    },
    Failed {
        table: String,
        severity: Severity,
        message: String,
    },
    RunFinished {
        elapsed: Duration,
        metrics: LoadMetricsSnapshot,
    },
}

/// Observer hook for load events and failures.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait LoadObserver: Send + Sync {
    fn on_event(&self, _event: &LoadEvent) {}

    /// Called when a table load fails.
    fn on_failure(&self, _table: &str, _severity: Severity, _error: &EtlError) {}

    /// Called, in addition to [`Self::on_failure`], when a failure meets the alert threshold.
    fn on_alert(&self, _table: &str, _severity: Severity, _error: &EtlError) {}
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_event(&self, event: &LoadEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }

    fn on_failure(&self, table: &str, severity: Severity, error: &EtlError) {
        for o in &self.observers {
            o.on_failure(table, severity, error);
        }
    }

    fn on_alert(&self, table: &str, severity: Severity, error: &EtlError) {
        for o in &self.observers {
            o.on_alert(table, severity, error);
        }
    }
}

/// Appends load events to a local log file, one line per event.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", unix_ts());
        }
    }
}

impl LoadObserver for FileObserver {
    fn on_event(&self, event: &LoadEvent) {
        match event {
            LoadEvent::StateChanged { table, from, to } => {
                self.append_line(&format!("state table={table} {from} -> {to}"));
            }
            LoadEvent::ChunkLoaded {
                table,
                chunk,
                progress,
                ..
            } => {
                self.append_line(&format!("chunk table={table} chunk={chunk} {progress}"));
            }
            LoadEvent::Committed {
                table,
                rows_written,
                elapsed,
            } => {
                self.append_line(&format!(
                    "committed table={table} rows={rows_written} elapsed_ms={}",
                    elapsed.as_millis()
                ));
            }
            LoadEvent::Failed { .. } => {}
            LoadEvent::RunFinished { metrics, .. } => {
                self.append_line(&format!("finished {metrics}"));
            }
        }
    }

    fn on_failure(&self, table: &str, severity: Severity, error: &EtlError) {
        self.append_line(&format!("fail severity={severity:?} table={table} err={error}"));
    }

    fn on_alert(&self, table: &str, severity: Severity, error: &EtlError) {
        self.append_line(&format!("ALERT severity={severity:?} table={table} err={error}"));
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Real-time counters for a load run.
///
/// The executor updates these during execution; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    rows_written: AtomicU64,
    chunks_loaded: AtomicU64,
    transform_failures: AtomicU64,
    tables_committed: AtomicU64,
    tables_failed: AtomicU64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_written.store(0, Ordering::SeqCst);
        self.chunks_loaded.store(0, Ordering::SeqCst);
        self.transform_failures.store(0, Ordering::SeqCst);
        self.tables_committed.store(0, Ordering::SeqCst);
        self.tables_failed.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_chunk_loaded(&self, rows: u64, transform_failures: u64) {
        let _ = self.chunks_loaded.fetch_add(1, Ordering::SeqCst);
        let _ = self.rows_written.fetch_add(rows, Ordering::SeqCst);
        let _ = self.transform_failures.fetch_add(transform_failures, Ordering::SeqCst);
    }

    pub fn on_table_committed(&self) {
        let _ = self.tables_committed.fetch_add(1, Ordering::SeqCst);
    }

    /// Rows copied by the failed table were rolled back; they are subtracted here.
    pub fn on_table_failed(&self, rolled_back_rows: u64) {
        let _ = self.tables_failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.rows_written.fetch_sub(rolled_back_rows, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        LoadMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            rows_written: self.rows_written.load(Ordering::SeqCst),
            chunks_loaded: self.chunks_loaded.load(Ordering::SeqCst),
            transform_failures: self.transform_failures.load(Ordering::SeqCst),
            tables_committed: self.tables_committed.load(Ordering::SeqCst),
            tables_failed: self.tables_failed.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    /// Rows in committed tables.
    pub rows_written: u64,
    pub chunks_loaded: u64,
    pub transform_failures: u64,
    pub tables_committed: u64,
    pub tables_failed: u64,
}

impl fmt::Display for LoadMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_written={}, chunks={}, transform_failures={}, tables={}/{} committed, elapsed={:?}",
            self.run_id,
            self.rows_written,
            self.chunks_loaded,
            self.transform_failures,
            self.tables_committed,
            self.tables_committed + self.tables_failed,
            self.elapsed
        )
    }
}
