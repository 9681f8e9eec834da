//! Column transforms applied to whole batches.

use std::fmt;
use std::sync::Arc;

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::error::{EtlError, EtlResult};
use crate::schema::TableSchema;
use crate::transform::{FieldLocation, TransformFn, TransformRegistry, apply_isolated};
use crate::types::{RowBatch, Value};

struct TransformStep {
    column: usize,
    id: String,
    func: TransformFn,
}

/// Per-column transforms of one table, resolved once from the registry.
pub struct TransformPlan {
    table: String,
    columns: Arc<[String]>,
    steps: Vec<TransformStep>,
}

impl TransformPlan {
    /// Resolve the transforms declared by `schema`.
    ///
    /// Fails if a column references a transform id that is not registered.
    pub fn for_table(schema: &TableSchema, registry: &TransformRegistry) -> EtlResult<Self> {
        let mut steps = Vec::new();
        for (column, spec) in schema.columns.iter().enumerate() {
            let Some(id) = &spec.transform else {
                continue;
            };
            let func = registry.get(id).ok_or_else(|| EtlError::UnknownTransform {
                table: schema.name.clone(),
                column: spec.name.clone(),
                transform: id.clone(),
            })?;
            steps.push(TransformStep {
                column,
                id: id.clone(),
                func,
            });
        }

        Ok(Self {
            table: schema.name.clone(),
            columns: schema.column_names().into(),
            steps,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// True if no column declares a transform.
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for TransformPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPlan")
            .field("table", &self.table)
            .field(
                "steps",
                &self
                    .steps
                    .iter()
                    .map(|s| (self.columns[s.column].as_str(), s.id.as_str()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Counters for one transformed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Values passed through a transform.
    pub values_transformed: u64,
    /// Values whose transform failed and were replaced by null.
    pub failures: u64,
}

impl TransformStats {
    pub fn merge(&mut self, other: TransformStats) {
        self.values_transformed += other.values_transformed;
        self.failures += other.failures;
    }
}

/// Configuration for the [`RowTransformer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Worker threads for batch transforms. `None` uses rayon's global pool.
    pub num_threads: Option<usize>,
    /// Batches with fewer rows than this are transformed on the calling thread.
    pub parallel_threshold: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            num_threads: None,
            parallel_threshold: 4_096,
        }
    }
}

/// Applies a [`TransformPlan`] to batches.
///
/// Rows may be processed in parallel; the result is identical to applying each transform to each
/// row in order, and a failing value only nulls itself.
pub struct RowTransformer {
    plan: TransformPlan,
    pool: Option<ThreadPool>,
    parallel_threshold: usize,
}

impl RowTransformer {
    pub fn new(plan: TransformPlan, options: &TransformOptions) -> EtlResult<Self> {
        let pool = match options.num_threads {
            Some(0) => return Err(EtlError::config("num_threads must be > 0 when set")),
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("transform-{i}"))
                    .build()
                    .map_err(|e| EtlError::config(format!("failed to build transform thread pool: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            plan,
            pool,
            parallel_threshold: options.parallel_threshold.max(1),
        })
    }

    pub fn plan(&self) -> &TransformPlan {
        &self.plan
    }

    /// Consume a batch and return its transformed replacement.
    ///
    /// The batch's columns must match the plan's table declaration exactly.
    pub fn transform(&self, batch: RowBatch) -> EtlResult<(RowBatch, TransformStats)> {
        if *batch.columns != *self.plan.columns {
            return Err(EtlError::schema_mismatch(format!(
                "batch columns {:?} do not match table '{}' columns {:?}",
                batch.columns, self.plan.table, self.plan.columns
            )));
        }
        let width = self.plan.columns.len();
        if let Some(bad) = batch.rows.iter().position(|r| r.len() != width) {
            return Err(EtlError::schema_mismatch(format!(
                "row {} has {} values, expected {width}",
                batch.offset + bad as u64,
                batch.rows[bad].len()
            )));
        }

        let RowBatch {
            columns,
            rows,
            offset,
        } = batch;

        if self.plan.is_identity() {
            return Ok((RowBatch::new(columns, rows, offset), TransformStats::default()));
        }

        let results: Vec<(Vec<Value>, u64)> = if rows.len() >= self.parallel_threshold {
            let run = || {
                rows.into_par_iter()
                    .enumerate()
                    .map(|(i, row)| self.transform_row(row, offset + i as u64))
                    .collect::<Vec<_>>()
            };
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        } else {
            rows.into_iter()
                .enumerate()
                .map(|(i, row)| self.transform_row(row, offset + i as u64))
                .collect()
        };

        let mut stats = TransformStats::default();
        let mut out = Vec::with_capacity(results.len());
        for (row, failures) in results {
            stats.values_transformed += self.plan.steps.len() as u64;
            stats.failures += failures;
            out.push(row);
        }

        Ok((RowBatch::new(columns, out, offset), stats))
    }

    fn transform_row(&self, mut row: Vec<Value>, row_idx: u64) -> (Vec<Value>, u64) {
        let mut failures = 0;
        for step in &self.plan.steps {
            let location = FieldLocation {
                table: &self.plan.table,
                column: &self.plan.columns[step.column],
                row: row_idx,
            };
            let raw = std::mem::replace(&mut row[step.column], Value::Null);
            let (coerced, failed) = apply_isolated(step.func, &raw, &location);
            if failed {
                failures += 1;
            }
            row[step.column] = coerced;
        }
        (row, failures)
    }
}
