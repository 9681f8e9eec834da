use thiserror::Error;

/// Convenience result type used across the crate.
pub type EtlResult<T> = Result<T, EtlError>;

/// Coarse classification of an error, so callers can branch on recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A single field could not be coerced. Always recovered locally (the value becomes null).
    TransformFailure,
    /// The bulk load of a table failed. The table's transaction has been rolled back.
    LoadFailure,
    /// Schema, configuration or input-file problem detected before any data was loaded.
    ConfigurationFailure,
}

/// Severity classification used for observer callbacks and the exit status of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Non-fatal event.
    Warning,
    /// The current table failed.
    Error,
    /// Infrastructure failure (I/O, lost connection, exhausted pool).
    Critical,
}

/// Error type returned by schema, ingestion, serialization, store and load operations.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The source file is not valid delimited text.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A table name that is not declared in the schema registry.
    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    /// A column references a transform id that is not registered.
    #[error("table '{table}' column '{column}' references unknown transform '{transform}'")]
    UnknownTransform {
        table: String,
        column: String,
        transform: String,
    },

    /// The input does not conform to the declared schema (missing columns, misaligned batch, ...).
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The store rejected an operation (bad COPY payload, constraint violation, lost connection).
    #[error("store error: {message}")]
    Store { message: String, critical: bool },

    /// A table load failed inside its chunk loop. The load transaction was rolled back.
    #[error("load of table '{table}' failed at chunk {chunk} (rolled back): {source}")]
    Load {
        table: String,
        chunk: usize,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            critical: false,
        }
    }

    pub(crate) fn store_critical(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            critical: true,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Io(_)
            | EtlError::ConfigParse(_)
            | EtlError::UnknownTable { .. }
            | EtlError::UnknownTransform { .. }
            | EtlError::SchemaMismatch { .. }
            | EtlError::Config { .. } => ErrorKind::ConfigurationFailure,
            // A malformed source file discovered before loading starts is an input problem; once
            // inside the chunk loop it is wrapped in `Load`.
            EtlError::Csv(_) => ErrorKind::ConfigurationFailure,
            EtlError::Store { .. } | EtlError::Load { .. } => ErrorKind::LoadFailure,
        }
    }

    /// Severity of this error, for observers and alerting.
    pub fn severity(&self) -> Severity {
        match self {
            EtlError::Io(_) => Severity::Critical,
            EtlError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            EtlError::Store { critical, .. } => {
                if *critical {
                    Severity::Critical
                } else {
                    Severity::Error
                }
            }
            EtlError::Load { source, .. } => source.severity(),
            _ => Severity::Error,
        }
    }
}

/// A single field could not be coerced by a transform.
///
/// Never propagated out of a batch: the row transformer logs it and substitutes a null.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transform '{transform}' rejected value '{raw}': {message}")]
pub struct TransformError {
    pub transform: &'static str,
    pub raw: String,
    pub message: String,
}

impl TransformError {
    pub fn new(transform: &'static str, raw: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transform,
            raw: raw.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::TransformFailure
    }
}
