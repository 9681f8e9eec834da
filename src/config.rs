//! Configuration file support.
//!
//! Handles parsing of the TOML configuration file. Every section is optional; CLI flags are
//! applied on top by the binary.
//!
//! ```toml
//! [load]
//! batch_size = 5000
//! prepare_mode = "truncate"
//!
//! [database]
//! host = "db.internal"
//! dbname = "movies_data"
//!
//! [[tables]]
//! name = "links"
//! columns = [
//!     { name = "movieId", type = "INTEGER", transform = "int" },
//!     { name = "imdbId", type = "TEXT" },
//! ]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::copy::CopyFormat;
use crate::error::{EtlError, EtlResult};
use crate::execution::{FailurePolicy, LoadOptions};
use crate::ingestion::ReaderOptions;
use crate::lifecycle::PrepareMode;
use crate::processing::TransformOptions;
use crate::schema::{SchemaRegistry, TableSchema};
use crate::transform::TransformRegistry;

/// Default configuration filename, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "bulk-etl.toml";

/// Load options section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Rows per chunk (and per COPY statement).
    pub batch_size: usize,
    /// Field delimiter of the source files.
    pub delimiter: char,
    pub has_headers: bool,
    pub null_tokens: Vec<String>,
    pub prepare_mode: PrepareMode,
    pub failure_policy: FailurePolicy,
    /// Transform worker threads; unset uses rayon's global pool.
    pub num_threads: Option<usize>,
    pub copy_delimiter: char,
    pub copy_null: String,
    /// Directory holding `<table>.csv` source files.
    pub data_dir: PathBuf,
}

impl Default for LoadConfig {
    fn default() -> Self {
        let reader = ReaderOptions::default();
        let copy = CopyFormat::default();
        Self {
            batch_size: reader.batch_size,
            delimiter: reader.delimiter as char,
            has_headers: reader.has_headers,
            null_tokens: reader.null_tokens,
            prepare_mode: PrepareMode::default(),
            failure_policy: FailurePolicy::default(),
            num_threads: None,
            copy_delimiter: copy.delimiter as char,
            copy_null: copy.null,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl LoadConfig {
    pub fn reader_options(&self) -> EtlResult<ReaderOptions> {
        Ok(ReaderOptions {
            batch_size: self.batch_size,
            delimiter: ascii_byte("delimiter", self.delimiter)?,
            has_headers: self.has_headers,
            null_tokens: self.null_tokens.clone(),
        })
    }

    pub fn copy_format(&self) -> EtlResult<CopyFormat> {
        Ok(CopyFormat {
            delimiter: ascii_byte("copy_delimiter", self.copy_delimiter)?,
            null: self.copy_null.clone(),
        })
    }

    /// Build validated executor options.
    pub fn load_options(&self) -> EtlResult<LoadOptions> {
        let options = LoadOptions {
            reader: self.reader_options()?,
            copy: self.copy_format()?,
            transform: TransformOptions {
                num_threads: self.num_threads,
                ..TransformOptions::default()
            },
            prepare_mode: self.prepare_mode,
            failure_policy: self.failure_policy,
            ..LoadOptions::default()
        };
        options.validate()?;
        Ok(options)
    }
}

fn ascii_byte(field: &str, c: char) -> EtlResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(EtlError::config(format!("{field} must be a single ASCII character, got {c:?}")))
    }
}

/// PostgreSQL connection section
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            dbname: "movies_data".to_string(),
            pool_size: 3,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> EtlResult<()> {
        if self.pool_size == 0 {
            return Err(EtlError::config("pool_size must be >= 1"));
        }
        if self.host.trim().is_empty() {
            return Err(EtlError::config("database host must not be empty"));
        }
        if self.dbname.trim().is_empty() {
            return Err(EtlError::config("database name must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub load: LoadConfig,
    pub database: DatabaseConfig,
    /// Declared tables. Empty means the built-in movies schema.
    pub tables: Vec<TableSchema>,
}

impl EtlConfig {
    pub fn from_toml_str(s: &str) -> EtlResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, else [`CONFIG_FILENAME`] when present, else defaults.
    pub fn load(path: Option<&Path>) -> EtlResult<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None if Path::new(CONFIG_FILENAME).is_file() => Self::from_path(CONFIG_FILENAME),
            None => Ok(Self::default()),
        }
    }

    pub fn schema_registry(&self) -> EtlResult<SchemaRegistry> {
        if self.tables.is_empty() {
            Ok(SchemaRegistry::movies())
        } else {
            SchemaRegistry::new(self.tables.clone())
        }
    }

    /// Everything that can be checked without I/O.
    pub fn validate(&self) -> EtlResult<()> {
        self.load.load_options()?;
        self.database.validate()?;
        self.schema_registry()?.validate(&TransformRegistry::builtin())
    }
}
