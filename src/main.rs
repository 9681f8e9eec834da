use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use rust_bulk_etl::config::{DatabaseConfig, EtlConfig};
use rust_bulk_etl::execution::{FailurePolicy, FileObserver, LoadExecutor, resolve_sources};
use rust_bulk_etl::lifecycle::ddl::create_table_sql;
use rust_bulk_etl::lifecycle::{PrepareMode, TableLifecycle};
use rust_bulk_etl::logging::{LogConfig, LogFormat, init_logging};
use rust_bulk_etl::store::{MemoryStore, Store, Transaction};
use rust_bulk_etl::transform::TransformRegistry;

#[derive(Parser, Debug)]
#[command(name = "bulk-etl", version, about = "Bulk-load delimited files into PostgreSQL via COPY")]
struct Cli {
    /// Configuration file (defaults to ./bulk-etl.toml when present)
    #[arg(long, global = true, env = "BULK_ETL_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    db: DbArgs,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DbArgs {
    #[arg(long, global = true, env = "PGHOST")]
    db_host: Option<String>,
    #[arg(long, global = true, env = "PGPORT")]
    db_port: Option<u16>,
    #[arg(long, global = true, env = "PGUSER")]
    db_user: Option<String>,
    #[arg(long, global = true, env = "PGPASSWORD", hide_env_values = true)]
    db_pass: Option<String>,
    #[arg(long, global = true, env = "PGDATABASE")]
    db_name: Option<String>,
    #[arg(long, global = true)]
    pool_size: Option<usize>,
}

impl DbArgs {
    fn apply(&self, db: &mut DatabaseConfig) {
        if let Some(host) = &self.db_host {
            db.host = host.clone();
        }
        if let Some(port) = self.db_port {
            db.port = port;
        }
        if let Some(user) = &self.db_user {
            db.user = user.clone();
        }
        if let Some(pass) = &self.db_pass {
            db.password = Some(pass.clone());
        }
        if let Some(name) = &self.db_name {
            db.dbname = name.clone();
        }
        if let Some(size) = self.pool_size {
            db.pool_size = size;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load source files into their declared tables
    Load(LoadArgs),
    /// Create (or re-create) declared tables without loading data
    Prepare {
        /// Tables to prepare (default: all declared tables)
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
        #[arg(long)]
        prepare_mode: Option<PrepareMode>,
    },
    /// Run a SQL script in one transaction (derived tables, enrichment passes)
    Sql { file: PathBuf },
    /// Export a declared table to a CSV file with a header row
    Export { table: String, output: PathBuf },
    /// Print the declared tables as DDL
    Tables,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Directory holding `<table>.csv` files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Tables to load, in order (default: all declared tables)
    #[arg(long = "table", short = 't')]
    tables: Vec<String>,
    /// Load every file in the data directory matching this pattern (e.g. "*.csv")
    #[arg(long)]
    glob: Option<String>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    prepare_mode: Option<PrepareMode>,
    /// Transform worker threads
    #[arg(long)]
    threads: Option<usize>,
    /// Keep loading the remaining tables after a table fails
    #[arg(long)]
    continue_on_error: bool,
    /// Load into an in-memory store instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,
    /// Append progress events to this file
    #[arg(long)]
    progress_log: Option<PathBuf>,
}

impl LoadArgs {
    fn apply(&self, cfg: &mut EtlConfig) {
        if let Some(dir) = &self.data_dir {
            cfg.load.data_dir = dir.clone();
        }
        if let Some(size) = self.batch_size {
            cfg.load.batch_size = size;
        }
        if let Some(mode) = self.prepare_mode {
            cfg.load.prepare_mode = mode;
        }
        if let Some(threads) = self.threads {
            cfg.load.num_threads = Some(threads);
        }
        if self.continue_on_error {
            cfg.load.failure_policy = FailurePolicy::Continue;
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(err) = init_logging(&LogConfig::from_verbosity(cli.verbose, cli.log_format)) {
        eprintln!("failed to initialise logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = EtlConfig::load(cli.config.as_deref()).context("failed to read configuration")?;
    cli.db.apply(&mut cfg.database);
    if let Command::Load(args) = &cli.command {
        args.apply(&mut cfg);
    }
    cfg.validate().context("invalid configuration")?;
    let registry = cfg.schema_registry()?;

    match cli.command {
        Command::Load(args) => {
            let transforms = TransformRegistry::builtin();
            let sources = resolve_sources(&cfg.load.data_dir, &registry, &args.tables, args.glob.as_deref())?;
            if sources.is_empty() {
                anyhow::bail!("no source files selected in {}", cfg.load.data_dir.display());
            }

            let store = open_store(&cfg.database, args.dry_run)?;
            let mut executor = LoadExecutor::new(&*store, &registry, &transforms, cfg.load.load_options()?)?;
            if let Some(path) = &args.progress_log {
                executor = executor.with_observer(Arc::new(FileObserver::new(path)));
            }

            let summary = executor.run(&sources);
            for report in &summary.reports {
                println!(
                    "{:<20} {:>10} rows {:>5} chunks {:>8} coercion failures {:>8.2}s",
                    report.table,
                    report.rows_written,
                    report.chunks,
                    report.transform_failures,
                    report.elapsed.as_secs_f64()
                );
            }
            for (table, err) in &summary.failures {
                eprintln!("FAILED {table}: {err}");
            }
            if !summary.skipped.is_empty() {
                eprintln!("skipped: {}", summary.skipped.join(", "));
            }
            Ok(if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Prepare { tables, prepare_mode } => {
            let mode = prepare_mode.unwrap_or(cfg.load.prepare_mode);
            let store = open_store(&cfg.database, false)?;
            let lifecycle = TableLifecycle::new(&*store, &registry);
            let names: Vec<String> = if tables.is_empty() {
                registry.table_names().into_iter().map(str::to_string).collect()
            } else {
                tables
            };
            for name in &names {
                lifecycle
                    .prepare(name, mode)
                    .with_context(|| format!("failed to prepare table '{name}'"))?;
                println!("prepared {name} ({mode})");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sql { file } => {
            let sql = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read SQL script {}", file.display()))?;
            let store = open_store(&cfg.database, false)?;
            let mut conn = store.acquire()?;
            let mut tx = Transaction::begin(&mut *conn)?;
            tx.execute_script(&sql)
                .with_context(|| format!("script {} failed; rolled back", file.display()))?;
            tx.commit()?;
            info!(script = %file.display(), "script committed");
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { table, output } => {
            let schema = registry.lookup(&table)?;
            let store = open_store(&cfg.database, false)?;
            let mut conn = store.acquire()?;
            let file = File::create(&output).with_context(|| format!("failed to create {}", output.display()))?;
            let mut out = BufWriter::new(file);
            conn.copy_out(schema, &mut out)?;
            info!(table = %table, output = %output.display(), "table exported");
            Ok(ExitCode::SUCCESS)
        }
        Command::Tables => {
            for schema in registry.tables() {
                println!("{};\n", create_table_sql(schema, false));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_store(db: &DatabaseConfig, dry_run: bool) -> Result<Box<dyn Store>> {
    if dry_run {
        info!(pool_size = db.pool_size, "dry run: loading into the in-memory store");
        return Ok(Box::new(MemoryStore::new(db.pool_size)));
    }
    connect(db)
}

#[cfg(feature = "postgres")]
fn connect(db: &DatabaseConfig) -> Result<Box<dyn Store>> {
    let store = rust_bulk_etl::store::PgStore::connect(db)
        .with_context(|| format!("failed to connect to {}:{}/{}", db.host, db.port, db.dbname))?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "postgres"))]
fn connect(_db: &DatabaseConfig) -> Result<Box<dyn Store>> {
    anyhow::bail!("built without the `postgres` feature; only `load --dry-run` is available")
}
