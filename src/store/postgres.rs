//! PostgreSQL store.
//!
//! Uses connection pooling via deadpool-postgres. The pool lives on a tokio runtime owned by the
//! store; every call blocks on it, so the rest of the crate stays synchronous.

use std::io::Write;

use bytes::Bytes;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::copy::CopyPayload;
use crate::error::{EtlError, EtlResult};
use crate::lifecycle::ddl::{count_rows_sql, create_table_sql, drop_table_sql, quote_ident, truncate_table_sql};
use crate::schema::TableSchema;

use super::{Connection, Store};

/// Bounded PostgreSQL connection pool.
pub struct PgStore {
    runtime: tokio::runtime::Runtime,
    pool: Pool,
    pool_size: usize,
}

impl PgStore {
    /// Build the pool and check that one connection can be opened.
    pub fn connect(settings: &DatabaseConfig) -> EtlResult<Self> {
        settings.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.pool_size.clamp(1, 4))
            .thread_name("pg-io")
            .enable_all()
            .build()?;

        let mut cfg = Config::new();
        cfg.host = Some(settings.host.clone());
        cfg.port = Some(settings.port);
        cfg.user = Some(settings.user.clone());
        cfg.password = settings.password.clone();
        cfg.dbname = Some(settings.dbname.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        });
        cfg.pool = Some(PoolConfig::new(settings.pool_size));

        let pool = {
            let _guard = runtime.enter();
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| EtlError::config(format!("failed to create connection pool: {e}")))?
        };

        runtime
            .block_on(pool.get())
            .map_err(|e| EtlError::store_critical(format!("failed to connect to PostgreSQL: {e}")))?;
        info!(
            host = %settings.host,
            port = settings.port,
            dbname = %settings.dbname,
            pool_size = settings.pool_size,
            "connected to PostgreSQL"
        );

        Ok(Self {
            runtime,
            pool,
            pool_size: settings.pool_size,
        })
    }
}

impl Store for PgStore {
    fn acquire(&self) -> EtlResult<Box<dyn Connection + '_>> {
        let client = self
            .runtime
            .block_on(self.pool.get())
            .map_err(|e| EtlError::store_critical(format!("failed to acquire a connection: {e}")))?;
        Ok(Box::new(PgConnection {
            handle: self.runtime.handle().clone(),
            client,
            in_transaction: false,
        }))
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        self.pool.close();
    }
}

/// Pooled PostgreSQL connection. Returned to the pool on drop.
pub struct PgConnection {
    handle: Handle,
    client: Object,
    in_transaction: bool,
}

impl PgConnection {
    fn batch(&self, sql: &str) -> EtlResult<()> {
        debug!(sql, "execute");
        self.handle
            .block_on(self.client.batch_execute(sql))
            .map_err(pg_error)
    }
}

impl Connection for PgConnection {
    fn begin(&mut self) -> EtlResult<()> {
        self.batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> EtlResult<()> {
        self.in_transaction = false;
        self.batch("COMMIT")
    }

    fn rollback(&mut self) -> EtlResult<()> {
        self.in_transaction = false;
        self.batch("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn drop_table(&mut self, table: &str) -> EtlResult<()> {
        self.batch(&drop_table_sql(table))
    }

    fn create_table(&mut self, schema: &TableSchema, if_not_exists: bool) -> EtlResult<()> {
        self.batch(&create_table_sql(schema, if_not_exists))
    }

    fn truncate_table(&mut self, table: &str) -> EtlResult<()> {
        self.batch(&truncate_table_sql(table))
    }

    fn copy_in(&mut self, payload: &CopyPayload) -> EtlResult<u64> {
        let statement = payload.statement();
        let data = Bytes::copy_from_slice(&payload.data);
        let client = &self.client;
        self.handle.block_on(async move {
            let sink = client.copy_in::<_, Bytes>(statement.as_str()).await.map_err(pg_error)?;
            futures::pin_mut!(sink);
            sink.send(data).await.map_err(pg_error)?;
            sink.finish().await.map_err(pg_error)
        })
    }

    fn copy_out(&mut self, schema: &TableSchema, out: &mut dyn Write) -> EtlResult<()> {
        let columns = schema
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "COPY {} ({columns}) TO STDOUT WITH (FORMAT csv, HEADER true)",
            quote_ident(&schema.name)
        );
        let client = &self.client;
        self.handle.block_on(async move {
            let stream = client.copy_out(statement.as_str()).await.map_err(pg_error)?;
            futures::pin_mut!(stream);
            while let Some(chunk) = stream.next().await {
                out.write_all(&chunk.map_err(pg_error)?)?;
            }
            out.flush()?;
            Ok::<(), EtlError>(())
        })
    }

    fn execute_script(&mut self, sql: &str) -> EtlResult<()> {
        self.batch(sql)
    }

    fn row_count(&mut self, table: &str) -> EtlResult<u64> {
        let sql = count_rows_sql(table);
        let row = self
            .handle
            .block_on(self.client.query_one(sql.as_str(), &[]))
            .map_err(pg_error)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(err) = self.rollback() {
                warn!(error = %err, "rollback on connection release failed");
            }
        }
    }
}

fn pg_error(err: tokio_postgres::Error) -> EtlError {
    if err.is_closed() {
        EtlError::store_critical(format!("connection lost: {err}"))
    } else if let Some(db) = err.as_db_error() {
        EtlError::store(format!("{}: {}", db.code().code(), db.message()))
    } else {
        EtlError::store(err.to_string())
    }
}
