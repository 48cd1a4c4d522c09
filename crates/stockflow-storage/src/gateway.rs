// Persistence gateway: pool construction, warmup barrier, retry wrapper
//
// Every caller gets the shared client through `client()`, which blocks on a
// process-wide one-shot warmup. Health checks go through the same path so a
// cold pool can never report healthy.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use stockflow_core::{Result, StockflowError};

use crate::repositories::Database;

const WARMUP_BACKOFF_MS: [u64; 3] = [500, 1000, 1500];
const QUERY_BACKOFF_MS: [u64; 3] = [200, 400, 800];

/// Shared handle to the relational store
pub struct Gateway {
    pool: PgPool,
    warmup: OnceCell<()>,
}

impl Gateway {
    /// Build the pool; does not probe — that happens on first `client()`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await
            .map_err(|e| StockflowError::fatal(format!("database connect failed: {e}")))?;
        Ok(Self {
            pool,
            warmup: OnceCell::new(),
        })
    }

    /// Wrap an existing pool (tests, migrations)
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            warmup: OnceCell::new(),
        }
    }

    /// Await warmup and hand out the shared client
    ///
    /// Concurrent callers during a cold start all wait on the same warmup
    /// future; nobody observes the pool before the probes succeed.
    pub async fn client(&self) -> Result<Database> {
        self.warmup
            .get_or_try_init(|| self.warm_up())
            .await
            .map_err(|e| StockflowError::fatal(format!("database warmup failed: {e}")))?;
        Ok(Database::new(self.pool.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the schema migrations against the pool
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StockflowError::fatal(format!("migration failed: {e}")))?;
        Ok(())
    }

    async fn warm_up(&self) -> std::result::Result<(), sqlx::Error> {
        let started = Instant::now();
        let mut last_err = None;
        for (attempt, backoff_ms) in WARMUP_BACKOFF_MS.iter().enumerate() {
            match self.probe().await {
                Ok(()) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        attempts = attempt + 1,
                        "database warmup complete"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "database warmup probe failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
                }
            }
        }
        Err(last_err.expect("warmup failed without an error"))
    }

    // Two probes: the first absorbs connection establishment, the second
    // confirms the pool answers at steady state.
    async fn probe(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Retry policy for one database operation
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    max_attempts: u32,
    backoff: bool,
    pub in_transaction: bool,
}

impl RetryOptions {
    /// Non-transactional work: up to three attempts with short backoff
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            backoff: true,
            in_transaction: false,
        }
    }

    /// Work inside an open transaction: exactly one attempt, zero backoff.
    /// Retrying inside a transaction consumes its strict timeout budget and
    /// guarantees an abort; the caller's outer loop reopens a fresh
    /// transaction instead.
    pub fn in_transaction() -> Self {
        Self {
            max_attempts: 1,
            backoff: false,
            in_transaction: true,
        }
    }
}

/// Whether a sqlx error is a recognized transient condition
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            // admin shutdown, crash shutdown, connection failure classes
            Some("57P01" | "57P02" | "08000" | "08003" | "08006")
        ),
        _ => false,
    }
}

/// Whether an error from the repository layer wraps a transient sqlx error
fn is_transient_anyhow(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .map(is_transient)
        .unwrap_or(false)
}

/// Run `f` under the gateway retry policy
///
/// Retries only transient errors; everything else surfaces immediately.
pub async fn with_retries<T, F, Fut>(
    operation: &str,
    options: RetryOptions,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient_anyhow(&e) && attempt < options.max_attempts => {
                warn!(operation, attempt, error = %e, "transient database error, retrying");
                if options.backoff {
                    let idx = (attempt as usize - 1).min(QUERY_BACKOFF_MS.len() - 1);
                    tokio::time::sleep(Duration::from_millis(QUERY_BACKOFF_MS[idx])).await;
                }
            }
            Err(e) if is_transient_anyhow(&e) => {
                return Err(StockflowError::transient(format!("{operation}: {e}")));
            }
            Err(e) => {
                return Err(StockflowError::Internal(e.context(operation.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn standard_policy_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retries("test_op", RetryOptions::standard(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::Error::from(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transaction_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retries("tx_op", RetryOptions::in_transaction(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::Error::from(sqlx::Error::PoolTimedOut)) }
        })
        .await;
        assert!(matches!(result, Err(StockflowError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_transient_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_retries("bad_op", RetryOptions::standard(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(anyhow::Error::from(sqlx::Error::RowNotFound)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
