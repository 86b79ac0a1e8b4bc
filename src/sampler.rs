//! Concurrent latency sampler.
//!
//! Runs one statement repeatedly from several concurrent workers against a
//! shared client handle and records the latency of every call in
//! fractional milliseconds.
//!
//! ```rust,ignore
//! let report = pgharness::sampler::run_client_lib(
//!     "postgres://localhost/bench",
//!     "SELECT col_varchar FROM latency_test WHERE col_bigint=$1",
//!     1000,
//!     16,
//! )
//! .await?;
//! assert_eq!(report.run_times().len(), 16_000);
//! ```

use crate::error::{HarnessError, HarnessResult};

use async_trait::async_trait;
use futures::TryStreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Ids bound to `$1` are drawn uniformly from `0..DEFAULT_ID_SPACE`.
pub const DEFAULT_ID_SPACE: i64 = 100_000;

/// Null and non-null counts of the first column across all returned rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowTally {
    pub non_null: usize,
    pub null: usize,
}

impl RowTally {
    pub fn rows(&self) -> usize {
        self.non_null + self.null
    }
}

/// A single-use read query against a shared client.
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait QueryRunner: Send + Sync + 'static {
    /// Run `sql` once with `id` bound to `$1`, reading every row.
    async fn run(&self, sql: &str, id: i64) -> HarnessResult<RowTally>;
}

/// [`QueryRunner`] backed by a shared sqlx PostgreSQL pool.
#[derive(Clone)]
pub struct PgQueryRunner {
    pool: PgPool,
}

impl PgQueryRunner {
    /// Open the shared client handle.
    pub async fn connect(url: &str, max_connections: u32) -> HarnessResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| HarnessError::Connection(e.to_string()))?;
        debug!(max_connections, "sampler pool connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the underlying pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    async fn run(&self, sql: &str, id: i64) -> HarnessResult<RowTally> {
        let mut tally = RowTally::default();
        let mut rows = sqlx::query(sql).bind(id).fetch(&self.pool);

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| HarnessError::Execution(e.to_string()))?
        {
            let value: Option<String> = row
                .try_get(0)
                .map_err(|e| HarnessError::Execution(e.to_string()))?;
            match value {
                Some(_) => tally.non_null += 1,
                None => tally.null += 1,
            }
        }

        Ok(tally)
    }
}

/// Shared pseudo-random id source. The mutex guards only the generator.
struct IdSource {
    rng: Mutex<StdRng>,
    space: i64,
}

impl IdSource {
    fn new(space: i64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: Mutex::new(rng),
            space,
        }
    }

    fn next_id(&self) -> i64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_range(0..self.space)
    }
}

/// What happened to one worker during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerOutcome {
    pub client: usize,
    /// Operations that finished and were timed.
    pub completed: usize,
    /// The error that stopped the worker early, if any.
    pub error: Option<String>,
}

/// Result of a sampler run.
///
/// `run_times` is laid out as `client * operations + operation`. Slots of
/// operations that never ran stay `0.0`.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    run_times: Vec<f64>,
    operations: usize,
    workers: Vec<WorkerOutcome>,
}

impl LatencyReport {
    /// The flat latency buffer in milliseconds.
    pub fn run_times(&self) -> &[f64] {
        &self.run_times
    }

    pub fn into_run_times(self) -> Vec<f64> {
        self.run_times
    }

    /// Operations scheduled per worker.
    pub fn operations(&self) -> usize {
        self.operations
    }

    pub fn workers(&self) -> &[WorkerOutcome] {
        &self.workers
    }

    /// The slice of the buffer owned by one worker.
    pub fn worker_run_times(&self, client: usize) -> Option<&[f64]> {
        let start = client.checked_mul(self.operations)?;
        self.run_times.get(start..start + self.operations)
    }

    /// Workers that stopped on an error.
    pub fn errors(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.workers.iter().filter(|w| w.error.is_some())
    }

    /// True when every worker ran all of its operations.
    pub fn is_complete(&self) -> bool {
        self.workers.iter().all(|w| w.error.is_none())
    }

    /// Latencies of operations that actually ran.
    pub fn completed_run_times(&self) -> Vec<f64> {
        self.workers
            .iter()
            .filter_map(|w| {
                self.worker_run_times(w.client)
                    .map(|slots| &slots[..w.completed.min(slots.len())])
            })
            .flatten()
            .copied()
            .collect()
    }
}

struct WorkerRun {
    run_times: Vec<f64>,
    error: Option<String>,
}

/// Fans a statement out over concurrent workers sharing one [`QueryRunner`].
pub struct LatencySampler<R> {
    runner: Arc<R>,
    id_space: i64,
    seed: Option<u64>,
}

impl<R: QueryRunner> LatencySampler<R> {
    pub fn new(runner: R) -> Self {
        Self::from_arc(Arc::new(runner))
    }

    pub fn from_arc(runner: Arc<R>) -> Self {
        Self {
            runner,
            id_space: DEFAULT_ID_SPACE,
            seed: None,
        }
    }

    /// Draw ids from `0..id_space`.
    pub fn with_id_space(mut self, id_space: i64) -> Self {
        self.id_space = id_space;
        self
    }

    /// Seed the id generator for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_optional_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Warm up once, then run `operations` queries on each of `clients`
    /// concurrent workers.
    ///
    /// A warm-up failure is returned. A failure inside a worker stops that
    /// worker only and is recorded in its [`WorkerOutcome`].
    pub async fn run(
        &self,
        sql: &str,
        operations: usize,
        clients: usize,
    ) -> HarnessResult<LatencyReport> {
        if clients == 0 {
            return Err(HarnessError::InvalidArgument(
                "at least one client is required".to_string(),
            ));
        }
        if self.id_space <= 0 {
            return Err(HarnessError::InvalidArgument(format!(
                "id space must be positive, got {}",
                self.id_space
            )));
        }
        let total = operations.checked_mul(clients).ok_or_else(|| {
            HarnessError::InvalidArgument(format!(
                "{} operations x {} clients overflows",
                operations, clients
            ))
        })?;

        let ids = Arc::new(IdSource::new(self.id_space, self.seed));

        // Warm-up, not recorded.
        timed_query(self.runner.as_ref(), sql, &ids).await?;
        debug!("warm-up query finished");

        info!(operations, clients, "starting latency run");
        let sql: Arc<str> = Arc::from(sql);
        let mut handles = Vec::with_capacity(clients);
        for _ in 0..clients {
            let runner = Arc::clone(&self.runner);
            let ids = Arc::clone(&ids);
            let sql = Arc::clone(&sql);
            handles.push(tokio::spawn(async move {
                run_worker(runner.as_ref(), &sql, &ids, operations).await
            }));
        }

        let mut run_times = vec![0.0; total];
        let mut workers = Vec::with_capacity(clients);
        for (client, handle) in handles.into_iter().enumerate() {
            let run = handle.await.unwrap_or_else(|e| WorkerRun {
                run_times: Vec::new(),
                error: Some(format!("worker {} did not finish: {}", client, e)),
            });

            let start = client * operations;
            run_times[start..start + run.run_times.len()].copy_from_slice(&run.run_times);

            if let Some(error) = &run.error {
                warn!(client, completed = run.run_times.len(), %error, "worker stopped early");
            }
            workers.push(WorkerOutcome {
                client,
                completed: run.run_times.len(),
                error: run.error,
            });
        }

        info!(samples = total, "latency run finished");
        Ok(LatencyReport {
            run_times,
            operations,
            workers,
        })
    }
}

async fn run_worker<R: QueryRunner>(
    runner: &R,
    sql: &str,
    ids: &IdSource,
    operations: usize,
) -> WorkerRun {
    let mut run_times = Vec::with_capacity(operations);
    for _ in 0..operations {
        match timed_query(runner, sql, ids).await {
            Ok(elapsed) => run_times.push(elapsed),
            Err(e) => {
                return WorkerRun {
                    run_times,
                    error: Some(e.to_string()),
                };
            }
        }
    }
    WorkerRun {
        run_times,
        error: None,
    }
}

/// Milliseconds with microsecond resolution.
async fn timed_query<R: QueryRunner>(runner: &R, sql: &str, ids: &IdSource) -> HarnessResult<f64> {
    let start = Instant::now();
    let id = ids.next_id();
    runner.run(sql, id).await?;
    Ok(start.elapsed().as_micros() as f64 / 1e3)
}

/// Connect, sample and close.
///
/// The pool is sized to `clients` so every worker can hold a connection.
pub async fn run_client_lib(
    db: &str,
    sql: &str,
    operations: usize,
    clients: usize,
) -> HarnessResult<LatencyReport> {
    if clients == 0 {
        return Err(HarnessError::InvalidArgument(
            "at least one client is required".to_string(),
        ));
    }
    let runner = PgQueryRunner::connect(db, u32::try_from(clients).unwrap_or(u32::MAX)).await?;
    let sampler = LatencySampler::new(runner.clone());
    let report = sampler.run(sql, operations, clients).await;
    runner.close().await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_repeat() {
        let a = IdSource::new(1000, Some(42));
        let b = IdSource::new(1000, Some(42));
        let first: Vec<i64> = (0..20).map(|_| a.next_id()).collect();
        let second: Vec<i64> = (0..20).map(|_| b.next_id()).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|id| (0..1000).contains(id)));
    }

    #[test]
    fn test_worker_slices() {
        let report = LatencyReport {
            run_times: vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0],
            operations: 3,
            workers: vec![
                WorkerOutcome {
                    client: 0,
                    completed: 3,
                    error: None,
                },
                WorkerOutcome {
                    client: 1,
                    completed: 1,
                    error: Some("boom".to_string()),
                },
            ],
        };
        assert_eq!(report.worker_run_times(0), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(report.worker_run_times(1), Some(&[4.0, 0.0, 0.0][..]));
        assert_eq!(report.worker_run_times(2), None);
        assert_eq!(report.completed_run_times(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(!report.is_complete());
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_row_tally() {
        let tally = RowTally {
            non_null: 2,
            null: 1,
        };
        assert_eq!(tally.rows(), 3);
    }
}
