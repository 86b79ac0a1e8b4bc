//! Sampler behavior against in-memory query runners.

use async_trait::async_trait;
use pgharness::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const SQL: &str = "SELECT col_varchar FROM latency_test WHERE col_bigint=$1";

/// Records every id it sees and answers with one row.
#[derive(Default)]
struct RecordingRunner {
    calls: AtomicUsize,
    ids: Mutex<Vec<i64>>,
    sqls: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryRunner for RecordingRunner {
    async fn run(&self, sql: &str, id: i64) -> HarnessResult<RowTally> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ids.lock().unwrap().push(id);
        self.sqls.lock().unwrap().push(sql.to_string());
        tokio::time::sleep(Duration::from_micros(50)).await;
        Ok(RowTally {
            non_null: 1,
            null: 0,
        })
    }
}

/// Fails every call after the first `ok_calls` (the warm-up included).
struct FailingRunner {
    ok_calls: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl QueryRunner for FailingRunner {
    async fn run(&self, _sql: &str, _id: i64) -> HarnessResult<RowTally> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.ok_calls {
            Ok(RowTally::default())
        } else {
            Err(HarnessError::Execution("connection reset".to_string()))
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn returns_one_sample_per_operation() {
    for (operations, clients) in [(1, 1), (10, 1), (1, 8), (25, 4)] {
        let sampler = LatencySampler::new(RecordingRunner::default());
        let report = sampler.run(SQL, operations, clients).await.unwrap();

        assert_eq!(report.run_times().len(), operations * clients);
        assert_eq!(report.workers().len(), clients);
        assert!(report.is_complete());
        assert!(report.run_times().iter().all(|ms| *ms >= 0.0));
        for worker in report.workers() {
            assert_eq!(worker.completed, operations);
        }
    }
}

#[tokio::test]
async fn warm_up_runs_once_before_workers() {
    let runner = std::sync::Arc::new(RecordingRunner::default());
    let sampler = LatencySampler::from_arc(runner.clone());
    sampler.run(SQL, 3, 2).await.unwrap();

    assert_eq!(runner.calls.load(Ordering::SeqCst), 1 + 3 * 2);
    assert!(runner.sqls.lock().unwrap().iter().all(|sql| sql == SQL));
}

#[tokio::test]
async fn zero_operations_yields_empty_buffer() {
    let runner = std::sync::Arc::new(RecordingRunner::default());
    let report = LatencySampler::from_arc(runner.clone())
        .run(SQL, 0, 5)
        .await
        .unwrap();

    assert!(report.run_times().is_empty());
    assert_eq!(report.workers().len(), 5);
    assert!(report.is_complete());
    // Only the warm-up ran.
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ids_stay_inside_id_space() {
    let runner = std::sync::Arc::new(RecordingRunner::default());
    LatencySampler::from_arc(runner.clone())
        .with_id_space(10)
        .with_seed(7)
        .run(SQL, 50, 2)
        .await
        .unwrap();

    let ids = runner.ids.lock().unwrap();
    assert_eq!(ids.len(), 101);
    assert!(ids.iter().all(|id| (0..10).contains(id)));
}

#[tokio::test]
async fn warm_up_failure_is_returned() {
    let sampler = LatencySampler::new(FailingRunner {
        ok_calls: 0,
        calls: AtomicUsize::new(0),
    });
    let err = sampler.run(SQL, 10, 4).await.unwrap_err();
    assert!(matches!(err, HarnessError::Execution(_)));
}

#[tokio::test]
async fn worker_failures_are_recorded() {
    // Warm-up plus two good calls, then every call fails.
    let sampler = LatencySampler::new(FailingRunner {
        ok_calls: 3,
        calls: AtomicUsize::new(0),
    });
    let report = sampler.run(SQL, 5, 3).await.unwrap();

    assert_eq!(report.run_times().len(), 15);
    assert!(!report.is_complete());

    let completed: usize = report.workers().iter().map(|w| w.completed).sum();
    assert_eq!(completed, 2);
    assert_eq!(report.completed_run_times().len(), 2);
    assert_eq!(report.errors().count(), 3);
    for worker in report.errors() {
        assert_eq!(
            worker.error.as_deref(),
            Some("Execution error: connection reset")
        );
        let slots = report.worker_run_times(worker.client).unwrap();
        assert!(slots[worker.completed..].iter().all(|ms| *ms == 0.0));
    }
}

#[tokio::test]
async fn one_failing_worker_does_not_stop_the_others() {
    /// Fails exactly one call: the `fail_at`-th, counting the warm-up.
    struct FailOnce {
        fail_at: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryRunner for FailOnce {
        async fn run(&self, _sql: &str, _id: i64) -> HarnessResult<RowTally> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                Err(HarnessError::Execution("bad id".to_string()))
            } else {
                Ok(RowTally::default())
            }
        }
    }

    let report = LatencySampler::new(FailOnce {
        fail_at: 5,
        calls: AtomicUsize::new(0),
    })
    .run(SQL, 20, 4)
    .await
    .unwrap();

    assert_eq!(report.run_times().len(), 80);
    assert_eq!(report.errors().count(), 1);
    for worker in report.workers() {
        match &worker.error {
            Some(error) => {
                assert_eq!(error, "Execution error: bad id");
                assert!(worker.completed < 20);
            }
            None => assert_eq!(worker.completed, 20),
        }
    }
}

#[tokio::test]
async fn zero_clients_is_rejected() {
    let err = LatencySampler::new(RecordingRunner::default())
        .run(SQL, 10, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidArgument(_)));
}

#[tokio::test]
async fn non_positive_id_space_is_rejected() {
    let err = LatencySampler::new(RecordingRunner::default())
        .with_id_space(0)
        .run(SQL, 10, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidArgument(_)));
}

#[tokio::test]
async fn summary_of_a_run() {
    let report = LatencySampler::new(RecordingRunner::default())
        .run(SQL, 10, 3)
        .await
        .unwrap();
    let summary = LatencySummary::from_samples(&report.completed_run_times()).unwrap();
    assert_eq!(summary.count, 30);
    assert!(summary.min <= summary.p50 && summary.p50 <= summary.p99);
    assert!(summary.p99 <= summary.max);
}

#[tokio::test]
async fn connect_failure_surfaces() {
    let err = run_client_lib("not a connection string", SQL, 1, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Connection(_)));
}
