//! Task-queue worker pool
//!
//! Each worker repeatedly:
//! 1. Leases the next deliverable task
//! 2. Runs the orchestrator handler for it, renewing the lease meanwhile
//! 3. Enqueues the returned follow-ups, then acks (or nacks on error)
//!
//! Follow-ups are enqueued before the ack so a crash in between causes a
//! redelivery rather than a lost stage. Workers exit once the queue holds no
//! pending or leased task.

use crate::crawl::Orchestrator;
use crate::queue::{LeasedTask, NackOutcome, TaskQueue};
use crate::{Result, RippleError};
use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Task outcomes of a pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.dead += other.dead;
    }
}

/// Timing knobs shared by every worker of a pool
#[derive(Debug, Clone, Copy)]
struct Timing {
    poll_interval: Duration,

    /// How often a running task's lease is pushed forward
    renew_interval: Duration,
}

/// A fixed number of workers draining one queue
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn TaskQueue>,
    workers: u32,
    timing: Timing,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>, queue: Arc<dyn TaskQueue>) -> Self {
        let crawl = &orchestrator.config().crawl;
        let workers = crawl.workers.max(1);
        let timing = Timing {
            poll_interval: Duration::from_millis(crawl.poll_interval_ms),
            // Renew three times per lease
            renew_interval: (Duration::from_secs(crawl.lease_secs) / 3)
                .max(Duration::from_millis(100)),
        };
        Self {
            orchestrator,
            queue,
            workers,
            timing,
        }
    }

    /// Runs every worker until the queue is idle
    ///
    /// A failing worker does not cut its siblings short: every worker is
    /// joined before the first error is returned.
    pub async fn run_until_idle(&self) -> Result<WorkerStats> {
        tracing::info!("Starting {} workers", self.workers);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let orchestrator = Arc::clone(&self.orchestrator);
            let queue = Arc::clone(&self.queue);
            let timing = self.timing;
            workers.spawn(async move { worker_loop(worker_id, orchestrator, queue, timing).await });
        }

        let mut stats = WorkerStats::default();
        let mut first_error: Option<RippleError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined.map_err(RippleError::from).and_then(|outcome| outcome) {
                Ok(worker_stats) => stats += worker_stats,
                Err(e) => {
                    tracing::error!("Worker stopped: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(
            "Workers finished: {} tasks completed, {} retried, {} dead-lettered",
            stats.completed,
            stats.retried,
            stats.dead
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

async fn worker_loop(
    worker_id: u32,
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn TaskQueue>,
    timing: Timing,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();

    loop {
        let Some(leased) = queue.lease()? else {
            if queue.counts()?.is_idle() {
                tracing::debug!("Worker {} found the queue idle", worker_id);
                return Ok(stats);
            }
            tokio::time::sleep(timing.poll_interval).await;
            continue;
        };

        process(
            worker_id,
            &orchestrator,
            queue.as_ref(),
            leased,
            timing.renew_interval,
            &mut stats,
        )
        .await?;
    }
}

/// Drives `work` to completion, renewing the lease of `leased` every `interval`
///
/// Handlers may wait far longer than one lease (the hourly batch quota);
/// without renewal the task would be redelivered to another worker meanwhile.
async fn with_lease_renewal<F, T>(
    queue: &dyn TaskQueue,
    leased: &LeasedTask,
    interval: Duration,
    work: F,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            outcome = &mut work => return outcome,
            _ = ticker.tick() => match queue.renew(leased) {
                Ok(true) => tracing::debug!("Renewed lease of {}", leased.task),
                Ok(false) => tracing::warn!("Lease of {} was lost; it may run twice", leased.task),
                Err(e) => tracing::warn!("Could not renew lease of {}: {}", leased.task, e),
            },
        }
    }
}

async fn process(
    worker_id: u32,
    orchestrator: &Orchestrator,
    queue: &dyn TaskQueue,
    leased: LeasedTask,
    renew_interval: Duration,
    stats: &mut WorkerStats,
) -> Result<()> {
    tracing::info!(
        "Worker {} running {} (delivery {})",
        worker_id,
        leased.task,
        leased.deliveries
    );

    let outcome =
        with_lease_renewal(queue, &leased, renew_interval, orchestrator.handle(&leased.task)).await;

    match outcome {
        Ok(follow_ups) => {
            for next in &follow_ups {
                if !leased.task.may_enqueue(next) {
                    tracing::warn!("{} enqueued an undeclared follow-up {}", leased.task, next);
                }
            }
            queue.enqueue_all(&follow_ups)?;
            queue.ack(leased.id)?;
            stats.completed += 1;
        }
        Err(e) => {
            tracing::error!("Task {} failed: {}", leased.task, e);
            match queue.nack(leased.id, &e.to_string())? {
                NackOutcome::Retrying => stats.retried += 1,
                NackOutcome::Dead => {
                    tracing::error!(
                        "Task {} dead-lettered after {} deliveries",
                        leased.task,
                        leased.deliveries
                    );
                    stats.dead += 1;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::testing::test_config;
    use crate::queue::{DeadLetter, QueueCounts, SqliteTaskQueue, Task};
    use crate::storage::{canonical_in_memory, staging_in_memory, StorageError, StorageResult};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_long_handler_keeps_its_lease() {
        let queue = SqliteTaskQueue::new(staging_in_memory().unwrap(), Duration::from_millis(300), 3);
        queue
            .enqueue(&Task::ScrapeMetrics { run_id: 1 })
            .unwrap();
        let leased = queue.lease().unwrap().unwrap();

        let other_worker = queue.clone();
        let work = async move {
            // Well past the original lease deadline
            tokio::time::sleep(Duration::from_millis(700)).await;
            other_worker.lease().unwrap()
        };
        let stolen = with_lease_renewal(&queue, &leased, Duration::from_millis(100), work).await;

        assert!(stolen.is_none());
        assert_eq!(queue.counts().unwrap().leased, 1);
    }

    /// Hands out one task, then fails the next lease, then runs dry
    #[derive(Default)]
    struct FailingSecondLease {
        leases: Mutex<u32>,
        acked: Mutex<Vec<i64>>,
    }

    impl TaskQueue for FailingSecondLease {
        fn enqueue(&self, _task: &Task) -> StorageResult<i64> {
            Ok(0)
        }

        fn enqueue_all(&self, tasks: &[Task]) -> StorageResult<Vec<i64>> {
            Ok(vec![0; tasks.len()])
        }

        fn lease(&self) -> StorageResult<Option<LeasedTask>> {
            let mut leases = self.leases.lock().unwrap();
            *leases += 1;
            match *leases {
                1 => Ok(Some(LeasedTask {
                    id: 7,
                    task: Task::RunIngestion {
                        run_id: 1,
                        metrics_only: true,
                    },
                    deliveries: 1,
                })),
                2 => Err(StorageError::Poisoned),
                _ => Ok(None),
            }
        }

        fn renew(&self, _leased: &LeasedTask) -> StorageResult<bool> {
            Ok(true)
        }

        fn ack(&self, id: i64) -> StorageResult<()> {
            self.acked.lock().unwrap().push(id);
            Ok(())
        }

        fn nack(&self, _id: i64, _error: &str) -> StorageResult<NackOutcome> {
            Ok(NackOutcome::Retrying)
        }

        fn counts(&self) -> StorageResult<QueueCounts> {
            Ok(QueueCounts::default())
        }

        fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_worker_error_lets_siblings_finish() {
        let mut config = test_config("http://127.0.0.1:9");
        config.crawl.workers = 2;
        let orchestrator = Arc::new(
            Orchestrator::new(
                config,
                staging_in_memory().unwrap(),
                canonical_in_memory().unwrap(),
            )
            .unwrap(),
        );
        let queue = Arc::new(FailingSecondLease::default());

        let result = WorkerPool::new(orchestrator, queue.clone() as Arc<dyn TaskQueue>)
            .run_until_idle()
            .await;

        assert!(result.is_err());
        assert_eq!(*queue.acked.lock().unwrap(), vec![7]);
    }
}
