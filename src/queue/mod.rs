//! Task graph and durable task queue
//!
//! Crawl work is expressed as messages rather than direct calls:
//! - `Task` is the payload schema of every task kind
//! - `Task::follow_ups` declares which kinds a task may enqueue
//! - `TaskQueue` is the at-least-once queue abstraction workers consume
//!
//! Task graph:
//!
//! ```text
//! DiscoverCategories -> ScrapeCategory (one per category)
//! ScrapeCategory     -> ScrapeDetails (none when the category has no listings)
//! ScrapeDetails      -> RunIngestion + ScrapeMetrics (only on run completion)
//! ScrapeMetrics      -> RunIngestion { metrics_only: true }
//! RunIngestion       -> (nothing)
//! ```

mod sqlite;

pub use sqlite::SqliteTaskQueue;

use crate::extract::Category;
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of task in the crawl graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DiscoverCategories,
    ScrapeCategory,
    ScrapeDetails,
    RunIngestion,
    ScrapeMetrics,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoverCategories => "discover_categories",
            Self::ScrapeCategory => "scrape_category",
            Self::ScrapeDetails => "scrape_details",
            Self::RunIngestion => "run_ingestion",
            Self::ScrapeMetrics => "scrape_metrics",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Fetch the charts page and fan out one task per category
    DiscoverCategories { run_id: i64 },

    /// Fetch a category's ranked lists and stage its listings
    ScrapeCategory { run_id: i64, category: Category },

    /// Fetch and stage the detail page of every listed item
    ScrapeDetails {
        run_id: i64,
        category: String,
        urls: Vec<String>,
    },

    /// Reconcile staged records into the canonical store
    RunIngestion { run_id: i64, metrics_only: bool },

    /// Collect secondary metrics for every item of the run
    ScrapeMetrics { run_id: i64 },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::DiscoverCategories { .. } => TaskKind::DiscoverCategories,
            Self::ScrapeCategory { .. } => TaskKind::ScrapeCategory,
            Self::ScrapeDetails { .. } => TaskKind::ScrapeDetails,
            Self::RunIngestion { .. } => TaskKind::RunIngestion,
            Self::ScrapeMetrics { .. } => TaskKind::ScrapeMetrics,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn run_id(&self) -> i64 {
        match self {
            Self::DiscoverCategories { run_id }
            | Self::ScrapeCategory { run_id, .. }
            | Self::ScrapeDetails { run_id, .. }
            | Self::RunIngestion { run_id, .. }
            | Self::ScrapeMetrics { run_id } => *run_id,
        }
    }

    /// Task kinds this task may enqueue when it succeeds
    pub fn follow_ups(&self) -> &'static [TaskKind] {
        match self {
            Self::DiscoverCategories { .. } => &[TaskKind::ScrapeCategory],
            Self::ScrapeCategory { .. } => &[TaskKind::ScrapeDetails],
            Self::ScrapeDetails { .. } => &[TaskKind::RunIngestion, TaskKind::ScrapeMetrics],
            Self::ScrapeMetrics { .. } => &[TaskKind::RunIngestion],
            Self::RunIngestion { .. } => &[],
        }
    }

    pub fn may_enqueue(&self, next: &Task) -> bool {
        self.follow_ups().contains(&next.kind())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScrapeCategory { run_id, category } => {
                write!(f, "{}(run {}, {})", self.name(), run_id, category.name)
            }
            Self::ScrapeDetails {
                run_id,
                category,
                urls,
            } => write!(
                f,
                "{}(run {}, {}, {} urls)",
                self.name(),
                run_id,
                category,
                urls.len()
            ),
            Self::RunIngestion {
                run_id,
                metrics_only,
            } => write!(
                f,
                "{}(run {}, metrics_only={})",
                self.name(),
                run_id,
                metrics_only
            ),
            _ => write!(f, "{}(run {})", self.name(), self.run_id()),
        }
    }
}

/// A task claimed by a worker
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub id: i64,
    pub task: Task,

    /// Delivery count including this one
    pub deliveries: u32,
}

/// What happened to a task that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled for another delivery
    Retrying,

    /// Out of deliveries; parked in the dead-letter state
    Dead,
}

/// Lifecycle state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Leased,
    Done,
    Dead,
}

impl TaskState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "done" => Some(Self::Done),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// Task totals per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub leased: u64,
    pub done: u64,
    pub dead: u64,
}

impl QueueCounts {
    /// No task is waiting or in flight
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.leased == 0
    }
}

/// A task that exhausted its deliveries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: i64,
    pub kind: String,
    pub deliveries: u32,
    pub last_error: Option<String>,
}

/// At-least-once task queue
///
/// A leased task that is neither acked nor nacked before its lease expires is
/// delivered again, so handlers must tolerate running more than once.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, task: &Task) -> StorageResult<i64>;

    /// Enqueues several tasks atomically
    fn enqueue_all(&self, tasks: &[Task]) -> StorageResult<Vec<i64>>;

    /// Claims the oldest deliverable task, if any
    fn lease(&self) -> StorageResult<Option<LeasedTask>>;

    /// Pushes the lease deadline of a task this delivery still holds
    ///
    /// # Returns
    ///
    /// `false` when the lease was already lost (expired and claimed by another
    /// delivery, or finished).
    fn renew(&self, leased: &LeasedTask) -> StorageResult<bool>;

    fn ack(&self, id: i64) -> StorageResult<()>;

    /// Records a failure and either reschedules or dead-letters the task
    fn nack(&self, id: i64, error: &str) -> StorageResult<NackOutcome>;

    fn counts(&self) -> StorageResult<QueueCounts>;

    fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>>;
}
