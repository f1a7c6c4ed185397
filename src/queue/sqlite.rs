//! SQLite-backed task queue
//!
//! Tasks live in the `tasks` table of the staging database:
//! - `lease` claims a task in an `IMMEDIATE` transaction and sets a deadline
//! - an expired lease makes the task deliverable again; `renew` pushes the
//!   deadline for long-running handlers
//! - `nack` reschedules with exponential backoff until `max_deliveries`,
//!   after which the task is parked as `dead` with its last error

use crate::queue::{
    DeadLetter, LeasedTask, NackOutcome, QueueCounts, Task, TaskQueue, TaskState,
};
use crate::storage::{lock, timestamp, SharedConnection, StorageResult};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::time::Duration;

/// Durable at-least-once queue
#[derive(Clone)]
pub struct SqliteTaskQueue {
    conn: SharedConnection,
    lease: Duration,
    max_deliveries: u32,
    retry_base: Duration,
}

fn at_offset(offset: Duration) -> String {
    timestamp(Utc::now() + chrono::Duration::milliseconds(offset.as_millis() as i64))
}

impl SqliteTaskQueue {
    /// Creates a queue over the staging connection
    ///
    /// # Arguments
    ///
    /// * `conn` - Staging database connection
    /// * `lease` - How long a worker owns a task before it is redelivered
    /// * `max_deliveries` - Deliveries allowed before a task is dead-lettered
    pub fn new(conn: SharedConnection, lease: Duration, max_deliveries: u32) -> Self {
        Self {
            conn,
            lease,
            max_deliveries,
            retry_base: Duration::from_secs(1),
        }
    }

    /// Sets the backoff unit between failed deliveries
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn retry_delay(&self, deliveries: u32) -> Duration {
        let exponent = deliveries.saturating_sub(1).min(16);
        self.retry_base.saturating_mul(1u32 << exponent)
    }

    fn bury(&self, id: i64, error: &str) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE tasks SET state = ?1, lease_until = NULL, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
            params![TaskState::Dead.to_db_string(), error, at_offset(Duration::ZERO), id],
        )?;
        Ok(())
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn enqueue(&self, task: &Task) -> StorageResult<i64> {
        let ids = self.enqueue_all(std::slice::from_ref(task))?;
        Ok(ids.into_iter().next().unwrap_or_default())
    }

    fn enqueue_all(&self, tasks: &[Task]) -> StorageResult<Vec<i64>> {
        let payloads = tasks
            .iter()
            .map(|task| Ok((task.name(), serde_json::to_string(task)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(payloads.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tasks (kind, payload, state, deliveries, available_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4, ?4)",
            )?;
            let created = at_offset(Duration::ZERO);
            for (kind, payload) in &payloads {
                stmt.execute(params![
                    kind,
                    payload,
                    TaskState::Pending.to_db_string(),
                    created
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        for task in tasks {
            tracing::debug!("Enqueued {}", task);
        }
        Ok(ids)
    }

    fn lease(&self) -> StorageResult<Option<LeasedTask>> {
        loop {
            let claimed = {
                let mut conn = lock(&self.conn)?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = at_offset(Duration::ZERO);

                let expired = tx.execute(
                    "UPDATE tasks SET state = 'dead', lease_until = NULL, updated_at = ?1,
                        last_error = COALESCE(last_error, 'lease expired')
                     WHERE state = 'leased' AND lease_until <= ?1 AND deliveries >= ?2",
                    params![now, self.max_deliveries],
                )?;
                if expired > 0 {
                    tracing::warn!("Dead-lettered {} tasks whose last lease expired", expired);
                }

                let candidate: Option<(i64, String, u32)> = tx
                    .query_row(
                        "SELECT id, payload, deliveries FROM tasks
                         WHERE (state = 'pending' AND available_at <= ?1)
                            OR (state = 'leased' AND lease_until <= ?1)
                         ORDER BY id LIMIT 1",
                        params![now],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let Some((id, payload, deliveries)) = candidate else {
                    tx.commit()?;
                    return Ok(None);
                };

                tx.execute(
                    "UPDATE tasks SET state = ?1, deliveries = deliveries + 1,
                        lease_until = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![
                        TaskState::Leased.to_db_string(),
                        at_offset(self.lease),
                        now,
                        id
                    ],
                )?;
                tx.commit()?;
                (id, payload, deliveries + 1)
            };

            let (id, payload, deliveries) = claimed;
            match serde_json::from_str::<Task>(&payload) {
                Ok(task) => {
                    return Ok(Some(LeasedTask {
                        id,
                        task,
                        deliveries,
                    }))
                }
                Err(e) => {
                    tracing::error!("Task {} has an unreadable payload: {}", id, e);
                    self.bury(id, &format!("unreadable payload: {}", e))?;
                }
            }
        }
    }

    fn renew(&self, leased: &LeasedTask) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let renewed = conn.execute(
            "UPDATE tasks SET lease_until = ?1, updated_at = ?2
             WHERE id = ?3 AND state = 'leased' AND deliveries = ?4",
            params![
                at_offset(self.lease),
                at_offset(Duration::ZERO),
                leased.id,
                leased.deliveries
            ],
        )?;
        Ok(renewed > 0)
    }

    fn ack(&self, id: i64) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE tasks SET state = ?1, lease_until = NULL, updated_at = ?2 WHERE id = ?3",
            params![TaskState::Done.to_db_string(), at_offset(Duration::ZERO), id],
        )?;
        Ok(())
    }

    fn nack(&self, id: i64, error: &str) -> StorageResult<NackOutcome> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deliveries: u32 = tx.query_row(
            "SELECT deliveries FROM tasks WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        let now = at_offset(Duration::ZERO);
        let outcome = if deliveries >= self.max_deliveries {
            tx.execute(
                "UPDATE tasks SET state = ?1, lease_until = NULL, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![TaskState::Dead.to_db_string(), error, now, id],
            )?;
            NackOutcome::Dead
        } else {
            tx.execute(
                "UPDATE tasks SET state = ?1, lease_until = NULL, last_error = ?2,
                    available_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    TaskState::Pending.to_db_string(),
                    error,
                    at_offset(self.retry_delay(deliveries)),
                    now,
                    id
                ],
            )?;
            NackOutcome::Retrying
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn counts(&self) -> StorageResult<QueueCounts> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = QueueCounts::default();
        for (state, n) in rows {
            let n = n as u64;
            match TaskState::from_db_string(&state) {
                Some(TaskState::Pending) => counts.pending = n,
                Some(TaskState::Leased) => counts.leased = n,
                Some(TaskState::Done) => counts.done = n,
                Some(TaskState::Dead) => counts.dead = n,
                None => tracing::warn!("Unknown task state in queue: {}", state),
            }
        }
        Ok(counts)
    }

    fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, deliveries, last_error FROM tasks WHERE state = 'dead' ORDER BY id",
        )?;
        let letters = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    deliveries: row.get(2)?,
                    last_error: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(letters)
    }
}
