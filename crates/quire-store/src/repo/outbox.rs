//! Propagation outbox.
//!
//! Rows are written in the same transaction as the state change they
//! describe, so a committed change always has its outbox row. The payload is
//! opaque JSON to this module; the diary crate owns its shape.

use std::fmt;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;

use quire_types::{JobId, Timestamp};

use crate::codec::{conversion_error, fmt_ts, parse_id, parse_ts};
use crate::error::{Result, StoreError};

const COLUMNS: &str =
    "id, payload, status, attempts, last_error, next_attempt_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted relationship change.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxJob {
    pub id: JobId,
    pub payload: String,
    pub status: JobStatus,
    /// Failed attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl OutboxJob {
    pub fn decode<C: DeserializeOwned>(&self) -> Result<C> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxCounts {
    pub pending: usize,
    pub done: usize,
    pub failed: usize,
}

pub struct OutboxRepo<'c> {
    conn: &'c Connection,
}

impl<'c> OutboxRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Persist `change` as a pending job due immediately.
    pub fn enqueue<C: Serialize>(&self, change: &C, now: Timestamp) -> Result<JobId> {
        let id = JobId::new();
        let payload = serde_json::to_string(change)?;
        let ts = fmt_ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO outbox
                (id, payload, status, attempts, next_attempt_at, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?3, ?3)
            "#,
            params![id.to_string(), payload, ts],
        )?;
        tracing::debug!(job_id = %id, "Enqueued outbox job");
        Ok(id)
    }

    pub fn find_by_id(&self, id: JobId) -> Result<Option<OutboxJob>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM outbox WHERE id = ?1"),
                params![id.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Claim up to `limit` due pending jobs, oldest first.
    ///
    /// Claimed jobs have `next_attempt_at` pushed out by `lease` so another
    /// claimer skips them until the lease runs out. Run inside a transaction.
    pub fn claim_due(
        &self,
        now: Timestamp,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM outbox WHERE status = 'pending' AND next_attempt_at <= ?1 \
             ORDER BY created_at LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(params![fmt_ts(&now), limit as i64], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.extend_lease(&jobs, now, lease)?;
        Ok(jobs)
    }

    /// Claim specific jobs if they are still pending and due.
    pub fn claim(
        &self,
        ids: &[JobId],
        now: Timestamp,
        lease: Duration,
    ) -> Result<Vec<OutboxJob>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut binds: Vec<Value> = vec![Value::Text(fmt_ts(&now))];
        let mut slots = Vec::with_capacity(ids.len());
        for id in ids {
            binds.push(Value::Text(id.to_string()));
            slots.push(format!("?{}", binds.len()));
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM outbox WHERE status = 'pending' AND next_attempt_at <= ?1 \
             AND id IN ({}) ORDER BY created_at",
            slots.join(", ")
        ))?;
        let jobs = stmt
            .query_map(params_from_iter(binds), row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.extend_lease(&jobs, now, lease)?;
        Ok(jobs)
    }

    fn extend_lease(&self, jobs: &[OutboxJob], now: Timestamp, lease: Duration) -> Result<()> {
        let until = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| StoreError::InvalidData(format!("lease out of range: {e}")))?;
        let until = fmt_ts(&until);
        let mut stmt = self
            .conn
            .prepare("UPDATE outbox SET next_attempt_at = ?2 WHERE id = ?1")?;
        for job in jobs {
            stmt.execute(params![job.id.to_string(), until])?;
        }
        Ok(())
    }

    pub fn mark_done(&self, id: JobId, now: Timestamp) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outbox SET status = 'done', last_error = NULL, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), fmt_ts(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Record a failed attempt and schedule the next one.
    pub fn mark_retry(
        &self,
        id: JobId,
        error: &str,
        next_attempt_at: Timestamp,
        now: Timestamp,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3, updated_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id.to_string(), error, fmt_ts(&next_attempt_at), fmt_ts(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Record a failed attempt and stop retrying.
    pub fn mark_failed(&self, id: JobId, error: &str, now: Timestamp) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE outbox
            SET status = 'failed', attempts = attempts + 1, last_error = ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![id.to_string(), error, fmt_ts(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Put every failed job back in the queue with a fresh attempt budget.
    pub fn requeue_failed(&self, now: Timestamp) -> Result<usize> {
        let ts = fmt_ts(&now);
        let rows = self.conn.execute(
            r#"
            UPDATE outbox
            SET status = 'pending', attempts = 0, next_attempt_at = ?1, updated_at = ?1
            WHERE status = 'failed'
            "#,
            params![ts],
        )?;
        Ok(rows)
    }

    /// Delete applied jobs last touched before `older_than`. Pending and
    /// failed jobs are kept.
    pub fn prune_done(&self, older_than: Timestamp) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM outbox WHERE status = 'done' AND updated_at < ?1",
            params![fmt_ts(&older_than)],
        )?;
        Ok(rows)
    }

    pub fn counts(&self) -> Result<OutboxCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM outbox GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut counts = OutboxCounts::default();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = n as usize,
                Some(JobStatus::Done) => counts.done = n as usize,
                Some(JobStatus::Failed) => counts.failed = n as usize,
                None => tracing::warn!(status = %status, "Unknown outbox status"),
            }
        }
        Ok(counts)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<OutboxJob> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let attempts: i64 = row.get(3)?;
    let next_attempt_at: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(OutboxJob {
        id: parse_id(0, &id)?,
        payload: row.get(1)?,
        status: JobStatus::parse(&status).ok_or_else(|| {
            conversion_error(2, StoreError::InvalidData(format!("job status '{status}'")))
        })?,
        attempts: attempts.max(0) as u32,
        last_error: row.get(4)?,
        next_attempt_at: parse_ts(5, &next_attempt_at)?,
        created_at: parse_ts(6, &created_at)?,
        updated_at: parse_ts(7, &updated_at)?,
    })
}
