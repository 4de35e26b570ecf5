//! Durable propagation of relationship changes to the permission oracle.
//!
//! A mutating operation enqueues [`RelationshipChange`]s into the outbox
//! inside its own transaction and gets back a [`PendingPropagation`]. After
//! the commit it hands that to [`RelationshipPropagator::settle`], which
//! applies the jobs under a timeout. Anything not applied (timeout, oracle
//! down, crash before settle) stays pending and is picked up by the
//! [`crate::Dispatcher`]. Every change is an idempotent upsert or delete at
//! the oracle, so replays are harmless.
//!
//! Jobs are not ordered against each other, so a grant can be retried after
//! a later revocation of the same relation has already been applied. Before
//! and after writing a grant the propagator checks that local state still
//! backs it (the share is accepted, the entry still exists). A grant that
//! lost its backing is skipped, or retracted if it was written while the
//! revocation landed.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use quire_authz::{
    Namespace, Relation, RelationTuple, RelationshipWriter, SharedWriter, Subject, TupleQuery,
};
use quire_config::{PropagationConfig, PropagationMode};
use quire_store::{OutboxCounts, OutboxJob, Repositories, SqliteStore};
use quire_types::{AgentId, DiaryId, EntryId, JobId, ShareRole, ShareStatus};

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Changes
// ─────────────────────────────────────────────────────────────────────────────

/// One relationship change, as persisted in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationshipChange {
    GrantEntryOwner { entry_id: EntryId, agent_id: AgentId },
    LinkEntryToDiary { entry_id: EntryId, diary_id: DiaryId },
    GrantEntryViewer { entry_id: EntryId, agent_id: AgentId },
    GrantDiaryOwner { diary_id: DiaryId, agent_id: AgentId },
    GrantDiaryWriter { diary_id: DiaryId, agent_id: AgentId },
    GrantDiaryReader { diary_id: DiaryId, agent_id: AgentId },
    RemoveEntryRelations { entry_id: EntryId },
    /// Entry ids are captured before the local cascade deletes them.
    RemoveDiaryRelations {
        diary_id: DiaryId,
        entry_ids: Vec<EntryId>,
    },
    /// Also drops the agent's authorship of the listed entries, captured
    /// when the share was revoked.
    RemoveDiaryRelationForAgent {
        diary_id: DiaryId,
        agent_id: AgentId,
        #[serde(default)]
        entry_ids: Vec<EntryId>,
    },
}

impl RelationshipChange {
    /// Removals take access away and must be visible to the next request.
    pub fn is_revocation(&self) -> bool {
        match self {
            Self::RemoveEntryRelations { .. }
            | Self::RemoveDiaryRelations { .. }
            | Self::RemoveDiaryRelationForAgent { .. } => true,
            Self::GrantEntryOwner { .. }
            | Self::LinkEntryToDiary { .. }
            | Self::GrantEntryViewer { .. }
            | Self::GrantDiaryOwner { .. }
            | Self::GrantDiaryWriter { .. }
            | Self::GrantDiaryReader { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::GrantEntryOwner { .. } => "grant_entry_owner",
            Self::LinkEntryToDiary { .. } => "link_entry_to_diary",
            Self::GrantEntryViewer { .. } => "grant_entry_viewer",
            Self::GrantDiaryOwner { .. } => "grant_diary_owner",
            Self::GrantDiaryWriter { .. } => "grant_diary_writer",
            Self::GrantDiaryReader { .. } => "grant_diary_reader",
            Self::RemoveEntryRelations { .. } => "remove_entry_relations",
            Self::RemoveDiaryRelations { .. } => "remove_diary_relations",
            Self::RemoveDiaryRelationForAgent { .. } => "remove_diary_relation_for_agent",
        }
    }

    /// Apply the change. Idempotent.
    pub async fn apply(&self, writer: &dyn RelationshipWriter) -> quire_authz::Result<()> {
        match self {
            Self::GrantEntryOwner { entry_id, agent_id } => {
                writer
                    .write(&[RelationTuple::entry(*entry_id, Relation::Owner, *agent_id)])
                    .await
            }
            Self::LinkEntryToDiary { entry_id, diary_id } => {
                writer
                    .write(&[RelationTuple::entry_parent(*entry_id, *diary_id)])
                    .await
            }
            Self::GrantEntryViewer { entry_id, agent_id } => {
                writer
                    .write(&[RelationTuple::entry(*entry_id, Relation::Viewer, *agent_id)])
                    .await
            }
            Self::GrantDiaryOwner { diary_id, agent_id } => {
                writer
                    .write(&[RelationTuple::diary(*diary_id, Relation::Owner, *agent_id)])
                    .await
            }
            Self::GrantDiaryWriter { diary_id, agent_id } => {
                writer
                    .write(&[RelationTuple::diary(*diary_id, Relation::Writer, *agent_id)])
                    .await
            }
            Self::GrantDiaryReader { diary_id, agent_id } => {
                writer
                    .write(&[RelationTuple::diary(*diary_id, Relation::Reader, *agent_id)])
                    .await
            }
            Self::RemoveEntryRelations { entry_id } => {
                writer
                    .delete(&TupleQuery::object(Namespace::DiaryEntry, entry_id.to_string()))
                    .await
            }
            Self::RemoveDiaryRelations {
                diary_id,
                entry_ids,
            } => {
                for entry_id in entry_ids {
                    writer
                        .delete(&TupleQuery::object(Namespace::DiaryEntry, entry_id.to_string()))
                        .await?;
                }
                writer
                    .delete(&TupleQuery::object(Namespace::Diary, diary_id.to_string()))
                    .await
            }
            Self::RemoveDiaryRelationForAgent {
                diary_id,
                agent_id,
                entry_ids,
            } => {
                for entry_id in entry_ids {
                    writer
                        .delete(
                            &TupleQuery::object(Namespace::DiaryEntry, entry_id.to_string())
                                .with_relation(Relation::Owner)
                                .with_subject(Subject::Agent(*agent_id)),
                        )
                        .await?;
                }
                writer
                    .delete(
                        &TupleQuery::object(Namespace::Diary, diary_id.to_string())
                            .with_subject(Subject::Agent(*agent_id)),
                    )
                    .await
            }
        }
    }
}

impl RelationshipChange {
    /// The exact tuple a grant writes. `None` for removals.
    fn granted_tuple(&self) -> Option<RelationTuple> {
        let tuple = match self {
            Self::GrantEntryOwner { entry_id, agent_id } => {
                RelationTuple::entry(*entry_id, Relation::Owner, *agent_id)
            }
            Self::LinkEntryToDiary { entry_id, diary_id } => {
                RelationTuple::entry_parent(*entry_id, *diary_id)
            }
            Self::GrantEntryViewer { entry_id, agent_id } => {
                RelationTuple::entry(*entry_id, Relation::Viewer, *agent_id)
            }
            Self::GrantDiaryOwner { diary_id, agent_id } => {
                RelationTuple::diary(*diary_id, Relation::Owner, *agent_id)
            }
            Self::GrantDiaryWriter { diary_id, agent_id } => {
                RelationTuple::diary(*diary_id, Relation::Writer, *agent_id)
            }
            Self::GrantDiaryReader { diary_id, agent_id } => {
                RelationTuple::diary(*diary_id, Relation::Reader, *agent_id)
            }
            Self::RemoveEntryRelations { .. }
            | Self::RemoveDiaryRelations { .. }
            | Self::RemoveDiaryRelationForAgent { .. } => return None,
        };
        Some(tuple)
    }

    /// Whether committed local state still justifies this change.
    /// Removals are always justified.
    fn is_backed_by(&self, conn: &Connection) -> quire_store::Result<bool> {
        let backed = match self {
            Self::GrantEntryOwner { entry_id, agent_id } => {
                match conn.entries().access_context(*entry_id)? {
                    Some(ctx) => {
                        ctx.owner_id == *agent_id
                            || has_accepted_role(conn, ctx.diary_id, *agent_id, ShareRole::Writer)?
                    }
                    None => false,
                }
            }
            Self::LinkEntryToDiary { entry_id, diary_id } => conn
                .entries()
                .access_context(*entry_id)?
                .is_some_and(|ctx| ctx.diary_id == *diary_id),
            Self::GrantEntryViewer { entry_id, agent_id } => conn
                .entry_grants()
                .list_for_entry(*entry_id)?
                .iter()
                .any(|grant| grant.shared_with == *agent_id),
            Self::GrantDiaryOwner { diary_id, agent_id } => conn
                .diaries()
                .find_by_id(*diary_id)?
                .is_some_and(|diary| diary.owner_id == *agent_id),
            Self::GrantDiaryWriter { diary_id, agent_id } => {
                has_accepted_role(conn, *diary_id, *agent_id, ShareRole::Writer)?
            }
            Self::GrantDiaryReader { diary_id, agent_id } => {
                has_accepted_role(conn, *diary_id, *agent_id, ShareRole::Reader)?
            }
            Self::RemoveEntryRelations { .. }
            | Self::RemoveDiaryRelations { .. }
            | Self::RemoveDiaryRelationForAgent { .. } => true,
        };
        Ok(backed)
    }
}

fn has_accepted_role(
    conn: &Connection,
    diary_id: DiaryId,
    agent_id: AgentId,
    role: ShareRole,
) -> quire_store::Result<bool> {
    Ok(conn
        .shares()
        .find_by_diary_and_agent(diary_id, agent_id)?
        .is_some_and(|share| share.status == ShareStatus::Accepted && share.role == role))
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending handle
// ─────────────────────────────────────────────────────────────────────────────

/// Outbox jobs enqueued by one transaction, to be settled after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "pending propagation must be settled after the transaction commits"]
pub struct PendingPropagation {
    jobs: Vec<JobId>,
    revocation: bool,
}

impl PendingPropagation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn job_ids(&self) -> &[JobId] {
        &self.jobs
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether any job removes access.
    pub fn has_revocation(&self) -> bool {
        self.revocation
    }

    pub fn merge(mut self, other: PendingPropagation) -> Self {
        self.jobs.extend(other.jobs);
        self.revocation |= other.revocation;
        self
    }
}

/// Outcome of applying a batch of jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub applied: usize,
    /// Jobs that failed and were rescheduled.
    pub retried: usize,
    /// Jobs that exhausted their attempts.
    pub failed: usize,
    /// Grants dropped because local state no longer backs them.
    pub skipped: usize,
}

impl SettleReport {
    pub fn claimed(&self) -> usize {
        self.applied + self.retried + self.failed + self.skipped
    }
}

/// What happened to one claimed job.
enum JobOutcome {
    Applied,
    Skipped,
}

/// Delay before attempt `attempt + 1`: `initial · 2^(attempt-1)`, capped.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let base = (initial.as_millis() as u64).max(1);
    let max = (max.as_millis() as u64).max(base);
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base.saturating_mul(factor).min(max))
}

// ─────────────────────────────────────────────────────────────────────────────
// Propagator
// ─────────────────────────────────────────────────────────────────────────────

/// Enqueues relationship changes and applies them to the oracle.
#[derive(Clone)]
pub struct RelationshipPropagator {
    store: Arc<SqliteStore>,
    writer: SharedWriter,
    config: PropagationConfig,
}

impl std::fmt::Debug for RelationshipPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipPropagator")
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl RelationshipPropagator {
    pub fn new(store: Arc<SqliteStore>, writer: SharedWriter, config: PropagationConfig) -> Self {
        Self {
            store,
            writer,
            config,
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Persist `change` in the caller's transaction.
    pub fn enqueue(
        &self,
        conn: &Connection,
        change: RelationshipChange,
    ) -> Result<PendingPropagation> {
        let id = conn.outbox().enqueue(&change, quire_types::now())?;
        debug!(job_id = %id, kind = change.kind(), "Relationship change enqueued");
        Ok(PendingPropagation {
            jobs: vec![id],
            revocation: change.is_revocation(),
        })
    }

    pub fn grant_ownership(
        &self,
        conn: &Connection,
        entry_id: EntryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::GrantEntryOwner { entry_id, agent_id })
    }

    pub fn link_entry(
        &self,
        conn: &Connection,
        entry_id: EntryId,
        diary_id: DiaryId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::LinkEntryToDiary { entry_id, diary_id })
    }

    pub fn grant_viewer(
        &self,
        conn: &Connection,
        entry_id: EntryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::GrantEntryViewer { entry_id, agent_id })
    }

    pub fn grant_diary_owner(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::GrantDiaryOwner { diary_id, agent_id })
    }

    pub fn grant_reader(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::GrantDiaryReader { diary_id, agent_id })
    }

    pub fn grant_writer(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::GrantDiaryWriter { diary_id, agent_id })
    }

    /// Grant the relation matching an accepted invitation's role.
    pub fn grant_role(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        agent_id: AgentId,
        role: ShareRole,
    ) -> Result<PendingPropagation> {
        match role {
            ShareRole::Reader => self.grant_reader(conn, diary_id, agent_id),
            ShareRole::Writer => self.grant_writer(conn, diary_id, agent_id),
        }
    }

    pub fn remove_entry_relations(
        &self,
        conn: &Connection,
        entry_id: EntryId,
    ) -> Result<PendingPropagation> {
        self.enqueue(conn, RelationshipChange::RemoveEntryRelations { entry_id })
    }

    pub fn remove_diary_relations(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        entry_ids: Vec<EntryId>,
    ) -> Result<PendingPropagation> {
        self.enqueue(
            conn,
            RelationshipChange::RemoveDiaryRelations {
                diary_id,
                entry_ids,
            },
        )
    }

    /// Remove `agent_id`'s diary relation and its authorship of every entry
    /// currently in the diary.
    pub fn remove_diary_relation_for_agent(
        &self,
        conn: &Connection,
        diary_id: DiaryId,
        agent_id: AgentId,
    ) -> Result<PendingPropagation> {
        let entry_ids = conn.entries().ids_in_diary(diary_id)?;
        self.enqueue(
            conn,
            RelationshipChange::RemoveDiaryRelationForAgent {
                diary_id,
                agent_id,
                entry_ids,
            },
        )
    }

    /// Apply `pending` now that its transaction has committed.
    ///
    /// Never fails: errors are logged and the jobs stay in the outbox. In
    /// background mode grants are spawned onto the runtime; revocations are
    /// always awaited so the caller's next request sees them.
    pub async fn settle(&self, pending: PendingPropagation) {
        if pending.is_empty() {
            return;
        }
        match self.config.mode {
            PropagationMode::Background if !pending.has_revocation() => {
                let propagator = self.clone();
                tokio::spawn(async move {
                    propagator.settle_now(pending).await;
                });
            }
            PropagationMode::Inline | PropagationMode::Background => {
                self.settle_now(pending).await;
            }
        }
    }

    async fn settle_now(&self, pending: PendingPropagation) {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, self.apply_jobs(Some(pending.job_ids()))).await {
            Ok(Ok(report)) if report.retried + report.failed > 0 => {
                warn!(
                    applied = report.applied,
                    retried = report.retried,
                    failed = report.failed,
                    "Relationship propagation incomplete, dispatcher will retry"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    jobs = pending.job_ids().len(),
                    "Relationship propagation could not run"
                );
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    jobs = pending.job_ids().len(),
                    "Relationship propagation timed out, dispatcher will retry"
                );
            }
        }
    }

    /// Claim and apply due jobs: the given ids, or the oldest batch.
    pub(crate) async fn apply_jobs(&self, ids: Option<&[JobId]>) -> Result<SettleReport> {
        let now = quire_types::now();
        let lease = self.config.timeout();
        let batch = self.config.batch_size;
        let jobs = self.store.run_in_transaction("claim_outbox", |tx| match ids {
            Some(ids) => tx.outbox().claim(ids, now, lease),
            None => tx.outbox().claim_due(now, batch, lease),
        })?;

        let mut report = SettleReport::default();
        for job in jobs {
            match self.apply_job(&job).await {
                Ok(outcome) => {
                    self.store.run_in_transaction("outbox_done", |tx| {
                        tx.outbox().mark_done(job.id, quire_types::now())
                    })?;
                    match outcome {
                        JobOutcome::Applied => report.applied += 1,
                        JobOutcome::Skipped => report.skipped += 1,
                    }
                }
                Err(message) => {
                    if self.record_failure(&job, &message)? {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn apply_job(&self, job: &OutboxJob) -> std::result::Result<JobOutcome, String> {
        let change: RelationshipChange = job.decode().map_err(|e| e.to_string())?;
        if !self.is_backed(&change)? {
            debug!(job_id = %job.id, kind = change.kind(), "Grant no longer backed, skipped");
            return Ok(JobOutcome::Skipped);
        }
        change
            .apply(self.writer.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        // A revocation may have committed and settled while this grant was
        // in flight. Take the tuple back so the revocation holds.
        if let Some(tuple) = change.granted_tuple()
            && !self.is_backed(&change)?
        {
            let query = TupleQuery::object(tuple.namespace, tuple.object)
                .with_relation(tuple.relation)
                .with_subject(tuple.subject);
            self.writer.delete(&query).await.map_err(|e| e.to_string())?;
            info!(
                job_id = %job.id,
                kind = change.kind(),
                "Grant retracted after concurrent revocation"
            );
            return Ok(JobOutcome::Skipped);
        }
        debug!(job_id = %job.id, kind = change.kind(), "Relationship change applied");
        Ok(JobOutcome::Applied)
    }

    fn is_backed(&self, change: &RelationshipChange) -> std::result::Result<bool, String> {
        self.store
            .read(|c| change.is_backed_by(c))
            .map_err(|e| e.to_string())
    }

    /// Schedule a retry or give up. Returns true if the job is now failed.
    fn record_failure(&self, job: &OutboxJob, message: &str) -> Result<bool> {
        let now = quire_types::now();
        let attempt = job.attempts + 1;
        if attempt >= self.config.max_attempts {
            self.store.run_in_transaction("outbox_failed", |tx| {
                tx.outbox().mark_failed(job.id, message, now)
            })?;
            error!(
                job_id = %job.id,
                attempts = attempt,
                error = message,
                "Relationship change failed permanently"
            );
            return Ok(true);
        }

        let delay = backoff_delay(
            attempt,
            Duration::from_millis(self.config.initial_backoff_ms),
            Duration::from_millis(self.config.max_backoff_ms),
        );
        let next = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.store.run_in_transaction("outbox_retry", |tx| {
            tx.outbox().mark_retry(job.id, message, next, now)
        })?;
        warn!(
            job_id = %job.id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = message,
            "Relationship change failed, rescheduled"
        );
        Ok(false)
    }

    /// Reset failed jobs for another round of attempts.
    pub fn requeue_failed(&self) -> Result<usize> {
        let count = self.store.run_in_transaction("requeue_failed", |tx| {
            tx.outbox().requeue_failed(quire_types::now())
        })?;
        if count > 0 {
            info!(count, "Requeued failed relationship changes");
        }
        Ok(count)
    }

    /// Delete applied jobs older than the configured retention.
    pub fn prune_done(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.done_retention())
            .unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = quire_types::now().checked_sub_signed(retention) else {
            return Ok(0);
        };
        let count = self
            .store
            .run_in_transaction("prune_outbox", |tx| tx.outbox().prune_done(cutoff))?;
        if count > 0 {
            debug!(count, "Pruned applied relationship changes");
        }
        Ok(count)
    }

    pub fn counts(&self) -> Result<OutboxCounts> {
        Ok(self.store.read(|c| c.outbox().counts())?)
    }
}
