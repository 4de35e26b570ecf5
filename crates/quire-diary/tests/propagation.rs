//! Integration tests for outbox settlement and the dispatcher.

mod common;

use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{TestDiary, fast_propagation, open_store};
use quire_authz::{Relation, RelationTuple};
use quire_config::{PropagationConfig, PropagationMode};
use quire_diary::{ListRequest, NewEntry, RelationshipChange};
use quire_store::{JobStatus, Repositories};
use quire_types::{Agent, AgentId, Diary, DiaryId, ShareRole, Visibility};

fn max_pending_attempts(t: &TestDiary) -> Result<i64> {
    Ok(t.store.read(|c| {
        c.query_row(
            "SELECT COALESCE(MAX(attempts), 0) FROM outbox WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )
    })?)
}

#[tokio::test]
async fn test_oracle_outage_keeps_entry_and_job() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, diary) = t.agent("alice").await?;

    t.writer.set_down(true);
    let entry = t.service.create(&alice.id, NewEntry::new(diary.id, "kept")).await?;

    let counts = t.service.propagator().counts()?;
    assert_eq!(counts.pending, 2);
    assert_eq!(max_pending_attempts(&t)?, 1);
    assert!(!t.graph.contains(&RelationTuple::entry(entry.id, Relation::Owner, alice.id)));

    // The owner still reads through the local shortcut.
    assert!(t.service.get_by_id(entry.id, &alice.id).await?.is_some());

    t.writer.set_down(false);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let report = t.dispatcher.run_once().await?;
    assert_eq!(report.applied, 2);
    assert_eq!(t.service.propagator().counts()?.pending, 0);
    assert!(t.graph.contains(&RelationTuple::entry(entry.id, Relation::Owner, alice.id)));
    Ok(())
}

#[tokio::test]
async fn test_jobs_fail_after_max_attempts_and_requeue() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, diary) = t.agent("alice").await?;

    t.writer.set_down(true);
    t.service.create(&alice.id, NewEntry::new(diary.id, "x")).await?;
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.dispatcher.run_once().await?;
    }
    let counts = t.service.propagator().counts()?;
    assert_eq!(counts.failed, 2);
    assert_eq!(counts.pending, 0);

    // Failed jobs are not picked up again on their own.
    t.writer.set_down(false);
    assert_eq!(t.dispatcher.run_once().await?.claimed(), 0);

    assert_eq!(t.service.propagator().requeue_failed()?, 2);
    let report = t.dispatcher.run_once().await?;
    assert_eq!(report.applied, 2);
    assert_eq!(t.service.propagator().counts()?.failed, 0);
    Ok(())
}

#[tokio::test]
async fn test_dispatcher_recovers_jobs_after_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("quire.db");

    // Commit a registration and "crash" before settling its grant.
    let (agent, diary) = {
        let t = TestDiary::builder().store(open_store(&path)?).build()?;
        let agent = Agent::new("alice");
        let diary = Diary::private_for(agent.id);
        let propagator = t.service.propagator().clone();
        let _unsettled = t.store.run_in_transaction("crash", |tx| -> quire_diary::Result<_> {
            tx.agents().create(&agent)?;
            tx.diaries().create(&diary)?;
            propagator.grant_diary_owner(tx, diary.id, agent.id)
        })?;
        (agent.id, diary.id)
    };

    let t = TestDiary::builder().store(open_store(&path)?).build()?;
    assert_eq!(t.service.propagator().counts()?.pending, 1);
    let report = t.dispatcher.run_once().await?;
    assert_eq!(report.applied, 1);
    assert!(t.graph.contains(&RelationTuple::diary(diary, Relation::Owner, agent)));
    Ok(())
}

#[tokio::test]
async fn test_retried_grant_does_not_undo_revocation() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, _) = t.agent("alice").await?;
    let (bob, _) = t.agent("bob").await?;
    let diary = t
        .service
        .create_diary(&alice.id, "team", "Team", Visibility::Private)
        .await?;
    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;

    // The grant fails and is rescheduled.
    t.writer.set_down(true);
    t.service.accept(share.id, &bob.id).await?;
    assert_eq!(max_pending_attempts(&t)?, 1);
    t.writer.set_down(false);

    t.service.revoke(share.id, &alice.id).await?;
    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = t.dispatcher.run_once().await?;
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(t.service.propagator().counts()?.pending, 0);

    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!t.graph.has_diary_relation(diary.id, &bob.id));
    Ok(())
}

#[tokio::test]
async fn test_job_payload_is_durable_json() -> Result<()> {
    let t = TestDiary::new()?;
    let diary = DiaryId::new();
    let agent = AgentId::new();
    let propagator = t.service.propagator().clone();

    let pending = t.store.run_in_transaction("enqueue", |tx| {
        propagator.grant_reader(tx, diary, agent)
    })?;
    let id = pending.job_ids()[0];
    let job = t
        .store
        .read(|c| c.outbox().find_by_id(id))?
        .expect("job persisted");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(
        job.decode::<RelationshipChange>()?,
        RelationshipChange::GrantDiaryReader {
            diary_id: diary,
            agent_id: agent
        }
    );

    propagator.settle(pending).await;
    let job = t.store.read(|c| c.outbox().find_by_id(id))?.expect("job kept");
    assert_eq!(job.status, JobStatus::Done);
    Ok(())
}

#[tokio::test]
async fn test_background_mode_settles_eventually() -> Result<()> {
    let t = TestDiary::builder()
        .propagation(PropagationConfig {
            mode: PropagationMode::Background,
            ..fast_propagation()
        })
        .build()?;
    let (alice, diary) = t.agent("alice").await?;
    let entry = t.service.create(&alice.id, NewEntry::new(diary.id, "later")).await?;

    let owner = RelationTuple::entry(entry.id, Relation::Owner, alice.id);
    for _ in 0..100 {
        if t.graph.contains(&owner) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(t.graph.contains(&owner));
    Ok(())
}

#[tokio::test]
async fn test_background_mode_revokes_inline() -> Result<()> {
    let t = TestDiary::builder()
        .propagation(PropagationConfig {
            mode: PropagationMode::Background,
            ..fast_propagation()
        })
        .build()?;
    let (alice, _) = t.agent("alice").await?;
    let (bob, _) = t.agent("bob").await?;
    let diary = t
        .service
        .create_diary(&alice.id, "team", "Team", Visibility::Private)
        .await?;
    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    t.service.accept(share.id, &bob.id).await?;
    for _ in 0..100 {
        if t.graph.has_diary_relation(diary.id, &bob.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    t.service.revoke(share.id, &alice.id).await?;
    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_dispatcher_loop_drains_until_cancelled() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, diary) = t.agent("alice").await?;

    t.writer.set_down(true);
    t.service.create(&alice.id, NewEntry::new(diary.id, "queued")).await?;
    t.writer.set_down(false);

    let cancel = CancellationToken::new();
    let handle = t.dispatcher.clone().spawn(cancel.clone());
    for _ in 0..100 {
        if t.service.propagator().counts()?.pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(t.service.propagator().counts()?.pending, 0);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await??;
    Ok(())
}
