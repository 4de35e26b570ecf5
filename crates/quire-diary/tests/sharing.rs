//! Integration tests for the invitation lifecycle.

mod common;

use anyhow::Result;

use common::TestDiary;
use quire_authz::{Relation, RelationTuple};
use quire_diary::{DiaryError, EntryPatch, ListRequest, NewEntry};
use quire_types::{Agent, Diary, ShareRole, ShareStatus, Visibility};

async fn team_diary(t: &TestDiary) -> Result<(Agent, Agent, Diary)> {
    let (alice, _) = t.agent("alice").await?;
    let (bob, _) = t.agent("bob").await?;
    let diary = t
        .service
        .create_diary(&alice.id, "team", "Team", Visibility::Private)
        .await?;
    Ok((alice, bob, diary))
}

#[tokio::test]
async fn test_invite_accept_revoke_reinvite() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;
    t.service.create(&alice.id, NewEntry::new(diary.id, "plans")).await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    assert_eq!(share.status, ShareStatus::Pending);
    let pending = t.service.list_pending_invitations(&bob.id).await?;
    assert_eq!(pending.len(), 1);

    // Pending grants nothing.
    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());

    let accepted = t.service.accept(share.id, &bob.id).await?;
    assert_eq!(accepted.status, ShareStatus::Accepted);
    assert_eq!(t.service.list(&bob.id, ListRequest::new(diary.id)).await?.len(), 1);
    assert!(t.service.list_pending_invitations(&bob.id).await?.is_empty());

    let err = t.service.accept(share.id, &bob.id).await.unwrap_err();
    assert!(matches!(err, DiaryError::Validation(_)));

    let revoked = t.service.revoke(share.id, &alice.id).await?;
    assert_eq!(revoked.status, ShareStatus::Revoked);
    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());

    let again = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    assert_ne!(again.id, share.id);
    t.service.accept(again.id, &bob.id).await?;
    assert_eq!(t.service.list(&bob.id, ListRequest::new(diary.id)).await?.len(), 1);

    let history = t.service.list_shares(diary.id, &alice.id).await?;
    assert_eq!(history.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_revoked_writer_loses_own_entries() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;
    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Writer).await?;
    t.service.accept(share.id, &bob.id).await?;
    let entry = t.service.create(&bob.id, NewEntry::new(diary.id, "bob's notes")).await?;
    assert!(t.service.get_by_id(entry.id, &bob.id).await?.is_some());

    t.service.revoke(share.id, &alice.id).await?;

    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(t.service.get_by_id(entry.id, &bob.id).await?.is_none());
    assert!(
        t.service
            .update(entry.id, &bob.id, EntryPatch::new().content("still mine?"))
            .await?
            .is_none()
    );
    assert!(!t.service.delete(entry.id, &bob.id).await?);
    assert!(!t.graph.contains(&RelationTuple::entry(entry.id, Relation::Owner, bob.id)));

    // The entry itself stays with the diary.
    assert!(t.service.get_by_id(entry.id, &alice.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_decline_never_grants_access() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Writer).await?;
    let declined = t.service.decline(share.id, &bob.id).await?;
    assert_eq!(declined.status, ShareStatus::Declined);

    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!t.graph.has_diary_relation(diary.id, &bob.id));

    for result in [
        t.service.accept(share.id, &bob.id).await,
        t.service.decline(share.id, &bob.id).await,
        t.service.revoke(share.id, &alice.id).await,
    ] {
        assert!(matches!(result, Err(DiaryError::Validation(_))));
    }
    Ok(())
}

#[tokio::test]
async fn test_only_invitee_may_answer() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;
    let (carol, _) = t.agent("carol").await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    for result in [
        t.service.accept(share.id, &carol.id).await,
        t.service.accept(share.id, &alice.id).await,
        t.service.decline(share.id, &carol.id).await,
    ] {
        assert!(result.unwrap_err().is_not_found());
    }
    Ok(())
}

#[tokio::test]
async fn test_invite_guards() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;
    let (carol, _) = t.agent("carol").await?;

    let err = t
        .service
        .invite(diary.id, &alice.id, &alice.id, ShareRole::Reader)
        .await
        .unwrap_err();
    assert!(matches!(err, DiaryError::Validation(_)));

    let ghost = quire_types::AgentId::new();
    let err = t
        .service
        .invite(diary.id, &alice.id, &ghost, ShareRole::Reader)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    let err = t
        .service
        .invite(diary.id, &alice.id, &bob.id, ShareRole::Writer)
        .await
        .unwrap_err();
    assert!(matches!(err, DiaryError::Validation(_)));

    // A reader may see the diary but not invite others.
    t.service.accept(share.id, &bob.id).await?;
    let err = t
        .service
        .invite(diary.id, &bob.id, &carol.id, ShareRole::Reader)
        .await
        .unwrap_err();
    assert!(matches!(err, DiaryError::Forbidden(_)));

    // Someone with no access learns nothing.
    let err = t
        .service
        .invite(diary.id, &carol.id, &bob.id, ShareRole::Reader)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = t.service.list_shares(diary.id, &carol.id).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_owner_may_cancel_pending_invitation() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    let revoked = t.service.revoke(share.id, &alice.id).await?;
    assert_eq!(revoked.status, ShareStatus::Revoked);

    let err = t.service.accept(share.id, &bob.id).await.unwrap_err();
    assert!(matches!(err, DiaryError::Validation(_)));
    assert!(!t.graph.has_diary_relation(diary.id, &bob.id));
    Ok(())
}

#[tokio::test]
async fn test_invitee_cannot_revoke() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Writer).await?;
    t.service.accept(share.id, &bob.id).await?;

    let err = t.service.revoke(share.id, &bob.id).await.unwrap_err();
    assert!(matches!(err, DiaryError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn test_change_role_requires_reacceptance() -> Result<()> {
    let t = TestDiary::new()?;
    let (alice, bob, diary) = team_diary(&t).await?;

    let share = t.service.invite(diary.id, &alice.id, &bob.id, ShareRole::Reader).await?;
    t.service.accept(share.id, &bob.id).await?;

    let err = t
        .service
        .change_role(share.id, &alice.id, ShareRole::Reader)
        .await
        .unwrap_err();
    assert!(matches!(err, DiaryError::Validation(_)));

    let promoted = t.service.change_role(share.id, &alice.id, ShareRole::Writer).await?;
    assert_ne!(promoted.id, share.id);
    assert_eq!(promoted.role, ShareRole::Writer);
    assert_eq!(promoted.status, ShareStatus::Pending);

    // The old grant is gone until the new invitation is accepted.
    let err = t.service.list(&bob.id, ListRequest::new(diary.id)).await.unwrap_err();
    assert!(err.is_not_found());

    t.service.accept(promoted.id, &bob.id).await?;
    t.service.create(&bob.id, NewEntry::new(diary.id, "now I write")).await?;

    let shares = t.service.list_shares(diary.id, &alice.id).await?;
    let statuses: Vec<_> = shares.iter().map(|s| (s.id, s.status)).collect();
    assert!(statuses.contains(&(share.id, ShareStatus::Revoked)));
    assert!(statuses.contains(&(promoted.id, ShareStatus::Accepted)));
    Ok(())
}
