//! Serialization conflicts surfacing through the service.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tempfile::TempDir;

use common::{TestDiary, open_store};
use quire_diary::{DiaryError, ListRequest, NewEntry};
use quire_store::{OnRetry, RetryPolicy, with_conflict_retry};

/// A second connection holding the write lock.
fn lock_database(path: &std::path::Path) -> Result<Connection> {
    let rival = Connection::open(path)?;
    rival.execute_batch("BEGIN IMMEDIATE")?;
    Ok(rival)
}

#[tokio::test]
async fn test_create_exhausts_retries_under_contention() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("quire.db");
    let t = TestDiary::builder()
        .store(open_store(&path)?)
        .retry(RetryPolicy::new(3, Duration::from_millis(2)))
        .build()?;
    let (alice, diary) = t.agent("alice").await?;

    let rival = lock_database(&path)?;
    let err = t
        .service
        .create(&alice.id, NewEntry::new(diary.id, "blocked"))
        .await
        .unwrap_err();

    match &err {
        DiaryError::ConflictExhausted { operation, attempts } => {
            assert_eq!(operation, "create_entry");
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected ConflictExhausted, got {other:?}"),
    }
    assert!(err.is_rate_limited());

    rival.execute_batch("ROLLBACK")?;
    assert!(t.service.list(&alice.id, ListRequest::new(diary.id)).await?.is_empty());
    t.service.create(&alice.id, NewEntry::new(diary.id, "free")).await?;
    Ok(())
}

#[tokio::test]
async fn test_conflict_detected_through_diary_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("quire.db");
    let store = open_store(&path)?;
    let rival = lock_database(&path)?;

    let attempts = AtomicU32::new(0);
    let retries = AtomicU32::new(0);
    let count_retry = |_attempt: u32, _max: u32| {
        retries.fetch_add(1, Ordering::SeqCst);
    };
    let on_retry: OnRetry<'_> = &count_retry;
    let result: Result<(), DiaryError> = with_conflict_retry(
        &RetryPolicy::new(4, Duration::from_millis(1)),
        "noop_write",
        Some(on_retry),
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            std::future::ready(
                store.run_in_transaction("noop_write", |_tx| Ok::<_, DiaryError>(())),
            )
        },
    )
    .await;

    assert!(matches!(
        result,
        Err(DiaryError::ConflictExhausted { attempts: 4, .. })
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(retries.load(Ordering::SeqCst), 3);
    drop(rival);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_creates_all_land() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("quire.db");
    let t = TestDiary::builder().store(open_store(&path)?).build()?;
    let (alice, diary) = t.agent("alice").await?;
    let service = Arc::new(t.service.clone());

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let alice = alice.id;
        handles.push(tokio::spawn(async move {
            service
                .create(&alice, NewEntry::new(diary.id, format!("entry {i}")))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let entries = t
        .service
        .list(&alice.id, ListRequest::new(diary.id).with_page(100, 0))
        .await?;
    assert_eq!(entries.len(), 8);
    Ok(())
}
