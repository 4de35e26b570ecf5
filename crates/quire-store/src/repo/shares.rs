//! Diary invitations.

use rusqlite::{Connection, OptionalExtension, Row, params};

use quire_types::{AgentId, DiaryId, Share, ShareId, ShareStatus, Timestamp};

use crate::codec::{fmt_ts, parse_enum, parse_id, parse_ts};
use crate::error::{Result, StoreError};

const COLUMNS: &str = "id, diary_id, shared_with, role, status, created_at, updated_at";

pub struct ShareRepo<'c> {
    conn: &'c Connection,
}

impl<'c> ShareRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert an invitation. A second active invitation for the same
    /// `(diary, agent)` pair is [`StoreError::Duplicate`].
    pub fn create(&self, share: &Share) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO diary_shares
                    (id, diary_id, shared_with, role, status, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    share.id.to_string(),
                    share.diary_id.to_string(),
                    share.shared_with.to_string(),
                    share.role.as_str(),
                    share.status.as_str(),
                    fmt_ts(&share.created_at),
                    fmt_ts(&share.updated_at),
                ],
            )
            .map_err(|e| {
                StoreError::unique_or(e, || {
                    format!(
                        "active invitation for agent {} on diary {}",
                        share.shared_with, share.diary_id
                    )
                })
            })?;
        Ok(())
    }

    pub fn find_by_id(&self, id: ShareId) -> Result<Option<Share>> {
        let share = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM diary_shares WHERE id = ?1"),
                params![id.to_string()],
                row_to_share,
            )
            .optional()?;
        Ok(share)
    }

    /// The active (pending or accepted) invitation for a pair, if any.
    pub fn find_by_diary_and_agent(
        &self,
        diary_id: DiaryId,
        agent: AgentId,
    ) -> Result<Option<Share>> {
        let share = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM diary_shares \
                     WHERE diary_id = ?1 AND shared_with = ?2 AND status IN ('pending', 'accepted')"
                ),
                params![diary_id.to_string(), agent.to_string()],
                row_to_share,
            )
            .optional()?;
        Ok(share)
    }

    /// Every invitation ever issued for a diary, newest first.
    pub fn list_by_diary(&self, diary_id: DiaryId) -> Result<Vec<Share>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM diary_shares WHERE diary_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![diary_id.to_string()], row_to_share)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Invitations awaiting `agent`'s answer, oldest first.
    pub fn list_pending_for_agent(&self, agent: AgentId) -> Result<Vec<Share>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM diary_shares WHERE shared_with = ?1 AND status = 'pending' \
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![agent.to_string()], row_to_share)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Move an invitation to `status`. Only applies when the stored status
    /// is still `from`, so a concurrent transition is not overwritten.
    pub fn update_status(
        &self,
        id: ShareId,
        from: ShareStatus,
        to: ShareStatus,
        at: Timestamp,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE diary_shares SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id.to_string(), from.as_str(), to.as_str(), fmt_ts(&at)],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_share(row: &Row<'_>) -> rusqlite::Result<Share> {
    let id: String = row.get(0)?;
    let diary_id: String = row.get(1)?;
    let shared_with: String = row.get(2)?;
    let role: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(Share {
        id: parse_id(0, &id)?,
        diary_id: parse_id(1, &diary_id)?,
        shared_with: parse_id(2, &shared_with)?,
        role: parse_enum(3, &role)?,
        status: parse_enum(4, &status)?,
        created_at: parse_ts(5, &created_at)?,
        updated_at: parse_ts(6, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::{Repositories, Result, SqliteStore, StoreError};
    use quire_types::{Agent, Diary, Share, ShareRole, ShareStatus};

    fn seeded() -> (SqliteStore, Diary, Agent) {
        let store = SqliteStore::open_in_memory().unwrap();
        let owner = Agent::new("owner");
        let guest = Agent::new("guest");
        let diary = Diary::private_for(owner.id);
        store
            .run_in_transaction("seed", |tx| -> Result<()> {
                tx.agents().create(&owner)?;
                tx.agents().create(&guest)?;
                tx.diaries().create(&diary)
            })
            .unwrap();
        (store, diary, guest)
    }

    #[test]
    fn test_one_active_invitation_per_pair() {
        let (store, diary, guest) = seeded();
        let first = Share::pending(diary.id, guest.id, ShareRole::Reader);
        store
            .run_in_transaction("invite", |tx| tx.shares().create(&first))
            .unwrap();

        let second = Share::pending(diary.id, guest.id, ShareRole::Writer);
        let err = store
            .run_in_transaction("invite", |tx| tx.shares().create(&second))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // A terminal invitation no longer blocks a fresh one.
        let now = quire_types::now();
        store
            .run_in_transaction("decline", |tx| {
                tx.shares()
                    .update_status(first.id, ShareStatus::Pending, ShareStatus::Declined, now)
            })
            .unwrap();
        store
            .run_in_transaction("invite", |tx| tx.shares().create(&second))
            .unwrap();

        let active = store
            .read(|c| c.shares().find_by_diary_and_agent(diary.id, guest.id))
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(store.read(|c| c.shares().list_by_diary(diary.id)).unwrap().len(), 2);
    }

    #[test]
    fn test_update_status_is_conditional() {
        let (store, diary, guest) = seeded();
        let share = Share::pending(diary.id, guest.id, ShareRole::Reader);
        store
            .run_in_transaction("invite", |tx| tx.shares().create(&share))
            .unwrap();
        assert_eq!(
            store.read(|c| c.shares().list_pending_for_agent(guest.id)).unwrap().len(),
            1
        );

        let now = quire_types::now();
        let accepted = store
            .run_in_transaction("accept", |tx| {
                tx.shares()
                    .update_status(share.id, ShareStatus::Pending, ShareStatus::Accepted, now)
            })
            .unwrap();
        assert!(accepted);
        let again = store
            .run_in_transaction("accept", |tx| {
                tx.shares()
                    .update_status(share.id, ShareStatus::Pending, ShareStatus::Accepted, now)
            })
            .unwrap();
        assert!(!again);
        assert!(store.read(|c| c.shares().list_pending_for_agent(guest.id)).unwrap().is_empty());
    }
}
