//! Diary catalog.

use rusqlite::{Connection, OptionalExtension, Row, params};

use quire_types::{AgentId, Diary, DiaryId};

use crate::codec::{fmt_ts, parse_enum, parse_id, parse_ts};
use crate::error::{Result, StoreError};

const COLUMNS: &str = "id, owner_id, key, name, visibility, signed, created_at, updated_at";

pub struct DiaryRepo<'c> {
    conn: &'c Connection,
}

impl<'c> DiaryRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a diary. A second diary with the same `(owner, key)` is
    /// [`StoreError::Duplicate`].
    pub fn create(&self, diary: &Diary) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO diaries
                    (id, owner_id, key, name, visibility, signed, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    diary.id.to_string(),
                    diary.owner_id.to_string(),
                    diary.key,
                    diary.name,
                    diary.visibility.as_str(),
                    diary.signed,
                    fmt_ts(&diary.created_at),
                    fmt_ts(&diary.updated_at),
                ],
            )
            .map_err(|e| StoreError::unique_or(e, || format!("diary key '{}'", diary.key)))?;
        Ok(())
    }

    pub fn find_by_id(&self, id: DiaryId) -> Result<Option<Diary>> {
        let diary = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM diaries WHERE id = ?1"),
                params![id.to_string()],
                row_to_diary,
            )
            .optional()?;
        Ok(diary)
    }

    /// Find a diary only if `owner` owns it.
    pub fn find_owned_by_id(&self, id: DiaryId, owner: AgentId) -> Result<Option<Diary>> {
        let diary = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM diaries WHERE id = ?1 AND owner_id = ?2"),
                params![id.to_string(), owner.to_string()],
                row_to_diary,
            )
            .optional()?;
        Ok(diary)
    }

    pub fn find_owned_by_key(&self, owner: AgentId, key: &str) -> Result<Option<Diary>> {
        let diary = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM diaries WHERE owner_id = ?1 AND key = ?2"),
                params![owner.to_string(), key],
                row_to_diary,
            )
            .optional()?;
        Ok(diary)
    }

    /// All diaries of `owner`, oldest first.
    pub fn list_by_owner(&self, owner: AgentId) -> Result<Vec<Diary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM diaries WHERE owner_id = ?1 ORDER BY created_at, key"
        ))?;
        let rows = stmt.query_map(params![owner.to_string()], row_to_diary)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persist name, visibility and signed flag. Returns false if missing.
    pub fn update(&self, diary: &Diary) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE diaries
            SET name = ?2, visibility = ?3, signed = ?4, updated_at = ?5
            WHERE id = ?1
            "#,
            params![
                diary.id.to_string(),
                diary.name,
                diary.visibility.as_str(),
                diary.signed,
                fmt_ts(&diary.updated_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Delete a diary. Entries, shares and entry grants cascade.
    pub fn delete(&self, id: DiaryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM diaries WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }
}

fn row_to_diary(row: &Row<'_>) -> rusqlite::Result<Diary> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let visibility: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Diary {
        id: parse_id(0, &id)?,
        owner_id: parse_id(1, &owner_id)?,
        key: row.get(2)?,
        name: row.get(3)?,
        visibility: parse_enum(4, &visibility)?,
        signed: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        updated_at: parse_ts(7, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::{Repositories, Result, SqliteStore, StoreError};
    use quire_types::{Agent, Diary, Visibility};

    fn store_with_agent() -> (SqliteStore, Agent) {
        let store = SqliteStore::open_in_memory().unwrap();
        let agent = Agent::new("owner");
        store
            .run_in_transaction("seed", |tx| tx.agents().create(&agent))
            .unwrap();
        (store, agent)
    }

    #[test]
    fn test_key_is_unique_per_owner() {
        let (store, agent) = store_with_agent();
        let other = Agent::new("other");
        store
            .run_in_transaction("seed", |tx| -> Result<()> {
                tx.agents().create(&other)?;
                tx.diaries().create(&Diary::private_for(agent.id))?;
                tx.diaries().create(&Diary::private_for(other.id))?;
                Ok(())
            })
            .unwrap();

        let err = store
            .run_in_transaction("dup", |tx| tx.diaries().create(&Diary::private_for(agent.id)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn test_owned_lookups() {
        let (store, agent) = store_with_agent();
        let stranger = Agent::new("stranger");
        let diary = Diary::new(agent.id, "work", "Work", Visibility::Network);
        store
            .run_in_transaction("seed", |tx| -> Result<()> {
                tx.agents().create(&stranger)?;
                tx.diaries().create(&diary)
            })
            .unwrap();

        store
            .read(|c| -> Result<()> {
                let repo = c.diaries();
                assert_eq!(repo.find_by_id(diary.id)?.unwrap().visibility, Visibility::Network);
                assert!(repo.find_owned_by_id(diary.id, agent.id)?.is_some());
                assert!(repo.find_owned_by_id(diary.id, stranger.id)?.is_none());
                assert!(repo.find_owned_by_key(agent.id, "work")?.is_some());
                assert_eq!(repo.list_by_owner(agent.id)?.len(), 1);
                assert!(repo.list_by_owner(stranger.id)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_and_delete() {
        let (store, agent) = store_with_agent();
        let mut diary = Diary::new(agent.id, "notes", "Notes", Visibility::Private);
        store
            .run_in_transaction("seed", |tx| tx.diaries().create(&diary))
            .unwrap();

        diary.name = "Field notes".into();
        diary.visibility = Visibility::Public;
        assert!(store
            .run_in_transaction("update", |tx| tx.diaries().update(&diary))
            .unwrap());
        let found = store.read(|c| c.diaries().find_by_id(diary.id)).unwrap().unwrap();
        assert_eq!(found.name, "Field notes");
        assert_eq!(found.visibility, Visibility::Public);

        assert!(store
            .run_in_transaction("delete", |tx| tx.diaries().delete(diary.id))
            .unwrap());
        assert!(!store
            .run_in_transaction("delete", |tx| tx.diaries().delete(diary.id))
            .unwrap());
    }
}
