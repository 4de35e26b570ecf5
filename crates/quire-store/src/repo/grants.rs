//! Per-entry viewer grants.

use rusqlite::{Connection, params};

use quire_types::{EntryGrant, EntryId};

use crate::codec::{fmt_ts, parse_id, parse_ts};
use crate::error::Result;

pub struct EntryGrantRepo<'c> {
    conn: &'c Connection,
}

impl<'c> EntryGrantRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Record a grant. Re-sharing with the same agent keeps the original row.
    pub fn upsert(&self, grant: &EntryGrant) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            INSERT INTO entry_grants (entry_id, shared_with, shared_by, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (entry_id, shared_with) DO NOTHING
            "#,
            params![
                grant.entry_id.to_string(),
                grant.shared_with.to_string(),
                grant.shared_by.to_string(),
                fmt_ts(&grant.created_at),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn list_for_entry(&self, entry_id: EntryId) -> Result<Vec<EntryGrant>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, shared_with, shared_by, created_at FROM entry_grants \
             WHERE entry_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![entry_id.to_string()], |row| {
            let entry_id: String = row.get(0)?;
            let shared_with: String = row.get(1)?;
            let shared_by: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok(EntryGrant {
                entry_id: parse_id(0, &entry_id)?,
                shared_with: parse_id(1, &shared_with)?,
                shared_by: parse_id(2, &shared_by)?,
                created_at: parse_ts(3, &created_at)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Repositories, Result, SqliteStore};
    use quire_types::{Agent, Diary, Entry, EntryGrant};

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let owner = Agent::new("owner");
        let guest = Agent::new("guest");
        let diary = Diary::private_for(owner.id);
        let entry = Entry::new(diary.id, "shared");
        store
            .run_in_transaction("seed", |tx| -> Result<()> {
                tx.agents().create(&owner)?;
                tx.agents().create(&guest)?;
                tx.diaries().create(&diary)?;
                tx.entries().create(&entry)
            })
            .unwrap();

        let grant = EntryGrant {
            entry_id: entry.id,
            shared_with: guest.id,
            shared_by: owner.id,
            created_at: quire_types::now(),
        };
        assert!(store.run_in_transaction("share", |tx| tx.entry_grants().upsert(&grant)).unwrap());
        assert!(!store.run_in_transaction("share", |tx| tx.entry_grants().upsert(&grant)).unwrap());
        assert_eq!(store.read(|c| c.entry_grants().list_for_entry(entry.id)).unwrap().len(), 1);

        // Grants go with their entry.
        store
            .run_in_transaction("delete", |tx| tx.entries().delete(entry.id))
            .unwrap();
        assert!(store.read(|c| c.entry_grants().list_for_entry(entry.id)).unwrap().is_empty());
    }
}
