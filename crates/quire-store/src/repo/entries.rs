//! Diary content entries.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use quire_types::{AgentId, DiaryId, Entry, EntryId, EntryType, Timestamp, Visibility};

use crate::codec::{conversion_error, fmt_ts, parse_enum, parse_id, parse_opt_ts, parse_ts};
use crate::error::{Result, StoreError};
use crate::search::{Candidate, ScoredEntry, SearchParams, rank};
use crate::vector::{blob_to_embedding, embedding_to_blob};

const COLUMNS: &str = "id, diary_id, title, content, embedding, tags, importance, access_count, \
     last_accessed_at, entry_type, superseded_by, injection_risk, created_at, updated_at";

/// Filters shared by listing, search and digests.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFilter {
    pub diary_id: DiaryId,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    /// Any of these types; empty means all.
    pub entry_types: Vec<EntryType>,
    pub exclude_superseded: bool,
}

impl EntryFilter {
    pub fn new(diary_id: DiaryId) -> Self {
        Self {
            diary_id,
            tags: Vec::new(),
            entry_types: Vec::new(),
            exclude_superseded: false,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_entry_types(mut self, entry_types: Vec<EntryType>) -> Self {
        self.entry_types = entry_types;
        self
    }

    pub fn exclude_superseded(mut self, exclude: bool) -> Self {
        self.exclude_superseded = exclude;
        self
    }

    /// Render as a `WHERE` clause, pushing bind values onto `binds`.
    fn where_clause(&self, binds: &mut Vec<Value>) -> String {
        binds.push(Value::Text(self.diary_id.to_string()));
        let mut sql = format!("diary_id = ?{}", binds.len());

        for tag in &self.tags {
            binds.push(Value::Text(tag.clone()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(entries.tags) WHERE json_each.value = ?{})",
                binds.len()
            ));
        }

        if !self.entry_types.is_empty() {
            let mut slots = Vec::with_capacity(self.entry_types.len());
            for entry_type in &self.entry_types {
                binds.push(Value::Text(entry_type.as_str().to_string()));
                slots.push(format!("?{}", binds.len()));
            }
            sql.push_str(&format!(" AND entry_type IN ({})", slots.join(", ")));
        }

        if self.exclude_superseded {
            sql.push_str(" AND superseded_by IS NULL");
        }
        sql
    }
}

/// What a permission shortcut needs to know about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessContext {
    pub entry_id: EntryId,
    pub diary_id: DiaryId,
    pub owner_id: AgentId,
    pub visibility: Visibility,
}

pub struct EntryRepo<'c> {
    conn: &'c Connection,
}

impl<'c> EntryRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, entry: &Entry) -> Result<()> {
        let tags = serde_json::to_string(&entry.tags)?;
        self.conn.execute(
            r#"
            INSERT INTO entries (id, diary_id, title, content, embedding, embedding_dims, tags,
                                 importance, access_count, last_accessed_at, entry_type,
                                 superseded_by, injection_risk, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                entry.id.to_string(),
                entry.diary_id.to_string(),
                entry.title,
                entry.content,
                entry.embedding.as_deref().map(embedding_to_blob),
                entry.embedding.as_ref().map(|e| e.len() as i64),
                tags,
                entry.importance,
                entry.access_count as i64,
                entry.last_accessed_at.as_ref().map(fmt_ts),
                entry.entry_type.as_str(),
                entry.superseded_by.map(|id| id.to_string()),
                entry.injection_risk,
                fmt_ts(&entry.created_at),
                fmt_ts(&entry.updated_at),
            ],
        )?;
        tracing::debug!(entry_id = %entry.id, diary_id = %entry.diary_id, "Inserted entry");
        Ok(())
    }

    pub fn find_by_id(&self, id: EntryId) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM entries WHERE id = ?1"),
                params![id.to_string()],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Matching entries, newest first.
    pub fn list(&self, filter: &EntryFilter, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let mut binds = Vec::new();
        let where_sql = filter.where_clause(&mut binds);
        binds.push(Value::Integer(limit as i64));
        let limit_slot = binds.len();
        binds.push(Value::Integer(offset as i64));
        let offset_slot = binds.len();

        let sql = format!(
            "SELECT {COLUMNS} FROM entries WHERE {where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT ?{limit_slot} OFFSET ?{offset_slot}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every entry matching the filter, with cosine similarity to
    /// `query_embedding` where the stored vector has the same dimensions.
    pub fn search_candidates(
        &self,
        filter: &EntryFilter,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<Candidate>> {
        let mut binds = Vec::new();
        let where_sql = filter.where_clause(&mut binds);

        let similarity_sql = match query_embedding {
            Some(query) if !query.is_empty() => {
                binds.push(Value::Blob(embedding_to_blob(query).to_vec()));
                let blob_slot = binds.len();
                binds.push(Value::Integer(query.len() as i64));
                let dims_slot = binds.len();
                format!(
                    "CASE WHEN embedding IS NOT NULL AND embedding_dims = ?{dims_slot} \
                     THEN 1.0 - vec_distance_cosine(embedding, ?{blob_slot}) END"
                )
            }
            _ => "NULL".to_string(),
        };

        let sql = format!(
            "SELECT {COLUMNS}, {similarity_sql} AS similarity FROM entries WHERE {where_sql} \
             ORDER BY created_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), |row| {
            Ok(Candidate {
                entry: row_to_entry(row)?,
                similarity: row.get::<_, Option<f64>>(14)?.filter(|s| s.is_finite()),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Ranked search over a diary.
    pub fn search(&self, params: &SearchParams) -> Result<Vec<ScoredEntry>> {
        let candidates = self.search_candidates(&params.filter, params.query_embedding.as_deref())?;
        Ok(rank(candidates, params))
    }

    /// Persist every mutable field. Returns false if the entry is missing.
    pub fn update(&self, entry: &Entry) -> Result<bool> {
        let tags = serde_json::to_string(&entry.tags)?;
        let rows = self.conn.execute(
            r#"
            UPDATE entries
            SET title = ?2, content = ?3, embedding = ?4, embedding_dims = ?5, tags = ?6,
                importance = ?7, entry_type = ?8, superseded_by = ?9, injection_risk = ?10,
                updated_at = ?11
            WHERE id = ?1
            "#,
            params![
                entry.id.to_string(),
                entry.title,
                entry.content,
                entry.embedding.as_deref().map(embedding_to_blob),
                entry.embedding.as_ref().map(|e| e.len() as i64),
                tags,
                entry.importance,
                entry.entry_type.as_str(),
                entry.superseded_by.map(|id| id.to_string()),
                entry.injection_risk,
                fmt_ts(&entry.updated_at),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn delete(&self, id: EntryId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    /// Most recent non-superseded entries created in the last `days` days.
    pub fn get_recent_for_digest(
        &self,
        diary_id: DiaryId,
        days: u32,
        max_entries: usize,
        entry_types: &[EntryType],
    ) -> Result<Vec<Entry>> {
        let since = chrono::Duration::try_days(i64::from(days))
            .and_then(|window| quire_types::now().checked_sub_signed(window))
            .ok_or_else(|| StoreError::InvalidData(format!("digest window of {days} days")))?;
        let filter = EntryFilter::new(diary_id)
            .with_entry_types(entry_types.to_vec())
            .exclude_superseded(true);

        let mut binds = Vec::new();
        let where_sql = filter.where_clause(&mut binds);
        binds.push(Value::Text(fmt_ts(&since)));
        let since_slot = binds.len();
        binds.push(Value::Integer(i64::try_from(max_entries).unwrap_or(i64::MAX)));
        let limit_slot = binds.len();

        let sql = format!(
            "SELECT {COLUMNS} FROM entries WHERE {where_sql} AND created_at >= ?{since_slot} \
             ORDER BY created_at DESC, id DESC LIMIT ?{limit_slot}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Bump the access counter.
    pub fn record_access(&self, id: EntryId, at: Timestamp) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE entries SET access_count = access_count + 1, last_accessed_at = ?2 \
             WHERE id = ?1",
            params![id.to_string(), fmt_ts(&at)],
        )?;
        Ok(rows > 0)
    }

    /// Owning diary, its owner and visibility.
    pub fn access_context(&self, id: EntryId) -> Result<Option<AccessContext>> {
        let ctx = self
            .conn
            .query_row(
                r#"
                SELECT e.id, d.id, d.owner_id, d.visibility
                FROM entries e JOIN diaries d ON d.id = e.diary_id
                WHERE e.id = ?1
                "#,
                params![id.to_string()],
                |row| {
                    let entry_id: String = row.get(0)?;
                    let diary_id: String = row.get(1)?;
                    let owner_id: String = row.get(2)?;
                    let visibility: String = row.get(3)?;
                    Ok(AccessContext {
                        entry_id: parse_id(0, &entry_id)?,
                        diary_id: parse_id(1, &diary_id)?,
                        owner_id: parse_id(2, &owner_id)?,
                        visibility: parse_enum(3, &visibility)?,
                    })
                },
            )
            .optional()?;
        Ok(ctx)
    }

    /// Ids of every entry in a diary.
    pub fn ids_in_diary(&self, diary_id: DiaryId) -> Result<Vec<EntryId>> {
        let mut stmt = self.conn.prepare("SELECT id FROM entries WHERE diary_id = ?1")?;
        let rows = stmt.query_map(params![diary_id.to_string()], |row| {
            let id: String = row.get(0)?;
            parse_id(0, &id)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let id: String = row.get(0)?;
    let diary_id: String = row.get(1)?;
    let embedding: Option<Vec<u8>> = row.get(4)?;
    let tags: String = row.get(5)?;
    let access_count: i64 = row.get(7)?;
    let last_accessed_at: Option<String> = row.get(8)?;
    let entry_type: String = row.get(9)?;
    let superseded_by: Option<String> = row.get(10)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Entry {
        id: parse_id(0, &id)?,
        diary_id: parse_id(1, &diary_id)?,
        title: row.get(2)?,
        content: row.get(3)?,
        embedding: embedding
            .map(|b| blob_to_embedding(&b))
            .transpose()
            .map_err(|e| conversion_error(4, e))?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(5, e))?,
        importance: row.get(6)?,
        access_count: access_count.max(0) as u64,
        last_accessed_at: parse_opt_ts(8, last_accessed_at)?,
        entry_type: parse_enum(9, &entry_type)?,
        superseded_by: superseded_by.map(|s| parse_id(10, &s)).transpose()?,
        injection_risk: row.get(11)?,
        created_at: parse_ts(12, &created_at)?,
        updated_at: parse_ts(13, &updated_at)?,
    })
}
