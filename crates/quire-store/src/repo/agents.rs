//! Agent registry.

use rusqlite::{Connection, OptionalExtension, Row, params};

use quire_types::{Agent, AgentId};

use crate::codec::{fmt_ts, parse_id, parse_ts};
use crate::error::{Result, StoreError};

pub struct AgentRepo<'c> {
    conn: &'c Connection,
}

impl<'c> AgentRepo<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, agent: &Agent) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO agents (id, display_name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    agent.id.to_string(),
                    agent.display_name,
                    fmt_ts(&agent.created_at)
                ],
            )
            .map_err(|e| StoreError::unique_or(e, || format!("agent {}", agent.id)))?;
        Ok(())
    }

    pub fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>> {
        let agent = self
            .conn
            .query_row(
                "SELECT id, display_name, created_at FROM agents WHERE id = ?1",
                params![id.to_string()],
                row_to_agent,
            )
            .optional()?;
        Ok(agent)
    }

    pub fn exists(&self, id: AgentId) -> Result<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    Ok(Agent {
        id: parse_id(0, &id)?,
        display_name: row.get(1)?,
        created_at: parse_ts(2, &created_at)?,
    })
}
