//! Agent identities known to the store.

use serde::{Deserialize, Serialize};

use crate::{AgentId, Timestamp};

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    pub created_at: Timestamp,
}

impl Agent {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            display_name: display_name.into(),
            created_at: crate::now(),
        }
    }
}
