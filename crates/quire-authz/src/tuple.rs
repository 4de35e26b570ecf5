//! Relation tuples: the oracle's unit of state.
//!
//! A tuple reads "`subject` is `relation` of `namespace:object`", e.g.
//! `Diary:1234#reader@agent-5678`. Entry tuples point at their diary through
//! a `parent` tuple whose subject is the diary itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use quire_types::{AgentId, DiaryId, EntryId, ShareRole};

/// Object namespaces known to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Diary,
    DiaryEntry,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diary => "Diary",
            Self::DiaryEntry => "DiaryEntry",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored relations. Diaries use owner/writer/reader, entries use
/// owner/viewer/parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Owner,
    Writer,
    Reader,
    Viewer,
    Parent,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Reader => "reader",
            Self::Viewer => "viewer",
            Self::Parent => "parent",
        }
    }
}

impl From<ShareRole> for Relation {
    fn from(role: ShareRole) -> Self {
        match role {
            ShareRole::Reader => Relation::Reader,
            ShareRole::Writer => Relation::Writer,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a tuple grants something to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Agent(AgentId),
    Diary(DiaryId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Diary(id) => write!(f, "Diary:{id}"),
        }
    }
}

/// A single grant in the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub namespace: Namespace,
    pub object: String,
    pub relation: Relation,
    pub subject: Subject,
}

impl RelationTuple {
    pub fn diary(diary_id: DiaryId, relation: Relation, agent: AgentId) -> Self {
        Self {
            namespace: Namespace::Diary,
            object: diary_id.to_string(),
            relation,
            subject: Subject::Agent(agent),
        }
    }

    pub fn entry(entry_id: EntryId, relation: Relation, agent: AgentId) -> Self {
        Self {
            namespace: Namespace::DiaryEntry,
            object: entry_id.to_string(),
            relation,
            subject: Subject::Agent(agent),
        }
    }

    /// Link an entry to the diary it lives in.
    pub fn entry_parent(entry_id: EntryId, diary_id: DiaryId) -> Self {
        Self {
            namespace: Namespace::DiaryEntry,
            object: entry_id.to_string(),
            relation: Relation::Parent,
            subject: Subject::Diary(diary_id),
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object, self.relation, self.subject
        )
    }
}

/// Selects tuples for deletion. Unset fields match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleQuery {
    pub namespace: Namespace,
    pub object: Option<String>,
    pub relation: Option<Relation>,
    pub subject: Option<Subject>,
}

impl TupleQuery {
    /// Every tuple on `namespace:object`.
    pub fn object(namespace: Namespace, object: impl Into<String>) -> Self {
        Self {
            namespace,
            object: Some(object.into()),
            relation: None,
            subject: None,
        }
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        tuple.namespace == self.namespace
            && self.object.as_ref().is_none_or(|o| *o == tuple.object)
            && self.relation.is_none_or(|r| r == tuple.relation)
            && self.subject.is_none_or(|s| s == tuple.subject)
    }
}
