//! HTTP client for a Keto-style relationship oracle.
//!
//! Checks go to the read API, tuple writes and deletes to the admin (write)
//! API. The two usually listen on different ports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use quire_types::AgentId;

use crate::error::{AuthzError, Result};
use crate::oracle::{Permission, PermissionOracle, RelationshipWriter};
use crate::tuple::{RelationTuple, Subject, TupleQuery};

/// Connection settings for [`HttpOracle`].
#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    pub read_url: String,
    pub write_url: String,
    pub timeout: Duration,
}

impl HttpOracleConfig {
    pub fn new(read_url: impl Into<String>, write_url: impl Into<String>) -> Self {
        Self {
            read_url: read_url.into(),
            write_url: write_url.into(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HttpOracle {
    client: Client,
    config: HttpOracleConfig,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthzError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn read_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.read_url.trim_end_matches('/'), path)
    }

    fn write_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.write_url.trim_end_matches('/'), path)
    }
}

async fn backend_error(response: reqwest::Response) -> AuthzError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AuthzError::Backend { status, body }
}

#[async_trait]
impl PermissionOracle for HttpOracle {
    async fn check(&self, permission: Permission, subject: &AgentId) -> Result<bool> {
        let object = permission.object();
        let subject_id = subject.to_string();
        let response = self
            .client
            .get(self.read_endpoint("/relation-tuples/check"))
            .query(&[
                ("namespace", permission.namespace().as_str()),
                ("object", object.as_str()),
                ("relation", permission.name()),
                ("subject_id", subject_id.as_str()),
            ])
            .send()
            .await?;

        // A denied check comes back as 403 with the same body shape.
        let status = response.status();
        if !(status.is_success() || status == StatusCode::FORBIDDEN) {
            return Err(backend_error(response).await);
        }

        let body: CheckResponse = response.json().await?;
        tracing::debug!(
            namespace = permission.namespace().as_str(),
            object = %object,
            permission = permission.name(),
            subject = %subject,
            allowed = body.allowed,
            "Permission check"
        );
        Ok(body.allowed)
    }
}

#[async_trait]
impl RelationshipWriter for HttpOracle {
    async fn write(&self, tuples: &[RelationTuple]) -> Result<()> {
        if tuples.is_empty() {
            return Ok(());
        }
        let patch: Vec<PatchDelta<'_>> = tuples
            .iter()
            .map(|t| PatchDelta {
                action: "insert",
                relation_tuple: WireTuple::from(t),
            })
            .collect();

        let response = self
            .client
            .patch(self.write_endpoint("/admin/relation-tuples"))
            .json(&patch)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        tracing::debug!(count = tuples.len(), "Wrote relation tuples");
        Ok(())
    }

    async fn delete(&self, query: &TupleQuery) -> Result<()> {
        let mut params: Vec<(&str, String)> =
            vec![("namespace", query.namespace.as_str().to_string())];
        if let Some(object) = &query.object {
            params.push(("object", object.clone()));
        }
        if let Some(relation) = query.relation {
            params.push(("relation", relation.as_str().to_string()));
        }
        match query.subject {
            Some(Subject::Agent(id)) => params.push(("subject_id", id.to_string())),
            Some(Subject::Diary(id)) => {
                params.push(("subject_set.namespace", "Diary".to_string()));
                params.push(("subject_set.object", id.to_string()));
                params.push(("subject_set.relation", String::new()));
            }
            None => {}
        }

        let response = self
            .client
            .delete(self.write_endpoint("/admin/relation-tuples"))
            .query(&params)
            .send()
            .await?;

        // Deleting nothing is not an error.
        let status = response.status();
        if !(status.is_success() || status == StatusCode::NOT_FOUND) {
            return Err(backend_error(response).await);
        }
        tracing::debug!(
            namespace = query.namespace.as_str(),
            object = ?query.object,
            "Deleted relation tuples"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    allowed: bool,
}

#[derive(Debug, Serialize)]
struct PatchDelta<'a> {
    action: &'static str,
    relation_tuple: WireTuple<'a>,
}

#[derive(Debug, Serialize)]
struct WireTuple<'a> {
    namespace: &'static str,
    object: &'a str,
    relation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_set: Option<WireSubjectSet>,
}

#[derive(Debug, Serialize)]
struct WireSubjectSet {
    namespace: &'static str,
    object: String,
    relation: &'static str,
}

impl<'a> From<&'a RelationTuple> for WireTuple<'a> {
    fn from(tuple: &'a RelationTuple) -> Self {
        let (subject_id, subject_set) = match tuple.subject {
            Subject::Agent(id) => (Some(id.to_string()), None),
            Subject::Diary(id) => (
                None,
                Some(WireSubjectSet {
                    namespace: "Diary",
                    object: id.to_string(),
                    relation: "",
                }),
            ),
        };
        Self {
            namespace: tuple.namespace.as_str(),
            object: &tuple.object,
            relation: tuple.relation.as_str(),
            subject_id,
            subject_set,
        }
    }
}
