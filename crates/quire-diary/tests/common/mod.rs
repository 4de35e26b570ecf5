//! Common test utilities for diary integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use quire_authz::{
    AuthzError, InMemoryOracle, Permission, PermissionOracle, RelationTuple, RelationshipWriter,
    SharedOracle, SharedWriter, TupleQuery,
};
use quire_config::PropagationConfig;
use quire_diary::{DiaryService, Dispatcher, RelationshipPropagator};
use quire_embed::{EmbedError, Embedder, MockEmbedder, SharedEmbedder};
use quire_store::{RetryPolicy, SqliteStore};
use quire_types::{Agent, AgentId, Diary};

pub const DIMS: usize = 16;

/// Counts permission checks before delegating.
pub struct CountingOracle {
    inner: Arc<InMemoryOracle>,
    checks: AtomicUsize,
}

impl CountingOracle {
    pub fn new(inner: Arc<InMemoryOracle>) -> Self {
        Self {
            inner,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionOracle for CountingOracle {
    async fn check(&self, permission: Permission, subject: &AgentId) -> quire_authz::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.inner.check(permission, subject).await
    }
}

/// Relationship writer that can be switched into an outage.
pub struct FlakyWriter {
    inner: Arc<InMemoryOracle>,
    down: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyWriter {
    pub fn new(inner: Arc<InMemoryOracle>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Successful write and delete calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn outage(&self) -> quire_authz::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(AuthzError::Backend {
                status: 503,
                body: "oracle unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelationshipWriter for FlakyWriter {
    async fn write(&self, tuples: &[RelationTuple]) -> quire_authz::Result<()> {
        self.outage()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(tuples).await
    }

    async fn delete(&self, query: &TupleQuery) -> quire_authz::Result<()> {
        self.outage()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(query).await
    }
}

/// Embedder whose provider is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_passage(&self, _text: &str) -> quire_embed::Result<Vec<f32>> {
        Err(EmbedError::Network("connection refused".to_string()))
    }

    async fn embed_query(&self, _text: &str) -> quire_embed::Result<Vec<f32>> {
        Err(EmbedError::Network("connection refused".to_string()))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Records every passage it embeds.
pub struct RecordingEmbedder {
    inner: MockEmbedder,
    passages: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: MockEmbedder::new(DIMS),
            passages: Mutex::new(Vec::new()),
        }
    }

    pub fn passages(&self) -> Vec<String> {
        self.passages.lock().clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed_passage(&self, text: &str) -> quire_embed::Result<Vec<f32>> {
        self.passages.lock().push(text.to_string());
        self.inner.embed_passage(text).await
    }

    async fn embed_query(&self, text: &str) -> quire_embed::Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// A service over an in-memory (or on-disk) store and oracle.
pub struct TestDiary {
    pub service: DiaryService,
    pub dispatcher: Dispatcher,
    pub store: Arc<SqliteStore>,
    /// Ground-truth relation graph.
    pub graph: Arc<InMemoryOracle>,
    pub oracle: Arc<CountingOracle>,
    pub writer: Arc<FlakyWriter>,
}

pub struct Builder {
    store: Option<Arc<SqliteStore>>,
    embedder: Option<SharedEmbedder>,
    propagation: PropagationConfig,
    retry: RetryPolicy,
}

impl Builder {
    pub fn embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn no_embedder(mut self) -> Self {
        self.embedder = None;
        self
    }

    pub fn store(mut self, store: Arc<SqliteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn propagation(mut self, config: PropagationConfig) -> Self {
        self.propagation = config;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<TestDiary> {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open_in_memory()?),
        };
        let graph = Arc::new(InMemoryOracle::new());
        let oracle = Arc::new(CountingOracle::new(graph.clone()));
        let writer = Arc::new(FlakyWriter::new(graph.clone()));

        let shared_oracle: SharedOracle = oracle.clone();
        let shared_writer: SharedWriter = writer.clone();
        let propagator =
            RelationshipPropagator::new(store.clone(), shared_writer, self.propagation);
        let service = DiaryService::new(store.clone(), shared_oracle, propagator.clone())
            .with_embedder(self.embedder)
            .with_retry_policy(self.retry);
        let dispatcher = Dispatcher::new(propagator);

        Ok(TestDiary {
            service,
            dispatcher,
            store,
            graph,
            oracle,
            writer,
        })
    }
}

impl TestDiary {
    pub fn builder() -> Builder {
        Builder {
            store: None,
            embedder: Some(Arc::new(MockEmbedder::new(DIMS))),
            propagation: fast_propagation(),
            retry: RetryPolicy::new(3, Duration::from_millis(5)),
        }
    }

    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Register an agent and return it with its private diary.
    pub async fn agent(&self, name: &str) -> Result<(Agent, Diary)> {
        Ok(self.service.register_agent(name).await?)
    }
}

/// Propagation settings with short timeouts and no backoff wait.
pub fn fast_propagation() -> PropagationConfig {
    PropagationConfig {
        timeout_ms: 1_000,
        poll_interval_ms: 10,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        max_attempts: 3,
        ..PropagationConfig::default()
    }
}

/// Open an on-disk store with conflicts surfacing immediately.
pub fn open_store(path: &Path) -> Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(path, Duration::ZERO)?))
}
